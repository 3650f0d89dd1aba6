//! HTTP client for the cancellation endpoints.
//!
//! Keeps a cookie store so the CSRF cookie set by `/csrf` rides along on
//! the terminal calls automatically.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::state::DOWNSELL_REASON_KEY;
use crate::error::ClientError;
use crate::session::model::CancellationAttempt;

/// Thin JSON client over the cancellation API.
pub struct FlowClient {
    http: reqwest::Client,
    base_url: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StartBody {
    subscription_id: Uuid,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct FinalizeBody<'a> {
    cancellation_id: Uuid,
    csrf_token: &'a str,
    reason_key: &'a str,
    reason_text: &'a str,
}

#[derive(Deserialize)]
struct TokenResponse {
    token: String,
}

#[derive(Deserialize)]
struct StartResponse {
    cancellation: CancellationAttempt,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

impl FlowClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .cookie_store(true)
            .build()
            .map_err(|e| ClientError::Http(e.to_string()))?;
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Ok(Self { http, base_url })
    }

    /// `GET /csrf` — returns the body token; the signed cookie lands in the
    /// cookie store.
    pub async fn fetch_csrf_token(&self) -> Result<String, ClientError> {
        let res = self
            .http
            .get(format!("{}/csrf", self.base_url))
            .send()
            .await
            .map_err(|e| ClientError::Http(e.to_string()))?;
        let res = check(res).await?;
        let body: TokenResponse = res
            .json()
            .await
            .map_err(|e| ClientError::Decode(e.to_string()))?;
        Ok(body.token)
    }

    /// `POST /cancel/start` — find-or-create the attempt for a subscription.
    pub async fn start(&self, subscription_id: Uuid) -> Result<CancellationAttempt, ClientError> {
        let res = self
            .http
            .post(format!("{}/cancel/start", self.base_url))
            .json(&StartBody { subscription_id })
            .send()
            .await
            .map_err(|e| ClientError::Http(e.to_string()))?;
        let res = check(res).await?;
        let body: StartResponse = res
            .json()
            .await
            .map_err(|e| ClientError::Decode(e.to_string()))?;
        Ok(body.cancellation)
    }

    /// `POST /cancel/submit` — confirm the cancellation.
    pub async fn submit(
        &self,
        cancellation_id: Uuid,
        csrf_token: &str,
        reason_key: &str,
        reason_text: &str,
    ) -> Result<(), ClientError> {
        self.post_finalize(
            "/cancel/submit",
            &FinalizeBody {
                cancellation_id,
                csrf_token,
                reason_key,
                reason_text,
            },
        )
        .await
    }

    /// `POST /cancel/downsell` — keep the subscription at the offer price.
    pub async fn accept_downsell(
        &self,
        cancellation_id: Uuid,
        csrf_token: &str,
    ) -> Result<(), ClientError> {
        self.post_finalize(
            "/cancel/downsell",
            &FinalizeBody {
                cancellation_id,
                csrf_token,
                reason_key: DOWNSELL_REASON_KEY,
                reason_text: "",
            },
        )
        .await
    }

    async fn post_finalize(
        &self,
        path: &str,
        body: &FinalizeBody<'_>,
    ) -> Result<(), ClientError> {
        let res = self
            .http
            .post(format!("{}{path}", self.base_url))
            .json(body)
            .send()
            .await
            .map_err(|e| ClientError::Http(e.to_string()))?;
        check(res).await?;
        Ok(())
    }
}

/// Turn a non-2xx response into `ClientError::Rejected` with the server's
/// `{ error }` code when one is present.
async fn check(res: reqwest::Response) -> Result<reqwest::Response, ClientError> {
    let status = res.status();
    if status.is_success() {
        return Ok(res);
    }
    let code = match res.json::<ErrorBody>().await {
        Ok(body) => body.error,
        Err(_) => status
            .canonical_reason()
            .unwrap_or("unknown")
            .to_string(),
    };
    Err(ClientError::Rejected {
        status: status.as_u16(),
        code,
    })
}
