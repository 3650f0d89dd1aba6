//! REST endpoints for the cancellation flow.
//!
//! All write endpoints demand a valid CSRF token and scope every row
//! lookup/update by the caller's user id. Bodies are schema-checked before
//! any side effect; malformed JSON maps to 400 rather than axum's default
//! 422.

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::csrf::{CSRF_COOKIE, CsrfService};
use crate::error::{DatabaseError, Error, SessionError};
use crate::session::model::{
    CancellationAttempt, DownsellVariant, PlanPricing, Subscription, SubscriptionStatus,
};
use crate::session::SessionBootstrap;
use crate::store::Database;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<dyn Database>,
    pub csrf: Arc<CsrfService>,
    pub bootstrap: Arc<SessionBootstrap>,
    /// The mock session identity standing in for real authentication.
    pub user_id: String,
}

/// Build the Axum router with the cancellation REST routes.
pub fn app_routes(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/csrf", get(issue_csrf))
        .route("/cancel/bootstrap", get(bootstrap_session))
        .route("/cancel/start", post(start_cancellation))
        .route("/cancel/submit", post(submit_cancellation))
        .route("/cancel/downsell", post(accept_downsell))
        .with_state(state)
}

// ── Wire-level error taxonomy ───────────────────────────────────────
// (module-local, distinct from crate::error::Error)

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("malformed request body")]
    BadRequest,

    #[error("csrf verification failed")]
    Csrf,

    #[error("no matching row for caller")]
    NotFound,

    #[error("subscription not found for caller")]
    SubscriptionNotFound,

    #[error("persistence failure: {0}")]
    Persistence(String),
}

impl ApiError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            Self::BadRequest => (StatusCode::BAD_REQUEST, "bad_request"),
            Self::Csrf => (StatusCode::FORBIDDEN, "csrf"),
            Self::NotFound => (StatusCode::NOT_FOUND, "not_found"),
            Self::SubscriptionNotFound => (StatusCode::NOT_FOUND, "subscription_not_found"),
            Self::Persistence(_) => (StatusCode::INTERNAL_SERVER_ERROR, "persistence_error"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        }
        (status, Json(serde_json::json!({ "error": code }))).into_response()
    }
}

impl From<DatabaseError> for ApiError {
    fn from(e: DatabaseError) -> Self {
        match e {
            DatabaseError::NotFound { .. } => Self::NotFound,
            other => Self::Persistence(other.to_string()),
        }
    }
}

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        match e {
            Error::Session(
                SessionError::NoSubscription { .. } | SessionError::SubscriptionNotFound { .. },
            ) => Self::SubscriptionNotFound,
            Error::Database(db) => db.into(),
            Error::Csrf(_) => Self::Csrf,
            other => Self::Persistence(other.to_string()),
        }
    }
}

// ── Health ──────────────────────────────────────────────────────────

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "cancel-flow"
    }))
}

// ── CSRF ────────────────────────────────────────────────────────────

/// GET /csrf
///
/// Returns `{ token }` and sets the signed HttpOnly cookie.
async fn issue_csrf(State(state): State<AppState>) -> impl IntoResponse {
    let issued = state.csrf.issue();
    let cookie = format!(
        "{CSRF_COOKIE}={}; Path=/; HttpOnly; SameSite=Lax",
        issued.cookie_value
    );
    (
        [(header::SET_COOKIE, cookie)],
        Json(serde_json::json!({ "token": issued.token })),
    )
}

// ── Bootstrap ───────────────────────────────────────────────────────

#[derive(Deserialize)]
struct BootstrapQuery {
    /// Explicit variant override (persisted), e.g. `?variant=B`.
    variant: Option<String>,
    /// Dev reset: `?reset=1` wipes the caller's attempts first.
    reset: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct BootstrapResponse {
    subscription: Subscription,
    variant: DownsellVariant,
    cancellation_id: Uuid,
    prices: PlanPricing,
}

/// GET /cancel/bootstrap
///
/// Runs once per page load: resolves the open subscription, reuses or
/// creates the attempt, and hands the wizard its variant and pricing.
async fn bootstrap_session(
    State(state): State<AppState>,
    Query(query): Query<BootstrapQuery>,
) -> Result<Json<BootstrapResponse>, ApiError> {
    if query.reset.as_deref() == Some("1") {
        state.bootstrap.reset(&state.user_id).await?;
    }

    let override_variant = query
        .variant
        .as_deref()
        .and_then(|v| v.parse::<DownsellVariant>().ok());

    let ctx = state
        .bootstrap
        .ensure_session(&state.user_id, override_variant)
        .await?;

    debug!(
        attempt = %ctx.cancellation_id,
        variant = %ctx.variant,
        "Session bootstrapped"
    );
    Ok(Json(BootstrapResponse {
        subscription: ctx.subscription,
        variant: ctx.variant,
        cancellation_id: ctx.cancellation_id,
        prices: ctx.pricing,
    }))
}

// ── Start ───────────────────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StartRequest {
    subscription_id: Uuid,
}

#[derive(Serialize)]
struct StartResponse {
    cancellation: CancellationAttempt,
}

/// POST /cancel/start
async fn start_cancellation(
    State(state): State<AppState>,
    payload: Result<Json<StartRequest>, JsonRejection>,
) -> Result<Json<StartResponse>, ApiError> {
    let Json(req) = payload.map_err(|_| ApiError::BadRequest)?;
    let cancellation = state
        .bootstrap
        .start_attempt(&state.user_id, req.subscription_id)
        .await?;
    Ok(Json(StartResponse { cancellation }))
}

// ── Finalize ────────────────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct FinalizeRequest {
    cancellation_id: Uuid,
    csrf_token: String,
    reason_key: String,
    #[serde(default)]
    reason_text: String,
}

/// POST /cancel/submit — confirm the cancellation.
async fn submit_cancellation(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<FinalizeRequest>, JsonRejection>,
) -> Result<Json<serde_json::Value>, ApiError> {
    finalize(state, headers, payload, false).await
}

/// POST /cancel/downsell — accept the offer and keep the subscription.
async fn accept_downsell(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<FinalizeRequest>, JsonRejection>,
) -> Result<Json<serde_json::Value>, ApiError> {
    finalize(state, headers, payload, true).await
}

async fn finalize(
    state: AppState,
    headers: HeaderMap,
    payload: Result<Json<FinalizeRequest>, JsonRejection>,
    accepted_downsell: bool,
) -> Result<Json<serde_json::Value>, ApiError> {
    let Json(req) = payload.map_err(|_| ApiError::BadRequest)?;
    if req.csrf_token.is_empty() || req.reason_key.is_empty() {
        return Err(ApiError::BadRequest);
    }

    let cookie = cookie_value(&headers, CSRF_COOKIE);
    let origin = header_str(&headers, header::ORIGIN);
    let referer = header_str(&headers, header::REFERER);
    state
        .csrf
        .verify(cookie.as_deref(), &req.csrf_token, origin, referer)
        .map_err(|e| {
            debug!(error = %e, "CSRF verification failed");
            ApiError::Csrf
        })?;

    let attempt = state
        .db
        .get_attempt(&state.user_id, req.cancellation_id)
        .await?
        .ok_or(ApiError::NotFound)?;

    let trimmed = req.reason_text.trim();
    let reason_text = (!trimmed.is_empty()).then_some(trimmed);
    state
        .db
        .record_outcome(
            &state.user_id,
            attempt.id,
            accepted_downsell,
            &req.reason_key,
            reason_text,
        )
        .await?;

    let status = if accepted_downsell {
        SubscriptionStatus::Active
    } else {
        SubscriptionStatus::PendingCancellation
    };
    state
        .db
        .update_subscription_status(&state.user_id, attempt.subscription_id, status)
        .await?;

    info!(
        attempt = %attempt.id,
        accepted_downsell,
        reason = %req.reason_key,
        "Cancellation attempt finalized"
    );
    Ok(Json(serde_json::json!({ "ok": true })))
}

// ── Header helpers ──────────────────────────────────────────────────

fn header_str<'a>(headers: &'a HeaderMap, name: header::HeaderName) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    let raw = headers.get(header::COOKIE)?.to_str().ok()?;
    raw.split(';').find_map(|pair| {
        let (key, value) = pair.trim().split_once('=')?;
        (key == name).then(|| value.to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use secrecy::SecretString;
    use tower::ServiceExt;

    use crate::store::LibSqlBackend;

    const USER: &str = "u1";

    async fn test_state() -> (AppState, Arc<dyn Database>) {
        let db: Arc<dyn Database> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let state = AppState {
            db: Arc::clone(&db),
            csrf: Arc::new(CsrfService::new(SecretString::from("test-secret"))),
            bootstrap: Arc::new(SessionBootstrap::new(Arc::clone(&db))),
            user_id: USER.to_string(),
        };
        (state, db)
    }

    async fn seed_subscription(db: &Arc<dyn Database>) -> Subscription {
        let sub = Subscription::new(USER, 2500);
        db.insert_subscription(&sub).await.unwrap();
        sub
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    /// GET /csrf against the router, returning (body token, cookie value).
    async fn issue_token(router: &Router) -> (String, String) {
        let response = router
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/csrf")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let set_cookie = response
            .headers()
            .get(header::SET_COOKIE)
            .unwrap()
            .to_str()
            .unwrap()
            .to_string();
        let cookie = set_cookie.split(';').next().unwrap().to_string();
        let body = body_json(response).await;
        (body["token"].as_str().unwrap().to_string(), cookie)
    }

    fn post_json(uri: &str, cookie: Option<&str>, body: serde_json::Value) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(cookie) = cookie {
            builder = builder.header(header::COOKIE, cookie);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    #[tokio::test]
    async fn malformed_body_is_bad_request() {
        let (state, _db) = test_state().await;
        let router = app_routes(state);

        let response = router
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/cancel/submit")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from("{not json"))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["error"], "bad_request");
    }

    #[tokio::test]
    async fn empty_reason_key_is_bad_request() {
        let (state, _db) = test_state().await;
        let router = app_routes(state);
        let (token, cookie) = issue_token(&router).await;

        let response = router
            .oneshot(post_json(
                "/cancel/submit",
                Some(&cookie),
                serde_json::json!({
                    "cancellationId": Uuid::new_v4(),
                    "csrfToken": token,
                    "reasonKey": "",
                }),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn missing_cookie_is_csrf_failure() {
        let (state, _db) = test_state().await;
        let router = app_routes(state);

        let response = router
            .oneshot(post_json(
                "/cancel/submit",
                None,
                serde_json::json!({
                    "cancellationId": Uuid::new_v4(),
                    "csrfToken": "anything",
                    "reasonKey": "other",
                }),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(body_json(response).await["error"], "csrf");
    }

    #[tokio::test]
    async fn mismatched_token_is_csrf_failure_and_writes_nothing() {
        let (state, db) = test_state().await;
        let sub = seed_subscription(&db).await;
        let router = app_routes(state.clone());

        let attempt = state.bootstrap.start_attempt(USER, sub.id).await.unwrap();
        let (_token, cookie) = issue_token(&router).await;

        let response = router
            .oneshot(post_json(
                "/cancel/submit",
                Some(&cookie),
                serde_json::json!({
                    "cancellationId": attempt.id,
                    "csrfToken": "not-the-issued-token",
                    "reasonKey": "other",
                    "reasonText": "x".repeat(30),
                }),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        let stored = db.get_attempt(USER, attempt.id).await.unwrap().unwrap();
        assert!(stored.accepted_downsell.is_none());
        assert!(stored.reason_key.is_none());
    }

    #[tokio::test]
    async fn unknown_attempt_is_not_found() {
        let (state, _db) = test_state().await;
        let router = app_routes(state);
        let (token, cookie) = issue_token(&router).await;

        let response = router
            .oneshot(post_json(
                "/cancel/submit",
                Some(&cookie),
                serde_json::json!({
                    "cancellationId": Uuid::new_v4(),
                    "csrfToken": token,
                    "reasonKey": "other",
                }),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_json(response).await["error"], "not_found");
    }

    #[tokio::test]
    async fn start_with_unknown_subscription_is_not_found() {
        let (state, _db) = test_state().await;
        let router = app_routes(state);

        let response = router
            .oneshot(post_json(
                "/cancel/start",
                None,
                serde_json::json!({ "subscriptionId": Uuid::new_v4() }),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_json(response).await["error"], "subscription_not_found");
    }

    #[tokio::test]
    async fn submit_parks_subscription_and_records_reason() {
        let (state, db) = test_state().await;
        let sub = seed_subscription(&db).await;
        let router = app_routes(state.clone());

        let attempt = state.bootstrap.start_attempt(USER, sub.id).await.unwrap();
        let (token, cookie) = issue_token(&router).await;

        let response = router
            .oneshot(post_json(
                "/cancel/submit",
                Some(&cookie),
                serde_json::json!({
                    "cancellationId": attempt.id,
                    "csrfToken": token,
                    "reasonKey": "other",
                    "reasonText": "a thirty character feedback!!",
                }),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["ok"], true);

        let stored = db.get_attempt(USER, attempt.id).await.unwrap().unwrap();
        assert_eq!(stored.accepted_downsell, Some(false));
        assert_eq!(stored.reason_key.as_deref(), Some("other"));

        let sub = db.get_subscription(USER, sub.id).await.unwrap().unwrap();
        assert_eq!(sub.status, SubscriptionStatus::PendingCancellation);
    }

    #[tokio::test]
    async fn downsell_reactivates_subscription() {
        let (state, db) = test_state().await;
        let sub = seed_subscription(&db).await;
        let router = app_routes(state.clone());

        let attempt = state.bootstrap.start_attempt(USER, sub.id).await.unwrap();
        let (token, cookie) = issue_token(&router).await;

        let response = router
            .oneshot(post_json(
                "/cancel/downsell",
                Some(&cookie),
                serde_json::json!({
                    "cancellationId": attempt.id,
                    "csrfToken": token,
                    "reasonKey": "accepted_downsell",
                }),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);

        let stored = db.get_attempt(USER, attempt.id).await.unwrap().unwrap();
        assert_eq!(stored.accepted_downsell, Some(true));

        let sub = db.get_subscription(USER, sub.id).await.unwrap().unwrap();
        assert_eq!(sub.status, SubscriptionStatus::Active);
    }

    #[tokio::test]
    async fn bootstrap_is_stable_and_honors_override() {
        let (state, db) = test_state().await;
        seed_subscription(&db).await;
        let router = app_routes(state);

        let first = body_json(
            router
                .clone()
                .oneshot(
                    Request::builder()
                        .uri("/cancel/bootstrap")
                        .body(Body::empty())
                        .unwrap(),
                )
                .await
                .unwrap(),
        )
        .await;

        let second = body_json(
            router
                .clone()
                .oneshot(
                    Request::builder()
                        .uri("/cancel/bootstrap")
                        .body(Body::empty())
                        .unwrap(),
                )
                .await
                .unwrap(),
        )
        .await;

        assert_eq!(first["cancellationId"], second["cancellationId"]);
        assert_eq!(first["variant"], second["variant"]);

        let forced = body_json(
            router
                .clone()
                .oneshot(
                    Request::builder()
                        .uri("/cancel/bootstrap?variant=B")
                        .body(Body::empty())
                        .unwrap(),
                )
                .await
                .unwrap(),
        )
        .await;
        assert_eq!(forced["variant"], "B");

        // Override persisted for plain revisits
        let later = body_json(
            router
                .oneshot(
                    Request::builder()
                        .uri("/cancel/bootstrap")
                        .body(Body::empty())
                        .unwrap(),
                )
                .await
                .unwrap(),
        )
        .await;
        assert_eq!(later["variant"], "B");
    }

    #[tokio::test]
    async fn bootstrap_without_subscription_is_not_found() {
        let (state, _db) = test_state().await;
        let router = app_routes(state);

        let response = router
            .oneshot(
                Request::builder()
                    .uri("/cancel/bootstrap")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_json(response).await["error"], "subscription_not_found");
    }

    #[tokio::test]
    async fn bootstrap_reset_creates_a_fresh_attempt() {
        let (state, db) = test_state().await;
        seed_subscription(&db).await;
        let router = app_routes(state);

        let first = body_json(
            router
                .clone()
                .oneshot(
                    Request::builder()
                        .uri("/cancel/bootstrap")
                        .body(Body::empty())
                        .unwrap(),
                )
                .await
                .unwrap(),
        )
        .await;

        let reset = body_json(
            router
                .oneshot(
                    Request::builder()
                        .uri("/cancel/bootstrap?reset=1")
                        .body(Body::empty())
                        .unwrap(),
                )
                .await
                .unwrap(),
        )
        .await;

        assert_ne!(first["cancellationId"], reset["cancellationId"]);
    }
}
