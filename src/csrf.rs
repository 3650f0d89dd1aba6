//! Double-submit CSRF tokens — an HMAC-signed cookie plus a body token.
//!
//! `issue()` mints a random token and a `token.mac` cookie value; writers
//! must echo the token in the request body while the browser replays the
//! HttpOnly cookie. Verification recomputes the MAC over the cookie's token
//! half in constant time, then applies a loopback-or-referer origin policy.
//! Single-secret-keyed: good enough for an internal form, not a general
//! multi-tenant scheme.

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use hmac::{Hmac, Mac};
use rand::RngCore;
use rand::rngs::OsRng;
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;

use crate::error::CsrfError;

/// Name of the cookie carrying the signed token.
pub const CSRF_COOKIE: &str = "csrfToken";

/// Random bytes per token before encoding.
const TOKEN_BYTES: usize = 24;

type HmacSha256 = Hmac<Sha256>;

/// A freshly minted token pair.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    /// Value handed to the caller for embedding in write requests.
    pub token: String,
    /// `token.mac` value for the HttpOnly cookie.
    pub cookie_value: String,
}

/// Issues and verifies CSRF tokens with a single server-held secret.
pub struct CsrfService {
    secret: SecretString,
}

impl CsrfService {
    pub fn new(secret: SecretString) -> Self {
        Self { secret }
    }

    /// Mint a new token and its cookie value.
    pub fn issue(&self) -> IssuedToken {
        let mut buf = [0u8; TOKEN_BYTES];
        OsRng.fill_bytes(&mut buf);
        let token = URL_SAFE_NO_PAD.encode(buf);
        let cookie_value = format!("{token}.{}", self.mac(&token));
        IssuedToken {
            token,
            cookie_value,
        }
    }

    /// Verify a body-supplied token against the cookie and origin headers.
    ///
    /// Accepts only when the cookie MAC verifies, the supplied token equals
    /// the cookie token, and the origin passes [`check_origin`].
    pub fn verify(
        &self,
        cookie: Option<&str>,
        supplied: &str,
        origin: Option<&str>,
        referer: Option<&str>,
    ) -> Result<(), CsrfError> {
        let cookie = cookie
            .filter(|c| !c.is_empty())
            .ok_or(CsrfError::MissingCookie)?;
        if supplied.is_empty() {
            return Err(CsrfError::TokenMismatch);
        }

        let (token, tag) = cookie.split_once('.').ok_or(CsrfError::MalformedCookie)?;
        if token.is_empty() || tag.is_empty() {
            return Err(CsrfError::MalformedCookie);
        }
        let tag = URL_SAFE_NO_PAD
            .decode(tag)
            .map_err(|_| CsrfError::MalformedCookie)?;

        // verify_slice is constant-time over the tag bytes.
        let mut mac = HmacSha256::new_from_slice(self.secret.expose_secret().as_bytes())
            .expect("HMAC can take key of any size");
        mac.update(token.as_bytes());
        mac.verify_slice(&tag).map_err(|_| CsrfError::BadSignature)?;

        if supplied != token {
            return Err(CsrfError::TokenMismatch);
        }

        check_origin(origin.unwrap_or(""), referer.unwrap_or(""))
    }

    fn mac(&self, token: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(self.secret.expose_secret().as_bytes())
            .expect("HMAC can take key of any size");
        mac.update(token.as_bytes());
        URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes())
    }
}

/// Origin policy: empty or loopback origins pass outright; anything else
/// passes only when the referer is prefixed by the origin.
fn check_origin(origin: &str, referer: &str) -> Result<(), CsrfError> {
    let loopback = origin.is_empty()
        || origin.starts_with("http://localhost")
        || origin.starts_with("http://127.0.0.1")
        || origin.starts_with("https://localhost");

    if loopback || (!referer.is_empty() && !origin.is_empty() && referer.starts_with(origin)) {
        Ok(())
    } else {
        Err(CsrfError::OriginRejected {
            origin: origin.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> CsrfService {
        CsrfService::new(SecretString::from("test-secret"))
    }

    #[test]
    fn issue_then_verify_roundtrip() {
        let svc = service();
        let issued = svc.issue();
        svc.verify(Some(&issued.cookie_value), &issued.token, None, None)
            .unwrap();
    }

    #[test]
    fn tokens_are_unique() {
        let svc = service();
        let a = svc.issue();
        let b = svc.issue();
        assert_ne!(a.token, b.token);
    }

    #[test]
    fn missing_cookie_rejected() {
        let svc = service();
        let issued = svc.issue();
        let err = svc.verify(None, &issued.token, None, None).unwrap_err();
        assert!(matches!(err, CsrfError::MissingCookie));

        let err = svc.verify(Some(""), &issued.token, None, None).unwrap_err();
        assert!(matches!(err, CsrfError::MissingCookie));
    }

    #[test]
    fn malformed_cookie_rejected() {
        let svc = service();
        let issued = svc.issue();
        for cookie in ["no-dot-here", ".tag-only", "token-only."] {
            let err = svc
                .verify(Some(cookie), &issued.token, None, None)
                .unwrap_err();
            assert!(matches!(err, CsrfError::MalformedCookie), "{cookie}");
        }
    }

    #[test]
    fn tampered_mac_rejected() {
        let svc = service();
        let issued = svc.issue();
        let tampered = format!("{}.{}", issued.token, URL_SAFE_NO_PAD.encode(b"forged-mac-32-bytes-of-nonsense!"));
        let err = svc
            .verify(Some(&tampered), &issued.token, None, None)
            .unwrap_err();
        assert!(matches!(err, CsrfError::BadSignature));
    }

    #[test]
    fn cookie_signed_by_other_secret_rejected() {
        let svc = service();
        let other = CsrfService::new(SecretString::from("another-secret"));
        let issued = other.issue();
        let err = svc
            .verify(Some(&issued.cookie_value), &issued.token, None, None)
            .unwrap_err();
        assert!(matches!(err, CsrfError::BadSignature));
    }

    #[test]
    fn supplied_token_must_match_cookie_token() {
        let svc = service();
        let issued = svc.issue();
        let other = svc.issue();
        let err = svc
            .verify(Some(&issued.cookie_value), &other.token, None, None)
            .unwrap_err();
        assert!(matches!(err, CsrfError::TokenMismatch));

        let err = svc
            .verify(Some(&issued.cookie_value), "", None, None)
            .unwrap_err();
        assert!(matches!(err, CsrfError::TokenMismatch));
    }

    #[test]
    fn loopback_origins_accepted() {
        let svc = service();
        let issued = svc.issue();
        for origin in [
            "http://localhost:3000",
            "http://127.0.0.1:8080",
            "https://localhost",
        ] {
            svc.verify(Some(&issued.cookie_value), &issued.token, Some(origin), None)
                .unwrap();
        }
    }

    #[test]
    fn foreign_origin_without_matching_referer_rejected() {
        let svc = service();
        let issued = svc.issue();
        let err = svc
            .verify(
                Some(&issued.cookie_value),
                &issued.token,
                Some("https://evil.example"),
                None,
            )
            .unwrap_err();
        assert!(matches!(err, CsrfError::OriginRejected { .. }));

        let err = svc
            .verify(
                Some(&issued.cookie_value),
                &issued.token,
                Some("https://evil.example"),
                Some("https://app.example/cancel"),
            )
            .unwrap_err();
        assert!(matches!(err, CsrfError::OriginRejected { .. }));
    }

    #[test]
    fn foreign_origin_with_matching_referer_accepted() {
        let svc = service();
        let issued = svc.issue();
        svc.verify(
            Some(&issued.cookie_value),
            &issued.token,
            Some("https://app.example"),
            Some("https://app.example/cancel"),
        )
        .unwrap();
    }
}
