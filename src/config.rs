//! Configuration types.

use secrecy::SecretString;
use tracing::warn;

use crate::error::ConfigError;

/// Fallback secret for local development only.
const DEV_CSRF_SECRET: &str = "dev-secret-only";

/// Service configuration, read once at startup.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Port the HTTP API binds to.
    pub bind_port: u16,
    /// Path to the libSQL database file.
    pub db_path: String,
    /// Secret keying the CSRF token HMAC.
    pub csrf_secret: SecretString,
    /// The single user id standing in for real authentication.
    pub session_user_id: String,
    /// Seed a demo subscription for the session user when none exists.
    pub seed_demo: bool,
}

impl AppConfig {
    /// Build the configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let bind_port = match std::env::var("CANCEL_FLOW_PORT") {
            Ok(raw) => raw.parse().map_err(|_| ConfigError::InvalidValue {
                key: "CANCEL_FLOW_PORT".to_string(),
                message: format!("not a valid port number: {raw}"),
            })?,
            Err(_) => 8080,
        };

        let db_path = std::env::var("CANCEL_FLOW_DB_PATH")
            .unwrap_or_else(|_| "./data/cancel-flow.db".to_string());

        let csrf_secret = match std::env::var("CSRF_SECRET") {
            Ok(secret) if !secret.is_empty() => SecretString::from(secret),
            _ => {
                warn!("CSRF_SECRET not set, using the development fallback");
                SecretString::from(DEV_CSRF_SECRET)
            }
        };

        let session_user_id =
            std::env::var("MOCK_USER_ID").unwrap_or_else(|_| "local-user".to_string());

        let seed_demo = std::env::var("CANCEL_FLOW_SEED")
            .map(|v| v != "0")
            .unwrap_or(true);

        Ok(Self {
            bind_port,
            db_path,
            csrf_secret,
            session_user_id,
            seed_demo,
        })
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind_port: 8080,
            db_path: ":memory:".to_string(),
            csrf_secret: SecretString::from(DEV_CSRF_SECRET),
            session_user_id: "local-user".to_string(),
            seed_demo: true,
        }
    }
}
