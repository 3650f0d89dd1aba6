//! Error types for Cancel Flow.

use uuid::Uuid;

/// Top-level error type for the service.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("CSRF error: {0}")]
    Csrf(#[from] CsrfError),

    #[error("Client error: {0}")]
    Client(#[from] ClientError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Session-bootstrap errors.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("No open subscription for user {user_id}")]
    NoSubscription { user_id: String },

    #[error("Subscription {id} not found for caller")]
    SubscriptionNotFound { id: Uuid },
}

/// CSRF token verification errors.
#[derive(Debug, thiserror::Error)]
pub enum CsrfError {
    #[error("CSRF cookie missing")]
    MissingCookie,

    #[error("CSRF cookie is malformed")]
    MalformedCookie,

    #[error("CSRF cookie signature does not verify")]
    BadSignature,

    #[error("Supplied token does not match cookie token")]
    TokenMismatch,

    #[error("Request origin rejected: {origin}")]
    OriginRejected { origin: String },
}

/// Errors from the wizard's HTTP client.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("Request failed: {0}")]
    Http(String),

    #[error("Server rejected request ({status}): {code}")]
    Rejected { status: u16, code: String },

    #[error("Invalid response body: {0}")]
    Decode(String),
}

/// Result type alias for the service.
pub type Result<T> = std::result::Result<T, Error>;
