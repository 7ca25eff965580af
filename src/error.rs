//! Error taxonomy shared by every component.
//!
//! Components catch collaborator failures (rusqlite, NATS, reqwest) at their
//! boundary and re-raise them as one of these kinds, so callers never match on
//! backend-specific error types.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tracing::error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Bad, expired or revoked session or identity assertion
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// Caller supplied missing or inconsistent input
    #[error("bad request: {0}")]
    BadRequest(String),

    /// No token stored for this provider; the user must authorize it first
    #[error("provider '{provider}' is not connected")]
    NotConnected { provider: String },

    /// Token expired and cannot be refreshed; the user must re-authorize
    #[error("token expired: {0}")]
    TokenExpired(String),

    /// Provider rejected the refresh grant
    #[error("provider rejected credentials: {0}")]
    AuthExpired(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// Network failure or timeout talking to an external provider
    #[error("provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// Credential store failure or timeout
    #[error("credential store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("encryption failed: {0}")]
    Encryption(String),

    /// Wrong key or corrupted ciphertext. Never means "token absent".
    #[error("decryption failed: {0}")]
    Decryption(String),

    #[error("invalid signature: {0}")]
    InvalidSignature(String),

    #[error("stale timestamp: {skew_seconds}s outside tolerance")]
    StaleTimestamp { skew_seconds: i64 },

    /// Well-signed payload that is not a valid event
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    /// Queue did not accept the event; the sender should retry
    #[error("failed to publish event: {0}")]
    QueuePublish(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::Authentication(_)
            | Error::TokenExpired(_)
            | Error::AuthExpired(_)
            | Error::InvalidSignature(_)
            | Error::StaleTimestamp { .. } => StatusCode::UNAUTHORIZED,
            Error::BadRequest(_) => StatusCode::BAD_REQUEST,
            Error::NotConnected { .. } => StatusCode::FORBIDDEN,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::ProviderUnavailable(_) | Error::StoreUnavailable(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            Error::MalformedPayload(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Error::Encryption(_)
            | Error::Decryption(_)
            | Error::QueuePublish(_)
            | Error::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable code for JSON error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Authentication(_) => "AUTHENTICATION_FAILED",
            Error::BadRequest(_) => "BAD_REQUEST",
            Error::NotConnected { .. } => "NOT_CONNECTED",
            Error::TokenExpired(_) => "TOKEN_EXPIRED",
            Error::AuthExpired(_) => "AUTH_EXPIRED",
            Error::NotFound(_) => "NOT_FOUND",
            Error::ProviderUnavailable(_) => "PROVIDER_UNAVAILABLE",
            Error::StoreUnavailable(_) => "STORE_UNAVAILABLE",
            Error::Encryption(_) => "ENCRYPTION_FAILED",
            Error::Decryption(_) => "DECRYPTION_FAILED",
            Error::InvalidSignature(_) => "INVALID_SIGNATURE",
            Error::StaleTimestamp { .. } => "STALE_TIMESTAMP",
            Error::MalformedPayload(_) => "MALFORMED_PAYLOAD",
            Error::QueuePublish(_) => "QUEUE_PUBLISH_FAILED",
            Error::Config(_) => "CONFIGURATION_ERROR",
        }
    }

    /// Whether the caller (or upstream sender) may retry and expect a different outcome.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::ProviderUnavailable(_) | Error::StoreUnavailable(_) | Error::QueuePublish(_)
        )
    }
}

/// JSON error body
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    code: &'static str,
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();

        match &self {
            // Key mismatch or corrupted ciphertext means stored tokens may be lost
            Error::Encryption(_) | Error::Decryption(_) => {
                error!(error = %self, "Credential cipher failure, operator attention required")
            }
            _ if status.is_server_error() => error!(error = %self, "Request failed"),
            _ => {}
        }

        let body = Json(ErrorResponse {
            error: self.to_string(),
            code: self.code(),
        });

        (status, body).into_response()
    }
}
