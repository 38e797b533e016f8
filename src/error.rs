// Error handling module
// Defines the benchmark error taxonomy and HTTP response conversion

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Errors that can occur while running a benchmark.
///
/// `Validation`, `CredentialNotFound` and `InvalidCredential` fail a whole
/// request before any network activity. The provider variants are scoped to
/// a single model and normally end up inside that model's outcome.
#[derive(Error, Debug)]
pub enum BenchError {
    /// Request validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// No credential stored for the provider
    #[error("API key not found for provider: {0}")]
    CredentialNotFound(String),

    /// Credential present but empty, a placeholder, or the wrong shape
    #[error("Invalid API key: {0}")]
    InvalidCredential(String),

    /// Non-success status from the gateway
    #[error("HTTP error! status: {status}, message: {message}")]
    Upstream { status: u16, message: String },

    /// Connection, timeout or body read failure
    #[error("Request failed: {0}")]
    Transport(String),

    /// Response body that is not a valid completion payload
    #[error("Failed to decode response: {0}")]
    Decode(String),

    /// Stream frame that could not be decoded
    #[error("Malformed stream frame: {0}")]
    MalformedFrame(String),

    /// Provider sent an error frame mid-stream
    #[error("Stream aborted by provider: {0}")]
    StreamAborted(String),

    /// Result store failure
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl BenchError {
    /// Short machine-readable kind, used in HTTP bodies and logs
    pub fn kind(&self) -> &'static str {
        match self {
            BenchError::Validation(_) => "validation_error",
            BenchError::CredentialNotFound(_) => "credential_not_found",
            BenchError::InvalidCredential(_) => "invalid_credential",
            BenchError::Upstream { .. } => "upstream_error",
            BenchError::Transport(_) => "transport_error",
            BenchError::Decode(_) => "decode_error",
            BenchError::MalformedFrame(_) => "malformed_frame",
            BenchError::StreamAborted(_) => "stream_aborted",
            BenchError::Persistence(_) => "persistence_error",
            BenchError::Internal(_) => "internal_error",
        }
    }

    /// Whether this error fails the whole request rather than one model
    pub fn is_request_level(&self) -> bool {
        matches!(
            self,
            BenchError::Validation(_)
                | BenchError::CredentialNotFound(_)
                | BenchError::InvalidCredential(_)
        )
    }
}

impl IntoResponse for BenchError {
    fn into_response(self) -> Response {
        let kind = self.kind();
        let (status, message) = match self {
            BenchError::Validation(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            BenchError::InvalidCredential(_) => (StatusCode::UNAUTHORIZED, self.to_string()),
            BenchError::CredentialNotFound(_) => {
                (StatusCode::PRECONDITION_FAILED, self.to_string())
            }
            BenchError::Upstream { .. }
            | BenchError::Transport(_)
            | BenchError::Decode(_)
            | BenchError::MalformedFrame(_)
            | BenchError::StreamAborted(_) => (StatusCode::BAD_GATEWAY, self.to_string()),
            BenchError::Persistence(_) => {
                tracing::error!("Persistence error: {}", self);
                (StatusCode::INTERNAL_SERVER_ERROR, self.to_string())
            }
            BenchError::Internal(err) => {
                tracing::error!("Internal error: {:?}", err);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };

        let body = Json(json!({
            "success": false,
            "error": message,
            "type": kind,
        }));

        (status, body).into_response()
    }
}

/// Result type alias for benchmark operations
pub type Result<T> = std::result::Result<T, BenchError>;
