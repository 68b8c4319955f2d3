// Sync client error types
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors produced while loading or streaming permissions.
///
/// Payloads are strings so a single failure can be handed to every caller
/// sharing a de-duplicated fetch.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SyncError {
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Missing session token")]
    MissingToken,

    #[error("Transport error: {0}")]
    Transport(String),
}

impl SyncError {
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        SyncError::Api {
            status,
            message: message.into(),
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        SyncError::Transport(message.into())
    }

    /// Get error code for log correlation
    pub fn error_code(&self) -> &'static str {
        match self {
            SyncError::Http(_) => "HTTP_ERROR",
            SyncError::Api { .. } => "API_ERROR",
            SyncError::Decode(_) => "DECODE_ERROR",
            SyncError::InvalidUrl(_) => "INVALID_URL",
            SyncError::MissingToken => "MISSING_TOKEN",
            SyncError::Transport(_) => "TRANSPORT_ERROR",
        }
    }
}

/// Error-shaped body returned by the backend: `{ "error": true, "message": "..." }`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorBody {
    #[serde(default)]
    pub error: bool,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub code: Option<String>,
}

impl ErrorBody {
    pub fn into_error(self, status: u16) -> SyncError {
        let message = self
            .message
            .or(self.code)
            .unwrap_or_else(|| "request failed".to_string());
        SyncError::api(status, message)
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            SyncError::Decode(err.to_string())
        } else {
            SyncError::Http(err.to_string())
        }
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::Decode(err.to_string())
    }
}

impl From<url::ParseError> for SyncError {
    fn from(err: url::ParseError) -> Self {
        SyncError::InvalidUrl(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for SyncError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        SyncError::Transport(err.to_string())
    }
}
