//! Error types for coordinator operations.

use serde::Deserialize;
use thiserror::Error;

/// Structured body of a 422 on task abandonment.
#[derive(Debug, Clone, Deserialize)]
pub struct AbandonTaskDetails {
    /// Short error summary.
    #[serde(default)]
    pub error: String,
    /// Per-field validation messages.
    #[serde(default)]
    pub details: Vec<String>,
}

/// Errors produced by coordinator operations.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The request never produced an HTTP response.
    #[error("transport error during {operation}: {source}")]
    Transport {
        /// Operation name for diagnostics.
        operation: &'static str,
        /// Underlying client error.
        #[source]
        source: reqwest::Error,
    },

    /// The coordinator answered with a status >= 400.
    #[error("coordinator returned {status_code} during {operation}: {message}")]
    Status {
        /// Operation name for diagnostics.
        operation: &'static str,
        /// HTTP status code.
        status_code: u16,
        /// Canonical reason or coordinator-supplied summary.
        message: String,
        /// Raw response body for diagnostics.
        body: String,
    },

    /// A 422 on task abandonment with a structured body.
    #[error("task abandonment rejected: {}", .0.error)]
    Abandoned(AbandonTaskDetails),

    /// A 2xx response whose body could not be interpreted.
    #[error("bad response during {operation}: {reason}")]
    BadResponse {
        /// Operation name for diagnostics.
        operation: &'static str,
        /// What was wrong with the body.
        reason: String,
    },
}

impl ApiError {
    /// HTTP status code when the coordinator produced one.
    #[must_use]
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Status { status_code, .. } => Some(*status_code),
            Self::Abandoned(_) => Some(422),
            Self::Transport { .. } | Self::BadResponse { .. } => None,
        }
    }

    /// Whether this is a client error (4xx) that will not succeed on retry.
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        self.status_code().is_some_and(|code| (400..500).contains(&code))
    }
}

/// Convenience alias used throughout the API surface.
pub type ApiResult<T> = Result<T, ApiError>;
