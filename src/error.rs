//! Error taxonomy and the uniform envelope returned to callers.

use serde::Serialize;
use tracing::error;

use crate::storage::StorageError;

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, LogStackError>;

/// Message shown to callers for errors whose detail must not leak.
pub const GENERIC_ERROR_MESSAGE: &str = "Something went wrong";

/// Errors raised by the core operations.
#[derive(Debug, thiserror::Error)]
pub enum LogStackError {
    /// Bad request arguments. Raised before any storage call.
    #[error("{0}")]
    Validation(String),

    /// The event slot was already taken by an earlier write.
    #[error("event slot already written: log={log}, id={id}, sequence={sequence}")]
    WriteConflict {
        log: String,
        id: String,
        sequence: String,
    },

    /// A continuation token could not be decoded or does not fit the scan.
    #[error("invalid cursor: {0}")]
    InvalidCursor(String),

    /// Infrastructure failure, propagated unchanged. Callers own retries.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("internal error: {0}")]
    Unknown(String),
}

impl LogStackError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION",
            Self::WriteConflict { .. } => "WRITE_CONFLICT",
            Self::InvalidCursor(_) => "INVALID_CURSOR",
            Self::Storage(_) => "STORAGE_FAULT",
            Self::Unknown(_) => "UNKNOWN",
        }
    }

    /// Convert to the caller-facing envelope, logging the full error.
    pub fn to_envelope(&self) -> ErrorEnvelope {
        error!(code = self.code(), error = %self, "Request failed");

        let message = match self {
            Self::Validation(_) | Self::WriteConflict { .. } | Self::InvalidCursor(_) => {
                self.to_string()
            }
            Self::Storage(_) => "storage unavailable".to_string(),
            Self::Unknown(_) => GENERIC_ERROR_MESSAGE.to_string(),
        };

        ErrorEnvelope {
            errors: vec![ErrorBody {
                code: self.code(),
                message,
            }],
        }
    }
}

/// Uniform error envelope for every externally visible failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorEnvelope {
    pub errors: Vec<ErrorBody>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorBody {
    pub code: &'static str,
    pub message: String,
}
