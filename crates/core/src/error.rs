//! # Session Errors
//!
//! Failures that end a session. Everything that can be absorbed into a
//! degraded unit result stays an `anyhow::Error` inside the unit and never
//! reaches this type.

use thiserror::Error;

/// A session-fatal (or session-ending) error
#[derive(Debug, Error)]
pub enum CopilotError {
    /// Required input missing or malformed
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The session was cancelled by the client. Not reported as an error event.
    #[error("session cancelled")]
    Cancelled,

    /// The atomic classification step failed or returned an unusable shape
    #[error("classification failed: {0}")]
    Classification(String),

    /// A declarative table could not be loaded
    #[error("failed to load {table} table: {reason}")]
    Table { table: &'static str, reason: String },

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl CopilotError {
    /// Whether the failure was caused by the caller's input
    pub fn is_client_error(&self) -> bool {
        matches!(self, CopilotError::InvalidInput(_))
    }
}

pub type CopilotResult<T> = Result<T, CopilotError>;
