//! Error taxonomy for the command-dispatch core.
//!
//! Every failure mode that can cross the core's boundary is represented here.
//! Sanitizer and settings errors surface before any external call; external
//! failures (timeouts, auth challenges, nonzero exits, non-2xx statuses) are
//! converted into `CommandResult` data and never propagate as errors to the
//! protocol layer.

use std::time::Duration;

/// Errors produced by the dispatch and authentication-resolution layer.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// Malformed or unsafe command input. Never executed.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Missing or invalid settings required for the requested mode.
    /// Fails before any external call.
    #[error("configuration error: {0}")]
    Config(String),

    /// External call exceeded its deadline. The underlying work has been
    /// forcibly cancelled; partial output is discarded.
    #[error("timeout after {0:?}")]
    Timeout(Duration),

    /// Credential or token missing or rejected. Carries remediation
    /// instructions rather than a bare failure, since the caller's fix
    /// (re-authenticate) differs from a generic retry.
    #[error("authentication required: {instructions}")]
    AuthRequired { instructions: String },

    /// Nonzero exit code, non-2xx HTTP status, or transport failure.
    /// Carries the raw diagnostic payload unmodified.
    #[error("external call failed: {0}")]
    External(String),
}

impl ServiceError {
    /// Shorthand for an auth challenge with remediation text.
    pub fn auth_required(instructions: impl Into<String>) -> Self {
        Self::AuthRequired {
            instructions: instructions.into(),
        }
    }
}
