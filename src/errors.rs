//! Typed error hierarchy for the release gate.
//!
//! Storage and I/O code returns `anyhow::Result` with context attached; the
//! gate wraps those failures in `GateError` so the HTTP layer and the CLI can
//! tell "not found" apart from real breakage.

use thiserror::Error;

/// Errors from release gate operations.
#[derive(Debug, Error)]
pub enum GateError {
    #[error("Sign-off token {token} not found")]
    SignoffNotFound { token: String },

    #[error("Release {id} not found")]
    ReleaseNotFound { id: i64 },

    #[error("Stream {id} not found")]
    StreamNotFound { id: i64 },

    #[error("Invalid stream: {0}")]
    InvalidStream(String),

    #[error("Failed to dispatch release: {0}")]
    Dispatch(#[source] anyhow::Error),

    #[error("Database error: {0}")]
    Database(#[source] anyhow::Error),
}

impl GateError {
    /// True for the variants the presentation boundary renders as a 404.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::SignoffNotFound { .. } | Self::ReleaseNotFound { .. } | Self::StreamNotFound { .. }
        )
    }
}
