//! Error taxonomy for discovery and review.
//!
//! Fetch errors are recovered inside a run (counted in the run's error log).
//! Validation, state, and lookup errors are surfaced to the caller verbatim
//! and map onto HTTP status codes in [`crate::server`].

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DiscoveryError {
    /// Network or parse failure on a single source.
    #[error("fetch failed for {source_name}: {message}")]
    Fetch {
        source_name: String,
        message: String,
    },

    /// Malformed input from an admin or caller.
    #[error("validation failed: {0}")]
    Validation(String),

    /// The grant has already been decided.
    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl DiscoveryError {
    pub fn fetch(source_name: impl Into<String>, err: impl std::fmt::Display) -> Self {
        DiscoveryError::Fetch {
            source_name: source_name.into(),
            message: err.to_string(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        DiscoveryError::Validation(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        DiscoveryError::NotFound(message.into())
    }

    pub fn invalid_state(message: impl Into<String>) -> Self {
        DiscoveryError::InvalidState(message.into())
    }

    /// Machine-readable code used in HTTP error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            DiscoveryError::Fetch { .. } => "fetch_error",
            DiscoveryError::Validation(_) => "validation_error",
            DiscoveryError::InvalidState(_) => "invalid_state",
            DiscoveryError::NotFound(_) => "not_found",
            DiscoveryError::Unauthorized(_) => "unauthorized",
            DiscoveryError::Database(_) | DiscoveryError::Internal(_) => "internal",
        }
    }
}

pub type Result<T, E = DiscoveryError> = std::result::Result<T, E>;
