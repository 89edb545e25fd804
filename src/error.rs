//! Unified error handling for the intelwatcher crate
//!
//! Domain errors (`FetchError`, `PayloadError`, storage failures) are folded into a single [`Error`] enum so they can cross module
//! boundaries, while [`ErrorCategory`] drives how the scheduler reacts.

use std::io;
use thiserror::Error;

pub use crate::utils::error::{EntitiesError, FetchError, PayloadError};

/// Classification of errors for handling strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Network-related errors (HTTP, timeout, session)
    Network,
    /// Response decoding errors
    Parsing,
    /// Storage and I/O errors
    Storage,
    /// Other/unknown errors
    Other,
}

impl ErrorCategory {
    /// Short label used in log fields and metric labels
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::Parsing => "parsing",
            Self::Storage => "storage",
            Self::Other => "other",
        }
    }
}

/// Unified error type for the intelwatcher crate
#[derive(Error, Debug)]
pub enum Error {
    /// Transport errors
    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    /// Payload decoding errors
    #[error("Payload error: {0}")]
    Payload(#[from] PayloadError),

    /// Database errors
    #[error("Database error: {0}")]
    Database(#[source] rusqlite::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create a generic error with context
    pub fn other(context: impl Into<String>) -> Self {
        Self::Other(context.into())
    }

    /// Check if this error is recoverable (can be retried)
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Fetch(e) => e.is_recoverable(),
            Self::Payload(_) => true,
            Self::Database(_) => false,
            Self::Io(_) => true,
            Self::Other(_) => false,
        }
    }

    /// Get the error category for handling strategies
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Fetch(_) => ErrorCategory::Network,
            Self::Payload(_) => ErrorCategory::Parsing,
            Self::Database(_) | Self::Io(_) => ErrorCategory::Storage,
            Self::Other(_) => ErrorCategory::Other,
        }
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Self::Database(err)
    }
}

impl From<EntitiesError> for Error {
    fn from(err: EntitiesError) -> Self {
        match err {
            EntitiesError::Transport(e) => Self::Fetch(e),
            EntitiesError::Payload(e) => Self::Payload(e),
        }
    }
}

/// Result type alias using the unified Error type
pub type Result<T> = std::result::Result<T, Error>;
