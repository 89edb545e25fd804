//! Error types for the intel map transport
//!
//! This module defines the transport-level and payload-level errors the
//! fetch worker classifies when talking to the map service.

use thiserror::Error;

/// Errors that can occur during HTTP fetching operations
#[derive(Error, Debug)]
pub enum FetchError {
    /// HTTP request error
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Server error with status code
    #[error("Server error: {0}")]
    ServerError(u16),

    /// Request timeout
    #[error("Request timeout")]
    Timeout,

    /// Session cookie rejected or dashboard version not found
    #[error("Session expired or cookie invalid")]
    SessionExpired,

    /// Response body could not be decoded
    #[error("Decoding error: {0}")]
    Decode(String),

    /// Invalid URL
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
}

impl FetchError {
    /// Whether retrying the same request could plausibly succeed
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Http(_) | Self::Timeout => true,
            Self::ServerError(status) => matches!(status, 429 | 500 | 502 | 503 | 504),
            Self::Decode(_) => true,
            Self::SessionExpired | Self::InvalidUrl(_) => false,
        }
    }
}

/// Errors for a response that arrived but carries no usable map
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PayloadError {
    /// Body was empty or an empty JSON object
    #[error("Empty response body")]
    Empty,

    /// Body was not valid JSON
    #[error("Unparsable response body: {0}")]
    Unparsable(String),

    /// JSON did not contain `result.map`
    #[error("Response is missing result map")]
    MissingMap,
}

/// Result of one `getEntities` call as seen by the worker
#[derive(Error, Debug)]
pub enum EntitiesError {
    /// Network or HTTP-level failure; retried by the worker up to its transport cap
    #[error(transparent)]
    Transport(#[from] FetchError),

    /// Response arrived but was empty or unparsable; the whole tile set is re-sent
    #[error(transparent)]
    Payload(#[from] PayloadError),
}
