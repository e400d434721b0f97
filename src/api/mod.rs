/**
 * API Module
 *
 * Thin typed client over the FrameNote REST backend. `client` holds the
 * single HTTP adapter every other module goes through; the remaining files
 * add endpoint groups as `impl ApiClient` blocks.
 */
pub mod auth;
pub mod client;
pub mod community;
pub mod models;
pub mod payment;
pub mod tasks;

pub use client::{resolve_url, ApiBody, ApiClient, RequestOptions};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::storage::StoreError;

/// Error taxonomy of the HTTP adapter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Error)]
pub enum ApiError {
    /// Network unreachable, connection reset, body read failure
    #[error("network error: {0}")]
    Transport(String),
    #[error("request timed out: {0}")]
    Timeout(String),
    /// Non-2xx response; `message` is the server text verbatim
    #[error("{message}")]
    Status { status: u16, message: String },
    #[error("failed to decode response: {0}")]
    Decode(String),
    /// Client-side precondition failed; nothing was sent
    #[error("{0}")]
    InvalidInput(String),
    #[error("{0}")]
    Storage(String),
}

impl ApiError {
    /// Transient failure (network, timeout, 5xx, 429) rather than a
    /// rejection of the request itself
    pub fn is_recoverable(&self) -> bool {
        match self {
            ApiError::Transport(_) | ApiError::Timeout(_) | ApiError::Decode(_) => true,
            ApiError::Status { status, .. } => *status >= 500 || *status == 429,
            ApiError::InvalidInput(_) | ApiError::Storage(_) => false,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ApiError::Timeout(e.to_string())
        } else if e.is_decode() {
            ApiError::Decode(e.to_string())
        } else {
            ApiError::Transport(e.to_string())
        }
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(e: serde_json::Error) -> Self {
        ApiError::Decode(e.to_string())
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        ApiError::Storage(e.to_string())
    }
}

/// Reject empty identifiers before anything goes on the wire
pub(crate) fn require_id<'a>(name: &str, value: &'a str) -> Result<&'a str, ApiError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ApiError::InvalidInput(format!("{} must not be empty", name)));
    }
    Ok(trimmed)
}
