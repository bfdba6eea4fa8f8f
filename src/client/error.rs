use serde::Serialize;
use std::fmt;
use thiserror::Error;

use crate::models::Feed;

/// The backend call a failure belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Endpoint {
    Feed(Feed),
    RefreshData,
}

impl Endpoint {
    pub fn path(&self) -> &'static str {
        match self {
            Endpoint::Feed(feed) => feed.path(),
            Endpoint::RefreshData => "/refresh_data",
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Feed(feed) => write!(f, "{feed}"),
            Endpoint::RefreshData => f.write_str("refresh_data"),
        }
    }
}

/// A failed backend call. Never escapes the sync layer as a panic; the
/// scheduler records it and keeps the previous payload.
#[derive(Error, Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FetchError {
    #[error("Network error calling {endpoint}: {message}")]
    Network { endpoint: Endpoint, message: String },
    #[error("Request to {endpoint} timed out after {timeout_ms}ms")]
    Timeout { endpoint: Endpoint, timeout_ms: u64 },
    #[error("{endpoint} returned non-success status: {status}")]
    Status { endpoint: Endpoint, status: u16 },
    #[error("Failed to decode {endpoint} response: {message}")]
    Decode { endpoint: Endpoint, message: String },
    #[error("HTTP client could not be built: {message}")]
    Client { message: String },
}

impl FetchError {
    pub fn endpoint(&self) -> Option<Endpoint> {
        match self {
            FetchError::Network { endpoint, .. }
            | FetchError::Timeout { endpoint, .. }
            | FetchError::Status { endpoint, .. }
            | FetchError::Decode { endpoint, .. } => Some(*endpoint),
            FetchError::Client { .. } => None,
        }
    }

    /// Transport-level failures, as opposed to a reachable backend sending
    /// an unusable body.
    pub fn is_network(&self) -> bool {
        matches!(
            self,
            FetchError::Network { .. } | FetchError::Timeout { .. } | FetchError::Status { .. }
        )
    }

    pub(crate) fn from_reqwest(endpoint: Endpoint, timeout_ms: u64, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            FetchError::Timeout {
                endpoint,
                timeout_ms,
            }
        } else if err.is_decode() {
            FetchError::Decode {
                endpoint,
                message: err.to_string(),
            }
        } else {
            FetchError::Network {
                endpoint,
                message: err.to_string(),
            }
        }
    }
}
