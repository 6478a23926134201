//! Error types for TGS API calls.

use thiserror::Error;

/// Result type for TGS API calls.
pub type TgsResult<T> = Result<T, TgsError>;

/// Errors returned by [`crate::TgsClient`].
#[derive(Debug, Error)]
pub enum TgsError {
    /// Settings could not be turned into a usable client.
    #[error("invalid client settings: {0}")]
    InvalidSettings(String),

    /// Transport level failure (connect, timeout, TLS).
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// The server rejected the login credentials.
    #[error("login rejected with status {status}")]
    LoginRejected { status: u16 },

    /// The server answered with a non-success status.
    #[error("API error {status} on {method} {path}: {message}")]
    Api {
        method: &'static str,
        path: String,
        status: u16,
        message: String,
    },

    /// The response body did not match the expected shape.
    #[error("failed to decode response from {path}: {source}")]
    Decode {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

impl TgsError {
    /// HTTP status of the failed call, if the server answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::LoginRejected { status } | Self::Api { status, .. } => Some(*status),
            Self::Network(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}
