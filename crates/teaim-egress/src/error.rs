//! Fetch error types

use thiserror::Error;

/// Terminal failure of a guarded fetch
#[derive(Debug, Error)]
pub enum FetchError {
    /// No response arrived
    #[error("Network error")]
    Network {
        #[source]
        source: reqwest::Error,
        request_id: Option<String>,
    },

    /// 401 or 403; the unauthorized handler has already run
    #[error("unauthorized")]
    Unauthorized { status: u16 },

    /// Any other non-2xx response
    #[error("{message}")]
    Http {
        status: u16,
        message: String,
        request_id: Option<String>,
    },

    /// A 2xx body could not be read or parsed
    #[error("Failed to decode response body: {0}")]
    Decode(#[source] reqwest::Error),

    /// Client or request could not be set up
    #[error("Configuration error: {0}")]
    Config(String),
}

impl FetchError {
    /// HTTP status, if a response was received
    pub fn status(&self) -> Option<u16> {
        match self {
            FetchError::Unauthorized { status } | FetchError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Request id attached to the failure, if any
    pub fn request_id(&self) -> Option<&str> {
        match self {
            FetchError::Network { request_id, .. } | FetchError::Http { request_id, .. } => {
                request_id.as_deref()
            }
            _ => None,
        }
    }

    /// Whether callers should retry: never for auth failures
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, FetchError::Unauthorized { .. })
    }
}

impl From<FetchError> for teaim_core::Error {
    fn from(err: FetchError) -> Self {
        match err {
            FetchError::Config(msg) => teaim_core::Error::Config(msg),
            other => teaim_core::Error::Internal(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, FetchError>;
