use thiserror::Error;

/// Failure of a single call to a remote NuGet resource.
///
/// Payloads are strings so the error can be cloned and handed to every
/// caller coalesced onto the same fetch.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Unexpected status {status} from {url}")]
    Status { url: String, status: u16 },

    #[error("Package not found: {0}")]
    NotFound(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Service index has no {0} resource")]
    MissingResource(String),

    #[error("Background fetch failed: {0}")]
    TaskFailed(String),
}

impl From<reqwest::Error> for RegistryError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            RegistryError::Timeout(err.to_string())
        } else if err.is_decode() {
            RegistryError::InvalidResponse(err.to_string())
        } else {
            RegistryError::Network(err.to_string())
        }
    }
}

impl From<tokio::task::JoinError> for RegistryError {
    fn from(err: tokio::task::JoinError) -> Self {
        RegistryError::TaskFailed(err.to_string())
    }
}
