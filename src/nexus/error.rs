//! Typed errors returned by the Nexus service

/// Errors from Nexus API calls and downloads
#[derive(Debug, Clone, thiserror::Error)]
pub enum NexusError {
    #[error("Network error: {0}")]
    Network(String),
    /// The server answered with an HTML page instead of the file
    #[error("Download is an HTML page, not a file: {0}")]
    NotAFile(String),
    #[error("Authentication failed: {0}")]
    Auth(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Rate limited by Nexus Mods")]
    RateLimited,
    #[error("Download requires Nexus Mods Premium membership")]
    Premium,
    #[error("Invalid nxm link: {0}")]
    InvalidUrl(String),
    #[error("{0}")]
    Other(String),
}

impl NexusError {
    /// Whether this is worth a bug report
    pub fn is_reportable(&self) -> bool {
        matches!(self, NexusError::Other(_))
    }

    /// Recoverable without telling the user
    pub fn is_benign(&self) -> bool {
        matches!(self, NexusError::NotAFile(_))
    }

    /// Map an HTTP status to the matching variant
    pub fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        match status.as_u16() {
            401 => NexusError::Auth(body.to_string()),
            403 => NexusError::Premium,
            404 => NexusError::NotFound(body.to_string()),
            429 => NexusError::RateLimited,
            _ => NexusError::Other(format!("Unexpected status {}: {}", status, body)),
        }
    }
}

impl From<reqwest::Error> for NexusError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            NexusError::Other(format!("Failed to parse response: {}", err))
        } else if let Some(status) = err.status() {
            NexusError::from_status(status, &err.to_string())
        } else {
            NexusError::Network(err.to_string())
        }
    }
}

impl From<std::io::Error> for NexusError {
    fn from(err: std::io::Error) -> Self {
        NexusError::Other(format!("I/O error: {}", err))
    }
}
