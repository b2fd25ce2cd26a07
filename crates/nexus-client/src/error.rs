//! Error types for the nexus client

/// Result type for nexus client operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for nexus client operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Client was constructed with missing or unusable parameters
    #[error("invalid nexus client configuration: {0}")]
    InvalidConfig(String),

    /// Transport-level failure talking to the nexus server
    #[error("nexus request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Nexus answered with a non-success status
    #[error("nexus server returned {status}: {body}")]
    Api {
        /// HTTP status code
        status: u16,
        /// Response body, if any
        body: String,
    },

    /// Request body could not be encoded
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Whether a retry of the same request could succeed
    ///
    /// Server-side failures and transport errors are transient; a 4xx means
    /// the request itself (or the service's credentials) is wrong.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Http(_) => true,
            Error::Api { status, .. } => *status >= 500 || *status == 429,
            Error::InvalidConfig(_) | Error::Serialization(_) => false,
        }
    }
}
