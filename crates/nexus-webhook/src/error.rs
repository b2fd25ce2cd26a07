//! Error types for the nexus solver

/// Result type for solver operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for solver operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Solver config in the Issuer could not be decoded
    #[error("error decoding solver config: {0}")]
    ConfigDecode(#[source] serde_json::Error),

    /// Solver config decoded but is incomplete
    #[error("invalid solver config: {0}")]
    InvalidConfig(String),

    /// Secret reference has no name
    #[error("secret name not provided")]
    MissingSecretName,

    /// Reading the secret from the Kubernetes API failed
    #[error("failed to read secret {namespace}/{name}: {source}")]
    SecretRead {
        /// Namespace searched
        namespace: String,
        /// Secret name
        name: String,
        /// Underlying kube-rs error
        #[source]
        source: kube::Error,
    },

    /// Secret exists but has no entry under the referenced key
    #[error("secret {namespace}/{name} has no key {key:?}")]
    MissingSecretKey {
        /// Namespace searched
        namespace: String,
        /// Secret name
        name: String,
        /// Key looked up
        key: String,
    },

    /// Secret value is not valid base64
    #[error("failure to decode base64 secret: {0}")]
    KeyDecode(#[from] base64::DecodeError),

    /// Nexus client construction or request failed
    #[error(transparent)]
    Nexus(#[from] nexus_client::Error),

    /// Clean up requested for a challenge this solver never presented
    #[error("no pending challenge record for {fqdn}")]
    UnknownChallenge {
        /// Resolved FQDN of the challenge
        fqdn: String,
    },

    /// Another present or clean up of the same challenge is still running
    #[error("challenge record for {fqdn} is still being created")]
    ChallengeInProgress {
        /// Resolved FQDN of the challenge
        fqdn: String,
    },

    /// Kubernetes client could not be constructed
    #[error("failed to build kubernetes client: {0}")]
    KubeClient(#[source] kube::Error),

    /// Challenge handled before `initialize`
    #[error("solver not initialized")]
    NotInitialized,
}

impl Error {
    /// Whether cert-manager retrying the same challenge could succeed
    ///
    /// Config and secret problems need a change to the Issuer or Secret.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Nexus(e) => e.is_retryable(),
            Error::SecretRead { .. } | Error::ChallengeInProgress { .. } => true,
            Error::ConfigDecode(_)
            | Error::InvalidConfig(_)
            | Error::MissingSecretName
            | Error::MissingSecretKey { .. }
            | Error::KeyDecode(_)
            | Error::UnknownChallenge { .. }
            | Error::KubeClient(_)
            | Error::NotInitialized => false,
        }
    }
}
