//! Solver trait implemented by DNS providers

use async_trait::async_trait;

use crate::types::ChallengeRequest;

/// Error type returned by solvers
///
/// Solvers own their error types; the server only needs the message to
/// report back to cert-manager.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// A DNS-01 challenge solver
///
/// `initialize` is called exactly once, before the server starts accepting
/// requests. `present` and `clean_up` may then be called concurrently for
/// different challenges, and cert-manager retries either until it succeeds.
#[async_trait]
pub trait Solver: Send + Sync {
    /// Solver name; becomes the resource name under the API group
    fn name(&self) -> &str;

    /// Prepare the solver with the cluster's client configuration
    async fn initialize(&mut self, kube_config: kube::Config) -> Result<(), BoxError>;

    /// Publish the challenge record described by `request`
    async fn present(&self, request: &ChallengeRequest) -> Result<(), BoxError>;

    /// Remove the challenge record described by `request`
    async fn clean_up(&self, request: &ChallengeRequest) -> Result<(), BoxError>;
}
