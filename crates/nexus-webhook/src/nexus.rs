//! Seam between the solver and the nexus client

use async_trait::async_trait;
use nexus_client::NexusClient;
use uuid::Uuid;

#[cfg(test)]
use mockall::automock;

use crate::error::Result;

/// Everything needed to talk to nexus on behalf of one Issuer
#[derive(Clone)]
pub struct Credentials {
    /// Domain records are managed under
    pub domain: String,
    /// Nexus service name
    pub service: String,
    /// Decoded service key
    pub key: Vec<u8>,
    /// Server override from the solver config
    pub server: Option<String>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("domain", &self.domain)
            .field("service", &self.service)
            .field("key", &"<redacted>")
            .field("server", &self.server)
            .finish()
    }
}

/// Challenge record operations
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ChallengeRecords: Send + Sync {
    /// Publish `secret` at `hostname`, returning the record id
    async fn create_challenge_record(
        &self,
        hostname: &str,
        secret: &str,
    ) -> nexus_client::Result<Uuid>;

    /// Remove the record with `id`
    async fn delete_challenge_record(&self, id: Uuid) -> nexus_client::Result<()>;
}

#[async_trait]
impl ChallengeRecords for NexusClient {
    async fn create_challenge_record(
        &self,
        hostname: &str,
        secret: &str,
    ) -> nexus_client::Result<Uuid> {
        nexus_client::create_challenge_record(self, hostname, secret).await
    }

    async fn delete_challenge_record(&self, id: Uuid) -> nexus_client::Result<()> {
        nexus_client::delete_challenge_record(self, id).await
    }
}

/// Builds a client per challenge from resolved credentials
#[cfg_attr(test, automock)]
pub trait ClientFactory: Send + Sync {
    /// Build a client for `credentials`
    fn connect(&self, credentials: Credentials) -> Result<Box<dyn ChallengeRecords>>;
}

/// [`ClientFactory`] producing real [`NexusClient`]s
#[derive(Debug, Default, Clone, Copy)]
pub struct NexusClientFactory;

impl ClientFactory for NexusClientFactory {
    fn connect(&self, credentials: Credentials) -> Result<Box<dyn ChallengeRecords>> {
        let mut client =
            NexusClient::new(credentials.domain, credentials.service, &credentials.key)?;
        if let Some(server) = credentials.server {
            client = client.with_server(server);
        }
        Ok(Box::new(client))
    }
}
