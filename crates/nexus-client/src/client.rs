//! Nexus HTTP client
//!
//! Challenge records are addressed by a client-chosen UUID:
//! - `PUT /api/v2/domain/{domain}/challenge/{id}` with `{"hostname", "secret"}`
//! - `DELETE /api/v2/domain/{domain}/challenge/{id}`

use std::time::Duration;

use reqwest::header::CONTENT_TYPE;
use reqwest::Method;
use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::signing::{RequestSigner, SERVICE_HEADER, SIGNATURE_HEADER, TIMESTAMP_HEADER};

/// Timeout applied to every request against the nexus server
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Body of a challenge record creation request
#[derive(Debug, Serialize)]
struct ChallengeRecord<'a> {
    hostname: &'a str,
    secret: &'a str,
}

/// Client bound to one domain and one service identity
#[derive(Debug)]
pub struct NexusClient {
    http: reqwest::Client,
    server: String,
    domain: String,
    service: String,
    signer: RequestSigner,
}

impl NexusClient {
    /// Create a client for `domain`, authenticating as `service` with `key`
    ///
    /// The server defaults to `https://nexus.<domain>`; use
    /// [`NexusClient::with_server`] to point elsewhere.
    pub fn new(domain: impl Into<String>, service: impl Into<String>, key: &[u8]) -> Result<Self> {
        let domain = domain.into();
        let service = service.into();

        if domain.is_empty() {
            return Err(Error::InvalidConfig("domain must not be empty".to_string()));
        }
        if service.is_empty() {
            return Err(Error::InvalidConfig("service must not be empty".to_string()));
        }
        if key.is_empty() {
            return Err(Error::InvalidConfig("service key must not be empty".to_string()));
        }

        let http = reqwest::Client::builder()
            .timeout(DEFAULT_REQUEST_TIMEOUT)
            .build()?;

        Ok(Self {
            http,
            server: format!("https://nexus.{}", domain),
            domain,
            service,
            signer: RequestSigner::new(key),
        })
    }

    /// Override the nexus server base URL
    pub fn with_server(mut self, server: impl Into<String>) -> Self {
        self.server = server.into().trim_end_matches('/').to_string();
        self
    }

    /// Base URL requests are sent to
    pub fn server(&self) -> &str {
        &self.server
    }

    /// Domain this client manages records in
    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// Publish a challenge `secret` at `hostname` and return the record's id
    pub async fn create_challenge_record(&self, hostname: &str, secret: &str) -> Result<Uuid> {
        let id = Uuid::new_v4();
        let body = serde_json::to_vec(&ChallengeRecord { hostname, secret })?;

        self.send(Method::PUT, &self.challenge_path(&id), body)
            .await?;

        debug!(
            domain = %self.domain,
            hostname = %hostname,
            challenge_id = %id,
            "Created challenge record"
        );
        Ok(id)
    }

    /// Remove the challenge record previously created with `id`
    pub async fn delete_challenge_record(&self, id: Uuid) -> Result<()> {
        self.send(Method::DELETE, &self.challenge_path(&id), Vec::new())
            .await?;

        debug!(domain = %self.domain, challenge_id = %id, "Deleted challenge record");
        Ok(())
    }

    fn challenge_path(&self, id: &Uuid) -> String {
        format!("/api/v2/domain/{}/challenge/{}", self.domain, id)
    }

    async fn send(&self, method: Method, path: &str, body: Vec<u8>) -> Result<()> {
        let timestamp = chrono::Utc::now().timestamp();
        let signature = self.signer.sign(method.as_str(), path, timestamp, &body);
        let url = format!("{}{}", self.server, path);

        let mut request = self
            .http
            .request(method, &url)
            .header(SERVICE_HEADER, &self.service)
            .header(TIMESTAMP_HEADER, timestamp.to_string())
            .header(SIGNATURE_HEADER, signature);
        if !body.is_empty() {
            request = request.header(CONTENT_TYPE, "application/json").body(body);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Api {
                status: status.as_u16(),
                body,
            });
        }

        Ok(())
    }
}

/// Publish a challenge record through `client`
pub async fn create_challenge_record(
    client: &NexusClient,
    hostname: &str,
    secret: &str,
) -> Result<Uuid> {
    client.create_challenge_record(hostname, secret).await
}

/// Remove a challenge record through `client`
pub async fn delete_challenge_record(client: &NexusClient, id: Uuid) -> Result<()> {
    client.delete_challenge_record(id).await
}
