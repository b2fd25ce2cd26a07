//! API key resolution from Kubernetes Secrets
//!
//! The Secret's value is itself base64 text (on top of the encoding the
//! Kubernetes API applies to `data`), and is decoded once more here.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use k8s_openapi::api::core::v1::Secret;
use kube::api::Api;
use kube::Client;
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use crate::config::SecretKeyRef;
use crate::error::{Error, Result};

/// Read access to Secret values
///
/// Abstracted so tests can verify lookups without a cluster.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait SecretReader: Send + Sync {
    /// Raw bytes stored under `key` in `namespace/name`; `None` if the key is absent
    async fn secret_value(
        &self,
        namespace: &str,
        name: &str,
        key: &str,
    ) -> std::result::Result<Option<Vec<u8>>, kube::Error>;
}

/// [`SecretReader`] backed by the Kubernetes API
pub struct KubeSecretReader {
    client: Client,
}

impl KubeSecretReader {
    /// Create a reader using `client`
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SecretReader for KubeSecretReader {
    async fn secret_value(
        &self,
        namespace: &str,
        name: &str,
        key: &str,
    ) -> std::result::Result<Option<Vec<u8>>, kube::Error> {
        let secrets: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        let secret = secrets.get(name).await?;
        Ok(secret
            .data
            .and_then(|mut data| data.remove(key))
            .map(|value| value.0))
    }
}

/// Fetch the referenced secret value from `namespace`
///
/// Fails without calling the API when the reference has no name.
pub async fn fetch_secret(
    reader: &dyn SecretReader,
    secret_ref: &SecretKeyRef,
    namespace: &str,
) -> Result<Vec<u8>> {
    if secret_ref.name.is_empty() {
        return Err(Error::MissingSecretName);
    }

    debug!(
        namespace = %namespace,
        secret = %secret_ref.name,
        key = %secret_ref.key,
        "Reading API key secret"
    );

    reader
        .secret_value(namespace, &secret_ref.name, &secret_ref.key)
        .await
        .map_err(|source| Error::SecretRead {
            namespace: namespace.to_string(),
            name: secret_ref.name.clone(),
            source,
        })?
        .ok_or_else(|| Error::MissingSecretKey {
            namespace: namespace.to_string(),
            name: secret_ref.name.clone(),
            key: secret_ref.key.clone(),
        })
}

/// Decode a base64 service key
///
/// Surrounding whitespace (e.g. the newline `echo` leaves behind) is ignored.
pub fn decode_key(raw: &[u8]) -> Result<Vec<u8>> {
    Ok(STANDARD.decode(raw.trim_ascii())?)
}

/// Fetch and decode the nexus service key
pub async fn resolve_api_key(
    reader: &dyn SecretReader,
    secret_ref: &SecretKeyRef,
    namespace: &str,
) -> Result<Vec<u8>> {
    let raw = fetch_secret(reader, secret_ref, namespace).await?;
    decode_key(&raw)
}
