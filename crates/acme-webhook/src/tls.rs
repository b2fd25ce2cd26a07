//! TLS for the webhook listener
//!
//! kube-apiserver reaches the webhook through the aggregation layer and
//! authenticates with its front-proxy client certificate. The CA that signs
//! that certificate, and the names it may carry, are published in the
//! `kube-system/extension-apiserver-authentication` ConfigMap. Only clients
//! presenting a certificate from that CA complete the handshake.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use axum_server::tls_rustls::RustlsConfig;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::api::Api;
use kube::Client;
use rustls::client::danger::HandshakeSignatureValid;
use rustls::crypto::{aws_lc_rs, CryptoProvider};
use rustls::pki_types::{
    CertificateDer, PrivateKeyDer, PrivatePkcs1KeyDer, PrivatePkcs8KeyDer, PrivateSec1KeyDer,
    UnixTime,
};
use rustls::server::danger::{ClientCertVerified, ClientCertVerifier};
use rustls::server::WebPkiClientVerifier;
use rustls::{DigitallySignedStruct, DistinguishedName, RootCertStore, ServerConfig, SignatureScheme};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::server::ServeOptions;

/// ConfigMap holding the apiserver's client authentication material
pub const AUTHENTICATION_CONFIG_MAP: &str = "extension-apiserver-authentication";

/// Namespace of [`AUTHENTICATION_CONFIG_MAP`]
pub const AUTHENTICATION_NAMESPACE: &str = "kube-system";

const CLIENT_CA_KEY: &str = "requestheader-client-ca-file";
const ALLOWED_NAMES_KEY: &str = "requestheader-allowed-names";

/// Front-proxy client authentication published by kube-apiserver
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RequestHeaderAuth {
    /// PEM bundle of CAs allowed to sign front-proxy client certificates
    pub client_ca_pem: String,
    /// Common names a client certificate may carry; empty allows any
    pub allowed_names: Vec<String>,
}

impl RequestHeaderAuth {
    /// Read the authentication ConfigMap from the cluster
    pub async fn load(client: Client) -> Result<Self> {
        let config_maps: Api<ConfigMap> = Api::namespaced(client, AUTHENTICATION_NAMESPACE);
        let config_map = config_maps
            .get(AUTHENTICATION_CONFIG_MAP)
            .await
            .map_err(|e| {
                Error::Config(format!(
                    "failed to read {}/{}: {}",
                    AUTHENTICATION_NAMESPACE, AUTHENTICATION_CONFIG_MAP, e
                ))
            })?;
        Self::from_config_map(&config_map)
    }

    /// Extract the front-proxy CA and allowed names from `config_map`
    pub fn from_config_map(config_map: &ConfigMap) -> Result<Self> {
        let data = config_map.data.as_ref();

        let client_ca_pem = data
            .and_then(|data| data.get(CLIENT_CA_KEY))
            .filter(|pem| !pem.trim().is_empty())
            .cloned()
            .ok_or_else(|| {
                Error::Config(format!(
                    "{}/{} has no {}; front-proxy authentication is not configured",
                    AUTHENTICATION_NAMESPACE, AUTHENTICATION_CONFIG_MAP, CLIENT_CA_KEY
                ))
            })?;

        // Stored as a JSON array of strings
        let allowed_names = match data.and_then(|data| data.get(ALLOWED_NAMES_KEY)) {
            Some(raw) if !raw.trim().is_empty() => serde_json::from_str(raw).map_err(|e| {
                Error::Config(format!("invalid {}: {}", ALLOWED_NAMES_KEY, e))
            })?,
            _ => Vec::new(),
        };

        Ok(Self {
            client_ca_pem,
            allowed_names,
        })
    }

    /// Verifier accepting only certificates signed by the front-proxy CA
    pub fn client_verifier(&self) -> Result<Arc<dyn ClientCertVerifier>> {
        let mut roots = RootCertStore::empty();
        for cert in parse_certificates(self.client_ca_pem.as_bytes())? {
            roots
                .add(cert)
                .map_err(|e| Error::Config(format!("invalid client CA certificate: {}", e)))?;
        }

        let inner = WebPkiClientVerifier::builder_with_provider(Arc::new(roots), provider())
            .build()
            .map_err(|e| Error::Config(format!("failed to build client verifier: {}", e)))?;

        Ok(Arc::new(AllowedNamesVerifier {
            inner,
            allowed_names: self.allowed_names.clone(),
        }))
    }
}

/// Chain verification plus a common-name allow list
#[derive(Debug)]
struct AllowedNamesVerifier {
    inner: Arc<dyn ClientCertVerifier>,
    allowed_names: Vec<String>,
}

impl ClientCertVerifier for AllowedNamesVerifier {
    fn root_hint_subjects(&self) -> &[DistinguishedName] {
        self.inner.root_hint_subjects()
    }

    fn verify_client_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        now: UnixTime,
    ) -> std::result::Result<ClientCertVerified, rustls::Error> {
        let verified = self
            .inner
            .verify_client_cert(end_entity, intermediates, now)?;

        if self.allowed_names.is_empty() {
            return Ok(verified);
        }

        let cn = common_name(end_entity).ok_or_else(|| {
            rustls::Error::General("client certificate has no common name".to_string())
        })?;
        if !self.allowed_names.iter().any(|name| *name == cn) {
            debug!(cn = %cn, "Rejecting client certificate with unexpected common name");
            return Err(rustls::Error::General(format!(
                "client certificate common name {} is not allowed",
                cn
            )));
        }
        Ok(verified)
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.inner.supported_verify_schemes()
    }

    fn client_auth_mandatory(&self) -> bool {
        true
    }
}

fn common_name(cert: &CertificateDer<'_>) -> Option<String> {
    let (_, parsed) = x509_parser::parse_x509_certificate(cert.as_ref()).ok()?;
    let cn = parsed
        .subject()
        .iter_common_name()
        .next()
        .and_then(|cn| cn.as_str().ok())?
        .to_string();
    Some(cn)
}

fn provider() -> Arc<CryptoProvider> {
    Arc::new(aws_lc_rs::default_provider())
}

fn parse_certificates(pem_data: &[u8]) -> Result<Vec<CertificateDer<'static>>> {
    let certs: Vec<CertificateDer<'static>> = pem::parse_many(pem_data)
        .map_err(|e| Error::Config(format!("invalid certificate PEM: {}", e)))?
        .into_iter()
        .filter(|block| block.tag() == "CERTIFICATE")
        .map(|block| CertificateDer::from(block.into_contents()))
        .collect();

    if certs.is_empty() {
        return Err(Error::Config("no certificates found in PEM".to_string()));
    }
    Ok(certs)
}

fn parse_private_key(pem_data: &[u8]) -> Result<PrivateKeyDer<'static>> {
    for block in pem::parse_many(pem_data)
        .map_err(|e| Error::Config(format!("invalid private key PEM: {}", e)))?
    {
        let tag = block.tag().to_string();
        let key = match tag.as_str() {
            "PRIVATE KEY" => PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(block.into_contents())),
            "RSA PRIVATE KEY" => {
                PrivateKeyDer::Pkcs1(PrivatePkcs1KeyDer::from(block.into_contents()))
            }
            "EC PRIVATE KEY" => PrivateKeyDer::Sec1(PrivateSec1KeyDer::from(block.into_contents())),
            _ => continue,
        };
        return Ok(key);
    }
    Err(Error::Config("no private key found in PEM".to_string()))
}

/// Build the listener's TLS config from PEM serving material
pub fn server_config(
    cert_pem: &[u8],
    key_pem: &[u8],
    auth: &RequestHeaderAuth,
) -> Result<Arc<ServerConfig>> {
    let certs = parse_certificates(cert_pem)?;
    let key = parse_private_key(key_pem)?;

    let mut config = ServerConfig::builder_with_provider(provider())
        .with_safe_default_protocol_versions()
        .map_err(|e| Error::Config(format!("unsupported TLS versions: {}", e)))?
        .with_client_cert_verifier(auth.client_verifier()?)
        .with_single_cert(certs, key)
        .map_err(|e| Error::Config(format!("invalid serving certificate: {}", e)))?;
    config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];

    Ok(Arc::new(config))
}

/// Read the serving certificate and key named by `options`
pub async fn load_server_config(
    options: &ServeOptions,
    auth: &RequestHeaderAuth,
) -> Result<Arc<ServerConfig>> {
    let cert_pem = read_pem(&options.tls_cert_file).await?;
    let key_pem = read_pem(&options.tls_private_key_file).await?;
    server_config(&cert_pem, &key_pem, auth)
}

async fn read_pem(path: &Path) -> Result<Vec<u8>> {
    tokio::fs::read(path)
        .await
        .map_err(|e| Error::Config(format!("failed to read {}: {}", path.display(), e)))
}

/// Periodically reload serving material and the front-proxy CA
///
/// cert-manager renews the serving certificate in place, and the apiserver may
/// rotate its front-proxy CA. Failed reloads keep the current config.
pub async fn reload_periodically(
    tls_config: RustlsConfig,
    client: Client,
    options: ServeOptions,
    mut auth: RequestHeaderAuth,
) {
    let period = Duration::from_secs(options.tls_reload_interval_secs.max(1));
    let mut interval = tokio::time::interval(period);
    // First tick fires immediately; the config was just loaded
    interval.tick().await;

    loop {
        interval.tick().await;

        match RequestHeaderAuth::load(client.clone()).await {
            Ok(latest) => auth = latest,
            Err(e) => warn!(error = %e, "Failed to refresh front-proxy CA, keeping current"),
        }

        match load_server_config(&options, &auth).await {
            Ok(config) => {
                tls_config.reload_from_config(config);
                info!("Reloaded TLS configuration");
            }
            Err(e) => warn!(error = %e, "Failed to reload TLS configuration, keeping current"),
        }
    }
}
