//! Solver configuration embedded in the Issuer
//!
//! ```yaml
//! solvers:
//!   - dns01:
//!       webhook:
//!         groupName: acme.example.com
//!         solverName: nexus
//!         config:
//!           service: my-service
//!           apikeysecret:
//!             name: nexus-api-key
//!             key: api-key
//! ```

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Reference to one key of a Secret in the challenge's resource namespace
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct SecretKeyRef {
    /// Secret name
    #[serde(default)]
    pub name: String,
    /// Key within the secret's data
    #[serde(default)]
    pub key: String,
}

/// Per-Issuer nexus solver configuration
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct SolverConfig {
    /// Nexus service name to authenticate as
    #[serde(default)]
    pub service: String,

    /// Secret holding the base64-encoded service key
    #[serde(default, rename = "apikeysecret")]
    pub api_key_secret_ref: SecretKeyRef,

    /// Nexus server base URL; defaults to `https://nexus.<domain>`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server: Option<String>,
}

impl SolverConfig {
    /// Check the config is usable
    ///
    /// With ambient credentials allowed the solver may rely on its own
    /// environment, so nothing is required here.
    pub fn validate(&self, allow_ambient_credentials: bool) -> Result<()> {
        if allow_ambient_credentials {
            return Ok(());
        }
        if self.service.is_empty() {
            return Err(Error::InvalidConfig(
                "no service name provided in config".to_string(),
            ));
        }
        if self.api_key_secret_ref.name.is_empty() {
            return Err(Error::InvalidConfig(
                "no nexus service key provided in config".to_string(),
            ));
        }
        Ok(())
    }
}

/// Decode the solver config from a challenge request
///
/// A missing (or JSON null) config yields the default config.
pub fn load_config(raw: Option<&serde_json::Value>) -> Result<SolverConfig> {
    match raw {
        None | Some(serde_json::Value::Null) => Ok(SolverConfig::default()),
        Some(value) => SolverConfig::deserialize(value).map_err(Error::ConfigDecode),
    }
}
