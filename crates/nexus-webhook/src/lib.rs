//! cert-manager DNS-01 solver for the nexus DNS provider
//!
//! Resolves the Issuer's nexus service name and API key (a base64 value in a
//! Kubernetes Secret), then asks nexus to publish or remove the challenge
//! record.

pub mod config;
pub mod error;
pub mod names;
pub mod nexus;
pub mod secret;
pub mod solver;

pub use config::{load_config, SecretKeyRef, SolverConfig};
pub use error::{Error, Result};
pub use solver::{NexusSolver, SOLVER_NAME};

/// Environment variable naming the API group the webhook serves
pub const GROUP_NAME_ENV: &str = "GROUP_NAME";
