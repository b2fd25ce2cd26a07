//! cert-manager ACME webhook solver server
//!
//! cert-manager delegates DNS-01 challenges for providers it does not support
//! natively to an aggregated API server. That server exposes one resource per
//! solver under `/apis/{group}/v1alpha1/{solver}` and receives
//! `ChallengePayload` objects on `POST`.
//!
//! This crate provides that server. A provider implements [`Solver`] and hands
//! it to [`WebhookServer`]:
//!
//! ```ignore
//! WebhookServer::new(group_name)
//!     .with_solver(MySolver::default())
//!     .run(serve_options)
//!     .await?;
//! ```

#![deny(missing_docs)]

pub mod error;
pub mod server;
pub mod solver;
pub mod telemetry;
pub mod tls;
pub mod types;

pub use error::{Error, Result};
pub use server::{health_router, webhook_router, ServeOptions, WebhookServer, WebhookState};
pub use tls::RequestHeaderAuth;
pub use solver::{BoxError, Solver};
pub use types::{
    ChallengeAction, ChallengePayload, ChallengeRequest, ChallengeResponse, PAYLOAD_API_VERSION,
    PAYLOAD_KIND, SOLVER_VERSION,
};
