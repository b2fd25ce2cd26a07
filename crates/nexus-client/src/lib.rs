//! Client for the nexus DNS API
//!
//! Nexus manages ACME challenge records on behalf of registered services.
//! Each request is signed with the service's shared key; see [`NexusClient`].
//!
//! The free functions [`create_challenge_record`] and [`delete_challenge_record`]
//! are thin wrappers kept for callers that prefer a function-style API.

#![deny(missing_docs)]

mod client;
mod error;
mod signing;

pub use client::{
    create_challenge_record, delete_challenge_record, NexusClient, DEFAULT_REQUEST_TIMEOUT,
};
pub use error::{Error, Result};
pub use signing::{SERVICE_HEADER, SIGNATURE_HEADER, TIMESTAMP_HEADER};
