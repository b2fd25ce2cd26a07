//! Error types for the webhook server

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

/// Result type for webhook server operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for webhook server operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Request addressed a group, version, or solver this server does not serve
    #[error("not found: {0}")]
    NotFound(String),

    /// Challenge payload was malformed
    #[error("invalid challenge payload: {0}")]
    InvalidPayload(String),

    /// A solver failed to initialize
    #[error("failed to initialize solver {solver}: {message}")]
    SolverInit {
        /// Name of the solver
        solver: String,
        /// Underlying failure
        message: String,
    },

    /// Configuration error (kubeconfig, TLS material)
    #[error("configuration error: {0}")]
    Config(String),

    /// Server failed while running
    #[error("server error: {0}")]
    Server(String),
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let (status, reason) = match &self {
            Error::NotFound(_) => (StatusCode::NOT_FOUND, "NotFound"),
            Error::InvalidPayload(_) => (StatusCode::BAD_REQUEST, "BadRequest"),
            Error::SolverInit { .. } | Error::Config(_) | Error::Server(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "InternalError")
            }
        };

        // K8s-style Status so kube-apiserver can relay it verbatim
        let body = serde_json::json!({
            "kind": "Status",
            "apiVersion": "v1",
            "status": "Failure",
            "message": self.to_string(),
            "reason": reason,
            "code": status.as_u16()
        });

        (status, axum::Json(body)).into_response()
    }
}
