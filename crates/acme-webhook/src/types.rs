//! Challenge payload types
//!
//! Wire-compatible with cert-manager's `acme.cert-manager.io/v1alpha1`
//! `ChallengePayload`. cert-manager sends a payload carrying a `request` and
//! expects the same envelope back carrying a `response`.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::Status;
use serde::{Deserialize, Serialize};

/// apiVersion of the challenge payload envelope
pub const PAYLOAD_API_VERSION: &str = "acme.cert-manager.io/v1alpha1";

/// kind of the challenge payload envelope
pub const PAYLOAD_KIND: &str = "ChallengePayload";

/// Version segment under which solvers are served
pub const SOLVER_VERSION: &str = "v1alpha1";

/// Envelope exchanged with cert-manager
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChallengePayload {
    /// Always [`PAYLOAD_API_VERSION`]
    #[serde(default)]
    pub api_version: String,
    /// Always [`PAYLOAD_KIND`]
    #[serde(default)]
    pub kind: String,
    /// Set by cert-manager on the way in
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request: Option<ChallengeRequest>,
    /// Set by the webhook on the way out
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<ChallengeResponse>,
}

impl ChallengePayload {
    /// Wrap a request
    pub fn from_request(request: ChallengeRequest) -> Self {
        Self {
            api_version: PAYLOAD_API_VERSION.to_string(),
            kind: PAYLOAD_KIND.to_string(),
            request: Some(request),
            response: None,
        }
    }

    /// Wrap a response
    pub fn from_response(response: ChallengeResponse) -> Self {
        Self {
            api_version: PAYLOAD_API_VERSION.to_string(),
            kind: PAYLOAD_KIND.to_string(),
            request: None,
            response: Some(response),
        }
    }
}

/// Which half of the challenge lifecycle is requested
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub enum ChallengeAction {
    /// Publish the challenge record
    #[default]
    Present,
    /// Remove the challenge record
    CleanUp,
}

impl std::fmt::Display for ChallengeAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChallengeAction::Present => write!(f, "Present"),
            ChallengeAction::CleanUp => write!(f, "CleanUp"),
        }
    }
}

/// A single challenge to present or clean up
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChallengeRequest {
    /// Identifies this request; echoed in the response
    #[serde(default)]
    pub uid: String,
    /// Present or CleanUp
    pub action: ChallengeAction,
    /// Challenge type, always `dns-01` for DNS solvers
    #[serde(default, rename = "type")]
    pub type_: String,
    /// Name being validated, e.g. `example.com` or `*.example.com`
    #[serde(default)]
    pub dns_name: String,
    /// TXT record value to publish
    #[serde(default)]
    pub key: String,
    /// Namespace of the Issuer (or cert-manager's cluster resource namespace
    /// for ClusterIssuers); secrets are resolved here
    #[serde(default)]
    pub resource_namespace: String,
    /// Fully qualified record name, e.g. `_acme-challenge.example.com.`
    #[serde(default, rename = "resolvedFQDN")]
    pub resolved_fqdn: String,
    /// Authoritative zone for the record, e.g. `example.com.`
    #[serde(default)]
    pub resolved_zone: String,
    /// Whether the solver may use credentials from its own environment
    #[serde(default)]
    pub allow_ambient_credentials: bool,
    /// Solver-specific configuration from the Issuer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<serde_json::Value>,
}

/// Result of handling a [`ChallengeRequest`]
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChallengeResponse {
    /// The request's uid
    #[serde(default)]
    pub uid: String,
    /// Whether the action succeeded
    #[serde(default)]
    pub success: bool,
    /// Failure detail; absent on success
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<Status>,
}

impl ChallengeResponse {
    /// Successful response for `uid`
    pub fn success(uid: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            success: true,
            status: None,
        }
    }

    /// Failed response for `uid` carrying `message`
    pub fn failure(uid: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            success: false,
            status: Some(Status {
                status: Some("Failure".to_string()),
                message: Some(message.into()),
                ..Default::default()
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_decodes_cert_manager_fields() {
        let payload: ChallengePayload = serde_json::from_value(serde_json::json!({
            "apiVersion": "acme.cert-manager.io/v1alpha1",
            "kind": "ChallengePayload",
            "request": {
                "uid": "abc-123",
                "action": "Present",
                "type": "dns-01",
                "dnsName": "www.example.com",
                "key": "token",
                "resourceNamespace": "default",
                "resolvedFQDN": "_acme-challenge.www.example.com.",
                "resolvedZone": "example.com.",
                "allowAmbientCredentials": false,
                "config": {"service": "web"}
            }
        }))
        .unwrap();

        let request = payload.request.unwrap();
        assert_eq!(request.uid, "abc-123");
        assert_eq!(request.action, ChallengeAction::Present);
        assert_eq!(request.type_, "dns-01");
        assert_eq!(request.dns_name, "www.example.com");
        assert_eq!(request.resolved_fqdn, "_acme-challenge.www.example.com.");
        assert_eq!(request.resolved_zone, "example.com.");
        assert_eq!(request.config.unwrap()["service"], "web");
    }

    #[test]
    fn request_without_config_decodes() {
        let request: ChallengeRequest = serde_json::from_value(serde_json::json!({
            "uid": "u",
            "action": "CleanUp",
        }))
        .unwrap();
        assert_eq!(request.action, ChallengeAction::CleanUp);
        assert!(request.config.is_none());
    }

    #[test]
    fn unknown_action_is_rejected() {
        let result: Result<ChallengeRequest, _> =
            serde_json::from_value(serde_json::json!({"uid": "u", "action": "Destroy"}));
        assert!(result.is_err());
    }

    #[test]
    fn success_response_omits_status() {
        let payload = ChallengePayload::from_response(ChallengeResponse::success("u1"));
        let value = serde_json::to_value(&payload).unwrap();

        assert_eq!(value["apiVersion"], PAYLOAD_API_VERSION);
        assert_eq!(value["kind"], PAYLOAD_KIND);
        assert_eq!(value["response"]["uid"], "u1");
        assert_eq!(value["response"]["success"], true);
        assert!(value["response"].get("status").is_none());
        assert!(value.get("request").is_none());
    }

    #[test]
    fn failure_response_carries_message() {
        let response = ChallengeResponse::failure("u2", "secret name not provided");
        let value = serde_json::to_value(&response).unwrap();

        assert_eq!(value["success"], false);
        assert_eq!(value["status"]["status"], "Failure");
        assert_eq!(value["status"]["message"], "secret name not provided");
    }

    #[test]
    fn action_display_matches_wire_name() {
        assert_eq!(ChallengeAction::Present.to_string(), "Present");
        assert_eq!(ChallengeAction::CleanUp.to_string(), "CleanUp");
    }
}
