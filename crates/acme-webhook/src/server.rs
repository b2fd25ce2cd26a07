//! Webhook HTTP server
//!
//! Serves the aggregated API surface kube-apiserver proxies to:
//! - `GET /apis`, `/apis/{group}`, `/apis/{group}/v1alpha1` - discovery
//! - `POST /apis/{group}/v1alpha1/{solver}` - challenge payloads
//! - `GET /healthz`, `/livez`, `/readyz` - probes
//!
//! The HTTPS listener requires a front-proxy client certificate (see
//! [`crate::tls`]). Probes are also served over plain HTTP on a separate port
//! since kubelet presents no client certificate.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use axum_server::tls_rustls::RustlsConfig;
use axum_server::Handle;
use clap::Args;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{
    APIGroup, APIGroupList, APIResource, APIResourceList, GroupVersionForDiscovery,
};
use tracing::{error, info, warn};

use crate::error::{Error, Result};
use crate::solver::Solver;
use crate::tls::{load_server_config, reload_periodically, RequestHeaderAuth};
use crate::types::{
    ChallengeAction, ChallengePayload, ChallengeResponse, PAYLOAD_KIND, SOLVER_VERSION,
};

/// How long in-flight challenges get to finish on shutdown
const SHUTDOWN_GRACE_PERIOD: Duration = Duration::from_secs(10);

/// Serving options
#[derive(Args, Debug, Clone)]
pub struct ServeOptions {
    /// Port to serve HTTPS on
    #[arg(long, env = "SECURE_PORT", default_value_t = 443)]
    pub secure_port: u16,

    /// PEM certificate chain presented to kube-apiserver
    #[arg(long, env = "TLS_CERT_FILE", default_value = "/tls/tls.crt")]
    pub tls_cert_file: PathBuf,

    /// PEM private key for the serving certificate
    #[arg(long, env = "TLS_PRIVATE_KEY_FILE", default_value = "/tls/tls.key")]
    pub tls_private_key_file: PathBuf,

    /// Seconds between reloads of the serving certificate and client CA
    #[arg(long, env = "TLS_RELOAD_INTERVAL_SECS", default_value_t = 300)]
    pub tls_reload_interval_secs: u64,

    /// Port serving plain HTTP health probes
    #[arg(long, env = "HEALTH_PORT", default_value_t = 8080)]
    pub health_port: u16,
}

impl ServeOptions {
    /// Address to bind on all interfaces
    pub fn addr(&self) -> SocketAddr {
        SocketAddr::from(([0, 0, 0, 0], self.secure_port))
    }

    /// Address of the health probe listener
    pub fn health_addr(&self) -> SocketAddr {
        SocketAddr::from(([0, 0, 0, 0], self.health_port))
    }
}

/// Shared state for webhook handlers
pub struct WebhookState {
    group: String,
    solvers: HashMap<String, Arc<dyn Solver>>,
}

impl WebhookState {
    /// Create state serving `solvers` (keyed by name) under `group`
    pub fn new(group: impl Into<String>, solvers: HashMap<String, Arc<dyn Solver>>) -> Self {
        Self {
            group: group.into(),
            solvers,
        }
    }

    /// API group name
    pub fn group(&self) -> &str {
        &self.group
    }

    fn group_version(&self) -> String {
        format!("{}/{}", self.group, SOLVER_VERSION)
    }

    fn check_group(&self, group: &str) -> Result<()> {
        if group != self.group {
            return Err(Error::NotFound(format!("API group {}", group)));
        }
        Ok(())
    }

    fn check_group_version(&self, group: &str, version: &str) -> Result<()> {
        self.check_group(group)?;
        if version != SOLVER_VERSION {
            return Err(Error::NotFound(format!("API version {}/{}", group, version)));
        }
        Ok(())
    }

    fn solver(&self, name: &str) -> Result<&Arc<dyn Solver>> {
        self.solvers
            .get(name)
            .ok_or_else(|| Error::NotFound(format!("solver {}", name)))
    }

    fn discovery_group(&self) -> APIGroup {
        let version = GroupVersionForDiscovery {
            group_version: self.group_version(),
            version: SOLVER_VERSION.to_string(),
        };
        APIGroup {
            name: self.group.clone(),
            preferred_version: Some(version.clone()),
            versions: vec![version],
            ..Default::default()
        }
    }
}

/// Build the webhook router
pub fn webhook_router(state: Arc<WebhookState>) -> Router {
    Router::new()
        .route("/apis", get(api_group_list))
        .route("/apis/{group}", get(api_group))
        .route("/apis/{group}/{version}", get(api_resource_list))
        .route("/apis/{group}/{version}/{solver}", post(solve))
        .merge(health_router())
        .with_state(state)
}

/// Probe routes, served on both listeners
pub fn health_router<S: Clone + Send + Sync + 'static>() -> Router<S> {
    Router::new()
        .route("/healthz", get(|| async { "ok" }))
        .route("/livez", get(|| async { "ok" }))
        .route("/readyz", get(|| async { "ok" }))
}

async fn api_group_list(State(state): State<Arc<WebhookState>>) -> Json<APIGroupList> {
    Json(APIGroupList {
        groups: vec![state.discovery_group()],
    })
}

async fn api_group(
    State(state): State<Arc<WebhookState>>,
    Path(group): Path<String>,
) -> Result<Json<APIGroup>> {
    state.check_group(&group)?;
    Ok(Json(state.discovery_group()))
}

async fn api_resource_list(
    State(state): State<Arc<WebhookState>>,
    Path((group, version)): Path<(String, String)>,
) -> Result<Json<APIResourceList>> {
    state.check_group_version(&group, &version)?;

    let mut names: Vec<&String> = state.solvers.keys().collect();
    names.sort();

    let resources = names
        .into_iter()
        .map(|name| APIResource {
            name: name.clone(),
            singular_name: name.clone(),
            namespaced: false,
            group: Some(state.group.clone()),
            version: Some(SOLVER_VERSION.to_string()),
            kind: PAYLOAD_KIND.to_string(),
            verbs: vec!["create".to_string()],
            ..Default::default()
        })
        .collect();

    Ok(Json(APIResourceList {
        group_version: state.group_version(),
        resources,
    }))
}

/// Handle `POST /apis/{group}/v1alpha1/{solver}`
///
/// Solver failures are reported inside the payload with HTTP 200; cert-manager
/// reads `response.success` and retries on its own schedule.
async fn solve(
    State(state): State<Arc<WebhookState>>,
    Path((group, version, solver_name)): Path<(String, String, String)>,
    Json(payload): Json<ChallengePayload>,
) -> Result<Json<ChallengePayload>> {
    state.check_group_version(&group, &version)?;
    let solver = state.solver(&solver_name)?;
    let request = payload
        .request
        .ok_or_else(|| Error::InvalidPayload("missing request".to_string()))?;

    info!(
        uid = %request.uid,
        solver = %solver_name,
        action = %request.action,
        fqdn = %request.resolved_fqdn,
        "Handling challenge"
    );

    let result = match request.action {
        ChallengeAction::Present => solver.present(&request).await,
        ChallengeAction::CleanUp => solver.clean_up(&request).await,
    };

    let response = match result {
        Ok(()) => ChallengeResponse::success(&request.uid),
        Err(e) => {
            error!(
                uid = %request.uid,
                solver = %solver_name,
                action = %request.action,
                error = %e,
                "Challenge failed"
            );
            ChallengeResponse::failure(&request.uid, e.to_string())
        }
    };

    Ok(Json(ChallengePayload::from_response(response)))
}

/// Webhook server assembling solvers under one API group
pub struct WebhookServer {
    group: String,
    solvers: Vec<Box<dyn Solver>>,
}

impl WebhookServer {
    /// Create a server for `group` with no solvers
    pub fn new(group: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            solvers: Vec::new(),
        }
    }

    /// Register a solver
    pub fn with_solver(mut self, solver: impl Solver + 'static) -> Self {
        self.solvers.push(Box::new(solver));
        self
    }

    /// Initialize every solver with `kube_config` and build the shared state
    pub async fn initialize(self, kube_config: kube::Config) -> Result<WebhookState> {
        let mut solvers: HashMap<String, Arc<dyn Solver>> = HashMap::new();

        for mut solver in self.solvers {
            let name = solver.name().to_string();
            solver
                .initialize(kube_config.clone())
                .await
                .map_err(|e| Error::SolverInit {
                    solver: name.clone(),
                    message: e.to_string(),
                })?;
            info!(solver = %name, "Solver initialized");

            if solvers.insert(name.clone(), Arc::from(solver)).is_some() {
                warn!(solver = %name, "Duplicate solver name, keeping the last registration");
            }
        }

        Ok(WebhookState::new(self.group, solvers))
    }

    /// Initialize solvers and serve until SIGINT/SIGTERM
    pub async fn run(self, options: ServeOptions) -> Result<()> {
        let kube_config = kube::Config::infer()
            .await
            .map_err(|e| Error::Config(format!("failed to infer kube config: {}", e)))?;

        let client = kube::Client::try_from(kube_config.clone())
            .map_err(|e| Error::Config(format!("failed to build kubernetes client: {}", e)))?;

        let state = self.initialize(kube_config).await?;
        info!(group = %state.group(), "Webhook solvers registered");

        serve(webhook_router(Arc::new(state)), &options, client).await
    }
}

/// Serve `app` over mutual TLS until a shutdown signal arrives
///
/// Client certificates are checked against the apiserver's front-proxy CA,
/// read through `client`. Serving material and the CA are reloaded every
/// `tls_reload_interval_secs`.
pub async fn serve(app: Router, options: &ServeOptions, client: kube::Client) -> Result<()> {
    let auth = RequestHeaderAuth::load(client.clone()).await?;
    info!(
        allowed_names = ?auth.allowed_names,
        "Loaded front-proxy client CA"
    );

    let tls_config = RustlsConfig::from_config(load_server_config(options, &auth).await?);
    let reloader = tokio::spawn(reload_periodically(
        tls_config.clone(),
        client,
        options.clone(),
        auth,
    ));

    let handle = Handle::new();
    let health_handle = Handle::new();
    tokio::spawn(shutdown_on_signal(vec![handle.clone(), health_handle.clone()]));

    let addr = options.addr();
    let health_addr = options.health_addr();
    info!(addr = %addr, health_addr = %health_addr, "Starting webhook server");

    let webhook = axum_server::bind_rustls(addr, tls_config)
        .handle(handle)
        .serve(app.into_make_service());
    let health = axum_server::bind(health_addr)
        .handle(health_handle)
        .serve(health_router::<()>().into_make_service());

    let result = tokio::try_join!(webhook, health);
    reloader.abort();
    result.map_err(|e| Error::Server(e.to_string()))?;

    info!("Webhook server stopped");
    Ok(())
}

async fn shutdown_on_signal(handles: Vec<Handle>) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, draining connections");
    for handle in handles {
        handle.graceful_shutdown(Some(SHUTDOWN_GRACE_PERIOD));
    }
}
