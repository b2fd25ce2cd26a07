//! nexus-webhook - cert-manager DNS-01 solver for the nexus DNS provider

use acme_webhook::telemetry::{init_logging, DEFAULT_LOG_FILTER};
use acme_webhook::{ServeOptions, WebhookServer};
use clap::builder::NonEmptyStringValueParser;
use clap::Parser;

use nexus_webhook::{NexusSolver, GROUP_NAME_ENV};

/// cert-manager ACME webhook serving the nexus DNS-01 solver
#[derive(Parser, Debug)]
#[command(name = "nexus-webhook", version, about, long_about = None)]
struct Cli {
    /// API group the solver is served under; must match the Issuer's `groupName`
    #[arg(long, env = GROUP_NAME_ENV, value_parser = NonEmptyStringValueParser::new())]
    group_name: String,

    #[command(flatten)]
    serve: ServeOptions,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
        eprintln!("CRITICAL: Failed to install crypto provider: {:?}", e);
        std::process::exit(1);
    }

    init_logging(DEFAULT_LOG_FILTER)
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    // Exits with usage if GROUP_NAME is missing
    let cli = Cli::parse();

    tracing::info!(
        group = %cli.group_name,
        port = cli.serve.secure_port,
        version = env!("CARGO_PKG_VERSION"),
        "Starting nexus webhook"
    );

    WebhookServer::new(cli.group_name)
        .with_solver(NexusSolver::new())
        .run(cli.serve)
        .await
        .map_err(|e| anyhow::anyhow!("{}", e))
}
