// Copyright (c) 2026 Certa Ledger Team. MIT License.
// See LICENSE for details.

//! # Certa Node
//!
//! Entry point for the `certa-node` binary. Loads settings, initializes
//! logging and metrics, opens the operator's ledger connection, and serves
//! health and metrics until a shutdown signal arrives.
//!
//! Subcommands:
//!
//! - `run`            — connect and serve
//! - `check-identity` — validate the operator's certificate and key offline
//! - `version`        — print build version information

mod cli;
mod logging;
mod metrics;
mod server;
mod settings;

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tokio::signal;

use certa_contracts::AcademicRecordsContract;
use certa_protocol::gateway::IdleSweeper;
use certa_protocol::ledger::grpc::{GRPCS_SCHEME, GRPC_SCHEME};
use certa_protocol::ledger::{Connector, DevnetLedger, GrpcConnector};
use certa_protocol::ConnectionManager;

use cli::{CertaNodeCli, Commands};
use logging::LogFormat;
use metrics::GatewayMetrics;
use server::AppState;
use settings::NodeSettings;

/// Endpoint scheme served by the in-process development ledger.
const DEVNET_SCHEME: &str = "devnet://";

#[tokio::main]
async fn main() -> Result<()> {
    let cli = CertaNodeCli::parse();

    match cli.command {
        Commands::Run(args) => run_node(args).await,
        Commands::CheckIdentity(args) => check_identity(args),
        Commands::Version => {
            print_version();
            Ok(())
        }
    }
}

/// Connects as the operator and serves `/health` and `/metrics`.
async fn run_node(args: cli::RunArgs) -> Result<()> {
    let settings = NodeSettings::load(&args.config)?;

    let format = args
        .log_format
        .as_deref()
        .map(LogFormat::from_str_lossy)
        .unwrap_or(settings.logging.format);
    logging::init_logging(&settings.logging.filter, format)?;

    let listen = args.listen.unwrap_or(settings.server.listen);
    let gateway = settings.gateway.clone();
    tracing::info!(
        endpoint = %gateway.endpoint.address,
        msp_id = %gateway.msp_id,
        channel = %gateway.channel_name,
        chaincode = %gateway.chaincode_name,
        %listen,
        "starting certa-node"
    );

    // --- Ledger transport ---
    let connector = connector_for(&settings)?;

    // --- Operator connection ---
    let operator = settings.operator.load_identity(&gateway.msp_id)?;
    let manager = ConnectionManager::connect(gateway, connector, operator)
        .await
        .context("failed to open the operator's default ledger connection")?;

    // --- Idle sweeper ---
    let sweeper = IdleSweeper::from_config(Arc::clone(&manager));

    // --- HTTP ---
    let metrics = Arc::new(GatewayMetrics::new().context("failed to register metrics")?);
    let app = server::router(AppState {
        manager: Arc::clone(&manager),
        metrics,
    });
    let listener = tokio::net::TcpListener::bind(listen)
        .await
        .with_context(|| format!("failed to bind HTTP listener on {listen}"))?;
    tracing::info!(%listen, "health and metrics listening");

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    // --- Teardown ---
    sweeper.stop().await;
    manager.disconnect().await;
    tracing::info!("certa-node stopped");

    served.context("HTTP server error")
}

/// Picks the transport for the configured endpoint.
///
/// `devnet://` runs an in-process ledger with the academic records
/// chaincode installed on the configured channel.
fn connector_for(settings: &NodeSettings) -> Result<Arc<dyn Connector>> {
    let config = &settings.gateway;
    let address = &config.endpoint.address;

    if GrpcConnector::handles(address) {
        if address.starts_with(GRPCS_SCHEME) && config.endpoint.tls_root_pem.is_none() {
            bail!("{address} uses TLS: set tls_root to the peer's TLS CA bundle");
        }
        return Ok(Arc::new(GrpcConnector::new()));
    }
    if !address.starts_with(DEVNET_SCHEME) {
        bail!("unsupported ledger endpoint {address}: expected {DEVNET_SCHEME}, {GRPC_SCHEME} or {GRPCS_SCHEME}");
    }

    let devnet = settings.devnet.load_config()?;
    if devnet.msp_roots.is_empty() {
        tracing::warn!("devnet has no [devnet.msp_roots]; every creator will be rejected");
    }
    let ledger = DevnetLedger::new(devnet);
    ledger.install(
        &config.channel_name,
        &config.chaincode_name,
        Arc::new(AcademicRecordsContract),
    );
    tracing::warn!(
        channel = %config.channel_name,
        chaincode = %config.chaincode_name,
        "using in-process devnet ledger; state is lost on exit"
    );
    Ok(Arc::new(ledger))
}

/// Loads the operator credentials and reports what they contain.
fn check_identity(args: cli::CheckIdentityArgs) -> Result<()> {
    let settings = NodeSettings::load(&args.config)?;
    let identity = settings.operator.load_identity(&settings.gateway.msp_id)?;
    let signing = identity
        .signing_identity()
        .with_context(|| format!("operator credentials for {} are unusable", identity.owner_id()))?;

    println!("Operator identity OK.");
    println!("  Owner       : {}", identity.owner_id());
    println!("  MSP         : {}", identity.msp_id());
    println!("  Role        : {}", identity.role());
    println!("  Key         : {}", signing.algorithm());
    println!("  Subject     : {}", signing.certificate().subject());
    Ok(())
}

fn print_version() {
    println!("certa-node {}", env!("CARGO_PKG_VERSION"));
    println!("rustc      {}", option_env!("RUSTC_VERSION").unwrap_or("unknown"));
}

/// Waits for SIGINT (Ctrl+C) or SIGTERM, whichever comes first.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    tracing::info!("shutdown signal received");
}
