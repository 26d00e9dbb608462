// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # REMIT Remittance Node
//!
//! Entry point for the `remit-node` binary. Parses CLI arguments, initializes
//! logging and metrics, starts a devnet ledger with the escrow contract
//! deployed, and serves the HTTP/WS API.
//!
//! The binary supports four subcommands:
//!
//! - `run`    : start the node
//! - `init`   : generate an admin key file
//! - `sign`   : sign an encoded envelope offline
//! - `version`: print build version information

mod api;
mod cli;
mod devnet;
mod keyfile;
mod logging;
mod metrics;
mod mirror;
mod service;
mod watcher;

#[cfg(test)]
mod testing;

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::broadcast;

use remit_protocol::config::NetworkConfig;
use remit_protocol::crypto::keys::Keypair;
use remit_protocol::transaction::Signer;

use cli::{Commands, RemitNodeCli};
use devnet::Devnet;
use logging::LogFormat;
use metrics::NodeMetrics;
use service::{RemittanceService, ServiceConfig};
use watcher::ConfirmationWatcher;

/// Broadcast channel capacity for live event streaming.
const EVENT_CHANNEL_CAPACITY: usize = 256;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = RemitNodeCli::parse();

    match cli.command {
        Commands::Run(args) => run_node(args).await,
        Commands::Init(args) => init_node(args),
        Commands::Sign(args) => sign_envelope(args),
        Commands::Version => {
            print_version();
            Ok(())
        }
    }
}

/// Starts the full node: devnet ledger, API server, metrics endpoint, and
/// confirmation watcher.
async fn run_node(args: cli::RunArgs) -> Result<()> {
    logging::init_logging(logging::DEFAULT_DIRECTIVES, args.log_format);

    tracing::info!(
        rpc_port = args.rpc_port,
        metrics_port = args.metrics_port,
        network = %args.network_passphrase,
        "starting remit-node"
    );

    let network = NetworkConfig::new(args.network_passphrase.clone())
        .with_base_fee(args.base_fee)
        .with_submit_timeout(Duration::from_secs(args.submit_timeout_secs));

    // --- Admin key ---
    let admin = load_admin(&args)?;
    tracing::info!(admin = %admin.address(), "admin key loaded");

    // --- Metrics ---
    let node_metrics = Arc::new(NodeMetrics::new());

    // --- Devnet ---
    let devnet = Arc::new(Devnet::start(network.clone()).context("failed to start devnet")?);

    // --- Event broadcast ---
    let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

    // --- Service ---
    let service = Arc::new(RemittanceService::new(
        ServiceConfig {
            network,
            sequence_retries: args.sequence_retries,
            tx_validity: Duration::from_secs(args.tx_validity_secs),
        },
        devnet.client(),
        devnet.contract_address(),
        admin,
        Arc::clone(&node_metrics),
        event_tx.clone(),
    ));
    devnet
        .bootstrap(&service)
        .await
        .context("failed to initialize the escrow contract")?;

    // --- Confirmation watcher ---
    let watcher = ConfirmationWatcher::new(
        Arc::clone(&service),
        Duration::from_millis(args.poll_interval_ms),
    )
    .spawn();

    // --- Application state ---
    let app_state = api::AppState {
        version: format!(
            "{} (protocol {})",
            env!("CARGO_PKG_VERSION"),
            remit_protocol::config::PROTOCOL_VERSION,
        ),
        service,
        devnet,
        event_tx,
    };

    // --- API server ---
    let api_router = api::create_router(app_state);
    let api_addr = format!("0.0.0.0:{}", args.rpc_port);
    let api_listener = tokio::net::TcpListener::bind(&api_addr)
        .await
        .with_context(|| format!("failed to bind RPC listener on {}", api_addr))?;
    tracing::info!("API server listening on {}", api_addr);

    // --- Metrics server ---
    let metrics_router = axum::Router::new()
        .route("/metrics", axum::routing::get(metrics::metrics_handler))
        .with_state(Arc::clone(&node_metrics));
    let metrics_addr = format!("0.0.0.0:{}", args.metrics_port);
    let metrics_listener = tokio::net::TcpListener::bind(&metrics_addr)
        .await
        .with_context(|| format!("failed to bind metrics listener on {}", metrics_addr))?;
    tracing::info!("Metrics server listening on {}", metrics_addr);

    // --- Serve ---
    tokio::select! {
        res = axum::serve(api_listener, api_router) => {
            if let Err(e) = res {
                tracing::error!("API server error: {}", e);
            }
        }
        res = axum::serve(metrics_listener, metrics_router) => {
            if let Err(e) = res {
                tracing::error!("Metrics server error: {}", e);
            }
        }
        _ = shutdown_signal() => {
            tracing::info!("shutdown signal received, draining connections");
        }
    }

    watcher.abort();
    tracing::info!("remit-node stopped");
    Ok(())
}

/// `--admin-key`, then `--admin-key-file`, then an ephemeral key.
fn load_admin(args: &cli::RunArgs) -> Result<Keypair> {
    if let Some(secret) = &args.admin_key {
        return Keypair::from_secret_hex(secret).context("--admin-key is not a valid secret key");
    }
    if let Some(path) = &args.admin_key_file {
        return keyfile::load(path);
    }
    let keypair = Keypair::generate();
    tracing::warn!(
        admin = %keypair.address(),
        "no admin key configured, generated an ephemeral one"
    );
    Ok(keypair)
}

/// Generates an admin key file in the data directory.
fn init_node(args: cli::InitArgs) -> Result<()> {
    logging::init_logging("remit_node=info", LogFormat::Pretty);

    let (key_path, keypair) = keyfile::generate(&args.data_dir, args.force)?;
    tracing::info!(
        address = %keypair.address(),
        key_path = %key_path.display(),
        "admin keypair generated"
    );

    println!("Node initialized successfully.");
    println!("  Data directory : {}", args.data_dir.display());
    println!("  Admin key      : {}", key_path.display());
    println!("  Admin address  : {}", keypair.address());

    Ok(())
}

/// Signs an envelope offline and prints the signed envelope to stdout.
fn sign_envelope(args: cli::SignArgs) -> Result<()> {
    let signer = Signer::new(args.network_passphrase);
    let signed = signer
        .sign_encoded(args.envelope.trim(), args.secret_key.trim())
        .context("failed to sign envelope")?;
    println!("{}", signed);
    Ok(())
}

/// Prints version information to stdout.
fn print_version() {
    println!("remit-node {}", env!("CARGO_PKG_VERSION"));
    println!("protocol   {}", remit_protocol::config::PROTOCOL_VERSION);
    println!("rustc      {}", rustc_version());
}

/// Returns the Rust compiler version used to build this binary.
fn rustc_version() -> &'static str {
    option_env!("RUSTC_VERSION").unwrap_or("unknown")
}

/// Waits for SIGINT (Ctrl+C) or SIGTERM, whichever comes first.
///
/// On non-Unix platforms, only Ctrl+C is supported. If a handler cannot be
/// installed the error is logged and that signal is never awaited.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("failed to install Ctrl+C handler: {}", e);
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
                tracing::error!("failed to install SIGTERM handler: {}", e);
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
}
