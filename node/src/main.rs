// Copyright (c) 2026 Moniker Contributors. MIT License.
// See LICENSE for details.

//! # Moniker Node
//!
//! Entry point for the `moniker-node` binary. Parses CLI arguments,
//! initializes logging and metrics, and dispatches to a subcommand:
//!
//! - `run`      -- start a bootstrap index node and serve its HTTP API
//! - `keygen`   -- generate a legacy or hybrid identity into a key file
//! - `register` -- mine, sign and submit a name record to a node
//! - `resolve`  -- look a name up through a node and re-verify the answer
//! - `version`  -- print build version information

mod api;
mod cli;
mod config;
mod logging;
mod metrics;

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{info, warn};

use moniker_protocol::config::{unix_millis, Network, PROTOCOL_VERSION};
use moniker_protocol::identity::keyfile::{read_key_file, write_key_file};
use moniker_protocol::identity::{generate_keypair, KeyKind};
use moniker_protocol::network::{
    BootstrapClient, BootstrapNode, HttpBootstrapClient, SubmitRequest, Substrate,
};
use moniker_protocol::pow::{
    FixedCostPow, MemoryHardPow, MemoryHardSchedule, PowStrategy, PowWorker,
};
use moniker_protocol::record::{validate_name, RecordBuilder, RecordJson};
use moniker_protocol::storage::IndexDb;
use moniker_protocol::verify::{RecordVerifier, VerifyContext};

use cli::{Commands, KeygenArgs, MonikerCli, RegisterArgs, ResolveArgs, RunArgs};
use config::NodeConfig;
use metrics::NodeMetrics;

const SECONDS_PER_DAY: u64 = 24 * 3600;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = MonikerCli::parse();
    logging::init_logging(logging::DEFAULT_FILTER, cli.log_format);

    match cli.command {
        Commands::Run(args) => run_node(args).await,
        Commands::Keygen(args) => keygen(args),
        Commands::Register(args) => register(args).await,
        Commands::Resolve(args) => resolve(args).await,
        Commands::Version => {
            print_version();
            Ok(())
        }
    }
}

/// Starts a bootstrap node: restores the index, joins the peers, serves the
/// API and the metrics endpoint until a shutdown signal arrives.
async fn run_node(args: RunArgs) -> Result<()> {
    let config = NodeConfig::load(&args)?;

    info!(
        node_id = %config.node_id,
        network = %config.network,
        api_port = config.api_port,
        metrics_port = config.metrics_port,
        data_dir = %config.data_dir.display(),
        peers = config.peers.len(),
        "starting moniker-node"
    );

    // --- Persistent storage ---
    std::fs::create_dir_all(&config.data_dir).with_context(|| {
        format!("failed to create data directory: {}", config.data_dir.display())
    })?;
    let db_path = config.data_dir.join("index");
    let db = IndexDb::open(&db_path)
        .with_context(|| format!("failed to open index database at {}", db_path.display()))?;
    info!(path = %db_path.display(), "index database opened");

    // --- Node ---
    let node = Arc::new(BootstrapNode::new(
        config.to_bootstrap_config(),
        RecordVerifier::for_network(config.network),
        Substrate::in_memory(),
        Some(db),
    ));
    let peer_timeout = Duration::from_millis(config.peer_timeout_ms);
    for url in &config.peers {
        let client = HttpBootstrapClient::with_timeout(url.clone(), peer_timeout)
            .with_context(|| format!("invalid peer {url}"))?;
        node.resolver().add_peer(Arc::new(client));
    }

    match node.sync_on_startup().await {
        Ok(report) => info!(
            restored = report.restored,
            pulled = report.pulled,
            rejected = report.rejected,
            "start-up sync complete"
        ),
        Err(e) => warn!(error = %e, "start-up sync failed, serving what we have"),
    }
    node.start().await.context("failed to start node")?;

    // --- Metrics ---
    let node_metrics = Arc::new(NodeMetrics::new().context("failed to register metrics")?);
    node_metrics.index_entries.set(node.index().len() as i64);

    // --- API server ---
    let app_state = api::AppState {
        node: Arc::clone(&node),
        metrics: Arc::clone(&node_metrics),
        version: env!("CARGO_PKG_VERSION").to_string(),
    };
    let api_router = api::create_router(app_state);
    let api_addr = config.api_address();
    let api_listener = tokio::net::TcpListener::bind(&api_addr)
        .await
        .with_context(|| format!("failed to bind API listener on {api_addr}"))?;
    info!("API server listening on {}", api_addr);

    // --- Metrics server ---
    let metrics_router = axum::Router::new()
        .route("/metrics", axum::routing::get(metrics::metrics_handler))
        .with_state(Arc::clone(&node_metrics));
    let metrics_addr = config.metrics_address();
    let metrics_listener = tokio::net::TcpListener::bind(&metrics_addr)
        .await
        .with_context(|| format!("failed to bind metrics listener on {metrics_addr}"))?;
    info!("metrics server listening on {}", metrics_addr);

    // --- Serve ---
    tokio::select! {
        res = axum::serve(api_listener, api_router) => {
            if let Err(e) = res {
                tracing::error!("API server error: {}", e);
            }
        }
        res = axum::serve(metrics_listener, metrics_router) => {
            if let Err(e) = res {
                tracing::error!("metrics server error: {}", e);
            }
        }
        _ = shutdown_signal() => {
            info!("shutdown signal received");
        }
    }

    node.shutdown().await;
    info!("moniker-node stopped");
    Ok(())
}

/// Generates an identity and writes it, optionally sealed, to a key file.
fn keygen(args: KeygenArgs) -> Result<()> {
    if args.out.exists() && !args.force {
        bail!(
            "{} already exists (pass --force to overwrite)",
            args.out.display()
        );
    }

    let kind = KeyKind::from(args.kind);
    let identity = generate_keypair(kind, None).context("key generation failed")?;
    write_key_file(&args.out, &identity, args.password.as_deref())
        .with_context(|| format!("failed to write key file {}", args.out.display()))?;

    // Restrict permissions on Unix.
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&args.out, std::fs::Permissions::from_mode(0o600))?;
    }

    info!(did = %identity.did(), %kind, "identity generated");
    println!("Identity generated.");
    println!("  Kind       : {}", kind);
    println!("  DID        : {}", identity.did());
    println!("  Public key : {}", identity.classical().public_key().to_hex());
    println!("  Key file   : {}", args.out.display());
    println!(
        "  Encrypted  : {}",
        if args.password.is_some() { "yes" } else { "no" }
    );
    Ok(())
}

/// Builds, mines, signs and submits a record. Ctrl-C cancels the search.
async fn register(args: RegisterArgs) -> Result<()> {
    let network: Network = args.network.parse().map_err(anyhow::Error::msg)?;
    let identity = read_key_file(&args.key, args.password.as_deref())
        .with_context(|| format!("failed to read key file {}", args.key.display()))?;
    let client = HttpBootstrapClient::new(args.node.clone())?;

    let mut builder = RecordBuilder::new(&args.name, args.cid.clone())
        .lifetime(Duration::from_secs(args.lifetime_days * SECONDS_PER_DAY));
    validate_name(builder.name())?;

    if args.update {
        let current = client
            .resolve(builder.name())
            .await?
            .with_context(|| format!("'{}' is not registered on {}", builder.name(), args.node))?;
        builder = builder.update_of(&current)?;
    }

    let strategy: Arc<dyn PowStrategy> = match identity.kind() {
        KeyKind::Legacy => Arc::new(FixedCostPow),
        KeyKind::Hybrid => Arc::new(MemoryHardPow::new(MemoryHardSchedule::for_network(network))),
    };
    let params = builder.difficulty(strategy.as_ref());
    info!(name = builder.name(), ?params, "mining proof of work (Ctrl-C to cancel)");

    let owner_key = identity.classical().public_key().as_bytes().to_vec();
    let worker = PowWorker::spawn(strategy, builder.name().to_string(), owner_key, params, 0)?;
    let cancel = worker.cancel_token();
    let interrupt = tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });

    let proof = tokio::task::spawn_blocking(move || {
        while !worker.is_finished() {
            if let Ok(progress) = worker.progress().recv_timeout(Duration::from_millis(500)) {
                eprint!(
                    "\r  {} attempts, {:.1}s",
                    progress.attempts,
                    progress.elapsed.as_secs_f64()
                );
            }
        }
        eprintln!();
        worker.join()
    })
    .await
    .context("proof-of-work task failed")??;
    interrupt.abort();

    let record = builder.assemble(&identity, proof)?;
    let mut request = SubmitRequest::new(&record);
    if args.with_nonce {
        let issued = client
            .request_nonce(&identity.classical().public_key())
            .await
            .context("nonce request failed")?;
        request = request.with_nonce(&record, identity.classical(), issued.nonce)?;
    }

    let response = client.submit(&request).await.context("submission failed")?;
    println!("{}", serde_json::to_string_pretty(&response)?);
    if !response.accepted {
        bail!(
            "'{}' rejected: {}",
            response.name,
            response.reason.unwrap_or_default()
        );
    }
    Ok(())
}

/// Resolves a name through a node and verifies the answer locally.
async fn resolve(args: ResolveArgs) -> Result<()> {
    let network: Network = args.network.parse().map_err(anyhow::Error::msg)?;
    let client = HttpBootstrapClient::new(args.node.clone())?;
    let Some(record) = client.resolve(&args.name).await? else {
        bail!("'{}' not found on {}", args.name, args.node);
    };

    let verified = Arc::new(RecordVerifier::for_network(network))
        .admit_blocking(record, None, VerifyContext::propagated(unix_millis()))
        .await
        .context("node returned a record that does not verify")?;
    println!("{}", RecordJson::render(verified.record())?);
    Ok(())
}

/// Prints version information to stdout.
fn print_version() {
    println!("moniker-node {}", env!("CARGO_PKG_VERSION"));
    println!("protocol     {}", PROTOCOL_VERSION);
    println!("rustc        {}", rustc_version());
}

/// Returns the Rust compiler version used to build this binary.
fn rustc_version() -> &'static str {
    option_env!("RUSTC_VERSION").unwrap_or("unknown")
}

/// Waits for SIGINT (Ctrl+C) or SIGTERM, whichever comes first.
///
/// On non-Unix platforms, only Ctrl+C is supported. A handler that cannot
/// be installed never fires.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
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
}
