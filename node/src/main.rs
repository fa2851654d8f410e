// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # NSPV Daemon
//!
//! Entry point for the `nspv` binary. Parses CLI arguments, sets up logging
//! and metrics, opens the header store, connects to full nodes and serves
//! the local RPC gateway.
//!
//! - `run`     serve until Ctrl+C, SIGTERM or an RPC `stop`
//! - `scan`    wait for the first chain info, print it and exit
//!             (`--continuous` keeps serving afterwards)
//! - `version` print build version information

mod cli;
mod gateway;
mod logging;
mod metrics;
mod peer;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use nspv_protocol::config::{ChainParams, DispatchConfig, MaintenanceConfig};
use nspv_protocol::message::{ChainInfo, MessageKind};
use nspv_protocol::network::{Dispatcher, Maintenance, PeerSet, ResponseCache, ResponseHandler};
use nspv_protocol::session::Session;
use nspv_protocol::storage::HeaderStore;
use nspv_protocol::NspvClient;

use cli::{Commands, NodeArgs, NspvCli, StoreLocation};
use gateway::Gateway;
use metrics::{NodeMetrics, SharedMetrics};
use peer::Connector;

/// Delay between reconnect attempts to configured peers.
const RECONNECT_INTERVAL: Duration = Duration::from_secs(5);

/// How often gauges are refreshed from the cache and peer set.
const SAMPLE_INTERVAL: Duration = Duration::from_secs(1);

#[tokio::main]
async fn main() -> Result<()> {
    let cli = NspvCli::parse();

    match cli.command {
        Commands::Run(args) => run(args, false).await,
        Commands::Scan(args) => run(args.node, !args.continuous).await,
        Commands::Version => {
            print_version();
            Ok(())
        }
    }
}

async fn run(args: NodeArgs, exit_after_sync: bool) -> Result<()> {
    logging::init_logging(args.log_level(), args.log_format());

    let params = args.params();
    let targets = args.peer_targets(&params);
    tracing::info!(
        chain = params.name,
        peers = ?targets,
        maxnodes = args.maxnodes,
        "starting nspv"
    );
    if targets.is_empty() {
        tracing::warn!("no peers configured, pass --ips to connect to full nodes");
    }

    // --- Header store ---
    let headers = match args.store_location(&params) {
        StoreLocation::Memory => {
            HeaderStore::temporary().context("failed to create in-memory header store")?
        }
        StoreLocation::Path(path) => HeaderStore::open(&path)
            .with_context(|| format!("failed to open header store at {}", path.display()))?,
    };
    tracing::info!(stored = headers.len(), tip = ?headers.tip().ok().flatten(), "header store opened");

    let metrics: SharedMetrics =
        Arc::new(NodeMetrics::new().context("failed to register metrics")?);
    let stop = CancellationToken::new();

    // --- Client core ---
    let cache = Arc::new(ResponseCache::new());
    let peers = Arc::new(PeerSet::new(args.maxnodes));
    let session = Arc::new(Session::new());
    let dispatcher = Arc::new(Dispatcher::new(
        peers.clone(),
        cache.clone(),
        DispatchConfig::default(),
        stop.clone(),
    ));
    let client = Arc::new(NspvClient::new(
        dispatcher,
        session.clone(),
        headers.clone(),
        params.clone(),
    ));

    let mut tasks: Vec<JoinHandle<()>> = Vec::new();

    // --- Peers ---
    let connector = Arc::new(Connector::new(
        params.clone(),
        ResponseHandler::new(cache.clone()),
        stop.clone(),
        args.connect_timeout(),
    ));
    tasks.push(tokio::spawn(peer::keep_connected(
        connector,
        peers.clone(),
        targets,
        RECONNECT_INTERVAL,
        stop.clone(),
    )));

    // --- Maintenance ---
    let maintenance = Maintenance::new(
        peers.clone(),
        cache.clone(),
        session,
        MaintenanceConfig::default(),
    );
    let maintenance_stop = stop.clone();
    tasks.push(tokio::spawn(async move {
        maintenance.run(maintenance_stop).await
    }));

    tasks.push(tokio::spawn(sample_gauges(
        peers.clone(),
        cache.clone(),
        metrics.clone(),
        stop.clone(),
    )));

    // --- RPC gateway ---
    let rpc_addr = args.rpc_addr(&params);
    let gateway = Gateway::bind(rpc_addr, client, metrics.clone(), stop.clone())
        .await
        .with_context(|| format!("failed to bind RPC gateway on {}", rpc_addr))?;
    let gateway_task = tokio::spawn(gateway.serve());

    // --- Metrics server ---
    if let Some(port) = args.metrics_port {
        let router = axum::Router::new()
            .route("/metrics", axum::routing::get(metrics::metrics_handler))
            .with_state(metrics.clone());
        let addr = format!("127.0.0.1:{}", port);
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .with_context(|| format!("failed to bind metrics listener on {}", addr))?;
        tracing::info!("metrics server listening on {}", addr);
        let shutdown = stop.clone();
        tasks.push(tokio::spawn(async move {
            let served = axum::serve(listener, router)
                .with_graceful_shutdown(shutdown.cancelled_owned())
                .await;
            if let Err(e) = served {
                tracing::error!(error = %e, "metrics server error");
            }
        }));
    }

    // --- Scan ---
    if exit_after_sync {
        let scan_stop = stop.clone();
        let store = headers.clone();
        let params = params.clone();
        tasks.push(tokio::spawn(async move {
            if let Some(info) = first_chain_info(&cache, &scan_stop).await {
                print_scan_report(&params, &info, &store);
                scan_stop.cancel();
            }
        }));
    }

    tokio::select! {
        _ = shutdown_signal() => tracing::info!("shutdown signal received"),
        _ = stop.cancelled() => {}
    }
    stop.cancel();

    if let Err(e) = gateway_task.await {
        tracing::warn!(error = %e, "gateway task failed");
    }
    for task in tasks {
        if let Err(e) = task.await {
            tracing::warn!(error = %e, "background task failed");
        }
    }
    headers.flush().context("failed to flush header store")?;
    tracing::info!("nspv stopped");
    Ok(())
}

/// Waits until some peer has answered INFO, or until `stop`.
async fn first_chain_info(cache: &ResponseCache, stop: &CancellationToken) -> Option<ChainInfo> {
    let mut rx = cache.subscribe(MessageKind::Info);
    loop {
        if let Some(info) = cache.chain_info() {
            return Some(info);
        }
        tokio::select! {
            _ = stop.cancelled() => return None,
            changed = rx.changed() => {
                if changed.is_err() {
                    return None;
                }
            }
        }
    }
}

fn print_scan_report(params: &ChainParams, info: &ChainInfo, headers: &HeaderStore) {
    println!("{} synced", params.name);
    println!("  tip height     : {}", info.height);
    println!("  tip hash       : {}", info.blockhash);
    println!("  notarized at   : {}", info.notarization.height);
    println!("  notarized hash : {}", info.notarization.blockhash);
    println!("  stored headers : {}", headers.len());
    println!("  interest       : {}", if params.accrues_interest { "accrues" } else { "none" });
}

async fn sample_gauges(
    peers: Arc<PeerSet>,
    cache: Arc<ResponseCache>,
    metrics: SharedMetrics,
    stop: CancellationToken,
) {
    let mut ticker = tokio::time::interval(SAMPLE_INTERVAL);
    loop {
        tokio::select! {
            biased;
            _ = stop.cancelled() => break,
            _ = ticker.tick() => {}
        }
        metrics
            .connected_peers
            .set(peers.nspv_candidates().len() as i64);
        if let Some(info) = cache.chain_info() {
            metrics.chain_height.set(info.height as i64);
            metrics.notarized_height.set(info.notarization.height as i64);
        }
    }
}

fn print_version() {
    println!("nspv     {}", env!("CARGO_PKG_VERSION"));
    for params in [
        ChainParams::mainnet(),
        ChainParams::testnet(),
        ChainParams::regtest(),
    ] {
        println!(
            "{:<8} p2p {} rpc {} protocol {}",
            params.name, params.p2p_port, params.rpc_port, params.protocol_version
        );
    }
}

/// Waits for SIGINT (Ctrl+C) or SIGTERM, whichever comes first. A handler
/// that cannot be installed is logged and never fires.
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
            Ok(mut sig) => {
                sig.recv().await;
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
