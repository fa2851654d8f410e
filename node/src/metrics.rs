//! # Prometheus Metrics
//!
//! Operational metrics for the daemon, scraped at `/metrics` on the metrics
//! port. Everything lives in a dedicated registry with the `nspv` prefix.

use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};

/// Metric handles. Cloning shares the underlying series.
#[derive(Clone)]
pub struct NodeMetrics {
    registry: Registry,
    /// Gateway commands served, by method.
    pub rpc_commands_total: IntCounterVec,
    /// Gateway commands that ended in an error, by method.
    pub rpc_errors_total: IntCounterVec,
    /// Requests no peer answered within its budget.
    pub dispatch_timeouts_total: IntCounter,
    /// Requests that found no peer or were cancelled.
    pub dispatch_failures_total: IntCounter,
    /// Open gateway connections.
    pub rpc_clients: IntGauge,
    /// Connected NSPV peers.
    pub connected_peers: IntGauge,
    /// Tip height from the latest chain info.
    pub chain_height: IntGauge,
    /// Height of the latest notarized block.
    pub notarized_height: IntGauge,
    /// Time spent executing one gateway command.
    pub rpc_latency_seconds: Histogram,
}

impl NodeMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new_custom(Some("nspv".into()), None)?;

        let rpc_commands_total = IntCounterVec::new(
            Opts::new("rpc_commands_total", "Gateway commands served"),
            &["method"],
        )?;
        registry.register(Box::new(rpc_commands_total.clone()))?;

        let rpc_errors_total = IntCounterVec::new(
            Opts::new("rpc_errors_total", "Gateway commands that returned an error"),
            &["method"],
        )?;
        registry.register(Box::new(rpc_errors_total.clone()))?;

        let dispatch_timeouts_total = IntCounter::new(
            "dispatch_timeouts_total",
            "Requests no peer answered in time",
        )?;
        registry.register(Box::new(dispatch_timeouts_total.clone()))?;

        let dispatch_failures_total = IntCounter::new(
            "dispatch_failures_total",
            "Requests with no usable peer, or cancelled",
        )?;
        registry.register(Box::new(dispatch_failures_total.clone()))?;

        let rpc_clients = IntGauge::new("rpc_clients", "Open gateway connections")?;
        registry.register(Box::new(rpc_clients.clone()))?;

        let connected_peers = IntGauge::new("connected_peers", "Connected NSPV peers")?;
        registry.register(Box::new(connected_peers.clone()))?;

        let chain_height = IntGauge::new("chain_height", "Tip height reported by peers")?;
        registry.register(Box::new(chain_height.clone()))?;

        let notarized_height =
            IntGauge::new("notarized_height", "Height of the latest notarized block")?;
        registry.register(Box::new(notarized_height.clone()))?;

        let rpc_latency_seconds = Histogram::with_opts(
            HistogramOpts::new("rpc_latency_seconds", "Gateway command latency in seconds")
                .buckets(vec![0.001, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]),
        )?;
        registry.register(Box::new(rpc_latency_seconds.clone()))?;

        Ok(Self {
            registry,
            rpc_commands_total,
            rpc_errors_total,
            dispatch_timeouts_total,
            dispatch_failures_total,
            rpc_clients,
            connected_peers,
            chain_height,
            notarized_height,
            rpc_latency_seconds,
        })
    }

    /// Prometheus text exposition of every registered metric.
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

pub type SharedMetrics = Arc<NodeMetrics>;

/// Axum handler for `/metrics`.
pub async fn metrics_handler(
    axum::extract::State(metrics): axum::extract::State<SharedMetrics>,
) -> impl IntoResponse {
    match metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, "metrics encoding failed").into_response()
        }
    }
}
