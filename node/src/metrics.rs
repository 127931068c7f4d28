//! # Prometheus Metrics
//!
//! Exposes operational metrics for the bootstrap node. Scraped by Prometheus
//! at the `/metrics` HTTP endpoint on the configured metrics port.
//!
//! All metrics are registered in a dedicated [`prometheus::Registry`] so they
//! do not collide with any default global registry consumers.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use std::sync::Arc;

/// Holds all Prometheus metric handles for the node.
///
/// Clone-friendly (prometheus handles are reference counted) so it can be
/// shared across request handlers and background tasks.
#[derive(Clone)]
pub struct NodeMetrics {
    registry: Registry,
    /// Submissions accepted into the index.
    pub records_accepted_total: IntCounter,
    /// Submissions rejected, labelled by error class.
    pub records_rejected_total: IntCounterVec,
    /// Nonces presented a second time.
    pub replay_attempts_total: IntCounter,
    /// Successful resolutions, labelled by the source that answered.
    pub resolutions_total: IntCounterVec,
    /// Resolutions that found nothing or failed.
    pub resolution_failures_total: IntCounter,
    /// Entries currently held in the bootstrap index.
    pub index_entries: IntGauge,
    /// Time from request to verified answer.
    pub resolution_latency_seconds: Histogram,
}

impl NodeMetrics {
    /// Creates and registers all metrics. Call once at startup.
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new_custom(Some("moniker".into()), None)?;

        let records_accepted_total = IntCounter::new(
            "records_accepted_total",
            "Total number of name records accepted into the index",
        )?;
        registry.register(Box::new(records_accepted_total.clone()))?;

        let records_rejected_total = IntCounterVec::new(
            Opts::new(
                "records_rejected_total",
                "Total number of rejected submissions by error class",
            ),
            &["class"],
        )?;
        registry.register(Box::new(records_rejected_total.clone()))?;

        let replay_attempts_total = IntCounter::new(
            "replay_attempts_total",
            "Total number of submissions that reused a redeemed nonce",
        )?;
        registry.register(Box::new(replay_attempts_total.clone()))?;

        let resolutions_total = IntCounterVec::new(
            Opts::new("resolutions_total", "Successful resolutions by source"),
            &["source"],
        )?;
        registry.register(Box::new(resolutions_total.clone()))?;

        let resolution_failures_total = IntCounter::new(
            "resolution_failures_total",
            "Total number of resolutions that returned no record",
        )?;
        registry.register(Box::new(resolution_failures_total.clone()))?;

        let index_entries =
            IntGauge::new("index_entries", "Number of names in the bootstrap index")?;
        registry.register(Box::new(index_entries.clone()))?;

        let resolution_latency_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "resolution_latency_seconds",
                "Name resolution latency in seconds",
            )
            .buckets(vec![
                0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
            ]),
        )?;
        registry.register(Box::new(resolution_latency_seconds.clone()))?;

        Ok(Self {
            registry,
            records_accepted_total,
            records_rejected_total,
            replay_attempts_total,
            resolutions_total,
            resolution_failures_total,
            index_entries,
            resolution_latency_seconds,
        })
    }

    /// Encodes all registered metrics into the Prometheus text exposition format.
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

/// Shared metrics state passed to axum handlers.
pub type SharedMetrics = Arc<NodeMetrics>;

/// Axum handler that renders `/metrics` in Prometheus text format.
pub async fn metrics_handler(State(metrics): State<SharedMetrics>) -> impl IntoResponse {
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
