//! # Prometheus Metrics
//!
//! Operational metrics for the remittance node, scraped at `/metrics` on
//! the metrics port. Everything lives in a dedicated
//! [`prometheus::Registry`] under the `remit` prefix.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use std::sync::Arc;

use remit_protocol::error::RemitError;

/// Holds all Prometheus metric handles for the node.
#[derive(Clone)]
pub struct NodeMetrics {
    registry: Registry,
    /// Envelopes assembled by the service, signed or not.
    pub envelopes_built_total: IntCounter,
    /// Submissions by outcome: `accepted` or the error class.
    pub submissions_total: IntCounterVec,
    /// Rebuilds after losing a sequence race.
    pub sequence_retries_total: IntCounter,
    /// Mirror confirmations by result: `applied`, `duplicate`, `stale`.
    pub mirror_updates_total: IntCounterVec,
    /// Remittances opened through the API.
    pub remittances_created_total: IntCounter,
    /// Pending steps given up on after their time bounds closed.
    pub steps_expired_total: IntCounter,
    /// Latest ledger number observed in a confirmation.
    pub ledger_height: IntGauge,
    /// Wall time of one submission including the fate lookup.
    pub submission_latency_seconds: Histogram,
}

impl NodeMetrics {
    /// Creates and registers all metrics. Call once at startup.
    pub fn new() -> Self {
        let registry = Registry::new_custom(Some("remit".into()), None)
            .expect("failed to create prometheus registry");

        let envelopes_built_total = IntCounter::new(
            "envelopes_built_total",
            "Total number of transaction envelopes built",
        )
        .expect("metric creation");
        registry
            .register(Box::new(envelopes_built_total.clone()))
            .expect("metric registration");

        let submissions_total = IntCounterVec::new(
            Opts::new(
                "submissions_total",
                "Ledger submissions partitioned by outcome",
            ),
            &["outcome"],
        )
        .expect("metric creation");
        registry
            .register(Box::new(submissions_total.clone()))
            .expect("metric registration");

        let sequence_retries_total = IntCounter::new(
            "sequence_retries_total",
            "Envelopes rebuilt after a sequence mismatch",
        )
        .expect("metric creation");
        registry
            .register(Box::new(sequence_retries_total.clone()))
            .expect("metric registration");

        let mirror_updates_total = IntCounterVec::new(
            Opts::new(
                "mirror_updates_total",
                "Confirmations offered to the payment mirror, by result",
            ),
            &["result"],
        )
        .expect("metric creation");
        registry
            .register(Box::new(mirror_updates_total.clone()))
            .expect("metric registration");

        let remittances_created_total = IntCounter::new(
            "remittances_created_total",
            "Remittances opened through the API",
        )
        .expect("metric creation");
        registry
            .register(Box::new(remittances_created_total.clone()))
            .expect("metric registration");

        let steps_expired_total = IntCounter::new(
            "steps_expired_total",
            "Pending steps that expired without landing",
        )
        .expect("metric creation");
        registry
            .register(Box::new(steps_expired_total.clone()))
            .expect("metric registration");

        let ledger_height = IntGauge::new("ledger_height", "Latest ledger number observed")
            .expect("metric creation");
        registry
            .register(Box::new(ledger_height.clone()))
            .expect("metric registration");

        let submission_latency_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "submission_latency_seconds",
                "Ledger submission latency in seconds",
            )
            .buckets(vec![
                0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 30.0,
            ]),
        )
        .expect("metric creation");
        registry
            .register(Box::new(submission_latency_seconds.clone()))
            .expect("metric registration");

        Self {
            registry,
            envelopes_built_total,
            submissions_total,
            sequence_retries_total,
            mirror_updates_total,
            remittances_created_total,
            steps_expired_total,
            ledger_height,
            submission_latency_seconds,
        }
    }

    /// Counts one submission under `accepted` or its error class.
    pub fn record_submission(&self, outcome: &Result<String, RemitError>) {
        let label = match outcome {
            Ok(_) => "accepted".to_string(),
            Err(e) => e.class().to_string(),
        };
        self.submissions_total.with_label_values(&[&label]).inc();
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

impl Default for NodeMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared metrics handle passed to handlers and background tasks.
pub type SharedMetrics = Arc<NodeMetrics>;

/// Axum handler that renders `/metrics` in Prometheus text format.
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
            tracing::error!("failed to encode metrics: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "metrics encoding failed").into_response()
        }
    }
}
