//! Metrics collection and Prometheus export.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use service_core::error::AppError;
use std::sync::OnceLock;

/// Global handle to the Prometheus recorder.
pub static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the Prometheus recorder. Must run once at startup before any
/// metrics are recorded.
pub fn init_metrics() -> Result<(), AppError> {
    let handle = PrometheusBuilder::new().install_recorder().map_err(|e| {
        AppError::InternalError(anyhow::anyhow!("Failed to install Prometheus recorder: {}", e))
    })?;

    METRICS_HANDLE.set(handle).map_err(|_| {
        AppError::InternalError(anyhow::anyhow!("Metrics recorder already initialized"))
    })
}

/// Current metrics in Prometheus text format.
pub fn get_metrics() -> String {
    METRICS_HANDLE
        .get()
        .map(|handle| handle.render())
        .unwrap_or_else(|| "# Metrics recorder not initialized\n".to_string())
}

pub fn record_decision(outcome: &'static str, reason: &'static str) {
    metrics::counter!(
        "gateway_decisions_total",
        "outcome" => outcome,
        "reason" => reason
    )
    .increment(1);
}

pub fn record_cache_flush(trigger: &'static str, deleted: u64) {
    metrics::counter!("decision_cache_flushes_total", "trigger" => trigger).increment(1);
    metrics::counter!("decision_cache_flushed_keys_total", "trigger" => trigger)
        .increment(deleted);
}
