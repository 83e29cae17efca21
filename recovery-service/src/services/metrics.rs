//! Metrics collection for recovery-service.
//!
//! Counters go through the `metrics` facade; the Prometheus recorder renders
//! them for `/metrics`. Without a recorder installed (unit tests) the macros
//! are no-ops.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;

pub static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the global Prometheus recorder. Safe to call more than once.
pub fn init_metrics() -> Result<(), anyhow::Error> {
    if METRICS_HANDLE.get().is_some() {
        return Ok(());
    }

    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| anyhow::anyhow!("Failed to install Prometheus recorder: {}", e))?;

    let _ = METRICS_HANDLE.set(handle);

    metrics::describe_counter!(
        "saga_runs_total",
        "Saga runs by workflow and terminal outcome"
    );
    metrics::describe_counter!(
        "saga_compensation_failures_total",
        "Compensating actions that returned an error"
    );
    metrics::describe_counter!(
        "store_fallback_writes_total",
        "Session writes that bypassed the cache and went to the durable tier"
    );
    metrics::describe_counter!(
        "background_jobs_total",
        "Background jobs by outcome"
    );

    Ok(())
}

/// Get metrics output in Prometheus text format.
pub fn get_metrics() -> String {
    METRICS_HANDLE
        .get()
        .map(|handle| handle.render())
        .unwrap_or_else(|| "# Metrics recorder not initialized\n".to_string())
}

pub fn record_saga_run(workflow: &'static str, outcome: &'static str) {
    metrics::counter!("saga_runs_total", "workflow" => workflow, "outcome" => outcome)
        .increment(1);
}

pub fn record_compensation_failure(workflow: &'static str, step: &'static str) {
    metrics::counter!(
        "saga_compensation_failures_total",
        "workflow" => workflow,
        "step" => step
    )
    .increment(1);
}

pub fn record_fallback_write(operation: &'static str) {
    metrics::counter!("store_fallback_writes_total", "operation" => operation).increment(1);
}

pub fn record_background_job(outcome: &'static str) {
    metrics::counter!("background_jobs_total", "outcome" => outcome).increment(1);
}
