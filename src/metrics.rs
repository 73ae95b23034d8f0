use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::{trace, warn};

// Counters are trace events under `resale.metrics`.

pub fn inc_requests(route: &'static str) {
    trace!(target = "resale.metrics", route = route, "requests_total_inc");
}

pub fn stage_elapsed(stage: &'static str, elapsed_ms: u128) {
    trace!(
        target = "resale.metrics",
        stage = stage,
        elapsed_ms = elapsed_ms as u64,
        "stage_elapsed"
    );
}

pub fn rows_skipped(reason: &'static str, count: usize) {
    trace!(
        target = "resale.metrics",
        reason = reason,
        count = count as u64,
        "rows_skipped_inc"
    );
}

/// Installs the process-wide recorder, or falls back to a detached one when a
/// recorder is already installed.
pub fn prometheus_handle() -> PrometheusHandle {
    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => handle,
        Err(err) => {
            warn!(target = "resale.metrics", error = %err, "prometheus_recorder_not_installed");
            PrometheusBuilder::new().build_recorder().handle()
        }
    }
}
