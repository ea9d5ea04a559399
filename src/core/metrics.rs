use std::sync::OnceLock;

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::core::config::Settings;
use crate::db::types::SubmitCause;

static PROM_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

pub(crate) fn init(settings: &Settings) -> anyhow::Result<()> {
    if !settings.telemetry().prometheus_enabled {
        return Ok(());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    let _ = PROM_HANDLE.set(handle);
    Ok(())
}

pub(crate) fn render() -> Option<String> {
    PROM_HANDLE.get().map(|handle| handle.render())
}

pub(crate) fn attempt_started() {
    metrics::counter!("attempts_started_total").increment(1);
}

pub(crate) fn attempt_submitted(cause: SubmitCause) {
    metrics::counter!("attempts_submitted_total", "cause" => cause.as_str()).increment(1);
}

pub(crate) fn answer_saved() {
    metrics::counter!("answers_saved_total").increment(1);
}

pub(crate) fn attempt_graded() {
    metrics::counter!("attempts_graded_total").increment(1);
}

pub(crate) fn auto_submit_fired() {
    metrics::counter!("auto_submit_fired_total").increment(1);
}

pub(crate) fn auto_submit_armed(pending: usize) {
    metrics::gauge!("auto_submit_armed").set(pending as f64);
}

pub(crate) fn http_response(status: u16, latency: std::time::Duration) {
    let status = status.to_string();
    metrics::counter!("http_requests_total", "status" => status.clone()).increment(1);
    metrics::histogram!("http_request_duration_seconds", "status" => status)
        .record(latency.as_secs_f64());
}
