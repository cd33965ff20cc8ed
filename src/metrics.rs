//! Prometheus metrics for the relay.
//!
//! The recorder is installed once per process; every router built afterwards
//! (tests build many) shares the same handle.

use metrics::{counter, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use std::time::Instant;
use tracing::warn;

static HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the global Prometheus recorder (idempotent) and return its handle.
pub fn init() -> PrometheusHandle {
    HANDLE
        .get_or_init(|| {
            let recorder = PrometheusBuilder::new().build_recorder();
            let handle = recorder.handle();
            if let Err(e) = metrics::set_global_recorder(recorder) {
                warn!("Metrics recorder already installed: {}", e);
            }
            handle
        })
        .clone()
}

/// Count a completed request by kind (`playlist`, `media`, `error`) and status.
pub fn record_request(kind: &'static str, status: u16) {
    counter!(
        "hls_relay_requests_total",
        "kind" => kind,
        "status" => status.to_string()
    )
    .increment(1);
}

/// Observe wall time since `start` for a request kind.
pub fn record_duration(kind: &'static str, start: Instant) {
    histogram!("hls_relay_request_duration_seconds", "kind" => kind)
        .record(start.elapsed().as_secs_f64());
}

pub fn record_upstream_error(reason: &'static str) {
    counter!("hls_relay_upstream_errors_total", "reason" => reason).increment(1);
}

/// Count rewritten playlist references by the action taken.
pub fn record_references(action: &'static str, count: usize) {
    if count > 0 {
        counter!("hls_relay_rewritten_references_total", "action" => action)
            .increment(count as u64);
    }
}
