//! Metrics collection and exposition.
//!
//! # Metrics
//! - `gateway_requests_total` (counter): requests by method, status
//! - `gateway_request_duration_seconds` (histogram): latency distribution
//! - `gateway_no_free_workers_total` (counter): dispatches rejected by the pool
//! - `gateway_upload_errors_total` (counter): rejected uploads by error code
//! - `gateway_stream_cancellations_total` (counter): client disconnects mid-stream
//!
//! Recording is a no-op until [`init_metrics`] installs the exporter.

use std::net::SocketAddr;
use std::time::Instant;

use metrics_exporter_prometheus::PrometheusBuilder;

use crate::handler::UploadError;

/// Install the Prometheus exporter with its own scrape listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "metrics exporter listening"),
        Err(err) => tracing::error!(error = %err, "failed to install metrics exporter"),
    }
}

pub fn record_request(method: &str, status: u16, start: Instant) {
    metrics::counter!(
        "gateway_requests_total",
        "method" => method.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    metrics::histogram!("gateway_request_duration_seconds", "method" => method.to_string())
        .record(start.elapsed().as_secs_f64());
}

pub fn record_no_free_workers() {
    metrics::counter!("gateway_no_free_workers_total").increment(1);
}

pub fn record_upload_error(error: UploadError) {
    metrics::counter!("gateway_upload_errors_total", "code" => (error as u8).to_string())
        .increment(1);
}

pub fn record_stream_cancellation() {
    metrics::counter!("gateway_stream_cancellations_total").increment(1);
}
