//! Metrics instrumentation for the server boundary.

use std::time::Instant;

/// Record how long a request waited for its session lock.
pub fn record_lock_wait(duration_ms: f64) {
    metrics::histogram!("lock_wait_duration", duration_ms);
}

/// Record end-to-end gateway request latency.
pub fn record_request_latency(duration_ms: f64) {
    metrics::histogram!("gateway_request_latency", duration_ms);
}

pub fn increment_rate_limited() {
    metrics::counter!("rate_limit_rejections", 1);
}

pub fn increment_lock_timeouts() {
    metrics::counter!("lock_timeouts", 1);
}

/// Serve the recorded metrics for scraping on `addr`.
#[cfg(feature = "prometheus")]
pub fn install_prometheus_exporter(
    addr: std::net::SocketAddr,
) -> Result<(), metrics_exporter_prometheus::BuildError> {
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
}

/// RAII timer for automatic metric recording.
pub struct MetricTimer {
    start: Instant,
    metric_name: &'static str,
}

impl MetricTimer {
    pub fn new(metric_name: &'static str) -> Self {
        Self {
            start: Instant::now(),
            metric_name,
        }
    }
}

impl Drop for MetricTimer {
    fn drop(&mut self) {
        let duration_ms = self.start.elapsed().as_secs_f64() * 1000.0;
        match self.metric_name {
            "lock_wait_duration" => record_lock_wait(duration_ms),
            "gateway_request_latency" => record_request_latency(duration_ms),
            _ => {}
        }
    }
}
