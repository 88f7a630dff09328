//! Metrics collection and exposition.
//!
//! # Metrics
//! - `socle_requests_total` (counter): requests by method, status
//! - `socle_request_duration_seconds` (histogram): latency distribution
//! - `socle_maintenance_mode` (gauge): 1 while in maintenance
//! - `socle_scheduler_job_failures_total` (counter): failed job runs by job
//! - `socle_mail_sent_total` / `socle_mail_failed_total` (counters)
//! - `socle_rate_limited_total` (counter)
//!
//! # Design Decisions
//! - Recording is a no-op until an exporter is installed
//! - Exporter only runs when `observability.metrics_enabled` is set

use std::net::SocketAddr;
use std::time::Instant;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Install the Prometheus exporter listening on `addr`.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics exporter listening");
    Ok(())
}

/// Record a served request.
pub fn record_request(method: &str, status: u16, start: Instant) {
    metrics::counter!(
        "socle_requests_total",
        "method" => method.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    metrics::histogram!("socle_request_duration_seconds").record(start.elapsed().as_secs_f64());
}

/// Mirror the maintenance flag.
pub fn set_maintenance(enabled: bool) {
    metrics::gauge!("socle_maintenance_mode").set(if enabled { 1.0 } else { 0.0 });
}

/// Count a failed scheduler run.
pub fn record_job_failure(job: &str) {
    metrics::counter!("socle_scheduler_job_failures_total", "job" => job.to_string()).increment(1);
}

/// Count a mail delivery outcome.
pub fn record_mail(success: bool) {
    if success {
        metrics::counter!("socle_mail_sent_total").increment(1);
    } else {
        metrics::counter!("socle_mail_failed_total").increment(1);
    }
}

/// Count a request rejected by the rate limiter.
pub fn record_rate_limited() {
    metrics::counter!("socle_rate_limited_total").increment(1);
}
