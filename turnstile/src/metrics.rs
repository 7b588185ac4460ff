//! Scan and redemption metrics.
//!
//! Counters are always recorded through the `metrics` facade. Setting
//! `METRICS_ADDR` installs a Prometheus exporter that serves them over HTTP.

use metrics::{describe_counter, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

/// Errors from metrics setup
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build the exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install the exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Install the Prometheus exporter with an HTTP listener on `addr`
///
/// Must be called from inside a Tokio runtime.
///
/// # Errors
///
/// Returns [`MetricsError`] if the exporter cannot be built or a recorder is
/// already installed.
pub fn install_exporter(addr: SocketAddr) -> Result<(), MetricsError> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Suffix("duration_seconds".to_string()),
            &[0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0],
        )
        .map_err(|e| MetricsError::Build(e.to_string()))?
        .with_http_listener(addr)
        .install()
        .map_err(|e| MetricsError::Install(e.to_string()))?;

    describe();
    tracing::info!(%addr, "Metrics available at http://{addr}/metrics");
    Ok(())
}

fn describe() {
    describe_counter!("turnstile.scans", "Scan outcomes recorded, by status");
    describe_counter!(
        "turnstile.redemptions",
        "Redemption attempts, by result (confirmed, unconfirmed, timeout or a ledger error)"
    );
    describe_histogram!(
        "turnstile.redemption.duration_seconds",
        "Time from send to confirmation of successful redemptions"
    );
    describe_counter!("store.actions.processed", "Actions reduced by the scan store");
    describe_counter!("store.effects.executed", "Effects executed, by type");
}

/// Count one recorded scan outcome
pub fn record_scan(status: &'static str) {
    metrics::counter!("turnstile.scans", "status" => status).increment(1);
}

/// Count one finished redemption attempt
pub fn record_redemption(result: &'static str) {
    metrics::counter!("turnstile.redemptions", "result" => result).increment(1);
}

/// Record how long a confirmed redemption took
pub fn record_redemption_duration(elapsed: Duration) {
    metrics::histogram!("turnstile.redemption.duration_seconds").record(elapsed.as_secs_f64());
}
