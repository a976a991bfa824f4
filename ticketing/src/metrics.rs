//! Business metrics for payment reconciliation.
//!
//! # Exported Metrics
//!
//! ## Counters
//! - `ticketing_payment_initiations_total{result}` - Initiation requests by result
//! - `ticketing_reconciliations_total{source,outcome}` - Outcome applications by entry point
//! - `ticketing_webhook_deliveries_total{disposition}` - Webhook deliveries by how they were handled
//! - `ticketing_provider_requests_total{operation,result}` - Provider API calls
//!
//! ## Histograms
//! - `ticketing_provider_request_duration_seconds{operation}` - Provider API latency

use metrics::{describe_counter, describe_histogram};
use metrics_exporter_prometheus::{BuildError, Matcher, PrometheusBuilder};
use std::net::SocketAddr;

/// Initialize and register all business metrics descriptions.
///
/// This should be called once at application startup, before any metrics are recorded.
pub fn register_business_metrics() {
    describe_counter!(
        "ticketing_payment_initiations_total",
        "Payment initiation requests by result (checkout, already_paid, free, error)"
    );
    describe_counter!(
        "ticketing_reconciliations_total",
        "Reconciliation attempts by source (webhook, return) and outcome"
    );
    describe_counter!(
        "ticketing_webhook_deliveries_total",
        "Webhook deliveries by disposition (processed, duplicate, unknown, ignored, rejected, error)"
    );
    describe_counter!(
        "ticketing_provider_requests_total",
        "Payment provider API calls by operation and result"
    );
    describe_histogram!(
        "ticketing_provider_request_duration_seconds",
        "Payment provider API latency"
    );

    tracing::info!("Business metrics registered");
}

/// Install the Prometheus recorder and its scrape listener.
///
/// # Errors
///
/// Returns an error if the recorder is already installed or the listener
/// cannot be configured.
pub fn install_prometheus(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .set_buckets_for_metric(
            Matcher::Suffix("duration_seconds".to_string()),
            &[0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 20.0, 30.0],
        )?
        .install()?;
    tracing::info!(%addr, "Metrics available at http://{addr}/metrics");
    Ok(())
}

// ============================================================================
// Metric Recording Functions
// ============================================================================

/// Record the result of a payment initiation.
pub fn record_initiation(result: &'static str) {
    metrics::counter!("ticketing_payment_initiations_total", "result" => result).increment(1);
}

/// Record one reconciliation.
///
/// # Arguments
///
/// * `source` - `webhook` or `return`
/// * `outcome` - what the reconciliation did (`paid`, `failed`, `pending`, `unchanged`, `duplicate`)
pub fn record_reconciliation(source: &'static str, outcome: &'static str) {
    metrics::counter!(
        "ticketing_reconciliations_total",
        "source" => source,
        "outcome" => outcome
    )
    .increment(1);
    tracing::debug!(source, outcome, "Recorded reconciliation metric");
}

/// Record how a webhook delivery was handled.
pub fn record_webhook_delivery(disposition: &'static str) {
    metrics::counter!("ticketing_webhook_deliveries_total", "disposition" => disposition)
        .increment(1);
}

/// Record a provider API call.
///
/// # Arguments
///
/// * `operation` - `create` or `fetch`
/// * `result` - `ok` or the error kind
/// * `duration_secs` - wall time of the call
pub fn record_provider_request(operation: &'static str, result: &'static str, duration_secs: f64) {
    metrics::counter!(
        "ticketing_provider_requests_total",
        "operation" => operation,
        "result" => result
    )
    .increment(1);
    metrics::histogram!("ticketing_provider_request_duration_seconds", "operation" => operation)
        .record(duration_secs);
}
