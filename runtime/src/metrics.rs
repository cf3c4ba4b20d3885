//! Metrics for the dispatch and publish paths.
//!
//! Counters are recorded through the `metrics` facade and can be exported
//! with the Prometheus recorder installed by [`install_prometheus`]. Without
//! an installed recorder the macros are no-ops.

use metrics::{describe_counter, describe_histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use thiserror::Error;

// Re-export metrics macros for use in other modules
pub use metrics::{counter, histogram};

/// Messages handed to the dispatcher.
pub const EVENTS_DISPATCHED: &str = "events_dispatched_total";
/// Messages that could not be decoded.
pub const EVENTS_UNDECODABLE: &str = "events_undecodable_total";
/// Handler invocations by outcome label.
pub const HANDLER_OUTCOMES: &str = "event_handler_outcomes_total";
/// Handler run time.
pub const HANDLER_DURATION: &str = "event_handler_duration_seconds";
/// Messages written to a dead-letter topic.
pub const EVENTS_DEAD_LETTERED: &str = "events_dead_lettered_total";
/// Failed or unroutable publishes.
pub const PUBLISH_ERRORS: &str = "event_publish_errors_total";

/// Errors from metrics setup.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to install the Prometheus recorder
    #[error("Failed to install metrics recorder: {0}")]
    Install(String),
}

/// Install the Prometheus recorder and describe all metrics.
///
/// # Errors
///
/// Returns [`MetricsError::Install`] if a recorder is already installed.
pub fn install_prometheus() -> Result<PrometheusHandle, MetricsError> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| MetricsError::Install(e.to_string()))?;
    describe_metrics();
    tracing::info!("Prometheus metrics recorder installed");
    Ok(handle)
}

/// Register metric descriptions with the current recorder.
pub fn describe_metrics() {
    describe_counter!(EVENTS_DISPATCHED, "Messages handed to the dispatcher");
    describe_counter!(EVENTS_UNDECODABLE, "Messages dropped because they could not be decoded");
    describe_counter!(HANDLER_OUTCOMES, "Handler invocations by outcome");
    describe_histogram!(HANDLER_DURATION, "Time spent in a single handler invocation");
    describe_counter!(EVENTS_DEAD_LETTERED, "Messages republished to a dead-letter topic");
    describe_counter!(PUBLISH_ERRORS, "Publishes that failed or had no route");
}
