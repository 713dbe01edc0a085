//! Prometheus metrics helpers for mintwatch.
//!
//! # Usage
//!
//! ```rust,ignore
//! use mintwatch_core::metrics::{init_metrics, start_metrics_server};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let handle = init_metrics()?;
//!     start_metrics_server(9090, handle).await?;
//!
//!     metrics::counter!("detector_admitted_total").increment(1);
//!     Ok(())
//! }
//! ```
//!
//! # Metric Naming Conventions
//!
//! - Prefix: `detector_`
//! - Suffix: unit or type (`_total`, `_entries`)
//! - Labels: only low-cardinality ones (`source`, `outcome`)

use axum::{Router, routing::get};
use metrics::{describe_counter, describe_gauge};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;

/// Install the Prometheus recorder and register metric descriptions.
///
/// Fails if a recorder is already installed.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    register_detector_metrics();
    Ok(handle)
}

/// Serve `/metrics` on the given port.
///
/// Binds before returning so an unavailable port is reported to the caller,
/// then serves from a background task.
pub async fn start_metrics_server(
    port: u16,
    handle: PrometheusHandle,
) -> Result<SocketAddr, std::io::Error> {
    let app = Router::new().route(
        "/metrics",
        get(move || {
            let handle = handle.clone();
            async move { handle.render() }
        }),
    );

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let local_addr = listener.local_addr()?;
    tracing::info!("Metrics server listening on http://{}/metrics", local_addr);

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::warn!("Metrics server stopped: {}", e);
        }
    });

    Ok(local_addr)
}

/// Register descriptions for the detector metrics.
///
/// Called automatically by [`init_metrics`].
fn register_detector_metrics() {
    // =========================================================================
    // Ingestion
    // =========================================================================

    describe_counter!(
        "detector_events_total",
        "Detection events submitted to the coordinator (label: source)"
    );
    describe_counter!(
        "detector_duplicates_total",
        "Detection events discarded as already seen (label: source)"
    );
    describe_counter!(
        "detector_push_malformed_total",
        "Push notifications that could not be parsed"
    );
    describe_counter!(
        "detector_push_ignored_total",
        "Push notifications of an unrelated event type"
    );
    describe_counter!(
        "detector_poll_cycles_total",
        "Poll cycles run (label: outcome = ok | error)"
    );
    describe_counter!(
        "detector_poll_records_total",
        "Activity records examined by the poller"
    );

    // =========================================================================
    // Admission
    // =========================================================================

    describe_counter!("detector_admitted_total", "Resources admitted by the gate");
    describe_counter!("detector_rejected_total", "Resources rejected by the gate");
    describe_counter!(
        "detector_metadata_errors_total",
        "Failed metadata lookups during admission"
    );
    describe_counter!(
        "detector_actions_total",
        "Action sink invocations (label: outcome = ok | failed)"
    );

    // =========================================================================
    // State
    // =========================================================================

    describe_gauge!(
        "detector_cache_entries",
        "Unique ids currently held by the signature cache"
    );
    describe_gauge!(
        "detector_running",
        "Whether the pipeline is running (1=yes, 0=no)"
    );
    describe_gauge!(
        "detector_inflight_admissions",
        "Admissions currently being validated or dispatched"
    );
}
