//! Prometheus metrics helpers for Keepsake.
//!
//! # Usage
//!
//! ```rust,ignore
//! use keepsake_core::metrics::{try_init_metrics, start_metrics_server};
//!
//! let handle = try_init_metrics().expect("recorder already installed");
//! start_metrics_server(9090, handle).await?;
//! ```
//!
//! # Metric Naming Conventions
//!
//! - Prefix: pass name (`fetch_`, `broadcast_`) or `relay_` for per-relay events
//! - Suffix: unit or type (`_total`, `_seconds`)
//! - Labels: only small closed sets (`pass`, `reason`, `accepted`)

use axum::{Router, routing::get};
use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;

/// Install the Prometheus recorder and register metric descriptions.
///
/// Returns `None` if a recorder is already installed.
pub fn try_init_metrics() -> Option<PrometheusHandle> {
    let handle = PrometheusBuilder::new().install_recorder().ok()?;
    register_common_metrics();
    Some(handle)
}

/// Serve `/metrics` on the given port from a background task.
///
/// The listener is bound before returning so a port clash is reported to the
/// caller instead of being lost inside the task.
pub async fn start_metrics_server(
    port: u16,
    handle: PrometheusHandle,
) -> Result<(), std::io::Error> {
    let app = Router::new().route(
        "/metrics",
        get(move || {
            let handle = handle.clone();
            async move { handle.render() }
        }),
    );

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Metrics server listening on http://{}/metrics", addr);

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::warn!("Metrics server stopped: {}", e);
        }
    });

    Ok(())
}

/// Register descriptions for every metric Keepsake emits.
fn register_common_metrics() {
    // =========================================================================
    // Fetch pass
    // =========================================================================

    describe_counter!(
        "fetch_records_received_total",
        "Records delivered by relays during fetch passes, duplicates included"
    );
    describe_counter!(
        "fetch_records_accepted_total",
        "Records newly added to the dedup store"
    );
    describe_counter!(
        "fetch_records_filtered_total",
        "Contact lists of other identities discarded during fetch"
    );

    // =========================================================================
    // Broadcast pass
    // =========================================================================

    describe_counter!(
        "broadcast_records_sent_total",
        "Records published to relays during broadcast passes"
    );
    describe_counter!(
        "broadcast_acks_total",
        "OK acknowledgments received, labelled by accepted=true|false"
    );

    // =========================================================================
    // Relays and passes
    // =========================================================================

    describe_gauge!(
        "relays_in_flight",
        "Relay sessions currently open (bounded by the batch size)"
    );
    describe_counter!(
        "relay_sessions_total",
        "Relay sessions that settled, labelled by pass and outcome"
    );
    describe_counter!(
        "relay_failures_total",
        "Relay sessions that failed, labelled by reason"
    );
    describe_histogram!(
        "pass_duration_seconds",
        "Wall-clock duration of fetch and broadcast passes"
    );
}
