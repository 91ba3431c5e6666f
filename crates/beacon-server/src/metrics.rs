//! Metrics export for the Beacon server.
//!
//! Recording happens in `beacon-core`; this module describes the metrics
//! and exports them in Prometheus format.

use beacon_core::metrics::names;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;

/// Initialize the metrics system.
pub fn init_metrics() {
    // Describe metrics
    metrics::describe_counter!(
        names::CONNECTIONS_TOTAL,
        "Total number of connections since server start, by role"
    );
    metrics::describe_gauge!(
        names::CONNECTIONS_ACTIVE,
        "Current number of active connections, by role"
    );
    metrics::describe_gauge!(names::PUBLISHERS_ONLINE, "Drivers currently online");
    metrics::describe_counter!(
        names::LOCATIONS_PUBLISHED,
        "Total number of location updates accepted"
    );
    metrics::describe_counter!(
        names::ENVELOPES_DELIVERED,
        "Envelopes placed on outbound queues, by type"
    );
    metrics::describe_counter!(
        names::ENVELOPES_DROPPED,
        "Envelopes dropped because an outbound queue was full, by type"
    );
    metrics::describe_gauge!(names::SUBSCRIPTIONS_ACTIVE, "Current rider subscriptions");
    metrics::describe_counter!(
        names::SUBSCRIPTIONS_TOTAL,
        "Total number of rider subscriptions"
    );
    metrics::describe_counter!(names::ERRORS_TOTAL, "Total number of errors");

    info!("Metrics initialized");
}

/// Start the Prometheus metrics server.
///
/// # Errors
///
/// Returns an error if the server cannot be started.
pub fn start_metrics_server(port: u16) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    info!("Metrics server listening on {}", addr);
    Ok(())
}
