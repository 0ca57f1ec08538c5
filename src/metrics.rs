//! Prometheus metrics for switchboxd.
//!
//! Observability is an ambient concern of the relay, not part of the
//! connection-routing core itself — these counters/gauges are updated by
//! callers in `network` and `root`, never read back by routing logic.

use lazy_static::lazy_static;
use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    /// Connections currently linked in the Root registry, any role.
    pub static ref CONNECTIONS_ACTIVE: IntGauge = IntGauge::new(
        "switchbox_connections_active",
        "Connections currently registered with Root"
    ).unwrap();

    /// Service connections currently `RoutingService`.
    pub static ref SERVICES_ACTIVE: IntGauge = IntGauge::new(
        "switchbox_services_active",
        "Service connections currently routing"
    ).unwrap();

    /// Total connections accepted since startup.
    pub static ref CONNECTIONS_ACCEPTED: IntCounter = IntCounter::new(
        "switchbox_connections_accepted_total",
        "Connections accepted across all endpoints"
    ).unwrap();

    /// Total connections terminated, by error kind (labelless counter here;
    /// kind is carried in the log line — see [`crate::error::RelayError::kind`]).
    pub static ref CONNECTIONS_TERMINATED: IntCounter = IntCounter::new(
        "switchbox_connections_terminated_total",
        "Connections terminated for any reason"
    ).unwrap();

    /// Clients rejected for `NoServiceForClient`.
    pub static ref ORPHAN_CLIENTS: IntCounter = IntCounter::new(
        "switchbox_orphan_clients_total",
        "Client connections dropped for lacking a matching service"
    ).unwrap();

    /// Service displacements observed.
    pub static ref SERVICE_DISPLACEMENTS: IntCounter = IntCounter::new(
        "switchbox_service_displacements_total",
        "Times a new service connection displaced an existing one"
    ).unwrap();

    /// Payload bytes routed through the multiplex frame path, either
    /// direction, summed.
    pub static ref BYTES_ROUTED: IntCounter = IntCounter::new(
        "switchbox_bytes_routed_total",
        "Payload bytes moved between client and service ring buffers"
    ).unwrap();

    /// Endpoint listener bind failures.
    pub static ref ENDPOINT_BIND_FAILURES: IntCounter = IntCounter::new(
        "switchbox_endpoint_bind_failures_total",
        "Endpoint listen/bind attempts that failed"
    ).unwrap();
}

/// Register every metric with the global registry. Must be called once at
/// startup before `/metrics` is served.
pub fn init() {
    REGISTRY.register(Box::new(CONNECTIONS_ACTIVE.clone())).unwrap();
    REGISTRY.register(Box::new(SERVICES_ACTIVE.clone())).unwrap();
    REGISTRY.register(Box::new(CONNECTIONS_ACCEPTED.clone())).unwrap();
    REGISTRY.register(Box::new(CONNECTIONS_TERMINATED.clone())).unwrap();
    REGISTRY.register(Box::new(ORPHAN_CLIENTS.clone())).unwrap();
    REGISTRY.register(Box::new(SERVICE_DISPLACEMENTS.clone())).unwrap();
    REGISTRY.register(Box::new(BYTES_ROUTED.clone())).unwrap();
    REGISTRY.register(Box::new(ENDPOINT_BIND_FAILURES.clone())).unwrap();
}

/// Render all registered metrics in Prometheus text exposition format.
pub fn gather_metrics() -> String {
    let metric_families = REGISTRY.gather();
    let mut buf = Vec::new();
    TextEncoder::new().encode(&metric_families, &mut buf).unwrap();
    String::from_utf8(buf).unwrap_or_default()
}

/// Serve `/metrics` for Prometheus scraping until the process exits.
pub async fn run_http_server(addr: std::net::SocketAddr) {
    use axum::{routing::get, Router};

    async fn metrics_handler() -> String {
        gather_metrics()
    }

    let app = Router::new().route("/metrics", get(metrics_handler));
    tracing::info!(%addr, "metrics endpoint listening");

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            tracing::error!(%addr, error = %e, "failed to bind metrics endpoint");
            return;
        }
    };
    if let Err(e) = axum::serve(listener, app).await {
        tracing::error!(error = %e, "metrics endpoint server error");
    }
}
