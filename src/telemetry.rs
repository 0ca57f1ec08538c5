//! Structured tracing spans carrying relay-specific context, so a
//! connection's whole lifecycle (handshake → auth → routing → terminate)
//! can be correlated in log aggregation by `connection_id` alone.

use tracing::{span, Level, Span};

/// Trace context for one accepted connection, attached as a span's fields
/// for the lifetime of its worker task.
#[derive(Debug, Clone)]
pub struct ConnectionTraceContext {
    pub connection_id: u64,
    pub peer_addr: Option<String>,
}

impl ConnectionTraceContext {
    pub fn new(connection_id: u64, peer_addr: std::net::SocketAddr) -> Self {
        Self {
            connection_id,
            peer_addr: Some(peer_addr.to_string()),
        }
    }

    /// Build the tracing span a connection worker should enter for its
    /// entire lifetime. `network_name` and `role` aren't known at accept
    /// time, so they're declared empty here and filled in later via
    /// [`Self::record_network_name`]/[`Self::record_role`] once the
    /// handshake classifies the peer.
    pub fn span(&self) -> Span {
        span!(
            Level::INFO,
            "connection",
            connection_id = self.connection_id,
            peer_addr = self.peer_addr.as_deref().unwrap_or("unknown"),
            network_name = tracing::field::Empty,
            role = "unclassified",
        )
    }

    /// Record the peer's cloud network name on an already-built span, once
    /// the handshake has classified it.
    pub fn record_network_name(span: &Span, name: &str) {
        span.record("network_name", name);
    }

    /// Record a connection's role on an already-built span, once
    /// classification completes.
    pub fn record_role(span: &Span, role: &'static str) {
        span.record("role", role);
    }
}

/// Initialize the global tracing subscriber. `json` selects structured JSON
/// output (suited to log aggregation); otherwise a human-readable format is
/// used.
pub fn init(json: bool) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    if json {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}
