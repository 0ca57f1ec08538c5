//! Connection worker: the per-accepted-socket state machine.
//!
//! ```text
//! Accepted -> Handshaking -> AuthenticatingService -> RoutingService -> Terminating
//!                         \-> RoutingClient -------------------------> Terminating
//! ```
//!
//! Each worker is one tokio task, not one OS thread — the reference design's
//! "thread per Connection" maps onto tokio's scheduler the same way the
//! teacher's own per-peer tasks do. See `DESIGN.md` for why.

mod client_loop;
mod service_loop;

use crate::error::RelayError;
use crate::root::{ConnectionId, Root};
use crate::telemetry::ConnectionTraceContext;
use std::net::SocketAddr;
use std::time::Duration;
use switchbox_proto::{drive_handshake, AllowAllTrustStore, AuthFrameCodec, PeerClientType, ProtoError};
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tracing::{info, warn, Instrument, Span};

/// Map a [`ProtoError`] raised during the post-handshake auth exchange onto
/// the matching [`RelayError`] kind. `AuthFailed` and transport errors keep
/// their own kind rather than collapsing into `HandshakeFailed`, since the
/// handshake itself already completed by the time this runs.
fn auth_error(e: ProtoError) -> RelayError {
    match e {
        ProtoError::AuthFailed(reason) => RelayError::AuthFailed(reason),
        ProtoError::Io(io_err) => RelayError::TransportFailed(io_err),
        other => RelayError::AuthFailed(other.to_string()),
    }
}

/// One accepted transport connection, driven from handshake through
/// termination.
pub struct Connection {
    root: Root,
    stream: TcpStream,
    peer_addr: SocketAddr,
    server_name: String,
    silence_timeout: Duration,
    check_timeouts: Duration,
}

impl Connection {
    pub fn new(
        root: Root,
        stream: TcpStream,
        peer_addr: SocketAddr,
        server_name: String,
        silence_timeout: Duration,
        check_timeouts: Duration,
    ) -> Self {
        Self {
            root,
            stream,
            peer_addr,
            server_name,
            silence_timeout,
            check_timeouts,
        }
    }

    /// Drive this connection to completion: handshake, then (depending on
    /// peer role) authentication plus service routing, or straight into
    /// client routing. Always unlinks from the registry on the way out,
    /// whatever the outcome.
    pub async fn run(mut self, shutdown: broadcast::Receiver<()>) {
        let (id, notify) = self.root.register();
        let ctx = ConnectionTraceContext::new(id.raw(), self.peer_addr);
        let span = ctx.span();

        crate::metrics::CONNECTIONS_ACTIVE.inc();
        let result = self
            .drive(id, &notify, shutdown, span.clone())
            .instrument(span)
            .await;
        match &result {
            Ok(()) => info!(connection_id = %id, "connection closed"),
            Err(e) => warn!(connection_id = %id, error = %e, kind = e.kind(), "connection terminated"),
        }
        self.root.unlink(id);
        crate::metrics::CONNECTIONS_ACTIVE.dec();
        crate::metrics::CONNECTIONS_TERMINATED.inc();
    }

    async fn drive(
        &mut self,
        id: ConnectionId,
        notify: &std::sync::Arc<tokio::sync::Notify>,
        shutdown: broadcast::Receiver<()>,
        span: Span,
    ) -> Result<(), RelayError> {
        let outcome = tokio::time::timeout(
            self.silence_timeout,
            drive_handshake(&mut self.stream, &AllowAllTrustStore),
        )
        .await
        .map_err(|_| RelayError::Silence)??;
        self.root.touch_receive(id);

        ConnectionTraceContext::record_network_name(&span, &outcome.info.peer_cloud_netname);

        match outcome.info.peer_client_type {
            PeerClientType::NetworkService => {
                ConnectionTraceContext::record_role(&span, "service");
                self.run_as_service(id, notify, outcome.info.peer_cloud_netname, shutdown)
                    .await
            }
            PeerClientType::Client => {
                ConnectionTraceContext::record_role(&span, "client");
                self.run_as_client(id, notify, outcome.info.peer_cloud_netname, shutdown)
                    .await
            }
        }
    }

    async fn run_as_service(
        &mut self,
        id: ConnectionId,
        notify: &std::sync::Arc<tokio::sync::Notify>,
        network_name: String,
        shutdown: broadcast::Receiver<()>,
    ) -> Result<(), RelayError> {
        AuthFrameCodec::send_identity(&mut self.stream, self.server_name.as_bytes())
            .await
            .map_err(auth_error)?;
        self.root.classify_service(id, network_name);
        let _peer_identity = AuthFrameCodec::recv_auth(&mut self.stream)
            .await
            .map_err(auth_error)?;
        self.root.mark_service_auth_sent(id);
        self.root.mark_service_auth_received(id);
        if !self.root.service_auth_complete(id) {
            return Err(RelayError::AuthFailed(
                "auth handshake did not complete".into(),
            ));
        }

        crate::metrics::SERVICES_ACTIVE.inc();
        let result = service_loop::run(
            &mut self.stream,
            &self.root,
            id,
            notify,
            self.check_timeouts,
            self.silence_timeout,
            shutdown,
        )
        .await;
        crate::metrics::SERVICES_ACTIVE.dec();
        result
    }

    async fn run_as_client(
        &mut self,
        id: ConnectionId,
        notify: &std::sync::Arc<tokio::sync::Notify>,
        network_name: String,
        shutdown: broadcast::Receiver<()>,
    ) -> Result<(), RelayError> {
        self.root.classify_client(id, network_name)?;
        client_loop::run(
            &mut self.stream,
            &self.root,
            id,
            notify,
            self.check_timeouts,
            self.silence_timeout,
            shutdown,
        )
        .await
    }
}
