//! Unified error handling for switchboxd.
//!
//! Errors observed by a connection or endpoint worker are handled inside
//! that worker; they never propagate to a caller of the public API. This
//! enum exists for internal control flow and for the one line a worker logs
//! on its way out, not for a caller to match on.

use thiserror::Error;

/// Errors that can terminate a connection worker or cause an endpoint to
/// retry its listen.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("transport error: {0}")]
    TransportFailed(#[from] std::io::Error),

    #[error("handshake failed: {0}")]
    HandshakeFailed(#[from] switchbox_proto::ProtoError),

    #[error("authentication failed: {0}")]
    AuthFailed(String),

    #[error("no service connected for network {0:?}")]
    NoServiceForClient(String),

    #[error("displaced by a newer service connection for the same network name")]
    ServiceDisplaced,

    #[error("out of memory while accepting connection")]
    OutOfMemory,

    #[error("no bytes received within the silence timeout")]
    Silence,

    #[error("protocol violation on service transport: {0}")]
    ProtocolViolation(String),
}

impl RelayError {
    /// Short, stable label for logging/metrics, mirroring the error kinds
    /// in the design document.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::TransportFailed(_) => "transport_failed",
            Self::HandshakeFailed(_) => "handshake_failed",
            Self::AuthFailed(_) => "auth_failed",
            Self::NoServiceForClient(_) => "no_service_for_client",
            Self::ServiceDisplaced => "service_displaced",
            Self::OutOfMemory => "out_of_memory",
            Self::Silence => "silence",
            Self::ProtocolViolation(_) => "protocol_violation",
        }
    }
}
