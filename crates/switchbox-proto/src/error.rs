use thiserror::Error;

/// Errors surfaced by the handshake, authentication and mux codecs.
#[derive(Debug, Error)]
pub enum ProtoError {
    #[error("handshake protocol violation: {0}")]
    HandshakeFailed(String),

    #[error("authentication frame invalid: {0}")]
    AuthFailed(String),

    #[error("peer closed the connection")]
    Disconnected,

    #[error("transport error: {0}")]
    Io(#[from] std::io::Error),
}
