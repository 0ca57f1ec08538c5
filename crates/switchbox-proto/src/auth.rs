//! Authentication-frame exchange for service peers.
//!
//! Once the handshake classifies a peer as a network service, the relay and
//! the peer each send one length-prefixed frame before any multiplexed
//! traffic begins: the relay sends its own identity, the peer sends
//! whatever credentials it was configured with. Privilege enforcement on
//! the received frame is a collaborator's job (an authentication-credentials
//! database); this codec only gets the bytes across and hands them back as
//! an opaque result.

use crate::error::ProtoError;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Largest authentication frame this codec will allocate a buffer for.
pub const MAX_AUTH_FRAME_SZ: u32 = 8192;

/// The peer's authentication frame, treated as opaque payload bytes.
/// Whether it grants access to anything is decided elsewhere.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthResult {
    pub payload: Vec<u8>,
}

/// Length-prefixed (`u32` little-endian) authentication frame codec.
pub struct AuthFrameCodec;

impl AuthFrameCodec {
    /// Send the relay's own identity as one authentication frame.
    pub async fn send_identity<S>(stream: &mut S, identity: &[u8]) -> Result<(), ProtoError>
    where
        S: AsyncWrite + Unpin,
    {
        if identity.len() as u64 > MAX_AUTH_FRAME_SZ as u64 {
            return Err(ProtoError::AuthFailed("identity frame too large to send".into()));
        }
        let len = identity.len() as u32;
        stream.write_all(&len.to_le_bytes()).await?;
        stream.write_all(identity).await?;
        Ok(())
    }

    /// Receive one authentication frame from the peer.
    pub async fn recv_auth<S>(stream: &mut S) -> Result<AuthResult, ProtoError>
    where
        S: AsyncRead + Unpin,
    {
        let mut len_buf = [0u8; 4];
        stream.read_exact(&mut len_buf).await?;
        let len = u32::from_le_bytes(len_buf);
        if len > MAX_AUTH_FRAME_SZ {
            return Err(ProtoError::AuthFailed(format!(
                "authentication frame of {len} bytes exceeds {MAX_AUTH_FRAME_SZ}"
            )));
        }

        let mut payload = vec![0u8; len as usize];
        stream.read_exact(&mut payload).await?;
        Ok(AuthResult { payload })
    }
}
