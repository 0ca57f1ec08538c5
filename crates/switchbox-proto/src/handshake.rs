//! Server side of the post-accept handshake.
//!
//! A freshly accepted peer sends one line classifying itself before any
//! other traffic flows:
//!
//! ```text
//! SBOX/1 <SERVICE|CLIENT> <cloud-network-name>\n
//! ```
//!
//! The byte-level layout of this handshake is inherited from the existing
//! IO protocol and is treated as opaque by the relay core; this module is
//! one concrete codec satisfying that contract, not a redesign of the wire
//! format. Implementations only need to agree with whatever peer they talk
//! to.

use crate::error::ProtoError;
use crate::mux::NETWORK_NAME_SZ;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Longest handshake line we are willing to buffer before giving up. Well
/// above any legal `SBOX/1 <role> <name>` line.
const MAX_HANDSHAKE_LINE: usize = 128;

/// How the peer identified itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerClientType {
    /// Offers an IO network behind NAT; at most one per network name.
    NetworkService,
    /// Wants to reach a service; many per network name.
    Client,
}

/// The information the handshake exposes on success.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeInfo {
    pub peer_cloud_netname: String,
    pub peer_client_type: PeerClientType,
}

/// Outcome of a completed handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeOutcome {
    pub info: HandshakeInfo,
}

/// A pluggable trust-certificate loader. This core never verifies
/// certificates itself (that belongs to the TLS layer and the credentials
/// database, both out of scope here); the seam exists so a caller that
/// wants cert pinning during handshake has somewhere to hook in.
pub trait TrustStore: Send + Sync {
    /// Return `true` if the handshake should proceed for this peer.
    /// The default store accepts every peer.
    fn accept(&self, _peer_cloud_netname: &str) -> bool {
        true
    }
}

/// A [`TrustStore`] that accepts every peer. Used when no authorization
/// policy is wired in, which is the expected case for this core.
#[derive(Debug, Default, Clone, Copy)]
pub struct AllowAllTrustStore;

impl TrustStore for AllowAllTrustStore {}

/// Drive the server side of the handshake to completion on `stream`.
///
/// Reads exactly one handshake line (never more), validates it, and writes
/// back `OK\n` or `ERR <reason>\n`. The caller's `stream` is left positioned
/// right after the handshake line; no bytes are over-read or buffered, so
/// the caller can freely treat the transport as raw afterwards.
pub async fn drive_handshake<S>(
    stream: &mut S,
    trust: &dyn TrustStore,
) -> Result<HandshakeOutcome, ProtoError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let line = read_line(stream).await?;
    match parse_handshake_line(&line) {
        Ok(info) => {
            if !trust.accept(&info.peer_cloud_netname) {
                stream.write_all(b"ERR denied\n").await?;
                return Err(ProtoError::HandshakeFailed(
                    "peer rejected by trust store".into(),
                ));
            }
            stream.write_all(b"OK\n").await?;
            Ok(HandshakeOutcome { info })
        }
        Err(reason) => {
            let msg = format!("ERR {}\n", reason);
            let _ = stream.write_all(msg.as_bytes()).await;
            Err(ProtoError::HandshakeFailed(reason))
        }
    }
}

async fn read_line<S>(stream: &mut S) -> Result<String, ProtoError>
where
    S: AsyncRead + Unpin,
{
    let mut buf = Vec::with_capacity(32);
    let mut byte = [0u8; 1];
    loop {
        let n = stream.read(&mut byte).await?;
        if n == 0 {
            return Err(ProtoError::Disconnected);
        }
        if byte[0] == b'\n' {
            break;
        }
        buf.push(byte[0]);
        if buf.len() > MAX_HANDSHAKE_LINE {
            return Err(ProtoError::HandshakeFailed("handshake line too long".into()));
        }
    }
    String::from_utf8(buf).map_err(|_| ProtoError::HandshakeFailed("handshake line not utf-8".into()))
}

fn parse_handshake_line(line: &str) -> Result<HandshakeInfo, String> {
    let line = line.trim_end_matches('\r');
    let mut parts = line.split_ascii_whitespace();

    let magic = parts.next().ok_or_else(|| "empty handshake line".to_string())?;
    if magic != "SBOX/1" {
        return Err(format!("unrecognized handshake magic {magic:?}"));
    }

    let role = parts.next().ok_or_else(|| "missing role".to_string())?;
    let peer_client_type = match role {
        "SERVICE" => PeerClientType::NetworkService,
        "CLIENT" => PeerClientType::Client,
        other => return Err(format!("unknown role {other:?}")),
    };

    let netname = parts.next().ok_or_else(|| "missing network name".to_string())?;
    if netname.is_empty() || netname.len() > NETWORK_NAME_SZ {
        return Err(format!(
            "network name length {} out of bounds (1..={NETWORK_NAME_SZ})",
            netname.len()
        ));
    }

    if parts.next().is_some() {
        return Err("trailing data on handshake line".to_string());
    }

    Ok(HandshakeInfo {
        peer_cloud_netname: netname.to_string(),
        peer_client_type,
    })
}
