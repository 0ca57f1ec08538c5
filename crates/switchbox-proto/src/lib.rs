//! # switchbox-proto
//!
//! Wire-level building blocks for the switchbox relay: the post-accept
//! handshake that classifies a peer as a network service or a client, the
//! single authentication-frame exchange service peers perform before any
//! multiplexed traffic flows, and the `(client_id, length)` framing used to
//! multiplex client byte streams onto one shared service transport.
//!
//! None of the codecs here inspect or transform payload bytes. They exist
//! to get a freshly accepted socket to the point where the relay core knows
//! *who* it is talking to and can start moving bytes.

#![deny(clippy::all)]

mod auth;
mod error;
mod handshake;
mod mux;

pub use auth::{AuthFrameCodec, AuthResult};
pub use error::ProtoError;
pub use handshake::{
    AllowAllTrustStore, HandshakeInfo, HandshakeOutcome, PeerClientType, TrustStore, drive_handshake,
};
pub use auth::MAX_AUTH_FRAME_SZ;
pub use mux::{FrameHeader, FrameKind, NETWORK_NAME_SZ, NEW_CONNECTION_SENTINEL, SBOX_HDR_SIZE};
