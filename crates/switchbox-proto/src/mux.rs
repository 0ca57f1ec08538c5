//! `(client_id, length)` frame header carried on the service-facing transport.
//!
//! After handshake and (for service peers) authentication, every byte that
//! crosses the shared service transport is prefixed by one of these headers.
//! A header with `length == NEW_CONNECTION_SENTINEL` stands alone and
//! announces that `client_id` now exists; any other length is followed by
//! exactly that many payload bytes.

/// Size in bytes of one encoded [`FrameHeader`]: a `u16` client id followed
/// by a `u16` length, both little-endian.
pub const SBOX_HDR_SIZE: usize = 4;

/// Reserved `length` value meaning "this client id now exists", rather than
/// a payload byte count. Chosen as the maximum `u16` so it can never collide
/// with a legal payload length (payloads are capped well below this by ring
/// buffer capacity).
pub const NEW_CONNECTION_SENTINEL: u16 = 0xFFFF;

/// Maximum length of a cloud network name, in bytes.
pub const NETWORK_NAME_SZ: usize = 16;

/// A decoded multiplex frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub client_id: u16,
    pub length: u16,
}

/// What a [`FrameHeader`] means once its length field is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// `client_id` now exists; no payload follows.
    NewConnection { client_id: u16 },
    /// `client_id` carries `len` bytes of payload immediately following.
    Payload { client_id: u16, len: u16 },
}

impl FrameHeader {
    pub fn new_connection(client_id: u16) -> Self {
        Self {
            client_id,
            length: NEW_CONNECTION_SENTINEL,
        }
    }

    pub fn payload(client_id: u16, len: u16) -> Self {
        debug_assert!(
            len != NEW_CONNECTION_SENTINEL,
            "payload length collides with the NEW_CONNECTION sentinel"
        );
        Self { client_id, length: len }
    }

    /// Interpret the header's length field.
    pub fn kind(self) -> FrameKind {
        if self.length == NEW_CONNECTION_SENTINEL {
            FrameKind::NewConnection {
                client_id: self.client_id,
            }
        } else {
            FrameKind::Payload {
                client_id: self.client_id,
                len: self.length,
            }
        }
    }

    /// Encode into the fixed-size wire form, little-endian.
    pub fn encode(self) -> [u8; SBOX_HDR_SIZE] {
        let mut buf = [0u8; SBOX_HDR_SIZE];
        buf[0..2].copy_from_slice(&self.client_id.to_le_bytes());
        buf[2..4].copy_from_slice(&self.length.to_le_bytes());
        buf
    }

    /// Decode from exactly [`SBOX_HDR_SIZE`] bytes.
    pub fn decode(buf: &[u8; SBOX_HDR_SIZE]) -> Self {
        let client_id = u16::from_le_bytes([buf[0], buf[1]]);
        let length = u16::from_le_bytes([buf[2], buf[3]]);
        Self { client_id, length }
    }
}
