//! Transport-facing half of the relay: endpoint listeners and the
//! per-connection worker state machine they spawn.

pub mod connection;
pub mod endpoint;
pub mod ring_buffer;

pub use connection::Connection;
pub use endpoint::Endpoint;
