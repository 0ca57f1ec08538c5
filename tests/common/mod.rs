//! Integration test common infrastructure: spawns real `switchboxd` binary
//! instances and drives them over real TCP, the same way a service or
//! client peer would.

pub mod client;
pub mod server;

pub use client::TestClient;
pub use server::TestServer;
