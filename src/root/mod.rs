//! The Root registry: the relay's single source of truth for which
//! connections exist, which one is the service for a given cloud network
//! name, and which clients are attached to it.
//!
//! Every field another worker might read — network name, role, client id,
//! list linkage, stop flag — lives behind one [`parking_lot::Mutex`]. A
//! connection's own transport socket never does; only the worker that owns
//! it touches it. This trades the reference design's "per-object mutex plus
//! a separate global mutex" for a single lock around all shared state, which
//! is simpler to get right in owned Rust and is explicitly sanctioned by the
//! design notes this core was distilled from.

mod client_id;

pub use client_id::ClientIdAllocator;

use crate::error::RelayError;
use crate::network::ring_buffer::RingBuffer;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use switchbox_proto::{FrameHeader, FrameKind, SBOX_HDR_SIZE};
use tokio::sync::{broadcast, Notify};
use tracing::trace;

/// Ring buffer capacity used for every connection's incoming and outgoing
/// buffers, in bytes.
pub const DEFAULT_RING_CAPACITY: usize = 8192;

/// Identifies one [`ConnectionEntry`] for the lifetime of the registry.
/// Never reused even after the connection it names is unlinked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn raw(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One client attached to a service, as seen from the service's side.
#[derive(Debug)]
struct ClientLink {
    id: ConnectionId,
    client_id: u16,
    new_connection_msg_sent: bool,
}

/// Parse state for the service→clients demultiplex stream. Persists across
/// worker wakeups since a header or payload can straddle two socket reads.
#[derive(Debug)]
enum DemuxState {
    HeaderPending {
        scratch: Vec<u8>,
    },
    PayloadPending {
        client_id: u16,
        remaining: u16,
        /// Set once the target client id turns out not to exist; the
        /// remaining payload bytes are discarded rather than routed.
        discard: bool,
    },
}

impl Default for DemuxState {
    fn default() -> Self {
        DemuxState::HeaderPending {
            scratch: Vec::with_capacity(SBOX_HDR_SIZE),
        }
    }
}

struct ServiceState {
    network_name: String,
    clients: Vec<ClientLink>,
    cursor: usize,
    demux: DemuxState,
    auth_sent: bool,
    auth_received: bool,
}

struct ClientState {
    network_name: String,
    client_id: u16,
    service: Option<ConnectionId>,
}

enum Role {
    /// Accepted, handshake not yet resolved.
    Unclassified,
    Service(ServiceState),
    Client(ClientState),
}

struct ConnectionEntry {
    role: Role,
    /// Bytes this connection's own worker has read from its own socket,
    /// awaiting routing (demuxed to clients for a service, or handed to the
    /// service worker's mux pass for a client).
    incoming: RingBuffer,
    /// Bytes staged for this connection's own worker to write to its own
    /// socket.
    outgoing: RingBuffer,
    last_receive: Instant,
    stopping: bool,
    notify: Arc<Notify>,
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    connections: HashMap<ConnectionId, ConnectionEntry>,
    service_by_name: HashMap<String, ConnectionId>,
    client_id_alloc: ClientIdAllocator,
    in_use_client_ids: HashSet<u16>,
}

impl Registry {
    fn alloc_id(&mut self) -> ConnectionId {
        self.next_id += 1;
        ConnectionId(self.next_id)
    }

    /// Flip a still-present connection's stop flag and return its notify
    /// handle so the caller can wake it outside the lock. Idempotent.
    fn mark_stopping(&mut self, id: ConnectionId) -> Option<Arc<Notify>> {
        let entry = self.connections.get_mut(&id)?;
        entry.stopping = true;
        Some(entry.notify.clone())
    }
}

/// Handle to the process-wide registry. Cheap to clone; every clone shares
/// the same underlying state.
#[derive(Clone)]
pub struct Root {
    locked: Arc<Mutex<Registry>>,
    shutdown_tx: broadcast::Sender<()>,
}

impl Root {
    pub fn new() -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            locked: Arc::new(Mutex::new(Registry::default())),
            shutdown_tx,
        }
    }

    /// Register a freshly accepted, not-yet-classified connection. Returns
    /// its id and the notify handle its worker should wait on alongside its
    /// transport and timeout.
    pub fn register(&self) -> (ConnectionId, Arc<Notify>) {
        let mut reg = self.locked.lock();
        let id = reg.alloc_id();
        let notify = Arc::new(Notify::new());
        reg.connections.insert(
            id,
            ConnectionEntry {
                role: Role::Unclassified,
                incoming: RingBuffer::new(DEFAULT_RING_CAPACITY),
                outgoing: RingBuffer::new(DEFAULT_RING_CAPACITY),
                last_receive: Instant::now(),
                stopping: false,
                notify: notify.clone(),
            },
        );
        (id, notify)
    }

    /// Classify a connection as the service for `network_name`. Displaces
    /// any other connection currently serving that name: the prior one is
    /// flagged to stop, and will unlink (and cascade-stop its own clients)
    /// on its next wakeup.
    pub fn classify_service(&self, id: ConnectionId, network_name: String) {
        let mut reg = self.locked.lock();
        let displaced = reg
            .service_by_name
            .get(&network_name)
            .copied()
            .filter(|existing| *existing != id);
        let woken = displaced.and_then(|d| reg.mark_stopping(d));
        if displaced.is_some() {
            crate::metrics::SERVICE_DISPLACEMENTS.inc();
        }

        reg.service_by_name.insert(network_name.clone(), id);
        if let Some(entry) = reg.connections.get_mut(&id) {
            entry.role = Role::Service(ServiceState {
                network_name,
                clients: Vec::new(),
                cursor: 0,
                demux: DemuxState::default(),
                auth_sent: false,
                auth_received: false,
            });
        }
        drop(reg);
        if let Some(notify) = woken {
            notify.notify_one();
        }
    }

    pub fn mark_service_auth_sent(&self, id: ConnectionId) {
        self.with_service_mut(id, |s| s.auth_sent = true);
    }

    pub fn mark_service_auth_received(&self, id: ConnectionId) {
        self.with_service_mut(id, |s| s.auth_received = true);
    }

    pub fn service_auth_complete(&self, id: ConnectionId) -> bool {
        let reg = self.locked.lock();
        matches!(
            reg.connections.get(&id).map(|e| &e.role),
            Some(Role::Service(s)) if s.auth_sent && s.auth_received
        )
    }

    fn with_service_mut(&self, id: ConnectionId, f: impl FnOnce(&mut ServiceState)) {
        let mut reg = self.locked.lock();
        if let Some(Role::Service(s)) = reg.connections.get_mut(&id).map(|e| &mut e.role) {
            f(s);
        }
    }

    /// Find the current service connection for `network_name`, excluding
    /// `except` (used by displacement to ask "is there one *other than me*
    /// already here").
    pub fn find_service(&self, network_name: &str, except: Option<ConnectionId>) -> Option<ConnectionId> {
        let reg = self.locked.lock();
        reg.service_by_name
            .get(network_name)
            .copied()
            .filter(|id| Some(*id) != except)
    }

    /// Classify a connection as a client of the current service for
    /// `network_name`, assigning it a fresh client id. Fails with
    /// [`RelayError::NoServiceForClient`] if no service currently exists.
    pub fn classify_client(&self, id: ConnectionId, network_name: String) -> Result<u16, RelayError> {
        let mut reg = self.locked.lock();
        let Some(service_id) = reg.service_by_name.get(&network_name).copied() else {
            crate::metrics::ORPHAN_CLIENTS.inc();
            return Err(RelayError::NoServiceForClient(network_name));
        };
        let client_id = reg.client_id_alloc.allocate(&reg.in_use_client_ids);
        reg.in_use_client_ids.insert(client_id);

        if let Some(entry) = reg.connections.get_mut(&id) {
            entry.role = Role::Client(ClientState {
                network_name,
                client_id,
                service: Some(service_id),
            });
        }
        if let Some(Role::Service(service)) = reg.connections.get_mut(&service_id).map(|e| &mut e.role) {
            service.clients.push(ClientLink {
                id,
                client_id,
                new_connection_msg_sent: false,
            });
        }
        Ok(client_id)
    }

    /// Remove a connection from the registry, cascading: a service takes
    /// its attached clients down with it; a client frees its id and its
    /// slot in the service's client list.
    pub fn unlink(&self, id: ConnectionId) {
        let mut reg = self.locked.lock();
        let Some(entry) = reg.connections.remove(&id) else {
            return;
        };
        let mut woken = Vec::new();
        match entry.role {
            Role::Service(service) => {
                if reg.service_by_name.get(&service.network_name) == Some(&id) {
                    reg.service_by_name.remove(&service.network_name);
                }
                for link in &service.clients {
                    reg.in_use_client_ids.remove(&link.client_id);
                    if let Some(notify) = reg.mark_stopping(link.id) {
                        woken.push(notify);
                    }
                }
            }
            Role::Client(client) => {
                reg.in_use_client_ids.remove(&client.client_id);
                if let Some(service_id) = client.service {
                    if let Some(Role::Service(service)) =
                        reg.connections.get_mut(&service_id).map(|e| &mut e.role)
                    {
                        service.clients.retain(|l| l.id != id);
                    }
                }
            }
            Role::Unclassified => {}
        }
        drop(reg);
        for notify in woken {
            notify.notify_one();
        }
    }

    /// Flag a connection to stop at its next wakeup without removing it
    /// from the registry; the connection's own worker calls [`Self::unlink`]
    /// once it actually exits.
    pub fn request_stop(&self, id: ConnectionId) {
        let mut reg = self.locked.lock();
        let notify = reg.mark_stopping(id);
        drop(reg);
        if let Some(notify) = notify {
            notify.notify_one();
        }
    }

    pub fn is_stopping(&self, id: ConnectionId) -> bool {
        self.locked
            .lock()
            .connections
            .get(&id)
            .map(|e| e.stopping)
            .unwrap_or(true)
    }

    pub fn touch_receive(&self, id: ConnectionId) {
        if let Some(entry) = self.locked.lock().connections.get_mut(&id) {
            entry.last_receive = Instant::now();
        }
    }

    pub fn silence_elapsed(&self, id: ConnectionId, threshold: Duration) -> bool {
        self.locked
            .lock()
            .connections
            .get(&id)
            .map(|e| e.last_receive.elapsed() >= threshold)
            .unwrap_or(false)
    }

    /// Free space in `id`'s own incoming ring buffer, i.e. how many bytes a
    /// worker may read from its socket before the next ingest.
    pub fn incoming_space(&self, id: ConnectionId) -> usize {
        self.locked
            .lock()
            .connections
            .get(&id)
            .map(|e| e.incoming.space())
            .unwrap_or(0)
    }

    /// Copy freshly read socket bytes into `id`'s own incoming buffer.
    /// Returns the number of bytes actually accepted (bounded by space).
    pub fn ingest(&self, id: ConnectionId, data: &[u8]) -> usize {
        self.locked
            .lock()
            .connections
            .get_mut(&id)
            .map(|e| e.incoming.write(data))
            .unwrap_or(0)
    }

    /// Copy as many bytes as fit out of `id`'s own outgoing buffer, for the
    /// worker to write to its socket.
    pub fn drain_outgoing(&self, id: ConnectionId, dst: &mut [u8]) -> usize {
        self.locked
            .lock()
            .connections
            .get_mut(&id)
            .map(|e| e.outgoing.read_into(dst))
            .unwrap_or(0)
    }

    pub fn outgoing_has_bytes(&self, id: ConnectionId) -> bool {
        self.locked
            .lock()
            .connections
            .get(&id)
            .map(|e| !e.outgoing.is_empty())
            .unwrap_or(false)
    }

    /// Notify handle of the service a client connection is attached to, so
    /// a client worker can wake it after making forward progress.
    pub fn service_notify(&self, client_id: ConnectionId) -> Option<Arc<Notify>> {
        let reg = self.locked.lock();
        let Role::Client(client) = &reg.connections.get(&client_id)?.role else {
            return None;
        };
        let service_id = client.service?;
        reg.connections.get(&service_id).map(|e| e.notify.clone())
    }

    /// Run one pass of the service routing algorithm: demux socket bytes
    /// into attached clients' outgoing buffers, then mux clients' pending
    /// bytes (plus any un-announced `NEW_CONNECTION` headers) into the
    /// service's own outgoing buffer. Entire pass runs under one lock
    /// acquisition, matching the "under Root mutex" contract.
    pub fn service_tick(&self, service_id: ConnectionId) -> Result<(), RelayError> {
        let mut reg = self.locked.lock();
        let Some(mut service_entry) = reg.connections.remove(&service_id) else {
            return Ok(());
        };
        let result = run_service_tick(&mut reg, &mut service_entry);
        reg.connections.insert(service_id, service_entry);
        result
    }

    pub fn connection_count(&self) -> usize {
        self.locked.lock().connections.len()
    }

    pub fn subscribe_shutdown(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Request every connection currently registered stop, and broadcast a
    /// shutdown signal for endpoint listeners waiting on it. Mirrors
    /// `terminate_all_threads` from the reference design.
    pub fn request_shutdown(&self) {
        let _ = self.shutdown_tx.send(());
        let ids: Vec<ConnectionId> = self.locked.lock().connections.keys().copied().collect();
        for id in ids {
            self.request_stop(id);
        }
    }
}

impl Default for Root {
    fn default() -> Self {
        Self::new()
    }
}

/// The body of [`Root::service_tick`], split out so it can take `service_entry`
/// by exclusive reference while `reg` (minus the service's own entry) is
/// free for client lookups.
fn run_service_tick(reg: &mut Registry, service_entry: &mut ConnectionEntry) -> Result<(), RelayError> {
    let Role::Service(service) = &mut service_entry.role else {
        return Ok(());
    };

    demux_into_clients(reg, service, &mut service_entry.incoming)?;
    mux_from_clients(reg, service, &mut service_entry.outgoing);
    Ok(())
}

fn demux_into_clients(
    reg: &mut Registry,
    service: &mut ServiceState,
    service_incoming: &mut RingBuffer,
) -> Result<(), RelayError> {
    loop {
        match &mut service.demux {
            DemuxState::HeaderPending { scratch } => {
                let need = SBOX_HDR_SIZE - scratch.len();
                if need == 0 {
                    let mut raw = [0u8; SBOX_HDR_SIZE];
                    raw.copy_from_slice(scratch);
                    let header = FrameHeader::decode(&raw);
                    match header.kind() {
                        FrameKind::NewConnection { .. } => {
                            return Err(RelayError::ProtocolViolation(
                                "NEW_CONNECTION sentinel received from service direction".into(),
                            ));
                        }
                        FrameKind::Payload { client_id, len } => {
                            let discard = !service.clients.iter().any(|c| c.client_id == client_id);
                            service.demux = DemuxState::PayloadPending {
                                client_id,
                                remaining: len,
                                discard,
                            };
                        }
                    }
                    continue;
                }
                let mut tmp = [0u8; SBOX_HDR_SIZE];
                let grabbed = service_incoming.read_into(&mut tmp[..need]);
                if grabbed == 0 {
                    return Ok(());
                }
                scratch.extend_from_slice(&tmp[..grabbed]);
            }
            DemuxState::PayloadPending {
                client_id,
                remaining,
                discard,
            } => {
                if *remaining == 0 {
                    service.demux = DemuxState::default();
                    continue;
                }
                if *discard {
                    let n = service_incoming.discard(*remaining as usize) as u16;
                    if n == 0 {
                        return Ok(());
                    }
                    *remaining -= n;
                    continue;
                }
                let cid = *client_id;
                let Some(client_conn_id) = service.clients.iter().find(|c| c.client_id == cid).map(|c| c.id)
                else {
                    *discard = true;
                    continue;
                };
                let Some(client_entry) = reg.connections.get_mut(&client_conn_id) else {
                    *discard = true;
                    continue;
                };
                let n = client_entry.outgoing.move_from(service_incoming, *remaining as usize) as u16;
                if n == 0 {
                    return Ok(());
                }
                crate::metrics::BYTES_ROUTED.inc_by(n as u64);
                *remaining -= n;
            }
        }
    }
}

fn mux_from_clients(reg: &mut Registry, service: &mut ServiceState, service_outgoing: &mut RingBuffer) {
    let n = service.clients.len();
    if n == 0 {
        return;
    }
    service.cursor = (service.cursor + 1) % n;

    // Pending NEW_CONNECTION announcements go out first, in client-list
    // (insertion) order, regardless of the round-robin cursor.
    for link in service.clients.iter_mut() {
        if link.new_connection_msg_sent {
            continue;
        }
        if service_outgoing.space() < SBOX_HDR_SIZE {
            break;
        }
        let header = FrameHeader::new_connection(link.client_id);
        service_outgoing.write(&header.encode());
        link.new_connection_msg_sent = true;
        trace!(client_id = link.client_id, "emitted NEW_CONNECTION header");
    }

    for i in 0..n {
        let idx = (service.cursor + i) % n;
        let (client_conn_id, client_id) = (service.clients[idx].id, service.clients[idx].client_id);
        let Some(client_entry) = reg.connections.get_mut(&client_conn_id) else {
            continue;
        };
        let available = client_entry.incoming.bytes();
        if available == 0 {
            continue;
        }
        let free = service_outgoing.space();
        if free < SBOX_HDR_SIZE + 1 {
            break;
        }
        let budget = (free - SBOX_HDR_SIZE).min(u16::MAX as usize - 1);
        let n_bytes = available.min(budget);
        if n_bytes == 0 {
            continue;
        }
        let header = FrameHeader::payload(client_id, n_bytes as u16);
        service_outgoing.write(&header.encode());
        service_outgoing.move_from(&mut client_entry.incoming, n_bytes);
        crate::metrics::BYTES_ROUTED.inc_by(n_bytes as u64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn solo_service_then_client_join_assigns_nonzero_id_and_emits_new_connection() {
        let root = Root::new();
        let (svc_id, _svc_notify) = root.register();
        root.classify_service(svc_id, "netA".to_string());
        assert_eq!(root.find_service("netA", None), Some(svc_id));

        let (client_id_conn, _client_notify) = root.register();
        let client_id = root.classify_client(client_id_conn, "netA".to_string()).unwrap();
        assert_ne!(client_id, 0);

        root.service_tick(svc_id).unwrap();
        let mut out = [0u8; SBOX_HDR_SIZE];
        assert_eq!(root.drain_outgoing(svc_id, &mut out), SBOX_HDR_SIZE);
        let header = FrameHeader::decode(&out);
        assert_eq!(header.kind(), FrameKind::NewConnection { client_id });
    }

    #[test]
    fn payload_round_trips_client_to_service_and_back() {
        let root = Root::new();
        let (svc_id, _n1) = root.register();
        root.classify_service(svc_id, "netA".to_string());
        let (client_conn, _n2) = root.register();
        let client_id = root.classify_client(client_conn, "netA".to_string()).unwrap();

        // Drain the NEW_CONNECTION header first, as the wire would.
        root.service_tick(svc_id).unwrap();
        let mut scratch = [0u8; SBOX_HDR_SIZE];
        root.drain_outgoing(svc_id, &mut scratch);

        root.ingest(client_conn, b"HELLO");
        root.service_tick(svc_id).unwrap();

        let mut hdr_buf = [0u8; SBOX_HDR_SIZE];
        assert_eq!(root.drain_outgoing(svc_id, &mut hdr_buf), SBOX_HDR_SIZE);
        let header = FrameHeader::decode(&hdr_buf);
        assert_eq!(header.kind(), FrameKind::Payload { client_id, len: 5 });
        let mut payload = [0u8; 5];
        assert_eq!(root.drain_outgoing(svc_id, &mut payload), 5);
        assert_eq!(&payload, b"HELLO");
    }

    #[test]
    fn displacement_marks_prior_service_stopping_and_cascades_to_its_clients() {
        let root = Root::new();
        let (svc_a, _) = root.register();
        root.classify_service(svc_a, "netA".to_string());
        let (client, _) = root.register();
        root.classify_client(client, "netA".to_string()).unwrap();

        let (svc_a2, _) = root.register();
        root.classify_service(svc_a2, "netA".to_string());

        assert!(root.is_stopping(svc_a));
        assert_eq!(root.find_service("netA", None), Some(svc_a2));

        // svc_a's own worker would now call unlink() as it tears down.
        root.unlink(svc_a);
        assert!(root.is_stopping(client));
    }

    #[test]
    fn client_with_no_matching_service_is_rejected() {
        let root = Root::new();
        let (client, _) = root.register();
        let err = root.classify_client(client, "netX".to_string()).unwrap_err();
        assert!(matches!(err, RelayError::NoServiceForClient(name) if name == "netX"));
    }

    #[test]
    fn unannounced_clients_get_new_connection_in_insertion_order_before_payloads() {
        let root = Root::new();
        let (svc_id, _) = root.register();
        root.classify_service(svc_id, "netA".to_string());
        let (c1, _) = root.register();
        let (c2, _) = root.register();
        let id1 = root.classify_client(c1, "netA".to_string()).unwrap();
        let id2 = root.classify_client(c2, "netA".to_string()).unwrap();

        root.service_tick(svc_id).unwrap();

        let mut buf = [0u8; SBOX_HDR_SIZE];
        root.drain_outgoing(svc_id, &mut buf);
        assert_eq!(FrameHeader::decode(&buf).kind(), FrameKind::NewConnection { client_id: id1 });
        root.drain_outgoing(svc_id, &mut buf);
        assert_eq!(FrameHeader::decode(&buf).kind(), FrameKind::NewConnection { client_id: id2 });
    }

    #[test]
    fn backpressure_holds_bytes_in_client_incoming_until_service_outgoing_has_room() {
        let root = Root::new();
        let (svc_id, _) = root.register();
        root.classify_service(svc_id, "netA".to_string());
        let (client, _) = root.register();
        root.classify_client(client, "netA".to_string()).unwrap();
        root.service_tick(svc_id).unwrap();
        root.drain_outgoing(svc_id, &mut [0u8; SBOX_HDR_SIZE]); // NEW_CONNECTION

        let payload = vec![b'x'; DEFAULT_RING_CAPACITY * 2];
        let ingested = root.ingest(client, &payload);
        assert!(ingested < payload.len(), "client incoming ring should cap at its capacity");

        // Repeated ticks drain the client's incoming buffer in order even
        // though the service's outgoing ring is much smaller than the total.
        let mut total = Vec::new();
        for _ in 0..64 {
            root.service_tick(svc_id).unwrap();
            let mut chunk = [0u8; DEFAULT_RING_CAPACITY];
            loop {
                let n = root.drain_outgoing(svc_id, &mut chunk);
                if n == 0 {
                    break;
                }
                total.extend_from_slice(&chunk[..n]);
            }
        }
        assert!(total.len() >= 4);
    }
}
