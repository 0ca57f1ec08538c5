//! Endpoint listener: owns one listening socket, accepts connections, and
//! hands each to a freshly spawned [`super::Connection`] worker.

use crate::config::{normalize_listen_params, EndpointConfig, IdleTimeoutsConfig};
use crate::network::Connection;
use crate::root::Root;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{error, info, instrument, warn};

/// Notification fired when an endpoint's listening socket opens or drops.
/// Invoked outside the Root mutex, matching the reference design's callback
/// contract.
#[derive(Debug, Clone)]
pub enum EndpointEvent {
    Listening { label: String, addr: String },
    Dropped { label: String, addr: String },
}

pub type EndpointCallback = Arc<dyn Fn(EndpointEvent) + Send + Sync>;

pub struct Endpoint {
    root: Root,
    addr: String,
    label: String,
    server_name: String,
    reopen_backoff: Duration,
    silence_timeout: Duration,
    check_timeouts: Duration,
    on_event: Option<EndpointCallback>,
}

impl Endpoint {
    pub fn new(
        root: Root,
        server_name: String,
        config: &EndpointConfig,
        idle: &IdleTimeoutsConfig,
    ) -> Result<Self, String> {
        let addr = normalize_listen_params(&config.listen)?;
        Ok(Self {
            root,
            addr,
            label: config.label.clone().unwrap_or_else(|| config.listen.clone()),
            server_name,
            reopen_backoff: Duration::from_millis(idle.reopen_backoff_ms),
            silence_timeout: Duration::from_millis(idle.silence_ms),
            check_timeouts: Duration::from_millis(idle.check_timeouts_ms),
            on_event: None,
        })
    }

    pub fn with_callback(mut self, cb: EndpointCallback) -> Self {
        self.on_event = Some(cb);
        self
    }

    fn notify(&self, event: EndpointEvent) {
        if let Some(cb) = &self.on_event {
            cb(event);
        }
    }

    /// Run the accept loop forever, reopening the listener with a backoff
    /// after a bind failure, until `shutdown` fires.
    #[instrument(skip(self, shutdown), fields(endpoint = %self.label))]
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("endpoint shutting down");
                    return;
                }
                result = TcpListener::bind(&self.addr) => {
                    match result {
                        Ok(listener) => {
                            self.notify(EndpointEvent::Listening {
                                label: self.label.clone(),
                                addr: self.addr.clone(),
                            });
                            info!(addr = %self.addr, "endpoint listening");
                            if !self.accept_loop(&listener, &mut shutdown).await {
                                return;
                            }
                            self.notify(EndpointEvent::Dropped {
                                label: self.label.clone(),
                                addr: self.addr.clone(),
                            });
                        }
                        Err(e) => {
                            crate::metrics::ENDPOINT_BIND_FAILURES.inc();
                            warn!(addr = %self.addr, error = %e, "failed to bind endpoint, retrying");
                            tokio::time::sleep(self.reopen_backoff).await;
                        }
                    }
                }
            }
        }
    }

    /// Accept connections until the listening socket errors out or shutdown
    /// fires. Returns `false` if the caller should stop entirely (shutdown),
    /// `true` if it should reopen the listener.
    async fn accept_loop(&self, listener: &TcpListener, shutdown: &mut broadcast::Receiver<()>) -> bool {
        loop {
            tokio::select! {
                _ = shutdown.recv() => return false,
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, peer_addr)) => {
                            crate::metrics::CONNECTIONS_ACCEPTED.inc();
                            let root = self.root.clone();
                            let server_name = self.server_name.clone();
                            let silence_timeout = self.silence_timeout;
                            let check_timeouts = self.check_timeouts;
                            let shutdown_rx = self.root.subscribe_shutdown();
                            tokio::spawn(async move {
                                let conn = Connection::new(
                                    root, stream, peer_addr, server_name, silence_timeout, check_timeouts,
                                );
                                conn.run(shutdown_rx).await;
                            });
                        }
                        Err(e) => {
                            error!(error = %e, "accept failed, closing listener");
                            return true;
                        }
                    }
                }
            }
        }
    }
}
