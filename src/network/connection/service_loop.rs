//! `RoutingService` pump: drains the service socket into the registry,
//! runs one [`Root::service_tick`] pass, then flushes whatever the tick
//! staged for the wire. See spec §4.4.1.

use crate::error::RelayError;
use crate::root::{ConnectionId, Root};
use std::io::ErrorKind;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, Notify};

const IO_CHUNK: usize = 4096;

pub async fn run(
    stream: &mut TcpStream,
    root: &Root,
    id: ConnectionId,
    notify: &Arc<Notify>,
    check_timeouts: Duration,
    silence_timeout: Duration,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<(), RelayError> {
    let mut read_buf = vec![0u8; IO_CHUNK];
    let mut write_buf = vec![0u8; IO_CHUNK];

    loop {
        if root.is_stopping(id) {
            return Ok(());
        }
        if root.silence_elapsed(id, silence_timeout) {
            return Err(RelayError::Silence);
        }

        let readable_budget = root.incoming_space(id);
        tokio::select! {
            _ = shutdown.recv() => return Ok(()),
            _ = notify.notified() => {}
            _ = tokio::time::sleep(check_timeouts) => {}
            result = stream.readable(), if readable_budget > 0 => {
                result?;
                let cap = readable_budget.min(read_buf.len());
                match stream.try_read(&mut read_buf[..cap]) {
                    Ok(0) => return Ok(()),
                    Ok(n) => {
                        root.ingest(id, &read_buf[..n]);
                        root.touch_receive(id);
                    }
                    Err(e) if e.kind() == ErrorKind::WouldBlock => {}
                    Err(e) => return Err(e.into()),
                }
            }
        }

        root.service_tick(id)?;

        loop {
            let n = root.drain_outgoing(id, &mut write_buf);
            if n == 0 {
                break;
            }
            stream.write_all(&write_buf[..n]).await?;
        }
    }
}
