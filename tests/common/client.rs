//! Test peers speaking the switchbox wire protocol directly against a
//! running `switchboxd`, using the same codecs the relay itself uses.

#![allow(dead_code)]

use std::time::Duration;
use switchbox_proto::{AuthFrameCodec, FrameHeader, FrameKind, SBOX_HDR_SIZE};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

/// A peer that has completed the `SBOX/1 CLIENT <netname>` handshake. Talks
/// raw bytes to the relay from then on.
pub struct TestClient {
    stream: TcpStream,
}

impl TestClient {
    pub async fn connect(addr: &str, network_name: &str) -> anyhow::Result<Self> {
        let mut stream = TcpStream::connect(addr).await?;
        let line = format!("SBOX/1 CLIENT {network_name}\n");
        stream.write_all(line.as_bytes()).await?;
        let mut resp = [0u8; 3];
        stream.read_exact(&mut resp).await?;
        anyhow::ensure!(&resp == b"OK\n", "client handshake rejected: {:?}", resp);
        Ok(Self { stream })
    }

    /// Complete the handshake line and report whatever response line comes
    /// back, without asserting success. Used by tests exercising rejection.
    pub async fn connect_expect_error(addr: &str, network_name: &str) -> anyhow::Result<String> {
        let mut stream = TcpStream::connect(addr).await?;
        let line = format!("SBOX/1 CLIENT {network_name}\n");
        stream.write_all(line.as_bytes()).await?;
        let mut buf = Vec::new();
        let mut byte = [0u8; 1];
        loop {
            let n = timeout(Duration::from_secs(2), stream.read(&mut byte)).await??;
            if n == 0 || byte[0] == b'\n' {
                break;
            }
            buf.push(byte[0]);
        }
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }

    pub async fn send(&mut self, data: &[u8]) -> anyhow::Result<()> {
        self.stream.write_all(data).await?;
        Ok(())
    }

    pub async fn recv(&mut self, max: usize, wait: Duration) -> anyhow::Result<Vec<u8>> {
        let mut buf = vec![0u8; max];
        let n = timeout(wait, self.stream.read(&mut buf)).await??;
        buf.truncate(n);
        Ok(buf)
    }

    /// Read exactly `n` bytes, waiting up to `wait` for the full amount.
    pub async fn recv_exact(&mut self, n: usize, wait: Duration) -> anyhow::Result<Vec<u8>> {
        let mut buf = vec![0u8; n];
        timeout(wait, self.stream.read_exact(&mut buf)).await??;
        Ok(buf)
    }
}

/// One decoded multiplex frame, payload bytes included.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    NewConnection { client_id: u16 },
    Payload { client_id: u16, data: Vec<u8> },
}

/// A peer that has completed the `SBOX/1 SERVICE <netname>` handshake and
/// the identity auth exchange. Speaks framed multiplex traffic from then on.
pub struct TestService {
    stream: TcpStream,
}

impl TestService {
    pub async fn connect(addr: &str, network_name: &str, own_identity: &[u8]) -> anyhow::Result<Self> {
        let mut stream = TcpStream::connect(addr).await?;
        let line = format!("SBOX/1 SERVICE {network_name}\n");
        stream.write_all(line.as_bytes()).await?;
        let mut resp = [0u8; 3];
        stream.read_exact(&mut resp).await?;
        anyhow::ensure!(&resp == b"OK\n", "service handshake rejected: {:?}", resp);

        let _relay_identity = AuthFrameCodec::recv_auth(&mut stream).await?;
        AuthFrameCodec::send_identity(&mut stream, own_identity).await?;

        Ok(Self { stream })
    }

    /// Read one frame, header plus payload if any.
    pub async fn recv_frame(&mut self, wait: Duration) -> anyhow::Result<Frame> {
        let mut hdr_buf = [0u8; SBOX_HDR_SIZE];
        timeout(wait, self.stream.read_exact(&mut hdr_buf)).await??;
        let header = FrameHeader::decode(&hdr_buf);
        match header.kind() {
            FrameKind::NewConnection { client_id } => Ok(Frame::NewConnection { client_id }),
            FrameKind::Payload { client_id, len } => {
                let mut data = vec![0u8; len as usize];
                timeout(wait, self.stream.read_exact(&mut data)).await??;
                Ok(Frame::Payload { client_id, data })
            }
        }
    }

    pub async fn send_payload(&mut self, client_id: u16, payload: &[u8]) -> anyhow::Result<()> {
        let header = FrameHeader::payload(client_id, payload.len() as u16);
        self.stream.write_all(&header.encode()).await?;
        self.stream.write_all(payload).await?;
        Ok(())
    }

    /// Read frames until `count` distinct `NewConnection` ids have been
    /// observed, returning them in arrival order. Any payload frames seen
    /// in between are discarded.
    pub async fn collect_new_connections(
        &mut self,
        count: usize,
        wait: Duration,
    ) -> anyhow::Result<Vec<u16>> {
        let mut seen = Vec::new();
        while seen.len() < count {
            if let Frame::NewConnection { client_id } = self.recv_frame(wait).await? {
                seen.push(client_id);
            }
        }
        Ok(seen)
    }

    /// Read frames until a payload frame for `client_id` arrives, returning
    /// its bytes. Any other frames seen in between are discarded.
    pub async fn collect_payload_for(&mut self, client_id: u16, wait: Duration) -> anyhow::Result<Vec<u8>> {
        loop {
            if let Frame::Payload { client_id: got, data } = self.recv_frame(wait).await? {
                if got == client_id {
                    return Ok(data);
                }
            }
        }
    }
}
