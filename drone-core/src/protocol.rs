//! # protocol
//!
//! C9 — length-prefixed JSON framing over a single persistent TCP
//! connection between master and slave.
//!
//! ## Wire discipline
//! Every request or response is preceded by a `response_size` control
//! frame (`{"request":"response_size","content":{"length":N}}`), to
//! which the receiver replies `{"request":"ack","content":""}` before
//! the sender writes the N-byte JSON body. The control frame and the
//! ack itself are sent unframed — a single read must capture them
//! whole, so both sides must pick a `buffer_size` generous enough for
//! these small control messages (the original source's `recv()`-once
//! behaviour, carried over unchanged).
//!
//! ## Invariants
//! - Master listens/accepts exactly once per mission; slave connects
//!   and blocks (retrying) until accepted.
//! - All send/recv loops run until satisfied or a socket error occurs,
//!   in which case the connection is torn down and the error
//!   propagates (never silently dropped).

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tracing::{debug, warn};

use vision_types::protocol::{Request, Response};
use vision_types::ProtocolFault;

async fn write_chunked(stream: &mut TcpStream, max_chunk: usize, raw: &[u8]) -> Result<(), ProtocolFault> {
    let chunk_size = max_chunk.max(1);
    for chunk in raw.chunks(chunk_size) {
        stream.write_all(chunk).await?;
    }
    Ok(())
}

/// A single, possibly-partial, read — mirrors the original's one-shot
/// `socket.recv(buffer_size)` for small control frames.
async fn recv_once(stream: &mut TcpStream, buffer_size: usize) -> Result<Vec<u8>, ProtocolFault> {
    let mut buf = vec![0u8; buffer_size];
    let n = stream.read(&mut buf).await?;
    if n == 0 {
        return Err(ProtocolFault::Disconnected);
    }
    buf.truncate(n);
    Ok(buf)
}

async fn recv_control(stream: &mut TcpStream, buffer_size: usize) -> Result<serde_json::Value, ProtocolFault> {
    let raw = recv_once(stream, buffer_size).await?;
    Ok(serde_json::from_slice(&raw)?)
}

async fn send_ack(stream: &mut TcpStream, max_chunk: usize) -> Result<(), ProtocolFault> {
    let ack = serde_json::json!({"request": "ack", "content": ""});
    write_chunked(stream, max_chunk, &serde_json::to_vec(&ack)?).await
}

async fn assert_ack(stream: &mut TcpStream, buffer_size: usize) -> Result<(), ProtocolFault> {
    let value = recv_control(stream, buffer_size).await?;
    match value.get("request").and_then(|r| r.as_str()) {
        Some("ack") => Ok(()),
        _ => Err(ProtocolFault::BadAck),
    }
}

/// Send one length-prefixed message: a `response_size` control frame,
/// wait for `ack`, then the body.
async fn send_framed<T: Serialize>(stream: &mut TcpStream, max_chunk: usize, buffer_size: usize, msg: &T) -> Result<(), ProtocolFault> {
    let raw = serde_json::to_vec(msg)?;
    let length_frame = serde_json::json!({"request": "response_size", "content": {"length": raw.len()}});
    write_chunked(stream, max_chunk, &serde_json::to_vec(&length_frame)?).await?;
    assert_ack(stream, buffer_size).await?;
    write_chunked(stream, max_chunk, &raw).await
}

/// Receive one length-prefixed message: expect a `response_size`
/// control frame, send `ack`, then read exactly that many body bytes.
async fn recv_framed<T: DeserializeOwned>(stream: &mut TcpStream, buffer_size: usize, max_chunk: usize) -> Result<T, ProtocolFault> {
    let control = recv_control(stream, buffer_size).await?;
    let length = control
        .get("request")
        .and_then(|r| r.as_str())
        .filter(|r| *r == "response_size")
        .and_then(|_| control.get("content"))
        .and_then(|c| c.get("length"))
        .and_then(|l| l.as_u64())
        .ok_or(ProtocolFault::MissingLengthPrefix)? as usize;
    send_ack(stream, max_chunk).await?;
    let mut body = vec![0u8; length];
    stream.read_exact(&mut body).await?;
    Ok(serde_json::from_slice(&body)?)
}

/// One persistent master-slave TCP connection. `own_buffer_size` sizes
/// this side's read buffer for control frames; `peer_max_chunk` caps
/// the write chunk size this side uses when sending (the peer's own
/// buffer size, per the source's `master_buffer_size`/
/// `slave_buffer_size` split).
pub struct Connection {
    stream: TcpStream,
    own_buffer_size: usize,
    peer_max_chunk: usize,
    timeout: Duration,
}

impl Connection {
    /// Bind and accept exactly once.
    pub async fn accept_as_master(
        bind_addr: &str,
        port: u16,
        own_buffer_size: usize,
        peer_max_chunk: usize,
        timeout_secs: u64,
    ) -> Result<Self, ProtocolFault> {
        let listener = TcpListener::bind((bind_addr, port)).await?;
        debug!(bind_addr, port, "master listening for slave connection");
        let (stream, peer) = listener.accept().await?;
        debug!(%peer, "slave connected");
        Ok(Self { stream, own_buffer_size, peer_max_chunk, timeout: Duration::from_secs(timeout_secs) })
    }

    /// Connect to master, retrying the connect call until it succeeds
    /// (the master may not have started listening yet).
    pub async fn connect_as_slave(
        master_addr: &str,
        port: u16,
        own_buffer_size: usize,
        peer_max_chunk: usize,
        timeout_secs: u64,
    ) -> Result<Self, ProtocolFault> {
        loop {
            match TcpStream::connect((master_addr, port)).await {
                Ok(stream) => {
                    debug!(master_addr, port, "connected to master");
                    return Ok(Self { stream, own_buffer_size, peer_max_chunk, timeout: Duration::from_secs(timeout_secs) });
                }
                Err(e) => {
                    warn!(error = %e, "master not yet accepting, retrying");
                    tokio::time::sleep(Duration::from_millis(500)).await;
                }
            }
        }
    }

    async fn with_timeout<F, T>(&self, fut: F) -> Result<T, ProtocolFault>
    where
        F: std::future::Future<Output = Result<T, ProtocolFault>>,
    {
        timeout(self.timeout, fut).await.map_err(|_| ProtocolFault::Timeout)?
    }

    pub async fn send_request(&mut self, request: &Request) -> Result<(), ProtocolFault> {
        send_framed(&mut self.stream, self.peer_max_chunk, self.own_buffer_size, request).await
    }

    /// Slave-side: wait (bounded by `timeout`) for the master's next
    /// request. `ProtocolFault::Timeout` surfaces as the slave's
    /// "master inactivity" condition.
    pub async fn recv_request(&mut self) -> Result<Request, ProtocolFault> {
        self.with_timeout(recv_framed(&mut self.stream, self.own_buffer_size, self.peer_max_chunk)).await
    }

    pub async fn send_response(&mut self, response: &Response) -> Result<(), ProtocolFault> {
        send_framed(&mut self.stream, self.peer_max_chunk, self.own_buffer_size, response).await
    }

    /// Receive a response and assert it matches `expected_request`;
    /// translates a peer-side `error` response into `PeerError`.
    pub async fn recv_response(&mut self, expected_request: &str) -> Result<Response, ProtocolFault> {
        let response: Response = self.with_timeout(recv_framed(&mut self.stream, self.own_buffer_size, self.peer_max_chunk)).await?;
        if let Response::Error { message } = &response {
            return Err(ProtocolFault::PeerError(message.clone()));
        }
        if response.name() != expected_request {
            return Err(ProtocolFault::UnexpectedResponse {
                response: response.name().to_string(),
                request: expected_request.to_string(),
            });
        }
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn framed_roundtrip_reassembles_a_chunked_payload_identically() {
        // a plain ASCII string serialises to JSON as itself plus two
        // quote bytes, so a 5118-char body gives exactly a 5120-byte
        // wire payload: over a 256-byte peer chunk size, write_chunked
        // splits it into exactly 5120/256 = 20 writes, framed by one
        // response_size control message and one ack.
        let payload: String = (0..5118usize).map(|i| (b'a' + (i % 26) as u8) as char).collect();
        let wire_len = serde_json::to_vec(&payload).unwrap().len();
        assert_eq!(wire_len, 5120);
        assert_eq!(wire_len.div_ceil(256), 20);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let expected = payload.clone();
        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let received: String = recv_framed(&mut stream, 256, 256).await.unwrap();
            assert_eq!(received, expected);
        });

        let mut client = TcpStream::connect(addr).await.unwrap();
        send_framed(&mut client, 256, 256, &payload).await.unwrap();
        server.await.unwrap();
    }

    #[tokio::test]
    async fn framed_roundtrip_over_a_loopback_pair() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let request: Request = recv_framed(&mut stream, 4096, 4096).await.unwrap();
            assert!(matches!(request, Request::SlaveReady));
            send_framed(&mut stream, 4096, 4096, &Response::SlaveReady { ready: true }).await.unwrap();
        });

        let mut client = TcpStream::connect(addr).await.unwrap();
        send_framed(&mut client, 4096, 4096, &Request::SlaveReady).await.unwrap();
        let response: Response = recv_framed(&mut client, 4096, 4096).await.unwrap();
        assert!(matches!(response, Response::SlaveReady { ready: true }));
        server.await.unwrap();
    }
}
