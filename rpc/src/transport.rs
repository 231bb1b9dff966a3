//! GBXRemote framing over a byte stream
//!
//! The dedicated server speaks length-prefixed XML-RPC over a plain TCP
//! socket. A connection starts with a short protocol banner that selects the
//! framing for the rest of the session:
//!
//! ```text
//! handshake:  u32 len (native order) . "GBXRemote 1" | "GBXRemote 2"
//! V1 frame:   u32_le size . payload
//! V2 frame:   u32_le size . u32_le handle . payload
//! ```
//!
//! In V2 the server also pushes unsolicited callbacks on the same socket.
//! Replies carry the handle of the request they answer (high bit set);
//! callbacks carry a handle with the high bit clear. The transport reads
//! frames until the reply for the pending request arrives and queues any
//! callbacks it passes on the way.

use crate::error::TransportError;
use log::{debug, info, warn};
use shared::{ByteCursor, Endianness};
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::time::timeout;

/// Largest request payload the server accepts
pub const MAX_REQUEST_SIZE: usize = 512 * 1024 - 8;
/// Largest response payload we are willing to buffer
pub const MAX_RESPONSE_SIZE: usize = 4 * 1024 * 1024;
/// Longest handshake banner we read
pub const MAX_HANDSHAKE_LENGTH: u32 = 64;
/// Handle counter seed; the first request goes out as seed + 1
pub const INITIAL_HANDLE: u32 = 0x8000_0000;
/// Set on every reply handle, clear on callback handles
pub const REPLY_HANDLE_BIT: u32 = 0x8000_0000;

const HANDSHAKE_V1: &[u8] = b"GBXRemote 1";
const HANDSHAKE_V2: &[u8] = b"GBXRemote 2";

/// Framing variant announced by the server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolVersion {
    V1,
    V2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    Unconnected,
    Handshaking,
    Ready,
    AwaitingResponse,
    Closed,
}

/// Limits and timeouts for one connection
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub connect_timeout: Duration,
    /// Applied to every individual read or write
    pub io_timeout: Duration,
    pub max_request_size: usize,
    pub max_response_size: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(20),
            io_timeout: Duration::from_secs(20),
            max_request_size: MAX_REQUEST_SIZE,
            max_response_size: MAX_RESPONSE_SIZE,
        }
    }
}

/// The request currently waiting for its reply
#[derive(Debug, Clone, Copy)]
pub struct PendingRequest {
    pub handle: u32,
    pub sent_at: Instant,
}

pub struct RpcTransport<S> {
    stream: BufReader<S>,
    protocol: ProtocolVersion,
    state: TransportState,
    handle: u32,
    pending: Option<PendingRequest>,
    callbacks: VecDeque<Vec<u8>>,
    config: TransportConfig,
}

impl RpcTransport<TcpStream> {
    /// Opens a TCP connection and performs the handshake
    pub async fn connect<A: ToSocketAddrs>(
        addr: A,
        config: TransportConfig,
    ) -> Result<Self, TransportError> {
        let stream = timeout(config.connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| TransportError::Timeout {
                operation: "connect",
            })??;
        stream.set_nodelay(true)?;

        info!("Connected to {}", stream.peer_addr()?);
        Self::handshake(stream, config).await
    }
}

impl<S> RpcTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Reads the server banner from an already connected stream
    pub async fn handshake(stream: S, config: TransportConfig) -> Result<Self, TransportError> {
        let mut transport = Self {
            stream: BufReader::new(stream),
            protocol: ProtocolVersion::V1,
            state: TransportState::Handshaking,
            handle: INITIAL_HANDLE,
            pending: None,
            callbacks: VecDeque::new(),
            config,
        };

        match transport.read_handshake().await {
            Ok(protocol) => {
                transport.protocol = protocol;
                transport.state = TransportState::Ready;
                info!("Server speaks {:?}", protocol);
                Ok(transport)
            }
            Err(e) => {
                transport.state = TransportState::Closed;
                Err(e)
            }
        }
    }

    async fn read_handshake(&mut self) -> Result<ProtocolVersion, TransportError> {
        // length comes before we know anything about the peer, so native order
        let header = self.read_exact_timed(4, "handshake").await?;
        let length = ByteCursor::with_order(&header, Endianness::native()).read_u32()?;

        if length > MAX_HANDSHAKE_LENGTH {
            return Err(TransportError::HandshakeTooLong(length));
        }

        let banner = self.read_exact_timed(length as usize, "handshake").await?;
        match banner.as_slice() {
            HANDSHAKE_V1 => Ok(ProtocolVersion::V1),
            HANDSHAKE_V2 => Ok(ProtocolVersion::V2),
            other => Err(TransportError::BadHandshake {
                received: String::from_utf8_lossy(other).into_owned(),
            }),
        }
    }

    pub fn protocol(&self) -> ProtocolVersion {
        self.protocol
    }

    pub fn state(&self) -> TransportState {
        self.state
    }

    pub fn pending(&self) -> Option<PendingRequest> {
        self.pending
    }

    /// Number of callback frames queued but not yet taken
    pub fn queued_callbacks(&self) -> usize {
        self.callbacks.len()
    }

    /// Sends one request and waits for its reply payload.
    ///
    /// Callback frames that arrive in between are queued for
    /// [`RpcTransport::take_callbacks`].
    pub async fn request(&mut self, payload: &[u8]) -> Result<Vec<u8>, TransportError> {
        let result = self.exchange(payload).await;
        if result.is_err() {
            self.state = TransportState::Closed;
            self.pending = None;
        }
        result
    }

    async fn exchange(&mut self, payload: &[u8]) -> Result<Vec<u8>, TransportError> {
        self.send_request(payload).await?;
        self.read_response().await
    }

    async fn send_request(&mut self, payload: &[u8]) -> Result<(), TransportError> {
        self.ensure_ready()?;

        if payload.len() > self.config.max_request_size {
            return Err(TransportError::RequestTooLarge {
                size: payload.len(),
                max: self.config.max_request_size,
            });
        }

        self.handle = next_handle(self.handle);

        let mut frame = Vec::with_capacity(payload.len() + 8);
        frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        if self.protocol == ProtocolVersion::V2 {
            frame.extend_from_slice(&self.handle.to_le_bytes());
        }
        frame.extend_from_slice(payload);

        self.write_all_timed(&frame).await?;

        debug!(
            "Sent request 0x{:08X} ({} bytes)",
            self.handle,
            payload.len()
        );
        self.pending = Some(PendingRequest {
            handle: self.handle,
            sent_at: Instant::now(),
        });
        self.state = TransportState::AwaitingResponse;
        Ok(())
    }

    async fn read_response(&mut self) -> Result<Vec<u8>, TransportError> {
        let pending = self.pending.ok_or(TransportError::NotReady(self.state))?;

        loop {
            let (size, handle) = self.read_frame_header(Some(pending.handle)).await?;
            let payload = self.read_exact_timed(size, "response").await?;

            if handle == pending.handle {
                debug!(
                    "Reply 0x{:08X} ({} bytes) after {:?}",
                    handle,
                    size,
                    pending.sent_at.elapsed()
                );
                self.pending = None;
                self.state = TransportState::Ready;
                return Ok(payload);
            }

            self.route_unsolicited(handle, payload);
        }
    }

    /// Reads a frame header. V1 frames carry no handle and are attributed
    /// to `implicit_handle`.
    async fn read_frame_header(
        &mut self,
        implicit_handle: Option<u32>,
    ) -> Result<(usize, u32), TransportError> {
        let (size, handle) = match self.protocol {
            ProtocolVersion::V1 => {
                let header = self.read_exact_timed(4, "frame header").await?;
                let size = ByteCursor::new(&header).read_u32()?;
                (size, implicit_handle.unwrap_or(INITIAL_HANDLE))
            }
            ProtocolVersion::V2 => {
                let header = self.read_exact_timed(8, "frame header").await?;
                let mut cursor = ByteCursor::new(&header);
                let size = cursor.read_u32()?;
                // decoded as 32 bits, so the handle never carries a wider value
                let handle = cursor.read_u32()?;
                (size, handle)
            }
        };

        if size == 0 || handle == 0 {
            return Err(TransportError::MalformedFrame { size, handle });
        }

        let size = size as usize;
        if size > self.config.max_response_size {
            return Err(TransportError::ResponseTooLarge {
                size,
                max: self.config.max_response_size,
            });
        }

        Ok((size, handle))
    }

    /// Queues callbacks. A reply-bit frame for any handle other than the
    /// pending one answers a request nobody waits for anymore, so it is
    /// dropped after being read in full.
    fn route_unsolicited(&mut self, handle: u32, payload: Vec<u8>) {
        if handle & REPLY_HANDLE_BIT == 0 {
            debug!(
                "Queued callback 0x{:08X} ({} bytes)",
                handle,
                payload.len()
            );
            self.callbacks.push_back(payload);
        } else {
            warn!(
                "Discarding reply for stale handle 0x{:08X} ({} bytes)",
                handle,
                payload.len()
            );
        }
    }

    /// Waits up to `wait` for the server to push something, then reads every
    /// frame that is immediately available into the callback queue.
    ///
    /// Returns whether at least one callback was queued. V1 servers do not
    /// send callbacks, so this is a no-op for them.
    pub async fn receive_pending(&mut self, wait: Duration) -> Result<bool, TransportError> {
        let result = self.receive_pending_inner(wait).await;
        if result.is_err() {
            self.state = TransportState::Closed;
        }
        result
    }

    async fn receive_pending_inner(&mut self, wait: Duration) -> Result<bool, TransportError> {
        self.ensure_ready()?;
        if self.protocol == ProtocolVersion::V1 {
            return Ok(false);
        }

        let before = self.callbacks.len();
        let mut wait = wait;

        loop {
            // fill_buf keeps what it read if the timeout fires
            match timeout(wait, self.stream.fill_buf()).await {
                Err(_) => break,
                Ok(Err(e)) => return Err(e.into()),
                Ok(Ok([])) => {
                    return Err(TransportError::ShortRead {
                        expected: 8,
                        received: 0,
                    })
                }
                Ok(Ok(_)) => {}
            }

            let (size, handle) = self.read_frame_header(None).await?;
            let payload = self.read_exact_timed(size, "callback").await?;
            self.route_unsolicited(handle, payload);

            wait = Duration::ZERO;
        }

        Ok(self.callbacks.len() > before)
    }

    /// Drains the raw callback payloads queued so far
    pub fn take_callbacks(&mut self) -> Vec<Vec<u8>> {
        self.callbacks.drain(..).collect()
    }

    pub async fn close(&mut self) -> Result<(), TransportError> {
        if self.state == TransportState::Closed {
            return Ok(());
        }
        self.state = TransportState::Closed;
        self.pending = None;
        self.stream.get_mut().shutdown().await?;
        info!("Connection closed");
        Ok(())
    }

    fn ensure_ready(&self) -> Result<(), TransportError> {
        match self.state {
            TransportState::Ready => Ok(()),
            TransportState::Closed => Err(TransportError::Closed),
            other => Err(TransportError::NotReady(other)),
        }
    }

    /// Reads exactly `len` bytes, accumulating partial reads. Each partial
    /// read gets the full I/O timeout.
    async fn read_exact_timed(
        &mut self,
        len: usize,
        operation: &'static str,
    ) -> Result<Vec<u8>, TransportError> {
        let mut buffer = vec![0u8; len];
        let mut filled = 0;

        while filled < len {
            let read = timeout(self.config.io_timeout, self.stream.read(&mut buffer[filled..]))
                .await
                .map_err(|_| TransportError::Timeout { operation })??;

            if read == 0 {
                return Err(TransportError::ShortRead {
                    expected: len,
                    received: filled,
                });
            }
            filled += read;
        }

        Ok(buffer)
    }

    async fn write_all_timed(&mut self, data: &[u8]) -> Result<(), TransportError> {
        let io_timeout = self.config.io_timeout;
        let stream = self.stream.get_mut();

        timeout(io_timeout, stream.write_all(data))
            .await
            .map_err(|_| TransportError::Timeout {
                operation: "request",
            })??;
        timeout(io_timeout, stream.flush())
            .await
            .map_err(|_| TransportError::Timeout {
                operation: "request",
            })??;
        Ok(())
    }
}

/// Advances the request handle, keeping the reply bit set across wrap-around
pub fn next_handle(current: u32) -> u32 {
    current.wrapping_add(1) | REPLY_HANDLE_BIT
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{duplex, DuplexStream};
    use tokio_test::io::Builder;

    fn handshake_bytes(banner: &[u8]) -> Vec<u8> {
        let mut data = (banner.len() as u32).to_ne_bytes().to_vec();
        data.extend_from_slice(banner);
        data
    }

    fn frame(handle: u32, payload: &[u8]) -> Vec<u8> {
        let mut data = (payload.len() as u32).to_le_bytes().to_vec();
        data.extend_from_slice(&handle.to_le_bytes());
        data.extend_from_slice(payload);
        data
    }

    async fn read_request(server: &mut DuplexStream) -> (u32, Vec<u8>) {
        let mut header = [0u8; 8];
        server.read_exact(&mut header).await.unwrap();
        let size = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
        let handle = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);
        let mut payload = vec![0u8; size as usize];
        server.read_exact(&mut payload).await.unwrap();
        (handle, payload)
    }

    async fn connected_pair() -> (RpcTransport<DuplexStream>, DuplexStream) {
        let (client, mut server) = duplex(64 * 1024);
        server
            .write_all(&handshake_bytes(b"GBXRemote 2"))
            .await
            .unwrap();
        let transport = RpcTransport::handshake(client, TransportConfig::default())
            .await
            .unwrap();
        (transport, server)
    }

    #[tokio::test]
    async fn test_handshake_v2() {
        let mock = Builder::new().read(&handshake_bytes(b"GBXRemote 2")).build();
        let transport = RpcTransport::handshake(mock, TransportConfig::default())
            .await
            .unwrap();

        assert_eq!(transport.protocol(), ProtocolVersion::V2);
        assert_eq!(transport.state(), TransportState::Ready);
        assert!(transport.pending().is_none());
    }

    #[tokio::test]
    async fn test_handshake_v1() {
        let mock = Builder::new().read(&handshake_bytes(b"GBXRemote 1")).build();
        let transport = RpcTransport::handshake(mock, TransportConfig::default())
            .await
            .unwrap();
        assert_eq!(transport.protocol(), ProtocolVersion::V1);
    }

    #[tokio::test]
    async fn test_handshake_rejects_wrong_banners() {
        for banner in [
            &b"GBXRemote 3"[..],
            b"GBXRemote ",
            b"GBXRemote 22",
            b"gbxremote 2",
            b"",
        ] {
            let mock = Builder::new().read(&handshake_bytes(banner)).build();
            let result = RpcTransport::handshake(mock, TransportConfig::default()).await;
            assert!(
                matches!(result, Err(TransportError::BadHandshake { .. })),
                "banner {:?} should be rejected",
                String::from_utf8_lossy(banner)
            );
        }
    }

    #[tokio::test]
    async fn test_handshake_rejects_long_length() {
        let mock = Builder::new().read(&65u32.to_ne_bytes()).build();
        let result = RpcTransport::handshake(mock, TransportConfig::default()).await;
        assert!(matches!(result, Err(TransportError::HandshakeTooLong(65))));
    }

    #[tokio::test]
    async fn test_handshake_truncated_stream() {
        let mut data = 11u32.to_ne_bytes().to_vec();
        data.extend_from_slice(b"GBXRem");
        let mock = Builder::new().read(&data).build();
        let result = RpcTransport::handshake(mock, TransportConfig::default()).await;
        assert!(matches!(
            result,
            Err(TransportError::ShortRead {
                expected: 11,
                received: 6
            })
        ));
    }

    #[tokio::test]
    async fn test_v1_request_framing() {
        let payload = b"<methodCall/>";
        let mut request = (payload.len() as u32).to_le_bytes().to_vec();
        request.extend_from_slice(payload);
        let mut reply = 5u32.to_le_bytes().to_vec();
        reply.extend_from_slice(b"hello");

        let mock = Builder::new()
            .read(&handshake_bytes(b"GBXRemote 1"))
            .write(&request)
            .read(&reply)
            .build();

        let mut transport = RpcTransport::handshake(mock, TransportConfig::default())
            .await
            .unwrap();
        let response = transport.request(payload).await.unwrap();
        assert_eq!(response, b"hello");
        assert_eq!(transport.state(), TransportState::Ready);
    }

    #[tokio::test]
    async fn test_v2_request_framing_and_handles() {
        let (mut transport, mut server) = connected_pair().await;

        let server_task = tokio::spawn(async move {
            let mut seen = Vec::new();
            for _ in 0..2 {
                let (handle, payload) = read_request(&mut server).await;
                seen.push(handle);
                server.write_all(&frame(handle, &payload)).await.unwrap();
            }
            seen
        });

        assert_eq!(transport.request(b"first").await.unwrap(), b"first");
        assert_eq!(transport.request(b"second").await.unwrap(), b"second");

        let handles = server_task.await.unwrap();
        assert_eq!(handles, vec![0x8000_0001, 0x8000_0002]);
    }

    #[tokio::test]
    async fn test_callbacks_interleaved_with_reply() {
        let (mut transport, mut server) = connected_pair().await;

        let server_task = tokio::spawn(async move {
            let (handle, _) = read_request(&mut server).await;
            server.write_all(&frame(0x0000_0001, b"cb-one")).await.unwrap();
            server.write_all(&frame(0x8000_7777, b"stale")).await.unwrap();
            server.write_all(&frame(0x0000_0002, b"cb-two")).await.unwrap();
            server.write_all(&frame(handle, b"reply")).await.unwrap();
        });

        let reply = transport.request(b"GetStatus").await.unwrap();
        server_task.await.unwrap();

        assert_eq!(reply, b"reply");
        assert_eq!(transport.queued_callbacks(), 2);
        assert_eq!(
            transport.take_callbacks(),
            vec![b"cb-one".to_vec(), b"cb-two".to_vec()]
        );
        assert_eq!(transport.queued_callbacks(), 0);
    }

    #[tokio::test]
    async fn test_oversized_response_rejected_before_payload() {
        let (mut transport, mut server) = connected_pair().await;

        let server_task = tokio::spawn(async move {
            let (handle, _) = read_request(&mut server).await;
            let mut header = 5_000_000u32.to_le_bytes().to_vec();
            header.extend_from_slice(&handle.to_le_bytes());
            server.write_all(&header).await.unwrap();
            server
        });

        let result = transport.request(b"GetChallengeList").await;
        assert!(matches!(
            result,
            Err(TransportError::ResponseTooLarge {
                size: 5_000_000,
                ..
            })
        ));
        assert_eq!(transport.state(), TransportState::Closed);
        drop(server_task.await.unwrap());
    }

    #[tokio::test]
    async fn test_malformed_frames() {
        for (size, handle) in [(0u32, 0x8000_0001u32), (4, 0)] {
            let (mut transport, mut server) = connected_pair().await;
            let server_task = tokio::spawn(async move {
                read_request(&mut server).await;
                let mut header = size.to_le_bytes().to_vec();
                header.extend_from_slice(&handle.to_le_bytes());
                header.extend_from_slice(b"junk");
                server.write_all(&header).await.unwrap();
                server
            });

            let result = transport.request(b"x").await;
            assert!(matches!(result, Err(TransportError::MalformedFrame { .. })));
            drop(server_task.await.unwrap());
        }
    }

    #[tokio::test]
    async fn test_request_too_large_sends_nothing() {
        let mock = Builder::new().read(&handshake_bytes(b"GBXRemote 2")).build();
        let mut transport = RpcTransport::handshake(mock, TransportConfig::default())
            .await
            .unwrap();

        let payload = vec![b'x'; MAX_REQUEST_SIZE + 1];
        let result = transport.request(&payload).await;
        assert!(matches!(
            result,
            Err(TransportError::RequestTooLarge { size, max }) if size == MAX_REQUEST_SIZE + 1 && max == MAX_REQUEST_SIZE
        ));
        assert_eq!(transport.state(), TransportState::Closed);
        assert!(matches!(
            transport.request(b"again").await,
            Err(TransportError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_connection_drop_mid_frame() {
        let (mut transport, mut server) = connected_pair().await;

        let server_task = tokio::spawn(async move {
            let (handle, _) = read_request(&mut server).await;
            let mut partial = 100u32.to_le_bytes().to_vec();
            partial.extend_from_slice(&handle.to_le_bytes());
            partial.extend_from_slice(b"only a few bytes");
            server.write_all(&partial).await.unwrap();
        });

        let result = transport.request(b"GetPlayerList").await;
        server_task.await.unwrap();
        assert!(matches!(
            result,
            Err(TransportError::ShortRead {
                expected: 100,
                received: 16
            })
        ));
    }

    #[tokio::test]
    async fn test_read_timeout() {
        let (client, mut server) = duplex(1024);
        server
            .write_all(&handshake_bytes(b"GBXRemote 2"))
            .await
            .unwrap();
        let config = TransportConfig {
            io_timeout: Duration::from_millis(50),
            ..TransportConfig::default()
        };
        let mut transport = RpcTransport::handshake(client, config).await.unwrap();

        let result = transport.request(b"silence").await;
        assert!(matches!(
            result,
            Err(TransportError::Timeout {
                operation: "frame header"
            })
        ));
        drop(server);
    }

    #[tokio::test]
    async fn test_receive_pending_callbacks() {
        let (mut transport, mut server) = connected_pair().await;

        server.write_all(&frame(0x0000_0010, b"cb-a")).await.unwrap();
        server.write_all(&frame(0x0000_0011, b"cb-b")).await.unwrap();

        let received = transport
            .receive_pending(Duration::from_millis(200))
            .await
            .unwrap();
        assert!(received);
        assert_eq!(transport.take_callbacks().len(), 2);

        let received = transport
            .receive_pending(Duration::from_millis(10))
            .await
            .unwrap();
        assert!(!received);
        assert_eq!(transport.state(), TransportState::Ready);
        drop(server);
    }

    #[tokio::test]
    async fn test_close() {
        let (mut transport, _server) = connected_pair().await;
        transport.close().await.unwrap();
        assert_eq!(transport.state(), TransportState::Closed);
        assert!(matches!(
            transport.request(b"x").await,
            Err(TransportError::Closed)
        ));
        assert!(transport.close().await.is_ok());
    }

    #[test]
    fn test_next_handle_keeps_reply_bit() {
        assert_eq!(next_handle(INITIAL_HANDLE), 0x8000_0001);
        assert_eq!(next_handle(0xFFFF_FFFF), 0x8000_0000);
        for current in [INITIAL_HANDLE, 0x8000_1234, 0xFFFF_FFFE, 0xFFFF_FFFF] {
            assert_ne!(next_handle(current) & REPLY_HANDLE_BIT, 0);
        }
    }
}
