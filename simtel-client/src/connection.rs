//! TCP session with the simulator.
//!
//! Every operation is bounded by its own timeout and a timeout is reported as
//! the operation-specific error, so callers can tell a slow connect from a
//! stalled write or an idle read. Nothing is retried.

use std::io::ErrorKind;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use uuid::Uuid;

use simtel_core::{Operation, Request, SessionState, TelemetryError, TelemetryResult};

use crate::config::ClientConfig;

const READ_CHUNK: usize = 8 * 1024;

/// One connection to the simulator.
///
/// The socket is released when the connection is closed or dropped.
#[derive(Debug)]
pub struct Connection {
    id: Uuid,
    host: String,
    port: u16,
    state: SessionState,
    stream: Option<TcpStream>,
    max_message_size: usize,
}

impl Connection {
    /// Create a disconnected session for `host:port`.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            id: Uuid::new_v4(),
            host: host.into(),
            port,
            state: SessionState::Disconnected,
            stream: None,
            max_message_size: ClientConfig::default().max_message_size,
        }
    }

    /// Create a disconnected session from config.
    pub fn from_config(config: &ClientConfig) -> Self {
        let mut conn = Self::new(config.host.clone(), config.port);
        conn.max_message_size = config.max_message_size;
        conn
    }

    /// Connect to `host:port` within `timeout`.
    pub async fn connect(
        host: impl Into<String>,
        port: u16,
        timeout: Duration,
    ) -> TelemetryResult<Self> {
        let mut conn = Self::new(host, port);
        conn.open(timeout).await?;
        Ok(conn)
    }

    /// Open the socket within `timeout`.
    ///
    /// On failure the session ends up `Closed` and cannot be reopened.
    pub async fn open(&mut self, timeout: Duration) -> TelemetryResult<()> {
        if self.state != SessionState::Disconnected {
            return Err(TelemetryError::Protocol(format!(
                "cannot open session in state {:?}",
                self.state
            )));
        }

        self.set_state(SessionState::Connecting);
        tracing::info!(session = %self.id, host = %self.host, port = self.port, "connecting");

        let connect = TcpStream::connect((self.host.as_str(), self.port));
        match tokio::time::timeout(timeout, connect).await {
            Err(_) => {
                self.set_state(SessionState::Closed);
                Err(TelemetryError::timeout(Operation::Connect, timeout))
            }
            Ok(Err(e)) => {
                self.set_state(SessionState::Closed);
                Err(TelemetryError::Transport(format!(
                    "connection to {}:{} failed: {}",
                    self.host, self.port, e
                )))
            }
            Ok(Ok(stream)) => {
                if let Err(e) = stream.set_nodelay(true) {
                    tracing::debug!(session = %self.id, "set_nodelay failed: {}", e);
                }
                self.stream = Some(stream);
                self.set_state(SessionState::Connected);
                tracing::info!(session = %self.id, "connected");
                Ok(())
            }
        }
    }

    /// Write `bytes` completely within `timeout`.
    pub async fn send(&mut self, bytes: &[u8], timeout: Duration) -> TelemetryResult<usize> {
        let id = self.id;
        let stream = self.stream_mut()?;

        let write = async {
            stream.write_all(bytes).await?;
            stream.flush().await
        };

        match tokio::time::timeout(timeout, write).await {
            Err(_) => Err(TelemetryError::timeout(Operation::Write, timeout)),
            Ok(Err(e)) => {
                self.drop_stream();
                Err(TelemetryError::Transport(format!("write error: {}", e)))
            }
            Ok(Ok(())) => {
                tracing::debug!(session = %id, bytes = bytes.len(), "request written");
                Ok(bytes.len())
            }
        }
    }

    /// Encode and send `request`.
    pub async fn send_request(
        &mut self,
        request: &Request,
        timeout: Duration,
    ) -> TelemetryResult<usize> {
        let xml = request.to_xml()?;
        self.send(&xml, timeout).await
    }

    /// Wait up to `timeout` for data, then drain whatever is already buffered.
    ///
    /// A read of zero bytes means the peer closed the connection.
    pub async fn receive(&mut self, timeout: Duration) -> TelemetryResult<Vec<u8>> {
        let max = self.max_message_size;
        let stream = self.stream_mut()?;

        let mut buf = vec![0u8; READ_CHUNK];
        let n = match tokio::time::timeout(timeout, stream.read(&mut buf)).await {
            Err(_) => return Err(TelemetryError::timeout(Operation::Read, timeout)),
            Ok(Err(e)) => {
                self.drop_stream();
                return Err(TelemetryError::Transport(format!("read error: {}", e)));
            }
            Ok(Ok(0)) => {
                self.drop_stream();
                return Err(TelemetryError::ConnectionClosedByPeer);
            }
            Ok(Ok(n)) => n,
        };
        buf.truncate(n);

        let mut chunk = vec![0u8; READ_CHUNK];
        while buf.len() < max {
            match stream.try_read(&mut chunk) {
                // EOF is reported by the next receive.
                Ok(0) => break,
                Ok(n) => buf.extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) => {
                    self.drop_stream();
                    return Err(TelemetryError::Transport(format!("read error: {}", e)));
                }
            }
        }

        tracing::trace!(session = %self.id, bytes = buf.len(), "received");
        Ok(buf)
    }

    /// Shut down and release the socket. Closing twice is a no-op.
    pub async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            if let Err(e) = stream.shutdown().await {
                tracing::debug!(session = %self.id, "shutdown failed: {}", e);
            }
        }
        if self.state != SessionState::Closed {
            self.set_state(SessionState::Closed);
            tracing::info!(session = %self.id, "connection closed");
        }
    }

    /// Session id used in log output.
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Get current state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Max bytes drained by a single receive.
    pub fn max_message_size(&self) -> usize {
        self.max_message_size
    }

    pub fn is_connected(&self) -> bool {
        self.state == SessionState::Connected
    }

    fn stream_mut(&mut self) -> TelemetryResult<&mut TcpStream> {
        if self.state != SessionState::Connected {
            return Err(TelemetryError::NotConnected);
        }
        self.stream.as_mut().ok_or(TelemetryError::NotConnected)
    }

    /// Release the socket after a fatal I/O error.
    fn drop_stream(&mut self) {
        self.stream = None;
        self.set_state(SessionState::Closed);
    }

    fn set_state(&mut self, next: SessionState) {
        if self.state == next {
            return;
        }
        debug_assert!(
            self.state.can_transition_to(next),
            "invalid session transition {:?} -> {:?}",
            self.state,
            next
        );
        tracing::debug!(session = %self.id, "Session state: {:?} -> {:?}", self.state, next);
        self.state = next;
    }
}
