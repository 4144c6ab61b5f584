//! Event-driven dispatch over a single connection.
//!
//! Handlers are registered for two events: a document arrived ("data ready")
//! or the read window elapsed without data ("timer expired"). The loop owns
//! the connection and closes it however the loop ends.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use simtel_core::{Framing, MessageFramer, Request, TelemetryError, TelemetryResult};

use crate::connection::Connection;

/// What a handler wants the loop to do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    Continue,
    Stop,
}

/// Why the loop ended without an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// The cancellation token fired.
    Cancelled,
    /// A data handler returned [`Control::Stop`].
    StoppedByHandler,
    /// The read window elapsed and the timer handler (or its absence) stopped the loop.
    TimerExpired,
}

type DataHandler<'a> = Box<dyn FnMut(&[u8]) -> Control + Send + 'a>;
type TimerHandler<'a> = Box<dyn FnMut(Duration) -> Control + Send + 'a>;
type OverflowHandler<'a> = Box<dyn FnMut(usize) -> Control + Send + 'a>;

/// Dispatch table bound to one connected session.
pub struct EventLoop<'a> {
    connection: Connection,
    read_wait: Duration,
    framing: Framing,
    cancel: CancellationToken,
    on_data: Option<DataHandler<'a>>,
    on_timer: Option<TimerHandler<'a>>,
    on_overflow: Option<OverflowHandler<'a>>,
    farewell: Option<(Request, Duration)>,
}

impl<'a> EventLoop<'a> {
    /// Create a loop waiting at most `read_wait` for each update.
    pub fn new(connection: Connection, read_wait: Duration) -> Self {
        Self {
            connection,
            read_wait,
            framing: Framing::PerRead,
            cancel: CancellationToken::new(),
            on_data: None,
            on_timer: None,
            on_overflow: None,
            farewell: None,
        }
    }

    /// Handler for each received document.
    pub fn on_data_ready<F>(mut self, handler: F) -> Self
    where
        F: FnMut(&[u8]) -> Control + Send + 'a,
    {
        self.on_data = Some(Box::new(handler));
        self
    }

    /// Handler for an elapsed read window. Without one, the loop stops.
    pub fn on_timer_expired<F>(mut self, handler: F) -> Self
    where
        F: FnMut(Duration) -> Control + Send + 'a,
    {
        self.on_timer = Some(Box::new(handler));
        self
    }

    /// Handler for a buffered document that outgrew the size limit and was
    /// dropped. Only fires with [`Framing::MessageBoundary`].
    pub fn on_overflow<F>(mut self, handler: F) -> Self
    where
        F: FnMut(usize) -> Control + Send + 'a,
    {
        self.on_overflow = Some(Box::new(handler));
        self
    }

    /// Send `request` before closing when the loop is cancelled or stopped by
    /// a handler. Failures are logged and ignored.
    pub fn with_farewell(mut self, request: Request, write_timeout: Duration) -> Self {
        self.farewell = Some((request, write_timeout));
        self
    }

    /// Stop when `token` is cancelled.
    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// How reads are split into documents.
    pub fn with_framing(mut self, framing: Framing) -> Self {
        self.framing = framing;
        self
    }

    /// Run until a handler stops, the token fires, or the connection fails.
    ///
    /// The connection is closed before this returns.
    pub async fn run(mut self) -> TelemetryResult<StopReason> {
        let result = self.dispatch().await;
        let session = self.connection.id();
        match &result {
            Ok(reason) => tracing::debug!(%session, ?reason, "event loop stopped"),
            Err(e) => tracing::debug!(%session, "event loop failed: {}", e),
        }

        let orderly = matches!(
            result,
            Ok(StopReason::Cancelled | StopReason::StoppedByHandler)
        );
        if let (true, Some((request, write_timeout))) = (orderly, self.farewell.take()) {
            if let Err(e) = self.connection.send_request(&request, write_timeout).await {
                tracing::debug!(%session, "farewell not sent: {}", e);
            }
        }
        self.connection.close().await;
        result
    }

    async fn dispatch(&mut self) -> TelemetryResult<StopReason> {
        let mut framer = MessageFramer::with_max_len(self.connection.max_message_size());

        loop {
            let received = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Ok(StopReason::Cancelled),
                received = self.connection.receive(self.read_wait) => received,
            };

            match received {
                Ok(bytes) => {
                    let control = match self.framing {
                        Framing::PerRead => self.data_ready(&bytes),
                        Framing::MessageBoundary => {
                            let mut control = Control::Continue;
                            if !framer.push(&bytes) {
                                let limit = self.connection.max_message_size();
                                if let Some(handler) = self.on_overflow.as_mut() {
                                    control = handler(limit);
                                }
                                if control == Control::Stop {
                                    return Ok(StopReason::StoppedByHandler);
                                }
                            }
                            while let Some(message) = framer.next_message() {
                                control = self.data_ready(&message);
                                if control == Control::Stop {
                                    break;
                                }
                            }
                            control
                        }
                    };
                    if control == Control::Stop {
                        return Ok(StopReason::StoppedByHandler);
                    }
                }
                Err(TelemetryError::ReadTimeout(waited)) => {
                    let control = match self.on_timer.as_mut() {
                        Some(handler) => handler(waited),
                        None => Control::Stop,
                    };
                    if control == Control::Stop {
                        return Ok(StopReason::TimerExpired);
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn data_ready(&mut self, bytes: &[u8]) -> Control {
        match self.on_data.as_mut() {
            Some(handler) => handler(bytes),
            None => Control::Continue,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClientConfig;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    async fn connected(
        pushes: Vec<&'static str>,
        hold: Duration,
    ) -> (Connection, tokio::task::JoinHandle<usize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let peer = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            for push in pushes {
                stream.write_all(push.as_bytes()).await.unwrap();
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
            // Report whether the client closed its side before `hold` elapsed.
            let mut buf = [0u8; 16];
            tokio::time::timeout(hold, stream.read(&mut buf))
                .await
                .map(|r| r.unwrap_or(0))
                .unwrap_or(usize::MAX)
        });
        let conn = Connection::connect("127.0.0.1", port, Duration::from_secs(2))
            .await
            .unwrap();
        (conn, peer)
    }

    #[tokio::test]
    async fn dispatches_data_then_timer() {
        let (conn, peer) = connected(
            vec![
                "<Message><speed>1</speed></Message>",
                "<Message><speed>2</speed></Message>",
            ],
            Duration::from_secs(3),
        )
        .await;

        let mut seen = Vec::new();
        let mut expired = 0;
        let reason = EventLoop::new(conn, Duration::from_millis(300))
            .on_data_ready(|bytes| {
                seen.push(bytes.to_vec());
                Control::Continue
            })
            .on_timer_expired(|_| {
                expired += 1;
                Control::Stop
            })
            .run()
            .await
            .unwrap();

        assert_eq!(reason, StopReason::TimerExpired);
        assert_eq!(seen.len(), 2);
        assert_eq!(expired, 1);
        // Peer observed EOF: the loop closed the socket.
        assert_eq!(peer.await.unwrap(), 0);
    }

    #[tokio::test]
    async fn handler_can_stop() {
        let (conn, peer) = connected(
            vec!["<Message><speed>1</speed></Message>"],
            Duration::from_secs(3),
        )
        .await;

        let reason = EventLoop::new(conn, Duration::from_secs(2))
            .on_data_ready(|_| Control::Stop)
            .run()
            .await
            .unwrap();

        assert_eq!(reason, StopReason::StoppedByHandler);
        assert_eq!(peer.await.unwrap(), 0);
    }

    #[tokio::test]
    async fn cancellation_closes_connection() {
        let (conn, peer) = connected(vec![], Duration::from_secs(3)).await;
        let token = CancellationToken::new();
        let trigger = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let reason = EventLoop::new(conn, Duration::from_secs(2))
            .with_cancel(token)
            .run()
            .await
            .unwrap();

        assert_eq!(reason, StopReason::Cancelled);
        assert_eq!(peer.await.unwrap(), 0);
    }

    #[tokio::test]
    async fn message_boundary_framing_splits_coalesced_push() {
        let (conn, _peer) = connected(
            vec!["<Message><speed>1</speed></Message>\n<Message><speed>2</speed></Message>\n"],
            Duration::from_secs(3),
        )
        .await;

        let mut seen = Vec::new();
        EventLoop::new(conn, Duration::from_millis(300))
            .with_framing(Framing::MessageBoundary)
            .on_data_ready(|bytes| {
                seen.push(String::from_utf8(bytes.to_vec()).unwrap());
                Control::Continue
            })
            .run()
            .await
            .unwrap();

        assert_eq!(
            seen,
            vec![
                "<Message><speed>1</speed></Message>",
                "<Message><speed>2</speed></Message>"
            ]
        );
    }

    async fn recording_peer() -> (u16, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let peer = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut received = Vec::new();
            stream.read_to_end(&mut received).await.unwrap();
            String::from_utf8(received).unwrap()
        });
        (port, peer)
    }

    #[tokio::test]
    async fn farewell_sent_on_cancel() {
        let (port, peer) = recording_peer().await;
        let conn = Connection::connect("127.0.0.1", port, Duration::from_secs(2))
            .await
            .unwrap();
        let token = CancellationToken::new();
        token.cancel();

        let reason = EventLoop::new(conn, Duration::from_secs(2))
            .with_cancel(token)
            .with_farewell(Request::abolish(), Duration::from_secs(1))
            .run()
            .await
            .unwrap();

        assert_eq!(reason, StopReason::Cancelled);
        let received = peer.await.unwrap();
        assert!(received.contains("<Event Name=\"AbolishConnection\"/>"), "{}", received);
    }

    #[tokio::test]
    async fn no_farewell_after_timer_expiry() {
        let (port, peer) = recording_peer().await;
        let conn = Connection::connect("127.0.0.1", port, Duration::from_secs(2))
            .await
            .unwrap();

        let reason = EventLoop::new(conn, Duration::from_millis(100))
            .with_farewell(Request::abolish(), Duration::from_secs(1))
            .run()
            .await
            .unwrap();

        assert_eq!(reason, StopReason::TimerExpired);
        assert_eq!(peer.await.unwrap(), "");
    }

    #[tokio::test]
    async fn oversized_buffer_is_reported_and_dropped() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let _peer = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            stream.write_all("x".repeat(64).as_bytes()).await.unwrap();
            tokio::time::sleep(Duration::from_millis(100)).await;
            stream.write_all(b"<Message></Message>").await.unwrap();
            tokio::time::sleep(Duration::from_secs(2)).await;
        });

        let config = ClientConfig::new("127.0.0.1", port).with_max_message_size(32);
        let mut conn = Connection::from_config(&config);
        conn.open(Duration::from_secs(2)).await.unwrap();

        let mut seen = Vec::new();
        let mut limits = Vec::new();
        let reason = EventLoop::new(conn, Duration::from_millis(300))
            .with_framing(Framing::MessageBoundary)
            .on_data_ready(|bytes| {
                seen.push(String::from_utf8(bytes.to_vec()).unwrap());
                Control::Continue
            })
            .on_overflow(|limit| {
                limits.push(limit);
                Control::Continue
            })
            .run()
            .await
            .unwrap();

        assert_eq!(reason, StopReason::TimerExpired);
        assert_eq!(limits, vec![32]);
        assert_eq!(seen, vec!["<Message></Message>"]);
    }
}
