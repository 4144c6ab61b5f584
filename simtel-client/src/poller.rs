//! Subscription polling loop.
//!
//! Connects, writes the subscription request, then waits at most the read
//! window for each pushed update. Updates are decoded and handed to a sink.
//! The loop ends when the window elapses, the peer goes away, or the caller
//! cancels; the socket is closed in every case. A cancelled loop asks the
//! simulator to drop the subscription first.

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use simtel_core::{PollState, Request, Response, Sample, TelemetryError, TelemetryResult};

use crate::config::{ClientConfig, Subscription};
use crate::connection::Connection;
use crate::event_loop::{Control, EventLoop, StopReason};
use crate::state_machine::PollStateMachine;

/// One item delivered to the sink.
#[derive(Debug, Clone, PartialEq)]
pub enum Update {
    /// Values decoded from a pushed document.
    Sample(Sample),
    /// A received buffer could not be parsed. Polling continues.
    Malformed { error: String },
}

/// Result of a polling run that ended without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollSummary {
    /// Samples delivered to the sink.
    pub samples: u64,
    /// Buffers that failed to parse.
    pub malformed: u64,
    /// Samples skipped as duplicates of the previous one.
    pub duplicates: u64,
    /// Replies to control events, such as the subscription acknowledgement.
    pub control_replies: u64,
    /// Buffered documents dropped for exceeding the message size limit.
    pub overflows: u64,
    pub reason: StopReason,
}

/// Drives one subscription from connect to close.
#[derive(Debug)]
pub struct Poller {
    config: ClientConfig,
    subscription: Subscription,
    cancel: CancellationToken,
}

impl Poller {
    /// Create a poller for `subscription` against the host in `config`.
    ///
    /// Timeouts come from the subscription, not from `config`.
    pub fn new(config: ClientConfig, subscription: Subscription) -> Self {
        Self {
            config,
            subscription,
            cancel: CancellationToken::new(),
        }
    }

    /// Token that stops the loop when cancelled.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run on a background task.
    pub fn spawn<F>(self, sink: F) -> PollerHandle
    where
        F: FnMut(Update) + Send + 'static,
    {
        let cancel = self.cancel.clone();
        let join = tokio::spawn(self.run(sink));
        PollerHandle { cancel, join }
    }

    /// Run the loop to completion.
    ///
    /// A read timeout is returned as [`TelemetryError::ReadTimeout`];
    /// cancellation returns a summary.
    pub async fn run<F>(self, mut sink: F) -> TelemetryResult<PollSummary>
    where
        F: FnMut(Update) + Send,
    {
        let timeouts = self.subscription.timeouts;
        let mut sm = PollStateMachine::new();
        sm.on_start()?;

        let mut conn = Connection::from_config(&self.config);
        let opened = tokio::select! {
            _ = self.cancel.cancelled() => None,
            opened = conn.open(timeouts.connect) => Some(opened),
        };
        match opened {
            None => {
                conn.close().await;
                sm.on_cancelled()?;
                return Ok(PollSummary {
                    samples: 0,
                    malformed: 0,
                    duplicates: 0,
                    control_replies: 0,
                    overflows: 0,
                    reason: StopReason::Cancelled,
                });
            }
            Some(Err(e)) => {
                tracing::error!(host = %self.config.host, port = self.config.port, "connect failed: {}", e);
                sm.on_error(&e)?;
                return Err(e);
            }
            Some(Ok(())) => {}
        }

        let request = Request::subscribe(
            self.subscription.paths.iter().cloned(),
            self.subscription.interval_ms,
        );
        match conn.send_request(&request, timeouts.write).await {
            Ok(written) => tracing::info!(
                session = %conn.id(),
                bytes = written,
                paths = self.subscription.paths.len(),
                interval_ms = self.subscription.interval_ms,
                "subscription written"
            ),
            Err(e) => {
                tracing::error!(session = %conn.id(), "subscribe failed: {}", e);
                conn.close().await;
                sm.on_error(&e)?;
                return Err(e);
            }
        }
        sm.on_subscribed()?;
        sm.on_polling()?;

        let read_wait = timeouts.read;
        let fields = &self.subscription.report_fields;
        let suppress = self.subscription.suppress_duplicates;
        let mut last: Option<Sample> = None;
        let mut samples = 0u64;
        let mut malformed = 0u64;
        let mut duplicates = 0u64;
        let mut control_replies = 0u64;
        let mut overflows = 0u64;

        let outcome = EventLoop::new(conn, read_wait)
            .with_cancel(self.cancel.clone())
            .with_framing(self.subscription.framing)
            .with_farewell(Request::abolish(), timeouts.write)
            .on_data_ready(|bytes| {
                if let Err(e) = sm.on_data() {
                    tracing::error!("{}", e);
                    return Control::Stop;
                }

                match Response::parse(bytes) {
                    Ok(response) if !response.is_update() => {
                        tracing::debug!(events = ?response.event_names(), "control reply");
                        control_replies += 1;
                    }
                    Ok(response) => {
                        let sample = response.sample(fields);
                        if suppress && last.as_ref().is_some_and(|l| l.same_values(&sample)) {
                            duplicates += 1;
                        } else {
                            tracing::debug!("{}", sample);
                            samples += 1;
                            last = Some(sample.clone());
                            sink(Update::Sample(sample));
                        }
                    }
                    Err(e) => {
                        tracing::warn!(bytes = bytes.len(), "discarding update: {}", e);
                        malformed += 1;
                        sink(Update::Malformed {
                            error: e.to_string(),
                        });
                    }
                }

                match sm.on_reported() {
                    Ok(()) => Control::Continue,
                    Err(e) => {
                        tracing::error!("{}", e);
                        Control::Stop
                    }
                }
            })
            .on_overflow(|limit| {
                tracing::warn!(limit, "update exceeded the message size limit, dropped");
                overflows += 1;
                Control::Continue
            })
            .on_timer_expired(|_| Control::Stop)
            .run()
            .await;

        let summary = |reason| PollSummary {
            samples,
            malformed,
            duplicates,
            control_replies,
            overflows,
            reason,
        };

        match outcome {
            Ok(StopReason::TimerExpired) => {
                sm.on_read_timeout()?;
                tracing::warn!(
                    read_wait_ms = read_wait.as_millis() as u64,
                    interval_ms = self.subscription.interval_ms,
                    "no update within the read window: update interval too aggressive for the wait window"
                );
                sm.on_closed()?;
                Err(TelemetryError::ReadTimeout(read_wait))
            }
            Ok(StopReason::Cancelled) => {
                sm.on_cancelled()?;
                tracing::info!(samples, "polling cancelled");
                Ok(summary(StopReason::Cancelled))
            }
            Ok(reason) => {
                if sm.state() != PollState::Closed {
                    sm.on_closed()?;
                }
                Ok(summary(reason))
            }
            Err(e) => {
                tracing::error!("polling ended: {}", e);
                sm.on_error(&e)?;
                Err(e)
            }
        }
    }
}

/// Handle to a poller running on a background task.
#[derive(Debug)]
pub struct PollerHandle {
    cancel: CancellationToken,
    join: JoinHandle<TelemetryResult<PollSummary>>,
}

impl PollerHandle {
    /// Ask the loop to stop. It closes the socket before finishing.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Whether the task already finished.
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Wait for the loop to finish.
    pub async fn join(self) -> TelemetryResult<PollSummary> {
        self.join
            .await
            .map_err(|e| TelemetryError::Protocol(format!("poller task failed: {}", e)))?
    }

    /// Stop the loop and wait for it.
    pub async fn stop_and_join(self) -> TelemetryResult<PollSummary> {
        self.stop();
        self.join().await
    }
}
