//! Polling loop state machine.

use simtel_core::{PollEvent, PollState, TelemetryError, TelemetryResult};

/// Tracks the polling loop through connect, subscribe, poll and close.
#[derive(Debug)]
pub struct PollStateMachine {
    state: PollState,
    handled: u64,
}

impl PollStateMachine {
    /// Create a new state machine in `Idle`.
    pub fn new() -> Self {
        Self {
            state: PollState::Idle,
            handled: 0,
        }
    }

    /// Get current state.
    pub fn state(&self) -> PollState {
        self.state
    }

    /// Number of received updates handled so far.
    pub fn handled(&self) -> u64 {
        self.handled
    }

    /// Loop started, connecting.
    pub fn on_start(&mut self) -> TelemetryResult<()> {
        self.transition(PollEvent::Start)
    }

    /// Connected and subscription request written.
    pub fn on_subscribed(&mut self) -> TelemetryResult<()> {
        self.transition(PollEvent::Subscribed)
    }

    /// Entered the read loop.
    pub fn on_polling(&mut self) -> TelemetryResult<()> {
        self.transition(PollEvent::PollingStarted)
    }

    /// A buffer arrived and is being decoded.
    pub fn on_data(&mut self) -> TelemetryResult<()> {
        self.transition(PollEvent::DataReceived)
    }

    /// Decoded update was handed to the caller.
    pub fn on_reported(&mut self) -> TelemetryResult<()> {
        self.transition(PollEvent::Reported)?;
        self.handled += 1;
        Ok(())
    }

    /// Polling window elapsed without data.
    pub fn on_read_timeout(&mut self) -> TelemetryResult<()> {
        self.transition(PollEvent::ReadTimedOut)
    }

    /// Caller stopped the loop.
    pub fn on_cancelled(&mut self) -> TelemetryResult<()> {
        self.transition(PollEvent::Cancelled)
    }

    /// A fatal error ended the loop.
    pub fn on_error(&mut self, error: &TelemetryError) -> TelemetryResult<()> {
        self.transition(PollEvent::Error(error.to_string()))
    }

    /// Socket closed.
    pub fn on_closed(&mut self) -> TelemetryResult<()> {
        self.transition(PollEvent::Closed)
    }

    /// Transition to new state.
    fn transition(&mut self, event: PollEvent) -> TelemetryResult<()> {
        let new_state = match (&self.state, &event) {
            (PollState::Idle, PollEvent::Start) => PollState::Connecting,
            (PollState::Connecting, PollEvent::Subscribed) => PollState::Subscribed,
            (PollState::Subscribed, PollEvent::PollingStarted) => PollState::Polling,
            (PollState::Polling, PollEvent::DataReceived) => PollState::Reporting,
            (PollState::Reporting, PollEvent::Reported) => PollState::Polling,
            (PollState::Polling, PollEvent::ReadTimedOut) => PollState::TimedOut,
            (PollState::TimedOut, PollEvent::Closed) => PollState::Closed,
            (state, PollEvent::Cancelled | PollEvent::Closed | PollEvent::Error(_))
                if !state.is_terminal() && *state != PollState::Idle =>
            {
                PollState::Closed
            }
            _ => {
                return Err(TelemetryError::Protocol(format!(
                    "Invalid transition from {:?} on {:?}",
                    self.state, event
                )));
            }
        };

        if self.state.can_transition_to(new_state) {
            tracing::debug!("Poll state: {:?} -> {:?}", self.state, new_state);
            self.state = new_state;
            Ok(())
        } else {
            Err(TelemetryError::Protocol(format!(
                "Invalid state transition: {:?} -> {:?}",
                self.state, new_state
            )))
        }
    }
}

impl Default for PollStateMachine {
    fn default() -> Self {
        Self::new()
    }
}
