//! State definitions for telemetry sessions and the polling loop.

/// Connection state of a single session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No socket yet.
    Disconnected,
    /// TCP connect in progress.
    Connecting,
    /// Socket established, requests may be sent.
    Connected,
    /// Terminal state - socket released.
    Closed,
}

impl SessionState {
    /// Check if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed)
    }

    /// Get valid transitions from current state.
    pub fn valid_transitions(&self) -> &'static [SessionState] {
        match self {
            Self::Disconnected => &[Self::Connecting, Self::Closed],
            Self::Connecting => &[Self::Connected, Self::Closed],
            Self::Connected => &[Self::Closed],
            Self::Closed => &[],
        }
    }

    /// Check if transition to target state is valid.
    pub fn can_transition_to(&self, target: SessionState) -> bool {
        self.valid_transitions().contains(&target)
    }
}

/// Polling loop automaton states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    /// Not started.
    Idle,
    /// Opening the connection.
    Connecting,
    /// Connected and subscription request written.
    Subscribed,
    /// Waiting for the next push within the read window.
    Polling,
    /// Decoding and emitting a received update.
    Reporting,
    /// Read window elapsed without data.
    TimedOut,
    /// Terminal state - socket closed.
    Closed,
}

impl PollState {
    /// Check if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed)
    }

    /// Get valid transitions from current state.
    pub fn valid_transitions(&self) -> &'static [PollState] {
        match self {
            Self::Idle => &[Self::Connecting],
            Self::Connecting => &[Self::Subscribed, Self::Closed],
            Self::Subscribed => &[Self::Polling, Self::Closed],
            Self::Polling => &[Self::Reporting, Self::TimedOut, Self::Closed],
            Self::Reporting => &[Self::Polling, Self::Closed],
            Self::TimedOut => &[Self::Closed],
            Self::Closed => &[],
        }
    }

    /// Check if transition to target state is valid.
    pub fn can_transition_to(&self, target: PollState) -> bool {
        self.valid_transitions().contains(&target)
    }
}

/// Events that drive polling loop transitions.
#[derive(Debug, Clone)]
pub enum PollEvent {
    /// Caller started the loop.
    Start,
    /// Connect and subscribe write both succeeded.
    Subscribed,
    /// Entered the read loop.
    PollingStarted,
    /// A buffer arrived.
    DataReceived,
    /// Update was emitted.
    Reported,
    /// Read window elapsed.
    ReadTimedOut,
    /// Caller asked the loop to stop.
    Cancelled,
    /// Socket closed after a terminal condition.
    Closed,
    /// Error occurred.
    Error(String),
}
