//! Error types for the simulator telemetry protocol.

use std::time::Duration;

use thiserror::Error;

/// Which I/O operation a timeout budget applied to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Connect,
    Write,
    Read,
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connect => write!(f, "connect"),
            Self::Write => write!(f, "write"),
            Self::Read => write!(f, "read"),
        }
    }
}

/// Telemetry protocol errors.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// The TCP connection was not established within its budget.
    #[error("connect timed out after {}ms", .0.as_millis())]
    ConnectTimeout(Duration),

    /// The request was not fully written within its budget.
    #[error("write timed out after {}ms", .0.as_millis())]
    WriteTimeout(Duration),

    /// No data arrived within the read budget.
    #[error("read timed out after {}ms", .0.as_millis())]
    ReadTimeout(Duration),

    /// A received buffer is not a well-formed XML document.
    #[error("parse error: {0}")]
    Parse(String),

    /// The requested tag does not occur in the document.
    #[error("field not found: <{tag}>")]
    FieldNotFound { tag: String },

    /// The peer closed its end of the connection.
    #[error("connection closed by peer")]
    ConnectionClosedByPeer,

    /// An operation needed a connected session.
    #[error("session is not connected")]
    NotConnected,

    /// Transport error other than a timeout (refused, reset, unreachable).
    #[error("transport error: {0}")]
    Transport(String),

    /// Invalid state transition.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A request document could not be written.
    #[error("encode error: {0}")]
    Encode(String),
}

impl TelemetryError {
    /// The timed-out operation, if this is a timeout.
    pub fn timed_out(&self) -> Option<Operation> {
        match self {
            Self::ConnectTimeout(_) => Some(Operation::Connect),
            Self::WriteTimeout(_) => Some(Operation::Write),
            Self::ReadTimeout(_) => Some(Operation::Read),
            _ => None,
        }
    }

    /// Build the timeout error matching `op`.
    pub fn timeout(op: Operation, budget: Duration) -> Self {
        match op {
            Operation::Connect => Self::ConnectTimeout(budget),
            Operation::Write => Self::WriteTimeout(budget),
            Operation::Read => Self::ReadTimeout(budget),
        }
    }

    /// Whether the error ends the exchange it occurred in.
    ///
    /// Parse failures and missing fields leave the session usable.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Parse(_) | Self::FieldNotFound { .. })
    }
}

/// Result type alias for telemetry operations.
pub type TelemetryResult<T> = Result<T, TelemetryError>;
