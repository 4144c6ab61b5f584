//! # simtel-core
//!
//! Core library for a driving simulator's TCP/XML telemetry protocol.
//!
//! This crate provides the request encoder, the response decoder, stream
//! framing, error types, and the state definitions shared by clients.

pub mod error;
pub mod framing;
pub mod message;
pub mod response;
pub mod state;

pub use error::{Operation, TelemetryError, TelemetryResult};
pub use framing::{Framing, MessageFramer};
pub use message::{build_get_value, build_subscribe, Event, EventName, Request, VEHICLE_ROOT};
pub use response::{
    extract_field, FieldValue, Response, Sample, ACTUAL_RPM, SPEED, SUBSCRIBED_VALUES,
};
pub use state::{PollEvent, PollState, SessionState};

/// Default TCP port of the simulator's settings controller.
pub const DEFAULT_PORT: u16 = 5678;
