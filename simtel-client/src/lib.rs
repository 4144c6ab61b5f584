//! simtel client - TCP/XML telemetry client for a driving simulator.
//!
//! # Example
//!
//! ```no_run
//! use simtel_client::{ClientConfig, Subscription, TelemetryClient, Update};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = TelemetryClient::new(ClientConfig::new("192.168.31.107", 5678));
//!
//!     let exterior = client.get_value("/root/thisVehicle/exterior").await?;
//!     println!("fuel type: {:?}", exterior.field("fuelType"));
//!
//!     client
//!         .subscribe(Subscription::default(), |update| {
//!             if let Update::Sample(sample) = update {
//!                 println!("{}", sample);
//!             }
//!         })
//!         .await?;
//!     Ok(())
//! }
//! ```

mod config;
mod connection;
mod event_loop;
mod poller;
mod state_machine;

pub use config::{ClientConfig, Subscription, Timeouts, RPM_PATH, SPEED_PATH};
pub use connection::Connection;
pub use event_loop::{Control, EventLoop, StopReason};
pub use poller::{PollSummary, Poller, PollerHandle, Update};
pub use state_machine::PollStateMachine;

pub use simtel_core::{
    Event, EventName, Framing, Operation, Request, Response, Sample, TelemetryError,
    TelemetryResult, DEFAULT_PORT,
};

/// High-level telemetry client.
///
/// Offers one-shot request/response exchanges and subscription polling, both
/// on top of [`Connection`].
#[derive(Debug, Clone, Default)]
pub struct TelemetryClient {
    config: ClientConfig,
}

impl TelemetryClient {
    /// Create a client for the simulator described by `config`.
    pub fn new(config: ClientConfig) -> Self {
        Self { config }
    }

    /// Get the client configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Read the value(s) under `path` in a one-shot exchange.
    pub async fn get_value(&self, path: impl Into<String>) -> TelemetryResult<Response> {
        self.request(&Request::get_value(path)).await
    }

    /// Send `request` and parse the first response.
    ///
    /// Opens a fresh connection with the one-shot budgets and always closes it.
    pub async fn request(&self, request: &Request) -> TelemetryResult<Response> {
        let timeouts = self.config.timeouts;
        let mut conn = Connection::from_config(&self.config);
        conn.open(timeouts.connect).await?;

        let result = exchange(&mut conn, request, timeouts).await;
        conn.close().await;

        if let Err(e) = &result {
            tracing::warn!(
                session = %conn.id(),
                timed_out = ?e.timed_out(),
                "request failed: {}",
                e
            );
        }
        result
    }

    /// Build a poller for `subscription`.
    pub fn poller(&self, subscription: Subscription) -> Poller {
        Poller::new(self.config.clone(), subscription)
    }

    /// Subscribe and poll until the read window elapses or the peer closes.
    pub async fn subscribe<F>(
        &self,
        subscription: Subscription,
        sink: F,
    ) -> TelemetryResult<PollSummary>
    where
        F: FnMut(Update) + Send,
    {
        self.poller(subscription).run(sink).await
    }
}

async fn exchange(
    conn: &mut Connection,
    request: &Request,
    timeouts: Timeouts,
) -> TelemetryResult<Response> {
    let written = conn.send_request(request, timeouts.write).await?;
    tracing::debug!(session = %conn.id(), bytes = written, "request sent");

    let bytes = conn.receive(timeouts.read).await?;
    tracing::debug!(session = %conn.id(), bytes = bytes.len(), "response received");

    Response::parse(&bytes)
}
