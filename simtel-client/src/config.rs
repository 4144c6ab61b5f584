//! Client configuration.

use std::time::Duration;

use simtel_core::{Framing, ACTUAL_RPM, DEFAULT_PORT, SPEED};

/// Speed leaf in the simulator's data tree.
pub const SPEED_PATH: &str = "/root/thisVehicle/physicalAttributes/Properties/speed";
/// Engine rpm leaf in the simulator's data tree.
pub const RPM_PATH: &str = "/root/thisVehicle/exterior/engineCompartment/engine/Properties/actualRpm";

/// Per-operation timeout budgets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub connect: Duration,
    pub write: Duration,
    pub read: Duration,
}

impl Timeouts {
    /// Budgets for a single request/response exchange.
    pub fn one_shot() -> Self {
        Self {
            connect: Duration::from_millis(3000),
            write: Duration::from_millis(1000),
            read: Duration::from_millis(3000),
        }
    }

    /// Budgets for a subscription. `read` is the polling window.
    pub fn polling() -> Self {
        Self {
            connect: Duration::from_millis(2000),
            write: Duration::from_millis(2000),
            read: Duration::from_millis(500),
        }
    }
}

impl Default for Timeouts {
    fn default() -> Self {
        Self::one_shot()
    }
}

/// Where and how to connect.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Simulator host name or IP.
    pub host: String,
    /// Simulator port.
    pub port: u16,
    /// Budgets for one-shot requests.
    pub timeouts: Timeouts,
    /// Max bytes drained by a single receive.
    pub max_message_size: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            timeouts: Timeouts::one_shot(),
            max_message_size: 1024 * 1024,
        }
    }
}

impl ClientConfig {
    /// Create config for `host:port` with one-shot budgets.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Default::default()
        }
    }

    /// Set custom one-shot budgets.
    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Set the receive size limit.
    pub fn with_max_message_size(mut self, max: usize) -> Self {
        self.max_message_size = max;
        self
    }
}

/// What to subscribe to and how to poll for it.
#[derive(Debug, Clone)]
pub struct Subscription {
    /// Data tree paths, subscribed in this order.
    pub paths: Vec<String>,
    /// Push interval requested from the simulator.
    pub interval_ms: u64,
    /// Tags decoded from each update.
    pub report_fields: Vec<String>,
    /// Budgets for connect, subscribe write and the polling window.
    pub timeouts: Timeouts,
    /// How reads are split into documents.
    pub framing: Framing,
    /// Skip updates whose values equal the last reported ones.
    pub suppress_duplicates: bool,
}

impl Default for Subscription {
    fn default() -> Self {
        Self {
            paths: vec![RPM_PATH.to_string(), SPEED_PATH.to_string()],
            interval_ms: 200,
            report_fields: vec![SPEED.to_string(), ACTUAL_RPM.to_string()],
            timeouts: Timeouts::polling(),
            framing: Framing::PerRead,
            suppress_duplicates: false,
        }
    }
}

impl Subscription {
    /// Subscribe to `paths`, reporting the default speed and rpm fields.
    pub fn new<I, S>(paths: I, interval_ms: u64) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            paths: paths.into_iter().map(Into::into).collect(),
            interval_ms,
            ..Default::default()
        }
    }

    /// Set the reported tags.
    pub fn with_report_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.report_fields = fields.into_iter().map(Into::into).collect();
        self
    }

    /// Set custom budgets.
    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Set the polling window alone.
    pub fn with_read_wait(mut self, read_wait: Duration) -> Self {
        self.timeouts.read = read_wait;
        self
    }

    /// Set receive framing.
    pub fn with_framing(mut self, framing: Framing) -> Self {
        self.framing = framing;
        self
    }

    /// Enable or disable duplicate suppression.
    pub fn suppress_duplicates(mut self, enabled: bool) -> Self {
        self.suppress_duplicates = enabled;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reference_budgets() {
        let one_shot = Timeouts::one_shot();
        assert_eq!(one_shot.connect, Duration::from_millis(3000));
        assert_eq!(one_shot.write, Duration::from_millis(1000));
        assert_eq!(one_shot.read, Duration::from_millis(3000));

        let polling = Timeouts::polling();
        assert_eq!(polling.connect, Duration::from_millis(2000));
        assert_eq!(polling.write, Duration::from_millis(2000));
        assert_eq!(polling.read, Duration::from_millis(500));
    }

    #[test]
    fn default_config() {
        let config = ClientConfig::default();
        assert_eq!(config.port, 5678);
        assert_eq!(config.timeouts, Timeouts::one_shot());
    }

    #[test]
    fn default_subscription() {
        let sub = Subscription::default();
        assert_eq!(sub.paths, vec![RPM_PATH, SPEED_PATH]);
        assert_eq!(sub.interval_ms, 200);
        assert_eq!(sub.report_fields, vec!["speed", "actualRpm"]);
        assert_eq!(sub.timeouts.read, Duration::from_millis(500));
        assert!(!sub.suppress_duplicates);
    }

    #[test]
    fn custom_subscription() {
        let sub = Subscription::new(["/root/thisVehicle/exterior/lights"], 1000)
            .with_report_fields(["headlights"])
            .with_read_wait(Duration::from_millis(1500))
            .with_framing(Framing::MessageBoundary)
            .suppress_duplicates(true);

        assert_eq!(sub.paths.len(), 1);
        assert_eq!(sub.report_fields, vec!["headlights"]);
        assert_eq!(sub.timeouts.read, Duration::from_millis(1500));
        assert_eq!(sub.timeouts.connect, Duration::from_millis(2000));
        assert_eq!(sub.framing, Framing::MessageBoundary);
        assert!(sub.suppress_duplicates);
    }
}
