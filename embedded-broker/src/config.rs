//! Session and harness configuration
use std::{collections::BTreeMap, env, net::SocketAddr, time::Duration};

use anyhow::{Context, Result};
use engine_rt::{LOCALHOST, Properties};
use serde::{Deserialize, Serialize};

/// env var holding the startup timeout, per service, in milliseconds
pub const STARTUP_TIMEOUT_VAR: &str = "EMBEDDED_BROKER_STARTUP_TIMEOUT_MS";
/// env var holding the publish acknowledgment timeout in milliseconds
pub const SEND_TIMEOUT_VAR: &str = "EMBEDDED_BROKER_SEND_TIMEOUT_MS";
/// env var holding the broker connect timeout in milliseconds
pub const CONNECT_TIMEOUT_VAR: &str = "EMBEDDED_BROKER_CONNECT_TIMEOUT_MS";
/// env var holding the pause between readiness probes in milliseconds
pub const PROBE_INTERVAL_VAR: &str = "EMBEDDED_BROKER_PROBE_INTERVAL_MS";

/// default startup timeout
pub const DEFAULT_STARTUP_TIMEOUT: Duration = Duration::from_secs(10);
/// default send timeout
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(5);
/// default connect timeout
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(2);
/// default readiness probe interval
pub const DEFAULT_PROBE_INTERVAL: Duration = Duration::from_millis(50);

/// What a caller asks for when starting a session.
///
/// A port of `0` is resolved to a free port when the session starts. The
/// property maps are passed to the engines over their defaults and are never
/// rewritten: the effective config of a running session differs from the
/// requested one only in its ports.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SessionConfig {
    /// broker port, `0` to pick one
    pub broker_port: u16,
    /// coordinator port, `0` to pick one
    pub coordinator_port: u16,
    /// broker property overrides
    pub custom_broker_properties: BTreeMap<String, String>,
    /// coordinator property overrides
    pub custom_coordinator_properties: BTreeMap<String, String>,
}

impl SessionConfig {
    /// config with the given ports and no overrides
    pub fn new(broker_port: u16, coordinator_port: u16) -> Self {
        Self {
            broker_port,
            coordinator_port,
            ..Self::default()
        }
    }

    /// set the broker port
    pub fn with_broker_port(mut self, port: u16) -> Self {
        self.broker_port = port;
        self
    }

    /// set the coordinator port
    pub fn with_coordinator_port(mut self, port: u16) -> Self {
        self.coordinator_port = port;
        self
    }

    /// override one broker property
    pub fn with_broker_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.custom_broker_properties.insert(key.into(), value.into());
        self
    }

    /// override one coordinator property
    pub fn with_coordinator_property(
        mut self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.custom_coordinator_properties
            .insert(key.into(), value.into());
        self
    }

    /// where the broker listens
    pub fn broker_addr(&self) -> SocketAddr {
        SocketAddr::new(LOCALHOST, self.broker_port)
    }

    /// where the coordinator listens
    pub fn coordinator_addr(&self) -> SocketAddr {
        SocketAddr::new(LOCALHOST, self.coordinator_port)
    }

    /// true once neither port is left to be picked
    pub fn has_resolved_ports(&self) -> bool {
        self.broker_port != 0 && self.coordinator_port != 0
    }

    pub(crate) fn broker_properties(&self) -> &Properties {
        &self.custom_broker_properties
    }

    pub(crate) fn coordinator_properties(&self) -> &Properties {
        &self.custom_coordinator_properties
    }

    pub(crate) fn resolved(&self, broker_port: u16, coordinator_port: u16) -> Self {
        Self {
            broker_port,
            coordinator_port,
            ..self.clone()
        }
    }
}

/// Timeouts used by the harness
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HarnessSettings {
    /// how long each service gets to accept connections after start
    pub startup_timeout: Duration,
    /// how long a publish waits for the broker's acknowledgment
    pub send_timeout: Duration,
    /// how long connecting to the broker may take
    pub connect_timeout: Duration,
    /// pause between readiness probes
    pub probe_interval: Duration,
}

impl Default for HarnessSettings {
    fn default() -> Self {
        Self {
            startup_timeout: DEFAULT_STARTUP_TIMEOUT,
            send_timeout: DEFAULT_SEND_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            probe_interval: DEFAULT_PROBE_INTERVAL,
        }
    }
}

impl HarnessSettings {
    /// Read settings from the environment, falling back to defaults for
    /// unset variables
    pub fn from_env() -> Result<Self> {
        Self::from_vars(|name| env::var(name).ok())
    }

    /// Read settings through `lookup`, which maps a variable name to its value
    pub fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();
        let millis = |name: &str, default: Duration| -> Result<Duration> {
            match lookup(name) {
                Some(val) => val
                    .trim()
                    .parse::<u64>()
                    .map(Duration::from_millis)
                    .with_context(|| format!("error parsing env var {name}")),
                None => Ok(default),
            }
        };
        Ok(Self {
            startup_timeout: millis(STARTUP_TIMEOUT_VAR, defaults.startup_timeout)?,
            send_timeout: millis(SEND_TIMEOUT_VAR, defaults.send_timeout)?,
            connect_timeout: millis(CONNECT_TIMEOUT_VAR, defaults.connect_timeout)?,
            probe_interval: millis(PROBE_INTERVAL_VAR, defaults.probe_interval)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn test_builders_and_equality() {
        let a = SessionConfig::default()
            .with_broker_property("auto.create.topics.enable", "false")
            .with_coordinator_property("maxClientCnxns", "10");
        let b = SessionConfig::new(0, 0)
            .with_coordinator_property("maxClientCnxns", "10")
            .with_broker_property("auto.create.topics.enable", "false");
        assert_eq!(a, b);
        assert!(!a.has_resolved_ports());

        let resolved = a.resolved(9092, 2181);
        assert!(resolved.has_resolved_ports());
        assert_ne!(resolved, a);
        assert_eq!(resolved.custom_broker_properties, a.custom_broker_properties);
        assert_eq!(resolved.broker_addr(), "127.0.0.1:9092".parse().unwrap());
        assert_eq!(resolved.coordinator_addr().port(), 2181);
    }

    #[test]
    fn test_serde() -> Result<()> {
        let cfg: SessionConfig =
            serde_json::from_str(r#"{"brokerPort":12345,"customBrokerProperties":{"broker.id":"1"}}"#)?;
        assert_eq!(cfg.broker_port, 12345);
        assert_eq!(cfg.coordinator_port, 0);
        assert_eq!(cfg.custom_broker_properties["broker.id"], "1");

        let back: SessionConfig = serde_json::from_str(&serde_json::to_string(&cfg)?)?;
        assert_eq!(back, cfg);
        Ok(())
    }

    #[test]
    fn test_settings_from_vars() -> Result<()> {
        let vars = HashMap::from([(SEND_TIMEOUT_VAR, "250"), (PROBE_INTERVAL_VAR, " 5 ")]);
        let settings = HarnessSettings::from_vars(|name| vars.get(name).map(|v| v.to_string()))?;
        assert_eq!(settings.send_timeout, Duration::from_millis(250));
        assert_eq!(settings.probe_interval, Duration::from_millis(5));
        assert_eq!(settings.startup_timeout, DEFAULT_STARTUP_TIMEOUT);
        assert_eq!(settings.connect_timeout, DEFAULT_CONNECT_TIMEOUT);
        Ok(())
    }

    #[test]
    fn test_settings_reject_garbage() {
        let err = HarnessSettings::from_vars(|name| {
            (name == STARTUP_TIMEOUT_VAR).then(|| "soon".to_owned())
        })
        .unwrap_err();
        assert!(err.to_string().contains(STARTUP_TIMEOUT_VAR));
    }
}
