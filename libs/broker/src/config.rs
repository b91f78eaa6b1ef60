//! Broker configuration, built from caller properties.
use std::{net::SocketAddr, path::PathBuf, time::Duration};

use engine_rt::{
    MAX_FRAME_LEN,
    props::{ConfigError, Properties, parse_prop, parse_prop_or, warn_unknown},
};

/// id registered with the coordinator
pub const BROKER_ID: &str = "broker.id";
/// directory holding the topic segments
pub const LOG_DIRS: &str = "log.dirs";
/// create topics on first produce or fetch
pub const AUTO_CREATE_TOPICS: &str = "auto.create.topics.enable";
/// largest accepted record payload, in bytes
pub const MESSAGE_MAX_BYTES: &str = "message.max.bytes";
/// worker threads of the broker runtime
pub const NUM_NETWORK_THREADS: &str = "num.network.threads";
/// how long to wait for the coordinator at start
pub const COORDINATOR_CONNECTION_TIMEOUT_MS: &str = "coordinator.connection.timeout.ms";

/// default for [`MESSAGE_MAX_BYTES`]
pub const DEFAULT_MESSAGE_MAX_BYTES: usize = 1_048_588;
/// largest allowed [`MESSAGE_MAX_BYTES`], leaving room in a frame for the
/// topic name and record framing
pub const MAX_MESSAGE_MAX_BYTES: usize = MAX_FRAME_LEN - 1024;
/// default for [`NUM_NETWORK_THREADS`]
pub const DEFAULT_NUM_NETWORK_THREADS: usize = 2;
/// default for [`COORDINATOR_CONNECTION_TIMEOUT_MS`]
pub const DEFAULT_COORDINATOR_CONNECTION_TIMEOUT_MS: u64 = 6_000;

const KNOWN: &[&str] = &[
    BROKER_ID,
    LOG_DIRS,
    AUTO_CREATE_TOPICS,
    MESSAGE_MAX_BYTES,
    NUM_NETWORK_THREADS,
    COORDINATOR_CONNECTION_TIMEOUT_MS,
];

/// Everything the broker needs to start
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerConfig {
    /// port to listen on, on loopback
    pub port: u16,
    /// coordinator the broker registers with
    pub coordinator: SocketAddr,
    /// id of the broker in the coordinator
    pub broker_id: u32,
    /// where topic segments are written
    pub log_dir: PathBuf,
    /// whether unknown topics are created on use
    pub auto_create_topics: bool,
    /// largest accepted payload
    pub message_max_bytes: usize,
    /// runtime worker threads
    pub network_threads: usize,
    /// connect timeout towards the coordinator
    pub coordinator_timeout: Duration,
}

impl BrokerConfig {
    /// Build a config for a broker on `port` registering with `coordinator`.
    /// [`LOG_DIRS`] is required, unknown keys are logged and ignored.
    pub fn from_properties(
        port: u16,
        coordinator: SocketAddr,
        props: &Properties,
    ) -> Result<Self, ConfigError> {
        warn_unknown("broker", props, KNOWN);
        let log_dir: PathBuf = parse_prop(props, LOG_DIRS)?.ok_or(ConfigError::Missing(LOG_DIRS))?;
        let network_threads = parse_prop_or(props, NUM_NETWORK_THREADS, DEFAULT_NUM_NETWORK_THREADS)?;
        if network_threads == 0 {
            return Err(ConfigError::Invalid {
                key: NUM_NETWORK_THREADS,
                value: "0".into(),
                reason: "at least one thread is required".into(),
            });
        }
        let message_max_bytes =
            parse_prop_or(props, MESSAGE_MAX_BYTES, DEFAULT_MESSAGE_MAX_BYTES)?;
        if message_max_bytes > MAX_MESSAGE_MAX_BYTES {
            return Err(ConfigError::Invalid {
                key: MESSAGE_MAX_BYTES,
                value: message_max_bytes.to_string(),
                reason: format!(
                    "records larger than {MAX_MESSAGE_MAX_BYTES} bytes cannot be fetched"
                ),
            });
        }
        Ok(Self {
            port,
            coordinator,
            broker_id: parse_prop_or(props, BROKER_ID, 0)?,
            log_dir,
            auto_create_topics: parse_prop_or(props, AUTO_CREATE_TOPICS, true)?,
            message_max_bytes,
            network_threads,
            coordinator_timeout: Duration::from_millis(parse_prop_or(
                props,
                COORDINATOR_CONNECTION_TIMEOUT_MS,
                DEFAULT_COORDINATOR_CONNECTION_TIMEOUT_MS,
            )?),
        })
    }

    /// path of this broker's registration node
    pub fn registration_path(&self) -> String {
        format!("/brokers/ids/{}", self.broker_id)
    }
}

#[cfg(test)]
mod tests {
    use engine_rt::LOCALHOST;

    use super::*;

    fn coordinator() -> SocketAddr {
        SocketAddr::new(LOCALHOST, 2181)
    }

    #[test]
    fn test_defaults() -> Result<(), ConfigError> {
        let props = Properties::from([(LOG_DIRS.to_owned(), "/tmp/logs".to_owned())]);
        let cfg = BrokerConfig::from_properties(9092, coordinator(), &props)?;
        assert_eq!(cfg.broker_id, 0);
        assert!(cfg.auto_create_topics);
        assert_eq!(cfg.message_max_bytes, DEFAULT_MESSAGE_MAX_BYTES);
        assert_eq!(cfg.network_threads, DEFAULT_NUM_NETWORK_THREADS);
        assert_eq!(cfg.coordinator_timeout, Duration::from_secs(6));
        assert_eq!(cfg.registration_path(), "/brokers/ids/0");
        Ok(())
    }

    #[test]
    fn test_overrides() -> Result<(), ConfigError> {
        let props = Properties::from([
            (LOG_DIRS.to_owned(), "/tmp/logs".to_owned()),
            (BROKER_ID.to_owned(), "3".to_owned()),
            (AUTO_CREATE_TOPICS.to_owned(), "false".to_owned()),
            (MESSAGE_MAX_BYTES.to_owned(), "16".to_owned()),
        ]);
        let cfg = BrokerConfig::from_properties(9092, coordinator(), &props)?;
        assert_eq!(cfg.broker_id, 3);
        assert!(!cfg.auto_create_topics);
        assert_eq!(cfg.message_max_bytes, 16);
        Ok(())
    }

    #[test]
    fn test_invalid() {
        let props = Properties::from([
            (LOG_DIRS.to_owned(), "/tmp/logs".to_owned()),
            (NUM_NETWORK_THREADS.to_owned(), "0".to_owned()),
        ]);
        assert!(matches!(
            BrokerConfig::from_properties(9092, coordinator(), &props),
            Err(ConfigError::Invalid { key: NUM_NETWORK_THREADS, .. })
        ));
        let props = Properties::from([
            (LOG_DIRS.to_owned(), "/tmp/logs".to_owned()),
            (MESSAGE_MAX_BYTES.to_owned(), MAX_FRAME_LEN.to_string()),
        ]);
        assert!(matches!(
            BrokerConfig::from_properties(9092, coordinator(), &props),
            Err(ConfigError::Invalid { key: MESSAGE_MAX_BYTES, .. })
        ));
        assert_eq!(
            BrokerConfig::from_properties(9092, coordinator(), &Properties::new()),
            Err(ConfigError::Missing(LOG_DIRS))
        );
    }
}
