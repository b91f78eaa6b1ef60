//! Coordinator configuration, built from caller properties.
use std::path::PathBuf;

use engine_rt::props::{ConfigError, Properties, parse_prop, parse_prop_or, warn_unknown};

/// directory holding the transaction log
pub const DATA_DIR: &str = "dataDir";
/// most concurrent client connections, `0` means unlimited
pub const MAX_CLIENT_CNXNS: &str = "maxClientCnxns";

/// default connection limit
pub const DEFAULT_MAX_CLIENT_CNXNS: usize = 60;

const KNOWN: &[&str] = &[DATA_DIR, MAX_CLIENT_CNXNS];

/// Everything the coordinator needs to start
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordinatorConfig {
    /// port to listen on, on loopback
    pub port: u16,
    /// where the transaction log lives
    pub data_dir: PathBuf,
    /// connection limit, `None` when unlimited
    pub max_client_cnxns: Option<usize>,
}

impl CoordinatorConfig {
    /// Build a config for `port` from `props`. [`DATA_DIR`] is required,
    /// unknown keys are logged and ignored.
    pub fn from_properties(port: u16, props: &Properties) -> Result<Self, ConfigError> {
        warn_unknown("coordinator", props, KNOWN);
        let data_dir: PathBuf = parse_prop(props, DATA_DIR)?.ok_or(ConfigError::Missing(DATA_DIR))?;
        let max = parse_prop_or(props, MAX_CLIENT_CNXNS, DEFAULT_MAX_CLIENT_CNXNS)?;
        Ok(Self {
            port,
            data_dir,
            max_client_cnxns: (max != 0).then_some(max),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn props(pairs: &[(&str, &str)]) -> Properties {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_defaults() -> Result<(), ConfigError> {
        let cfg = CoordinatorConfig::from_properties(2181, &props(&[(DATA_DIR, "/tmp/coord")]))?;
        assert_eq!(cfg.port, 2181);
        assert_eq!(cfg.data_dir, PathBuf::from("/tmp/coord"));
        assert_eq!(cfg.max_client_cnxns, Some(DEFAULT_MAX_CLIENT_CNXNS));
        Ok(())
    }

    #[test]
    fn test_zero_means_unlimited() -> Result<(), ConfigError> {
        let cfg = CoordinatorConfig::from_properties(
            0,
            &props(&[(DATA_DIR, "/tmp/coord"), (MAX_CLIENT_CNXNS, "0")]),
        )?;
        assert_eq!(cfg.max_client_cnxns, None);
        Ok(())
    }

    #[test]
    fn test_missing_and_invalid() {
        assert_eq!(
            CoordinatorConfig::from_properties(0, &Properties::new()),
            Err(ConfigError::Missing(DATA_DIR))
        );
        let err = CoordinatorConfig::from_properties(
            0,
            &props(&[(DATA_DIR, "/tmp/coord"), (MAX_CLIENT_CNXNS, "lots")]),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: MAX_CLIENT_CNXNS, .. }));
    }
}
