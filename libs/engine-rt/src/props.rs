//! Engine properties: the string map callers use to override engine defaults.
use std::{collections::BTreeMap, fmt::Display, str::FromStr};

use thiserror::Error;
use tracing::warn;

/// property overrides, keyed by property name
pub type Properties = BTreeMap<String, String>;

/// A property could not be turned into engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// a property the engine cannot run without was not set
    #[error("missing required property '{0}'")]
    Missing(&'static str),

    /// a property was set to something the engine cannot use
    #[error("invalid value '{value}' for property '{key}': {reason}")]
    Invalid {
        /// property name
        key: &'static str,
        /// offending value
        value: String,
        /// parse failure
        reason: String,
    },
}

/// Parse the property `key`, returning `None` if it is not set
pub fn parse_prop<T>(props: &Properties, key: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    <T as FromStr>::Err: Display,
{
    props
        .get(key)
        .map(|value| {
            value.trim().parse::<T>().map_err(|err| ConfigError::Invalid {
                key,
                value: value.clone(),
                reason: err.to_string(),
            })
        })
        .transpose()
}

/// Parse the property `key`, falling back to `default` if it is not set
pub fn parse_prop_or<T>(props: &Properties, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    <T as FromStr>::Err: Display,
{
    Ok(parse_prop(props, key)?.unwrap_or(default))
}

/// Log every property in `props` that is not in `known`
pub fn warn_unknown(engine: &str, props: &Properties, known: &[&str]) {
    for key in props.keys().filter(|k| !known.contains(&k.as_str())) {
        warn!(engine, key = %key, "unknown property ignored");
    }
}

#[cfg(test)]
mod tests {
    use tracing_test::traced_test;

    use super::*;

    fn props(pairs: &[(&str, &str)]) -> Properties {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_parse_prop() {
        let p = props(&[("num", " 42 "), ("flag", "false"), ("bad", "x")]);
        assert_eq!(parse_prop::<u32>(&p, "num"), Ok(Some(42)));
        assert_eq!(parse_prop::<bool>(&p, "flag"), Ok(Some(false)));
        assert_eq!(parse_prop::<u32>(&p, "absent"), Ok(None));
        assert_eq!(parse_prop_or::<u32>(&p, "absent", 7), Ok(7));

        let err = parse_prop::<u32>(&p, "bad").unwrap_err();
        assert!(err.to_string().contains("'bad'"));
    }

    #[test]
    #[traced_test]
    fn test_warn_unknown() {
        let p = props(&[("known", "1"), ("mystery", "2")]);
        warn_unknown("test", &p, &["known"]);
        assert!(logs_contain("mystery"));
        assert!(!logs_contain("key=known"));
    }
}
