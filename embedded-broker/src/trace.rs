//! tracing configuration for test binaries
use std::env;

use anyhow::Result;
use tracing::debug;
use tracing_subscriber::{
    filter::EnvFilter,
    fmt::{
        self,
        format::{Format, PrettyFields},
    },
    prelude::__tracing_subscriber_SubscriberExt,
    util::SubscriberInitExt,
};

/// env var holding the log filter, any `RUST_LOG` style directive works
pub const LOG_VAR: &str = "EMBEDDED_BROKER_LOG";
/// env var selecting "json", "pretty" or "standard" output
pub const LOG_FORMAT_VAR: &str = "LOG_FORMAT";
/// filter used when neither the caller nor the environment sets one
pub const DEFAULT_LOG: &str = "info";

static DEFAULT_LOG_FORMAT: &str = "standard";

/// Install a global subscriber. The filter comes from `EMBEDDED_BROKER_LOG`,
/// else `filter`, else `info`. Calling this again, or after another
/// subscriber was installed, leaves the existing one in place.
pub fn init(filter: Option<&str>) -> Result<()> {
    let directives = env::var(LOG_VAR)
        .ok()
        .or_else(|| filter.map(str::to_owned))
        .unwrap_or_else(|| DEFAULT_LOG.to_owned());
    let filter = EnvFilter::try_new(&directives).or_else(|_| EnvFilter::try_new(DEFAULT_LOG))?;
    let log_frmt = env::var(LOG_FORMAT_VAR).unwrap_or_else(|_| DEFAULT_LOG_FORMAT.to_owned());

    let res = match &log_frmt[..] {
        "json" => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_test_writer())
            .try_init(),
        "pretty" => tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .event_format(Format::default().pretty().with_source_location(false))
                    .fmt_fields(PrettyFields::new())
                    .with_test_writer(),
            )
            .try_init(),
        _ => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_test_writer())
            .try_init(),
    };
    if let Err(err) = res {
        debug!(?err, "subscriber already installed");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_twice() -> Result<()> {
        init(Some("debug"))?;
        init(None)?;
        Ok(())
    }
}
