//! # embedded-broker
//!
//! Ephemeral broker sessions for tests. An [`Orchestrator`] starts a
//! coordinator and a broker on free (or requested) local ports, waits for both
//! to accept connections and stops them again when the session ends, panics
//! included. Sessions nest: a session started inside another gets its own
//! ports, and publish/consume always talk to the innermost one.
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use embedded_broker::{HarnessError, Orchestrator, SessionConfig, StringCodec};
//!
//! let orch = Orchestrator::default();
//! orch.with_session(&SessionConfig::default(), |config| {
//!     assert_ne!(config.broker_port, 0);
//!     orch.publish("topic", &"message1".to_owned(), &StringCodec)?;
//!     let got: String = orch.consume_first("topic", &StringCodec, Duration::from_secs(5))?;
//!     assert_eq!(got, "message1");
//!     Ok::<_, HarnessError>(())
//! })?;
//! # Ok::<_, HarnessError>(())
//! ```
#![warn(
    missing_debug_implementations,
    missing_docs,
    rust_2018_idioms,
    unreachable_pub,
    non_snake_case,
    non_upper_case_globals
)]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod client;
pub mod codec;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod orchestrator;
pub mod ports;
pub mod readiness;
pub mod trace;

pub use client::Producer;
pub use codec::{Codec, CodecError, CodecRegistry, JsonCodec, RawCodec, StringCodec};
pub use config::{HarnessSettings, SessionConfig};
pub use error::HarnessError;
pub use lifecycle::{BrokerLifecycle, CoordinatorLifecycle, Lifecycle, ServiceHandle, ServiceKind};
pub use orchestrator::{Orchestrator, Session, SessionState};
pub use ports::PortResolver;
pub use readiness::{ReadinessTimeout, await_ready};
