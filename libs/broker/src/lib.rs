//! # broker
//!
//! A single node message broker. Topics have one partition each; records are
//! appended to a segment file under `log.dirs` and served to consumers by
//! offset. On start the broker registers itself with the coordinator under
//! `/brokers/ids/<broker.id>` and it refuses to start if the coordinator
//! cannot be reached.
//!
//! [`start`] launches the broker on its own thread and runtime and returns a
//! [`RunningBroker`]. [`BrokerClient`] is the blocking client used by the
//! harness.
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
pub mod config;
pub mod log;
pub mod metrics;
pub mod proto;
pub mod registration;
pub mod server;

pub use client::{BrokerClient, ClientError};
pub use config::BrokerConfig;
pub use log::{LogError, Record, TopicLog, Topics};
pub use proto::{ErrorCode, Request, Response};
pub use server::{RunningBroker, StartError, start};
