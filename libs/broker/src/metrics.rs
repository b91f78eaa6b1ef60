#![allow(missing_docs)] // lazy_static items dont carry docstrings well

//! # metrics
//!
//! broker statistics, registered in the default prometheus registry. Every
//! broker in the process shares them.
use lazy_static::lazy_static;
use prometheus::{IntCounter, IntGauge, register_int_counter, register_int_gauge};

lazy_static! {
    /// records appended across all topics
    pub static ref PRODUCED_MESSAGES: IntCounter =
        register_int_counter!("broker_produced_messages", "records appended").unwrap();

    /// payload bytes appended across all topics
    pub static ref PRODUCED_BYTES: IntCounter =
        register_int_counter!("broker_produced_bytes", "payload bytes appended").unwrap();

    /// fetch requests served
    pub static ref FETCH_REQUESTS: IntCounter =
        register_int_counter!("broker_fetch_requests", "fetch requests served").unwrap();

    /// client connections currently open
    pub static ref OPEN_CONNECTIONS: IntGauge =
        register_int_gauge!("broker_open_connections", "open client connections").unwrap();
}

/// Keeps [`OPEN_CONNECTIONS`] up to date for the life of a connection
#[derive(Debug)]
pub(crate) struct ConnectionGauge;

impl ConnectionGauge {
    pub(crate) fn open() -> Self {
        OPEN_CONNECTIONS.inc();
        Self
    }
}

impl Drop for ConnectionGauge {
    fn drop(&mut self) {
        OPEN_CONNECTIONS.dec();
    }
}
