//! # coordinator
//!
//! A small coordination service in the spirit of a consensus-backed config
//! store, used as the dependency the embedded broker registers itself with.
//!
//! State is a tree of nodes addressed by absolute paths (`/brokers/ids/0`).
//! Nodes are persistent or ephemeral; an ephemeral node belongs to the
//! connection that created it and disappears when that connection closes.
//! Every mutation is appended to a transaction log in the data directory.
//!
//! [`start`] launches the service on its own thread and returns a
//! [`RunningCoordinator`]; [`CoordinatorClient`] is the blocking client.
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
pub mod proto;
pub mod server;
pub mod tree;

pub use client::{ClientError, CoordinatorClient};
pub use config::CoordinatorConfig;
pub use proto::{ErrorCode, Request, Response};
pub use server::{RunningCoordinator, StartError, start};
pub use tree::{NodeTree, TreeError};
