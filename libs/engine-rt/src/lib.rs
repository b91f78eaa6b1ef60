//! # engine-rt
//!
//! Plumbing shared by the embedded engines (broker and coordinator):
//!
//! - [`bind_listener`] binds a reusable TCP listener through `socket2`
//! - [`BackgroundService`] runs an engine on its own thread and tokio runtime
//!   and stops it on demand
//! - [`accept_loop`] drives connections until the service is cancelled
//! - [`Properties`] parsing with typed [`ConfigError`]s
//! - [`FrameCodec`] frames [`WireMessage`]s for both the async servers and the
//!   synchronous [`BlockingConn`] clients
#![warn(
    missing_debug_implementations,
    missing_docs,
    rust_2018_idioms,
    unreachable_pub,
    non_snake_case,
    non_upper_case_globals
)]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod blocking;
pub mod error;
pub mod frame;
pub mod listener;
pub mod props;
pub mod service;

pub use blocking::{BlockingConn, deadline_after};
pub use error::WireError;
pub use frame::{FrameCodec, MAX_FRAME_LEN, WireMessage};
pub use listener::{LOCALHOST, bind_listener};
pub use props::{ConfigError, Properties};
pub use service::{BackgroundService, accept_loop};
pub use tokio_util::sync::CancellationToken;
