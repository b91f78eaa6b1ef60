//! Errors raised while moving frames between engines and their clients.
use std::io;

use thiserror::Error;

use crate::frame::MAX_FRAME_LEN;

/// Transport and framing failures
#[derive(Debug, Error)]
pub enum WireError {
    /// socket level failure
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// the peer did not answer within the allotted time
    #[error("timed out waiting for {0}")]
    Timeout(&'static str),

    /// the peer closed the connection
    #[error("connection closed by peer")]
    ConnectionClosed,

    /// a frame exceeded [`MAX_FRAME_LEN`]
    #[error("frame of {0} bytes exceeds the {MAX_FRAME_LEN} byte limit")]
    FrameTooLarge(usize),

    /// an earlier request on this connection timed out and its reply may
    /// still arrive, so the connection is no longer used
    #[error("connection abandoned after an earlier timeout")]
    Abandoned,

    /// the frame body could not be decoded
    #[error("malformed frame: {0}")]
    Malformed(String),
}

impl WireError {
    /// Returns true if the peer did not respond in time
    pub fn is_timeout(&self) -> bool {
        matches!(self, WireError::Timeout(_))
    }

    /// Returns true if the peer could not be reached or went away, i.e. there
    /// is nothing listening anymore, or the connection to it was abandoned
    pub fn is_unreachable(&self) -> bool {
        match self {
            WireError::ConnectionClosed | WireError::Abandoned => true,
            WireError::Io(err) => matches!(
                err.kind(),
                io::ErrorKind::ConnectionRefused
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::BrokenPipe
                    | io::ErrorKind::NotConnected
            ),
            _ => false,
        }
    }
}
