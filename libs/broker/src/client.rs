//! Blocking broker client
use std::{net::SocketAddr, time::Duration};

use bytes::Bytes;
use engine_rt::{BlockingConn, WireError};
use thiserror::Error;

use crate::{
    log::Record,
    proto::{ErrorCode, Request, Response},
};

/// Failures talking to the broker
#[derive(Debug, Error)]
pub enum ClientError {
    /// transport failure, including timeouts and refused connections
    #[error(transparent)]
    Wire(#[from] WireError),

    /// the broker refused the request
    #[error("broker rejected request ({code:?}): {message}")]
    Rejected {
        /// failure class
        code: ErrorCode,
        /// detail from the broker
        message: String,
    },

    /// the broker answered with the wrong kind of response
    #[error("unexpected response to {request}: {response:?}")]
    Unexpected {
        /// request kind
        request: &'static str,
        /// what came back
        response: Response,
    },
}

impl ClientError {
    /// Returns true if the broker could not be reached or did not answer
    pub fn is_unavailable(&self) -> bool {
        matches!(self, ClientError::Wire(err) if err.is_unreachable() || err.is_timeout())
    }
}

/// A connection to one broker
#[derive(Debug)]
pub struct BrokerClient {
    conn: BlockingConn<Response, Request>,
}

impl BrokerClient {
    /// Connect to the broker at `addr`, giving up after `timeout`
    pub fn connect(addr: SocketAddr, timeout: Duration) -> Result<Self, ClientError> {
        Ok(Self {
            conn: BlockingConn::connect(addr, timeout)?,
        })
    }

    /// address of the broker
    pub fn peer_addr(&self) -> SocketAddr {
        self.conn.peer_addr()
    }

    /// Append `payload` to `topic` and wait up to `timeout` for the
    /// acknowledgment, returning the record offset
    pub fn produce(
        &mut self,
        topic: &str,
        payload: Bytes,
        timeout: Duration,
    ) -> Result<u64, ClientError> {
        let req = Request::Produce {
            topic: topic.to_owned(),
            payload,
        };
        match self.call(req, timeout)? {
            Response::Produced { offset } => Ok(offset),
            response => unexpected("produce", response),
        }
    }

    /// Read up to `max_records` from `offset`, letting the broker hold the
    /// request for `max_wait` until one arrives. `slack` is added to the
    /// client side deadline to cover the round trip.
    pub fn fetch(
        &mut self,
        topic: &str,
        offset: u64,
        max_records: u32,
        max_wait: Duration,
        slack: Duration,
    ) -> Result<Vec<Record>, ClientError> {
        let req = Request::Fetch {
            topic: topic.to_owned(),
            offset,
            max_records,
            max_wait_ms: u32::try_from(max_wait.as_millis()).unwrap_or(u32::MAX),
        };
        match self.call(req, max_wait.saturating_add(slack))? {
            Response::Records(records) => Ok(records),
            response => unexpected("fetch", response),
        }
    }

    /// Create `topic`, returning false if it already existed
    pub fn create_topic(&mut self, topic: &str, timeout: Duration) -> Result<bool, ClientError> {
        let req = Request::CreateTopic {
            topic: topic.to_owned(),
        };
        match self.call(req, timeout)? {
            Response::TopicCreated { created } => Ok(created),
            response => unexpected("create_topic", response),
        }
    }

    /// close the connection
    pub fn close(self) {
        self.conn.close();
    }

    fn call(&mut self, req: Request, timeout: Duration) -> Result<Response, ClientError> {
        match self.conn.call(req, timeout)? {
            Response::Error { code, message } => Err(ClientError::Rejected { code, message }),
            response => Ok(response),
        }
    }
}

fn unexpected<T>(request: &'static str, response: Response) -> Result<T, ClientError> {
    Err(ClientError::Unexpected { request, response })
}
