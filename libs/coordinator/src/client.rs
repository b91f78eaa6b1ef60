//! Blocking coordinator client
use std::{net::SocketAddr, time::Duration};

use bytes::Bytes;
use engine_rt::{BlockingConn, WireError};
use thiserror::Error;

use crate::proto::{ErrorCode, Request, Response};

/// Failures talking to the coordinator
#[derive(Debug, Error)]
pub enum ClientError {
    /// transport failure, including timeouts and refused connections
    #[error(transparent)]
    Wire(#[from] WireError),

    /// the coordinator answered with an error
    #[error("coordinator rejected request ({code:?}): {message}")]
    Rejected {
        /// failure class
        code: ErrorCode,
        /// detail from the coordinator
        message: String,
    },

    /// the coordinator answered with the wrong kind of response
    #[error("unexpected response to {request}: {response:?}")]
    Unexpected {
        /// request kind
        request: &'static str,
        /// what came back
        response: Response,
    },
}

/// A client session. Ephemeral nodes created through it live exactly as long
/// as it stays connected.
#[derive(Debug)]
pub struct CoordinatorClient {
    conn: BlockingConn<Response, Request>,
    timeout: Duration,
}

impl CoordinatorClient {
    /// Connect to the coordinator at `addr`. `timeout` bounds the connect and
    /// every later request.
    pub fn connect(addr: SocketAddr, timeout: Duration) -> Result<Self, ClientError> {
        Ok(Self {
            conn: BlockingConn::connect(addr, timeout)?,
            timeout,
        })
    }

    /// address of the coordinator
    pub fn peer_addr(&self) -> SocketAddr {
        self.conn.peer_addr()
    }

    /// create a node at `path`
    pub fn create(&mut self, path: &str, data: Bytes, ephemeral: bool) -> Result<(), ClientError> {
        let req = Request::Create {
            path: path.to_owned(),
            data,
            ephemeral,
        };
        match self.call(req)? {
            Response::Created => Ok(()),
            response => unexpected("create", response),
        }
    }

    /// read the node at `path`
    pub fn get(&mut self, path: &str) -> Result<Option<Bytes>, ClientError> {
        match self.call(Request::Get {
            path: path.to_owned(),
        })? {
            Response::Data(data) => Ok(data),
            response => unexpected("get", response),
        }
    }

    /// list the children of `path`
    pub fn children(&mut self, path: &str) -> Result<Vec<String>, ClientError> {
        match self.call(Request::Children {
            path: path.to_owned(),
        })? {
            Response::Children(names) => Ok(names),
            response => unexpected("children", response),
        }
    }

    /// delete the node at `path`, returning whether it existed
    pub fn delete(&mut self, path: &str) -> Result<bool, ClientError> {
        match self.call(Request::Delete {
            path: path.to_owned(),
        })? {
            Response::Deleted { existed } => Ok(existed),
            response => unexpected("delete", response),
        }
    }

    /// round trip to check the session is alive
    pub fn ping(&mut self) -> Result<(), ClientError> {
        match self.call(Request::Ping)? {
            Response::Pong => Ok(()),
            response => unexpected("ping", response),
        }
    }

    /// end the session, expiring its ephemeral nodes
    pub fn close(self) {
        self.conn.close();
    }

    fn call(&mut self, req: Request) -> Result<Response, ClientError> {
        match self.conn.call(req, self.timeout)? {
            Response::Error { code, message } => Err(ClientError::Rejected { code, message }),
            response => Ok(response),
        }
    }
}

fn unexpected<T>(request: &'static str, response: Response) -> Result<T, ClientError> {
    Err(ClientError::Unexpected { request, response })
}
