//! # Server
//!
//! Accepts client connections and applies their requests to the shared
//! [`NodeTree`]. Each connection is one client session: its ephemeral nodes
//! are expired when the connection ends, however it ends.
use std::{
    io,
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use anyhow::Result;
use engine_rt::{
    BackgroundService, CancellationToken, ConfigError, FrameCodec, LOCALHOST, accept_loop,
    bind_listener,
};
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use thiserror::Error;
use tokio::{net::TcpStream, sync::Semaphore};
use tokio_util::codec::Framed;
use tracing::{debug, instrument, trace, warn};

use crate::{
    config::CoordinatorConfig,
    proto::{Request, Response},
    tree::{ConnId, NodeTree},
};

/// Failures starting the coordinator
#[derive(Debug, Error)]
pub enum StartError {
    /// the properties did not form a valid configuration
    #[error("invalid coordinator configuration: {0}")]
    Config(#[from] ConfigError),

    /// the data directory or transaction log could not be prepared
    #[error("failed to prepare data directory: {0}")]
    DataDir(#[source] io::Error),

    /// the port could not be bound
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// address we tried to listen on
        addr: SocketAddr,
        /// bind failure
        #[source]
        source: io::Error,
    },

    /// the service thread or runtime did not come up
    #[error("failed to launch coordinator: {0:#}")]
    Launch(anyhow::Error),
}

/// Handle to a coordinator running in the background
#[derive(Debug)]
pub struct RunningCoordinator {
    service: BackgroundService,
    tree: Arc<Mutex<NodeTree>>,
}

impl RunningCoordinator {
    /// address clients connect to
    pub fn local_addr(&self) -> SocketAddr {
        self.service.local_addr()
    }

    /// name of the service thread
    pub fn name(&self) -> &str {
        self.service.name()
    }

    /// true until the coordinator is shut down
    pub fn is_running(&self) -> bool {
        self.service.is_running()
    }

    /// number of nodes currently in the tree, root included
    pub fn node_count(&self) -> usize {
        self.tree.lock().len()
    }

    /// Stop accepting, close every session and wait for the service thread.
    /// Returns `Ok(false)` if it was already stopped.
    pub fn shutdown(&mut self) -> Result<bool> {
        self.service.shutdown()
    }
}

/// Start a coordinator for `config` on its own thread
#[instrument(level = "debug", skip_all, fields(port = config.port))]
pub fn start(config: CoordinatorConfig) -> Result<RunningCoordinator, StartError> {
    let tree = Arc::new(Mutex::new(
        NodeTree::with_txlog(&config.data_dir).map_err(StartError::DataDir)?,
    ));
    let addr = SocketAddr::new(LOCALHOST, config.port);
    let listener = bind_listener(addr).map_err(|source| StartError::Bind { addr, source })?;
    let local_addr = listener
        .local_addr()
        .map_err(|source| StartError::Bind { addr, source })?;
    let limit = config
        .max_client_cnxns
        .map(|max| Arc::new(Semaphore::new(max)));

    let service = BackgroundService::spawn(
        format!("coordinator-{}", local_addr.port()),
        listener,
        1,
        {
            let tree = Arc::clone(&tree);
            move |listener, token| serve(listener, token, tree, limit)
        },
    )
    .map_err(StartError::Launch)?;
    debug!(data_dir = %config.data_dir.display(), "coordinator data directory");

    Ok(RunningCoordinator { service, tree })
}

async fn serve(
    listener: tokio::net::TcpListener,
    token: CancellationToken,
    tree: Arc<Mutex<NodeTree>>,
    limit: Option<Arc<Semaphore>>,
) -> Result<()> {
    let next_id = AtomicU64::new(1);
    accept_loop(listener, token, |stream, peer, token| {
        let permit = match &limit {
            Some(sem) => match Arc::clone(sem).try_acquire_owned() {
                Ok(permit) => Some(permit),
                Err(_) => {
                    warn!(%peer, "too many client connections-- closing");
                    return None;
                }
            },
            None => None,
        };
        let id = next_id.fetch_add(1, Ordering::Relaxed);
        let tree = Arc::clone(&tree);
        Some(async move {
            // held for the life of the session
            let _permit = permit;
            session(stream, peer, id, tree, token).await
        })
    })
    .await
}

async fn session(
    stream: TcpStream,
    peer: SocketAddr,
    id: ConnId,
    tree: Arc<Mutex<NodeTree>>,
    token: CancellationToken,
) -> Result<()> {
    debug!(%peer, session = id, "session opened");
    let mut framed = Framed::new(stream, FrameCodec::<Request, Response>::new());
    let res = loop {
        let req = tokio::select! {
            _ = token.cancelled() => break Ok(()),
            req = framed.next() => req,
        };
        let req = match req {
            Some(Ok(req)) => req,
            Some(Err(err)) => break Err(err.into()),
            None => break Ok(()),
        };
        trace!(session = id, ?req, "request");
        let resp = apply(&tree, id, req);
        if let Err(err) = framed.send(resp).await {
            break Err(err.into());
        }
    };

    let expired = tree.lock().expire(id);
    if !expired.is_empty() {
        debug!(session = id, ?expired, "expired ephemeral nodes");
    }
    debug!(%peer, session = id, "session closed");
    res
}

fn apply(tree: &Mutex<NodeTree>, id: ConnId, req: Request) -> Response {
    let mut tree = tree.lock();
    let res = match req {
        Request::Create {
            path,
            data,
            ephemeral,
        } => tree
            .create(&path, data, ephemeral.then_some(id))
            .map(|_| Response::Created),
        Request::Get { path } => tree.get(&path).map(Response::Data),
        Request::Children { path } => tree.children(&path).map(Response::Children),
        Request::Delete { path } => tree
            .delete(&path)
            .map(|existed| Response::Deleted { existed }),
        Request::Ping => Ok(Response::Pong),
    };
    res.unwrap_or_else(Response::from)
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;

    #[test]
    fn test_apply_maps_tree_errors() {
        let tree = Mutex::new(NodeTree::new());
        let create = || Request::Create {
            path: "/a".into(),
            data: Bytes::new(),
            ephemeral: true,
        };
        assert_eq!(apply(&tree, 1, create()), Response::Created);
        assert!(matches!(
            apply(&tree, 2, create()),
            Response::Error {
                code: crate::proto::ErrorCode::NodeExists,
                ..
            }
        ));
        assert_eq!(
            apply(&tree, 1, Request::Children { path: "/".into() }),
            Response::Children(vec!["a".into()])
        );
        assert_eq!(apply(&tree, 1, Request::Ping), Response::Pong);
    }
}
