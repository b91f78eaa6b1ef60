//! # Server
//!
//! Startup registers the broker with the coordinator before any client can
//! be served; a broker that cannot reach its coordinator does not start.
use std::{io, net::SocketAddr, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use bytes::Bytes;
use engine_rt::{
    BackgroundService, CancellationToken, ConfigError, FrameCodec, LOCALHOST, MAX_FRAME_LEN,
    accept_loop, bind_listener,
};
use futures::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::{net::TcpStream, time};
use tokio_util::codec::Framed;
use tracing::{debug, error, instrument, trace};

use crate::{
    config::BrokerConfig,
    log::{LogError, Topics},
    metrics::{ConnectionGauge, FETCH_REQUESTS, PRODUCED_BYTES, PRODUCED_MESSAGES},
    proto::{ErrorCode, RECORDS_HEADER_LEN, Request, Response},
    registration::Registration,
};

/// Failures starting the broker
#[derive(Debug, Error)]
pub enum StartError {
    /// the properties did not form a valid configuration
    #[error("invalid broker configuration: {0}")]
    Config(#[from] ConfigError),

    /// the log directory could not be created
    #[error("failed to prepare log directory: {0}")]
    LogDir(#[source] io::Error),

    /// the coordinator did not accept a session
    #[error("coordinator at {addr} is unreachable: {source}")]
    CoordinatorUnreachable {
        /// coordinator address
        addr: SocketAddr,
        /// connect failure
        #[source]
        source: coordinator::ClientError,
    },

    /// the coordinator refused the registration, usually a duplicate id
    #[error("failed to register {path}: {source}")]
    Registration {
        /// registration node
        path: String,
        /// refusal
        #[source]
        source: coordinator::ClientError,
    },

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
    #[error("failed to launch broker: {0:#}")]
    Launch(anyhow::Error),
}

impl StartError {
    /// Returns true if the broker could not talk to its coordinator
    pub fn is_coordinator_unreachable(&self) -> bool {
        matches!(self, StartError::CoordinatorUnreachable { .. })
    }
}

/// Handle to a broker running in the background
#[derive(Debug)]
pub struct RunningBroker {
    service: BackgroundService,
    registration: Option<Registration>,
    topics: Arc<Topics>,
}

impl RunningBroker {
    /// address clients connect to
    pub fn local_addr(&self) -> SocketAddr {
        self.service.local_addr()
    }

    /// true until the broker is shut down
    pub fn is_running(&self) -> bool {
        self.service.is_running()
    }

    /// the broker's topics
    pub fn topics(&self) -> &Topics {
        &self.topics
    }

    /// Deregister from the coordinator, then stop serving and wait for the
    /// service thread. Returns `Ok(false)` if it was already stopped.
    pub fn shutdown(&mut self) -> Result<bool> {
        if let Some(registration) = self.registration.take() {
            registration.deregister();
        }
        self.service.shutdown()
    }
}

#[derive(Debug)]
struct Shared {
    topics: Arc<Topics>,
    message_max_bytes: usize,
}

/// Start a broker for `config` on its own thread
#[instrument(level = "debug", skip_all, fields(port = config.port, broker_id = config.broker_id))]
pub fn start(config: BrokerConfig) -> Result<RunningBroker, StartError> {
    let topics = Arc::new(
        Topics::new(&config.log_dir, config.auto_create_topics).map_err(StartError::LogDir)?,
    );
    let coordinator = Registration::connect(config.coordinator, config.coordinator_timeout)
        .map_err(|source| StartError::CoordinatorUnreachable {
            addr: config.coordinator,
            source,
        })?;

    let addr = SocketAddr::new(LOCALHOST, config.port);
    let listener = bind_listener(addr).map_err(|source| StartError::Bind { addr, source })?;
    let local_addr = listener
        .local_addr()
        .map_err(|source| StartError::Bind { addr, source })?;

    let path = config.registration_path();
    let registration = Registration::register(coordinator, path.clone(), local_addr)
        .map_err(|source| StartError::Registration { path, source })?;

    let shared = Arc::new(Shared {
        topics: Arc::clone(&topics),
        message_max_bytes: config.message_max_bytes,
    });
    let service = BackgroundService::spawn(
        format!("broker-{}", local_addr.port()),
        listener,
        config.network_threads,
        move |listener, token| serve(listener, token, shared),
    )
    .map_err(StartError::Launch)?;
    debug!(log_dir = %config.log_dir.display(), "broker log directory");

    Ok(RunningBroker {
        service,
        registration: Some(registration),
        topics,
    })
}

async fn serve(
    listener: tokio::net::TcpListener,
    token: CancellationToken,
    shared: Arc<Shared>,
) -> Result<()> {
    accept_loop(listener, token, |stream, peer, token| {
        let shared = Arc::clone(&shared);
        Some(connection(stream, peer, shared, token))
    })
    .await
}

async fn connection(
    stream: TcpStream,
    peer: SocketAddr,
    shared: Arc<Shared>,
    token: CancellationToken,
) -> Result<()> {
    let _gauge = ConnectionGauge::open();
    let mut framed = Framed::new(stream, FrameCodec::<Request, Response>::new());
    loop {
        let req = tokio::select! {
            _ = token.cancelled() => return Ok(()),
            req = framed.next() => req,
        };
        let req = match req {
            Some(req) => req.with_context(|| format!("bad request from {peer}"))?,
            None => {
                trace!(%peer, "client disconnected");
                return Ok(());
            }
        };
        // a long poll must not hold up shutdown
        let resp = tokio::select! {
            _ = token.cancelled() => return Ok(()),
            resp = handle(&shared, req) => resp,
        };
        framed
            .send(resp)
            .await
            .with_context(|| format!("failed to respond to {peer}"))?;
    }
}

async fn handle(shared: &Shared, req: Request) -> Response {
    match req {
        Request::Produce { topic, payload } => produce(shared, &topic, payload),
        Request::Fetch {
            topic,
            offset,
            max_records,
            max_wait_ms,
        } => {
            fetch(
                shared,
                &topic,
                offset,
                max_records,
                Duration::from_millis(max_wait_ms.into()),
            )
            .await
        }
        Request::CreateTopic { topic } => match shared.topics.create(&topic) {
            Ok((_, created)) => Response::TopicCreated { created },
            Err(err) => err.into(),
        },
    }
}

fn produce(shared: &Shared, topic: &str, payload: Bytes) -> Response {
    let len = payload.len();
    if len > shared.message_max_bytes {
        return Response::Error {
            code: ErrorCode::MessageTooLarge,
            message: format!(
                "record of {len} bytes exceeds message.max.bytes ({})",
                shared.message_max_bytes
            ),
        };
    }
    let log = match shared.topics.get(topic) {
        Ok(log) => log,
        Err(err) => return err.into(),
    };
    match log.append(payload) {
        Ok(offset) => {
            PRODUCED_MESSAGES.inc();
            PRODUCED_BYTES.inc_by(len as u64);
            trace!(topic, offset, len, "appended record");
            Response::Produced { offset }
        }
        Err(err) => {
            error!(?err, topic, "failed to append record");
            LogError::from(err).into()
        }
    }
}

async fn fetch(
    shared: &Shared,
    topic: &str,
    offset: u64,
    max_records: u32,
    max_wait: Duration,
) -> Response {
    FETCH_REQUESTS.inc();
    let log = match shared.topics.get(topic) {
        Ok(log) => log,
        Err(err) => return err.into(),
    };
    if log.next_offset() <= offset
        && time::timeout(max_wait, log.wait_for(offset)).await.is_err()
    {
        trace!(topic, offset, ?max_wait, "fetch wait elapsed");
    }
    // a reply must fit in one frame, the client asks again for the rest
    let max_bytes = MAX_FRAME_LEN - RECORDS_HEADER_LEN;
    Response::Records(log.read(offset, max_records.max(1) as usize, max_bytes))
}
