//! # Lifecycle adapters
//!
//! [`CoordinatorLifecycle`] and [`BrokerLifecycle`] start an engine on a
//! resolved port and hand back a [`ServiceHandle`] that stops it. Caller
//! properties are laid over the adapter defaults; the only default an adapter
//! adds is a scratch directory (`dataDir` or `log.dirs`) private to the
//! handle, created only when the caller did not pick one and deleted when the
//! handle stops.
use std::{
    fmt,
    net::SocketAddr,
    path::{Path, PathBuf},
};

use anyhow::Result;
use broker::{BrokerConfig, RunningBroker, config::LOG_DIRS};
use coordinator::{CoordinatorConfig, RunningCoordinator, config::DATA_DIR};
use engine_rt::Properties;
use serde::{Deserialize, Serialize};
use tempfile::TempDir;
use tracing::{debug, info, instrument, warn};

use crate::error::HarnessError;

/// The two services of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceKind {
    /// coordination service
    Coordinator,
    /// message broker
    Broker,
}

impl fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ServiceKind::Coordinator => "coordinator",
            ServiceKind::Broker => "broker",
        })
    }
}

/// Starts one kind of service
pub trait Lifecycle {
    /// the service this adapter starts
    fn kind(&self) -> ServiceKind;

    /// Start the service on `port` with `properties` laid over the defaults
    fn start(&self, port: u16, properties: &Properties) -> Result<ServiceHandle, HarnessError>;

    /// Stop the service behind `handle`. Stopping twice only logs a warning.
    fn stop(&self, handle: &mut ServiceHandle) -> Result<()> {
        handle.stop()
    }
}

enum Engine {
    Coordinator(RunningCoordinator),
    Broker(RunningBroker),
}

impl Engine {
    fn shutdown(&mut self) -> Result<bool> {
        match self {
            Engine::Coordinator(c) => c.shutdown(),
            Engine::Broker(b) => b.shutdown(),
        }
    }

    fn is_running(&self) -> bool {
        match self {
            Engine::Coordinator(c) => c.is_running(),
            Engine::Broker(b) => b.is_running(),
        }
    }
}

/// A running service. Dropping the handle stops it.
pub struct ServiceHandle {
    kind: ServiceKind,
    addr: SocketAddr,
    engine: Engine,
    scratch: Option<TempDir>,
    stopped: bool,
}

impl fmt::Debug for ServiceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceHandle")
            .field("kind", &self.kind)
            .field("addr", &self.addr)
            .field("scratch", &self.scratch_dir())
            .field("stopped", &self.stopped)
            .finish()
    }
}

impl ServiceHandle {
    /// which service this is
    pub fn kind(&self) -> ServiceKind {
        self.kind
    }

    /// where the service listens
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// true until the handle is stopped
    pub fn is_running(&self) -> bool {
        !self.stopped && self.engine.is_running()
    }

    #[cfg(test)]
    pub(crate) fn with_addr(mut self, addr: SocketAddr) -> Self {
        self.addr = addr;
        self
    }

    /// scratch directory owned by this handle, if the adapter created one
    pub fn scratch_dir(&self) -> Option<&Path> {
        self.scratch.as_ref().map(TempDir::path)
    }

    /// Stop the engine and remove the scratch directory. Stopping a handle
    /// that is already stopped logs a warning and does nothing else.
    pub fn stop(&mut self) -> Result<()> {
        if self.stopped {
            warn!(service = %self.kind, addr = %self.addr, "service already stopped");
            return Ok(());
        }
        self.stopped = true;
        let res = self.engine.shutdown();
        if let Some(dir) = self.scratch.take() {
            let path = dir.path().to_path_buf();
            if let Err(err) = dir.close() {
                warn!(?err, path = %path.display(), "failed to remove scratch directory");
            }
        }
        match res {
            Ok(_) => {
                info!(service = %self.kind, addr = %self.addr, "service stopped");
                Ok(())
            }
            Err(err) => Err(err.context(format!("failed to stop {} at {}", self.kind, self.addr))),
        }
    }
}

impl Drop for ServiceHandle {
    fn drop(&mut self) {
        if !self.stopped {
            if let Err(err) = self.stop() {
                warn!(?err, "failed to stop service on drop");
            }
        }
    }
}

/// Lay `caller` over a scratch directory default for `key`
fn with_scratch(
    kind: ServiceKind,
    key: &str,
    caller: &Properties,
) -> Result<(Properties, Option<TempDir>), HarnessError> {
    let mut merged = caller.clone();
    if merged.contains_key(key) {
        return Ok((merged, None));
    }
    let dir = tempfile::Builder::new()
        .prefix(&format!("embedded-{kind}-"))
        .tempdir()
        .map_err(|err| HarnessError::startup(kind, err))?;
    let path: PathBuf = dir.path().into();
    merged.insert(key.to_owned(), path.display().to_string());
    debug!(service = %kind, path = %path.display(), "created scratch directory");
    Ok((merged, Some(dir)))
}

/// Starts coordinators
#[derive(Debug, Default, Clone, Copy)]
pub struct CoordinatorLifecycle;

impl Lifecycle for CoordinatorLifecycle {
    fn kind(&self) -> ServiceKind {
        ServiceKind::Coordinator
    }

    #[instrument(level = "debug", skip(self, properties))]
    fn start(&self, port: u16, properties: &Properties) -> Result<ServiceHandle, HarnessError> {
        let kind = self.kind();
        let (props, scratch) = with_scratch(kind, DATA_DIR, properties)?;
        let config = CoordinatorConfig::from_properties(port, &props)
            .map_err(|err| HarnessError::startup(kind, err))?;
        let running = coordinator::start(config).map_err(|err| HarnessError::startup(kind, err))?;
        Ok(ServiceHandle {
            kind,
            addr: running.local_addr(),
            engine: Engine::Coordinator(running),
            scratch,
            stopped: false,
        })
    }
}

/// Starts brokers registering with one coordinator
#[derive(Debug, Clone, Copy)]
pub struct BrokerLifecycle {
    coordinator: SocketAddr,
}

impl BrokerLifecycle {
    /// adapter for brokers that register with `coordinator`
    pub fn new(coordinator: SocketAddr) -> Self {
        Self { coordinator }
    }
}

impl Lifecycle for BrokerLifecycle {
    fn kind(&self) -> ServiceKind {
        ServiceKind::Broker
    }

    /// Fails with [`HarnessError::BrokerUnavailable`] if the coordinator
    /// cannot be reached
    #[instrument(level = "debug", skip(self, properties), fields(coordinator = %self.coordinator))]
    fn start(&self, port: u16, properties: &Properties) -> Result<ServiceHandle, HarnessError> {
        let kind = self.kind();
        let (props, scratch) = with_scratch(kind, LOG_DIRS, properties)?;
        let config = BrokerConfig::from_properties(port, self.coordinator, &props)
            .map_err(|err| HarnessError::startup(kind, err))?;
        let running = broker::start(config).map_err(|err| {
            if err.is_coordinator_unreachable() {
                HarnessError::BrokerUnavailable {
                    reason: format!("coordinator at {} is unreachable", self.coordinator),
                    source: Some(err.into()),
                }
            } else {
                HarnessError::startup(kind, err)
            }
        })?;
        Ok(ServiceHandle {
            kind,
            addr: running.local_addr(),
            engine: Engine::Broker(running),
            scratch,
            stopped: false,
        })
    }
}
