//! # Orchestrator
//!
//! Sessions start coordinator then broker, each confirmed ready before the
//! next step, and stop in the reverse order. A session appears on the stack
//! only once both services are ready and leaves it only after both stopped.
//! Sessions may nest; ending one never touches the services of another.
use std::{fmt, net::SocketAddr, sync::Arc};

use parking_lot::Mutex;
use tracing::{debug, error, info, instrument, warn};

use crate::{
    codec::CodecRegistry,
    config::{HarnessSettings, SessionConfig},
    error::HarnessError,
    lifecycle::{BrokerLifecycle, CoordinatorLifecycle, Lifecycle, ServiceHandle, ServiceKind},
    ports::PortResolver,
    readiness::await_ready,
};

/// Where a session is in its life
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// services are being started
    Starting,
    /// both services are ready
    Running,
    /// services are being stopped
    Stopping,
    /// both services are stopped
    Stopped,
}

#[derive(Debug)]
struct ActiveSession {
    id: u64,
    config: SessionConfig,
}

#[derive(Debug, Default)]
struct Registry {
    // innermost session last
    stack: Vec<ActiveSession>,
    ports: PortResolver,
    next_id: u64,
}

#[derive(Debug)]
struct Inner {
    registry: Mutex<Registry>,
    codecs: CodecRegistry,
    settings: HarnessSettings,
}

/// Owns the session stack. Clones share the same stack.
///
/// There is no process-wide orchestrator: tests that want isolated stacks
/// create their own.
#[derive(Debug, Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

impl Default for Orchestrator {
    fn default() -> Self {
        Self::new(HarnessSettings::default())
    }
}

impl Orchestrator {
    /// orchestrator using `settings` and the default codecs
    pub fn new(settings: HarnessSettings) -> Self {
        Self::with_codecs(settings, CodecRegistry::default())
    }

    /// orchestrator using `settings` and `codecs`
    pub fn with_codecs(settings: HarnessSettings, codecs: CodecRegistry) -> Self {
        Self {
            inner: Arc::new(Inner {
                registry: Mutex::new(Registry::default()),
                codecs,
                settings,
            }),
        }
    }

    /// orchestrator with settings read from the environment
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self::new(HarnessSettings::from_env()?))
    }

    /// timeouts in use
    pub fn settings(&self) -> &HarnessSettings {
        &self.inner.settings
    }

    /// codecs used by the `*_registered` operations
    pub fn codecs(&self) -> &CodecRegistry {
        &self.inner.codecs
    }

    /// effective config of the innermost session
    pub fn current(&self) -> Option<SessionConfig> {
        self.inner
            .registry
            .lock()
            .stack
            .last()
            .map(|s| s.config.clone())
    }

    /// effective configs of every live session, outermost first
    pub fn active_sessions(&self) -> Vec<SessionConfig> {
        self.inner
            .registry
            .lock()
            .stack
            .iter()
            .map(|s| s.config.clone())
            .collect()
    }

    /// true while any session is live
    pub fn is_running(&self) -> bool {
        !self.inner.registry.lock().stack.is_empty()
    }

    /// Run `body` inside a new session and tear the session down afterwards,
    /// whether `body` returns or panics. The result of `body` is returned
    /// as is, teardown problems are only logged.
    pub fn with_session<T, E, F>(&self, config: &SessionConfig, body: F) -> Result<T, E>
    where
        F: FnOnce(&SessionConfig) -> Result<T, E>,
        E: From<HarnessError>,
    {
        let session = self.begin(config)?;
        // dropping `session` while unwinding stops it too
        let res = body(session.config());
        session.end();
        res
    }

    /// Start a session for `config`. It runs until [`Session::end`] is called
    /// or the returned guard is dropped.
    #[instrument(level = "debug", skip_all)]
    pub fn begin(&self, config: &SessionConfig) -> Result<Session, HarnessError> {
        self.begin_with(config, BrokerLifecycle::new)
    }

    /// [`Orchestrator::begin`] with the broker lifecycle built by `brokers`
    /// from the coordinator address
    fn begin_with<L, F>(&self, config: &SessionConfig, brokers: F) -> Result<Session, HarnessError>
    where
        L: Lifecycle,
        F: FnOnce(SocketAddr) -> L,
    {
        let (id, coordinator_port, broker_port) = self.claim_ports(config)?;
        let effective = config.resolved(broker_port, coordinator_port);
        let mut session = Session {
            id,
            config: effective,
            state: SessionState::Starting,
            broker: None,
            coordinator: None,
            orchestrator: self.clone(),
        };
        debug!(session = id, coordinator_port, broker_port, "starting session");

        let coordinator_addr = match self.start_ready(
            &CoordinatorLifecycle,
            coordinator_port,
            session.config.coordinator_properties(),
        ) {
            Ok(handle) => {
                let addr = handle.addr();
                session.coordinator = Some(handle);
                addr
            }
            Err(err) => {
                session.teardown();
                return Err(err);
            }
        };
        let brokers = brokers(coordinator_addr);
        match self.start_ready(&brokers, broker_port, session.config.broker_properties()) {
            Ok(handle) => session.broker = Some(handle),
            Err(err) => {
                session.teardown();
                // the coordinator just passed its probe, so an unreachable
                // coordinator is still a failed startup from the caller's view
                return Err(match err {
                    HarnessError::BrokerUnavailable { .. } => {
                        HarnessError::startup(brokers.kind(), err)
                    }
                    err => err,
                });
            }
        }

        self.inner.registry.lock().stack.push(ActiveSession {
            id,
            config: session.config.clone(),
        });
        session.state = SessionState::Running;
        info!(
            session = id,
            broker = %session.config.broker_addr(),
            coordinator = %session.config.coordinator_addr(),
            "session running"
        );
        Ok(session)
    }

    fn claim_ports(&self, config: &SessionConfig) -> Result<(u64, u16, u16), HarnessError> {
        let mut registry = self.inner.registry.lock();
        let coordinator_port = registry
            .ports
            .resolve(config.coordinator_port)
            .map_err(|err| HarnessError::startup(ServiceKind::Coordinator, err))?;
        let broker_port = match registry.ports.resolve(config.broker_port) {
            Ok(port) => port,
            Err(err) => {
                registry.ports.release(coordinator_port);
                return Err(HarnessError::startup(ServiceKind::Broker, err));
            }
        };
        registry.next_id += 1;
        Ok((registry.next_id, coordinator_port, broker_port))
    }

    /// start a service and wait for it to accept connections, stopping it
    /// again if it never does
    fn start_ready<L: Lifecycle>(
        &self,
        lifecycle: &L,
        port: u16,
        properties: &engine_rt::Properties,
    ) -> Result<ServiceHandle, HarnessError> {
        let settings = &self.inner.settings;
        let mut handle = lifecycle.start(port, properties)?;
        if let Err(timeout) = await_ready(
            lifecycle.kind(),
            handle.addr(),
            settings.startup_timeout,
            settings.probe_interval,
        ) {
            error!(%timeout, "service did not become ready-- stopping it");
            if let Err(err) = lifecycle.stop(&mut handle) {
                warn!(?err, "failed to stop service that never became ready");
            }
            return Err(HarnessError::startup(lifecycle.kind(), timeout));
        }
        Ok(handle)
    }

    fn finish(&self, session: &Session) {
        let mut registry = self.inner.registry.lock();
        registry.stack.retain(|s| s.id != session.id);
        registry.ports.release(session.config.broker_port);
        registry.ports.release(session.config.coordinator_port);
    }
}

/// A running session. Ending or dropping it stops its broker, then its
/// coordinator, and removes it from the stack.
pub struct Session {
    id: u64,
    config: SessionConfig,
    state: SessionState,
    broker: Option<ServiceHandle>,
    coordinator: Option<ServiceHandle>,
    orchestrator: Orchestrator,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("config", &self.config)
            .field("state", &self.state)
            .finish()
    }
}

impl Session {
    /// effective configuration, ports resolved
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// current state
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Stop the session. Failures while stopping are logged.
    pub fn end(mut self) {
        self.teardown();
    }

    fn teardown(&mut self) {
        if self.state == SessionState::Stopped {
            return;
        }
        self.state = SessionState::Stopping;
        debug!(session = self.id, "stopping session");
        for handle in [self.broker.as_mut(), self.coordinator.as_mut()]
            .into_iter()
            .flatten()
        {
            if let Err(err) = handle.stop() {
                error!(?err, session = self.id, service = %handle.kind(), "teardown failure");
            }
        }
        self.broker = None;
        self.coordinator = None;
        self.orchestrator.finish(self);
        self.state = SessionState::Stopped;
        info!(session = self.id, "session stopped");
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.state != SessionState::Stopped {
            if std::thread::panicking() {
                warn!(session = self.id, "tearing down session during panic");
            }
            self.teardown();
        }
    }
}
