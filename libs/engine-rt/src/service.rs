//! # Background services
//!
//! Every engine runs on a dedicated OS thread that owns a tokio runtime. The
//! harness talks to it synchronously: [`BackgroundService::spawn`] returns once
//! the runtime is up and the listener is registered with it, and
//! [`BackgroundService::shutdown`] returns once the thread has exited, at which
//! point the listener and every connection it accepted are closed.
use std::{
    fmt,
    future::Future,
    io,
    net::SocketAddr,
    thread::{self, JoinHandle},
    time::Duration,
};

use anyhow::{Context, Result, anyhow, bail};
use tokio::{
    net::{TcpListener, TcpStream},
    runtime::Builder,
    task::JoinSet,
    time,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

/// How long connection tasks get to wind down before they are aborted
const SHUTDOWN_GRACE: Duration = Duration::from_secs(3);

/// Pause after a failed `accept`, so fd exhaustion does not spin the loop
const ACCEPT_BACKOFF: Duration = Duration::from_millis(10);

/// A running engine. Dropping it stops the engine.
pub struct BackgroundService {
    name: String,
    local_addr: SocketAddr,
    token: CancellationToken,
    thread: Option<JoinHandle<()>>,
}

impl fmt::Debug for BackgroundService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackgroundService")
            .field("name", &self.name)
            .field("local_addr", &self.local_addr)
            .field("running", &self.is_running())
            .finish()
    }
}

impl BackgroundService {
    /// Start `serve` on a new thread with a `worker_threads` sized runtime.
    ///
    /// `serve` receives the listener (now registered with the runtime) and a
    /// token that is cancelled when the service is asked to stop.
    pub fn spawn<F, Fut>(
        name: impl Into<String>,
        listener: std::net::TcpListener,
        worker_threads: usize,
        serve: F,
    ) -> Result<Self>
    where
        F: FnOnce(TcpListener, CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + 'static,
    {
        let name = name.into();
        let local_addr = listener.local_addr()?;
        let token = CancellationToken::new();
        // the thread reports whether the runtime came up before serving
        let (ready_tx, ready_rx) = crossbeam_channel::bounded::<io::Result<()>>(1);

        let thread = thread::Builder::new()
            .name(name.clone())
            .spawn({
                let token = token.clone();
                let name = name.clone();
                move || {
                    let rt = match Builder::new_multi_thread()
                        .worker_threads(worker_threads.max(1))
                        .thread_name(format!("{name}-worker"))
                        .enable_all()
                        .build()
                    {
                        Ok(rt) => rt,
                        Err(err) => {
                            let _ = ready_tx.send(Err(err));
                            return;
                        }
                    };
                    let svc = name.clone();
                    rt.block_on(async move {
                        let listener = match TcpListener::from_std(listener) {
                            Ok(listener) => listener,
                            Err(err) => {
                                let _ = ready_tx.send(Err(err));
                                return;
                            }
                        };
                        let _ = ready_tx.send(Ok(()));
                        if let Err(err) = serve(listener, token).await {
                            error!(?err, service = %svc, "service exited with error");
                        }
                    });
                    rt.shutdown_timeout(SHUTDOWN_GRACE);
                    debug!(service = %name, "runtime shut down");
                }
            })
            .with_context(|| format!("failed to spawn thread for {name}"))?;

        match ready_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                let _ = thread.join();
                return Err(err).with_context(|| format!("failed to start runtime for {name}"));
            }
            Err(_) => {
                let _ = thread.join();
                bail!("{name} exited before its runtime started");
            }
        }
        info!(service = %name, addr = %local_addr, "service started");

        Ok(Self {
            name,
            local_addr,
            token,
            thread: Some(thread),
        })
    }

    /// name the service thread was given
    pub fn name(&self) -> &str {
        &self.name
    }

    /// address the service is listening on
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// true until [`shutdown`] is called or the serve future returned on its own
    ///
    /// [`shutdown`]: BackgroundService::shutdown
    pub fn is_running(&self) -> bool {
        self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Cancel the service and wait for its thread to exit.
    ///
    /// Returns `Ok(false)` if the service had already been shut down.
    pub fn shutdown(&mut self) -> Result<bool> {
        let Some(thread) = self.thread.take() else {
            return Ok(false);
        };
        debug!(service = %self.name, "stopping service");
        self.token.cancel();
        thread
            .join()
            .map_err(|_| anyhow!("{} thread panicked", self.name))?;
        info!(service = %self.name, addr = %self.local_addr, "service stopped");
        Ok(true)
    }
}

impl Drop for BackgroundService {
    fn drop(&mut self) {
        trace!(service = %self.name, "BackgroundService drop called");
        if let Err(err) = self.shutdown() {
            error!(?err, "failed to stop service on drop");
        }
    }
}

/// Accept connections until `token` is cancelled.
///
/// `handler` is called for every accepted connection with a child token and
/// returns the future that serves it, or `None` to drop the connection. On
/// cancellation the listener is closed first, then connection tasks get
/// [`SHUTDOWN_GRACE`] to finish before they are aborted.
pub async fn accept_loop<H, Fut>(
    listener: TcpListener,
    token: CancellationToken,
    mut handler: H,
) -> Result<()>
where
    H: FnMut(TcpStream, SocketAddr, CancellationToken) -> Option<Fut>,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    let mut conns = JoinSet::new();
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            res = listener.accept() => {
                let (stream, peer) = match res {
                    Ok(accepted) => accepted,
                    Err(err) => {
                        warn!(?err, "failed to accept connection");
                        time::sleep(ACCEPT_BACKOFF).await;
                        continue;
                    }
                };
                if let Err(err) = stream.set_nodelay(true) {
                    debug!(?err, %peer, "failed to set TCP_NODELAY");
                }
                trace!(%peer, "accepted connection");
                if let Some(conn) = handler(stream, peer, token.child_token()) {
                    conns.spawn(async move {
                        if let Err(err) = conn.await {
                            debug!(?err, %peer, "connection ended with error");
                        }
                    });
                }
            }
            Some(res) = conns.join_next(), if !conns.is_empty() => {
                if let Err(err) = res {
                    if err.is_panic() {
                        error!(?err, "connection task panicked");
                    }
                }
            }
        }
    }

    // stop accepting before waiting on connections
    drop(listener);
    let drain = async { while conns.join_next().await.is_some() {} };
    if time::timeout(SHUTDOWN_GRACE, drain).await.is_err() {
        warn!(
            remaining = conns.len(),
            "connections did not finish within grace period-- aborting"
        );
        conns.shutdown().await;
    } else {
        debug!("all connections finished cleanly");
    }
    Ok(())
}
