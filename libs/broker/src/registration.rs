//! Broker membership in the coordinator.
//!
//! The broker holds one coordinator session for as long as it runs. Its
//! registration node is ephemeral, so a broker that dies without deregistering
//! still disappears once that session closes.
use std::{
    net::SocketAddr,
    thread,
    time::{Duration, Instant},
};

use bytes::Bytes;
use coordinator::{ClientError, CoordinatorClient};
use engine_rt::deadline_after;
use tracing::{debug, info, warn};

const RETRY_INTERVAL: Duration = Duration::from_millis(25);

/// A live registration under `/brokers/ids`
#[derive(Debug)]
pub struct Registration {
    client: CoordinatorClient,
    path: String,
}

impl Registration {
    /// Connect to the coordinator at `coordinator`.
    ///
    /// A coordinator at its connection limit accepts and then drops the
    /// session, so that case is retried until `timeout` has passed. A refused
    /// connect fails straight away.
    pub fn connect(coordinator: SocketAddr, timeout: Duration) -> Result<CoordinatorClient, ClientError> {
        let deadline = deadline_after(timeout);
        let mut attempts = 1;
        loop {
            let mut client = CoordinatorClient::connect(coordinator, timeout)?;
            match client.ping() {
                Ok(()) => {
                    debug!(%coordinator, attempts, "coordinator session established");
                    return Ok(client);
                }
                Err(ClientError::Wire(err))
                    if err.is_unreachable() && Instant::now() + RETRY_INTERVAL < deadline =>
                {
                    debug!(%coordinator, ?err, attempts, "coordinator dropped session, retrying");
                    client.close();
                    attempts += 1;
                    thread::sleep(RETRY_INTERVAL);
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Publish `advertised` as the address of broker `path` over `client`
    pub fn register(
        mut client: CoordinatorClient,
        path: String,
        advertised: SocketAddr,
    ) -> Result<Self, ClientError> {
        client.create(&path, Bytes::from(advertised.to_string()), true)?;
        info!(%path, %advertised, coordinator = %client.peer_addr(), "registered broker");
        Ok(Self { client, path })
    }

    /// path of the registration node
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Remove the node and close the session. Failures are logged, the node
    /// expires with the session either way.
    pub fn deregister(mut self) {
        match self.client.delete(&self.path) {
            Ok(existed) => debug!(path = %self.path, existed, "deregistered broker"),
            Err(err) => warn!(?err, path = %self.path, "failed to deregister broker"),
        }
        self.client.close();
    }
}
