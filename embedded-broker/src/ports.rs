//! Port selection for new sessions
use std::{collections::HashMap, io, net::SocketAddr};

use engine_rt::{LOCALHOST, bind_listener};
use tracing::{debug, warn};

/// attempts to find an auto port that no live session holds
const MAX_ATTEMPTS: usize = 16;

/// Picks ports for sessions and remembers which ones live sessions hold.
///
/// An auto port is found by binding port 0 and releasing the socket straight
/// away, so the engine may still lose it to another process before binding.
/// What the resolver does guarantee is that it never hands out a port that a
/// live session of the same orchestrator holds.
#[derive(Debug, Default)]
pub struct PortResolver {
    // port -> number of live claims
    claimed: HashMap<u16, usize>,
}

impl PortResolver {
    /// Resolve `requested` and claim the result. `0` picks a free port, any
    /// other value is returned unchanged.
    pub fn resolve(&mut self, requested: u16) -> io::Result<u16> {
        let port = if requested == 0 {
            self.pick()?
        } else {
            if self.is_claimed(requested) {
                warn!(port = requested, "explicit port is already held by a live session");
            }
            requested
        };
        *self.claimed.entry(port).or_default() += 1;
        Ok(port)
    }

    /// Drop one claim on `port`
    pub fn release(&mut self, port: u16) {
        if let Some(count) = self.claimed.get_mut(&port) {
            *count -= 1;
            if *count == 0 {
                self.claimed.remove(&port);
            }
        }
    }

    /// true while a live session holds `port`
    pub fn is_claimed(&self, port: u16) -> bool {
        self.claimed.contains_key(&port)
    }

    /// true if no port is claimed
    pub fn is_empty(&self) -> bool {
        self.claimed.is_empty()
    }

    fn pick(&self) -> io::Result<u16> {
        for attempt in 1..=MAX_ATTEMPTS {
            let port = bind_listener(SocketAddr::new(LOCALHOST, 0))?
                .local_addr()?
                .port();
            if !self.is_claimed(port) {
                debug!(port, attempt, "picked free port");
                return Ok(port);
            }
            debug!(port, "picked port is claimed, retrying");
        }
        Err(io::Error::new(
            io::ErrorKind::AddrInUse,
            format!("no unclaimed port after {MAX_ATTEMPTS} attempts"),
        ))
    }
}
