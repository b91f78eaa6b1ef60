//! Waiting for a started service to accept connections
use std::{
    net::{SocketAddr, TcpStream},
    thread,
    time::{Duration, Instant},
};

use thiserror::Error;
use tracing::{debug, trace};

use crate::lifecycle::ServiceKind;

// std rejects a zero connect timeout
const MIN_CONNECT: Duration = Duration::from_millis(1);

/// A service did not accept a connection before its deadline
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{service} at {addr} not ready after {waited:?} ({attempts} attempts)")]
pub struct ReadinessTimeout {
    /// service that was probed
    pub service: ServiceKind,
    /// address that was probed
    pub addr: SocketAddr,
    /// how long we tried
    pub waited: Duration,
    /// connect attempts made
    pub attempts: usize,
}

/// Try to connect to `addr` every `interval` until one connect succeeds or
/// `timeout` elapses. At least one attempt is always made.
pub fn await_ready(
    service: ServiceKind,
    addr: SocketAddr,
    timeout: Duration,
    interval: Duration,
) -> Result<(), ReadinessTimeout> {
    let start = Instant::now();
    let deadline = engine_rt::deadline_after(timeout);
    let mut attempts = 0;
    loop {
        attempts += 1;
        let remaining = deadline.saturating_duration_since(Instant::now());
        let connect_timeout = remaining.clamp(MIN_CONNECT, interval.max(MIN_CONNECT));
        match TcpStream::connect_timeout(&addr, connect_timeout) {
            Ok(_) => {
                debug!(%service, %addr, attempts, elapsed = ?start.elapsed(), "service ready");
                return Ok(());
            }
            Err(err) => trace!(%service, %addr, ?err, "not ready yet"),
        }
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(ReadinessTimeout {
                service,
                addr,
                waited: start.elapsed(),
                attempts,
            });
        }
        thread::sleep(interval.min(remaining));
    }
}

#[cfg(test)]
mod tests {
    use std::net::TcpListener;

    use super::*;

    #[test]
    fn test_ready_immediately() -> std::io::Result<()> {
        let listener = TcpListener::bind("127.0.0.1:0")?;
        let addr = listener.local_addr()?;
        assert_eq!(
            await_ready(
                ServiceKind::Broker,
                addr,
                Duration::from_secs(1),
                Duration::from_millis(10)
            ),
            Ok(())
        );
        Ok(())
    }

    #[test]
    fn test_ready_after_late_bind() -> std::io::Result<()> {
        let addr = TcpListener::bind("127.0.0.1:0")?.local_addr()?;
        let binder = thread::spawn(move || {
            thread::sleep(Duration::from_millis(100));
            let listener = TcpListener::bind(addr);
            thread::sleep(Duration::from_millis(500));
            drop(listener);
        });
        let res = await_ready(
            ServiceKind::Coordinator,
            addr,
            Duration::from_secs(5),
            Duration::from_millis(10),
        );
        binder.join().expect("binder panicked");
        assert_eq!(res, Ok(()));
        Ok(())
    }

    #[test]
    fn test_unbounded_timeout() -> std::io::Result<()> {
        let listener = TcpListener::bind("127.0.0.1:0")?;
        let addr = listener.local_addr()?;
        let res = await_ready(ServiceKind::Broker, addr, Duration::MAX, Duration::MAX);
        assert_eq!(res, Ok(()));
        Ok(())
    }

    #[test]
    fn test_times_out() -> std::io::Result<()> {
        let addr = TcpListener::bind("127.0.0.1:0")?.local_addr()?;
        let timeout = Duration::from_millis(150);
        let err = await_ready(ServiceKind::Coordinator, addr, timeout, Duration::from_millis(20))
            .unwrap_err();
        assert!(err.waited >= timeout);
        assert!(err.attempts > 1);
        assert_eq!(err.service, ServiceKind::Coordinator);
        Ok(())
    }
}
