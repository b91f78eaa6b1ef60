#![allow(dead_code)]

pub mod net {
    //! "is anything listening here" checks for asserting on session ports
    use std::{
        net::{SocketAddr, TcpStream},
        thread,
        time::{Duration, Instant},
    };

    use embedded_broker::SessionConfig;
    use engine_rt::LOCALHOST;

    const CONNECT_TIMEOUT: Duration = Duration::from_millis(200);

    pub fn is_listening(port: u16) -> bool {
        TcpStream::connect_timeout(&SocketAddr::new(LOCALHOST, port), CONNECT_TIMEOUT).is_ok()
    }

    /// both services of `config` accept connections
    pub fn session_reachable(config: &SessionConfig) -> bool {
        is_listening(config.broker_port) && is_listening(config.coordinator_port)
    }

    /// neither service of `config` accepts connections
    pub fn session_unreachable(config: &SessionConfig) -> bool {
        !is_listening(config.broker_port) && !is_listening(config.coordinator_port)
    }

    /// poll until nothing listens on `port`, false if something still does
    /// after `timeout`
    pub fn wait_until_closed(port: u16, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if !is_listening(port) {
                return true;
            }
            thread::sleep(Duration::from_millis(20));
        }
        !is_listening(port)
    }
}
