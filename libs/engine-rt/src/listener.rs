//! Listener setup for engine sockets
use std::{
    io,
    net::{IpAddr, Ipv4Addr, SocketAddr},
};

use socket2::{Domain, Protocol, Socket, Type};
use tracing::debug;

/// Engines only ever listen on loopback
pub const LOCALHOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

const LISTEN_BACKLOG: i32 = 1024;

/// Bind a non-blocking TCP listener on `addr`.
///
/// `SO_REUSEADDR` is set so a port given up by a stopped engine can be bound
/// again right away even while old connections sit in `TIME_WAIT`.
pub fn bind_listener(addr: SocketAddr) -> io::Result<std::net::TcpListener> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(LISTEN_BACKLOG)?;
    debug!(?addr, "listener bound");
    Ok(socket.into())
}
