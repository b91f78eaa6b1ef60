//! Synchronous request/response over the engine framing.
//!
//! The harness exposes a blocking API, so its clients drive plain std sockets
//! with the same [`FrameCodec`] the async servers use.
use std::{
    fmt,
    io::{self, Read, Write},
    net::{Shutdown, SocketAddr, TcpStream},
    time::{Duration, Instant},
};

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};
use tracing::trace;

use crate::{
    error::WireError,
    frame::{FrameCodec, WireMessage},
};

const READ_CHUNK: usize = 8 * 1024;
// stands in for "never" when a caller passes a timeout too large for Instant
const FAR_FUTURE: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// `timeout` from now, or roughly a century away if that overflows
pub fn deadline_after(timeout: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(timeout)
        .or_else(|| now.checked_add(FAR_FUTURE))
        .unwrap_or(now)
}

/// A blocking connection that sends `Out` messages and reads `In` messages
pub struct BlockingConn<In, Out> {
    stream: TcpStream,
    peer: SocketAddr,
    codec: FrameCodec<In, Out>,
    read_buf: BytesMut,
    write_buf: BytesMut,
    // a reply was given up on, whatever arrives next belongs to it
    abandoned: bool,
}

impl<In, Out> fmt::Debug for BlockingConn<In, Out> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockingConn")
            .field("peer", &self.peer)
            .field("abandoned", &self.abandoned)
            .finish()
    }
}

impl<In: WireMessage, Out: WireMessage> BlockingConn<In, Out> {
    /// Connect to `addr`, giving up after `timeout`
    pub fn connect(addr: SocketAddr, timeout: Duration) -> Result<Self, WireError> {
        let stream = TcpStream::connect_timeout(&addr, timeout)?;
        stream.set_nodelay(true)?;
        trace!(%addr, "connected");
        Ok(Self {
            stream,
            peer: addr,
            codec: FrameCodec::new(),
            read_buf: BytesMut::with_capacity(READ_CHUNK),
            write_buf: BytesMut::new(),
            abandoned: false,
        })
    }

    /// address of the remote engine
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Write one message, failing if the socket blocks longer than `timeout`
    pub fn send(&mut self, msg: Out, timeout: Duration) -> Result<(), WireError> {
        if self.abandoned {
            return Err(WireError::Abandoned);
        }
        self.write_buf.clear();
        self.codec.encode(msg, &mut self.write_buf)?;
        self.stream.set_write_timeout(Some(non_zero(timeout)))?;
        match self.stream.write_all(&self.write_buf) {
            Ok(()) => Ok(()),
            Err(err) if is_timeout(&err) => {
                // part of the frame may be on the wire already
                self.abandon();
                Err(WireError::Timeout("write"))
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Read one message, waiting at most `timeout`. Once a read times out
    /// the connection is abandoned and every later call fails with
    /// [`WireError::Abandoned`].
    pub fn recv(&mut self, timeout: Duration) -> Result<In, WireError> {
        if self.abandoned {
            return Err(WireError::Abandoned);
        }
        let deadline = deadline_after(timeout);
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            if let Some(msg) = self.codec.decode(&mut self.read_buf)? {
                return Ok(msg);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                self.abandon();
                return Err(WireError::Timeout("response"));
            }
            self.stream.set_read_timeout(Some(remaining))?;
            match self.stream.read(&mut chunk) {
                Ok(0) => return Err(WireError::ConnectionClosed),
                Ok(n) => self.read_buf.extend_from_slice(&chunk[..n]),
                // the deadline check at the top of the loop decides
                Err(err) if err.kind() == io::ErrorKind::Interrupted || is_timeout(&err) => {
                    continue;
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// Send `msg` and wait for the reply, the whole exchange bounded by `timeout`
    pub fn call(&mut self, msg: Out, timeout: Duration) -> Result<In, WireError> {
        let deadline = deadline_after(timeout);
        self.send(msg, timeout)?;
        self.recv(deadline.saturating_duration_since(Instant::now()))
    }

    /// Returns true if an earlier timeout left this connection unusable
    pub fn is_abandoned(&self) -> bool {
        self.abandoned
    }

    /// Close both directions of the connection
    pub fn close(self) {
        let _ = self.stream.shutdown(Shutdown::Both);
    }

    fn abandon(&mut self) {
        trace!(peer = %self.peer, "abandoning connection after timeout");
        self.abandoned = true;
        self.read_buf.clear();
        let _ = self.stream.shutdown(Shutdown::Both);
    }
}

fn is_timeout(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    )
}

// std rejects a zero socket timeout
fn non_zero(timeout: Duration) -> Duration {
    timeout.max(Duration::from_millis(1))
}

#[cfg(test)]
mod tests {
    use std::{net::TcpListener, thread};

    use bytes::{BufMut, Bytes, BytesMut};

    use super::*;
    use crate::frame::get_u64;

    #[derive(Debug, PartialEq, Eq)]
    struct Num(u64);

    impl WireMessage for Num {
        fn encode(&self, dst: &mut BytesMut) {
            dst.put_u64(self.0);
        }

        fn decode(src: &mut Bytes) -> Result<Self, WireError> {
            Ok(Num(get_u64(src)?))
        }
    }

    #[test]
    fn test_call_round_trip() -> Result<(), WireError> {
        let listener = TcpListener::bind("127.0.0.1:0")?;
        let addr = listener.local_addr()?;
        let server = thread::spawn(move || -> Result<(), WireError> {
            let (first, _) = listener.accept()?;
            drop(first);
            let (stream, _) = listener.accept()?;
            let mut conn = BlockingConn::<Num, Num> {
                peer: stream.peer_addr()?,
                stream,
                codec: FrameCodec::new(),
                read_buf: BytesMut::new(),
                write_buf: BytesMut::new(),
                abandoned: false,
            };
            let Num(n) = conn.recv(Duration::from_secs(5))?;
            conn.send(Num(n + 1), Duration::from_secs(5))
        });

        // first connection is closed straight away by the server
        let mut closed = BlockingConn::<Num, Num>::connect(addr, Duration::from_secs(1))?;
        assert!(closed.recv(Duration::from_secs(5)).is_err());

        let mut conn = BlockingConn::<Num, Num>::connect(addr, Duration::from_secs(1))?;
        assert_eq!(conn.call(Num(41), Duration::from_secs(5))?, Num(42));
        server.join().expect("server thread panicked")?;
        Ok(())
    }

    #[test]
    fn test_recv_times_out() -> Result<(), WireError> {
        let listener = TcpListener::bind("127.0.0.1:0")?;
        let addr = listener.local_addr()?;
        let mut conn = BlockingConn::<Num, Num>::connect(addr, Duration::from_secs(1))?;
        let (_held, _) = listener.accept()?;

        let start = Instant::now();
        let err = conn.recv(Duration::from_millis(100)).unwrap_err();
        assert!(err.is_timeout());
        assert!(start.elapsed() >= Duration::from_millis(100));
        Ok(())
    }

    #[test]
    fn test_late_reply_is_not_handed_to_next_call() -> Result<(), WireError> {
        let listener = TcpListener::bind("127.0.0.1:0")?;
        let addr = listener.local_addr()?;
        let server = thread::spawn(move || -> Result<(), WireError> {
            let (stream, _) = listener.accept()?;
            let mut conn = BlockingConn::<Num, Num> {
                peer: stream.peer_addr()?,
                stream,
                codec: FrameCodec::new(),
                read_buf: BytesMut::new(),
                write_buf: BytesMut::new(),
                abandoned: false,
            };
            let Num(n) = conn.recv(Duration::from_secs(5))?;
            thread::sleep(Duration::from_millis(300));
            // the client may already be gone
            let _ = conn.send(Num(n + 1), Duration::from_secs(1));
            Ok(())
        });

        let mut conn = BlockingConn::<Num, Num>::connect(addr, Duration::from_secs(1))?;
        let err = conn.call(Num(1), Duration::from_millis(50)).unwrap_err();
        assert!(err.is_timeout(), "{err}");
        assert!(conn.is_abandoned());

        thread::sleep(Duration::from_millis(500));
        let err = conn.call(Num(10), Duration::from_secs(1)).unwrap_err();
        assert!(matches!(err, WireError::Abandoned), "{err}");
        assert!(matches!(conn.recv(Duration::from_secs(1)), Err(WireError::Abandoned)));
        server.join().expect("server thread panicked")?;
        Ok(())
    }

    #[test]
    fn test_unbounded_timeout() -> Result<(), WireError> {
        let listener = TcpListener::bind("127.0.0.1:0")?;
        let addr = listener.local_addr()?;
        let server = thread::spawn(move || -> Result<(), WireError> {
            let (stream, _) = listener.accept()?;
            let mut conn = BlockingConn::<Num, Num> {
                peer: stream.peer_addr()?,
                stream,
                codec: FrameCodec::new(),
                read_buf: BytesMut::new(),
                write_buf: BytesMut::new(),
                abandoned: false,
            };
            let Num(n) = conn.recv(Duration::MAX)?;
            conn.send(Num(n * 2), Duration::MAX)
        });

        let mut conn = BlockingConn::<Num, Num>::connect(addr, Duration::from_secs(1))?;
        assert_eq!(conn.call(Num(21), Duration::MAX)?, Num(42));
        server.join().expect("server thread panicked")?;

        assert!(deadline_after(Duration::MAX) > Instant::now() + Duration::from_secs(3600));
        Ok(())
    }

    #[test]
    fn test_connect_refused() -> Result<(), WireError> {
        let addr = {
            let listener = TcpListener::bind("127.0.0.1:0")?;
            listener.local_addr()?
        };
        let err = BlockingConn::<Num, Num>::connect(addr, Duration::from_millis(200)).unwrap_err();
        assert!(err.is_unreachable());
        Ok(())
    }
}
