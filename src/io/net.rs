//! `tcpConnect` / `createSocketPair` (§4.4), grounded on
//! `raya-stdlib-posix/src/net.rs`'s `host:port` address form, adapted from
//! blocking `std::net::TcpStream::connect` to a non-blocking connect driven
//! through the poller's write-readiness waiter.

use std::io::{self, Read, Write};
use std::net::ToSocketAddrs;

use mio::event::Source;
use mio::net::TcpStream;

use crate::error::Error;
use crate::io::wait_for;
use crate::io::WaitOutcome;

/// `tcpConnect(host, port, timeout)` (§4.4): issue a non-blocking connect,
/// wait for write readiness, and surface any connect-time socket error.
/// `timeout_ms <= 0.0` waits indefinitely.
pub async fn tcp_connect(host: &str, port: u16, timeout_ms: f64) -> Result<TcpStream, Error> {
    let addr = (host, port)
        .to_socket_addrs()
        .map_err(|e| Error::Io(format!("tcpConnect: resolving {host}:{port}: {e}")))?
        .next()
        .ok_or_else(|| Error::Io(format!("tcpConnect: no address for {host}:{port}")))?;

    let mut stream = TcpStream::connect(addr).map_err(Error::from)?;

    match wait_for(&mut stream, true, timeout_ms).await? {
        WaitOutcome::Ready => match stream.take_error()? {
            None => Ok(stream),
            Some(e) => Err(Error::from(e)),
        },
        WaitOutcome::Closed => Err(Error::Io(format!("tcpConnect: connection to {addr} refused"))),
        WaitOutcome::TimedOut => Err(Error::Timeout),
    }
}

/// A duplex byte stream realized either as a Unix domain socket (the
/// common case) or, as §4.4's `createSocketPair` requires, a loopback TCP
/// connection on platforms without Unix socket pairs.
pub enum DuplexSocket {
    #[cfg(unix)]
    Unix(mio::net::UnixStream),
    Tcp(TcpStream),
}

impl Read for DuplexSocket {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            #[cfg(unix)]
            DuplexSocket::Unix(s) => s.read(buf),
            DuplexSocket::Tcp(s) => s.read(buf),
        }
    }
}

impl Write for DuplexSocket {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            #[cfg(unix)]
            DuplexSocket::Unix(s) => s.write(buf),
            DuplexSocket::Tcp(s) => s.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            #[cfg(unix)]
            DuplexSocket::Unix(s) => s.flush(),
            DuplexSocket::Tcp(s) => s.flush(),
        }
    }
}

impl Source for DuplexSocket {
    fn register(
        &mut self,
        registry: &mio::Registry,
        token: mio::Token,
        interests: mio::Interest,
    ) -> io::Result<()> {
        match self {
            #[cfg(unix)]
            DuplexSocket::Unix(s) => s.register(registry, token, interests),
            DuplexSocket::Tcp(s) => s.register(registry, token, interests),
        }
    }

    fn reregister(
        &mut self,
        registry: &mio::Registry,
        token: mio::Token,
        interests: mio::Interest,
    ) -> io::Result<()> {
        match self {
            #[cfg(unix)]
            DuplexSocket::Unix(s) => s.reregister(registry, token, interests),
            DuplexSocket::Tcp(s) => s.reregister(registry, token, interests),
        }
    }

    fn deregister(&mut self, registry: &mio::Registry) -> io::Result<()> {
        match self {
            #[cfg(unix)]
            DuplexSocket::Unix(s) => s.deregister(registry),
            DuplexSocket::Tcp(s) => s.deregister(registry),
        }
    }
}

/// `createSocketPair()` (§4.4): a connected pair of byte streams for
/// intra-process hand-off. Unix domain socket pair where available;
/// loopback TCP fallback elsewhere.
#[cfg(unix)]
pub fn create_socket_pair() -> Result<(DuplexSocket, DuplexSocket), Error> {
    let (a, b) = mio::net::UnixStream::pair().map_err(Error::from)?;
    Ok((DuplexSocket::Unix(a), DuplexSocket::Unix(b)))
}

#[cfg(not(unix))]
pub fn create_socket_pair() -> Result<(DuplexSocket, DuplexSocket), Error> {
    use std::net::{TcpListener, TcpStream as StdTcpStream};

    let listener = TcpListener::bind(("127.0.0.1", 0)).map_err(Error::from)?;
    let addr = listener.local_addr().map_err(Error::from)?;
    let a = StdTcpStream::connect(addr).map_err(Error::from)?;
    let (b, _) = listener.accept().map_err(Error::from)?;
    a.set_nonblocking(true).map_err(Error::from)?;
    b.set_nonblocking(true).map_err(Error::from)?;
    Ok((
        DuplexSocket::Tcp(TcpStream::from_std(a)),
        DuplexSocket::Tcp(TcpStream::from_std(b)),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::Scheduler;
    use std::net::TcpListener as StdTcpListener;
    use std::time::Duration;

    #[test]
    fn tcp_connect_succeeds_against_a_local_listener() {
        let listener = StdTcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        std::thread::spawn(move || {
            let _ = listener.accept();
        });

        let result = Scheduler::run_blocking(async move {
            tcp_connect("127.0.0.1", addr.port(), 2000.0).await
        });
        assert!(result.is_ok());
    }

    #[test]
    fn tcp_connect_times_out_against_an_unroutable_address() {
        let result = Scheduler::run_blocking(async move {
            tcp_connect("10.255.255.1", 9, 5.0).await.map(|_| ())
        });
        assert!(result.is_err());
    }

    #[test]
    fn socket_pair_is_bidirectionally_connected() {
        let (mut a, mut b) = create_socket_pair().unwrap();
        a.write_all(b"ping").unwrap();
        let mut buf = [0u8; 4];
        // loopback/unix pair delivery is effectively synchronous locally
        std::thread::sleep(Duration::from_millis(5));
        let _ = b.read(&mut buf);
        assert_eq!(&buf, b"ping");
    }
}
