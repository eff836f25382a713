//! TCP listener wrapper for mio-based I/O.

use std::io;

use mio::event::Source;
use mio::net::TcpListener as MioTcpListener;
use mio::{Interest, Registry, Token};

use super::sock;
use super::Endpoint;

pub use mio::net::TcpStream;

/// Accept queue depth; one control client plus a little slack.
const LISTEN_BACKLOG: i32 = 5;

/// A non-blocking TCP listener.
///
/// Bound with `SO_REUSEADDR`/`SO_REUSEPORT`; use with mio's [`Poll`] for
/// readiness notification. Accepted streams are plain [`TcpStream`]s.
///
/// [`Poll`]: mio::Poll
pub struct TcpListener {
    inner: MioTcpListener,
}

impl TcpListener {
    /// Creates a new listener bound to the given endpoint.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket cannot be bound or put into
    /// listening state.
    pub fn bind(endpoint: Endpoint) -> io::Result<Self> {
        let inner = sock::bound_listener(endpoint.as_socket_addr(), LISTEN_BACKLOG)?;
        Ok(Self { inner })
    }

    /// Returns the local address this listener is bound to.
    ///
    /// # Errors
    ///
    /// Returns an error if the local address cannot be retrieved.
    pub fn local_addr(&self) -> io::Result<Endpoint> {
        self.inner.local_addr().map(Endpoint::from)
    }

    /// Accepts a pending connection.
    ///
    /// Returns `WouldBlock` if no connection is waiting.
    ///
    /// # Errors
    ///
    /// Returns an error on I/O failure or if the accept would block.
    pub fn accept(&self) -> io::Result<(TcpStream, Endpoint)> {
        self.inner
            .accept()
            .map(|(stream, addr)| (stream, Endpoint::from(addr)))
    }
}

impl Source for TcpListener {
    fn register(
        &mut self,
        registry: &Registry,
        token: Token,
        interests: Interest,
    ) -> io::Result<()> {
        self.inner.register(registry, token, interests)
    }

    fn reregister(
        &mut self,
        registry: &Registry,
        token: Token,
        interests: Interest,
    ) -> io::Result<()> {
        self.inner.reregister(registry, token, interests)
    }

    fn deregister(&mut self, registry: &Registry) -> io::Result<()> {
        self.inner.deregister(registry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::ErrorKind;

    #[test]
    fn listener_bind_and_local_addr() {
        let listener = TcpListener::bind(Endpoint::localhost(0)).unwrap();
        assert_ne!(listener.local_addr().unwrap().port(), 0);
    }

    #[test]
    fn listener_accept_would_block_when_idle() {
        let listener = TcpListener::bind(Endpoint::localhost(0)).unwrap();
        let err = listener.accept().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::WouldBlock);
    }

    #[test]
    fn listener_accepts_connection() {
        let listener = TcpListener::bind(Endpoint::localhost(0)).unwrap();
        let addr = listener.local_addr().unwrap();

        let _client = std::net::TcpStream::connect(addr.as_socket_addr()).unwrap();

        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(2);
        loop {
            match listener.accept() {
                Ok((_stream, from)) => {
                    assert_eq!(from.ip(), addr.ip());
                    break;
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    assert!(
                        std::time::Instant::now() < deadline,
                        "connection never surfaced"
                    );
                    std::thread::sleep(std::time::Duration::from_millis(5));
                }
                Err(e) => panic!("accept failed: {e}"),
            }
        }
    }
}
