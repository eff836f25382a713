//! UDP socket wrapper for mio-based I/O.
//!
//! Thin wrapper around [`mio::net::UdpSocket`] with ergonomic send/recv
//! APIs and integration with mio's polling infrastructure.

use std::io::{self, ErrorKind};

use mio::event::Source;
use mio::net::UdpSocket as MioUdpSocket;
use mio::{Interest, Registry, Token};

use super::sock;
use super::Endpoint;

/// A non-blocking UDP socket.
///
/// The socket is bound with `SO_REUSEADDR`/`SO_REUSEPORT`; use with mio's
/// [`Poll`] for readiness notification.
///
/// [`Poll`]: mio::Poll
pub struct UdpSocket {
    inner: MioUdpSocket,
}

impl UdpSocket {
    /// Creates a new UDP socket bound to the given endpoint.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket cannot be bound (e.g., address in use).
    pub fn bind(endpoint: Endpoint) -> io::Result<Self> {
        let inner = sock::bound_udp(endpoint.as_socket_addr())?;
        Ok(Self { inner })
    }

    /// Returns the local address this socket is bound to.
    ///
    /// # Errors
    ///
    /// Returns an error if the local address cannot be retrieved.
    pub fn local_addr(&self) -> io::Result<Endpoint> {
        self.inner.local_addr().map(Endpoint::from)
    }

    /// Sends a datagram to the specified endpoint.
    ///
    /// Returns the number of bytes sent, or `WouldBlock` if the socket
    /// is not ready for writing.
    ///
    /// # Errors
    ///
    /// Returns an error on I/O failure or if the socket would block.
    pub fn send_to(&self, buf: &[u8], dest: Endpoint) -> io::Result<usize> {
        self.inner.send_to(buf, dest.into())
    }

    /// Receives a datagram from the socket.
    ///
    /// Returns the number of bytes received and the source endpoint,
    /// or `WouldBlock` if no data is available.
    ///
    /// # Errors
    ///
    /// Returns an error on I/O failure or if the socket would block.
    pub fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, Endpoint)> {
        self.inner
            .recv_from(buf)
            .map(|(n, addr)| (n, Endpoint::from(addr)))
    }

    /// Attempts to send, returning `Ok(None)` instead of `WouldBlock`.
    ///
    /// Useful in polling loops where `WouldBlock` is expected.
    pub fn try_send_to(&self, buf: &[u8], dest: Endpoint) -> io::Result<Option<usize>> {
        match self.send_to(buf, dest) {
            Ok(n) => Ok(Some(n)),
            Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Attempts to receive, returning `Ok(None)` instead of `WouldBlock`.
    ///
    /// Useful in polling loops where `WouldBlock` is expected.
    pub fn try_recv_from(&self, buf: &mut [u8]) -> io::Result<Option<(usize, Endpoint)>> {
        match self.recv_from(buf) {
            Ok((n, ep)) => Ok(Some((n, ep))),
            Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e),
        }
    }
}

impl Source for UdpSocket {
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
