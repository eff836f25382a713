//! Socket transport primitives.
//!
//! Thin mio-based wrappers over the sockets the two control channels own.
//! Both channel peers run on the same host as the bridge, so everything
//! here is plain IPv4 loopback/any sockets; the wrappers exist to carry
//! the reuse options the peers expect (see [`sock`]) and to plug into
//! mio's readiness polling.

mod sock;

pub mod endpoint;
pub mod tcp;
pub mod udp;

pub use endpoint::Endpoint;
pub use tcp::{TcpListener, TcpStream};
pub use udp::UdpSocket;
