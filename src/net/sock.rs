//! Raw socket construction.
//!
//! Both channel peers restart independently of the bridge, so every
//! listening socket carries `SO_REUSEADDR` and `SO_REUSEPORT`. mio cannot
//! set options before bind, so the fd is built with rustix and converted
//! through std into the mio types.

use std::io;
use std::net::SocketAddr;
use std::os::fd::OwnedFd;

use rustix::net::{self, sockopt, AddressFamily, SocketFlags, SocketType};

fn reusable_socket(kind: SocketType, addr: SocketAddr) -> io::Result<OwnedFd> {
    let family = match addr {
        SocketAddr::V4(_) => AddressFamily::INET,
        SocketAddr::V6(_) => AddressFamily::INET6,
    };
    let fd = net::socket_with(
        family,
        kind,
        SocketFlags::NONBLOCK | SocketFlags::CLOEXEC,
        None,
    )?;
    sockopt::set_socket_reuseaddr(&fd, true)?;
    sockopt::set_socket_reuseport(&fd, true)?;
    net::bind(&fd, &addr)?;
    Ok(fd)
}

/// Creates a non-blocking UDP socket bound to `addr` with reuse options set.
pub(super) fn bound_udp(addr: SocketAddr) -> io::Result<mio::net::UdpSocket> {
    let fd = reusable_socket(SocketType::DGRAM, addr)?;
    Ok(mio::net::UdpSocket::from_std(std::net::UdpSocket::from(fd)))
}

/// Creates a non-blocking TCP listener bound to `addr` with reuse options set.
pub(super) fn bound_listener(addr: SocketAddr, backlog: i32) -> io::Result<mio::net::TcpListener> {
    let fd = reusable_socket(SocketType::STREAM, addr)?;
    net::listen(&fd, backlog)?;
    Ok(mio::net::TcpListener::from_std(
        std::net::TcpListener::from(fd),
    ))
}
