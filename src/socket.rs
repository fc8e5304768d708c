//! Opening and tearing down the raw IPv4 socket the workers share.

use std::net::Shutdown;

use socket2::{Domain, Protocol, Socket, Type};
use tracing::{debug, info, warn};

use crate::error::FloodError;

/// Opens a raw IPv4 socket for packets that carry their own IP header.
///
/// `IPPROTO_RAW` already implies `IP_HDRINCL` on Linux; it is set again
/// so other kernels agree. Needs `CAP_NET_RAW`.
pub fn open(nonblocking: bool) -> Result<Socket, FloodError> {
    let socket = Socket::new(
        Domain::IPV4,
        Type::RAW,
        Some(Protocol::from(libc::IPPROTO_RAW)),
    )
    .map_err(FloodError::Socket)?;

    socket
        .set_header_included_v4(true)
        .map_err(FloodError::Socket)?;
    socket
        .set_nonblocking(nonblocking)
        .map_err(FloodError::Socket)?;

    info!(nonblocking, "raw socket opened");
    Ok(socket)
}

/// Shuts the socket down and closes it.
pub fn close(socket: Socket) {
    match socket.shutdown(Shutdown::Both) {
        Ok(()) => debug!("socket shut down"),
        // A raw socket that never connected has nothing to shut down.
        Err(err) if err.raw_os_error() == Some(libc::ENOTCONN) => {}
        Err(err) => warn!(%err, "failed to shut down socket"),
    }
    drop(socket);
    info!("socket closed");
}
