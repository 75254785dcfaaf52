//! Listening socket setup and per-connection socket options.

use std::io;

use socket2::{SockRef, TcpKeepalive};
use tokio::net::{TcpListener, TcpSocket, TcpStream};

use crate::config::{AddressFamily, KeepaliveConfig, RelayConfig};
use crate::error::RelayError;

/// Create, bind and listen on the wildcard address of the configured family.
///
/// Must be called from within a Tokio runtime. Any failure drops the socket
/// before returning, so nothing is left half-open.
pub fn bind_listener(config: &RelayConfig) -> Result<TcpListener, RelayError> {
    let addr = config.bind_addr();
    let socket = match config.family {
        AddressFamily::V4 => TcpSocket::new_v4(),
        AddressFamily::V6 => TcpSocket::new_v6(),
    }
    .map_err(|source| RelayError::Socket {
        family: config.family,
        source,
    })?;

    if config.family == AddressFamily::V6 {
        // One family per relay; don't let the v6 socket pick up v4 traffic.
        SockRef::from(&socket)
            .set_only_v6(true)
            .map_err(|source| RelayError::Socket {
                family: config.family,
                source,
            })?;
    }

    socket
        .bind(addr)
        .map_err(|source| RelayError::Bind { addr, source })?;

    socket
        .listen(config.backlog)
        .map_err(|source| RelayError::Listen {
            addr,
            backlog: config.backlog,
            source,
        })
}

/// Enable TCP keepalive on an accepted connection.
pub fn apply_keepalive(stream: &TcpStream, keepalive: &KeepaliveConfig) -> io::Result<()> {
    SockRef::from(stream).set_tcp_keepalive(&keepalive_params(keepalive))
}

fn keepalive_params(keepalive: &KeepaliveConfig) -> TcpKeepalive {
    let params = TcpKeepalive::new().with_time(keepalive.idle);

    #[cfg(any(
        target_os = "android",
        target_os = "freebsd",
        target_os = "fuchsia",
        target_os = "illumos",
        target_os = "ios",
        target_os = "linux",
        target_os = "macos",
        target_os = "netbsd",
    ))]
    let params = params
        .with_interval(keepalive.interval)
        .with_retries(keepalive.probe_count);

    params
}
