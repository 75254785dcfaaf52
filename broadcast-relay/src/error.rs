//! Fatal startup and loop errors. Per-connection failures never surface here;
//! they are logged and handled inside the multiplexer.

use std::io;
use std::net::SocketAddr;

use crate::config::AddressFamily;

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("unable to create {family} stream socket")]
    Socket {
        family: AddressFamily,
        #[source]
        source: io::Error,
    },

    #[error("socket unable to bind {addr}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("error occurred during listen on {addr} (backlog {backlog})")]
    Listen {
        addr: SocketAddr,
        backlog: u32,
        #[source]
        source: io::Error,
    },

    #[error("service discovery registration failed")]
    Discovery(#[from] DiscoveryError),

    #[error("readiness wait failed: {0}")]
    Wait(&'static str),
}

/// Reported by a [`crate::discovery::ServiceRegistrar`] that could not
/// announce the relay.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("could not advertise {service}: {reason}")]
pub struct DiscoveryError {
    pub service: String,
    pub reason: String,
}
