//! Relay configuration and the fixed constants of the wire contract.

use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;

use crate::discovery::ServiceAdvertisement;

/// Port clients expect the relay on when nothing else is configured.
pub const DEFAULT_PORT: u16 = 8584;

/// Pending, not-yet-accepted connections queued by the kernel.
pub const LISTEN_BACKLOG: u32 = 10;

/// Upper bound on a single read; one read is relayed as one message.
pub const READ_BUFFER_SIZE: usize = 256;

/// Silence across the whole relay before the heartbeat probe goes out.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Reader events buffered before reader tasks start waiting on the loop.
pub const EVENT_CHANNEL_CAPACITY: usize = 128;

/// Address family of the listening socket. The relay listens on exactly one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AddressFamily {
    #[default]
    V4,
    V6,
}

impl AddressFamily {
    /// Wildcard bind address for this family on `port`.
    pub fn bind_addr(self, port: u16) -> SocketAddr {
        match self {
            AddressFamily::V4 => SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)),
            AddressFamily::V6 => SocketAddr::from((Ipv6Addr::UNSPECIFIED, port)),
        }
    }
}

impl fmt::Display for AddressFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AddressFamily::V4 => f.write_str("IPv4"),
            AddressFamily::V6 => f.write_str("IPv6"),
        }
    }
}

/// TCP keepalive applied to every accepted connection so the transport
/// notices dead peers even when nobody is talking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeepaliveConfig {
    /// Idle time before the first keepalive probe
    pub idle: Duration,
    /// Time between unanswered probes
    pub interval: Duration,
    /// Unanswered probes before the connection is dropped
    pub probe_count: u32,
}

impl Default for KeepaliveConfig {
    fn default() -> Self {
        Self {
            idle: Duration::from_secs(5),
            interval: Duration::from_secs(5),
            probe_count: 3,
        }
    }
}

/// Relay configuration options
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Port to listen on (0 = ephemeral)
    pub port: u16,

    /// Address family of the listener
    pub family: AddressFamily,

    /// Listen backlog
    pub backlog: u32,

    /// Silence window that triggers the heartbeat probe
    pub idle_timeout: Duration,

    /// Keepalive applied to accepted sockets
    pub keepalive: KeepaliveConfig,

    /// What gets announced to service discovery once the listener is up
    pub advertisement: ServiceAdvertisement,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            family: AddressFamily::default(),
            backlog: LISTEN_BACKLOG,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            keepalive: KeepaliveConfig::default(),
            advertisement: ServiceAdvertisement::default(),
        }
    }
}

impl RelayConfig {
    /// Set the listen port
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the address family
    pub fn family(mut self, family: AddressFamily) -> Self {
        self.family = family;
        self
    }

    /// Set the heartbeat idle window
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Set keepalive parameters
    pub fn keepalive(mut self, keepalive: KeepaliveConfig) -> Self {
        self.keepalive = keepalive;
        self
    }

    /// Set the discovery advertisement
    pub fn advertisement(mut self, advertisement: ServiceAdvertisement) -> Self {
        self.advertisement = advertisement;
        self
    }

    /// Wildcard address the listener binds to.
    pub fn bind_addr(&self) -> SocketAddr {
        self.family.bind_addr(self.port)
    }
}
