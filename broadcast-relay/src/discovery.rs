//! Service discovery seam.
//!
//! Clients find the relay by name instead of by literal address. The actual
//! responder (mDNS or otherwise) lives outside this crate; the relay only
//! promises to call [`ServiceRegistrar::register`] exactly once, after the
//! listener is bound, with the port it actually got.

use tracing::info;

use crate::config::DEFAULT_PORT;
use crate::error::DiscoveryError;

/// What the relay announces about itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceAdvertisement {
    pub hostname: String,
    pub instance: String,
    pub service_type: String,
    pub protocol: String,
    pub port: u16,
}

impl Default for ServiceAdvertisement {
    fn default() -> Self {
        Self {
            hostname: "chat-relay".into(),
            instance: "ChatServer".into(),
            service_type: "_ChatServer".into(),
            protocol: "_tcp".into(),
            port: DEFAULT_PORT,
        }
    }
}

impl ServiceAdvertisement {
    /// Same advertisement, pointed at `port`.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// DNS-SD style name, e.g. `ChatServer._ChatServer._tcp`.
    pub fn full_name(&self) -> String {
        format!("{}.{}.{}", self.instance, self.service_type, self.protocol)
    }
}

pub trait ServiceRegistrar {
    fn register(&self, advertisement: &ServiceAdvertisement) -> Result<(), DiscoveryError>;
}

/// Registrar that only writes the advertisement to the log. Used when no
/// responder is wired in.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingRegistrar;

impl ServiceRegistrar for LoggingRegistrar {
    fn register(&self, advertisement: &ServiceAdvertisement) -> Result<(), DiscoveryError> {
        info!(
            hostname = %advertisement.hostname,
            service = %advertisement.full_name(),
            port = advertisement.port,
            "service advertised"
        );
        Ok(())
    }
}
