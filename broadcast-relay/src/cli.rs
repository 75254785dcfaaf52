use std::time::Duration;

use clap::Parser;

use crate::{
    config::{AddressFamily, DEFAULT_PORT, KeepaliveConfig, RelayConfig},
    discovery::ServiceAdvertisement,
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// TCP port to listen on. Use 0 for an ephemeral port.
    #[arg(long, default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Listen on IPv6 instead of IPv4.
    #[arg(long)]
    pub ipv6: bool,

    /// Seconds of total silence before every client is sent the heartbeat probe.
    #[arg(long, value_name = "SECS", default_value_t = 60)]
    pub idle_timeout: u64,

    /// Seconds a connection may sit idle before TCP keepalive probing starts.
    #[arg(long, value_name = "SECS", default_value_t = 5)]
    pub keepalive_idle: u64,

    /// Seconds between unanswered TCP keepalive probes.
    #[arg(long, value_name = "SECS", default_value_t = 5)]
    pub keepalive_interval: u64,

    /// Unanswered TCP keepalive probes before the peer is considered dead.
    #[arg(long, value_name = "N", default_value_t = 3)]
    pub keepalive_count: u32,

    /// Hostname announced to service discovery.
    #[arg(long, default_value = "chat-relay")]
    pub hostname: String,

    /// Service instance name announced to service discovery.
    #[arg(long, default_value = "ChatServer")]
    pub service_name: String,
}

impl Cli {
    pub fn into_config(self) -> RelayConfig {
        let family = if self.ipv6 {
            AddressFamily::V6
        } else {
            AddressFamily::V4
        };

        let advertisement = ServiceAdvertisement {
            hostname: self.hostname,
            instance: self.service_name,
            ..ServiceAdvertisement::default()
        }
        .with_port(self.port);

        RelayConfig::default()
            .port(self.port)
            .family(family)
            .idle_timeout(Duration::from_secs(self.idle_timeout))
            .keepalive(KeepaliveConfig {
                idle: Duration::from_secs(self.keepalive_idle),
                interval: Duration::from_secs(self.keepalive_interval),
                probe_count: self.keepalive_count,
            })
            .advertisement(advertisement)
    }
}
