use anyhow::Result;
use clap::Parser;
use tracing::{error, info};

use broadcast_relay::{Relay, cli::Cli, discovery::LoggingRegistrar};

fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let config = Cli::parse().into_config();
    let relay = match Relay::start(config, &LoggingRegistrar) {
        Ok(relay) => relay,
        Err(err) => {
            error!("relay failed to start: {err:?}");
            return Err(err.into());
        }
    };

    info!("relay listening on {}", relay.local_addr()?);
    if let Err(err) = relay.run_until_ctrl_c().await {
        error!("relay exited with error: {err:?}");
        return Err(err.into());
    }

    Ok(())
}
