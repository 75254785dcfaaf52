//! Liveness probe sent after a full idle window with no activity.
//!
//! The probe is one-way. Nobody waits for an answer; dead peers are left to
//! TCP keepalive.

use tokio::io::AsyncWrite;
use tracing::{debug, info};

use crate::registry::{Delivery, Registry};

/// Sent verbatim, trailing newline included.
pub const PROBE: &[u8] = b"hello??? are you still there???\n";

/// Send [`PROBE`] to every registered connection.
pub async fn send_probe<W>(registry: &mut Registry<W>) -> Delivery
where
    W: AsyncWrite + Unpin,
{
    if registry.is_empty() {
        debug!("idle with no connections, skipping heartbeat");
        return Delivery::default();
    }

    let delivery = registry.broadcast(None, PROBE).await;
    info!(
        delivered = delivery.delivered,
        failed = delivery.failed,
        "heartbeat sent"
    );
    delivery
}
