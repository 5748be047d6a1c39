use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::hub::BroadcastHub;

/// Spawn a task that pings every subscriber on `interval`
///
/// Pings go through the same non-blocking path as payloads, so a subscriber
/// whose queue is still full at ping time is dropped.
pub fn start_heartbeat(
    hub: Arc<BroadcastHub>,
    interval: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let report = hub.ping_all();
                    debug!(delivered = report.delivered, dropped = report.dropped, "Heartbeat");
                }
            }
        }
    })
}
