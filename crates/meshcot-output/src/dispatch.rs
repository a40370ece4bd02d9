//! Periodic dispatch loop
//!
//! Timer-driven evict -> snapshot -> encode -> send pass over the node
//! cache. Per-entry failures are logged and skipped; a tick-level failure
//! backs the loop off briefly. The loop only exits on the shutdown signal.

use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use meshcot_core::{cot, NodeCache};
use tokio::sync::watch;
use tokio::time::{interval, sleep, Duration};
use tracing::{debug, info, warn};

use crate::sender::CotSender;

/// Pause between ticks after a tick-level failure
const BACKOFF: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Time between dispatch ticks
    pub interval: Duration,
    /// Pause between entries within one tick, to avoid saturating the sink
    pub send_delay: Duration,
    /// Eviction threshold and advertised event validity window
    pub stale_secs: i64,
    /// CoT event type emitted for every node
    pub event_type: String,
    /// Echo encoded XML to the log before sending
    pub echo_cot: bool,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            send_delay: Duration::from_millis(100),
            stale_secs: meshcot_core::DEFAULT_STALE_SECS,
            event_type: cot::DEFAULT_EVENT_TYPE.to_string(),
            echo_cot: false,
        }
    }
}

/// Run the dispatch loop until the shutdown signal flips.
pub async fn run_dispatch(
    cache: Arc<NodeCache>,
    sender: CotSender,
    config: DispatchConfig,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(
        proto = %sender.protocol(),
        target = %sender.target(),
        interval_secs = config.interval.as_secs(),
        cot_type = %config.event_type,
        "Dispatch loop started"
    );

    let mut ticker = interval(config.interval);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = tick(&cache, &sender, &config).await {
                    warn!(error = %e, "Dispatch tick failed, backing off");
                    sleep(BACKOFF).await;
                }
            }
            _ = shutdown.changed() => {
                info!("Dispatch loop stopping");
                break;
            }
        }
    }
}

/// One evict -> snapshot -> encode -> send pass.
async fn tick(cache: &NodeCache, sender: &CotSender, config: &DispatchConfig) -> Result<()> {
    let now = Utc::now();

    for id in cache.evict_stale(now, config.stale_secs).await {
        info!(node = %id, "Evicted stale node");
    }

    let snapshot = cache.snapshot_valid(now, config.stale_secs).await;
    if snapshot.is_empty() {
        debug!("No nodes with a position fix yet");
        return Ok(());
    }

    info!(nodes = snapshot.len(), "Dispatching CoT events");
    for node in &snapshot {
        let xml = match cot::encode_event(node, &config.event_type, config.stale_secs, now) {
            Ok(xml) => xml,
            Err(e) => {
                warn!(node = %node.id, error = %e, "Failed to encode CoT event");
                continue;
            }
        };

        if config.echo_cot {
            info!(node = %node.id, cot = %xml, "Encoded CoT event");
        }

        if let Err(e) = sender.send(xml.as_bytes()).await {
            warn!(node = %node.id, error = %e, "Failed to send CoT event");
        }

        sleep(config.send_delay).await;
    }

    Ok(())
}
