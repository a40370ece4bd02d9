//! Gateway state shared by the ingest handler and dispatch loop

use std::sync::Arc;

use anyhow::Result;
use meshcot_core::{NodeCache, CHANNEL_KEY_LEN};
use meshcot_output::{CotSender, DispatchConfig, Protocol};
use tokio::time::Duration;
use tracing::warn;

use crate::config::Config;

/// Context constructed once at startup; the node cache is the only part
/// mutated afterwards, through its own guarded operations.
pub struct GatewayState {
    pub cache: Arc<NodeCache>,
    pub channel_key: Vec<u8>,
    pub config: Config,
}

impl GatewayState {
    pub fn new(config: Config) -> Result<Arc<Self>> {
        let channel_key = config.channel.channel_key()?;
        if channel_key.len() != CHANNEL_KEY_LEN {
            warn!(
                key_len = channel_key.len(),
                "Channel PSK does not decode to 32 bytes; encrypted packets will be dropped"
            );
        }

        Ok(Arc::new(Self {
            cache: Arc::new(NodeCache::new()),
            channel_key,
            config,
        }))
    }

    /// Resolve the configured output transport
    pub fn sender(&self) -> Result<CotSender> {
        let protocol = Protocol::parse(&self.config.output.protocol)?;
        Ok(CotSender::new(
            protocol,
            self.config.output.address.clone(),
            self.config.output.port,
        ))
    }

    pub fn dispatch_config(&self) -> DispatchConfig {
        let output = &self.config.output;
        DispatchConfig {
            interval: Duration::from_secs(output.interval_secs),
            send_delay: Duration::from_millis(output.send_delay_ms),
            stale_secs: output.stale_secs,
            event_type: output.cot_type.clone(),
            echo_cot: output.echo_cot,
        }
    }
}
