//! Configuration loading and validation

use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub mqtt: MqttConfig,
    #[serde(default)]
    pub channel: ChannelConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MqttConfig {
    /// MQTT broker hostname
    #[serde(default = "default_broker")]
    pub broker: String,
    #[serde(default = "default_mqtt_port")]
    pub port: u16,
    /// Topic filter to subscribe to
    #[serde(default = "default_topic")]
    pub topic: String,
    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u64,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            broker: default_broker(),
            port: default_mqtt_port(),
            topic: default_topic(),
            keep_alive_secs: default_keep_alive(),
        }
    }
}

fn default_broker() -> String {
    "mqtt.meshtastic.org".to_string()
}

fn default_mqtt_port() -> u16 {
    1883
}

fn default_topic() -> String {
    "msh/#".to_string()
}

fn default_keep_alive() -> u64 {
    60
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Channel pre-shared key, base64 encoded; must decode to 32 raw bytes
    /// for encrypted traffic to be readable
    #[serde(default = "default_psk")]
    pub psk: String,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self { psk: default_psk() }
    }
}

impl ChannelConfig {
    /// Decode the configured PSK into raw key bytes
    pub fn channel_key(&self) -> Result<Vec<u8>> {
        BASE64
            .decode(self.psk.trim())
            .context("channel PSK is not valid base64")
    }
}

fn default_psk() -> String {
    "AQ==".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Outbound transport: udp, tcp, or broadcast
    #[serde(default = "default_protocol")]
    pub protocol: String,
    /// Target address; unset means the protocol default
    #[serde(default)]
    pub address: Option<String>,
    /// Target port; unset means the protocol default
    #[serde(default)]
    pub port: Option<u16>,
    /// CoT event type emitted for every node
    #[serde(default = "default_cot_type")]
    pub cot_type: String,
    /// Seconds between dispatch ticks
    #[serde(default = "default_interval")]
    pub interval_secs: u64,
    /// Milliseconds between entries within one tick
    #[serde(default = "default_send_delay")]
    pub send_delay_ms: u64,
    /// Node eviction threshold and CoT validity window, in seconds
    #[serde(default = "default_stale")]
    pub stale_secs: i64,
    /// Echo encoded CoT XML to the log before sending
    #[serde(default)]
    pub echo_cot: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            protocol: default_protocol(),
            address: None,
            port: None,
            cot_type: default_cot_type(),
            interval_secs: default_interval(),
            send_delay_ms: default_send_delay(),
            stale_secs: default_stale(),
            echo_cot: false,
        }
    }
}

fn default_protocol() -> String {
    "broadcast".to_string()
}

fn default_cot_type() -> String {
    meshcot_core::DEFAULT_EVENT_TYPE.to_string()
}

fn default_interval() -> u64 {
    10
}

fn default_send_delay() -> u64 {
    100
}

fn default_stale() -> i64 {
    meshcot_core::DEFAULT_STALE_SECS
}

/// Load configuration from file, falling back to defaults when it is absent
pub fn load_config(path: &Path) -> Result<Config> {
    if path.exists() {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        info!(path = %path.display(), "Loaded configuration");
        Ok(config)
    } else {
        info!(
            path = %path.display(),
            "Configuration file not found, using defaults"
        );
        Ok(Config::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_yields_documented_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.mqtt.broker, "mqtt.meshtastic.org");
        assert_eq!(config.mqtt.port, 1883);
        assert_eq!(config.mqtt.topic, "msh/#");
        assert_eq!(config.channel.psk, "AQ==");
        assert_eq!(config.output.protocol, "broadcast");
        assert_eq!(config.output.address, None);
        assert_eq!(config.output.port, None);
        assert_eq!(config.output.cot_type, "a-f-G-U-C");
        assert_eq!(config.output.interval_secs, 10);
        assert_eq!(config.output.send_delay_ms, 100);
        assert_eq!(config.output.stale_secs, 120);
        assert!(!config.output.echo_cot);
    }

    #[test]
    fn partial_toml_keeps_unspecified_defaults() {
        let config: Config = toml::from_str(
            r#"
            [output]
            protocol = "tcp"
            port = 8087

            [channel]
            psk = "MTIzNDU2Nzg5MDEyMzQ1Njc4OTAxMjM0NTY3ODkwMTI="
            "#,
        )
        .unwrap();
        assert_eq!(config.output.protocol, "tcp");
        assert_eq!(config.output.port, Some(8087));
        assert_eq!(config.output.interval_secs, 10);
        assert_eq!(config.mqtt.broker, "mqtt.meshtastic.org");
    }

    #[test]
    fn channel_key_decodes_base64() {
        let channel = ChannelConfig {
            // 32 bytes of "1234567890" repeated
            psk: "MTIzNDU2Nzg5MDEyMzQ1Njc4OTAxMjM0NTY3ODkwMTI=".to_string(),
        };
        let key = channel.channel_key().unwrap();
        assert_eq!(key.len(), 32);
        assert_eq!(&key[..4], b"1234");
    }

    #[test]
    fn default_psk_is_one_byte() {
        let key = ChannelConfig::default().channel_key().unwrap();
        assert_eq!(key, vec![0x01]);
    }

    #[test]
    fn invalid_base64_is_an_error() {
        let channel = ChannelConfig {
            psk: "not base64 at all!!!".to_string(),
        };
        assert!(channel.channel_key().is_err());
    }
}
