//! MQTT ingest loop
//!
//! Subscribes to the configured topic filter and feeds every publish
//! through envelope decode into the node cache. Messages that fail to
//! decode are dropped quietly; public brokers carry plenty of traffic
//! on channels we do not hold the key for.

use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use meshcot_core::{decode_envelope, MergeOutcome};
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use tokio::sync::watch;
use tokio::time::{sleep, Duration};
use tracing::{debug, info, warn};

use crate::state::GatewayState;

/// Pause before polling again after a connection-level error
const RECONNECT_BACKOFF: Duration = Duration::from_secs(1);

/// Run the MQTT ingest loop until the shutdown signal flips.
pub async fn run_ingest(
    state: Arc<GatewayState>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let mqtt = &state.config.mqtt;
    let client_id = format!("meshcot-{}", std::process::id());
    let mut options = MqttOptions::new(client_id, mqtt.broker.clone(), mqtt.port);
    options.set_keep_alive(Duration::from_secs(mqtt.keep_alive_secs));

    info!(broker = %mqtt.broker, port = mqtt.port, topic = %mqtt.topic, "Connecting to MQTT broker");
    let (client, mut eventloop) = AsyncClient::new(options, 64);
    client.subscribe(&mqtt.topic, QoS::AtMostOnce).await?;

    loop {
        tokio::select! {
            event = eventloop.poll() => match event {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    info!("MQTT connection established");
                    // rumqttc replays the subscription on reconnect only if
                    // we ask again
                    client.subscribe(&mqtt.topic, QoS::AtMostOnce).await?;
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    handle_message(&state, &publish.payload).await;
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(error = %e, "MQTT connection error, retrying");
                    sleep(RECONNECT_BACKOFF).await;
                }
            },
            _ = shutdown.changed() => {
                info!("Ingest loop stopping");
                break;
            }
        }
    }

    Ok(())
}

/// Decode one raw MQTT payload and merge it into the cache.
async fn handle_message(state: &GatewayState, payload: &[u8]) {
    let update = match decode_envelope(payload, &state.channel_key) {
        Ok(update) => update,
        Err(e) => {
            debug!(error = %e, "Dropping undecodable message");
            return;
        }
    };

    let outcome = state
        .cache
        .merge(&update.node_id, &update.payload, Utc::now())
        .await;

    match outcome {
        MergeOutcome::Created => info!(node = %update.node_id, "Tracking new node"),
        MergeOutcome::Updated => debug!(node = %update.node_id, "Updated node"),
        MergeOutcome::Skipped => debug!(node = %update.node_id, "Ignored update"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use meshcot_core::packet::{
        MeshData, PayloadKind, PositionMsg, RadioPacket, ServiceEnvelope, TelemetryMsg,
    };
    use meshcot_core::NodeId;
    use prost::Message;

    fn envelope(node: &str, data: MeshData) -> Vec<u8> {
        ServiceEnvelope {
            packet: Some(RadioPacket {
                from_radio: node.into(),
                payload: data.encode_to_vec(),
                nonce: Vec::new(),
                encrypted: false,
            }),
            channel_id: "LongFast".into(),
            gateway_id: "!gateway".into(),
        }
        .encode_to_vec()
    }

    fn position_data(lat: f64, lon: f64) -> MeshData {
        MeshData {
            variant: PayloadKind::Position as i32,
            position: Some(PositionMsg {
                latitude: lat,
                longitude: lon,
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn publish_payload_lands_in_the_cache() {
        let state = GatewayState::new(Config::default()).unwrap();
        handle_message(&state, &envelope("!abcd1234", position_data(37.7749, -122.4194))).await;

        assert_eq!(state.cache.len().await, 1);
        let node = state.cache.get(&NodeId::new("!abcd1234")).await.unwrap();
        let position = node.position.unwrap();
        assert_eq!(position.lat, 37.7749);
        assert_eq!(position.lon, -122.4194);
    }

    #[tokio::test]
    async fn telemetry_and_position_merge_onto_one_node() {
        let state = GatewayState::new(Config::default()).unwrap();
        handle_message(&state, &envelope("!abcd1234", position_data(1.0, 2.0))).await;

        let telemetry = MeshData {
            variant: PayloadKind::Telemetry as i32,
            telemetry: Some(TelemetryMsg {
                battery_voltage: 3700,
                battery_level: 80,
                ..Default::default()
            }),
            ..Default::default()
        };
        handle_message(&state, &envelope("!abcd1234", telemetry)).await;

        assert_eq!(state.cache.len().await, 1);
        let node = state.cache.get(&NodeId::new("!abcd1234")).await.unwrap();
        assert!(node.position.is_some());
        assert_eq!(node.telemetry.battery_voltage, Some(3.7));
        assert_eq!(node.telemetry.battery_level, Some(80));
    }

    #[tokio::test]
    async fn garbage_payload_is_dropped() {
        let state = GatewayState::new(Config::default()).unwrap();
        handle_message(&state, &[0xff, 0xff, 0x01]).await;
        assert_eq!(state.cache.len().await, 0);
    }

    #[tokio::test]
    async fn no_fix_position_does_not_create_a_node() {
        let state = GatewayState::new(Config::default()).unwrap();
        handle_message(&state, &envelope("!abcd1234", position_data(0.0, 0.0))).await;
        assert_eq!(state.cache.len().await, 0);
    }
}
