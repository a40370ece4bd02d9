//! Node state accumulated from inbound mesh updates

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::packet::{NodeInfoUpdate, PacketPayload, PositionUpdate, TelemetryUpdate};

/// Opaque node identifier taken from the envelope routing field.
///
/// No structure is assumed beyond "stable per node"; the only derived value
/// is the fallback callsign for display.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Callsign used when a node never reported a short name
    pub fn fallback_callsign(&self) -> String {
        let prefix: String = self.0.chars().take(6).collect();
        format!("Node-{prefix}")
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Last known position with derived error estimates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionFix {
    pub lat: f64,
    pub lon: f64,
    /// Height above ellipsoid in meters
    pub hae: f64,
    /// Ground speed in m/s
    pub speed: f64,
    /// Course over ground in degrees
    pub course: f64,
    /// Horizontal error estimate in meters
    pub ce: f64,
    /// Vertical error estimate in meters
    pub le: f64,
}

/// Telemetry fields, each independently optional
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TelemetryState {
    pub battery_voltage: Option<f64>,
    pub battery_level: Option<u32>,
    pub rssi: Option<i32>,
    pub snr: Option<f64>,
    pub air_util_tx: Option<f64>,
}

impl TelemetryState {
    pub fn is_empty(&self) -> bool {
        self.battery_voltage.is_none()
            && self.battery_level.is_none()
            && self.rssi.is_none()
            && self.snr.is_none()
            && self.air_util_tx.is_none()
    }
}

/// Merged view of everything known about one node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeState {
    pub id: NodeId,
    pub short_name: Option<String>,
    pub long_name: Option<String>,
    pub hw_model: Option<String>,
    pub hw_version: Option<String>,
    pub firmware_version: Option<String>,
    /// Present only after at least one accepted position update
    pub position: Option<PositionFix>,
    pub telemetry: TelemetryState,
    /// Time of the most recent accepted update, drives eviction
    pub last_update: DateTime<Utc>,
}

impl NodeState {
    pub fn new(id: NodeId, now: DateTime<Utc>) -> Self {
        Self {
            id,
            short_name: None,
            long_name: None,
            hw_model: None,
            hw_version: None,
            firmware_version: None,
            position: None,
            telemetry: TelemetryState::default(),
            last_update: now,
        }
    }

    /// Field-level merge: present fields replace, absent fields are left
    /// alone. Returns false when the update is rejected (no-fix position).
    pub fn apply(&mut self, payload: &PacketPayload, now: DateTime<Utc>) -> bool {
        let accepted = match payload {
            PacketPayload::NodeInfo(info) => {
                self.apply_node_info(info);
                true
            }
            PacketPayload::Telemetry(telemetry) => {
                self.apply_telemetry(telemetry);
                true
            }
            PacketPayload::Position(position) => self.apply_position(position),
            PacketPayload::Ignored => false,
        };

        // last_update only moves forward
        if accepted && now > self.last_update {
            self.last_update = now;
        }
        accepted
    }

    fn apply_node_info(&mut self, info: &NodeInfoUpdate) {
        merge_field(&mut self.hw_model, &info.hw_model);
        merge_field(&mut self.hw_version, &info.hw_version);
        merge_field(&mut self.firmware_version, &info.firmware_version);
        merge_field(&mut self.long_name, &info.long_name);
    }

    fn apply_telemetry(&mut self, telemetry: &TelemetryUpdate) {
        merge_field(&mut self.telemetry.battery_voltage, &telemetry.battery_voltage);
        merge_field(&mut self.telemetry.battery_level, &telemetry.battery_level);
        merge_field(&mut self.telemetry.rssi, &telemetry.rssi);
        merge_field(&mut self.telemetry.snr, &telemetry.snr);
        merge_field(&mut self.telemetry.air_util_tx, &telemetry.air_util_tx);
    }

    fn apply_position(&mut self, position: &PositionUpdate) -> bool {
        if position.is_no_fix() {
            return false;
        }
        merge_field(&mut self.short_name, &position.short_name);
        self.position = Some(PositionFix {
            lat: position.latitude,
            lon: position.longitude,
            hae: position.altitude,
            speed: position.speed,
            course: position.course,
            ce: position.ce,
            le: position.le,
        });
        true
    }

    pub fn has_position(&self) -> bool {
        self.position.is_some()
    }

    /// Strictly older than the threshold; exactly `threshold_secs` old is
    /// still fresh.
    pub fn is_stale(&self, now: DateTime<Utc>, threshold_secs: i64) -> bool {
        (now - self.last_update).num_seconds() > threshold_secs
    }

    /// Display callsign: reported short name or a fallback from the id
    pub fn callsign(&self) -> String {
        self.short_name
            .clone()
            .unwrap_or_else(|| self.id.fallback_callsign())
    }
}

fn merge_field<T: Clone>(current: &mut Option<T>, incoming: &Option<T>) {
    if let Some(value) = incoming {
        *current = Some(value.clone());
    }
}
