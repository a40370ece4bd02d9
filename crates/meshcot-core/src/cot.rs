//! Cursor-on-Target event encoding
//!
//! Renders one [`NodeState`] into a CoT `<event>` document. Optional
//! telemetry fields are sparse: absent values emit no element at all, so
//! consumers can tell "not reported" from any in-band sentinel.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::node::NodeState;

/// Event type emitted when no override is configured
pub const DEFAULT_EVENT_TYPE: &str = "a-f-G-U-C";

const TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

#[derive(Error, Debug)]
pub enum CotError {
    #[error("node has no position fix")]
    NoPosition,
    #[error("failed to serialize CoT event: {0}")]
    Serialize(String),
}

#[derive(Serialize)]
#[serde(rename = "event")]
struct Event<'a> {
    #[serde(rename = "@version")]
    version: &'static str,
    #[serde(rename = "@uid")]
    uid: String,
    #[serde(rename = "@type")]
    event_type: &'a str,
    #[serde(rename = "@how")]
    how: &'static str,
    #[serde(rename = "@time")]
    time: String,
    #[serde(rename = "@start")]
    start: String,
    #[serde(rename = "@stale")]
    stale: String,
    point: Point,
    detail: Detail,
}

#[derive(Serialize)]
struct Point {
    #[serde(rename = "@lat")]
    lat: String,
    #[serde(rename = "@lon")]
    lon: String,
    #[serde(rename = "@hae")]
    hae: String,
    #[serde(rename = "@ce")]
    ce: String,
    #[serde(rename = "@le")]
    le: String,
}

#[derive(Serialize)]
struct Detail {
    contact: Contact,
    meshtastic_meta: Meta,
    remarks: String,
    track: Track,
}

#[derive(Serialize)]
struct Contact {
    #[serde(rename = "@callsign")]
    callsign: String,
}

#[derive(Serialize)]
struct Meta {
    hw_model: String,
    hw_version: String,
    firmware_version: String,
    long_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    battery_voltage: Option<UnitValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    battery_level: Option<UnitValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    rssi: Option<UnitValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    snr: Option<UnitValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    air_utilization: Option<UnitValue>,
}

#[derive(Serialize)]
struct UnitValue {
    #[serde(rename = "@unit")]
    unit: &'static str,
    #[serde(rename = "$text")]
    value: String,
}

#[derive(Serialize)]
struct Track {
    #[serde(rename = "@course")]
    course: String,
    #[serde(rename = "@speed")]
    speed: String,
}

/// Encode one node as a CoT event.
///
/// Deterministic given identical state and a second-truncated timestamp.
/// Total for any state that has a position; states are expected to come
/// from a `snapshot_valid` pass, which guarantees that.
pub fn encode_event(
    node: &NodeState,
    event_type: &str,
    stale_secs: i64,
    now: DateTime<Utc>,
) -> Result<String, CotError> {
    let fix = node.position.as_ref().ok_or(CotError::NoPosition)?;
    let telemetry = &node.telemetry;

    let time = now.format(TIME_FORMAT).to_string();
    let stale = (now + Duration::seconds(stale_secs))
        .format(TIME_FORMAT)
        .to_string();

    let mut remarks = format!(
        "node {} | \u{b1}{:.0}m | {:.1}m/s",
        node.id, fix.ce, fix.speed
    );
    if let Some(level) = telemetry.battery_level {
        remarks.push_str(&format!(" | battery {level}%"));
    }
    if let Some(rssi) = telemetry.rssi {
        remarks.push_str(&format!(" | rssi {rssi}dBm"));
    }

    let event = Event {
        version: "2.0",
        uid: format!("meshtastic-{}", node.id.as_str().to_lowercase()),
        event_type,
        how: "m-g",
        time: time.clone(),
        start: time,
        stale,
        point: Point {
            lat: format!("{:.6}", fix.lat),
            lon: format!("{:.6}", fix.lon),
            hae: format!("{:.1}", fix.hae),
            ce: format!("{:.1}", fix.ce),
            le: format!("{:.1}", fix.le),
        },
        detail: Detail {
            contact: Contact {
                callsign: node.callsign(),
            },
            meshtastic_meta: Meta {
                hw_model: unknown_or(&node.hw_model),
                hw_version: unknown_or(&node.hw_version),
                firmware_version: unknown_or(&node.firmware_version),
                long_name: node.long_name.clone().unwrap_or_default(),
                battery_voltage: telemetry.battery_voltage.map(|v| UnitValue {
                    unit: "V",
                    value: format!("{v:.2}"),
                }),
                battery_level: telemetry.battery_level.map(|v| UnitValue {
                    unit: "%",
                    value: v.to_string(),
                }),
                rssi: telemetry.rssi.map(|v| UnitValue {
                    unit: "dBm",
                    value: v.to_string(),
                }),
                snr: telemetry.snr.map(|v| UnitValue {
                    unit: "dB",
                    value: format!("{v:.1}"),
                }),
                air_utilization: telemetry.air_util_tx.map(|v| UnitValue {
                    unit: "%",
                    value: format!("{v:.1}"),
                }),
            },
            remarks,
            track: Track {
                course: format!("{:.1}", fix.course),
                speed: format!("{:.1}", fix.speed),
            },
        },
    };

    quick_xml::se::to_string(&event).map_err(|e| CotError::Serialize(e.to_string()))
}

fn unknown_or(value: &Option<String>) -> String {
    value.clone().unwrap_or_else(|| "Unknown".to_string())
}
