//! Mesh envelope decoding
//!
//! Two-stage decode: the outer [`ServiceEnvelope`] carries routing fields and
//! a possibly-encrypted inner payload plus a nonce; the inner [`MeshData`]
//! carries one of the known payload variants. Unknown variants decode to
//! [`PacketPayload::Ignored`] so the gateway can skip traffic it does not
//! understand without treating it as an error.
//!
//! The message structs are declared by hand with prost derives rather than
//! generated, since the gateway only consumes this handful of fields.

use prost::Message;
use thiserror::Error;

use crate::crypto::{decrypt_payload, CryptoError};
use crate::node::NodeId;

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("malformed packet: {0}")]
    Malformed(#[from] prost::DecodeError),
    #[error("envelope has no mesh packet")]
    MissingPacket,
    #[error("mesh packet has no source node id")]
    MissingNodeId,
    #[error("payload variant present but {0} field missing")]
    MissingField(&'static str),
    #[error(transparent)]
    Decrypt(#[from] CryptoError),
}

/// Outer MQTT envelope
#[derive(Clone, PartialEq, Message)]
pub struct ServiceEnvelope {
    #[prost(message, optional, tag = "1")]
    pub packet: Option<RadioPacket>,
    #[prost(string, tag = "2")]
    pub channel_id: String,
    #[prost(string, tag = "3")]
    pub gateway_id: String,
}

/// Routing wrapper around the (optionally encrypted) mesh payload
#[derive(Clone, PartialEq, Message)]
pub struct RadioPacket {
    #[prost(string, tag = "1")]
    pub from_radio: String,
    #[prost(bytes = "vec", tag = "2")]
    pub payload: Vec<u8>,
    #[prost(bytes = "vec", tag = "3")]
    pub nonce: Vec<u8>,
    #[prost(bool, tag = "4")]
    pub encrypted: bool,
}

/// Inner mesh payload, tagged by [`PayloadKind`]
#[derive(Clone, PartialEq, Message)]
pub struct MeshData {
    #[prost(enumeration = "PayloadKind", tag = "1")]
    pub variant: i32,
    #[prost(message, optional, tag = "2")]
    pub node_info: Option<NodeInfoMsg>,
    #[prost(message, optional, tag = "3")]
    pub telemetry: Option<TelemetryMsg>,
    #[prost(message, optional, tag = "4")]
    pub position: Option<PositionMsg>,
    #[prost(string, tag = "5")]
    pub short_name: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, prost::Enumeration)]
#[repr(i32)]
pub enum PayloadKind {
    Unknown = 0,
    NodeInfo = 1,
    Telemetry = 2,
    Position = 3,
}

#[derive(Clone, PartialEq, Message)]
pub struct NodeInfoMsg {
    #[prost(string, tag = "1")]
    pub hw_model: String,
    #[prost(string, tag = "2")]
    pub hw_version: String,
    #[prost(string, tag = "3")]
    pub firmware_version: String,
    #[prost(string, tag = "4")]
    pub long_name: String,
}

#[derive(Clone, PartialEq, Message)]
pub struct TelemetryMsg {
    /// Battery voltage in millivolts, 0 when unreported
    #[prost(uint32, tag = "1")]
    pub battery_voltage: u32,
    /// Battery level percent, 255 when invalid
    #[prost(uint32, tag = "2")]
    pub battery_level: u32,
    #[prost(int32, tag = "3")]
    pub rssi: i32,
    #[prost(float, tag = "4")]
    pub snr: f32,
    #[prost(float, tag = "5")]
    pub air_util_tx: f32,
}

#[derive(Clone, PartialEq, Message)]
pub struct PositionMsg {
    #[prost(double, tag = "1")]
    pub latitude: f64,
    #[prost(double, tag = "2")]
    pub longitude: f64,
    #[prost(double, tag = "3")]
    pub altitude: f64,
    #[prost(float, tag = "4")]
    pub speed: f32,
    #[prost(float, tag = "5")]
    pub course: f32,
    /// Reported horizontal accuracy in meters, 0 when unreported
    #[prost(float, tag = "6")]
    pub precision: f32,
    #[prost(float, tag = "7")]
    pub hdop: f32,
}

/// One decoded inbound update, keyed by the source node
#[derive(Debug, Clone, PartialEq)]
pub struct MeshUpdate {
    pub node_id: NodeId,
    pub payload: PacketPayload,
}

/// Closed set of payloads the gateway acts on
#[derive(Debug, Clone, PartialEq)]
pub enum PacketPayload {
    NodeInfo(NodeInfoUpdate),
    Telemetry(TelemetryUpdate),
    Position(PositionUpdate),
    /// Variants the gateway does not consume
    Ignored,
}

/// Node metadata with empty strings normalized to absent
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeInfoUpdate {
    pub hw_model: Option<String>,
    pub hw_version: Option<String>,
    pub firmware_version: Option<String>,
    pub long_name: Option<String>,
}

/// Telemetry with zero/sentinel values normalized to absent
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TelemetryUpdate {
    /// Volts (converted from reported millivolts)
    pub battery_voltage: Option<f64>,
    pub battery_level: Option<u32>,
    pub rssi: Option<i32>,
    pub snr: Option<f64>,
    pub air_util_tx: Option<f64>,
}

/// Position fix with derived error estimates
#[derive(Debug, Clone, PartialEq)]
pub struct PositionUpdate {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
    pub speed: f64,
    pub course: f64,
    /// Horizontal error estimate in meters
    pub ce: f64,
    /// Vertical error estimate in meters
    pub le: f64,
    pub short_name: Option<String>,
}

/// Sentinel for battery level "invalid"
const BATTERY_LEVEL_INVALID: u32 = 255;

/// Horizontal error assumed when neither precision nor HDOP is reported
const DEFAULT_CE_METERS: f64 = 100.0;

impl NodeInfoUpdate {
    fn from_msg(msg: NodeInfoMsg) -> Self {
        Self {
            hw_model: non_empty(msg.hw_model),
            hw_version: non_empty(msg.hw_version),
            firmware_version: non_empty(msg.firmware_version),
            long_name: non_empty(msg.long_name),
        }
    }
}

impl TelemetryUpdate {
    fn from_msg(msg: TelemetryMsg) -> Self {
        Self {
            battery_voltage: (msg.battery_voltage != 0)
                .then(|| f64::from(msg.battery_voltage) / 1000.0),
            battery_level: (msg.battery_level != BATTERY_LEVEL_INVALID)
                .then_some(msg.battery_level),
            rssi: (msg.rssi != 0).then_some(msg.rssi),
            snr: (msg.snr != 0.0).then(|| f64::from(msg.snr)),
            air_util_tx: (msg.air_util_tx != 0.0).then(|| f64::from(msg.air_util_tx)),
        }
    }
}

impl PositionUpdate {
    fn from_msg(msg: PositionMsg, short_name: Option<String>) -> Self {
        let ce = if msg.precision != 0.0 {
            f64::from(msg.precision)
        } else if msg.hdop != 0.0 {
            // Rough range estimate: 10 m per unit of HDOP
            f64::from(msg.hdop) * 10.0
        } else {
            DEFAULT_CE_METERS
        };

        Self {
            latitude: msg.latitude,
            longitude: msg.longitude,
            altitude: msg.altitude,
            speed: f64::from(msg.speed),
            course: f64::from(msg.course),
            ce,
            le: ce * 2.0,
            short_name,
        }
    }

    /// A 0/0 coordinate pair means the radio had no fix
    pub fn is_no_fix(&self) -> bool {
        self.latitude == 0.0 && self.longitude == 0.0
    }
}

fn non_empty(s: String) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}

/// Decode one raw MQTT message into a typed update.
///
/// Pure: no shared state is touched. All failures are [`DecodeError`] and
/// the caller drops the message.
pub fn decode_envelope(bytes: &[u8], channel_key: &[u8]) -> Result<MeshUpdate, DecodeError> {
    let envelope = ServiceEnvelope::decode(bytes)?;
    let packet = envelope.packet.ok_or(DecodeError::MissingPacket)?;

    if packet.from_radio.is_empty() {
        return Err(DecodeError::MissingNodeId);
    }
    let node_id = NodeId::new(packet.from_radio);

    let plaintext = if packet.encrypted && !packet.payload.is_empty() && !packet.nonce.is_empty() {
        decrypt_payload(channel_key, &packet.nonce, &packet.payload)?
    } else {
        packet.payload
    };

    let data = MeshData::decode(plaintext.as_slice())?;
    let short_name = non_empty(data.short_name);

    let payload = match PayloadKind::try_from(data.variant).unwrap_or(PayloadKind::Unknown) {
        PayloadKind::NodeInfo => {
            let msg = data.node_info.ok_or(DecodeError::MissingField("node_info"))?;
            PacketPayload::NodeInfo(NodeInfoUpdate::from_msg(msg))
        }
        PayloadKind::Telemetry => {
            let msg = data.telemetry.ok_or(DecodeError::MissingField("telemetry"))?;
            PacketPayload::Telemetry(TelemetryUpdate::from_msg(msg))
        }
        PayloadKind::Position => {
            let msg = data.position.ok_or(DecodeError::MissingField("position"))?;
            PacketPayload::Position(PositionUpdate::from_msg(msg, short_name))
        }
        PayloadKind::Unknown => PacketPayload::Ignored,
    };

    Ok(MeshUpdate { node_id, payload })
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: [u8; 32] = [0x42; 32];

    fn envelope_bytes(packet: RadioPacket) -> Vec<u8> {
        ServiceEnvelope {
            packet: Some(packet),
            channel_id: "LongFast".into(),
            gateway_id: "!gateway".into(),
        }
        .encode_to_vec()
    }

    fn plain_packet(node: &str, data: &MeshData) -> Vec<u8> {
        envelope_bytes(RadioPacket {
            from_radio: node.into(),
            payload: data.encode_to_vec(),
            nonce: Vec::new(),
            encrypted: false,
        })
    }

    #[test]
    fn rejects_garbage() {
        assert!(matches!(
            decode_envelope(&[0xff, 0xff, 0xff, 0x01], &KEY),
            Err(DecodeError::Malformed(_))
        ));
    }

    #[test]
    fn rejects_envelope_without_packet() {
        let bytes = ServiceEnvelope {
            packet: None,
            channel_id: "LongFast".into(),
            gateway_id: String::new(),
        }
        .encode_to_vec();
        assert!(matches!(
            decode_envelope(&bytes, &KEY),
            Err(DecodeError::MissingPacket)
        ));
    }

    #[test]
    fn rejects_missing_node_id() {
        let bytes = plain_packet("", &MeshData::default());
        // empty from_radio encodes to nothing on the wire, same as absent
        assert!(matches!(
            decode_envelope(&bytes, &KEY),
            Err(DecodeError::MissingNodeId)
        ));
    }

    #[test]
    fn unknown_variant_is_ignored() {
        let data = MeshData {
            variant: 99,
            ..Default::default()
        };
        let update = decode_envelope(&plain_packet("!abcd1234", &data), &KEY).unwrap();
        assert_eq!(update.payload, PacketPayload::Ignored);
        assert_eq!(update.node_id.as_str(), "!abcd1234");
    }

    #[test]
    fn variant_without_body_is_an_error() {
        let data = MeshData {
            variant: PayloadKind::Telemetry as i32,
            ..Default::default()
        };
        assert!(matches!(
            decode_envelope(&plain_packet("!abcd1234", &data), &KEY),
            Err(DecodeError::MissingField("telemetry"))
        ));
    }

    #[test]
    fn telemetry_sentinels_become_absent() {
        let data = MeshData {
            variant: PayloadKind::Telemetry as i32,
            telemetry: Some(TelemetryMsg {
                battery_voltage: 3700,
                battery_level: 255,
                rssi: 0,
                snr: 0.0,
                air_util_tx: 0.0,
            }),
            ..Default::default()
        };
        let update = decode_envelope(&plain_packet("!abcd1234", &data), &KEY).unwrap();
        let PacketPayload::Telemetry(t) = update.payload else {
            panic!("expected telemetry");
        };
        assert_eq!(t.battery_voltage, Some(3.7));
        assert_eq!(t.battery_level, None);
        assert_eq!(t.rssi, None);
        assert_eq!(t.snr, None);
        assert_eq!(t.air_util_tx, None);
    }

    #[test]
    fn battery_level_zero_is_valid() {
        let data = MeshData {
            variant: PayloadKind::Telemetry as i32,
            telemetry: Some(TelemetryMsg {
                battery_level: 0,
                rssi: -90,
                snr: 5.5,
                ..Default::default()
            }),
            ..Default::default()
        };
        let update = decode_envelope(&plain_packet("!abcd1234", &data), &KEY).unwrap();
        let PacketPayload::Telemetry(t) = update.payload else {
            panic!("expected telemetry");
        };
        assert_eq!(t.battery_level, Some(0));
        assert_eq!(t.rssi, Some(-90));
        assert_eq!(t.snr, Some(5.5));
        assert_eq!(t.battery_voltage, None);
    }

    #[test]
    fn position_error_estimate_prefers_precision() {
        let data = MeshData {
            variant: PayloadKind::Position as i32,
            position: Some(PositionMsg {
                latitude: 37.7749,
                longitude: -122.4194,
                precision: 12.0,
                hdop: 5.0,
                ..Default::default()
            }),
            ..Default::default()
        };
        let update = decode_envelope(&plain_packet("!abcd1234", &data), &KEY).unwrap();
        let PacketPayload::Position(p) = update.payload else {
            panic!("expected position");
        };
        assert_eq!(p.ce, 12.0);
        assert_eq!(p.le, 24.0);
    }

    #[test]
    fn position_error_estimate_falls_back_to_hdop_then_default() {
        let hdop_only = PositionMsg {
            latitude: 37.7749,
            longitude: -122.4194,
            precision: 0.0,
            hdop: 5.0,
            ..Default::default()
        };
        let data = MeshData {
            variant: PayloadKind::Position as i32,
            position: Some(hdop_only.clone()),
            ..Default::default()
        };
        let update = decode_envelope(&plain_packet("!abcd1234", &data), &KEY).unwrap();
        let PacketPayload::Position(p) = update.payload else {
            panic!("expected position");
        };
        assert_eq!(p.ce, 50.0);
        assert_eq!(p.le, 100.0);

        let data = MeshData {
            variant: PayloadKind::Position as i32,
            position: Some(PositionMsg {
                hdop: 0.0,
                ..hdop_only
            }),
            ..Default::default()
        };
        let update = decode_envelope(&plain_packet("!abcd1234", &data), &KEY).unwrap();
        let PacketPayload::Position(p) = update.payload else {
            panic!("expected position");
        };
        assert_eq!(p.ce, 100.0);
        assert_eq!(p.le, 200.0);
    }

    #[test]
    fn position_carries_short_name() {
        let data = MeshData {
            variant: PayloadKind::Position as i32,
            position: Some(PositionMsg {
                latitude: 1.0,
                longitude: 2.0,
                ..Default::default()
            }),
            short_name: "ALFA".into(),
            ..Default::default()
        };
        let update = decode_envelope(&plain_packet("!abcd1234", &data), &KEY).unwrap();
        let PacketPayload::Position(p) = update.payload else {
            panic!("expected position");
        };
        assert_eq!(p.short_name.as_deref(), Some("ALFA"));
        assert!(!p.is_no_fix());
    }

    #[test]
    fn zero_zero_position_flags_no_fix() {
        let data = MeshData {
            variant: PayloadKind::Position as i32,
            position: Some(PositionMsg::default()),
            ..Default::default()
        };
        let update = decode_envelope(&plain_packet("!abcd1234", &data), &KEY).unwrap();
        let PacketPayload::Position(p) = update.payload else {
            panic!("expected position");
        };
        assert!(p.is_no_fix());
    }

    #[test]
    fn encrypted_payload_decodes_like_plaintext() {
        let data = MeshData {
            variant: PayloadKind::NodeInfo as i32,
            node_info: Some(NodeInfoMsg {
                hw_model: "TBEAM".into(),
                hw_version: "1.1".into(),
                firmware_version: "2.5.0".into(),
                long_name: "Base camp".into(),
            }),
            ..Default::default()
        };

        let nonce = [9u8; 16];
        let ciphertext =
            crate::crypto::decrypt_payload(&KEY, &nonce, &data.encode_to_vec()).unwrap();
        let bytes = envelope_bytes(RadioPacket {
            from_radio: "!abcd1234".into(),
            payload: ciphertext,
            nonce: nonce.to_vec(),
            encrypted: true,
        });

        let update = decode_envelope(&bytes, &KEY).unwrap();
        let plain = decode_envelope(&plain_packet("!abcd1234", &data), &KEY).unwrap();
        assert_eq!(update, plain);

        let PacketPayload::NodeInfo(info) = update.payload else {
            panic!("expected node info");
        };
        assert_eq!(info.hw_model.as_deref(), Some("TBEAM"));
        assert_eq!(info.long_name.as_deref(), Some("Base camp"));
    }

    #[test]
    fn encrypted_payload_with_wrong_key_fails_decode() {
        let data = MeshData {
            variant: PayloadKind::Telemetry as i32,
            telemetry: Some(TelemetryMsg {
                battery_voltage: 4100,
                ..Default::default()
            }),
            ..Default::default()
        };
        let nonce = [3u8; 16];
        let ciphertext =
            crate::crypto::decrypt_payload(&KEY, &nonce, &data.encode_to_vec()).unwrap();
        let bytes = envelope_bytes(RadioPacket {
            from_radio: "!abcd1234".into(),
            payload: ciphertext,
            nonce: nonce.to_vec(),
            encrypted: true,
        });

        let wrong_key = [0x13u8; 32];
        // Wrong key yields garbage plaintext: either the inner decode fails
        // or it produces something other than the original telemetry
        match decode_envelope(&bytes, &wrong_key) {
            Err(_) => {}
            Ok(update) => {
                let expected = decode_envelope(&plain_packet("!abcd1234", &data), &KEY).unwrap();
                assert_ne!(update.payload, expected.payload);
            }
        }
    }

    #[test]
    fn short_key_surfaces_as_decrypt_error() {
        let bytes = envelope_bytes(RadioPacket {
            from_radio: "!abcd1234".into(),
            payload: vec![1, 2, 3],
            nonce: vec![0; 16],
            encrypted: true,
        });
        assert!(matches!(
            decode_envelope(&bytes, &[0u8; 1]),
            Err(DecodeError::Decrypt(CryptoError::InvalidKeyLength(1)))
        ));
    }
}
