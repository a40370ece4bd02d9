//! meshcot core - mesh packet decoding and CoT encoding
//!
//! This crate provides the gateway pipeline pieces:
//! - Channel payload decryption (AES-256-CTR)
//! - Two-stage mesh envelope decoding into typed updates
//! - The merged per-node state cache with TTL eviction
//! - Cursor-on-Target event encoding

pub mod cache;
pub mod cot;
pub mod crypto;
pub mod node;
pub mod packet;

pub use cache::{MergeOutcome, NodeCache, DEFAULT_STALE_SECS};
pub use cot::{encode_event, CotError, DEFAULT_EVENT_TYPE};
pub use crypto::{decrypt_payload, CryptoError, CHANNEL_KEY_LEN};
pub use node::{NodeId, NodeState, PositionFix, TelemetryState};
pub use packet::{decode_envelope, DecodeError, MeshUpdate, PacketPayload};
