//! Guarded node state cache
//!
//! Sole owner of [`NodeState`]. The ingest side merges partial updates, the
//! dispatch side takes snapshots and evicts stale entries. Merge holds the
//! write lock for the whole mutation, so a snapshot never observes a
//! half-merged entry.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::debug;

use crate::node::{NodeId, NodeState};
use crate::packet::PacketPayload;

/// Eviction threshold applied when none is configured
pub const DEFAULT_STALE_SECS: i64 = 120;

/// Result of merging one inbound update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// First accepted update for this node
    Created,
    /// Existing node updated
    Updated,
    /// Update rejected by normalization rules; cache unchanged
    Skipped,
}

#[derive(Default)]
pub struct NodeCache {
    nodes: RwLock<HashMap<String, NodeState>>,
}

impl NodeCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge one update into the node's state, creating it on first contact.
    ///
    /// Idempotent per logically-identical update apart from the `last_update`
    /// timestamp, which advances to the processing time.
    pub async fn merge(
        &self,
        id: &NodeId,
        payload: &PacketPayload,
        now: DateTime<Utc>,
    ) -> MergeOutcome {
        if matches!(payload, PacketPayload::Ignored) {
            return MergeOutcome::Skipped;
        }

        let mut nodes = self.nodes.write().await;
        match nodes.get_mut(id.as_str()) {
            Some(node) => {
                if node.apply(payload, now) {
                    MergeOutcome::Updated
                } else {
                    MergeOutcome::Skipped
                }
            }
            None => {
                let mut node = NodeState::new(id.clone(), now);
                if node.apply(payload, now) {
                    nodes.insert(id.as_str().to_string(), node);
                    MergeOutcome::Created
                } else {
                    MergeOutcome::Skipped
                }
            }
        }
    }

    /// Consistent snapshot of every node eligible for output: has a position
    /// and is not stale. Ordered by node id; never deletes.
    pub async fn snapshot_valid(
        &self,
        now: DateTime<Utc>,
        threshold_secs: i64,
    ) -> Vec<NodeState> {
        let nodes = self.nodes.read().await;
        let mut valid: Vec<NodeState> = nodes
            .values()
            .filter(|n| n.has_position() && !n.is_stale(now, threshold_secs))
            .cloned()
            .collect();
        valid.sort_by(|a, b| a.id.cmp(&b.id));
        valid
    }

    /// Remove and return every node whose last update is strictly older than
    /// the threshold.
    pub async fn evict_stale(&self, now: DateTime<Utc>, threshold_secs: i64) -> Vec<NodeId> {
        let mut nodes = self.nodes.write().await;
        let expired: Vec<String> = nodes
            .iter()
            .filter(|(_, n)| n.is_stale(now, threshold_secs))
            .map(|(id, _)| id.clone())
            .collect();

        let mut evicted = Vec::with_capacity(expired.len());
        for id in expired {
            if let Some(node) = nodes.remove(&id) {
                debug!(node = %node.id, "Evicted stale node");
                evicted.push(node.id);
            }
        }
        evicted
    }

    pub async fn len(&self) -> usize {
        self.nodes.read().await.len()
    }

    pub async fn get(&self, id: &NodeId) -> Option<NodeState> {
        self.nodes.read().await.get(id.as_str()).cloned()
    }
}
