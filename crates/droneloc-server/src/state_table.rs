//! Server-side table of configured nodes.
//!
//! The table is a fixed arena: one slot per configured node, created at
//! startup and never removed. Slots are individually locked so ingestion
//! for one node never waits on another, and a frame is either applied in
//! full or rejected without touching the slot.
//!
//! ```text
//! node_id ──► index (immutable HashMap) ──► slots[i]: Mutex<NodeSlot>
//! ```

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use droneloc_core::config::{LivenessConfig, NodePlacement};
use droneloc_core::error::IngestError;
use droneloc_core::geometry::{Rotation3, Vec3};
use droneloc_core::types::{FeatureFrame, NodeId, NodeSummary};

/// Per-node ingestion counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestStats {
    /// Frames accepted.
    pub accepted: u64,
    /// Frames rejected for a non-increasing sequence.
    pub rejected_stale: u64,
    /// Frames rejected for exceeding the latency bound.
    pub rejected_expired: u64,
    /// Frames inferred missing from sequence gaps.
    pub dropped: u64,
}

impl IngestStats {
    /// Total rejections of any kind.
    #[must_use]
    pub fn rejected(&self) -> u64 {
        self.rejected_stale + self.rejected_expired
    }
}

#[derive(Debug)]
struct NodeSlot {
    placement: NodePlacement,
    rotation: Rotation3,
    latest: Option<FeatureFrame>,
    history: VecDeque<FeatureFrame>,
    last_seen: Option<DateTime<Utc>>,
    online: bool,
    stats: IngestStats,
}

impl NodeSlot {
    fn new(placement: NodePlacement) -> Self {
        Self {
            rotation: placement.orientation.to_rotation(),
            placement,
            latest: None,
            history: VecDeque::new(),
            last_seen: None,
            online: false,
            stats: IngestStats::default(),
        }
    }

    fn is_live(&self, now: DateTime<Utc>, timeout: Duration) -> bool {
        self.online && self.last_seen.is_some_and(|seen| now - seen < timeout)
    }
}

/// Immutable copy of one node's state, taken for a fusion cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeView {
    /// Node id.
    pub node_id: NodeId,
    /// Global position.
    pub position: Vec3,
    /// Local-to-global rotation.
    pub rotation: Rotation3,
    /// Whether the node counts as online at snapshot time.
    pub online: bool,
    /// Latest accepted frame.
    pub latest: Option<FeatureFrame>,
}

impl NodeView {
    /// Online and reporting a source.
    #[must_use]
    pub fn qualifies(&self) -> bool {
        self.online && self.latest.as_ref().is_some_and(|f| f.present)
    }
}

/// Snapshot of every configured node, in configuration order.
#[derive(Debug, Clone, PartialEq)]
pub struct TableSnapshot {
    /// Receiving-clock time of the snapshot.
    pub taken_at: DateTime<Utc>,
    /// One view per configured node.
    pub nodes: Vec<NodeView>,
}

/// Latest state, history and liveness of every configured node.
#[derive(Debug)]
pub struct NodeStateTable {
    slots: Vec<Mutex<NodeSlot>>,
    index: HashMap<NodeId, usize>,
    max_latency: Duration,
    offline_timeout: Duration,
    history_capacity: usize,
    unknown_rejected: AtomicU64,
}

impl NodeStateTable {
    /// Build the arena from configured placements.
    ///
    /// Duplicate ids are expected to have been rejected by config
    /// validation; a later duplicate shadows the earlier index entry.
    #[must_use]
    pub fn new(nodes: &[NodePlacement], liveness: &LivenessConfig) -> Self {
        let slots: Vec<Mutex<NodeSlot>> = nodes
            .iter()
            .cloned()
            .map(|p| Mutex::new(NodeSlot::new(p)))
            .collect();
        let index = nodes
            .iter()
            .enumerate()
            .map(|(i, p)| (p.node_id, i))
            .collect();
        Self {
            slots,
            index,
            max_latency: Duration::milliseconds(liveness.max_latency_ms),
            offline_timeout: Duration::milliseconds(liveness.offline_timeout_ms),
            history_capacity: liveness.history_capacity.max(1),
            unknown_rejected: AtomicU64::new(0),
        }
    }

    /// Ingest a frame against the current wall clock.
    ///
    /// # Errors
    ///
    /// See [`NodeStateTable::ingest_at`].
    pub fn ingest(&self, frame: FeatureFrame) -> Result<(), IngestError> {
        self.ingest_at(frame, Utc::now())
    }

    /// Ingest a frame with an explicit receiving-clock time.
    ///
    /// Checks run in order: unknown node, stale sequence, expired
    /// timestamp. Frames stamped in the future are accepted.
    ///
    /// # Errors
    ///
    /// Returns the [`IngestError`] describing the rejection; the table is
    /// left unchanged.
    pub fn ingest_at(&self, frame: FeatureFrame, now: DateTime<Utc>) -> Result<(), IngestError> {
        let Some(&idx) = self.index.get(&frame.node_id) else {
            self.unknown_rejected.fetch_add(1, Ordering::Relaxed);
            return Err(IngestError::UnknownNode { node_id: frame.node_id });
        };
        let mut slot = self.slots[idx].lock();

        let last = slot.latest.as_ref().map(|f| f.sequence);
        if let Some(last) = last {
            if frame.sequence <= last {
                slot.stats.rejected_stale += 1;
                return Err(IngestError::Stale {
                    node_id: frame.node_id,
                    sequence: frame.sequence,
                    last_accepted: last,
                });
            }
        }

        let age = now - frame.timestamp;
        if age > self.max_latency {
            slot.stats.rejected_expired += 1;
            return Err(IngestError::Expired {
                node_id: frame.node_id,
                age_ms: age.num_milliseconds(),
                max_ms: self.max_latency.num_milliseconds(),
            });
        }

        if let Some(last) = last {
            let gap = frame.sequence - last - 1;
            if gap > 0 {
                slot.stats.dropped += gap;
                tracing::debug!(node_id = frame.node_id, gap, "sequence gap");
            }
        }

        if !slot.online {
            tracing::info!(node_id = frame.node_id, "node online");
        }
        slot.online = true;
        slot.last_seen = Some(now);
        slot.stats.accepted += 1;
        if slot.history.len() >= self.history_capacity {
            slot.history.pop_front();
        }
        slot.history.push_back(frame.clone());
        slot.latest = Some(frame);
        Ok(())
    }

    /// Mark nodes silent for longer than the timeout as offline.
    ///
    /// Returns the ids that went offline in this sweep.
    pub fn sweep_at(&self, now: DateTime<Utc>) -> Vec<NodeId> {
        let mut went_offline = Vec::new();
        for slot in &self.slots {
            let mut slot = slot.lock();
            if slot.online && !slot.is_live(now, self.offline_timeout) {
                slot.online = false;
                went_offline.push(slot.placement.node_id);
                tracing::info!(node_id = slot.placement.node_id, "node offline");
            }
        }
        went_offline
    }

    /// Copy every slot for a fusion cycle.
    ///
    /// A node counts as online only if the sweep has not flipped it and
    /// it was heard from within the timeout.
    #[must_use]
    pub fn snapshot(&self, now: DateTime<Utc>) -> TableSnapshot {
        let nodes = self
            .slots
            .iter()
            .map(|slot| {
                let slot = slot.lock();
                NodeView {
                    node_id: slot.placement.node_id,
                    position: slot.placement.position,
                    rotation: slot.rotation,
                    online: slot.is_live(now, self.offline_timeout),
                    latest: slot.latest.clone(),
                }
            })
            .collect();
        TableSnapshot { taken_at: now, nodes }
    }

    /// Health summary of every configured node.
    #[must_use]
    pub fn summaries(&self, now: DateTime<Utc>) -> Vec<NodeSummary> {
        self.slots
            .iter()
            .map(|slot| {
                let slot = slot.lock();
                let latest = slot.latest.as_ref();
                NodeSummary {
                    node_id: slot.placement.node_id,
                    position: slot.placement.position,
                    online: slot.is_live(now, self.offline_timeout),
                    last_seen: slot.last_seen,
                    present: latest.is_some_and(|f| f.present),
                    energy: latest.map_or(0.0, FeatureFrame::total_net_energy),
                    direction_local: latest.and_then(|f| f.direction_local),
                    direction_confidence: latest.map_or(0.0, |f| f.direction_confidence),
                    last_sequence: latest.map(|f| f.sequence),
                    frames_accepted: slot.stats.accepted,
                    frames_rejected: slot.stats.rejected(),
                    frames_dropped: slot.stats.dropped,
                }
            })
            .collect()
    }

    /// Recent accepted frames for one node, oldest first.
    #[must_use]
    pub fn history(&self, node_id: NodeId) -> Option<Vec<FeatureFrame>> {
        let idx = *self.index.get(&node_id)?;
        Some(self.slots[idx].lock().history.iter().cloned().collect())
    }

    /// Ingestion counters for one node.
    #[must_use]
    pub fn stats(&self, node_id: NodeId) -> Option<IngestStats> {
        let idx = *self.index.get(&node_id)?;
        Some(self.slots[idx].lock().stats)
    }

    /// Frames rejected because their node is not configured.
    #[must_use]
    pub fn unknown_rejected(&self) -> u64 {
        self.unknown_rejected.load(Ordering::Relaxed)
    }

    /// Number of configured nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// `true` when no nodes are configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use droneloc_core::geometry::Orientation;

    fn table() -> NodeStateTable {
        let nodes: Vec<NodePlacement> = [(1, 0.0), (2, 20.0), (3, 40.0)]
            .into_iter()
            .map(|(id, x)| NodePlacement {
                node_id: id,
                position: Vec3::new(x, 0.0, 1.0),
                orientation: Orientation::default(),
            })
            .collect();
        NodeStateTable::new(&nodes, &LivenessConfig::default())
    }

    fn frame(node_id: NodeId, sequence: u64, at: DateTime<Utc>) -> FeatureFrame {
        let mut f = FeatureFrame::heartbeat(node_id, sequence, at, vec![0.05; 3]);
        f.heartbeat = false;
        f
    }

    #[test]
    fn accepts_increasing_sequence() {
        let t = table();
        let now = Utc::now();
        for seq in 1..=5 {
            t.ingest_at(frame(1, seq, now), now).unwrap();
        }
        assert_eq!(t.stats(1).unwrap().accepted, 5);
        assert_eq!(t.history(1).unwrap().len(), 5);
    }

    #[test]
    fn rejects_duplicate_and_reordered() {
        let t = table();
        let now = Utc::now();
        t.ingest_at(frame(1, 10, now), now).unwrap();
        let dup = t.ingest_at(frame(1, 10, now), now).unwrap_err();
        assert_eq!(dup, IngestError::Stale { node_id: 1, sequence: 10, last_accepted: 10 });
        assert!(matches!(t.ingest_at(frame(1, 3, now), now), Err(IngestError::Stale { .. })));
        assert_eq!(t.stats(1).unwrap().rejected_stale, 2);
        assert_eq!(t.snapshot(now).nodes[0].latest.as_ref().unwrap().sequence, 10);
    }

    #[test]
    fn rejects_unknown_node() {
        let t = table();
        let now = Utc::now();
        assert_eq!(
            t.ingest_at(frame(99, 1, now), now),
            Err(IngestError::UnknownNode { node_id: 99 })
        );
        assert_eq!(t.unknown_rejected(), 1);
    }

    #[test]
    fn rejects_expired_but_accepts_future() {
        let t = table();
        let now = Utc::now();
        let old = now - Duration::milliseconds(501);
        assert!(matches!(t.ingest_at(frame(2, 1, old), now), Err(IngestError::Expired { .. })));
        // Rejection leaves the slot untouched, so the same sequence may retry.
        t.ingest_at(frame(2, 1, now + Duration::seconds(3)), now).unwrap();
        assert_eq!(t.stats(2).unwrap().rejected_expired, 1);
    }

    #[test]
    fn stale_check_precedes_expiry() {
        let t = table();
        let now = Utc::now();
        t.ingest_at(frame(1, 5, now), now).unwrap();
        let err = t
            .ingest_at(frame(1, 5, now - Duration::seconds(10)), now)
            .unwrap_err();
        assert_eq!(err.kind(), "stale");
    }

    #[test]
    fn counts_sequence_gaps() {
        let t = table();
        let now = Utc::now();
        t.ingest_at(frame(3, 1, now), now).unwrap();
        t.ingest_at(frame(3, 5, now), now).unwrap();
        assert_eq!(t.stats(3).unwrap().dropped, 3);
    }

    #[test]
    fn history_is_bounded() {
        let nodes = vec![NodePlacement {
            node_id: 1,
            position: Vec3::ZERO,
            orientation: Orientation::default(),
        }];
        let t = NodeStateTable::new(
            &nodes,
            &LivenessConfig { history_capacity: 3, ..LivenessConfig::default() },
        );
        let now = Utc::now();
        for seq in 0..10 {
            t.ingest_at(frame(1, seq, now), now).unwrap();
        }
        let seqs: Vec<u64> = t.history(1).unwrap().iter().map(|f| f.sequence).collect();
        assert_eq!(seqs, vec![7, 8, 9]);
    }

    #[test]
    fn sweep_marks_silent_nodes_offline() {
        let t = table();
        let now = Utc::now();
        t.ingest_at(frame(1, 1, now), now).unwrap();
        t.ingest_at(frame(2, 1, now), now).unwrap();

        let later = now + Duration::milliseconds(1500);
        t.ingest_at(frame(2, 2, later), later).unwrap();
        assert!(t.sweep_at(later).is_empty());

        let much_later = now + Duration::milliseconds(2500);
        assert_eq!(t.sweep_at(much_later), vec![1]);

        let summaries = t.summaries(much_later);
        assert!(!summaries[0].online);
        assert!(summaries[1].online);
        assert!(!summaries[2].online);
        assert!(summaries[0].last_seen.is_some(), "offline nodes keep their history");
    }

    #[test]
    fn snapshot_treats_timed_out_nodes_as_offline_before_sweep() {
        let t = table();
        let now = Utc::now();
        t.ingest_at(frame(1, 1, now), now).unwrap();
        let snap = t.snapshot(now + Duration::seconds(5));
        assert!(!snap.nodes[0].online);
    }
}
