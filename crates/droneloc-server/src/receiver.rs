//! UDP ingestion of feature-frame packets.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::net::UdpSocket;
use tokio::sync::watch;

use droneloc_core::error::CoreError;
use droneloc_core::packet::{self, MAX_PACKET_BYTES};
use droneloc_core::types::NodeId;

use crate::state_table::NodeStateTable;

/// Datagram counters for the receive loop.
#[derive(Debug, Default)]
pub struct ReceiverStats {
    datagrams: AtomicU64,
    accepted: AtomicU64,
    rejected: AtomicU64,
    malformed: AtomicU64,
}

/// Point-in-time copy of [`ReceiverStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiverStatsSnapshot {
    /// Datagrams read from the socket.
    pub datagrams: u64,
    /// Frames the table accepted.
    pub accepted: u64,
    /// Frames the table refused.
    pub rejected: u64,
    /// Datagrams that failed to decode.
    pub malformed: u64,
}

impl ReceiverStats {
    /// Copy the counters.
    pub fn snapshot(&self) -> ReceiverStatsSnapshot {
        ReceiverStatsSnapshot {
            datagrams: self.datagrams.load(Ordering::Relaxed),
            accepted: self.accepted.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
        }
    }
}

/// Decode one datagram and hand the frame to the table.
///
/// Returns the node id of an accepted frame. Decode failures and ingest
/// rejections come back as [`CoreError::Packet`] and [`CoreError::Ingest`];
/// both are recoverable and leave the table unchanged.
pub fn handle_datagram(table: &NodeStateTable, data: &[u8], stats: &ReceiverStats) -> Result<NodeId, CoreError> {
    stats.datagrams.fetch_add(1, Ordering::Relaxed);
    let frame = packet::decode(data).map_err(|e| {
        stats.malformed.fetch_add(1, Ordering::Relaxed);
        e
    })?;
    let node_id = frame.node_id;
    match table.ingest(frame) {
        Ok(()) => {
            stats.accepted.fetch_add(1, Ordering::Relaxed);
            Ok(node_id)
        }
        Err(e) => {
            stats.rejected.fetch_add(1, Ordering::Relaxed);
            Err(e.into())
        }
    }
}

/// Read datagrams until `shutdown` flips to `true`.
pub async fn receive_loop(
    socket: UdpSocket,
    table: Arc<NodeStateTable>,
    stats: Arc<ReceiverStats>,
    mut shutdown: watch::Receiver<bool>,
) {
    if let Ok(addr) = socket.local_addr() {
        tracing::info!(%addr, "listening for feature frames");
    }
    let mut buf = vec![0u8; MAX_PACKET_BYTES];
    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                // A dropped sender also means stop.
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            received = socket.recv_from(&mut buf) => {
                match received {
                    Ok((len, src)) => match handle_datagram(&table, &buf[..len], &stats) {
                        Ok(node_id) => tracing::trace!(node_id, %src, "frame accepted"),
                        Err(CoreError::Ingest(e)) => {
                            tracing::warn!(%src, reason = e.kind(), "frame rejected: {e}");
                        }
                        Err(e) => tracing::warn!(%src, len, "bad packet: {e}"),
                    },
                    Err(e) => {
                        tracing::warn!("UDP recv error: {e}");
                        tokio::time::sleep(Duration::from_millis(100)).await;
                    }
                }
            }
        }
    }
    tracing::info!("receiver stopped");
}
