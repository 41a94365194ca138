//! Fusion service: owns the state table and the engine, runs the periodic
//! fusion and liveness tasks, and publishes estimates.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use tokio::net::UdpSocket;
use tokio::sync::{broadcast, watch};
use tokio::time::MissedTickBehavior;

use droneloc_core::config::ServerConfig;
use droneloc_core::types::FusionEstimate;

use crate::error::{ServerError, ServerResult};
use crate::localization::LocalizationEngine;
use crate::receiver::{self, ReceiverStats};
use crate::state_table::NodeStateTable;

/// Capacity of the estimate broadcast channel.
const BROADCAST_CAPACITY: usize = 64;

/// Shared handle to the running fusion pipeline.
///
/// Cheap to clone; every clone refers to the same table, engine and
/// broadcast channel.
#[derive(Clone)]
pub struct FusionService {
    inner: Arc<ServiceInner>,
}

struct ServiceInner {
    config: ServerConfig,
    table: Arc<NodeStateTable>,
    engine: Mutex<LocalizationEngine>,
    latest: RwLock<FusionEstimate>,
    tx: broadcast::Sender<FusionEstimate>,
    receiver_stats: Arc<ReceiverStats>,
    started_at: DateTime<Utc>,
    cycles: AtomicU64,
    fixes: AtomicU64,
}

impl FusionService {
    /// Validate `config` and build the table and engine.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Config`] when the configuration is invalid.
    pub fn new(config: ServerConfig) -> ServerResult<Self> {
        config.validate()?;
        let table = Arc::new(NodeStateTable::new(&config.nodes, &config.liveness));
        let engine = LocalizationEngine::new(&config);
        let (tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        let now = Utc::now();
        Ok(Self {
            inner: Arc::new(ServiceInner {
                config,
                table,
                engine: Mutex::new(engine),
                latest: RwLock::new(FusionEstimate::empty(now)),
                tx,
                receiver_stats: Arc::new(ReceiverStats::default()),
                started_at: now,
                cycles: AtomicU64::new(0),
                fixes: AtomicU64::new(0),
            }),
        })
    }

    /// Server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.inner.config
    }

    /// Node state table shared with the receiver.
    pub fn table(&self) -> &Arc<NodeStateTable> {
        &self.inner.table
    }

    /// Most recent estimate.
    pub fn latest(&self) -> FusionEstimate {
        self.inner.latest.read().clone()
    }

    /// Subscribe to every future estimate.
    pub fn subscribe(&self) -> broadcast::Receiver<FusionEstimate> {
        self.inner.tx.subscribe()
    }

    /// Datagram counters of the UDP receiver.
    pub fn receiver_stats(&self) -> &Arc<ReceiverStats> {
        &self.inner.receiver_stats
    }

    /// Service start time.
    pub fn started_at(&self) -> DateTime<Utc> {
        self.inner.started_at
    }

    /// `(cycles run, cycles with a fix)`.
    pub fn cycle_counts(&self) -> (u64, u64) {
        (
            self.inner.cycles.load(Ordering::Relaxed),
            self.inner.fixes.load(Ordering::Relaxed),
        )
    }

    /// Run one fusion cycle synchronously at `now`, publish and return it.
    pub fn run_cycle_at(&self, now: DateTime<Utc>) -> FusionEstimate {
        let snapshot = self.inner.table.snapshot(now);
        let estimate = self.inner.engine.lock().localize(&snapshot);

        self.inner.cycles.fetch_add(1, Ordering::Relaxed);
        if estimate.present {
            self.inner.fixes.fetch_add(1, Ordering::Relaxed);
        }
        *self.inner.latest.write() = estimate.clone();
        // No subscribers is not an error.
        let _ = self.inner.tx.send(estimate.clone());
        estimate
    }

    /// Run one fusion cycle on the blocking pool.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Task`] if the blocking task panicked.
    pub async fn run_cycle(&self) -> ServerResult<FusionEstimate> {
        let service = self.clone();
        tokio::task::spawn_blocking(move || service.run_cycle_at(Utc::now()))
            .await
            .map_err(|e| ServerError::Task(format!("fusion cycle: {e}")))
    }

    /// Periodic fusion until shutdown. Cycles never overlap: a tick that
    /// arrives while a solve is running is skipped.
    pub async fn fusion_loop(self, mut shutdown: watch::Receiver<bool>) {
        let period = Duration::from_secs_f64(1.0 / self.inner.config.localization_rate_hz);
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tracing::info!(rate_hz = self.inner.config.localization_rate_hz, "fusion loop started");

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    // A dropped sender also means stop.
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = interval.tick() => {
                    if let Err(e) = self.run_cycle().await {
                        tracing::error!("{e}");
                    }
                }
            }
        }
        tracing::info!("fusion loop stopped");
    }

    /// Periodic liveness sweep until shutdown.
    pub async fn sweep_loop(self, mut shutdown: watch::Receiver<bool>) {
        let period = Duration::from_millis(self.inner.config.liveness.sweep_interval_ms.max(1));
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    // A dropped sender also means stop.
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = interval.tick() => {
                    let flipped = self.inner.table.sweep_at(Utc::now());
                    if !flipped.is_empty() {
                        tracing::warn!(nodes = ?flipped, "nodes went offline");
                    }
                }
            }
        }
    }

    /// Bind the UDP socket and spawn the receiver, fusion and sweep tasks.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Bind`] if the UDP address cannot be bound.
    pub async fn spawn(&self, shutdown: &watch::Receiver<bool>) -> ServerResult<Vec<tokio::task::JoinHandle<()>>> {
        let addr = self.inner.config.listen_addr();
        let socket = UdpSocket::bind(&addr)
            .await
            .map_err(|e| ServerError::bind(addr.clone(), e))?;

        Ok(vec![
            tokio::spawn(receiver::receive_loop(
                socket,
                self.inner.table.clone(),
                self.inner.receiver_stats.clone(),
                shutdown.clone(),
            )),
            tokio::spawn(self.clone().fusion_loop(shutdown.clone())),
            tokio::spawn(self.clone().sweep_loop(shutdown.clone())),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use droneloc_core::error::NoFixReason;
    use droneloc_core::types::FeatureFrame;

    fn detecting(node_id: u32, sequence: u64, energy: f64) -> FeatureFrame {
        let mut frame = FeatureFrame::heartbeat(node_id, sequence, Utc::now(), vec![0.05; 3]);
        frame.heartbeat = false;
        frame.present = true;
        frame.mic_rms = vec![energy + 0.05, 0.05, 0.05];
        frame.net_energy = vec![energy, 0.0, 0.0];
        frame
    }

    #[test]
    fn invalid_config_is_fatal() {
        let mut cfg = ServerConfig::default();
        cfg.nodes.truncate(2);
        assert!(matches!(FusionService::new(cfg), Err(ServerError::Config(_))));
    }

    #[test]
    fn cycle_without_frames_reports_insufficient_nodes() {
        let service = FusionService::new(ServerConfig::default()).unwrap();
        let est = service.run_cycle_at(Utc::now());
        assert!(!est.present);
        assert!(matches!(est.no_fix, Some(NoFixReason::InsufficientNodes { qualifying: 0, .. })));
        assert_eq!(service.latest(), est);
        assert_eq!(service.cycle_counts(), (1, 0));
    }

    #[test]
    fn cycle_publishes_fix_to_subscribers() {
        let service = FusionService::new(ServerConfig::default()).unwrap();
        let mut rx = service.subscribe();
        for (id, e) in [(1, 0.5), (2, 0.3), (3, 0.2)] {
            service.table().ingest(detecting(id, 1, e)).unwrap();
        }
        let est = service.run_cycle_at(Utc::now());
        assert!(est.present);
        assert_eq!(rx.try_recv().unwrap(), est);
        assert_eq!(service.cycle_counts(), (1, 1));
    }

    #[tokio::test]
    async fn background_tasks_stop_on_shutdown() {
        let mut cfg = ServerConfig::default();
        cfg.listen_host = "127.0.0.1".into();
        cfg.listen_port = 0;
        let service = FusionService::new(cfg).unwrap();
        let (tx, rx) = watch::channel(false);
        let handles = service.spawn(&rx).await.unwrap();

        tokio::time::sleep(Duration::from_millis(120)).await;
        tx.send(true).unwrap();
        for h in handles {
            tokio::time::timeout(Duration::from_secs(2), h).await.unwrap().unwrap();
        }
        assert!(service.cycle_counts().0 >= 1);
    }
}
