//! Node agent: sampler thread, feature thread and frame delivery.
//!
//! ```text
//! ┌──────────────┐  sync_channel(queue_capacity)  ┌─────────────────┐   FrameSink
//! │ sampler      │ ─────── try_send(block) ─────► │ feature thread  │ ──────────► UDP
//! │ (producer)   │   full => drop + count         │ extractor, hb   │
//! └──────────────┘                                └─────────────────┘
//! ```
//!
//! Acquisition never blocks on analysis: when the queue is full the block is
//! dropped and counted. Blocks are stamped when they are read, so frames
//! built from queued audio keep their capture time. The feature thread emits a heartbeat whenever no
//! frame went out for `1 / heartbeat_hz` seconds.

use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, ToSocketAddrs, UdpSocket};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TrySendError};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use ndarray::{concatenate, Array2, Axis};
use serde::{Deserialize, Serialize};

use droneloc_core::config::NodeConfig;
use droneloc_core::packet;
use droneloc_core::types::{FeatureFrame, NodeId};

use crate::error::{NodeError, NodeResult};
use crate::features::{rms, FeatureExtractor};
use crate::sampler::SampleSource;

/// Consumer poll period when heartbeats are disabled.
const IDLE_POLL: Duration = Duration::from_millis(100);
/// Back-off after a failed sampler read.
const SAMPLER_RETRY: Duration = Duration::from_millis(10);

// ---------------------------------------------------------------------------
// Sinks
// ---------------------------------------------------------------------------

/// Destination for emitted frames.
pub trait FrameSink: Send {
    /// Deliver one frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame could not be handed off. The agent
    /// logs and counts it, then continues.
    fn send(&mut self, frame: &FeatureFrame) -> NodeResult<()>;
}

/// Sends encoded packets to the fusion server over UDP.
pub struct UdpFrameSink {
    socket: UdpSocket,
    endpoint: SocketAddr,
}

impl UdpFrameSink {
    /// Bind an ephemeral local socket targeting `endpoint` (`host:port`).
    ///
    /// # Errors
    ///
    /// Fails if the endpoint does not resolve or the socket cannot bind.
    pub fn connect(endpoint: &str) -> NodeResult<Self> {
        let endpoint = endpoint.to_socket_addrs()?.next().ok_or_else(|| {
            NodeError::Network(std::io::Error::new(
                std::io::ErrorKind::AddrNotAvailable,
                format!("{endpoint} did not resolve"),
            ))
        })?;
        let bind = if endpoint.is_ipv6() {
            SocketAddr::from((Ipv6Addr::UNSPECIFIED, 0))
        } else {
            SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0))
        };
        let socket = UdpSocket::bind(bind)?;
        Ok(Self { socket, endpoint })
    }

    /// Remote address packets are sent to.
    #[must_use]
    pub fn endpoint(&self) -> SocketAddr {
        self.endpoint
    }
}

impl FrameSink for UdpFrameSink {
    fn send(&mut self, frame: &FeatureFrame) -> NodeResult<()> {
        let payload = packet::encode(frame);
        self.socket.send_to(&payload, self.endpoint)?;
        tracing::debug!(
            seq = frame.sequence,
            present = frame.present,
            heartbeat = frame.heartbeat,
            energy = frame.total_energy,
            "sent packet"
        );
        Ok(())
    }
}

impl FrameSink for mpsc::Sender<FeatureFrame> {
    fn send(&mut self, frame: &FeatureFrame) -> NodeResult<()> {
        mpsc::Sender::send(self, frame.clone()).map_err(|_| NodeError::Worker("frame receiver dropped".into()))
    }
}

// ---------------------------------------------------------------------------
// Stats and shutdown
// ---------------------------------------------------------------------------

/// Live counters shared between the agent threads.
#[derive(Debug, Default)]
pub struct AgentStats {
    blocks_read: AtomicU64,
    blocks_dropped: AtomicU64,
    sampler_errors: AtomicU64,
    frames_sent: AtomicU64,
    heartbeats_sent: AtomicU64,
    send_errors: AtomicU64,
}

/// Point-in-time copy of [`AgentStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentStatsSnapshot {
    /// Blocks delivered by the sampler.
    pub blocks_read: u64,
    /// Blocks discarded because the queue was full.
    pub blocks_dropped: u64,
    /// Failed sampler reads.
    pub sampler_errors: u64,
    /// Feature frames handed to the sink.
    pub frames_sent: u64,
    /// Heartbeats handed to the sink.
    pub heartbeats_sent: u64,
    /// Sink failures.
    pub send_errors: u64,
}

impl AgentStats {
    /// Copy the current counter values.
    #[must_use]
    pub fn snapshot(&self) -> AgentStatsSnapshot {
        AgentStatsSnapshot {
            blocks_read: self.blocks_read.load(Ordering::Relaxed),
            blocks_dropped: self.blocks_dropped.load(Ordering::Relaxed),
            sampler_errors: self.sampler_errors.load(Ordering::Relaxed),
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            heartbeats_sent: self.heartbeats_sent.load(Ordering::Relaxed),
            send_errors: self.send_errors.load(Ordering::Relaxed),
        }
    }
}

/// Cloneable stop signal for a running agent.
#[derive(Debug, Clone, Default)]
pub struct ShutdownHandle(Arc<AtomicBool>);

impl ShutdownHandle {
    /// Ask the agent to stop after its current iteration.
    pub fn trigger(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether a stop was requested.
    #[must_use]
    pub fn is_triggered(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

// ---------------------------------------------------------------------------
// Agent
// ---------------------------------------------------------------------------

/// A sample block and the instant the sampler returned it.
#[derive(Debug)]
struct CapturedBlock {
    captured_at: DateTime<Utc>,
    samples: Array2<f32>,
}

/// Runs the acquisition and feature pipeline for one node.
pub struct NodeAgent {
    node_id: NodeId,
    extractor: FeatureExtractor,
    block_samples: usize,
    queue_capacity: usize,
    heartbeat_interval: Option<Duration>,
    stats: Arc<AgentStats>,
    shutdown: ShutdownHandle,
}

impl NodeAgent {
    /// Build an agent from a validated configuration.
    ///
    /// # Errors
    ///
    /// Returns [`NodeError::Config`] if the configuration is invalid.
    pub fn new(config: &NodeConfig) -> NodeResult<Self> {
        config.validate()?;
        let geometry = config.geometry()?;
        let extractor = FeatureExtractor::new(
            config.node_id,
            geometry,
            &config.sampling,
            &config.detection,
            config.initial_noise(),
        );
        let heartbeat_interval = (config.heartbeat_hz > 0.0)
            .then(|| Duration::from_secs_f64(1.0 / config.heartbeat_hz));

        tracing::info!(
            node_id = config.node_id,
            mode = ?config.array_mode,
            channels = config.channels(),
            hop = extractor.hop(),
            "node agent initialised"
        );

        Ok(Self {
            node_id: config.node_id,
            extractor,
            block_samples: config.sampling.block_samples.max(1),
            queue_capacity: config.sampling.queue_capacity.max(1),
            heartbeat_interval,
            stats: Arc::new(AgentStats::default()),
            shutdown: ShutdownHandle::default(),
        })
    }

    /// Handle that stops [`NodeAgent::run`].
    #[must_use]
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    /// Shared live counters.
    #[must_use]
    pub fn stats(&self) -> Arc<AgentStats> {
        Arc::clone(&self.stats)
    }

    /// Run until the shutdown handle fires or the sampler thread exits.
    ///
    /// The sampler runs on its own thread; frame extraction and delivery
    /// run on the calling thread.
    ///
    /// # Errors
    ///
    /// Returns [`NodeError::Worker`] if the sampler thread panicked.
    pub fn run<S: FrameSink>(mut self, source: Box<dyn SampleSource>, mut sink: S) -> NodeResult<AgentStatsSnapshot> {
        tracing::info!(node_id = self.node_id, "starting node agent");
        let (tx, rx) = mpsc::sync_channel(self.queue_capacity);

        let producer = {
            let stats = Arc::clone(&self.stats);
            let shutdown = self.shutdown.clone();
            let block_samples = self.block_samples;
            thread::Builder::new()
                .name(format!("sampler-{}", self.node_id))
                .spawn(move || produce(source, tx, block_samples, &stats, &shutdown))
                .map_err(NodeError::Network)?
        };

        self.consume(&rx, &mut sink);

        self.shutdown.trigger();
        drop(rx);
        producer
            .join()
            .map_err(|_| NodeError::Worker("sampler thread panicked".into()))?;

        let snapshot = self.stats.snapshot();
        tracing::info!(node_id = self.node_id, ?snapshot, "node agent stopped");
        Ok(snapshot)
    }

    fn consume<S: FrameSink>(&mut self, rx: &Receiver<CapturedBlock>, sink: &mut S) {
        let poll = self.heartbeat_interval.unwrap_or(IDLE_POLL).min(IDLE_POLL);
        let mut last_emit = Instant::now();

        while !self.shutdown.is_triggered() {
            match rx.recv_timeout(poll) {
                Ok(block) => {
                    let frames = self.extractor.push(block.samples.view(), block.captured_at);
                    if !frames.is_empty() {
                        last_emit = Instant::now();
                    }
                    for frame in &frames {
                        self.deliver(sink, frame, &self.stats.frames_sent);
                    }
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }

            if let Some(interval) = self.heartbeat_interval {
                if last_emit.elapsed() >= interval {
                    let hb = self.extractor.heartbeat(Utc::now());
                    self.deliver(sink, &hb, &self.stats.heartbeats_sent);
                    last_emit = Instant::now();
                }
            }
        }
    }

    fn deliver<S: FrameSink>(&self, sink: &mut S, frame: &FeatureFrame, counter: &AtomicU64) {
        match sink.send(frame) {
            Ok(()) => {
                counter.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                self.stats.send_errors.fetch_add(1, Ordering::Relaxed);
                tracing::error!(seq = frame.sequence, error = %e, "failed to send frame");
            }
        }
    }
}

fn produce(
    mut source: Box<dyn SampleSource>,
    tx: SyncSender<CapturedBlock>,
    block_samples: usize,
    stats: &AgentStats,
    shutdown: &ShutdownHandle,
) {
    let period = Duration::from_secs_f64(block_samples as f64 / f64::from(source.sample_rate().max(1)));
    let paced = source.needs_pacing();

    while !shutdown.is_triggered() {
        let started = Instant::now();
        match source.read_block(block_samples) {
            Ok(samples) => {
                let captured_at = Utc::now();
                stats.blocks_read.fetch_add(1, Ordering::Relaxed);
                match tx.try_send(CapturedBlock { captured_at, samples }) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => {
                        let dropped = stats.blocks_dropped.fetch_add(1, Ordering::Relaxed) + 1;
                        tracing::warn!(dropped, "feature queue full, dropping sample block");
                    }
                    Err(TrySendError::Disconnected(_)) => break,
                }
            }
            Err(e) => {
                stats.sampler_errors.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(error = %e, "sampler read failed");
                thread::sleep(SAMPLER_RETRY);
                continue;
            }
        }
        if paced {
            if let Some(rest) = period.checked_sub(started.elapsed()) {
                thread::sleep(rest);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Calibration and capture
// ---------------------------------------------------------------------------

/// Read `duration` worth of samples from `source`, back to back.
///
/// # Errors
///
/// Propagates sampler failures.
pub fn collect_samples(
    source: &mut dyn SampleSource,
    duration: Duration,
    block_samples: usize,
) -> NodeResult<Array2<f32>> {
    let needed = (duration.as_secs_f64() * f64::from(source.sample_rate())).round() as usize;
    let block_samples = block_samples.max(1);
    let mut blocks = Vec::new();
    let mut have = 0;
    while have < needed {
        let block = source.read_block(block_samples.min(needed - have))?;
        have += block.ncols();
        blocks.push(block);
    }
    if blocks.is_empty() {
        return Ok(Array2::zeros((source.channels(), 0)));
    }
    let views: Vec<_> = blocks.iter().map(|b| b.view()).collect();
    concatenate(Axis(1), &views).map_err(|e| NodeError::sampler(e.to_string()))
}

/// Measure ambient noise per channel over `duration`.
///
/// # Errors
///
/// Propagates sampler failures.
pub fn calibrate(
    source: &mut dyn SampleSource,
    duration: Duration,
    block_samples: usize,
) -> NodeResult<Vec<f64>> {
    let samples = collect_samples(source, duration, block_samples)?;
    Ok(samples.rows().into_iter().map(rms).collect())
}

/// Raw samples written by the `capture` command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Capture {
    /// Capturing node.
    pub node_id: NodeId,
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// One row of volts per channel.
    pub channels: Vec<Vec<f32>>,
}

impl Capture {
    /// Package a `channels × n` block.
    #[must_use]
    pub fn new(node_id: NodeId, sample_rate: u32, samples: &Array2<f32>) -> Self {
        Self {
            node_id,
            sample_rate,
            channels: samples.rows().into_iter().map(|r| r.to_vec()).collect(),
        }
    }

    /// Write as JSON.
    ///
    /// # Errors
    ///
    /// Returns [`NodeError::Output`] if the file cannot be written.
    pub fn write(&self, path: &Path) -> NodeResult<()> {
        let output_err = |message: String| NodeError::Output {
            path: path.to_path_buf(),
            message,
        };
        let json = serde_json::to_vec(self).map_err(|e| output_err(e.to_string()))?;
        std::fs::write(path, json).map_err(|e| output_err(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sampler::SimulatedSampler;

    struct StopAfter {
        tx: mpsc::Sender<FeatureFrame>,
        remaining: usize,
        shutdown: ShutdownHandle,
    }

    impl FrameSink for StopAfter {
        fn send(&mut self, frame: &FeatureFrame) -> NodeResult<()> {
            self.tx.send(frame.clone()).ok();
            self.remaining = self.remaining.saturating_sub(1);
            if self.remaining == 0 {
                self.shutdown.trigger();
            }
            Ok(())
        }
    }

    struct Broken;

    impl SampleSource for Broken {
        fn channels(&self) -> usize {
            3
        }
        fn sample_rate(&self) -> u32 {
            860
        }
        fn read_block(&mut self, _samples: usize) -> NodeResult<Array2<f32>> {
            Err(NodeError::sampler("no converter"))
        }
    }

    /// Hands out `limit` quiet blocks without pacing and logs when each
    /// read returned.
    struct Recorded {
        limit: usize,
        reads: Arc<parking_lot::Mutex<Vec<DateTime<Utc>>>>,
    }

    impl SampleSource for Recorded {
        fn channels(&self) -> usize {
            3
        }
        fn sample_rate(&self) -> u32 {
            860
        }
        fn read_block(&mut self, samples: usize) -> NodeResult<Array2<f32>> {
            let mut reads = self.reads.lock();
            if reads.len() >= self.limit {
                return Err(NodeError::sampler("exhausted"));
            }
            reads.push(Utc::now());
            Ok(Array2::from_elem((3, samples), 0.01))
        }
        fn needs_pacing(&self) -> bool {
            false
        }
    }

    /// Sink that stalls on every frame.
    struct Slow {
        frames: Vec<(FeatureFrame, DateTime<Utc>)>,
        stop_after: usize,
        delay: Duration,
        shutdown: ShutdownHandle,
    }

    impl FrameSink for &mut Slow {
        fn send(&mut self, frame: &FeatureFrame) -> NodeResult<()> {
            thread::sleep(self.delay);
            self.frames.push((frame.clone(), Utc::now()));
            if self.frames.len() >= self.stop_after {
                self.shutdown.trigger();
            }
            Ok(())
        }
    }

    fn config() -> NodeConfig {
        NodeConfig {
            node_id: 4,
            ..NodeConfig::default()
        }
    }

    #[test]
    fn emits_frames_with_increasing_sequence() {
        let agent = NodeAgent::new(&config()).unwrap();
        let (tx, rx) = mpsc::channel();
        let sink = StopAfter { tx, remaining: 5, shutdown: agent.shutdown_handle() };
        let source = Box::new(SimulatedSampler::with_seed(860, 3, 0.02, 3).unwrap());

        let stats = agent.run(source, sink).unwrap();
        let frames: Vec<FeatureFrame> = rx.try_iter().collect();
        assert!(frames.len() >= 5);
        assert!(frames.windows(2).all(|w| w[1].sequence > w[0].sequence));
        assert!(frames.iter().all(|f| f.node_id == 4));
        assert!(stats.blocks_read > 0);
    }

    #[test]
    fn heartbeats_when_sampler_is_silent() {
        let mut cfg = config();
        cfg.heartbeat_hz = 20.0;
        let agent = NodeAgent::new(&cfg).unwrap();
        let (tx, rx) = mpsc::channel();
        let sink = StopAfter { tx, remaining: 2, shutdown: agent.shutdown_handle() };

        let stats = agent.run(Box::new(Broken), sink).unwrap();
        let frames: Vec<FeatureFrame> = rx.try_iter().collect();
        assert_eq!(frames.len(), 2);
        assert!(frames.iter().all(|f| f.heartbeat && !f.present));
        assert_eq!(stats.heartbeats_sent, 2);
        assert!(stats.sampler_errors > 0);
    }

    #[test]
    fn stalled_sink_keeps_capture_time() {
        let mut cfg = config();
        cfg.heartbeat_hz = 0.0;
        // One block per hop, so frame `i` comes from read `i`.
        cfg.sampling.block_samples = cfg.sampling.hop_samples();
        let agent = NodeAgent::new(&cfg).unwrap();
        let reads = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let source = Box::new(Recorded { limit: 4, reads: Arc::clone(&reads) });
        let mut sink = Slow {
            frames: Vec::new(),
            stop_after: 4,
            delay: Duration::from_millis(100),
            shutdown: agent.shutdown_handle(),
        };

        let stats = agent.run(source, &mut sink).unwrap();
        assert_eq!(stats.blocks_dropped, 0);
        let reads = reads.lock();
        assert_eq!(sink.frames.len(), 4);
        for (i, (frame, _)) in sink.frames.iter().enumerate() {
            let lag = (frame.timestamp - reads[i]).num_milliseconds();
            assert!((0..50).contains(&lag), "frame {i} stamped {lag} ms after its read");
        }
        let (last, delivered) = &sink.frames[3];
        assert!((*delivered - last.timestamp).num_milliseconds() >= 250);
    }

    #[test]
    fn invalid_config_is_rejected() {
        let mut cfg = config();
        cfg.detection.k_off = 10.0;
        assert!(matches!(NodeAgent::new(&cfg), Err(NodeError::Config(_))));
    }

    #[test]
    fn calibration_measures_noise() {
        let mut source = SimulatedSampler::with_seed(860, 3, 0.0, 9).unwrap();
        let levels = calibrate(&mut source, Duration::from_secs(1), 128).unwrap();
        assert_eq!(levels.len(), 3);
        for l in levels {
            // Pure 0.1 V tones.
            assert!((l - 0.1 / 2f64.sqrt()).abs() < 0.01, "level {l}");
        }
    }

    #[test]
    fn capture_writes_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cap.json");
        let mut source = SimulatedSampler::with_seed(860, 3, 0.02, 5).unwrap();
        let samples = collect_samples(&mut source, Duration::from_millis(500), 128).unwrap();
        assert_eq!(samples.dim(), (3, 430));

        Capture::new(1, 860, &samples).write(&path).unwrap();
        let back: Capture = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(back.channels.len(), 3);
        assert_eq!(back.channels[0].len(), 430);
    }
}
