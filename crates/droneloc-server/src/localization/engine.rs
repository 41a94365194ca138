//! Fusion cycle: snapshot in, [`FusionEstimate`] out.

use chrono::{DateTime, Utc};

use droneloc_core::config::{ServerConfig, SolverConfig};
use droneloc_core::error::NoFixReason;
use droneloc_core::geometry::Vec3;
use droneloc_core::types::{FusionEstimate, NodeDetail};

use super::grid::{coarse_search, ErrorModel, GridFix, Observation};
use super::refine::{nelder_mead, SearchBox};
use super::smoothing::MotionSmoother;
use crate::state_table::{NodeView, TableSnapshot};

/// Unsmoothed result of a successful solve.
#[derive(Debug, Clone, PartialEq)]
pub struct Solution {
    /// Best position.
    pub position: Vec3,
    /// Residual at `position`.
    pub error: f64,
    /// `1 / (1 + error)` scaled by participation.
    pub confidence: f64,
    /// Nodes that took part.
    pub participating: usize,
}

fn global_direction(view: &NodeView) -> Option<Vec3> {
    let local = view.latest.as_ref()?.direction_local?;
    view.rotation.apply(&local).normalized()
}

fn node_energy(view: &NodeView) -> f64 {
    view.latest
        .as_ref()
        .map_or(0.0, |f| f.total_net_energy())
}

/// Per-node detail with shares filled in for participating nodes.
fn node_details(snapshot: &TableSnapshot, total_energy: f64) -> Vec<NodeDetail> {
    snapshot
        .nodes
        .iter()
        .map(|view| {
            let participating = view.qualifies();
            let energy = if participating && total_energy > 0.0 {
                node_energy(view) / total_energy
            } else {
                0.0
            };
            NodeDetail {
                node_id: view.node_id,
                energy,
                direction: global_direction(view),
                online: view.online,
                participating,
            }
        })
        .collect()
}

/// Locate the source from one snapshot without touching any state.
///
/// # Errors
///
/// - [`NoFixReason::InsufficientNodes`] when fewer than `min_nodes` nodes
///   are online and detecting
/// - [`NoFixReason::DegenerateGeometry`] when the qualifying nodes carry no
///   energy or the error surface is not finite anywhere
pub fn solve(snapshot: &TableSnapshot, solver: &SolverConfig) -> Result<Solution, NoFixReason> {
    let qualifying: Vec<&NodeView> = snapshot.nodes.iter().filter(|v| v.qualifies()).collect();
    let required = solver.min_nodes.max(2);
    if qualifying.len() < required {
        return Err(NoFixReason::InsufficientNodes {
            qualifying: qualifying.len(),
            required,
        });
    }

    let energies: Vec<f64> = qualifying.iter().map(|v| node_energy(v)).collect();
    let total: f64 = energies.iter().sum();
    if !(total > 0.0 && total.is_finite()) {
        return Err(NoFixReason::DegenerateGeometry);
    }

    let observations: Vec<Observation> = qualifying
        .iter()
        .zip(&energies)
        .map(|(view, e)| Observation {
            node_id: view.node_id,
            position: view.position,
            share: e / total,
            direction: global_direction(view),
        })
        .collect();

    let model = ErrorModel::new(&observations, solver.min_distance, solver.direction_weight);
    let coarse = coarse_search(&model, &solver.bounds, solver.step);
    if !coarse.error.is_finite() {
        return Err(NoFixReason::DegenerateGeometry);
    }

    let best: GridFix = if solver.refine {
        let cell = SearchBox::cell(coarse.point, solver.step, solver.bounds.min(), solver.bounds.max());
        nelder_mead(&model, coarse, &cell, solver.step, solver.refine_max_iterations)
    } else {
        coarse
    };

    let online = snapshot.nodes.iter().filter(|v| v.online).count().max(1);
    let participation = (qualifying.len() as f64 / online as f64).min(1.0);
    let error = best.error.max(0.0);

    Ok(Solution {
        position: best.point,
        error,
        confidence: participation / (1.0 + error),
        participating: qualifying.len(),
    })
}

/// Stateful localizer: runs [`solve`] and smooths the resulting track.
#[derive(Debug, Clone)]
pub struct LocalizationEngine {
    solver: SolverConfig,
    smoother: MotionSmoother,
    tracking: bool,
}

impl LocalizationEngine {
    /// Create an engine from the server configuration.
    #[must_use]
    pub fn new(config: &ServerConfig) -> Self {
        Self {
            solver: config.solver.clone(),
            smoother: MotionSmoother::new(&config.smoothing),
            tracking: false,
        }
    }

    /// Run one fusion cycle at the snapshot's time.
    ///
    /// No-fix outcomes are returned as estimates with `present = false`
    /// and end the current track; the next fix starts a fresh one.
    #[tracing::instrument(level = "debug", skip_all, fields(nodes = snapshot.nodes.len()))]
    pub fn localize(&mut self, snapshot: &TableSnapshot) -> FusionEstimate {
        self.localize_at(snapshot, snapshot.taken_at)
    }

    fn localize_at(&mut self, snapshot: &TableSnapshot, now: DateTime<Utc>) -> FusionEstimate {
        match solve(snapshot, &self.solver) {
            Ok(solution) => {
                if !self.tracking {
                    self.smoother.reset();
                    self.tracking = true;
                    tracing::info!(position = ?solution.position, "track started");
                }
                let (position, velocity) = self.smoother.update(solution.position, now);
                let total: f64 = snapshot
                    .nodes
                    .iter()
                    .filter(|v| v.qualifies())
                    .map(node_energy)
                    .sum();
                tracing::debug!(
                    ?position,
                    error = solution.error,
                    confidence = solution.confidence,
                    participating = solution.participating,
                    "fix"
                );
                FusionEstimate {
                    timestamp: now,
                    present: true,
                    position: Some(position),
                    velocity: Some(velocity),
                    confidence: solution.confidence.clamp(0.0, 1.0),
                    error: solution.error,
                    no_fix: None,
                    per_node_detail: node_details(snapshot, total),
                }
            }
            Err(reason) => {
                if self.tracking {
                    tracing::info!(%reason, "track lost");
                    self.tracking = false;
                }
                FusionEstimate::no_fix(now, reason, node_details(snapshot, 0.0))
            }
        }
    }

    /// Whether the last cycle produced a fix.
    #[must_use]
    pub fn is_tracking(&self) -> bool {
        self.tracking
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use droneloc_core::geometry::Rotation3;
    use droneloc_core::types::{FeatureFrame, NodeId};

    fn view(node_id: NodeId, position: Vec3, energy: f64, present: bool, dir: Option<Vec3>) -> NodeView {
        let now = Utc::now();
        let mut frame = FeatureFrame::heartbeat(node_id, 1, now, vec![0.0; 3]);
        frame.heartbeat = false;
        frame.present = present;
        frame.mic_rms = vec![energy, 0.0, 0.0];
        frame.net_energy = vec![energy, 0.0, 0.0];
        frame.direction_local = dir;
        NodeView {
            node_id,
            position,
            rotation: Rotation3::IDENTITY,
            online: true,
            latest: Some(frame),
        }
    }

    fn snapshot(nodes: Vec<NodeView>) -> TableSnapshot {
        TableSnapshot { taken_at: Utc::now(), nodes }
    }

    fn engine() -> LocalizationEngine {
        LocalizationEngine::new(&ServerConfig::default())
    }

    #[test]
    fn one_detecting_node_is_insufficient() {
        let snap = snapshot(vec![
            view(1, Vec3::new(0.0, 0.0, 1.0), 1.0, true, None),
            view(2, Vec3::new(20.0, 0.0, 1.0), 1.0, false, None),
            view(3, Vec3::new(0.0, 20.0, 1.0), 1.0, false, None),
        ]);
        let est = engine().localize(&snap);
        assert!(!est.present);
        assert!(est.position.is_none());
        assert_eq!(est.no_fix, Some(NoFixReason::InsufficientNodes { qualifying: 1, required: 2 }));
        assert_eq!(est.per_node_detail.len(), 3);
    }

    #[test]
    fn offline_nodes_do_not_qualify() {
        let mut nodes = vec![
            view(1, Vec3::new(0.0, 0.0, 1.0), 1.0, true, None),
            view(2, Vec3::new(20.0, 0.0, 1.0), 1.0, true, None),
        ];
        nodes[1].online = false;
        let est = engine().localize(&snapshot(nodes));
        assert!(matches!(est.no_fix, Some(NoFixReason::InsufficientNodes { qualifying: 1, .. })));
        assert!(!est.per_node_detail[1].online);
    }

    #[test]
    fn zero_energy_is_degenerate() {
        let snap = snapshot(vec![
            view(1, Vec3::new(0.0, 0.0, 1.0), 0.0, true, None),
            view(2, Vec3::new(20.0, 0.0, 1.0), 0.0, true, None),
            view(3, Vec3::new(0.0, 20.0, 1.0), 0.0, true, None),
        ]);
        let est = engine().localize(&snap);
        assert_eq!(est.no_fix, Some(NoFixReason::DegenerateGeometry));
        assert_eq!(est.confidence, 0.0);
    }

    #[test]
    fn participation_scales_confidence() {
        let full = snapshot(vec![
            view(1, Vec3::new(0.0, 0.0, 1.0), 0.5, true, None),
            view(2, Vec3::new(20.0, 0.0, 1.0), 0.5, true, None),
        ]);
        let mut partial_nodes = full.nodes.clone();
        partial_nodes.push(view(3, Vec3::new(0.0, 20.0, 1.0), 0.0, false, None));
        let partial = snapshot(partial_nodes);

        let solver = SolverConfig { refine: false, ..SolverConfig::default() };
        let a = solve(&full, &solver).unwrap();
        let b = solve(&partial, &solver).unwrap();
        assert!((b.confidence - a.confidence * 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn direction_is_rotated_into_global_frame() {
        let mut v = view(1, Vec3::ZERO, 1.0, true, Some(Vec3::new(1.0, 0.0, 0.0)));
        v.rotation = droneloc_core::geometry::Orientation { yaw_deg: 90.0, pitch_deg: 0.0, roll_deg: 0.0 }.to_rotation();
        let g = global_direction(&v).unwrap();
        assert!((g.y - 1.0).abs() < 1e-9, "{g:?}");
    }

    #[test]
    fn new_track_after_loss_is_not_smoothed_with_old() {
        let mut eng = engine();
        let near_a = snapshot(vec![
            view(1, Vec3::new(0.0, 0.0, 1.0), 0.8, true, None),
            view(2, Vec3::new(20.0, 0.0, 1.0), 0.2, true, None),
        ]);
        let first = eng.localize(&near_a).position.unwrap();

        let lost = snapshot(vec![view(1, Vec3::new(0.0, 0.0, 1.0), 0.8, false, None)]);
        assert!(!eng.localize(&lost).present);
        assert!(!eng.is_tracking());

        let near_b = snapshot(vec![
            view(1, Vec3::new(0.0, 0.0, 1.0), 0.2, true, None),
            view(2, Vec3::new(20.0, 0.0, 1.0), 0.8, true, None),
        ]);
        let fresh = eng.localize(&near_b);
        let raw = solve(&near_b, &SolverConfig::default()).unwrap();
        assert_eq!(fresh.position, Some(raw.position));
        assert_eq!(fresh.velocity, Some(Vec3::ZERO));
        assert_ne!(fresh.position, Some(first));
    }
}
