//! Intensity/direction error model and the coarse grid search.
//!
//! For a candidate point `c` and qualifying nodes `n`:
//!
//! ```text
//! d_n     = max(|c - pos_n|, d_min)
//! P_n     = 1 / d_n²                      (inverse-square prediction)
//! err_int = Σ (P_n / ΣP - ê_n)²           (ê_n = measured energy share)
//! err_dir = λ Σ (1 - dir_n · unit(c - pos_n))   nodes with a direction only
//! err     = err_int + err_dir
//! ```
//!
//! Everything here is a pure function of its inputs.

use droneloc_core::config::GridBounds;
use droneloc_core::geometry::Vec3;
use droneloc_core::types::NodeId;

/// One qualifying node's measurement, in global coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Observation {
    /// Node id.
    pub node_id: NodeId,
    /// Node position.
    pub position: Vec3,
    /// Normalised energy share `ê_n`.
    pub share: f64,
    /// Global unit direction toward the source, if the node had one.
    pub direction: Option<Vec3>,
}

/// Raw inverse-square intensity predicted at `node` for a source at `point`.
///
/// Strictly decreasing in distance beyond `min_distance`.
#[must_use]
pub fn predicted_intensity(point: &Vec3, node: &Vec3, min_distance: f64) -> f64 {
    let d = point.distance(node).max(min_distance);
    1.0 / (d * d)
}

/// Error surface over candidate positions for one fusion cycle.
#[derive(Debug, Clone, Copy)]
pub struct ErrorModel<'a> {
    observations: &'a [Observation],
    min_distance: f64,
    direction_weight: f64,
}

impl<'a> ErrorModel<'a> {
    /// Build a model; `min_distance` must be positive.
    #[must_use]
    pub fn new(observations: &'a [Observation], min_distance: f64, direction_weight: f64) -> Self {
        Self {
            observations,
            min_distance,
            direction_weight,
        }
    }

    /// Squared error between predicted and measured energy shares.
    #[must_use]
    pub fn intensity_error(&self, point: &Vec3) -> f64 {
        let raw: Vec<f64> = self
            .observations
            .iter()
            .map(|o| predicted_intensity(point, &o.position, self.min_distance))
            .collect();
        let total: f64 = raw.iter().sum();
        if total <= 0.0 {
            return f64::INFINITY;
        }
        raw.iter()
            .zip(self.observations)
            .map(|(p, o)| {
                let diff = p / total - o.share;
                diff * diff
            })
            .sum()
    }

    /// Weighted misalignment between reported and implied bearings.
    ///
    /// A candidate coinciding with a node has no bearing and counts as
    /// fully misaligned for that node.
    #[must_use]
    pub fn direction_error(&self, point: &Vec3) -> f64 {
        if self.direction_weight == 0.0 {
            return 0.0;
        }
        let sum: f64 = self
            .observations
            .iter()
            .filter_map(|o| {
                let dir = o.direction?;
                let implied = (*point - o.position).normalized();
                Some(implied.map_or(1.0, |u| 1.0 - dir.dot(&u)))
            })
            .sum();
        self.direction_weight * sum
    }

    /// Total error at `point`.
    #[must_use]
    pub fn error(&self, point: &Vec3) -> f64 {
        self.intensity_error(point) + self.direction_error(point)
    }

    /// Observations this model was built from.
    #[must_use]
    pub fn observations(&self) -> &[Observation] {
        self.observations
    }
}

/// Best grid cell of a coarse search.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridFix {
    /// Grid point with the lowest error.
    pub point: Vec3,
    /// Error at that point.
    pub error: f64,
}

/// Evaluate the model at every grid point (endpoints included) and return
/// the minimum. Ties keep the first point in x-major order.
#[must_use]
pub fn coarse_search(model: &ErrorModel<'_>, bounds: &GridBounds, step: f64) -> GridFix {
    let [nx, ny, nz] = bounds.counts(step);
    let lo = bounds.min();
    let hi = bounds.max();
    let coord = |origin: f64, max: f64, i: usize| (origin + i as f64 * step).min(max);

    let mut best = GridFix {
        point: lo,
        error: f64::INFINITY,
    };
    for ix in 0..nx {
        let x = coord(lo.x, hi.x, ix);
        for iy in 0..ny {
            let y = coord(lo.y, hi.y, iy);
            for iz in 0..nz {
                let point = Vec3::new(x, y, coord(lo.z, hi.z, iz));
                let error = model.error(&point);
                if error < best.error {
                    best = GridFix { point, error };
                }
            }
        }
    }
    best
}
