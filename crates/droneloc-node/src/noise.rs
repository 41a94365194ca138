//! Adaptive per-microphone noise floor.
//!
//! Tracks the ambient RMS of each channel with a slow exponential moving
//! average. The floor only moves while no source is detected, so a drone
//! that hovers for minutes is never absorbed into the baseline.

/// EMA-based noise floor tracker.
#[derive(Debug, Clone)]
pub struct NoiseFloorTracker {
    /// Current floor per channel.
    level: Vec<f64>,
    /// EMA factor (lower = slower tracking).
    alpha: f64,
}

impl NoiseFloorTracker {
    /// Create a tracker seeded with `initial` levels.
    ///
    /// - `alpha`: EMA factor in `(0, 1)`. Large values let the floor chase
    ///   transient signal and cause missed detections. Default: `0.01`.
    #[must_use]
    pub fn new(initial: Vec<f64>, alpha: f64) -> Self {
        Self {
            level: initial.into_iter().map(|v| v.max(0.0)).collect(),
            alpha: alpha.clamp(1e-6, 1.0),
        }
    }

    /// Fold a new RMS vector into the floor unless a source was present.
    ///
    /// `present` is the detection state of the previous frame.
    pub fn update(&mut self, rms: &[f64], present: bool) {
        if present {
            return;
        }
        for (level, r) in self.level.iter_mut().zip(rms) {
            *level = (1.0 - self.alpha) * *level + self.alpha * r.max(0.0);
        }
    }

    /// `max(rms - floor, 0)` per channel.
    #[must_use]
    pub fn net_energy(&self, rms: &[f64]) -> Vec<f64> {
        droneloc_core::types::net_energy(rms, &self.level)
    }

    /// Aggregate floor `N = Σ floor`.
    #[must_use]
    pub fn aggregate(&self) -> f64 {
        self.level.iter().sum()
    }

    /// Current floor per channel.
    #[must_use]
    pub fn level(&self) -> &[f64] {
        &self.level
    }

    /// Current EMA factor.
    #[must_use]
    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    /// Replace the floor, e.g. after calibration.
    pub fn reset(&mut self, level: Vec<f64>) {
        self.level = level.into_iter().map(|v| v.max(0.0)).collect();
    }
}
