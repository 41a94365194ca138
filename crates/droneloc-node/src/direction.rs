//! Energy-weighted direction of arrival.
//!
//! Microphones pointing toward the source see more net energy, so the
//! weighted sum of their pointing vectors leans toward the source bearing.
//! No timing synchronisation is needed; the estimate is coarse by nature.

use droneloc_core::geometry::{MicArrayGeometry, Vec3, NORM_EPSILON};

/// Output of [`DirectionEstimator::estimate`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DirectionEstimate {
    /// Unit vector in the node frame, `None` when no energy was seen.
    pub direction: Option<Vec3>,
    /// `min(Σ weights, 1)`; 0 when `direction` is `None`.
    pub confidence: f64,
}

impl DirectionEstimate {
    /// The "no detectable energy" outcome.
    pub const UNDEFINED: DirectionEstimate = DirectionEstimate {
        direction: None,
        confidence: 0.0,
    };
}

/// Converts per-microphone weights into a local direction.
#[derive(Debug, Clone)]
pub struct DirectionEstimator {
    geometry: MicArrayGeometry,
}

impl DirectionEstimator {
    /// Create an estimator for an array.
    #[must_use]
    pub fn new(geometry: MicArrayGeometry) -> Self {
        Self { geometry }
    }

    /// Estimate a direction from per-mic weights (usually net energy).
    ///
    /// Negative weights are treated as zero; extra or missing weights
    /// beyond the channel count are ignored.
    #[must_use]
    pub fn estimate(&self, weights: &[f64]) -> DirectionEstimate {
        let mut raw = Vec3::ZERO;
        let mut total = 0.0;
        for (v, w) in self.geometry.vectors().iter().zip(weights) {
            let w = if w.is_finite() { w.max(0.0) } else { 0.0 };
            raw = raw + *v * w;
            total += w;
        }

        if total < NORM_EPSILON {
            return DirectionEstimate::UNDEFINED;
        }
        match raw.normalized() {
            Some(direction) => DirectionEstimate {
                direction: Some(direction),
                confidence: total.min(1.0),
            },
            None => DirectionEstimate::UNDEFINED,
        }
    }

    /// Array geometry in use.
    #[must_use]
    pub fn geometry(&self) -> &MicArrayGeometry {
        &self.geometry
    }
}
