//! Exponential smoothing of the fused track.

use chrono::{DateTime, Utc};

use droneloc_core::config::SmoothingConfig;
use droneloc_core::geometry::Vec3;

/// Shortest interval used when deriving velocity, seconds.
const MIN_DT: f64 = 1e-3;

#[derive(Debug, Clone, Copy)]
struct Track {
    position: Vec3,
    velocity: Vec3,
    at: DateTime<Utc>,
}

/// EMA filter over position and velocity.
///
/// The first fix after [`MotionSmoother::reset`] is taken as-is with zero
/// velocity, so a new track never inherits the previous one.
#[derive(Debug, Clone)]
pub struct MotionSmoother {
    position_alpha: f64,
    velocity_alpha: f64,
    track: Option<Track>,
}

impl MotionSmoother {
    /// Create a smoother with no track.
    #[must_use]
    pub fn new(config: &SmoothingConfig) -> Self {
        Self {
            position_alpha: config.position_alpha.clamp(0.0, 1.0),
            velocity_alpha: config.velocity_alpha.clamp(0.0, 1.0),
            track: None,
        }
    }

    /// Fold in a raw fix; returns the smoothed `(position, velocity)`.
    pub fn update(&mut self, raw: Vec3, at: DateTime<Utc>) -> (Vec3, Vec3) {
        let next = match self.track {
            None => Track {
                position: raw,
                velocity: Vec3::ZERO,
                at,
            },
            Some(prev) => {
                let dt = ((at - prev.at).num_microseconds().unwrap_or(0) as f64 * 1e-6).max(MIN_DT);
                let position = raw.lerp_from(&prev.position, self.position_alpha);
                let instantaneous = (position - prev.position) * (1.0 / dt);
                let velocity = instantaneous.lerp_from(&prev.velocity, self.velocity_alpha);
                Track { position, velocity, at }
            }
        };
        self.track = Some(next);
        (next.position, next.velocity)
    }

    /// Drop the current track.
    pub fn reset(&mut self) {
        self.track = None;
    }

    /// Last smoothed position, if tracking.
    #[must_use]
    pub fn position(&self) -> Option<Vec3> {
        self.track.map(|t| t.position)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use chrono::Duration;

    fn smoother() -> MotionSmoother {
        MotionSmoother::new(&SmoothingConfig::default())
    }

    #[test]
    fn first_fix_passes_through() {
        let mut s = smoother();
        let (p, v) = s.update(Vec3::new(1.0, 2.0, 3.0), Utc::now());
        assert_eq!(p, Vec3::new(1.0, 2.0, 3.0));
        assert_eq!(v, Vec3::ZERO);
    }

    #[test]
    fn position_blends_with_alpha() {
        let mut s = smoother();
        let t0 = Utc::now();
        s.update(Vec3::ZERO, t0);
        let (p, v) = s.update(Vec3::new(10.0, 0.0, 0.0), t0 + Duration::seconds(1));
        assert_abs_diff_eq!(p.x, 4.0, epsilon = 1e-12);
        // 4 m/s instantaneous, blended with 0 at alpha 0.2.
        assert_abs_diff_eq!(v.x, 0.8, epsilon = 1e-12);
    }

    #[test]
    fn converges_on_steady_motion() {
        let mut s = smoother();
        let t0 = Utc::now();
        let mut last = (Vec3::ZERO, Vec3::ZERO);
        for i in 0..400 {
            let t = t0 + Duration::milliseconds(50 * i);
            last = s.update(Vec3::new(0.1 * i as f64, 0.0, 0.0), t);
        }
        // 0.1 m per 50 ms.
        assert_abs_diff_eq!(last.1.x, 2.0, epsilon = 1e-3);
    }

    #[test]
    fn reset_starts_new_track() {
        let mut s = smoother();
        let t0 = Utc::now();
        s.update(Vec3::ZERO, t0);
        s.reset();
        assert!(s.position().is_none());
        let (p, v) = s.update(Vec3::new(5.0, 5.0, 5.0), t0 + Duration::seconds(1));
        assert_eq!(p, Vec3::new(5.0, 5.0, 5.0));
        assert_eq!(v, Vec3::ZERO);
    }
}
