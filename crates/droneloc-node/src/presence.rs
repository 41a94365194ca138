//! Hysteresis presence detector.
//!
//! Decides whether a source is present from the aggregate signal
//! `S = Σ net` and aggregate noise `N = Σ floor`:
//!
//! - `Absent → Present` once `S > k_on·N` holds for `min_hold` frames
//! - `Present → Absent` once `S < k_off·N` holds for `min_hold` frames
//!
//! Between the two thresholds the current state is kept, which prevents
//! chatter when the signal sits near a single threshold.

use serde::{Deserialize, Serialize};

/// Guard added to the aggregate noise so a zero floor never divides.
const NOISE_EPSILON: f64 = 1e-6;

/// Detector state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PresenceState {
    /// No source.
    #[default]
    Absent,
    /// Source detected.
    Present,
}

impl PresenceState {
    /// `true` for [`PresenceState::Present`].
    #[must_use]
    pub fn is_present(self) -> bool {
        self == Self::Present
    }
}

/// Debounced two-threshold state machine.
#[derive(Debug, Clone)]
pub struct PresenceDetector {
    state: PresenceState,
    /// Consecutive frames voting for the opposite state.
    pending: u32,
    k_on: f64,
    k_off: f64,
    min_hold: u32,
}

impl PresenceDetector {
    /// Create a detector starting in [`PresenceState::Absent`].
    ///
    /// `k_off` is clamped below `k_on`; `min_hold` is at least 1.
    #[must_use]
    pub fn new(k_on: f64, k_off: f64, min_hold: u32) -> Self {
        Self {
            state: PresenceState::Absent,
            pending: 0,
            k_on,
            k_off: k_off.min(k_on),
            min_hold: min_hold.max(1),
        }
    }

    /// Feed one frame's aggregates and return the (possibly new) state.
    pub fn update(&mut self, signal: f64, noise: f64) -> PresenceState {
        let noise = noise.max(0.0) + NOISE_EPSILON;
        let wants_change = match self.state {
            PresenceState::Absent => signal > self.k_on * noise,
            PresenceState::Present => signal < self.k_off * noise,
        };

        if wants_change {
            self.pending += 1;
            if self.pending >= self.min_hold {
                self.state = match self.state {
                    PresenceState::Absent => PresenceState::Present,
                    PresenceState::Present => PresenceState::Absent,
                };
                self.pending = 0;
                tracing::debug!(state = ?self.state, signal, noise, "presence transition");
            }
        } else {
            self.pending = 0;
        }
        self.state
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> PresenceState {
        self.state
    }

    /// Force the detector back to absent.
    pub fn reset(&mut self) {
        self.state = PresenceState::Absent;
        self.pending = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn latched(min_hold: u32) -> PresenceDetector {
        let mut d = PresenceDetector::new(3.5, 2.0, min_hold);
        for _ in 0..min_hold {
            d.update(10.0, 1.0);
        }
        assert_eq!(d.state(), PresenceState::Present);
        d
    }

    #[test]
    fn rises_after_hold_frames() {
        let mut d = PresenceDetector::new(3.5, 2.0, 3);
        assert_eq!(d.update(4.0, 1.0), PresenceState::Absent);
        assert_eq!(d.update(4.0, 1.0), PresenceState::Absent);
        assert_eq!(d.update(4.0, 1.0), PresenceState::Present);
    }

    #[test]
    fn interrupted_rise_restarts_count() {
        let mut d = PresenceDetector::new(3.5, 2.0, 3);
        d.update(4.0, 1.0);
        d.update(4.0, 1.0);
        d.update(1.0, 1.0);
        d.update(4.0, 1.0);
        assert_eq!(d.update(4.0, 1.0), PresenceState::Absent);
        assert_eq!(d.update(4.0, 1.0), PresenceState::Present);
    }

    #[test]
    fn oscillation_above_off_threshold_keeps_latch() {
        let k_off = 2.0;
        let noise = 1.0;
        let mut d = latched(2);
        for i in 0..200 {
            let s = if i % 2 == 0 { 1.5 * k_off * noise } else { 2.5 * k_off * noise };
            assert_eq!(d.update(s, noise), PresenceState::Present, "dropped at frame {i}");
        }
    }

    #[test]
    fn between_thresholds_never_rises() {
        let mut d = PresenceDetector::new(3.5, 2.0, 1);
        for _ in 0..100 {
            assert_eq!(d.update(3.0, 1.0), PresenceState::Absent);
        }
    }

    #[test]
    fn single_dip_below_off_is_debounced() {
        let mut d = latched(3);
        d.update(1.0, 1.0);
        d.update(1.0, 1.0);
        assert_eq!(d.update(3.0, 1.0), PresenceState::Present);
        d.update(1.0, 1.0);
        d.update(1.0, 1.0);
        assert_eq!(d.update(1.0, 1.0), PresenceState::Absent);
    }

    #[test]
    fn zero_noise_does_not_panic() {
        let mut d = PresenceDetector::new(3.5, 2.0, 1);
        assert_eq!(d.update(0.0, 0.0), PresenceState::Absent);
        assert_eq!(d.update(1.0, 0.0), PresenceState::Present);
    }
}
