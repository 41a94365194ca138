//! Drone flight patterns over the surveillance area.

use std::f64::consts::{PI, SQRT_2};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use droneloc_core::geometry::Vec3;

use crate::error::{SimError, SimResult};

/// Movement pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Pattern {
    /// Constant-speed circle around the centre.
    #[default]
    Circle,
    /// Back and forth along the x axis through the centre.
    Line,
    /// Stationary above the centre.
    Hover,
    /// Lemniscate-like figure eight.
    Figure8,
    /// Back and forth along the x = y diagonal.
    Diagonal,
}

impl Pattern {
    /// Every pattern, in CLI order.
    pub const ALL: [Pattern; 5] = [Self::Circle, Self::Line, Self::Hover, Self::Figure8, Self::Diagonal];

    fn name(self) -> &'static str {
        match self {
            Self::Circle => "circle",
            Self::Line => "line",
            Self::Hover => "hover",
            Self::Figure8 => "figure8",
            Self::Diagonal => "diagonal",
        }
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Pattern {
    type Err = SimError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|p| p.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| SimError::UnknownPattern(s.to_string()))
    }
}

/// A flight path parameterised by time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Trajectory {
    pattern: Pattern,
    center: Vec3,
    speed: f64,
    radius: f64,
}

impl Trajectory {
    /// Horizontal centre of the default surveillance area.
    pub const DEFAULT_CENTER: (f64, f64) = (10.0, 10.0);

    /// Build a trajectory at `height` around the default centre.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::InvalidParameter`] unless `speed` and `radius`
    /// are positive and finite and `height` is finite.
    pub fn new(pattern: Pattern, speed: f64, radius: f64, height: f64) -> SimResult<Self> {
        let (cx, cy) = Self::DEFAULT_CENTER;
        Self::around(pattern, Vec3::new(cx, cy, height), speed, radius)
    }

    /// Build a trajectory around an arbitrary centre.
    ///
    /// # Errors
    ///
    /// Same as [`Trajectory::new`].
    pub fn around(pattern: Pattern, center: Vec3, speed: f64, radius: f64) -> SimResult<Self> {
        if !(speed.is_finite() && speed > 0.0) {
            return Err(SimError::invalid("speed", format!("must be > 0, got {speed}")));
        }
        if !(radius.is_finite() && radius > 0.0) {
            return Err(SimError::invalid("radius", format!("must be > 0, got {radius}")));
        }
        if !center.is_finite() {
            return Err(SimError::invalid("center", "must be finite"));
        }
        Ok(Self {
            pattern,
            center,
            speed,
            radius,
        })
    }

    /// The pattern flown.
    pub fn pattern(&self) -> Pattern {
        self.pattern
    }

    /// Position `t` seconds after the start.
    #[must_use]
    pub fn position_at(&self, t: f64) -> Vec3 {
        let Vec3 { x: cx, y: cy, z } = self.center;
        let r = self.radius;
        match self.pattern {
            Pattern::Circle => {
                let angle = (t * self.speed / r) % (2.0 * PI);
                Vec3::new(cx + r * angle.cos(), cy + r * angle.sin(), z)
            }
            Pattern::Line => {
                let offset = shuttle(t, 2.0 * r, self.speed);
                Vec3::new(cx - r + offset, cy, z)
            }
            Pattern::Hover => self.center,
            Pattern::Figure8 => {
                let angle = (t * self.speed / r) % (2.0 * PI);
                Vec3::new(cx + r * angle.sin(), cy + r * angle.sin() * angle.cos(), z)
            }
            Pattern::Diagonal => {
                // Leg length along the diagonal is 2r√2; each axis moves 2r.
                let offset = shuttle(t, 2.0 * r * SQRT_2, self.speed) / SQRT_2;
                Vec3::new(cx - r + offset, cy - r + offset, z)
            }
        }
    }
}

/// Distance from the start of a back-and-forth leg of length `leg`.
fn shuttle(t: f64, leg: f64, speed: f64) -> f64 {
    let travelled = (t.max(0.0) * speed) % (2.0 * leg);
    if travelled <= leg {
        travelled
    } else {
        2.0 * leg - travelled
    }
}
