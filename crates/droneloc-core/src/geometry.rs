//! Spatial primitives: vectors, node orientation and microphone arrays.

use std::ops::{Add, Mul, Neg, Sub};

use serde::{Deserialize, Serialize};

use crate::error::GeometryError;

/// Norms below this are treated as zero.
pub const NORM_EPSILON: f64 = 1e-9;

/// A 3D vector in meters (positions) or unitless (directions).
///
/// Serialized as a plain `[x, y, z]` array.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(from = "[f64; 3]", into = "[f64; 3]")]
pub struct Vec3 {
    /// X component
    pub x: f64,
    /// Y component
    pub y: f64,
    /// Z component
    pub z: f64,
}

impl Vec3 {
    /// The zero vector.
    pub const ZERO: Vec3 = Vec3 { x: 0.0, y: 0.0, z: 0.0 };
    /// Unit vector along +Z (straight up).
    pub const UP: Vec3 = Vec3 { x: 0.0, y: 0.0, z: 1.0 };

    /// Create a vector from components.
    #[must_use]
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Dot product.
    #[must_use]
    pub fn dot(&self, other: &Vec3) -> f64 {
        self.x * other.x + self.y * other.y + self.z * other.z
    }

    /// Euclidean length.
    #[must_use]
    pub fn norm(&self) -> f64 {
        self.dot(self).sqrt()
    }

    /// Distance to another point.
    #[must_use]
    pub fn distance(&self, other: &Vec3) -> f64 {
        (*self - *other).norm()
    }

    /// Unit vector in the same direction, or `None` for a (near) zero vector.
    #[must_use]
    pub fn normalized(&self) -> Option<Vec3> {
        let n = self.norm();
        if n < NORM_EPSILON || !n.is_finite() {
            None
        } else {
            Some(*self * (1.0 / n))
        }
    }

    /// `true` if every component is finite.
    #[must_use]
    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }

    /// Component access by axis index (0 = x, 1 = y, 2 = z).
    #[must_use]
    pub fn axis(&self, axis: usize) -> f64 {
        match axis {
            0 => self.x,
            1 => self.y,
            _ => self.z,
        }
    }

    /// Copy with one axis replaced.
    #[must_use]
    pub fn with_axis(mut self, axis: usize, value: f64) -> Self {
        match axis {
            0 => self.x = value,
            1 => self.y = value,
            _ => self.z = value,
        }
        self
    }

    /// Component-wise clamp into `[min, max]`.
    #[must_use]
    pub fn clamp(&self, min: &Vec3, max: &Vec3) -> Vec3 {
        Vec3::new(
            self.x.clamp(min.x, max.x),
            self.y.clamp(min.y, max.y),
            self.z.clamp(min.z, max.z),
        )
    }

    /// Linear blend `alpha * self + (1 - alpha) * other`.
    #[must_use]
    pub fn lerp_from(&self, other: &Vec3, alpha: f64) -> Vec3 {
        *self * alpha + *other * (1.0 - alpha)
    }
}

impl From<[f64; 3]> for Vec3 {
    fn from(v: [f64; 3]) -> Self {
        Self::new(v[0], v[1], v[2])
    }
}

impl From<Vec3> for [f64; 3] {
    fn from(v: Vec3) -> Self {
        [v.x, v.y, v.z]
    }
}

impl Add for Vec3 {
    type Output = Vec3;
    fn add(self, rhs: Vec3) -> Vec3 {
        Vec3::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl Sub for Vec3 {
    type Output = Vec3;
    fn sub(self, rhs: Vec3) -> Vec3 {
        Vec3::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

impl Mul<f64> for Vec3 {
    type Output = Vec3;
    fn mul(self, rhs: f64) -> Vec3 {
        Vec3::new(self.x * rhs, self.y * rhs, self.z * rhs)
    }
}

impl Neg for Vec3 {
    type Output = Vec3;
    fn neg(self) -> Vec3 {
        Vec3::new(-self.x, -self.y, -self.z)
    }
}

/// Mounting orientation of a node, as intrinsic Z-Y-X Euler angles in degrees.
///
/// All zero means the node's local axes coincide with the global axes.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Orientation {
    /// Rotation about global Z, degrees.
    pub yaw_deg: f64,
    /// Rotation about the once-rotated Y axis, degrees.
    pub pitch_deg: f64,
    /// Rotation about the twice-rotated X axis, degrees.
    pub roll_deg: f64,
}

impl Orientation {
    /// Build the local-to-global rotation `R = Rz(yaw) * Ry(pitch) * Rx(roll)`.
    #[must_use]
    pub fn to_rotation(&self) -> Rotation3 {
        let (sy, cy) = self.yaw_deg.to_radians().sin_cos();
        let (sp, cp) = self.pitch_deg.to_radians().sin_cos();
        let (sr, cr) = self.roll_deg.to_radians().sin_cos();
        Rotation3 {
            m: [
                [cy * cp, cy * sp * sr - sy * cr, cy * sp * cr + sy * sr],
                [sy * cp, sy * sp * sr + cy * cr, sy * sp * cr - cy * sr],
                [-sp, cp * sr, cp * cr],
            ],
        }
    }
}

/// Row-major 3x3 rotation matrix (local frame to global frame).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rotation3 {
    m: [[f64; 3]; 3],
}

impl Rotation3 {
    /// The identity rotation.
    pub const IDENTITY: Rotation3 = Rotation3 {
        m: [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]],
    };

    /// Rotate a local vector into the global frame.
    #[must_use]
    pub fn apply(&self, v: &Vec3) -> Vec3 {
        let m = &self.m;
        Vec3::new(
            m[0][0] * v.x + m[0][1] * v.y + m[0][2] * v.z,
            m[1][0] * v.x + m[1][1] * v.y + m[1][2] * v.z,
            m[2][0] * v.x + m[2][1] * v.y + m[2][2] * v.z,
        )
    }

    /// Global-to-local rotation (the transpose).
    #[must_use]
    pub fn inverse(&self) -> Rotation3 {
        let m = &self.m;
        Rotation3 {
            m: [
                [m[0][0], m[1][0], m[2][0]],
                [m[0][1], m[1][1], m[2][1]],
                [m[0][2], m[1][2], m[2][2]],
            ],
        }
    }
}

impl Default for Rotation3 {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// Microphone layout of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArrayMode {
    /// Three microphones in a horizontal triangle.
    #[default]
    Triangle,
    /// Four microphones at the vertices of a tetrahedron.
    Tetrahedron,
}

impl ArrayMode {
    /// Number of channels for this layout.
    #[must_use]
    pub fn channels(&self) -> usize {
        match self {
            Self::Triangle => 3,
            Self::Tetrahedron => 4,
        }
    }
}

/// Immutable description of a node's microphones in its local frame.
///
/// Direction vectors are normalised at construction, so every `v_i` has
/// unit length for the lifetime of the value.
#[derive(Debug, Clone, PartialEq)]
pub struct MicArrayGeometry {
    vectors: Vec<Vec3>,
    positions: Vec<Vec3>,
}

impl MicArrayGeometry {
    /// Minimum number of microphones in an array.
    pub const MIN_MICROPHONES: usize = 3;

    /// Build a geometry from pointing vectors and local positions.
    ///
    /// # Errors
    ///
    /// Fails if fewer than three microphones are given, the two lists
    /// differ in length, or any vector is zero or non-finite.
    pub fn new(vectors: &[Vec3], positions: &[Vec3]) -> Result<Self, GeometryError> {
        if vectors.len() < Self::MIN_MICROPHONES {
            return Err(GeometryError::TooFewMicrophones {
                count: vectors.len(),
                min: Self::MIN_MICROPHONES,
            });
        }
        if vectors.len() != positions.len() {
            return Err(GeometryError::LengthMismatch {
                vectors: vectors.len(),
                positions: positions.len(),
            });
        }

        let mut unit = Vec::with_capacity(vectors.len());
        for (index, (v, p)) in vectors.iter().zip(positions).enumerate() {
            if !v.is_finite() || !p.is_finite() {
                return Err(GeometryError::NonFinite { index });
            }
            unit.push(v.normalized().ok_or(GeometryError::ZeroVector { index })?);
        }

        Ok(Self {
            vectors: unit,
            positions: positions.to_vec(),
        })
    }

    /// Build a geometry from vectors only, placing each microphone
    /// `radius` meters along its own pointing direction.
    ///
    /// # Errors
    ///
    /// Same as [`MicArrayGeometry::new`].
    pub fn from_vectors(vectors: &[Vec3], radius: f64) -> Result<Self, GeometryError> {
        let positions: Vec<Vec3> = vectors
            .iter()
            .map(|v| v.normalized().map_or(Vec3::ZERO, |u| u * radius))
            .collect();
        Self::new(vectors, &positions)
    }

    /// Three horizontal microphones 120 degrees apart, 10 cm from centre.
    #[must_use]
    pub fn triangle() -> Self {
        let vectors: Vec<Vec3> = (0..3)
            .map(|i| {
                let a = f64::from(i) * 2.0 * std::f64::consts::PI / 3.0;
                Vec3::new(a.cos(), a.sin(), 0.0)
            })
            .collect();
        Self::unit_layout(vectors, 0.1)
    }

    /// Four microphones at the vertices of a regular tetrahedron, one pointing up.
    #[must_use]
    pub fn tetrahedron() -> Self {
        let s = (8.0_f64 / 9.0).sqrt();
        let t = (2.0_f64 / 9.0).sqrt();
        let u = (2.0_f64 / 3.0).sqrt();
        let vectors = vec![
            Vec3::new(0.0, 0.0, 1.0),
            Vec3::new(s, 0.0, -1.0 / 3.0),
            Vec3::new(-t, u, -1.0 / 3.0),
            Vec3::new(-t, -u, -1.0 / 3.0),
        ];
        Self::unit_layout(vectors, 0.1)
    }

    /// Default layout for an array mode.
    #[must_use]
    pub fn for_mode(mode: ArrayMode) -> Self {
        match mode {
            ArrayMode::Triangle => Self::triangle(),
            ArrayMode::Tetrahedron => Self::tetrahedron(),
        }
    }

    fn unit_layout(vectors: Vec<Vec3>, radius: f64) -> Self {
        let positions = vectors.iter().map(|v| *v * radius).collect();
        Self { vectors, positions }
    }

    /// Unit pointing vectors, one per microphone.
    #[must_use]
    pub fn vectors(&self) -> &[Vec3] {
        &self.vectors
    }

    /// Local positions in meters, one per microphone.
    #[must_use]
    pub fn positions(&self) -> &[Vec3] {
        &self.positions
    }

    /// Number of microphones.
    #[must_use]
    pub fn channels(&self) -> usize {
        self.vectors.len()
    }
}
