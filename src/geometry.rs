use nalgebra::{Point3, Vector3};
use serde::{Deserialize, Serialize};

/// 3D point type
pub type Point3D = Point3<f64>;

/// 3D vector type
pub type Vector3D = Vector3<f64>;

/// Physical size of one voxel along x (width), y (height) and z (depth).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Spacing {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Spacing {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// All three components finite and strictly positive
    pub fn is_valid(&self) -> bool {
        [self.x, self.y, self.z].iter().all(|s| s.is_finite() && *s > 0.0)
    }

    /// Volume of a single voxel in cubic physical units
    pub fn voxel_volume(&self) -> f64 {
        self.x * self.y * self.z
    }

    pub fn to_array(&self) -> [f64; 3] {
        [self.x, self.y, self.z]
    }
}

impl Default for Spacing {
    fn default() -> Self {
        Self::new(1.0, 1.0, 1.0)
    }
}

/// Triangle defined by three vertices
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Triangle {
    pub v0: Point3D,
    pub v1: Point3D,
    pub v2: Point3D,
}

impl Triangle {
    pub fn new(v0: Point3D, v1: Point3D, v2: Point3D) -> Self {
        Self { v0, v1, v2 }
    }

    /// Unnormalized normal (edge1 x edge2); its length is twice the area
    pub fn cross(&self) -> Vector3D {
        (self.v1 - self.v0).cross(&(self.v2 - self.v0))
    }

    /// Unit normal, or `None` for collapsed triangles
    pub fn unit_normal(&self) -> Option<Vector3D> {
        let cross = self.cross();
        let norm = cross.norm();

        // Zero area or nearly colinear
        if norm < 1e-12 || !norm.is_finite() {
            return None;
        }

        Some(cross / norm)
    }

    /// Calculate the area of the triangle
    pub fn area(&self) -> f64 {
        self.cross().norm() / 2.0
    }
}
