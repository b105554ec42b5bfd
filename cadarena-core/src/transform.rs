//! Similarity transform mapping a candidate frame onto a reference frame
use nalgebra::{Matrix4, Point3, UnitQuaternion, Vector3};
use serde::Serialize;

use crate::geometry::Mesh;

/// Uniform scale, optional rotation and translation, applied in that order.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AlignmentTransform {
    pub scale: f64,
    pub rotation: Option<UnitQuaternion<f64>>,
    pub translation: Vector3<f64>,
}

impl AlignmentTransform {
    pub fn identity() -> Self {
        Self {
            scale: 1.0,
            rotation: None,
            translation: Vector3::zeros(),
        }
    }

    pub fn new(scale: f64, rotation: Option<UnitQuaternion<f64>>, translation: Vector3<f64>) -> Self {
        Self {
            scale,
            rotation,
            translation,
        }
    }

    /// Map a point: scale, then rotate, then translate.
    pub fn transform_point(&self, point: &Point3<f64>) -> Point3<f64> {
        let scaled = point.coords * self.scale;
        let rotated = match &self.rotation {
            Some(r) => r * scaled,
            None => scaled,
        };
        Point3::from(rotated + self.translation)
    }

    /// A new mesh with every vertex transformed. The input is untouched.
    pub fn apply(&self, mesh: &Mesh) -> Mesh {
        mesh.map_positions(|p| self.transform_point(p))
    }

    /// Homogeneous matrix equivalent to [`transform_point`](Self::transform_point).
    pub fn to_matrix(&self) -> Matrix4<f64> {
        let rotation = self
            .rotation
            .map_or_else(Matrix4::identity, |r| r.to_homogeneous());
        translation_matrix(&self.translation) * rotation * scale_matrix(self.scale)
    }
}

impl Default for AlignmentTransform {
    fn default() -> Self {
        Self::identity()
    }
}

/// Create a translation matrix
pub fn translation_matrix(t: &Vector3<f64>) -> Matrix4<f64> {
    Matrix4::new_translation(t)
}

/// Create a uniform scale matrix
pub fn scale_matrix(s: f64) -> Matrix4<f64> {
    Matrix4::new_scaling(s)
}
