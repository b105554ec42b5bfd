//! Pose normalization of a candidate mesh against a reference mesh.
//!
//! The candidate's bounding-box center is moved onto the reference's and the
//! candidate is scaled uniformly so both bounding-box diagonals match. Scaling
//! is never per-axis: that would hide exactly the shape distortion the
//! comparison has to detect.
//!
//! Rotation is opt-in. When enabled, both meshes' principal axes (PCA of the
//! area-weighted surface) are matched by decreasing extent, each axis pointing
//! towards the side its surface is skewed to. Axis correspondence is only
//! trusted when all three principal extents are clearly distinct; otherwise
//! rotation is skipped and [`AlignmentWarning::AmbiguousAxes`] is reported.

use nalgebra::{Matrix3, Point3, Rotation3, UnitQuaternion, Vector3};
use serde::Serialize;
use tracing::{debug, error, warn};

use crate::config::AlignParams;
use crate::error::{AlignmentError, AlignmentWarning};
use crate::geometry::{BoundingBox, Mesh};
use crate::transform::AlignmentTransform;

/// Bounding-box diagonals at or below this length (mesh units) have no usable scale.
pub const MIN_DIAGONAL: f64 = 1e-9;

/// A candidate mapped into the reference frame.
#[derive(Debug, Clone)]
pub struct AlignedMesh {
    pub transform: AlignmentTransform,
    pub mesh: Mesh,
    pub warnings: Vec<AlignmentWarning>,
}

/// Summary of an alignment, without the transformed geometry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlignmentSummary {
    pub transform: AlignmentTransform,
    pub warnings: Vec<AlignmentWarning>,
}

impl From<&AlignedMesh> for AlignmentSummary {
    fn from(aligned: &AlignedMesh) -> Self {
        Self {
            transform: aligned.transform,
            warnings: aligned.warnings.clone(),
        }
    }
}

/// Computes [`AlignedMesh`]es.
#[derive(Debug, Clone, Default)]
pub struct Aligner {
    params: AlignParams,
}

impl Aligner {
    pub fn new(params: AlignParams) -> Self {
        Self { params }
    }

    /// Map `candidate` onto `reference`'s frame.
    ///
    /// # Errors
    ///
    /// Returns [`AlignmentError::DegenerateReference`] if the reference has
    /// no spatial extent.
    pub fn align(&self, candidate: &Mesh, reference: &Mesh) -> Result<AlignedMesh, AlignmentError> {
        let ref_box = reference.bounding_box();
        check_reference(ref_box)?;

        let mut warnings = Vec::new();

        let rotation = if self.params.rotate {
            let rotation = self.principal_rotation(candidate, reference);
            if rotation.is_none() {
                warn!("principal axes are ambiguous, skipping rotation");
                warnings.push(AlignmentWarning::AmbiguousAxes);
            }
            rotation
        } else {
            None
        };

        let cand_box = match &rotation {
            Some(r) => BoundingBox::from_points(candidate.vertices().iter().map(|v| r * v.position)),
            None => *candidate.bounding_box(),
        };

        let cand_diagonal = cand_box.diagonal();
        let scale = if cand_diagonal > MIN_DIAGONAL {
            ref_box.diagonal() / cand_diagonal
        } else {
            warn!(diagonal = cand_diagonal, "candidate has no extent, not scaling");
            warnings.push(AlignmentWarning::DegenerateCandidate);
            1.0
        };

        let translation = ref_box.center().coords - cand_box.center().coords * scale;
        let transform = AlignmentTransform::new(scale, rotation, translation);
        debug!(scale, rotated = rotation.is_some(), "aligned candidate");

        Ok(AlignedMesh {
            transform,
            mesh: transform.apply(candidate),
            warnings,
        })
    }

    /// Rotation taking the candidate's principal axes onto the reference's,
    /// or `None` when either set of axes is ambiguous.
    fn principal_rotation(&self, candidate: &Mesh, reference: &Mesh) -> Option<UnitQuaternion<f64>> {
        let tolerance = self.params.ambiguity_tolerance;
        let cand = PrincipalFrame::of(candidate, tolerance)?;
        let refr = PrincipalFrame::of(reference, tolerance)?;

        let matrix = refr.axes * cand.axes.transpose();
        Some(UnitQuaternion::from_rotation_matrix(
            &Rotation3::from_matrix_unchecked(matrix),
        ))
    }
}

/// Fail loudly when the reference cannot define a scale.
///
/// # Errors
///
/// Returns [`AlignmentError::DegenerateReference`] for boxes whose diagonal
/// is at most [`MIN_DIAGONAL`].
pub fn check_reference(bounds: &BoundingBox) -> Result<(), AlignmentError> {
    let diagonal = bounds.diagonal();
    if diagonal > MIN_DIAGONAL {
        Ok(())
    } else {
        error!(diagonal, "reference mesh is degenerate; check the challenge's reference model");
        Err(AlignmentError::DegenerateReference { diagonal })
    }
}

/// Principal axes of a mesh surface, as the columns of a right-handed
/// orthonormal matrix ordered by decreasing extent.
///
/// Moments are integrated over the triangles with area weighting, so the
/// frame depends only on the surface and not on vertex sharing or how
/// often a corner is repeated in a triangle soup.
#[derive(Debug, Clone)]
struct PrincipalFrame {
    axes: Matrix3<f64>,
}

impl PrincipalFrame {
    fn of(mesh: &Mesh, tolerance: f64) -> Option<Self> {
        let origin = mesh.centroid();
        let moments = SurfaceMoments::of(mesh, &origin)?;
        let eigen = moments.covariance.symmetric_eigen();

        let mut axes: Vec<(Vector3<f64>, f64, f64)> = (0..3)
            .map(|i| {
                let axis = eigen.eigenvectors.column(i).into_owned();
                let extent = extent_along(mesh, &axis);
                let skew = moments.third_moment(mesh, &origin, &axis);
                let axis = if skew < 0.0 { -axis } else { axis };
                (axis, extent, eigen.eigenvalues[i])
            })
            .collect();
        axes.sort_by(|a, b| b.1.total_cmp(&a.1));

        let extents = [axes[0].1, axes[1].1, axes[2].1];
        let mut variances = [axes[0].2, axes[1].2, axes[2].2];
        variances.sort_by(|a, b| b.total_cmp(a));
        if near_equal_pair(&extents, tolerance) || near_equal_pair(&variances, tolerance) {
            return None;
        }

        let mut matrix = Matrix3::from_columns(&[axes[0].0, axes[1].0, axes[2].0]);
        if matrix.determinant() < 0.0 {
            matrix.set_column(2, &(-axes[2].0));
        }
        Some(Self { axes: matrix })
    }
}

/// First and second area moments of a surface, relative to some origin.
#[derive(Debug, Clone)]
struct SurfaceMoments {
    mean: Vector3<f64>,
    covariance: Matrix3<f64>,
}

impl SurfaceMoments {
    /// `None` for meshes without surface area.
    fn of(mesh: &Mesh, origin: &Point3<f64>) -> Option<Self> {
        let mut area = 0.0;
        let mut first = Vector3::zeros();
        let mut second = Matrix3::zeros();

        for corners in mesh.faces() {
            let [a, b, c] = corners.map(|p| p - *origin);
            let w = triangle_area(&a, &b, &c);
            let s = a + b + c;
            area += w;
            first += s * (w / 3.0);
            // Mean of x x^T over a triangle is (a a^T + b b^T + c c^T + s s^T) / 12.
            second += (a * a.transpose() + b * b.transpose() + c * c.transpose() + s * s.transpose())
                * (w / 12.0);
        }

        if area <= 0.0 {
            return None;
        }
        let mean = first / area;
        Some(Self {
            mean,
            covariance: second / area - mean * mean.transpose(),
        })
    }

    /// Area-weighted third central moment of the surface along `axis`.
    fn third_moment(&self, mesh: &Mesh, origin: &Point3<f64>, axis: &Vector3<f64>) -> f64 {
        mesh.faces()
            .map(|corners| {
                let [a, b, c] = corners.map(|p| p - *origin);
                let w = triangle_area(&a, &b, &c);
                let [p, q, r] = [a, b, c].map(|v| (v - self.mean).dot(axis));
                // Mean of t^3 over a triangle with corner values p, q, r.
                let h3 = p * p * p
                    + q * q * q
                    + r * r * r
                    + p * p * (q + r)
                    + q * q * (p + r)
                    + r * r * (p + q)
                    + p * q * r;
                w * h3 / 10.0
            })
            .sum()
    }
}

fn triangle_area(a: &Vector3<f64>, b: &Vector3<f64>, c: &Vector3<f64>) -> f64 {
    (b - a).cross(&(c - a)).norm() / 2.0
}

/// Width of the vertex cloud measured along `axis`.
fn extent_along(mesh: &Mesh, axis: &Vector3<f64>) -> f64 {
    let (lo, hi) = mesh
        .vertices()
        .iter()
        .map(|v| v.position.coords.dot(axis))
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), t| {
            (lo.min(t), hi.max(t))
        });
    hi - lo
}

/// Whether two adjacent values of a descending triple are within `tolerance`
/// of each other, relative to the larger one.
fn near_equal_pair(sorted: &[f64; 3], tolerance: f64) -> bool {
    if sorted[0] <= 0.0 {
        return true;
    }
    sorted
        .windows(2)
        .any(|w| w[0] > 0.0 && (w[0] - w[1]) <= tolerance * w[0])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{MeshBuilder, Vertex};

    /// The same surface with every triangle owning its own three vertices,
    /// the way binary STL decodes.
    fn soup(mesh: &Mesh) -> Mesh {
        let mut builder = MeshBuilder::with_capacity(mesh.triangle_count());
        for corners in mesh.faces() {
            builder.push_facet(corners, None).unwrap();
        }
        builder.build()
    }

    /// Right-triangle prism with legs 40 and 25, 8 thick. No symmetry maps
    /// its in-plane principal axes onto their negatives.
    fn wedge() -> Mesh {
        let vertices = vec![
            Vertex::new(0.0, 0.0, -4.0),
            Vertex::new(40.0, 0.0, -4.0),
            Vertex::new(0.0, 25.0, -4.0),
            Vertex::new(0.0, 0.0, 4.0),
            Vertex::new(40.0, 0.0, 4.0),
            Vertex::new(0.0, 25.0, 4.0),
        ];
        let faces = [
            [0, 2, 1],
            [3, 4, 5],
            [0, 1, 4],
            [0, 4, 3],
            [0, 3, 5],
            [0, 5, 2],
            [1, 2, 5],
            [1, 5, 4],
        ];
        Mesh::from_indexed(vertices, &faces).unwrap()
    }

    /// Largest distance from an aligned vertex to its nearest reference vertex.
    fn vertex_mismatch(aligned: &Mesh, reference: &Mesh) -> f64 {
        aligned
            .vertices()
            .iter()
            .map(|v| {
                reference
                    .vertices()
                    .iter()
                    .map(|r| (v.position - r.position).norm())
                    .fold(f64::INFINITY, f64::min)
            })
            .fold(0.0, f64::max)
    }

    fn aligned_extents(aligned: &AlignedMesh) -> Vector3<f64> {
        aligned.mesh.bounding_box().extents()
    }

    #[test]
    fn test_translation_and_scale() {
        let reference = Mesh::cube(10.0);
        let candidate = Mesh::cube(4.0).map_positions(|p| p + Vector3::new(50.0, -3.0, 8.0));

        let aligned = Aligner::default().align(&candidate, &reference).unwrap();

        assert!((aligned.transform.scale - 2.5).abs() < 1e-12);
        assert!(aligned.transform.rotation.is_none());
        assert!(aligned.warnings.is_empty());
        let bb = aligned.mesh.bounding_box();
        assert!((bb.min - reference.bounding_box().min).norm() < 1e-9);
        assert!((bb.max - reference.bounding_box().max).norm() < 1e-9);
    }

    #[test]
    fn test_scale_is_uniform() {
        let reference = Mesh::cube(10.0);
        let candidate = Mesh::cuboid(10.0, 20.0, 10.0);

        let aligned = Aligner::default().align(&candidate, &reference).unwrap();

        let e = aligned_extents(&aligned);
        // Proportions survive alignment.
        assert!((e.y / e.x - 2.0).abs() < 1e-9);
        assert!((e.norm() - reference.bounding_box().diagonal()).abs() < 1e-9);
    }

    #[test]
    fn test_reference_untouched() {
        let reference = Mesh::cube(10.0);
        let before = *reference.bounding_box();
        let _ = Aligner::default()
            .align(&Mesh::cube(1.0), &reference)
            .unwrap();
        assert_eq!(*reference.bounding_box(), before);
    }

    #[test]
    fn test_degenerate_reference() {
        let reference = Mesh::empty();
        let err = Aligner::default()
            .align(&Mesh::cube(1.0), &reference)
            .unwrap_err();
        assert_eq!(err, AlignmentError::DegenerateReference { diagonal: 0.0 });
    }

    #[test]
    fn test_degenerate_candidate() {
        let aligned = Aligner::default()
            .align(&Mesh::empty(), &Mesh::cube(10.0))
            .unwrap();
        assert_eq!(aligned.warnings, vec![AlignmentWarning::DegenerateCandidate]);
        assert!((aligned.transform.scale - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_rotation_recovers_orientation() {
        let reference = Mesh::cuboid(30.0, 20.0, 10.0);
        let tilt = UnitQuaternion::from_euler_angles(0.4, -0.7, 1.2);
        let candidate = reference.map_positions(|p| tilt * p + Vector3::new(5.0, 5.0, 5.0));

        let aligner = Aligner::new(AlignParams::default().rotate(true));
        let aligned = aligner.align(&candidate, &reference).unwrap();

        assert!(aligned.warnings.is_empty());
        assert!(aligned.transform.rotation.is_some());
        let e = aligned_extents(&aligned);
        assert!((e - Vector3::new(30.0, 20.0, 10.0)).norm() < 1e-6);
    }

    #[test]
    fn test_soup_candidate_against_indexed_reference() {
        let reference = Mesh::cuboid(30.0, 20.0, 10.0);
        let tilt = UnitQuaternion::from_euler_angles(0.3, 0.9, -0.5);
        let candidate = soup(&reference.map_positions(|p| tilt * p));
        assert_eq!(candidate.vertex_count(), 36);

        let aligner = Aligner::new(AlignParams::default().rotate(true));
        let aligned = aligner.align(&candidate, &reference).unwrap();

        assert!(aligned.warnings.is_empty());
        let e = aligned_extents(&aligned);
        assert!((e - Vector3::new(30.0, 20.0, 10.0)).norm() < 1e-6);
        assert!(vertex_mismatch(&aligned.mesh, &reference) < 1e-6);
    }

    #[test]
    fn test_frame_ignores_vertex_sharing() {
        let indexed = PrincipalFrame::of(&wedge(), 0.02).unwrap();
        let soup = PrincipalFrame::of(&soup(&wedge()), 0.02).unwrap();
        assert!((indexed.axes - soup.axes).amax() < 1e-9);
    }

    #[test]
    fn test_rotation_orients_asymmetric_part() {
        let reference = wedge();
        let aligner = Aligner::new(AlignParams::default().rotate(true));

        for tilt in [
            UnitQuaternion::from_euler_angles(0.3, 0.9, -0.5),
            UnitQuaternion::from_euler_angles(2.5, -1.0, 0.7),
            // Half turn: extents match either way, only the skew tells them apart.
            UnitQuaternion::from_euler_angles(0.0, 0.0, std::f64::consts::PI),
        ] {
            let candidate = soup(&reference.map_positions(|p| tilt * p + Vector3::new(-7.0, 3.0, 12.0)));
            let aligned = aligner.align(&candidate, &reference).unwrap();

            assert!(aligned.warnings.is_empty());
            assert!((aligned.transform.scale - 1.0).abs() < 1e-9);
            assert!(
                vertex_mismatch(&aligned.mesh, &reference) < 1e-6,
                "tilt {tilt:?} left vertices off the reference"
            );
        }
    }

    #[test]
    fn test_surface_moments_of_flat_square() {
        let square = Mesh::from_indexed(
            vec![
                Vertex::new(-1.0, -1.0, 0.0),
                Vertex::new(1.0, -1.0, 0.0),
                Vertex::new(1.0, 1.0, 0.0),
                Vertex::new(-1.0, 1.0, 0.0),
            ],
            &[[0, 1, 2], [0, 2, 3]],
        )
        .unwrap();
        let moments = SurfaceMoments::of(&square, &Point3::origin()).unwrap();

        assert!(moments.mean.norm() < 1e-12);
        // Uniform on [-1, 1] has variance 1/3.
        assert!((moments.covariance[(0, 0)] - 1.0 / 3.0).abs() < 1e-12);
        assert!((moments.covariance[(1, 1)] - 1.0 / 3.0).abs() < 1e-12);
        assert!(moments.covariance[(2, 2)].abs() < 1e-12);
        assert!(moments.covariance[(0, 1)].abs() < 1e-12);
        assert!(moments.third_moment(&square, &Point3::origin(), &Vector3::x()).abs() < 1e-12);
    }

    #[test]
    fn test_no_frame_without_area() {
        assert!(SurfaceMoments::of(&Mesh::empty(), &Point3::origin()).is_none());
        assert!(PrincipalFrame::of(&Mesh::empty(), 0.02).is_none());
    }

    #[test]
    fn test_rotation_skipped_for_ambiguous_axes() {
        let reference = Mesh::cube(10.0);
        let candidate = Mesh::cube(5.0);

        let aligner = Aligner::new(AlignParams::default().rotate(true));
        let aligned = aligner.align(&candidate, &reference).unwrap();

        assert_eq!(aligned.warnings, vec![AlignmentWarning::AmbiguousAxes]);
        assert!(aligned.transform.rotation.is_none());
        assert!((aligned.transform.scale - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_near_equal_pair() {
        assert!(near_equal_pair(&[10.0, 9.99, 1.0], 0.02));
        assert!(near_equal_pair(&[10.0, 5.0, 4.95], 0.02));
        assert!(!near_equal_pair(&[30.0, 20.0, 10.0], 0.02));
        assert!(near_equal_pair(&[0.0, 0.0, 0.0], 0.02));
    }
}
