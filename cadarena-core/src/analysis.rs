//! Scalar geometric descriptors of a mesh.
//!
//! Volume uses the signed-tetrahedron method: every triangle spans a
//! tetrahedron with the origin, and the signed volumes sum to the enclosed
//! volume of any closed, consistently oriented mesh. The absolute value is
//! reported because submissions may be wound inside-out. Orientation errors
//! are not repaired; a volume that is implausibly small for its bounding box
//! is reported as a [`DataQualityWarning`] instead.

use serde::Serialize;
use tracing::{debug, warn};

use crate::config::AnalysisParams;
use crate::error::DataQualityWarning;
use crate::geometry::{BoundingBox, Mesh};

/// Descriptors of one mesh.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisResult {
    pub volume: f64,
    pub surface_area: f64,
    pub bounding_box: BoundingBox,
    pub triangle_count: usize,
    pub degenerate_triangles: usize,
    pub warnings: Vec<DataQualityWarning>,
}

impl AnalysisResult {
    /// Fraction of the bounding box filled by the solid. `None` for flat boxes.
    pub fn fill_ratio(&self) -> Option<f64> {
        let bbox_volume = self.bounding_box.volume();
        (bbox_volume > 0.0).then(|| self.volume / bbox_volume)
    }
}

/// Computes [`AnalysisResult`]s.
#[derive(Debug, Clone, Default)]
pub struct GeometryAnalyzer {
    params: AnalysisParams,
}

impl GeometryAnalyzer {
    pub fn new(params: AnalysisParams) -> Self {
        Self { params }
    }

    pub fn analyze(&self, mesh: &Mesh) -> AnalysisResult {
        let mut signed_volume = 0.0;
        let mut surface_area = 0.0;
        let mut degenerate_triangles = 0;

        for [v0, v1, v2] in mesh.faces() {
            let e1 = v1 - v0;
            let e2 = v2 - v0;
            let twice_area = e1.cross(&e2).norm();
            surface_area += twice_area / 2.0;

            let longest = e1
                .norm_squared()
                .max(e2.norm_squared())
                .max((v2 - v1).norm_squared());
            if twice_area <= self.params.degenerate_epsilon * longest {
                degenerate_triangles += 1;
            }

            signed_volume += v0.coords.dot(&v1.coords.cross(&v2.coords)) / 6.0;
        }

        let mut result = AnalysisResult {
            volume: signed_volume.abs(),
            surface_area,
            bounding_box: *mesh.bounding_box(),
            triangle_count: mesh.triangle_count(),
            degenerate_triangles,
            warnings: Vec::new(),
        };
        result.warnings = self.quality_warnings(&result);

        debug!(
            volume = result.volume,
            surface_area = result.surface_area,
            triangles = result.triangle_count,
            "analyzed mesh"
        );
        result
    }

    fn quality_warnings(&self, result: &AnalysisResult) -> Vec<DataQualityWarning> {
        let mut warnings = Vec::new();
        if result.triangle_count == 0 {
            return warnings;
        }

        if result.degenerate_triangles > 0 {
            warn!(count = result.degenerate_triangles, "mesh has degenerate triangles");
            warnings.push(DataQualityWarning::DegenerateTriangles {
                count: result.degenerate_triangles,
            });
        }

        match result.fill_ratio() {
            Some(ratio) if ratio < self.params.min_fill_ratio => {
                warn!(
                    ratio,
                    "volume is small relative to bounding box; orientation may be inconsistent"
                );
                warnings.push(DataQualityWarning::SuspiciousVolume { ratio });
            }
            Some(_) => {}
            None => {
                warn!("mesh bounding box encloses no volume");
                warnings.push(DataQualityWarning::FlatGeometry);
            }
        }

        warnings
    }
}

/// Total surface area of a mesh.
pub fn surface_area(mesh: &Mesh) -> f64 {
    mesh.faces()
        .map(|[v0, v1, v2]| (v1 - v0).cross(&(v2 - v0)).norm() / 2.0)
        .sum()
}

/// Absolute enclosed volume of a mesh.
pub fn volume(mesh: &Mesh) -> f64 {
    mesh.faces()
        .map(|[v0, v1, v2]| v0.coords.dot(&v1.coords.cross(&v2.coords)) / 6.0)
        .sum::<f64>()
        .abs()
}
