//! Deviation metrics between an aligned candidate and its reference.

use serde::Serialize;

use crate::analysis::AnalysisResult;

/// Similarity of a candidate to a reference, both metrics in `[0, 100]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ComparisonResult {
    /// Agreement of bounding-box extents.
    pub dimensional_accuracy: f64,
    /// Agreement of volume and surface area.
    pub geometry_match: f64,
    /// Relative error of each extent (X, Y, Z).
    pub extent_errors: [f64; 3],
    pub volume_error: f64,
    pub surface_area_error: f64,
}

/// Compares analysed meshes. Both inputs must already be in the same frame.
#[derive(Debug, Clone, Copy, Default)]
pub struct Comparator;

impl Comparator {
    pub fn new() -> Self {
        Self
    }

    pub fn compare(&self, candidate: &AnalysisResult, reference: &AnalysisResult) -> ComparisonResult {
        let cand_extents = candidate.bounding_box.extents();
        let ref_extents = reference.bounding_box.extents();
        let extent_errors = [0, 1, 2].map(|i| relative_error(cand_extents[i], ref_extents[i]));

        let volume_error = relative_error(candidate.volume, reference.volume);
        let surface_area_error = relative_error(candidate.surface_area, reference.surface_area);

        ComparisonResult {
            dimensional_accuracy: percent_match(&extent_errors),
            geometry_match: percent_match(&[volume_error, surface_area_error]),
            extent_errors,
            volume_error,
            surface_area_error,
        }
    }
}

/// `|c - r| / r`. A zero reference gives 0 if the candidate is zero too, else 1.
pub fn relative_error(candidate: f64, reference: f64) -> f64 {
    if reference == 0.0 {
        if candidate == 0.0 {
            0.0
        } else {
            1.0
        }
    } else {
        (candidate - reference).abs() / reference.abs()
    }
}

/// `100 * (1 - mean(errors))`, clamped to `[0, 100]`.
fn percent_match(errors: &[f64]) -> f64 {
    let mean = errors.iter().sum::<f64>() / errors.len() as f64;
    (100.0 * (1.0 - mean)).clamp(0.0, 100.0)
}
