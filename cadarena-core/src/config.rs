//! Tunable thresholds for decoding, analysis and alignment.
//!
//! The defaults are the values scores are calibrated against. Hosts may load
//! an [`EvaluationConfig`] from JSON; missing fields take their defaults.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::geometry::MAX_TRIANGLES;

/// Limits applied while decoding submitted bytes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecodeParams {
    /// Maximum number of triangles accepted from one file.
    pub max_triangles: u64,
}

impl Default for DecodeParams {
    fn default() -> Self {
        Self {
            max_triangles: 10_000_000,
        }
    }
}

impl DecodeParams {
    /// Set the maximum triangle count.
    #[must_use]
    pub const fn max_triangles(mut self, max: u64) -> Self {
        self.max_triangles = max;
        self
    }
}

/// Thresholds for geometric analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisParams {
    /// A triangle is degenerate when `|e1 x e2| <= epsilon * longest_edge^2`.
    pub degenerate_epsilon: f64,

    /// Volumes below this fraction of the bounding-box volume are flagged.
    pub min_fill_ratio: f64,
}

impl Default for AnalysisParams {
    fn default() -> Self {
        Self {
            degenerate_epsilon: 1e-10,
            min_fill_ratio: 0.01,
        }
    }
}

impl AnalysisParams {
    /// Set the degenerate-triangle epsilon.
    #[must_use]
    pub const fn degenerate_epsilon(mut self, epsilon: f64) -> Self {
        self.degenerate_epsilon = epsilon;
        self
    }

    /// Set the minimum volume fill ratio.
    #[must_use]
    pub const fn min_fill_ratio(mut self, ratio: f64) -> Self {
        self.min_fill_ratio = ratio;
        self
    }
}

/// Alignment options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlignParams {
    /// Rotate the candidate onto the reference's principal axes.
    pub rotate: bool,

    /// Relative difference under which two principal extents count as equal.
    pub ambiguity_tolerance: f64,
}

impl Default for AlignParams {
    fn default() -> Self {
        Self {
            rotate: false,
            ambiguity_tolerance: 0.02,
        }
    }
}

impl AlignParams {
    /// Enable or disable principal-axis rotation.
    #[must_use]
    pub const fn rotate(mut self, rotate: bool) -> Self {
        self.rotate = rotate;
        self
    }

    /// Set the axis ambiguity tolerance.
    #[must_use]
    pub const fn ambiguity_tolerance(mut self, tolerance: f64) -> Self {
        self.ambiguity_tolerance = tolerance;
        self
    }
}

/// Configuration for a full evaluation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluationConfig {
    pub decode: DecodeParams,
    pub analysis: AnalysisParams,
    pub align: AlignParams,
}

impl EvaluationConfig {
    /// Replace the decode parameters.
    #[must_use]
    pub fn with_decode(mut self, decode: DecodeParams) -> Self {
        self.decode = decode;
        self
    }

    /// Replace the analysis parameters.
    #[must_use]
    pub fn with_analysis(mut self, analysis: AnalysisParams) -> Self {
        self.analysis = analysis;
        self
    }

    /// Replace the alignment parameters.
    #[must_use]
    pub fn with_align(mut self, align: AlignParams) -> Self {
        self.align = align;
        self
    }

    /// Check that every threshold lies in its accepted range.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::OutOfRange`] naming the first bad parameter.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_range(
            "analysis.degenerate_epsilon",
            self.analysis.degenerate_epsilon,
            0.0,
            1.0,
        )?;
        check_range(
            "analysis.min_fill_ratio",
            self.analysis.min_fill_ratio,
            0.0,
            1.0,
        )?;
        check_range(
            "align.ambiguity_tolerance",
            self.align.ambiguity_tolerance,
            0.0,
            1.0,
        )?;
        if self.decode.max_triangles == 0 || self.decode.max_triangles > MAX_TRIANGLES {
            return Err(ConfigError::OutOfRange {
                name: "decode.max_triangles",
                value: self.decode.max_triangles as f64,
                reason: "must be between 1 and 1431655765",
            });
        }
        Ok(())
    }
}

fn check_range(name: &'static str, value: f64, lo: f64, hi: f64) -> Result<(), ConfigError> {
    if value.is_finite() && (lo..=hi).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange {
            name,
            value,
            reason: "must be within [0, 1]",
        })
    }
}
