//! Error types for mesh decoding and submission evaluation.

use serde::Serialize;
use thiserror::Error;

use crate::pipeline::Stage;

/// Result type alias for evaluation operations.
pub type EvaluationResult<T> = Result<T, EvaluationError>;

/// Problems with the submitted bytes themselves.
///
/// These are always caused by the uploaded file and are recovered by
/// rejecting the submission with the message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FormatError {
    /// The buffer ends before the data its header promises.
    #[error("truncated STL file: expected at least {expected} bytes, got {actual}")]
    TruncatedFile {
        /// Minimum byte length implied by the header.
        expected: u64,
        /// Actual buffer length.
        actual: u64,
    },

    /// The text format deviates from the facet grammar.
    #[error("malformed STL at line {line}: {message}")]
    MalformedSyntax {
        /// 1-based line number of the offending line.
        line: usize,
        /// What was expected or found.
        message: String,
    },

    /// A vertex coordinate is NaN or infinite.
    #[error("non-finite vertex coordinate in triangle {triangle}")]
    NonFiniteCoordinate {
        /// 0-based triangle index.
        triangle: usize,
    },

    /// The declared triangle count exceeds the configured limit.
    #[error("STL declares {count} triangles, limit is {limit}")]
    TooManyTriangles {
        /// Declared (or parsed) triangle count.
        count: u64,
        /// Configured maximum.
        limit: u64,
    },

    /// A triangle refers to a vertex that does not exist.
    #[error("triangle {triangle} references vertex {index}, mesh has {vertex_count} vertices")]
    InvalidIndex {
        /// 0-based triangle index.
        triangle: usize,
        /// Offending vertex index.
        index: u32,
        /// Number of vertices in the mesh.
        vertex_count: usize,
    },
}

impl FormatError {
    /// Create a malformed syntax error for the given line.
    #[must_use]
    pub fn malformed(line: usize, message: impl Into<String>) -> Self {
        Self::MalformedSyntax {
            line,
            message: message.into(),
        }
    }
}

/// Errors produced by the mesh decoder.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// The input is not a valid STL file.
    #[error(transparent)]
    Format(#[from] FormatError),

    /// The decoder's deadline expired before the input was consumed.
    #[error("decoding exceeded its time limit")]
    TimedOut,
}

/// Errors produced while aligning a candidate to a reference.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AlignmentError {
    /// The reference mesh has no spatial extent, so there is nothing to scale to.
    #[error("reference mesh is degenerate (bounding box diagonal {diagonal})")]
    DegenerateReference {
        /// Diagonal length of the reference bounding box.
        diagonal: f64,
    },
}

/// Invalid configuration values.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    /// A parameter lies outside its accepted range.
    #[error("invalid value for {name}: {value} ({reason})")]
    OutOfRange {
        /// Parameter name.
        name: &'static str,
        /// Supplied value.
        value: f64,
        /// Accepted range.
        reason: &'static str,
    },
}

/// Errors that abort the evaluation of a submission.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvaluationError {
    /// The submitted file could not be decoded.
    #[error("invalid submission: {0}")]
    Format(#[from] FormatError),

    /// The reference could not be used for alignment.
    #[error("reference configuration fault: {0}")]
    Alignment(#[from] AlignmentError),

    /// The operation-level deadline expired.
    #[error("evaluation timed out during {stage}")]
    Timeout {
        /// Stage that was running or about to run.
        stage: Stage,
    },

    /// The caller cancelled the evaluation.
    #[error("evaluation cancelled before {stage}")]
    Cancelled {
        /// Stage that was about to run.
        stage: Stage,
    },

    /// The caller passed unusable timing values.
    #[error("invalid timing: {0}")]
    InvalidTiming(String),

    /// The evaluation configuration is out of range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl EvaluationError {
    /// Create an invalid timing error.
    #[must_use]
    pub fn invalid_timing(details: impl Into<String>) -> Self {
        Self::InvalidTiming(details.into())
    }

    /// Whether the failure was caused by the submitted file.
    #[must_use]
    pub const fn is_user_error(&self) -> bool {
        matches!(self, Self::Format(_) | Self::Timeout { .. })
    }

    /// Whether the failure points at bad reference data or configuration.
    ///
    /// These should trigger alerting rather than being shown to the user.
    #[must_use]
    pub const fn is_configuration_fault(&self) -> bool {
        matches!(self, Self::Alignment(_) | Self::InvalidConfig(_))
    }

    /// Whether the calling code passed bad arguments.
    #[must_use]
    pub const fn is_caller_error(&self) -> bool {
        matches!(self, Self::InvalidTiming(_))
    }
}

impl From<ConfigError> for EvaluationError {
    fn from(err: ConfigError) -> Self {
        Self::InvalidConfig(err.to_string())
    }
}

impl From<DecodeError> for EvaluationError {
    fn from(err: DecodeError) -> Self {
        match err {
            DecodeError::Format(e) => Self::Format(e),
            DecodeError::TimedOut => Self::Timeout {
                stage: Stage::Decode,
            },
        }
    }
}

/// Non-fatal findings about the analysed geometry.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DataQualityWarning {
    /// Enclosed volume is tiny relative to the bounding box, which usually
    /// means inconsistent triangle orientation or an open surface.
    SuspiciousVolume {
        /// `volume / bounding_box_volume`.
        ratio: f64,
    },
    /// The mesh has triangles but its bounding box encloses no volume.
    FlatGeometry,
    /// Some triangles have (near) zero area.
    DegenerateTriangles {
        /// Number of degenerate triangles.
        count: usize,
    },
}

/// Non-fatal findings from alignment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AlignmentWarning {
    /// Two principal extents are near-equal, so rotation was skipped.
    AmbiguousAxes,
    /// The candidate has no extent; it was centred but not scaled.
    DegenerateCandidate,
}

/// A warning attached to an evaluation report.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "source", content = "warning", rename_all = "snake_case")]
pub enum EvaluationWarning {
    /// Finding about the candidate mesh.
    Candidate(DataQualityWarning),
    /// Finding about the reference mesh.
    Reference(DataQualityWarning),
    /// Finding from alignment.
    Alignment(AlignmentWarning),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = FormatError::TruncatedFile {
            expected: 134,
            actual: 90,
        };
        assert!(format!("{err}").contains("134"));

        let err = FormatError::malformed(7, "expected 'endloop'");
        assert!(format!("{err}").contains("line 7"));

        let err = EvaluationError::Timeout {
            stage: Stage::Decode,
        };
        assert!(format!("{err}").contains("decode"));
    }

    #[test]
    fn test_error_classification() {
        let err = EvaluationError::from(FormatError::NonFiniteCoordinate { triangle: 0 });
        assert!(err.is_user_error());
        assert!(!err.is_configuration_fault());

        let err = EvaluationError::from(AlignmentError::DegenerateReference { diagonal: 0.0 });
        assert!(err.is_configuration_fault());
        assert!(!err.is_user_error());

        let err = EvaluationError::from(ConfigError::OutOfRange {
            name: "analysis.min_fill_ratio",
            value: 4.0,
            reason: "must be within [0, 1]",
        });
        assert!(matches!(err, EvaluationError::InvalidConfig(_)));
        assert!(err.is_configuration_fault());
        assert!(!err.is_caller_error());

        let err = EvaluationError::invalid_timing("time budget must be positive, got 0");
        assert!(err.is_caller_error());
        assert!(!err.is_configuration_fault());
        assert!(!err.is_user_error());
    }

    #[test]
    fn test_decode_error_mapping() {
        let err = EvaluationError::from(DecodeError::TimedOut);
        assert_eq!(
            err,
            EvaluationError::Timeout {
                stage: Stage::Decode
            }
        );
    }
}
