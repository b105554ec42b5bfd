//! CAD Arena core library - submission evaluation
//!
//! Decodes an uploaded STL model, measures it, aligns it to a challenge's
//! reference model, and turns the geometric agreement plus the time taken
//! into a score ranked against earlier submissions.
//!
//! All of it is synchronous and stateless apart from [`ReferenceModel`],
//! which caches its own analysis and is safe to share across threads.

pub mod align;
pub mod analysis;
pub mod compare;
pub mod config;
pub mod error;
pub mod geometry;
pub mod pipeline;
pub mod score;
pub mod stl;
pub mod transform;

// Re-export commonly used types
pub use align::{AlignedMesh, Aligner, AlignmentSummary};
pub use analysis::{AnalysisResult, GeometryAnalyzer};
pub use compare::{ComparisonResult, Comparator};
pub use config::{AlignParams, AnalysisParams, DecodeParams, EvaluationConfig};
pub use error::{
    AlignmentError, AlignmentWarning, ConfigError, DataQualityWarning, DecodeError,
    EvaluationError, EvaluationResult, EvaluationWarning, FormatError,
};
pub use geometry::{BoundingBox, Mesh, MeshBuilder, Triangle, Vertex, MAX_TRIANGLES};
pub use pipeline::{
    evaluate, evaluate_detailed, CancellationToken, Deadline, Evaluation, EvaluationContext,
    EvaluationReport, ReferenceModel, Stage, TimeComparison,
};
pub use score::{
    HistoricalSubmission, PerformanceTier, PopulationStats, ScoreBreakdown, ScoreGrade, Scorer,
};
pub use stl::{MeshDecoder, StlFormat};
pub use transform::AlignmentTransform;
