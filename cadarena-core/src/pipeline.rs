//! The evaluation entry point.
//!
//! One call evaluates one submission through five stages: decode, analyze,
//! align, compare, score. The pipeline owns its inputs and outputs; the only
//! shared object is the read-only [`ReferenceModel`], which can be handed to
//! any number of concurrent evaluations behind an `Arc`.
//!
//! Cancellation is cooperative and checked between stages. The deadline is
//! checked between stages and, because input size is untrusted until
//! decoded, periodically inside the decoder.

use std::borrow::Cow;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::align::{check_reference, AlignmentSummary, Aligner};
use crate::analysis::{AnalysisResult, GeometryAnalyzer};
use crate::compare::{ComparisonResult, Comparator};
use crate::config::{AnalysisParams, EvaluationConfig};
use crate::error::{EvaluationError, EvaluationResult, EvaluationWarning};
use crate::geometry::Mesh;
use crate::score::{validate_timing, PerformanceTier, PopulationStats, ScoreBreakdown, ScoreGrade, Scorer};
use crate::stl::MeshDecoder;

/// Pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Decode,
    Analyze,
    Align,
    Compare,
    Score,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Decode => "decode",
            Self::Analyze => "analyze",
            Self::Align => "align",
            Self::Compare => "compare",
            Self::Score => "score",
        })
    }
}

/// A point in time after which work should stop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Deadline {
    at: Option<Instant>,
}

impl Deadline {
    /// Never expires.
    pub const fn none() -> Self {
        Self { at: None }
    }

    /// Expires `timeout` from now.
    pub fn after(timeout: Duration) -> Self {
        Self {
            at: Instant::now().checked_add(timeout),
        }
    }

    /// Expires at `instant`.
    pub const fn at(instant: Instant) -> Self {
        Self { at: Some(instant) }
    }

    pub fn expired(&self) -> bool {
        self.at.is_some_and(|at| Instant::now() >= at)
    }
}

/// Shared flag a caller sets to abandon an in-flight evaluation.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }
}

/// Per-call settings for [`evaluate`].
#[derive(Debug, Clone, Default)]
pub struct EvaluationContext {
    pub config: EvaluationConfig,
    pub deadline: Deadline,
    pub cancellation: Option<CancellationToken>,
}

impl EvaluationContext {
    pub fn new(config: EvaluationConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Deadline::after(timeout);
        self
    }

    #[must_use]
    pub fn with_deadline(mut self, deadline: Deadline) -> Self {
        self.deadline = deadline;
        self
    }

    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    /// Gate before `stage` runs.
    fn checkpoint(&self, stage: Stage) -> EvaluationResult<()> {
        if self.cancellation.as_ref().is_some_and(CancellationToken::is_cancelled) {
            info!(%stage, "evaluation cancelled");
            return Err(EvaluationError::Cancelled { stage });
        }
        if self.deadline.expired() {
            warn!(%stage, "evaluation deadline expired");
            return Err(EvaluationError::Timeout { stage });
        }
        Ok(())
    }
}

/// A challenge's reference mesh with its analysis computed once, on first use.
///
/// Immutable after construction and `Sync`; share it with `Arc`.
#[derive(Debug)]
pub struct ReferenceModel {
    mesh: Mesh,
    params: AnalysisParams,
    analysis: OnceLock<AnalysisResult>,
}

impl ReferenceModel {
    /// Wrap a mesh without checking it.
    pub fn new(mesh: Mesh) -> Self {
        Self::with_params(mesh, AnalysisParams::default())
    }

    pub fn with_params(mesh: Mesh, params: AnalysisParams) -> Self {
        Self {
            mesh,
            params,
            analysis: OnceLock::new(),
        }
    }

    /// Wrap a mesh after checking that it can serve as a reference.
    ///
    /// # Errors
    ///
    /// Returns [`EvaluationError::Alignment`] if the mesh has no extent.
    pub fn vetted(mesh: Mesh, params: AnalysisParams) -> EvaluationResult<Self> {
        check_reference(mesh.bounding_box())?;
        Ok(Self::with_params(mesh, params))
    }

    /// Decode and vet a reference STL.
    ///
    /// # Errors
    ///
    /// Returns [`EvaluationError::InvalidConfig`] for an out-of-range
    /// `config`, a format error for undecodable bytes and an alignment error
    /// for a degenerate mesh.
    pub fn from_stl(data: &[u8], config: &EvaluationConfig) -> EvaluationResult<Self> {
        config.validate()?;
        let mesh = MeshDecoder::with_params(&config.decode).decode(data)?;
        Self::vetted(mesh, config.analysis.clone())
    }

    pub fn mesh(&self) -> &Mesh {
        &self.mesh
    }

    /// Parameters the cached analysis is computed with.
    pub fn params(&self) -> &AnalysisParams {
        &self.params
    }

    pub fn analysis(&self) -> &AnalysisResult {
        self.analysis
            .get_or_init(|| GeometryAnalyzer::new(self.params.clone()).analyze(&self.mesh))
    }
}

/// Submission time against the challenge population.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TimeComparison {
    pub elapsed_seconds: f64,
    pub time_budget_seconds: f64,
    pub average_seconds: f64,
    pub best_seconds: f64,
}

/// Everything the reporting layer receives for one submission.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvaluationReport {
    /// The submission as uploaded.
    pub candidate: AnalysisResult,
    /// The submission after alignment to the reference frame.
    pub aligned: AnalysisResult,
    pub reference: AnalysisResult,
    pub alignment: AlignmentSummary,
    pub comparison: ComparisonResult,
    pub score: ScoreBreakdown,
    pub tier: PerformanceTier,
    pub grade: ScoreGrade,
    pub time: TimeComparison,
    pub warnings: Vec<EvaluationWarning>,
}

/// A report together with the submission as moved into the reference frame.
#[derive(Debug, Clone)]
pub struct Evaluation {
    pub report: EvaluationReport,
    pub aligned_mesh: Mesh,
}

/// Evaluate one submission against a challenge reference.
///
/// The reference analysis comes from the model's cache when its parameters
/// match `context.config.analysis`, and is recomputed otherwise.
///
/// # Errors
///
/// - [`EvaluationError::Format`]: the bytes are not a valid STL file.
/// - [`EvaluationError::Alignment`]: the reference is degenerate.
/// - [`EvaluationError::Timeout`] / [`EvaluationError::Cancelled`]: the
///   deadline passed or the caller cancelled.
/// - [`EvaluationError::InvalidTiming`]: bad timing values.
/// - [`EvaluationError::InvalidConfig`]: out-of-range configuration.
pub fn evaluate(
    candidate_bytes: &[u8],
    reference: &ReferenceModel,
    elapsed_seconds: f64,
    time_budget_seconds: f64,
    population: &PopulationStats,
    context: &EvaluationContext,
) -> EvaluationResult<EvaluationReport> {
    evaluate_detailed(
        candidate_bytes,
        reference,
        elapsed_seconds,
        time_budget_seconds,
        population,
        context,
    )
    .map(|evaluation| evaluation.report)
}

/// [`evaluate`], also returning the aligned submission mesh.
///
/// # Errors
///
/// As for [`evaluate`].
#[instrument(skip_all, fields(bytes = candidate_bytes.len()))]
pub fn evaluate_detailed(
    candidate_bytes: &[u8],
    reference: &ReferenceModel,
    elapsed_seconds: f64,
    time_budget_seconds: f64,
    population: &PopulationStats,
    context: &EvaluationContext,
) -> EvaluationResult<Evaluation> {
    let config = &context.config;
    config.validate()?;
    validate_timing(elapsed_seconds, time_budget_seconds)?;

    context.checkpoint(Stage::Decode)?;
    let candidate = MeshDecoder::with_params(&config.decode)
        .with_deadline(context.deadline)
        .decode(candidate_bytes)?;
    debug!(triangles = candidate.triangle_count(), "decoded candidate");

    context.checkpoint(Stage::Analyze)?;
    let analyzer = GeometryAnalyzer::new(config.analysis.clone());
    let candidate_analysis = analyzer.analyze(&candidate);
    let reference_analysis = if config.analysis == *reference.params() {
        Cow::Borrowed(reference.analysis())
    } else {
        debug!("analysis parameters differ from the reference's, re-analyzing reference");
        Cow::Owned(analyzer.analyze(reference.mesh()))
    };

    context.checkpoint(Stage::Align)?;
    let aligned = Aligner::new(config.align.clone()).align(&candidate, reference.mesh())?;

    context.checkpoint(Stage::Compare)?;
    let aligned_analysis = analyzer.analyze(&aligned.mesh);
    let comparison = Comparator::new().compare(&aligned_analysis, &reference_analysis);
    debug!(
        dimensional_accuracy = comparison.dimensional_accuracy,
        geometry_match = comparison.geometry_match,
        "compared candidate"
    );

    context.checkpoint(Stage::Score)?;
    let score = Scorer::new().score(&comparison, elapsed_seconds, time_budget_seconds, population)?;

    let warnings: Vec<EvaluationWarning> = candidate_analysis
        .warnings
        .iter()
        .cloned()
        .map(EvaluationWarning::Candidate)
        .chain(
            reference_analysis
                .warnings
                .iter()
                .cloned()
                .map(EvaluationWarning::Reference),
        )
        .chain(aligned.warnings.iter().cloned().map(EvaluationWarning::Alignment))
        .collect();

    info!(
        final_score = score.final_score,
        rank = score.rank,
        percentile = score.percentile,
        warnings = warnings.len(),
        "evaluated submission"
    );

    let report = EvaluationReport {
        alignment: AlignmentSummary::from(&aligned),
        candidate: candidate_analysis,
        aligned: aligned_analysis,
        reference: reference_analysis.into_owned(),
        comparison,
        tier: PerformanceTier::from_percentile(score.percentile),
        grade: ScoreGrade::from_score(score.final_score),
        score,
        time: TimeComparison {
            elapsed_seconds,
            time_budget_seconds,
            average_seconds: population.average_time_seconds,
            best_seconds: population.best_time_seconds,
        },
        warnings,
    };
    Ok(Evaluation {
        report,
        aligned_mesh: aligned.mesh,
    })
}
