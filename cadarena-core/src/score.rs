//! Final score, percentile and rank of a submission.
//!
//! Scores are out of 100: up to 70 for accuracy and up to 30 for time.
//! Population data is a read-only snapshot supplied by the caller; nothing
//! here reaches into shared storage.

use serde::{Deserialize, Serialize};

use crate::compare::ComparisonResult;
use crate::error::{EvaluationError, EvaluationResult};

/// Maximum accuracy points.
pub const ACCURACY_POINTS: f64 = 70.0;

/// Maximum time points.
pub const TIME_POINTS: f64 = 30.0;

/// Share of the accuracy points driven by dimensional accuracy; the rest
/// comes from geometry match, which captures shape rather than extent.
pub const DIMENSIONAL_WEIGHT: f64 = 0.3;

/// A past submission to the same challenge.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HistoricalSubmission {
    pub final_score: f64,
    pub elapsed_seconds: f64,
}

/// Snapshot of a challenge's past submissions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PopulationStats {
    pub average_time_seconds: f64,
    pub best_time_seconds: f64,
    /// Oldest first.
    pub history: Vec<HistoricalSubmission>,
}

impl PopulationStats {
    /// Derive average and best times from the history itself.
    pub fn from_history(history: Vec<HistoricalSubmission>) -> Self {
        let n = history.len();
        let (average_time_seconds, best_time_seconds) = if n == 0 {
            (0.0, 0.0)
        } else {
            let total: f64 = history.iter().map(|h| h.elapsed_seconds).sum();
            let best = history
                .iter()
                .map(|h| h.elapsed_seconds)
                .fold(f64::INFINITY, f64::min);
            (total / n as f64, best)
        };
        Self {
            average_time_seconds,
            best_time_seconds,
            history,
        }
    }
}

/// How a submission's final score was composed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ScoreBreakdown {
    /// `0..=70`
    pub accuracy_score: f64,
    /// `0..=30`
    pub time_score: f64,
    /// Rounded, `0..=100`
    pub final_score: f64,
    /// Share of past submissions this one beats, `0..=100`.
    pub percentile: f64,
    /// 1-based position among past submissions plus this one.
    pub rank: u64,
}

/// Badge derived from the percentile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PerformanceTier {
    Exceptional,
    Excellent,
    Good,
    Average,
    NeedsImprovement,
}

impl PerformanceTier {
    pub fn from_percentile(percentile: f64) -> Self {
        if percentile >= 95.0 {
            Self::Exceptional
        } else if percentile >= 85.0 {
            Self::Excellent
        } else if percentile >= 70.0 {
            Self::Good
        } else if percentile >= 50.0 {
            Self::Average
        } else {
            Self::NeedsImprovement
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Exceptional => "Exceptional",
            Self::Excellent => "Excellent",
            Self::Good => "Good",
            Self::Average => "Average",
            Self::NeedsImprovement => "Needs Improvement",
        }
    }
}

/// Coarse band of the final score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreGrade {
    High,
    Medium,
    Low,
}

impl ScoreGrade {
    pub fn from_score(final_score: f64) -> Self {
        if final_score >= 90.0 {
            Self::High
        } else if final_score >= 70.0 {
            Self::Medium
        } else {
            Self::Low
        }
    }
}

/// Turns comparison metrics and timing into a [`ScoreBreakdown`].
#[derive(Debug, Clone, Copy, Default)]
pub struct Scorer;

impl Scorer {
    pub fn new() -> Self {
        Self
    }

    /// # Errors
    ///
    /// Returns [`EvaluationError::InvalidTiming`] if `elapsed_seconds` is
    /// negative or `time_budget_seconds` is not positive, or either is not finite.
    pub fn score(
        &self,
        comparison: &ComparisonResult,
        elapsed_seconds: f64,
        time_budget_seconds: f64,
        population: &PopulationStats,
    ) -> EvaluationResult<ScoreBreakdown> {
        validate_timing(elapsed_seconds, time_budget_seconds)?;

        let accuracy_score = accuracy_score(comparison);
        let time_score = time_score(elapsed_seconds, time_budget_seconds);
        let final_score = (accuracy_score + time_score).round().clamp(0.0, 100.0);

        Ok(ScoreBreakdown {
            accuracy_score,
            time_score,
            final_score,
            percentile: percentile(final_score, &population.history),
            rank: rank(final_score, elapsed_seconds, &population.history),
        })
    }
}

/// Check that timing inputs are usable.
///
/// # Errors
///
/// Returns [`EvaluationError::InvalidTiming`] describing the bad value.
pub fn validate_timing(elapsed_seconds: f64, time_budget_seconds: f64) -> EvaluationResult<()> {
    if !(time_budget_seconds.is_finite() && time_budget_seconds > 0.0) {
        return Err(EvaluationError::invalid_timing(format!(
            "time budget must be positive, got {time_budget_seconds}"
        )));
    }
    if !(elapsed_seconds.is_finite() && elapsed_seconds >= 0.0) {
        return Err(EvaluationError::invalid_timing(format!(
            "elapsed time must be non-negative, got {elapsed_seconds}"
        )));
    }
    Ok(())
}

/// `70 * (0.3 * dimensional + 0.7 * geometry)`, metrics taken as fractions.
pub fn accuracy_score(comparison: &ComparisonResult) -> f64 {
    let dimensional = comparison.dimensional_accuracy / 100.0;
    let geometry = comparison.geometry_match / 100.0;
    ACCURACY_POINTS * (DIMENSIONAL_WEIGHT * dimensional + (1.0 - DIMENSIONAL_WEIGHT) * geometry)
}

/// `30 * clamp(1 - elapsed / budget, 0, 1)`.
pub fn time_score(elapsed_seconds: f64, time_budget_seconds: f64) -> f64 {
    TIME_POINTS * (1.0 - elapsed_seconds / time_budget_seconds).clamp(0.0, 1.0)
}

/// Share of `history` that `score` beats, counting ties as half.
///
/// Using the midpoint of the tied bracket keeps identical scores on one
/// percentile. An empty history gives 100.
pub fn percentile(score: f64, history: &[HistoricalSubmission]) -> f64 {
    if history.is_empty() {
        return 100.0;
    }
    let below = history.iter().filter(|h| h.final_score < score).count();
    let tied = history.iter().filter(|h| h.final_score == score).count();
    100.0 * (below as f64 + 0.5 * tied as f64) / history.len() as f64
}

/// 1-based rank by score descending, then elapsed time ascending, then
/// submission order. Every historical entry predates this submission, so
/// a full tie goes to the historical entry.
pub fn rank(score: f64, elapsed_seconds: f64, history: &[HistoricalSubmission]) -> u64 {
    let ahead = history
        .iter()
        .filter(|h| {
            h.final_score > score
                || (h.final_score == score && h.elapsed_seconds <= elapsed_seconds)
        })
        .count();
    ahead as u64 + 1
}
