//! Plain-text rendering of evaluation reports
use cadarena_core::{
    AlignmentWarning, DataQualityWarning, EvaluationReport, EvaluationWarning, ScoreGrade,
};
use crossterm::{
    style::{Color, Print, ResetColor, SetForegroundColor},
    QueueableCommand,
};
use std::io::{self, Write};

/// Width of the label column
const LABEL_WIDTH: usize = 22;

/// Writes an [`EvaluationReport`] as aligned text, optionally colored
pub struct ReportRenderer {
    color: bool,
}

impl ReportRenderer {
    pub fn new(color: bool) -> Self {
        Self { color }
    }

    pub fn render<W: Write>(&self, report: &EvaluationReport, out: &mut W) -> io::Result<()> {
        let score = &report.score;

        self.heading(out, "Score")?;
        self.colored_row(
            out,
            "Final score",
            &format!("{:.0} / 100", score.final_score),
            grade_color(report.grade),
        )?;
        self.row(out, "Accuracy", &format!("{:.1} / 70", score.accuracy_score))?;
        self.row(out, "Time", &format!("{:.1} / 30", score.time_score))?;
        self.row(out, "Percentile", &format!("{:.1}", score.percentile))?;
        self.row(out, "Rank", &score.rank.to_string())?;
        self.row(out, "Tier", report.tier.label())?;

        self.heading(out, "Geometry")?;
        let comparison = &report.comparison;
        self.row(
            out,
            "Dimensional accuracy",
            &format!("{:.2}%", comparison.dimensional_accuracy),
        )?;
        self.row(out, "Geometry match", &format!("{:.2}%", comparison.geometry_match))?;
        self.row(
            out,
            "Volume",
            &format!(
                "{:.3} (reference {:.3})",
                report.aligned.volume, report.reference.volume
            ),
        )?;
        self.row(
            out,
            "Surface area",
            &format!(
                "{:.3} (reference {:.3})",
                report.aligned.surface_area, report.reference.surface_area
            ),
        )?;
        let e = report.aligned.bounding_box.extents();
        let r = report.reference.bounding_box.extents();
        self.row(
            out,
            "Extents",
            &format!(
                "{:.3} x {:.3} x {:.3} (reference {:.3} x {:.3} x {:.3})",
                e.x, e.y, e.z, r.x, r.y, r.z
            ),
        )?;
        self.row(out, "Triangles", &report.candidate.triangle_count.to_string())?;
        self.row(
            out,
            "Alignment scale",
            &format!("{:.4}", report.alignment.transform.scale),
        )?;

        self.heading(out, "Time")?;
        let time = &report.time;
        self.row(
            out,
            "Elapsed",
            &format!(
                "{:.1}s of {:.1}s",
                time.elapsed_seconds, time.time_budget_seconds
            ),
        )?;
        self.row(out, "Average", &format!("{:.1}s", time.average_seconds))?;
        self.row(out, "Best", &format!("{:.1}s", time.best_seconds))?;

        if !report.warnings.is_empty() {
            self.heading(out, "Warnings")?;
            for warning in &report.warnings {
                self.colored_row(out, "!", &describe_warning(warning), Color::Yellow)?;
            }
        }

        out.flush()
    }

    fn heading<W: Write>(&self, out: &mut W, title: &str) -> io::Result<()> {
        if self.color {
            out.queue(SetForegroundColor(Color::Cyan))?
                .queue(Print(format!("\n{title}\n")))?
                .queue(ResetColor)?;
        } else {
            out.queue(Print(format!("\n{title}\n")))?;
        }
        Ok(())
    }

    fn row<W: Write>(&self, out: &mut W, label: &str, value: &str) -> io::Result<()> {
        out.queue(Print(format!("  {label:<LABEL_WIDTH$}{value}\n")))?;
        Ok(())
    }

    fn colored_row<W: Write>(
        &self,
        out: &mut W,
        label: &str,
        value: &str,
        color: Color,
    ) -> io::Result<()> {
        if !self.color {
            return self.row(out, label, value);
        }
        out.queue(Print(format!("  {label:<LABEL_WIDTH$}")))?
            .queue(SetForegroundColor(color))?
            .queue(Print(value))?
            .queue(ResetColor)?
            .queue(Print("\n"))?;
        Ok(())
    }
}

pub fn grade_color(grade: ScoreGrade) -> Color {
    match grade {
        ScoreGrade::High => Color::Green,
        ScoreGrade::Medium => Color::Yellow,
        ScoreGrade::Low => Color::Red,
    }
}

/// One-line human description of a warning
pub fn describe_warning(warning: &EvaluationWarning) -> String {
    match warning {
        EvaluationWarning::Candidate(w) => format!("submission: {}", describe_quality(w)),
        EvaluationWarning::Reference(w) => format!("reference: {}", describe_quality(w)),
        EvaluationWarning::Alignment(AlignmentWarning::AmbiguousAxes) => {
            "alignment: principal axes are ambiguous, rotation skipped".to_string()
        }
        EvaluationWarning::Alignment(AlignmentWarning::DegenerateCandidate) => {
            "alignment: submission has no extent, scaling skipped".to_string()
        }
    }
}

fn describe_quality(warning: &DataQualityWarning) -> String {
    match warning {
        DataQualityWarning::SuspiciousVolume { ratio } => format!(
            "volume fills {:.2}% of the bounding box; check triangle orientation",
            ratio * 100.0
        ),
        DataQualityWarning::FlatGeometry => "geometry is flat".to_string(),
        DataQualityWarning::DegenerateTriangles { count } => {
            format!("{count} degenerate triangles")
        }
    }
}
