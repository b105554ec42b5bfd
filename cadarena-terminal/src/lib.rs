//! Command-line front-end for evaluating STL submissions
use cadarena_core::stl::encode_binary;
use cadarena_core::{
    evaluate_detailed, EvaluationConfig, EvaluationContext, EvaluationError, EvaluationReport,
    HistoricalSubmission, Mesh, PopulationStats, ReferenceModel,
};
use serde::Deserialize;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

pub mod report;

pub use report::ReportRenderer;

/// Errors surfaced by the command-line front-end
#[derive(Debug, Error)]
pub enum CliError {
    #[error("failed to read {path}: {source}")]
    Read { path: PathBuf, source: io::Error },

    #[error("failed to write {path}: {source}")]
    Write { path: PathBuf, source: io::Error },

    #[error("invalid JSON in {path}: {source}")]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("reference model rejected: {0}")]
    Reference(EvaluationError),

    #[error(transparent)]
    Evaluation(#[from] EvaluationError),

    #[error(transparent)]
    Output(#[from] io::Error),
}

impl CliError {
    /// Process exit code: 1 for a rejected submission, 2 for setup problems
    /// or bad arguments
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Evaluation(e) if e.is_user_error() => 1,
            Self::Evaluation(EvaluationError::Cancelled { .. }) => 1,
            _ => 2,
        }
    }
}

/// How the report is printed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// Everything one run needs, already resolved from the command line
#[derive(Debug, Clone)]
pub struct Job {
    pub candidate: PathBuf,
    pub reference: PathBuf,
    pub elapsed_seconds: f64,
    pub time_budget_seconds: f64,
    pub history: Option<PathBuf>,
    pub config: Option<PathBuf>,
    pub timeout: Option<Duration>,
    pub format: OutputFormat,
    pub color: bool,
    pub export_aligned: Option<PathBuf>,
}

/// History files hold either full population stats or a bare list of past submissions
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum HistoryFile {
    Entries(Vec<HistoricalSubmission>),
    Stats(PopulationStats),
}

pub fn load_config(path: &Path) -> Result<EvaluationConfig, CliError> {
    read_json(path)
}

pub fn load_population(path: &Path) -> Result<PopulationStats, CliError> {
    Ok(match read_json::<HistoryFile>(path)? {
        HistoryFile::Entries(entries) => PopulationStats::from_history(entries),
        HistoryFile::Stats(stats) => stats,
    })
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T, CliError> {
    let text = read_file(path)?;
    serde_json::from_slice(&text).map_err(|source| CliError::Json {
        path: path.to_path_buf(),
        source,
    })
}

fn read_file(path: &Path) -> Result<Vec<u8>, CliError> {
    fs::read(path).map_err(|source| CliError::Read {
        path: path.to_path_buf(),
        source,
    })
}

/// Evaluate the job's submission and return the report
pub fn evaluate_job(job: &Job) -> Result<EvaluationReport, CliError> {
    let config = match &job.config {
        Some(path) => load_config(path)?,
        None => EvaluationConfig::default(),
    };
    let population = match &job.history {
        Some(path) => load_population(path)?,
        None => PopulationStats::default(),
    };
    debug!(entries = population.history.len(), "loaded population");

    let reference_bytes = read_file(&job.reference)?;
    let reference =
        ReferenceModel::from_stl(&reference_bytes, &config).map_err(CliError::Reference)?;
    info!(
        triangles = reference.mesh().triangle_count(),
        "loaded reference {}",
        job.reference.display()
    );

    let candidate_bytes = read_file(&job.candidate)?;
    let mut context = EvaluationContext::new(config.clone());
    if let Some(timeout) = job.timeout {
        context = context.with_timeout(timeout);
    }

    let evaluation = evaluate_detailed(
        &candidate_bytes,
        &reference,
        job.elapsed_seconds,
        job.time_budget_seconds,
        &population,
        &context,
    )?;

    if let Some(path) = &job.export_aligned {
        export_aligned(&evaluation.aligned_mesh, path)?;
    }

    Ok(evaluation.report)
}

/// Write the submission, moved into the reference frame, as binary STL
fn export_aligned(aligned: &Mesh, path: &Path) -> Result<(), CliError> {
    fs::write(path, encode_binary(aligned)).map_err(|source| CliError::Write {
        path: path.to_path_buf(),
        source,
    })?;
    info!("wrote aligned submission to {}", path.display());
    Ok(())
}

/// Run a job end to end, printing the report to `out`
pub fn run<W: Write>(job: &Job, out: &mut W) -> Result<(), CliError> {
    let report = evaluate_job(job)?;
    match job.format {
        OutputFormat::Text => ReportRenderer::new(job.color).render(&report, out)?,
        OutputFormat::Json => {
            serde_json::to_writer_pretty(&mut *out, &report).map_err(io::Error::from)?;
            writeln!(out)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use cadarena_core::stl::encode_ascii;

    /// Scratch directory removed on drop
    struct Scratch(PathBuf);

    impl Scratch {
        fn new(name: &str) -> Self {
            let dir = std::env::temp_dir().join(format!(
                "cadarena-terminal-{name}-{}",
                std::process::id()
            ));
            fs::create_dir_all(&dir).unwrap();
            Self(dir)
        }

        fn write(&self, name: &str, contents: impl AsRef<[u8]>) -> PathBuf {
            let path = self.0.join(name);
            fs::write(&path, contents).unwrap();
            path
        }
    }

    impl Drop for Scratch {
        fn drop(&mut self) {
            let _ = fs::remove_dir_all(&self.0);
        }
    }

    fn job(scratch: &Scratch) -> Job {
        Job {
            candidate: scratch.write("candidate.stl", encode_binary(&Mesh::cube(5.0))),
            reference: scratch.write("reference.stl", encode_ascii(&Mesh::cube(10.0), "ref")),
            elapsed_seconds: 30.0,
            time_budget_seconds: 60.0,
            history: None,
            config: None,
            timeout: None,
            format: OutputFormat::Json,
            color: false,
            export_aligned: None,
        }
    }

    #[test]
    fn test_json_output() {
        let scratch = Scratch::new("json");
        let mut out = Vec::new();
        run(&job(&scratch), &mut out).unwrap();

        let value: serde_json::Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(value["score"]["final_score"], 85.0);
        assert_eq!(value["tier"], "exceptional");
    }

    #[test]
    fn test_history_as_entry_list() {
        let scratch = Scratch::new("history");
        let path = scratch.write(
            "history.json",
            r#"[{"final_score": 90.0, "elapsed_seconds": 20.0},
                {"final_score": 40.0, "elapsed_seconds": 50.0}]"#,
        );
        let stats = load_population(&path).unwrap();
        assert_eq!(stats.history.len(), 2);
        assert_relative_eq!(stats.average_time_seconds, 35.0);
        assert_relative_eq!(stats.best_time_seconds, 20.0);
    }

    #[test]
    fn test_history_ranks_submission() {
        let scratch = Scratch::new("rank");
        let mut job = job(&scratch);
        job.history = Some(scratch.write(
            "history.json",
            r#"{"history": [{"final_score": 95.0, "elapsed_seconds": 10.0}]}"#,
        ));
        let report = evaluate_job(&job).unwrap();
        assert_eq!(report.score.rank, 2);
        assert_eq!(report.score.percentile, 0.0);
    }

    #[test]
    fn test_export_aligned() {
        let scratch = Scratch::new("export");
        let mut job = job(&scratch);
        let export = scratch.0.join("aligned.stl");
        job.export_aligned = Some(export.clone());
        evaluate_job(&job).unwrap();

        let mesh = cadarena_core::stl::parse_stl(&fs::read(&export).unwrap()).unwrap();
        assert_eq!(mesh.triangle_count(), 12);
        let bounds = mesh.bounding_box();
        assert_relative_eq!(bounds.extents().x, 10.0, epsilon = 1e-4);
        assert_relative_eq!(bounds.min.x, -5.0, epsilon = 1e-4);
    }

    #[test]
    fn test_export_honours_timeout() {
        let scratch = Scratch::new("export-timeout");
        let mut job = job(&scratch);
        let export = scratch.0.join("aligned.stl");
        job.export_aligned = Some(export.clone());
        job.timeout = Some(Duration::ZERO);

        let err = evaluate_job(&job).unwrap_err();
        assert!(matches!(
            err,
            CliError::Evaluation(EvaluationError::Timeout { .. })
        ));
        assert!(!export.exists());
    }

    #[test]
    fn test_bad_timing_exit_code() {
        let scratch = Scratch::new("timing");
        let mut job = job(&scratch);
        job.elapsed_seconds = -1.0;
        let err = evaluate_job(&job).unwrap_err();
        assert!(matches!(
            err,
            CliError::Evaluation(EvaluationError::InvalidTiming(_))
        ));
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn test_bad_submission_exit_code() {
        let scratch = Scratch::new("truncated");
        let mut job = job(&scratch);
        // header promises 10 triangles, none follow
        let mut bytes = vec![0u8; 84];
        bytes[80] = 10;
        job.candidate = scratch.write("candidate.stl", bytes);
        let err = evaluate_job(&job).unwrap_err();
        assert_eq!(err.exit_code(), 1);
    }

    #[test]
    fn test_missing_reference_exit_code() {
        let scratch = Scratch::new("missing");
        let mut job = job(&scratch);
        job.reference = scratch.0.join("nope.stl");
        let err = evaluate_job(&job).unwrap_err();
        assert!(matches!(err, CliError::Read { .. }));
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let scratch = Scratch::new("config");
        let mut job = job(&scratch);
        job.config = Some(scratch.write(
            "config.json",
            r#"{"analysis": {"min_fill_ratio": 4.0}}"#,
        ));
        let err = evaluate_job(&job).unwrap_err();
        assert!(matches!(
            err,
            CliError::Reference(EvaluationError::InvalidConfig(_))
        ));
        assert_eq!(err.exit_code(), 2);
    }
}
