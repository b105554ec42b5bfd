//! CAD Arena terminal evaluator
//!
//! Scores a candidate STL against a challenge's reference STL and prints the
//! report as text or JSON.
//!
//! Exit codes: 0 scored, 1 submission rejected, 2 setup or reference problem.

use std::io::{self, IsTerminal};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use cadarena_terminal::{run, Job, OutputFormat};
use clap::{Parser, ValueEnum};
use tracing_subscriber::EnvFilter;

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Submitted STL file
    #[arg(value_name = "CANDIDATE")]
    candidate: PathBuf,

    /// Challenge reference STL file
    #[arg(value_name = "REFERENCE")]
    reference: PathBuf,

    /// Seconds the submitter took
    #[arg(long, value_name = "SECONDS")]
    elapsed: f64,

    /// Challenge time budget in seconds
    #[arg(long, value_name = "SECONDS")]
    budget: f64,

    /// JSON file with earlier submissions for percentile and rank
    #[arg(long, value_name = "FILE")]
    history: Option<PathBuf>,

    /// JSON evaluation configuration
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Abandon the evaluation after this many milliseconds
    #[arg(long, value_name = "N")]
    timeout_ms: Option<u64>,

    /// Report format
    #[arg(long, value_enum, default_value_t = Format::Text)]
    format: Format,

    /// Also write the aligned submission as binary STL
    #[arg(long, value_name = "FILE")]
    export_aligned: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Format {
    Text,
    Json,
}

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.verbose);

    let stdout = io::stdout();
    let job = Job {
        candidate: args.candidate,
        reference: args.reference,
        elapsed_seconds: args.elapsed,
        time_budget_seconds: args.budget,
        history: args.history,
        config: args.config,
        timeout: args.timeout_ms.map(Duration::from_millis),
        format: match args.format {
            Format::Text => OutputFormat::Text,
            Format::Json => OutputFormat::Json,
        },
        color: stdout.is_terminal(),
        export_aligned: args.export_aligned,
    };

    match run(&job, &mut stdout.lock()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::from(e.exit_code() as u8)
        }
    }
}
