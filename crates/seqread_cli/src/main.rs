// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Runs the sequential read harness from the command line.
//!
//! # Usage
//!
//! ```bash
//! seqread --suite read-loop --dir /mnt/scratch --file-size 1048576 --buffer-size 65536
//! seqread --suite completion -v
//! ```
//!
//! Each case prints one line. The process exits with code 0 if every case passed and 1 if any
//! case failed.

use std::path::PathBuf;
use std::process::ExitCode;

use alloc_tracker::{Allocator, Session};
use anyhow::{Context, Result, ensure};
use clap::{ArgAction, Parser, ValueEnum};
use seqread::fixture::FixtureContent;
use seqread::{
    COMPLETION_FILE_SIZES, CellReport, DEFAULT_ALLOCATOR_BOUNDARY, Matrix, MatrixRunner, VerdictReport,
    VerifierConfig,
};
use tracing::{Level, event};
use tracing_subscriber::filter::LevelFilter;

#[global_allocator]
static ALLOCATOR: Allocator<std::alloc::System> = Allocator::system();

#[derive(Parser, Debug)]
#[command(name = "seqread", version, about = "Measures and verifies buffered sequential file reads")]
struct Cli {
    /// Which suite to run
    #[arg(long, value_enum, default_value_t = Suite::All)]
    suite: Suite,

    /// Directory in which fixture files are created and deleted
    #[arg(long, value_name = "DIR", default_value = ".")]
    dir: PathBuf,

    /// Only run these file sizes, in bytes (repeatable)
    #[arg(long = "file-size", value_name = "BYTES")]
    file_sizes: Vec<u64>,

    /// Only run these read buffer sizes, in bytes (repeatable)
    #[arg(long = "buffer-size", value_name = "BYTES")]
    buffer_sizes: Vec<usize>,

    /// Buffer size added at the allocator size-class boundary; 0 leaves it out
    #[arg(long, value_name = "BYTES", default_value_t = DEFAULT_ALLOCATOR_BOUNDARY)]
    allocator_boundary: usize,

    /// Also run every read-loop case with the default internal buffer size
    #[arg(long)]
    default_internal_buffer: bool,

    /// How fixture bytes are generated
    #[arg(long, value_enum, default_value_t = Content::Deterministic)]
    content: Content,

    /// How many times to run each suite
    #[arg(long, value_name = "N", default_value_t = 1)]
    repeat: u32,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
enum Suite {
    ReadLoop,
    Completion,
    All,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
enum Content {
    Deterministic,
    Random,
}

impl From<Content> for FixtureContent {
    fn from(content: Content) -> Self {
        match content {
            Content::Deterministic => Self::Deterministic,
            Content::Random => Self::Random,
        }
    }
}

#[derive(Debug, Default)]
struct Tally {
    passed: usize,
    failed: usize,
}

impl Tally {
    fn record(&mut self, passed: bool) {
        if passed {
            self.passed += 1;
        } else {
            self.failed += 1;
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    ensure!(cli.repeat > 0, "--repeat must be at least 1");
    let dir = cli
        .dir
        .canonicalize()
        .with_context(|| format!("working directory {} is not accessible", cli.dir.display()))?;
    ensure!(dir.is_dir(), "{} is not a directory", dir.display());

    let runner = MatrixRunner::new(&dir).with_content(cli.content.into());
    let session = Session::new();
    let mut tally = Tally::default();

    event!(Level::INFO, message = "starting run", suite = ?cli.suite, dir = %dir.display(), repeat = cli.repeat);

    for round in 1..=cli.repeat {
        if matches!(cli.suite, Suite::ReadLoop | Suite::All) {
            let matrix = read_loop_matrix(&cli);
            println!("read-loop round {round}: {} cases", matrix.len());
            for cell in matrix.cells() {
                let operation_name = format!("read-loop/{}", cell.io_mode());
                let operation = session.operation(&operation_name);
                let report = {
                    let _span = operation.measure_process();
                    runner.run_cell(cell).await
                };
                print_cell(&report);
                tally.record(report.passed());
            }
        }

        if matches!(cli.suite, Suite::Completion | Suite::All) {
            let config = VerifierConfig::default();
            let sizes = completion_sizes(&cli, &config)?;
            println!("completion round {round}: {} cases", sizes.len());
            let operation = session.operation("completion");
            for size in sizes {
                let reports = {
                    let _span = operation.measure_process();
                    runner.run_completion(&[size], config).await
                };
                for report in &reports {
                    print_verdict(report);
                    tally.record(report.passed());
                }
            }
        }
    }

    println!();
    println!("{session}");
    println!("{} passed, {} failed", tally.passed, tally.failed);

    Ok(if tally.failed == 0 { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => LevelFilter::WARN,
        1 => LevelFilter::INFO,
        2 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    };

    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();
}

fn read_loop_matrix(cli: &Cli) -> Matrix {
    let mut matrix = Matrix::standard()
        .with_allocator_boundary((cli.allocator_boundary > 0).then_some(cli.allocator_boundary))
        .with_default_internal_buffer_variant(cli.default_internal_buffer);
    if !cli.file_sizes.is_empty() {
        matrix = matrix.with_file_sizes(cli.file_sizes.iter().copied());
    }
    if !cli.buffer_sizes.is_empty() {
        matrix = matrix.with_buffer_sizes(cli.buffer_sizes.iter().copied());
    }
    matrix
}

/// File sizes for the completion suite.
///
/// Sizes from `--file-size` that exceed the verifier's internal buffer only make sense for the
/// read loop and are skipped here. If none remain, the standard completion sizes are used.
fn completion_sizes(cli: &Cli, config: &VerifierConfig) -> Result<Vec<usize>> {
    let mut sizes = Vec::with_capacity(cli.file_sizes.len());
    for &size in &cli.file_sizes {
        let size = usize::try_from(size).with_context(|| format!("file size {size} does not fit in memory"))?;
        if size > config.internal_buffer_size() {
            event!(
                Level::INFO,
                message = "file size skipped by completion suite",
                size,
                internal_buffer_size = config.internal_buffer_size()
            );
        } else {
            sizes.push(size);
        }
    }

    if sizes.is_empty() {
        sizes.extend_from_slice(&COMPLETION_FILE_SIZES);
    }
    Ok(sizes)
}

fn print_cell(report: &CellReport) {
    let cell = report.cell();
    match report.outcome() {
        Ok(summary) => println!(
            "ok    {:>9} B  buf {:>6}  {:<8}  {:<10}  {:>7} calls  {:>10.3?}",
            cell.file_size(),
            cell.buffer_size(),
            cell.io_mode(),
            cell.access_hint(),
            summary.read_calls(),
            report.elapsed()
        ),
        Err(e) => println!("FAIL  {cell}: {e}"),
    }
}

fn print_verdict(report: &VerdictReport) {
    match report.outcome() {
        Ok(()) => println!("ok    {:>9} B  completed immediately  {:>10.3?}", report.file_size(), report.elapsed()),
        Err(e) => println!("FAIL  {:>9} B: {e}", report.file_size()),
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn filters_narrow_the_matrix() {
        let cli = Cli::parse_from(["seqread", "--file-size", "100", "--buffer-size", "512", "--allocator-boundary", "0"]);

        let matrix = read_loop_matrix(&cli);

        assert_eq!(matrix.len(), 4);
        assert!(matrix.cells().all(|cell| cell.file_size() == 100 && cell.buffer_size() == 512));
    }

    #[test]
    fn completion_sizes_default_to_the_standard_set() {
        let cli = Cli::parse_from(["seqread", "--suite", "completion"]);

        assert_eq!(cli.suite, Suite::Completion);
        assert_eq!(
            completion_sizes(&cli, &VerifierConfig::default()).unwrap(),
            COMPLETION_FILE_SIZES.to_vec()
        );
    }

    #[test]
    fn completion_sizes_skip_files_larger_than_the_verifier_buffer() {
        let config = VerifierConfig::default();
        let cli = Cli::parse_from(["seqread", "--file-size", "100", "--file-size", "1048576"]);

        assert_eq!(completion_sizes(&cli, &config).unwrap(), vec![100]);
    }

    #[tokio::test]
    async fn large_file_filter_leaves_completion_suite_passing() {
        let tmp = tempfile::tempdir().unwrap();
        let config = VerifierConfig::default();
        let cli = Cli::parse_from(["seqread", "--file-size", "1048576"]);
        assert_eq!(cli.suite, Suite::All);

        let sizes = completion_sizes(&cli, &config).unwrap();
        let reports = MatrixRunner::new(tmp.path()).run_completion(&sizes, config).await;

        assert_eq!(sizes, COMPLETION_FILE_SIZES.to_vec());
        assert!(reports.iter().all(VerdictReport::passed));
    }

    #[test]
    fn verbosity_counts_flags() {
        let cli = Cli::parse_from(["seqread", "-vv"]);

        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.repeat, 1);
        assert_eq!(cli.content, Content::Deterministic);
    }
}
