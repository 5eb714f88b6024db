// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tracing::{Level, event};

use crate::fixture::{Fixture, FixtureContent, fixture_name};
use crate::verifier::{CompletionVerifier, VerifierConfig};
use crate::{
    AccessHint, DEFAULT_INTERNAL_BUFFER_SIZE, Error, IoMode, LoopSummary, ReadLoopDriver, Result, StreamConfig,
};

const KB: u64 = 1024;
const MB: u64 = 1024 * KB;

/// File sizes the read-loop benchmark covers by default.
pub const STANDARD_FILE_SIZES: [u64; 13] = [
    100,
    512,
    KB,
    2 * KB,
    4 * KB,
    8 * KB,
    16 * KB,
    32 * KB,
    64 * KB,
    128 * KB,
    512 * KB,
    MB,
    10 * MB,
];

/// Buffer sizes below the allocator boundary that the read-loop benchmark covers by default.
pub const STANDARD_BUFFER_SIZES: [usize; 8] = [512, 1024, 2048, 4096, 8192, 16384, 32768, 65536];

/// Default allocator size-class boundary. Buffers at or above roughly this size take a
/// slower allocation path on some runtimes, so the matrix always includes one buffer
/// size right at it.
pub const DEFAULT_ALLOCATOR_BOUNDARY: usize = 84_975;

/// File sizes the completion verifier covers by default.
///
/// They cluster around the 4 KiB page size and the 64 KiB mark, where device reads are
/// most likely to be split.
pub const COMPLETION_FILE_SIZES: [usize; 22] = [
    100, 1000, 2000, 3000, 4000, 4010, 4050, 4095, 4096, 4250, 4500, 4750, 5000, 6000, 7000, 8000, 9000, 20_000,
    50_000, 63_999, 64_000, 80_000,
];

/// One combination of parameters for a read-loop case.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct MatrixCell {
    file_size: u64,
    buffer_size: usize,
    io_mode: IoMode,
    access_hint: AccessHint,
    use_default_internal_buffer_size: bool,
}

impl MatrixCell {
    /// Creates a cell.
    ///
    /// When `use_default_internal_buffer_size` is false the reader's internal buffer is
    /// `buffer_size`; otherwise it is [`DEFAULT_INTERNAL_BUFFER_SIZE`].
    #[must_use]
    pub const fn new(
        file_size: u64,
        buffer_size: usize,
        io_mode: IoMode,
        access_hint: AccessHint,
        use_default_internal_buffer_size: bool,
    ) -> Self {
        Self {
            file_size,
            buffer_size,
            io_mode,
            access_hint,
            use_default_internal_buffer_size,
        }
    }

    /// Size of the fixture file.
    #[must_use]
    pub const fn file_size(&self) -> u64 {
        self.file_size
    }

    /// Size of each read request.
    #[must_use]
    pub const fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// I/O mode of the reader.
    #[must_use]
    pub const fn io_mode(&self) -> IoMode {
        self.io_mode
    }

    /// Access hint of the reader.
    #[must_use]
    pub const fn access_hint(&self) -> AccessHint {
        self.access_hint
    }

    /// Whether the reader uses the default internal buffer size instead of `buffer_size`.
    #[must_use]
    pub const fn use_default_internal_buffer_size(&self) -> bool {
        self.use_default_internal_buffer_size
    }

    /// Internal buffer size the reader is opened with.
    #[must_use]
    pub const fn internal_buffer_size(&self) -> usize {
        if self.use_default_internal_buffer_size {
            DEFAULT_INTERNAL_BUFFER_SIZE
        } else {
            self.buffer_size
        }
    }

    /// Stream configuration for reading `path` under this cell's parameters.
    #[must_use]
    pub fn stream_config(&self, path: impl Into<PathBuf>) -> StreamConfig {
        StreamConfig::new(path)
            .with_internal_buffer_size(self.internal_buffer_size())
            .with_io_mode(self.io_mode)
            .with_access_hint(self.access_hint)
    }
}

impl std::fmt::Display for MatrixCell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}",
            self.file_size, self.buffer_size, self.io_mode, self.access_hint
        )?;
        if self.use_default_internal_buffer_size {
            f.write_str("/default-internal")?;
        }
        Ok(())
    }
}

/// The parameter sets a read-loop run enumerates.
///
/// Every combination of file size, buffer size, I/O mode, access hint and internal-buffer
/// choice becomes one [`MatrixCell`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Matrix {
    file_sizes: Vec<u64>,
    buffer_sizes: Vec<usize>,
    allocator_boundary: Option<usize>,
    io_modes: Vec<IoMode>,
    access_hints: Vec<AccessHint>,
    internal_buffer_choices: Vec<bool>,
}

impl Matrix {
    /// The full matrix of the sequential-read benchmark.
    #[must_use]
    pub fn standard() -> Self {
        Self {
            file_sizes: STANDARD_FILE_SIZES.to_vec(),
            buffer_sizes: STANDARD_BUFFER_SIZES.to_vec(),
            allocator_boundary: Some(DEFAULT_ALLOCATOR_BOUNDARY),
            io_modes: IoMode::ALL.to_vec(),
            access_hints: AccessHint::ALL.to_vec(),
            internal_buffer_choices: vec![false],
        }
    }

    /// Replaces the file sizes.
    #[must_use]
    pub fn with_file_sizes(mut self, sizes: impl IntoIterator<Item = u64>) -> Self {
        self.file_sizes = sizes.into_iter().collect();
        self
    }

    /// Replaces the buffer sizes. The allocator boundary, if set, is still added.
    #[must_use]
    pub fn with_buffer_sizes(mut self, sizes: impl IntoIterator<Item = usize>) -> Self {
        self.buffer_sizes = sizes.into_iter().collect();
        self
    }

    /// Sets the allocator size-class boundary appended to the buffer sizes, or `None` to
    /// leave it out.
    #[must_use]
    pub fn with_allocator_boundary(mut self, boundary: Option<usize>) -> Self {
        self.allocator_boundary = boundary;
        self
    }

    /// Replaces the I/O modes.
    #[must_use]
    pub fn with_io_modes(mut self, modes: impl IntoIterator<Item = IoMode>) -> Self {
        self.io_modes = modes.into_iter().collect();
        self
    }

    /// Replaces the access hints.
    #[must_use]
    pub fn with_access_hints(mut self, hints: impl IntoIterator<Item = AccessHint>) -> Self {
        self.access_hints = hints.into_iter().collect();
        self
    }

    /// Also runs every combination with the default internal buffer size.
    #[must_use]
    pub fn with_default_internal_buffer_variant(mut self, enabled: bool) -> Self {
        self.internal_buffer_choices = if enabled { vec![false, true] } else { vec![false] };
        self
    }

    /// The allocator boundary buffer size, if any.
    #[must_use]
    pub const fn allocator_boundary(&self) -> Option<usize> {
        self.allocator_boundary
    }

    /// All buffer sizes the matrix uses, including the allocator boundary.
    #[must_use]
    pub fn buffer_sizes(&self) -> Vec<usize> {
        let mut sizes = self.buffer_sizes.clone();
        if let Some(boundary) = self.allocator_boundary
            && !sizes.contains(&boundary)
        {
            sizes.push(boundary);
        }
        sizes
    }

    /// Enumerates every cell, file size outermost.
    pub fn cells(&self) -> impl Iterator<Item = MatrixCell> + '_ {
        let buffer_sizes = self.buffer_sizes();
        self.file_sizes.iter().flat_map(move |&file_size| {
            let buffer_sizes = buffer_sizes.clone();
            buffer_sizes.into_iter().flat_map(move |buffer_size| {
                self.io_modes.iter().flat_map(move |&io_mode| {
                    self.access_hints.iter().flat_map(move |&access_hint| {
                        self.internal_buffer_choices.iter().map(move |&use_default| {
                            MatrixCell::new(file_size, buffer_size, io_mode, access_hint, use_default)
                        })
                    })
                })
            })
        })
    }

    /// Number of cells [`cells`](Self::cells) yields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.file_sizes.len()
            * self.buffer_sizes().len()
            * self.io_modes.len()
            * self.access_hints.len()
            * self.internal_buffer_choices.len()
    }

    /// Whether the matrix has no cells.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for Matrix {
    fn default() -> Self {
        Self::standard()
    }
}

/// The result of one read-loop case.
#[derive(Debug)]
pub struct CellReport {
    cell: MatrixCell,
    outcome: Result<LoopSummary>,
    elapsed: Duration,
}

impl CellReport {
    /// The parameters the case ran with.
    #[must_use]
    pub const fn cell(&self) -> &MatrixCell {
        &self.cell
    }

    /// What the driver returned.
    #[must_use]
    pub const fn outcome(&self) -> &Result<LoopSummary> {
        &self.outcome
    }

    /// Wall-clock time spent in the driver, excluding fixture setup and cleanup.
    #[must_use]
    pub const fn elapsed(&self) -> Duration {
        self.elapsed
    }

    /// Whether the driver succeeded.
    #[must_use]
    pub const fn passed(&self) -> bool {
        self.outcome.is_ok()
    }
}

/// The result of one completion-verifier case.
#[derive(Debug)]
pub struct VerdictReport {
    file_size: usize,
    outcome: Result<()>,
    elapsed: Duration,
}

impl VerdictReport {
    /// Size of the verified file.
    #[must_use]
    pub const fn file_size(&self) -> usize {
        self.file_size
    }

    /// `Ok` if every assertion held.
    #[must_use]
    pub const fn outcome(&self) -> &Result<()> {
        &self.outcome
    }

    /// Wall-clock time spent in the verifier, including its fixture.
    #[must_use]
    pub const fn elapsed(&self) -> Duration {
        self.elapsed
    }

    /// Whether the verifier passed.
    #[must_use]
    pub const fn passed(&self) -> bool {
        self.outcome.is_ok()
    }
}

/// Runs matrix cells one after another in a working directory.
///
/// Each case gets its own fixture, deleted when the case ends. A failing case is recorded
/// and the runner moves on to the next one.
#[derive(Clone, Debug)]
pub struct MatrixRunner {
    dir: PathBuf,
    content: FixtureContent,
}

impl MatrixRunner {
    /// Creates a runner that places fixtures in `dir`.
    #[must_use]
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            content: FixtureContent::Deterministic,
        }
    }

    /// Sets how fixture content is generated.
    #[must_use]
    pub fn with_content(mut self, content: FixtureContent) -> Self {
        self.content = content;
        self
    }

    /// Runs one read-loop case.
    pub async fn run_cell(&self, cell: MatrixCell) -> CellReport {
        let (outcome, elapsed) = match self.prepare(&cell) {
            Ok(fixture) => {
                let config = cell.stream_config(fixture.path());
                let driver = ReadLoopDriver::new(cell.buffer_size());
                let start = Instant::now();
                let outcome = driver.run(&config, fixture.size()).await;
                (outcome, start.elapsed())
            }
            Err(e) => (Err(e), Duration::ZERO),
        };

        match &outcome {
            Ok(summary) => event!(
                Level::DEBUG,
                message = "cell passed",
                cell = %cell,
                bytes = summary.bytes_read(),
                calls = summary.read_calls(),
                elapsed_us = elapsed.as_micros()
            ),
            Err(e) => event!(Level::WARN, message = "cell failed", cell = %cell, error = %e),
        }

        CellReport { cell, outcome, elapsed }
    }

    /// Runs every cell of `matrix`, in order, and reports each one.
    pub async fn run_matrix(&self, matrix: &Matrix) -> Vec<CellReport> {
        let mut reports = Vec::with_capacity(matrix.len());
        for cell in matrix.cells() {
            reports.push(self.run_cell(cell).await);
        }
        reports
    }

    /// Runs the completion verifier once for each file size.
    pub async fn run_completion(&self, sizes: &[usize], config: VerifierConfig) -> Vec<VerdictReport> {
        let mut reports = Vec::with_capacity(sizes.len());
        for &file_size in sizes {
            let start = Instant::now();
            let outcome = CompletionVerifier::new(&self.dir, file_size, config.with_content(self.content))
                .run()
                .await;
            reports.push(VerdictReport {
                file_size,
                outcome,
                elapsed: start.elapsed(),
            });
        }
        reports
    }

    fn prepare(&self, cell: &MatrixCell) -> Result<Fixture> {
        let size = usize::try_from(cell.file_size())
            .map_err(|_| Error::InvalidConfig(format!("file size {} does not fit in memory", cell.file_size())))?;
        Ok(Fixture::generate(&self.dir, &fixture_name(cell), size, self.content)?)
    }
}

#[cfg(test)]
mod tests {
    use futures::executor::block_on;

    use super::*;

    #[test]
    fn standard_matrix_matches_benchmark_parameters() {
        let matrix = Matrix::standard();

        assert_eq!(matrix.buffer_sizes().len(), 9);
        assert_eq!(matrix.buffer_sizes().last(), Some(&DEFAULT_ALLOCATOR_BOUNDARY));
        assert_eq!(matrix.len(), 13 * 9 * 2 * 2);
        assert_eq!(matrix.cells().count(), matrix.len());
    }

    #[test]
    fn allocator_boundary_is_configurable() {
        let matrix = Matrix::standard().with_buffer_sizes([4096]).with_allocator_boundary(Some(131_072));
        assert_eq!(matrix.buffer_sizes(), vec![4096, 131_072]);

        let matrix = matrix.with_allocator_boundary(None);
        assert_eq!(matrix.buffer_sizes(), vec![4096]);
    }

    #[test]
    fn boundary_is_not_duplicated() {
        let matrix = Matrix::standard().with_buffer_sizes([DEFAULT_ALLOCATOR_BOUNDARY]);
        assert_eq!(matrix.buffer_sizes(), vec![DEFAULT_ALLOCATOR_BOUNDARY]);
    }

    #[test]
    fn cells_are_unique() {
        let matrix = Matrix::standard().with_default_internal_buffer_variant(true);
        let cells: std::collections::HashSet<_> = matrix.cells().collect();

        assert_eq!(cells.len(), matrix.len());
    }

    #[test]
    fn internal_buffer_follows_cell_choice() {
        let matched = MatrixCell::new(100, 8192, IoMode::Blocking, AccessHint::Default, false);
        let default = MatrixCell::new(100, 8192, IoMode::Blocking, AccessHint::Default, true);

        assert_eq!(matched.internal_buffer_size(), 8192);
        assert_eq!(default.internal_buffer_size(), DEFAULT_INTERNAL_BUFFER_SIZE);
        assert_eq!(default.to_string(), "100/8192/blocking/default/default-internal");
    }

    #[test]
    fn empty_dimension_means_empty_matrix() {
        let matrix = Matrix::standard().with_io_modes([]);

        assert!(matrix.is_empty());
        assert_eq!(matrix.cells().count(), 0);
    }

    #[test]
    fn runner_reports_each_cell_and_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let runner = MatrixRunner::new(dir.path());
        let matrix = Matrix::standard()
            .with_file_sizes([0, 100, 5000])
            .with_buffer_sizes([512])
            .with_allocator_boundary(None)
            .with_default_internal_buffer_variant(true);

        let reports = block_on(runner.run_matrix(&matrix));

        assert_eq!(reports.len(), 3 * 2 * 2 * 2);
        for report in &reports {
            let summary = report.outcome().as_ref().unwrap();
            assert_eq!(summary.bytes_read(), report.cell().file_size());
        }
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn failing_cell_does_not_stop_the_run() {
        let dir = tempfile::tempdir().unwrap();
        let runner = MatrixRunner::new(dir.path().join("absent"));
        let matrix = Matrix::standard()
            .with_file_sizes([10, 20])
            .with_buffer_sizes([512])
            .with_allocator_boundary(None)
            .with_io_modes([IoMode::Blocking])
            .with_access_hints([AccessHint::Default]);

        let reports = block_on(runner.run_matrix(&matrix));

        assert_eq!(reports.len(), 2);
        assert!(reports.iter().all(|r| matches!(r.outcome(), Err(Error::Io(_)))));
    }

    #[test]
    fn completion_suite_reports_verdicts() {
        let dir = tempfile::tempdir().unwrap();
        let runner = MatrixRunner::new(dir.path()).with_content(FixtureContent::Random);

        let reports = block_on(runner.run_completion(&[100, 4096, 80_000], VerifierConfig::default()));

        assert_eq!(reports.len(), 3);
        assert!(reports.iter().all(VerdictReport::passed));
    }
}
