// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use futures::FutureExt;
use tracing::{Level, event};

use crate::fixture::{Fixture, FixtureContent};
use crate::{AccessHint, Error, IoMode, ReadOutcome, Result, SequentialReader, StreamConfig, VerificationFailure};

/// Internal buffer size the verifier opens its reader with unless configured otherwise.
///
/// This sits just below a common allocator size-class boundary, which is where buffer
/// sizes stop being cheap to allocate on some runtimes.
pub const DEFAULT_VERIFIER_BUFFER_SIZE: usize = 84_075;

static NEXT_RUN: AtomicU64 = AtomicU64::new(0);

/// Settings for a [`CompletionVerifier`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct VerifierConfig {
    internal_buffer_size: usize,
    access_hint: AccessHint,
    content: FixtureContent,
}

impl VerifierConfig {
    /// Sets the reader's internal buffer size. It must be at least the file size.
    #[must_use]
    pub const fn with_internal_buffer_size(mut self, size: usize) -> Self {
        self.internal_buffer_size = size;
        self
    }

    /// Sets the access hint the reader is opened with.
    #[must_use]
    pub const fn with_access_hint(mut self, access_hint: AccessHint) -> Self {
        self.access_hint = access_hint;
        self
    }

    /// Sets how the fixture content is generated.
    #[must_use]
    pub const fn with_content(mut self, content: FixtureContent) -> Self {
        self.content = content;
        self
    }

    /// The reader's internal buffer size.
    #[must_use]
    pub const fn internal_buffer_size(&self) -> usize {
        self.internal_buffer_size
    }
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            internal_buffer_size: DEFAULT_VERIFIER_BUFFER_SIZE,
            access_hint: AccessHint::Default,
            content: FixtureContent::Deterministic,
        }
    }
}

/// Where a [`CompletionVerifier`] is in its protocol.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum VerifierState {
    /// [`CompletionVerifier::run`] has not been called.
    NotStarted,
    /// The fixture file exists on disk.
    FixtureWritten,
    /// The single read request has been issued.
    ReadIssued,
    /// Every assertion held. Terminal.
    Verified,
    /// Something went wrong. Terminal.
    Failed,
}

/// Checks that a small file read through a large internal buffer completes without
/// suspending the caller.
///
/// The verifier writes a fixture of the given size, opens it in
/// [`IoMode::SuspendCapable`] mode and issues one read for the whole file. That read must
/// be ready on its first poll, report [`completed_immediately`](crate::ReadOutcome::completed_immediately),
/// return the file size, and return exactly the bytes written.
///
/// A verifier runs once. Failures are final.
#[derive(Debug)]
pub struct CompletionVerifier {
    dir: PathBuf,
    file_size: usize,
    config: VerifierConfig,
    state: VerifierState,
}

impl CompletionVerifier {
    /// Creates a verifier that places its fixture in `dir`.
    #[must_use]
    pub fn new(dir: impl AsRef<Path>, file_size: usize, config: VerifierConfig) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            file_size,
            config,
            state: VerifierState::NotStarted,
        }
    }

    /// Current protocol state.
    #[must_use]
    pub const fn state(&self) -> VerifierState {
        self.state
    }

    /// Runs the protocol. The fixture is deleted before this returns.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Verification`] naming the violated assertion,
    /// [`Error::InvalidConfig`] if the internal buffer is smaller than the file,
    /// [`Error::VerifierAlreadyRan`] on a second call, and [`Error::Io`] for I/O failures.
    pub async fn run(&mut self) -> Result<()> {
        if self.state != VerifierState::NotStarted {
            return Err(Error::VerifierAlreadyRan);
        }

        let result = self.run_protocol().await;
        self.conclude(result)
    }

    fn conclude(&mut self, result: Result<()>) -> Result<()> {
        self.state = if result.is_ok() {
            VerifierState::Verified
        } else {
            VerifierState::Failed
        };

        match &result {
            Ok(()) => event!(Level::DEBUG, message = "completion verified", size = self.file_size),
            Err(e) => event!(Level::WARN, message = "completion verification failed", size = self.file_size, error = %e),
        }

        result
    }

    /// Unique per verifier within this process, so verifiers can share a directory.
    fn fixture_name(&self) -> String {
        let content = match self.config.content {
            FixtureContent::Deterministic => "det",
            FixtureContent::Random => "rnd",
        };
        format!(
            "seqread-verify-{}-{}-f{}-{}-{content}.blob",
            std::process::id(),
            NEXT_RUN.fetch_add(1, Ordering::Relaxed),
            self.file_size,
            self.config.access_hint,
        )
    }

    async fn run_protocol(&mut self) -> Result<()> {
        if self.file_size > self.config.internal_buffer_size {
            return Err(Error::InvalidConfig(format!(
                "file size {} exceeds internal buffer size {}",
                self.file_size, self.config.internal_buffer_size
            )));
        }

        let name = self.fixture_name();
        let fixture = Fixture::generate(&self.dir, &name, self.file_size, self.config.content)?;
        self.state = VerifierState::FixtureWritten;

        let stream = StreamConfig::new(fixture.path())
            .with_internal_buffer_size(self.config.internal_buffer_size)
            .with_io_mode(IoMode::SuspendCapable)
            .with_access_hint(self.config.access_hint);
        let mut reader = SequentialReader::open(&stream).await?;
        let mut buffer = vec![0_u8; self.file_size];

        self.state = VerifierState::ReadIssued;
        let first_poll = reader.read(&mut buffer, 0, self.file_size).now_or_never().transpose()?;

        check_read(first_poll, &buffer, fixture.content())?;
        Ok(())
    }
}

/// Applies the completion assertions to the result of polling the read once.
///
/// `first_poll` is `None` when the read was still pending after its first poll.
fn check_read(
    first_poll: Option<ReadOutcome>,
    buffer: &[u8],
    expected: &[u8],
) -> std::result::Result<(), VerificationFailure> {
    let outcome = first_poll.ok_or(VerificationFailure::NotImmediate)?;
    if !outcome.completed_immediately() {
        return Err(VerificationFailure::NotImmediate);
    }

    if outcome.bytes_read() != expected.len() {
        return Err(VerificationFailure::ByteCount {
            expected: expected.len(),
            actual: outcome.bytes_read(),
        });
    }

    match first_difference(buffer, expected) {
        Some(offset) => Err(VerificationFailure::ContentMismatch { offset }),
        None => Ok(()),
    }
}

fn first_difference(actual: &[u8], expected: &[u8]) -> Option<usize> {
    actual
        .iter()
        .zip(expected)
        .position(|(a, e)| a != e)
        .or_else(|| (actual.len() != expected.len()).then_some(actual.len().min(expected.len())))
}

#[cfg(test)]
mod tests {
    use futures::executor::block_on;

    use super::*;

    #[test]
    fn small_file_verifies() {
        let dir = tempfile::tempdir().unwrap();
        let mut verifier = CompletionVerifier::new(dir.path(), 100, VerifierConfig::default());
        assert_eq!(verifier.state(), VerifierState::NotStarted);

        block_on(verifier.run()).unwrap();

        assert_eq!(verifier.state(), VerifierState::Verified);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn second_run_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut verifier = CompletionVerifier::new(dir.path(), 10, VerifierConfig::default());
        block_on(verifier.run()).unwrap();

        let again = block_on(verifier.run());

        assert!(matches!(again, Err(Error::VerifierAlreadyRan)));
        assert_eq!(verifier.state(), VerifierState::Verified);
    }

    #[test]
    fn file_larger_than_buffer_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let config = VerifierConfig::default().with_internal_buffer_size(64);
        let mut verifier = CompletionVerifier::new(dir.path(), 65, config);

        let result = block_on(verifier.run());

        assert!(matches!(result, Err(Error::InvalidConfig(_))));
        assert_eq!(verifier.state(), VerifierState::Failed);
    }

    #[test]
    fn missing_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut verifier = CompletionVerifier::new(dir.path().join("absent"), 10, VerifierConfig::default());

        let result = block_on(verifier.run());

        assert!(matches!(result, Err(Error::Io(_))));
        assert_eq!(verifier.state(), VerifierState::Failed);
    }

    #[test]
    fn pending_first_poll_is_not_immediate() {
        assert_eq!(check_read(None, b"abc", b"abc"), Err(VerificationFailure::NotImmediate));
    }

    #[test]
    fn suspended_read_is_not_immediate() {
        let outcome = ReadOutcome::new(3, false);

        assert_eq!(check_read(Some(outcome), b"abc", b"abc"), Err(VerificationFailure::NotImmediate));
    }

    #[test]
    fn short_count_is_a_byte_count_failure() {
        let outcome = ReadOutcome::new(2, true);

        assert_eq!(
            check_read(Some(outcome), b"abc", b"abc"),
            Err(VerificationFailure::ByteCount { expected: 3, actual: 2 })
        );
    }

    #[test]
    fn differing_bytes_are_a_content_mismatch() {
        let outcome = ReadOutcome::new(3, true);

        assert_eq!(
            check_read(Some(outcome), b"abx", b"abc"),
            Err(VerificationFailure::ContentMismatch { offset: 2 })
        );
        assert_eq!(check_read(Some(outcome), b"abc", b"abc"), Ok(()));
    }

    #[test]
    fn verification_failure_ends_in_failed_state() {
        let dir = tempfile::tempdir().unwrap();
        let mut verifier = CompletionVerifier::new(dir.path(), 3, VerifierConfig::default());
        verifier.state = VerifierState::ReadIssued;

        let result = verifier.conclude(Err(VerificationFailure::ByteCount { expected: 3, actual: 2 }.into()));

        assert!(matches!(
            result,
            Err(Error::Verification(VerificationFailure::ByteCount { expected: 3, actual: 2 }))
        ));
        assert_eq!(verifier.state(), VerifierState::Failed);
        assert!(matches!(block_on(verifier.run()), Err(Error::VerifierAlreadyRan)));
    }

    #[test]
    fn fixture_names_differ_between_verifiers() {
        let dir = tempfile::tempdir().unwrap();
        let plain = CompletionVerifier::new(dir.path(), 100, VerifierConfig::default());
        let hinted = CompletionVerifier::new(
            dir.path(),
            100,
            VerifierConfig::default().with_access_hint(AccessHint::Sequential),
        );

        let names = [plain.fixture_name(), plain.fixture_name(), hinted.fixture_name()];

        assert_ne!(names[0], names[1]);
        assert_ne!(names[0], names[2]);
        assert!(names[2].contains("sequential"));
    }

    #[test]
    fn first_difference_finds_mismatch_and_length_gap() {
        assert_eq!(first_difference(b"abc", b"abc"), None);
        assert_eq!(first_difference(b"abd", b"abc"), Some(2));
        assert_eq!(first_difference(b"ab", b"abc"), Some(2));
    }
}
