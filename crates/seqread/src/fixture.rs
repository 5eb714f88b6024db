// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Creation and cleanup of the files the harness reads.
//!
//! A [`Fixture`] owns its file for the lifetime of one case and deletes it when dropped,
//! whichever way the case ends.

use std::fs::OpenOptions;
use std::io::{ErrorKind, Result};
use std::path::{Path, PathBuf};

use tracing::{Level, event};

use crate::MatrixCell;

/// How fixture bytes are produced.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum FixtureContent {
    /// `bytes[i] = i mod 255`.
    #[default]
    Deterministic,

    /// Bytes from a fast non-cryptographic generator.
    Random,
}

/// Produces `size` bytes of fixture content.
#[must_use]
#[expect(clippy::cast_possible_truncation, reason = "the modulo keeps the value within u8")]
pub fn generate(size: usize, content: FixtureContent) -> Vec<u8> {
    match content {
        FixtureContent::Deterministic => (0..size).map(|i| (i % usize::from(u8::MAX)) as u8).collect(),
        FixtureContent::Random => {
            let mut bytes = vec![0; size];
            fastrand::fill(&mut bytes);
            bytes
        }
    }
}

/// Creates or replaces the file at `path` with `bytes`.
///
/// # Errors
///
/// Returns any error from creating or writing the file.
pub fn write(path: impl AsRef<Path>, bytes: &[u8]) -> Result<()> {
    std::fs::write(path, bytes)
}

/// Deletes the file at `path`. A file that does not exist is not an error.
///
/// # Errors
///
/// Returns any error other than [`ErrorKind::NotFound`].
pub fn delete(path: impl AsRef<Path>) -> Result<()> {
    match std::fs::remove_file(path) {
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        result => result,
    }
}

/// A file name unique to one matrix cell within this process.
///
/// Cells that run side by side in the same directory never collide, and neither do two
/// harness processes sharing a working directory.
#[must_use]
pub fn fixture_name(cell: &MatrixCell) -> String {
    format!(
        "seqread-{}-f{}-b{}-{}-{}-{}.blob",
        std::process::id(),
        cell.file_size(),
        cell.buffer_size(),
        cell.io_mode(),
        cell.access_hint(),
        if cell.use_default_internal_buffer_size() { "dflt" } else { "match" },
    )
}

/// A file that exists for the duration of one case.
///
/// The file is deleted when the fixture is dropped.
#[derive(Debug)]
pub struct Fixture {
    path: PathBuf,
    content: Vec<u8>,
}

impl Fixture {
    /// Writes `content` to `dir/name` and takes ownership of the file.
    ///
    /// # Errors
    ///
    /// Returns any error from writing the file. Nothing is left behind on failure.
    pub fn create(dir: impl AsRef<Path>, name: &str, content: Vec<u8>) -> Result<Self> {
        let path = dir.as_ref().join(name);
        // Own the path before writing so a partial write is still cleaned up.
        let fixture = Self { path, content };
        write(&fixture.path, &fixture.content)?;

        event!(
            Level::DEBUG,
            message = "created fixture",
            path = %fixture.path.display(),
            size = fixture.content.len()
        );

        Ok(fixture)
    }

    /// Generates `size` bytes and writes them to `dir/name`.
    ///
    /// # Errors
    ///
    /// Returns any error from writing the file.
    pub fn generate(dir: impl AsRef<Path>, name: &str, size: usize, content: FixtureContent) -> Result<Self> {
        Self::create(dir, name, generate(size, content))
    }

    /// Where the fixture lives.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The bytes that were written.
    ///
    /// After [`truncate`](Self::truncate) this still returns the original content, which is
    /// what a reader was expected to see.
    #[must_use]
    pub fn content(&self) -> &[u8] {
        &self.content
    }

    /// Size of the content that was written.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.content.len() as u64
    }

    /// Shrinks the file on disk to `len` bytes, simulating a fixture damaged after creation.
    ///
    /// # Errors
    ///
    /// Returns any error from opening or resizing the file.
    pub fn truncate(&self, len: u64) -> Result<()> {
        OpenOptions::new().write(true).open(&self.path)?.set_len(len)
    }
}

impl Drop for Fixture {
    fn drop(&mut self) {
        if let Err(e) = delete(&self.path) {
            event!(
                Level::WARN,
                message = "failed to delete fixture",
                path = %self.path.display(),
                error = %e
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{AccessHint, IoMode};

    #[test]
    fn deterministic_content_wraps_at_255() {
        let bytes = generate(600, FixtureContent::Deterministic);

        assert_eq!(bytes.len(), 600);
        assert_eq!(bytes[0], 0);
        assert_eq!(bytes[254], 254);
        assert_eq!(bytes[255], 0);
        assert_eq!(bytes[599], (599 % 255) as u8);
    }

    #[test]
    fn random_content_has_requested_length() {
        assert_eq!(generate(1234, FixtureContent::Random).len(), 1234);
        assert!(generate(0, FixtureContent::Random).is_empty());
    }

    #[test]
    fn fixture_is_deleted_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let fixture = Fixture::generate(dir.path(), "drop.blob", 10, FixtureContent::Deterministic).unwrap();
        let path = fixture.path().to_path_buf();
        assert_eq!(std::fs::read(&path).unwrap(), fixture.content());

        drop(fixture);

        assert!(!path.exists());
    }

    #[test]
    fn fixture_is_deleted_when_case_panics() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("panic.blob");
        let path_clone = path.clone();

        let result = std::panic::catch_unwind(move || {
            let _fixture = Fixture::generate(path_clone.parent().unwrap(), "panic.blob", 10, FixtureContent::Random).unwrap();
            panic!("case failed");
        });

        assert!(result.is_err());
        assert!(!path.exists());
    }

    #[test]
    fn delete_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("twice.blob");
        write(&path, b"x").unwrap();

        delete(&path).unwrap();
        delete(&path).unwrap();
    }

    #[test]
    fn truncate_shrinks_file_but_keeps_expected_content() {
        let dir = tempfile::tempdir().unwrap();
        let fixture = Fixture::generate(dir.path(), "short.blob", 100, FixtureContent::Deterministic).unwrap();

        fixture.truncate(40).unwrap();

        assert_eq!(std::fs::metadata(fixture.path()).unwrap().len(), 40);
        assert_eq!(fixture.size(), 100);
    }

    #[test]
    fn fixture_names_differ_per_cell() {
        let a = MatrixCell::new(100, 512, IoMode::Blocking, AccessHint::Default, false);
        let b = MatrixCell::new(100, 512, IoMode::SuspendCapable, AccessHint::Default, false);
        let c = MatrixCell::new(100, 512, IoMode::Blocking, AccessHint::Default, true);

        assert_ne!(fixture_name(&a), fixture_name(&b));
        assert_ne!(fixture_name(&a), fixture_name(&c));
        assert!(fixture_name(&a).ends_with(".blob"));
    }
}
