// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use tracing::{Level, event};

use crate::dispatcher::Dispatcher;
use crate::{Error, Result, SequentialReader, StreamConfig};

/// What a completed read loop observed.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct LoopSummary {
    bytes_read: u64,
    read_calls: u64,
}

impl LoopSummary {
    /// Total bytes read across all calls.
    #[must_use]
    pub const fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    /// Number of read calls issued, including a final short one.
    #[must_use]
    pub const fn read_calls(&self) -> u64 {
        self.read_calls
    }
}

/// Reads a file front to back through a [`SequentialReader`], one caller buffer at a time.
///
/// Each run opens exactly one reader and drops it on every exit path. The caller buffer is
/// allocated once per run and reused for every read call.
#[derive(Clone, Debug)]
pub struct ReadLoopDriver {
    buffer_size: usize,
    dispatcher: Option<Dispatcher>,
}

impl ReadLoopDriver {
    /// Creates a driver whose read calls request `buffer_size` bytes each.
    #[must_use]
    pub const fn new(buffer_size: usize) -> Self {
        Self {
            buffer_size,
            dispatcher: None,
        }
    }

    /// Routes suspend-capable device reads to `dispatcher` instead of the shared pool.
    #[must_use]
    pub fn with_dispatcher(mut self, dispatcher: Dispatcher) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    /// Size of each read request.
    #[must_use]
    pub const fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// Reads until `expected_size` bytes have been consumed and returns what was seen.
    ///
    /// At least one read call is always issued, so an empty file costs one call that
    /// returns zero.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] for a zero buffer size, [`Error::ShortRead`] if the
    /// file ends before `expected_size` bytes, and any error from opening or reading.
    pub async fn run(&self, config: &StreamConfig, expected_size: u64) -> Result<LoopSummary> {
        if self.buffer_size == 0 {
            return Err(Error::InvalidConfig("read buffer size must be greater than zero".to_owned()));
        }

        let dispatcher = match &self.dispatcher {
            Some(dispatcher) => dispatcher,
            None => Dispatcher::shared(),
        };
        let mut reader = SequentialReader::open_with_dispatcher(config, dispatcher).await?;
        let mut buffer = vec![0_u8; self.buffer_size];

        let mut total_read: u64 = 0;
        let mut read_calls: u64 = 0;
        loop {
            let outcome = reader.read(&mut buffer, 0, self.buffer_size).await?;
            read_calls += 1;

            let n = outcome.bytes_read() as u64;
            total_read += n;

            if total_read >= expected_size {
                break;
            }

            if n == 0 {
                event!(
                    Level::DEBUG,
                    message = "stream ended early",
                    path = %config.path().display(),
                    expected = expected_size,
                    actual = total_read
                );
                return Err(Error::ShortRead {
                    expected: expected_size,
                    actual: total_read,
                });
            }
        }

        Ok(LoopSummary {
            bytes_read: total_read,
            read_calls,
        })
    }

    /// Runs [`run`](Self::run) to completion on the current thread.
    ///
    /// Suspend-capable reads still execute on the dispatcher; this thread parks while
    /// they are in flight.
    ///
    /// # Errors
    ///
    /// Same as [`run`](Self::run).
    pub fn run_blocking(&self, config: &StreamConfig, expected_size: u64) -> Result<LoopSummary> {
        futures::executor::block_on(self.run(config, expected_size))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::{Fixture, FixtureContent};
    use crate::{AccessHint, IoMode};

    #[test]
    fn reads_exactly_the_file_size() {
        let dir = tempfile::tempdir().unwrap();
        let fixture = Fixture::generate(dir.path(), "loop.blob", 10_000, FixtureContent::Random).unwrap();

        for mode in IoMode::ALL {
            for hint in AccessHint::ALL {
                let config = StreamConfig::new(fixture.path())
                    .with_internal_buffer_size(1024)
                    .with_io_mode(mode)
                    .with_access_hint(hint);
                let summary = ReadLoopDriver::new(1024).run_blocking(&config, 10_000).unwrap();
                assert_eq!(summary.bytes_read(), 10_000);
                assert_eq!(summary.read_calls(), 10);
            }
        }
    }

    #[test]
    fn zero_buffer_size_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let fixture = Fixture::generate(dir.path(), "zero.blob", 10, FixtureContent::Deterministic).unwrap();
        let config = StreamConfig::new(fixture.path());

        let result = ReadLoopDriver::new(0).run_blocking(&config, 10);

        assert!(matches!(result, Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn truncated_file_fails_fast() {
        let dir = tempfile::tempdir().unwrap();
        let fixture = Fixture::generate(dir.path(), "trunc.blob", 5000, FixtureContent::Deterministic).unwrap();
        fixture.truncate(3000).unwrap();
        let config = StreamConfig::new(fixture.path());

        let result = ReadLoopDriver::new(512).run_blocking(&config, fixture.size());

        assert!(matches!(
            result,
            Err(Error::ShortRead {
                expected: 5000,
                actual: 3000
            })
        ));
    }

    #[test]
    fn explicit_dispatcher_is_used() {
        let dir = tempfile::tempdir().unwrap();
        let fixture = Fixture::generate(dir.path(), "own.blob", 4096, FixtureContent::Deterministic).unwrap();
        let config = StreamConfig::new(fixture.path()).with_io_mode(IoMode::SuspendCapable);

        let driver = ReadLoopDriver::new(512).with_dispatcher(Dispatcher::new());
        let summary = driver.run_blocking(&config, 4096).unwrap();

        assert_eq!(summary.bytes_read(), 4096);
    }
}
