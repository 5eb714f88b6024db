// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! Buffered sequential file reads, in blocking and suspend-capable I/O modes.
//!
//! This crate measures and verifies how a buffered reader behaves when a file is consumed
//! front to back in fixed-size chunks. It has three parts:
//!
//! 1. **[`SequentialReader`]**, a reader that keeps an internal buffer between the caller and
//!    the file. In [`IoMode::Blocking`] device reads run on the calling thread. In
//!    [`IoMode::SuspendCapable`] they run on a [`Dispatcher`] thread pool and the calling
//!    task may suspend while they are in flight. A read that can be served from the
//!    internal buffer always completes without suspending.
//!
//! 2. **[`ReadLoopDriver`]**, which reads a whole file through a reader and reports how many
//!    bytes and read calls it took, failing with [`Error::ShortRead`] if the file ends early.
//!
//! 3. **[`CompletionVerifier`]**, which checks that a file no larger than the internal
//!    buffer is returned by one read that is ready on its first poll.
//!
//! [`Matrix`] and [`MatrixRunner`] enumerate and run the parameter grid these are measured
//! over, with each case reading its own [`fixture::Fixture`] file.
//!
//! # Quick start
//!
//! ```no_run
//! # async fn example() -> seqread::Result<()> {
//! use seqread::{IoMode, ReadLoopDriver, StreamConfig};
//!
//! let config = StreamConfig::new("/tmp/data.bin")
//!     .with_internal_buffer_size(8192)
//!     .with_io_mode(IoMode::SuspendCapable);
//!
//! let summary = ReadLoopDriver::new(8192).run(&config, 1_048_576).await?;
//! println!("{} bytes in {} calls", summary.bytes_read(), summary.read_calls());
//! # Ok(())
//! # }
//! ```
//!
//! # Reading directly
//!
//! ```no_run
//! # async fn example() -> seqread::Result<()> {
//! use seqread::{SequentialReader, StreamConfig};
//!
//! let mut reader = SequentialReader::open(&StreamConfig::new("/tmp/data.bin")).await?;
//! let mut buffer = [0_u8; 512];
//! let len = buffer.len();
//!
//! loop {
//!     let outcome = reader.read(&mut buffer, 0, len).await?;
//!     if outcome.bytes_read() == 0 {
//!         break;
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub use crate::config::{AccessHint, AccessMode, DEFAULT_INTERNAL_BUFFER_SIZE, IoMode, StreamConfig};
pub use crate::dispatcher::{DispatchFuture, Dispatcher, ScopedDispatchFuture};
pub use crate::driver::{LoopSummary, ReadLoopDriver};
pub use crate::error::{Error, Result, VerificationFailure};
pub use crate::matrix::{
    COMPLETION_FILE_SIZES, CellReport, DEFAULT_ALLOCATOR_BOUNDARY, Matrix, MatrixCell, MatrixRunner, STANDARD_BUFFER_SIZES,
    STANDARD_FILE_SIZES, VerdictReport,
};
pub use crate::reader::{ReadOutcome, SequentialReader};
pub use crate::verifier::{CompletionVerifier, DEFAULT_VERIFIER_BUFFER_SIZE, VerifierConfig, VerifierState};

pub mod fixture;

mod config;
mod dispatcher;
mod driver;
mod error;
mod hint;
mod matrix;
mod reader;
mod verifier;
