// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use thiserror::Error;

/// Any error that may arise while reading, driving or verifying a fixture file.
///
/// The harness performs no internal recovery. Every error is handed back to the caller,
/// which decides whether to fail the whole run or only the current matrix cell.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// We are forwarding an error received from the standard library's I/O APIs.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// The file ended before the expected number of bytes was read.
    ///
    /// This indicates a mismatch between the fixture on disk and what the driver was told
    /// to expect, for example a fixture that was truncated after creation.
    #[error("end of stream after {actual} bytes, expected {expected}")]
    ShortRead {
        /// The number of bytes the driver was told to expect.
        expected: u64,
        /// The number of bytes read before the stream ended.
        actual: u64,
    },

    /// One of the completion verifier's assertions failed.
    #[error("completion verification failed: {0}")]
    Verification(#[from] VerificationFailure),

    /// A read request pointed outside the caller's buffer.
    #[error("read request of {length} bytes at offset {offset} exceeds buffer capacity {capacity}")]
    InvalidRequest {
        /// Offset into the caller's buffer.
        offset: usize,
        /// Number of bytes requested.
        length: usize,
        /// Length of the caller's buffer.
        capacity: usize,
    },

    /// A configuration value cannot be used to open a reader or run a case.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A completion verifier was asked to run a second time.
    #[error("completion verifier has already run")]
    VerifierAlreadyRan,
}

/// The specific assertion a completion verifier found to be violated.
#[derive(Clone, Copy, Debug, Error, Eq, PartialEq)]
#[non_exhaustive]
pub enum VerificationFailure {
    /// The read suspended the caller instead of completing from the internal buffer.
    #[error("read did not complete immediately")]
    NotImmediate,

    /// The read returned a different number of bytes than the file holds.
    #[error("read returned {actual} bytes, expected {expected}")]
    ByteCount {
        /// Size of the fixture file.
        expected: usize,
        /// Bytes reported by the read.
        actual: usize,
    },

    /// The bytes read differ from the bytes written.
    #[error("content differs from fixture at offset {offset}")]
    ContentMismatch {
        /// Offset of the first differing byte.
        offset: usize,
    },
}

/// A specialized `Result` for harness operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Represents a harness error as a standard I/O error, for callers that only speak `std::io`.
impl From<Error> for std::io::Error {
    fn from(value: Error) -> Self {
        match value {
            Error::Io(error) => error,
            Error::ShortRead { .. } => Self::new(std::io::ErrorKind::UnexpectedEof, value),
            Error::InvalidRequest { .. } | Error::InvalidConfig(_) => Self::new(std::io::ErrorKind::InvalidInput, value),
            _ => Self::other(value),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::ErrorKind;

    use super::*;

    #[test]
    fn io_error_round_trips() {
        let original = std::io::Error::new(ErrorKind::PermissionDenied, "nope");
        let error: Error = original.into();
        let back: std::io::Error = error.into();

        assert_eq!(back.kind(), ErrorKind::PermissionDenied);
    }

    #[test]
    fn short_read_maps_to_unexpected_eof() {
        let error = Error::ShortRead { expected: 10, actual: 4 };
        assert_eq!(error.to_string(), "end of stream after 4 bytes, expected 10");

        let io: std::io::Error = error.into();
        assert_eq!(io.kind(), ErrorKind::UnexpectedEof);
    }

    #[test]
    fn verification_failure_names_the_assertion() {
        let error: Error = VerificationFailure::ContentMismatch { offset: 7 }.into();
        assert_eq!(
            error.to_string(),
            "completion verification failed: content differs from fixture at offset 7"
        );
    }
}
