// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use core::fmt;
use core::num::NonZeroUsize;
use std::path::{Path, PathBuf};

use crate::{Error, Result};

/// Internal buffer size used when the caller does not pick one.
pub const DEFAULT_INTERNAL_BUFFER_SIZE: usize = 4096;

/// How a [`SequentialReader`](crate::SequentialReader) performs device reads.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub enum IoMode {
    /// Device reads run on the calling thread. Read futures never return `Pending`.
    #[default]
    Blocking,

    /// Device reads run on a worker pool and the calling task suspends until they finish.
    ///
    /// Reads that can be served from the internal buffer still complete without suspending.
    SuspendCapable,
}

impl IoMode {
    /// Both modes, in the order the benchmark matrix enumerates them.
    pub const ALL: [Self; 2] = [Self::Blocking, Self::SuspendCapable];

    /// Short, file-name friendly label.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Blocking => "blocking",
            Self::SuspendCapable => "suspend",
        }
    }
}

impl fmt::Display for IoMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.label())
    }
}

/// Advisory information about how the file will be traversed.
///
/// The hint may change throughput but never what a read returns.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub enum AccessHint {
    /// Let the operating system pick its read-ahead strategy.
    #[default]
    Default,

    /// The file is read front to back exactly once.
    Sequential,
}

impl AccessHint {
    /// Both hints, in the order the benchmark matrix enumerates them.
    pub const ALL: [Self; 2] = [Self::Default, Self::Sequential];

    /// Short, file-name friendly label.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::Sequential => "sequential",
        }
    }
}

impl fmt::Display for AccessHint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.label())
    }
}

/// Access requested when opening a stream. Only reading is supported.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub enum AccessMode {
    /// Open the file for reading.
    #[default]
    Read,
}

/// Describes how to open a [`SequentialReader`](crate::SequentialReader).
///
/// ```
/// use seqread::{AccessHint, IoMode, StreamConfig};
///
/// let config = StreamConfig::new("data.blob")
///     .with_internal_buffer_size(84_075)
///     .with_io_mode(IoMode::SuspendCapable)
///     .with_access_hint(AccessHint::Sequential);
///
/// assert_eq!(config.internal_buffer_size(), 84_075);
/// ```
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StreamConfig {
    path: PathBuf,
    mode: AccessMode,
    internal_buffer_size: usize,
    io_mode: IoMode,
    access_hint: AccessHint,
}

impl StreamConfig {
    /// Creates a blocking, default-hinted configuration with the default internal buffer size.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            mode: AccessMode::Read,
            internal_buffer_size: DEFAULT_INTERNAL_BUFFER_SIZE,
            io_mode: IoMode::Blocking,
            access_hint: AccessHint::Default,
        }
    }

    /// Sets the capacity of the reader's internal buffer.
    ///
    /// Zero is accepted here but rejected when the reader is opened.
    #[must_use]
    pub fn with_internal_buffer_size(mut self, size: usize) -> Self {
        self.internal_buffer_size = size;
        self
    }

    /// Sets the I/O mode.
    #[must_use]
    pub fn with_io_mode(mut self, io_mode: IoMode) -> Self {
        self.io_mode = io_mode;
        self
    }

    /// Sets the access-pattern hint.
    #[must_use]
    pub fn with_access_hint(mut self, access_hint: AccessHint) -> Self {
        self.access_hint = access_hint;
        self
    }

    /// Path of the file to open.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Requested access.
    #[must_use]
    pub const fn mode(&self) -> AccessMode {
        self.mode
    }

    /// Capacity of the reader's internal buffer.
    #[must_use]
    pub const fn internal_buffer_size(&self) -> usize {
        self.internal_buffer_size
    }

    /// I/O mode.
    #[must_use]
    pub const fn io_mode(&self) -> IoMode {
        self.io_mode
    }

    /// Access-pattern hint.
    #[must_use]
    pub const fn access_hint(&self) -> AccessHint {
        self.access_hint
    }

    pub(crate) fn validated_buffer_size(&self) -> Result<NonZeroUsize> {
        NonZeroUsize::new(self.internal_buffer_size)
            .ok_or_else(|| Error::InvalidConfig("internal buffer size must be greater than zero".to_owned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_uses_defaults() {
        let config = StreamConfig::new("a.blob");

        assert_eq!(config.path(), Path::new("a.blob"));
        assert_eq!(config.mode(), AccessMode::Read);
        assert_eq!(config.internal_buffer_size(), DEFAULT_INTERNAL_BUFFER_SIZE);
        assert_eq!(config.io_mode(), IoMode::Blocking);
        assert_eq!(config.access_hint(), AccessHint::Default);
    }

    #[test]
    fn zero_buffer_size_is_rejected() {
        let config = StreamConfig::new("a.blob").with_internal_buffer_size(0);

        assert!(matches!(config.validated_buffer_size(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn labels_are_stable() {
        assert_eq!(IoMode::SuspendCapable.to_string(), "suspend");
        assert_eq!(AccessHint::Sequential.to_string(), "sequential");
    }
}
