// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fs::File;
use std::io::{ErrorKind, Read};
use std::sync::Arc;

use tracing::{Level, event};

use crate::dispatcher::Dispatcher;
use crate::{Error, IoMode, Result, StreamConfig};

/// The result of a single [`SequentialReader::read`] call.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ReadOutcome {
    bytes_read: usize,
    completed_immediately: bool,
}

impl ReadOutcome {
    pub(crate) const fn new(bytes_read: usize, completed_immediately: bool) -> Self {
        Self {
            bytes_read,
            completed_immediately,
        }
    }

    /// Number of bytes copied into the caller's buffer. Zero means end of stream.
    #[must_use]
    pub const fn bytes_read(&self) -> usize {
        self.bytes_read
    }

    /// Whether the bytes were already resident in the internal buffer, so that no device
    /// read was needed to produce them.
    #[must_use]
    pub const fn completed_immediately(&self) -> bool {
        self.completed_immediately
    }
}

/// A buffered, forward-only file reader.
///
/// The reader owns an internal buffer whose capacity comes from
/// [`StreamConfig::internal_buffer_size`]. Opening the reader performs the first fill of
/// that buffer, so any read no larger than what the fill produced is served without
/// touching the device again.
///
/// Device reads happen on the calling thread in [`IoMode::Blocking`] and on a worker pool
/// in [`IoMode::SuspendCapable`]. Both modes return identical data.
///
/// ```no_run
/// # async fn example() -> seqread::Result<()> {
/// use seqread::{IoMode, SequentialReader, StreamConfig};
///
/// let config = StreamConfig::new("data.blob")
///     .with_internal_buffer_size(84_075)
///     .with_io_mode(IoMode::SuspendCapable);
/// let mut reader = SequentialReader::open(&config).await?;
///
/// let mut buffer = vec![0_u8; 100];
/// let outcome = reader.read(&mut buffer, 0, 100).await?;
/// assert!(outcome.completed_immediately());
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct SequentialReader {
    source: Source,
    buffer: InternalBuffer,
}

impl SequentialReader {
    /// Opens the configured file and primes the internal buffer.
    ///
    /// Suspend-capable readers use the process-wide [`Dispatcher::shared`] pool.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if the internal buffer size is zero and
    /// [`Error::Io`] if the file cannot be opened or the priming read fails.
    pub async fn open(config: &StreamConfig) -> Result<Self> {
        Self::open_with_dispatcher(config, Dispatcher::shared()).await
    }

    /// Like [`open`](Self::open), but suspend-capable device reads go to `dispatcher`.
    ///
    /// # Errors
    ///
    /// Same as [`open`](Self::open).
    pub async fn open_with_dispatcher(config: &StreamConfig, dispatcher: &Dispatcher) -> Result<Self> {
        let capacity = config.validated_buffer_size()?.get();
        let path = config.path().to_path_buf();
        let hint = config.access_hint();

        let file = match config.io_mode() {
            IoMode::Blocking => crate::hint::open_for_read(&path, hint)?,
            IoMode::SuspendCapable => {
                dispatcher
                    .dispatch(move || crate::hint::open_for_read(&path, hint))
                    .await?
            }
        };

        let mut reader = Self {
            source: Source {
                file: Arc::new(file),
                io_mode: config.io_mode(),
                dispatcher: dispatcher.clone(),
            },
            buffer: InternalBuffer::with_capacity(capacity),
        };
        reader.fill().await?;

        event!(
            Level::DEBUG,
            message = "opened reader",
            path = %config.path().display(),
            capacity,
            io_mode = %config.io_mode(),
            access_hint = %hint,
            primed = reader.buffer.len()
        );

        Ok(reader)
    }

    /// Copies up to `length` bytes from the current position into
    /// `buffer[offset..offset + length]` and advances the position by the number copied.
    ///
    /// Bytes already in the internal buffer are returned without any device read, even
    /// if fewer than `length` are available. Otherwise a request at least as large as the
    /// internal buffer is read straight into `buffer`, and a smaller one refills the
    /// internal buffer first.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRequest`] if `offset + length` exceeds `buffer.len()` and
    /// [`Error::Io`] if the device read fails. Failed reads are not retried.
    pub async fn read(&mut self, buffer: &mut [u8], offset: usize, length: usize) -> Result<ReadOutcome> {
        let capacity = buffer.len();
        let target = offset
            .checked_add(length)
            .and_then(|end| buffer.get_mut(offset..end))
            .ok_or(Error::InvalidRequest {
                offset,
                length,
                capacity,
            })?;

        if target.is_empty() {
            return Ok(ReadOutcome::new(0, true));
        }

        if !self.buffer.is_empty() {
            let n = self.buffer.copy_to(target);
            event!(Level::TRACE, message = "read from buffer", bytes = n);
            return Ok(ReadOutcome::new(n, true));
        }

        if target.len() >= self.buffer.capacity() {
            let n = self.source.read_into(target).await?;
            event!(Level::TRACE, message = "read bypassing buffer", bytes = n);
            return Ok(ReadOutcome::new(n, false));
        }

        self.fill().await?;
        let n = self.buffer.copy_to(target);
        event!(Level::TRACE, message = "read after refill", bytes = n);
        Ok(ReadOutcome::new(n, false))
    }

    /// Capacity of the internal buffer.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.buffer.capacity()
    }

    /// Number of bytes resident in the internal buffer that have not been read yet.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// The I/O mode this reader was opened with.
    #[must_use]
    pub fn io_mode(&self) -> IoMode {
        self.source.io_mode
    }

    async fn fill(&mut self) -> Result<()> {
        let unfilled = self.buffer.reset();
        let n = self.source.read_into(unfilled).await?;
        self.buffer.set_filled(n);
        Ok(())
    }
}

/// Where device reads come from and where they execute.
#[derive(Debug)]
struct Source {
    file: Arc<File>,
    io_mode: IoMode,
    dispatcher: Dispatcher,
}

impl Source {
    async fn read_into(&self, target: &mut [u8]) -> Result<usize> {
        match self.io_mode {
            IoMode::Blocking => Ok(read_once(&self.file, target)?),
            IoMode::SuspendCapable => {
                let file = Arc::clone(&self.file);
                let raw = SendSliceMut::new(target);
                let n = self
                    .dispatcher
                    .dispatch_scoped(move || {
                        // SAFETY: ScopedDispatchFuture guarantees the closure completes
                        // (or never starts) before the caller regains access to `target`.
                        let target = unsafe { raw.into_mut_slice() };
                        read_once(&file, target)
                    })
                    .await?;
                Ok(n)
            }
        }
    }
}

/// Issues one read against the file, repeating it only if a signal interrupted it.
fn read_once(mut file: &File, target: &mut [u8]) -> std::io::Result<usize> {
    loop {
        match file.read(target) {
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            result => return result,
        }
    }
}

/// The reader's own memory, holding bytes fetched from the device but not yet handed out.
///
/// `storage[pos..filled]` is the unread region.
struct InternalBuffer {
    storage: Box<[u8]>,
    pos: usize,
    filled: usize,
}

impl InternalBuffer {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            storage: vec![0; capacity].into_boxed_slice(),
            pos: 0,
            filled: 0,
        }
    }

    fn capacity(&self) -> usize {
        self.storage.len()
    }

    fn len(&self) -> usize {
        self.filled - self.pos
    }

    fn is_empty(&self) -> bool {
        self.pos == self.filled
    }

    /// Copies as many unread bytes as fit into `target`.
    fn copy_to(&mut self, target: &mut [u8]) -> usize {
        let n = self.len().min(target.len());
        target[..n].copy_from_slice(&self.storage[self.pos..self.pos + n]);
        self.pos += n;
        n
    }

    /// Discards any unread bytes and returns the whole storage for refilling.
    fn reset(&mut self) -> &mut [u8] {
        self.pos = 0;
        self.filled = 0;
        &mut self.storage
    }

    fn set_filled(&mut self, n: usize) {
        debug_assert!(n <= self.capacity(), "device read overran the internal buffer");
        self.filled = n;
    }
}

impl std::fmt::Debug for InternalBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InternalBuffer")
            .field("capacity", &self.capacity())
            .field("buffered", &self.len())
            .finish()
    }
}

/// A mutable raw-pointer slice that is [`Send`].
///
/// # Safety
///
/// The caller must guarantee the pointed-to data is alive and exclusively owned for the
/// duration of any cross-thread access. [`ScopedDispatchFuture`](crate::dispatcher::ScopedDispatchFuture)
/// provides that guarantee by blocking on drop.
#[derive(Clone, Copy)]
struct SendSliceMut {
    ptr: *mut u8,
    len: usize,
}

impl SendSliceMut {
    fn new(slice: &mut [u8]) -> Self {
        Self {
            ptr: slice.as_mut_ptr(),
            len: slice.len(),
        }
    }

    /// Reconstructs the original `&mut [u8]`.
    ///
    /// # Safety
    ///
    /// The original slice must still be alive and exclusively owned by the caller.
    unsafe fn into_mut_slice(self) -> &'static mut [u8] {
        // SAFETY: caller guarantees the slice is alive and exclusively owned.
        unsafe { core::slice::from_raw_parts_mut(self.ptr, self.len) }
    }
}

// SAFETY: ScopedDispatchFuture guarantees the data outlives the cross-thread access.
unsafe impl Send for SendSliceMut {}
