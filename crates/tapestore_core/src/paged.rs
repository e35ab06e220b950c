//! Page-aligned buffered writer.
//!
//! Backends with page-blob semantics only accept writes that start and end on
//! a page boundary. The writer buffers appended bytes and, on flush, writes
//! them zero-padded to the next boundary. A partial last page stays buffered
//! and is written again, with more data, on the next flush.
//!
//! ```text
//! flush 1:  [ page 0: frame a | 0 0 0 0 ]            persisted = len(a)
//! flush 2:  [ page 0: frame a | frame b.. ][ page 1: ..b | 0 0 ]
//!           ^ rewritten                                persisted = len(a+b)
//! ```

use crate::error::{CoreError, CoreResult};
use tapestore_storage::{RetryPolicy, SegmentWriter, StorageResult};

/// Destination of page writes.
pub trait PageSink {
    /// Writes whole pages at `offset`.
    ///
    /// # Errors
    ///
    /// Returns the backend error; transient ones are retried by the caller.
    fn write_page(&mut self, offset: u64, data: &[u8]) -> StorageResult<()>;

    /// Makes previous writes durable.
    ///
    /// # Errors
    ///
    /// Returns the backend error.
    fn sync(&mut self) -> StorageResult<()> {
        Ok(())
    }
}

impl<F> PageSink for F
where
    F: FnMut(u64, &[u8]) -> StorageResult<()>,
{
    fn write_page(&mut self, offset: u64, data: &[u8]) -> StorageResult<()> {
        self(offset, data)
    }
}

/// A [`PageSink`] over a backend segment writer.
pub struct SegmentSink {
    writer: Box<dyn SegmentWriter>,
}

impl SegmentSink {
    /// Wraps a backend writer.
    #[must_use]
    pub fn new(writer: Box<dyn SegmentWriter>) -> Self {
        Self { writer }
    }
}

impl PageSink for SegmentSink {
    fn write_page(&mut self, offset: u64, data: &[u8]) -> StorageResult<()> {
        self.writer.write_page(offset, data)
    }

    fn sync(&mut self) -> StorageResult<()> {
        self.writer.sync()
    }
}

/// Buffers writes into page-aligned chunks.
pub struct PagedWriter<S: PageSink> {
    sink: Option<S>,
    page_size: usize,
    max_bytes: u64,
    retry: RetryPolicy,
    pending: Vec<u8>,
    full_pages_flushed: u64,
    persisted_position: u64,
    failed: bool,
}

impl<S: PageSink> PagedWriter<S> {
    /// Creates a writer for an empty segment.
    ///
    /// # Panics
    ///
    /// Panics if `page_size` is zero.
    pub fn new(page_size: usize, max_bytes: u64, sink: S, retry: RetryPolicy) -> Self {
        assert!(page_size > 0, "page size must be positive");
        Self {
            sink: Some(sink),
            page_size,
            max_bytes,
            retry,
            pending: Vec::with_capacity(page_size),
            full_pages_flushed: 0,
            persisted_position: 0,
            failed: false,
        }
    }

    /// Logical bytes accepted so far, flushed or not.
    #[must_use]
    pub fn bytes_written(&self) -> u64 {
        self.full_pages_flushed * self.page_size as u64 + self.pending.len() as u64
    }

    /// Logical bytes known to be on the backend.
    #[must_use]
    pub fn persisted_position(&self) -> u64 {
        self.persisted_position
    }

    /// Whether `byte_count` more bytes fit in the segment.
    #[must_use]
    pub fn fits(&self, byte_count: usize) -> bool {
        self.bytes_written().saturating_add(byte_count as u64) <= self.max_bytes
    }

    fn check_usable(&self) -> CoreResult<()> {
        if self.failed {
            return Err(CoreError::invalid_state("paged writer failed earlier"));
        }
        if self.sink.is_none() {
            return Err(CoreError::invalid_state("paged writer is closed"));
        }
        Ok(())
    }

    /// Buffers bytes. No backend I/O happens until [`PagedWriter::flush`].
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the bytes do not fit, or `InvalidState`
    /// if the writer is closed or failed.
    pub fn write(&mut self, buf: &[u8]) -> CoreResult<()> {
        self.check_usable()?;
        if !self.fits(buf.len()) {
            return Err(CoreError::invalid_argument(format!(
                "{} bytes do not fit: {} of {} bytes used",
                buf.len(),
                self.bytes_written(),
                self.max_bytes
            )));
        }
        self.pending.extend_from_slice(buf);
        Ok(())
    }

    /// Writes pending bytes, zero-padded to a page boundary.
    ///
    /// # Errors
    ///
    /// Returns the sink error once retries are exhausted. The writer is
    /// unusable afterwards.
    pub fn flush(&mut self) -> CoreResult<()> {
        self.check_usable()?;
        if self.pending.is_empty() {
            return Ok(());
        }

        let page_size = self.page_size;
        let pending_len = self.pending.len();
        let padded_len = pending_len.div_ceil(page_size) * page_size;
        let offset = self.full_pages_flushed * page_size as u64;

        self.pending.resize(padded_len, 0);
        let result = match self.sink.as_mut() {
            Some(sink) => {
                let data = &self.pending;
                self.retry.run("write_page", || sink.write_page(offset, data))
            }
            None => Ok(()),
        };
        self.pending.truncate(pending_len);

        if let Err(e) = result {
            self.failed = true;
            return Err(e.into());
        }

        let full_pages = pending_len / page_size;
        self.pending.drain(..full_pages * page_size);
        self.full_pages_flushed += full_pages as u64;
        self.persisted_position =
            self.full_pages_flushed * page_size as u64 + self.pending.len() as u64;

        tracing::trace!(
            offset,
            bytes = padded_len,
            persisted = self.persisted_position,
            "flushed pages"
        );
        Ok(())
    }

    /// Flushes, syncs and releases the sink. Closing twice is a no-op.
    ///
    /// # Errors
    ///
    /// Returns the flush or sync error.
    pub fn close(&mut self) -> CoreResult<()> {
        if self.sink.is_none() {
            return Ok(());
        }
        self.flush()?;
        if let Some(mut sink) = self.sink.take() {
            self.retry.run("sync", || sink.sync())?;
        }
        Ok(())
    }

    /// True once [`PagedWriter::close`] has run.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.sink.is_none()
    }
}
