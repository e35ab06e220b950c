//! Segment backend trait definition.

use crate::error::StorageResult;
use std::io::Read;
use std::sync::Arc;

/// File extension of live segments. Backends only list ids with this extension,
/// so recovery backups (`*.dat.bak`) and lock files stay invisible.
pub const SEGMENT_EXTENSION: &str = "dat";

/// Suffix appended to a segment id when it is backed up before repair.
pub const BACKUP_SUFFIX: &str = ".bak";

/// A segment as reported by [`SegmentBackend::list_segments`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentInfo {
    /// Segment identifier (file or blob name).
    pub id: String,
    /// Current physical length in bytes.
    pub len: u64,
}

/// What to do with a segment that holds no decodable data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanupPolicy {
    /// Delete the segment. Safe when this process is the only reader.
    Delete,
    /// Leave the segment in place and log a warning. Used for shared or
    /// remote storage where other readers may still hold the segment.
    Skip,
}

/// Returns true if `id` names a live segment.
#[must_use]
pub fn is_segment_id(id: &str) -> bool {
    id.rsplit_once('.')
        .is_some_and(|(stem, ext)| !stem.is_empty() && ext == SEGMENT_EXTENSION)
}

/// A writable handle to one segment.
///
/// Writers accept positional page writes. Backends with page-blob semantics
/// reject unaligned writes and writes past the declared capacity.
pub trait SegmentWriter: Send {
    /// Writes `data` at `offset`, replacing whatever was there.
    ///
    /// # Errors
    ///
    /// Returns an error if the write is rejected or an I/O error occurs.
    /// Errors for which [`crate::StorageError::is_transient`] is true may be
    /// retried by the caller.
    fn write_page(&mut self, offset: u64, data: &[u8]) -> StorageResult<()>;

    /// Makes all previous writes durable.
    ///
    /// # Errors
    ///
    /// Returns an error if the sync fails.
    fn sync(&mut self) -> StorageResult<()>;
}

/// A durable store of append-only segments.
///
/// Backends are **opaque byte stores**. They know nothing about frames,
/// versions or streams; the tape store owns all format interpretation.
///
/// # Invariants
///
/// - `list_segments` returns live segments sorted by id
/// - bytes written through a [`SegmentWriter`] are visible to `open_for_read`
///   once `write_page` returns
/// - `delete_all` removes every live segment and every backup
///
/// # Implementors
///
/// - [`super::InMemoryBackend`] - For testing and page-blob emulation
/// - [`super::FileBackend`] - For persistent storage in a directory
pub trait SegmentBackend: Send + Sync {
    /// Creates the segment if it does not exist and opens it for writing.
    ///
    /// `capacity` is the maximum number of bytes the caller will write.
    /// Page-blob style backends preallocate it; file backends ignore it.
    ///
    /// # Errors
    ///
    /// Returns an error if the segment cannot be created.
    fn create_or_open_for_append(
        &self,
        id: &str,
        capacity: u64,
    ) -> StorageResult<Box<dyn SegmentWriter>>;

    /// Lists live segments with their lengths, sorted by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the listing fails.
    fn list_segments(&self) -> StorageResult<Vec<SegmentInfo>>;

    /// Opens a segment for sequential reading from offset 0.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StorageError::SegmentNotFound`] if the segment does not exist.
    fn open_for_read(&self, id: &str) -> StorageResult<Box<dyn Read + Send>>;

    /// Reads a whole segment into memory.
    ///
    /// # Errors
    ///
    /// Returns an error if the segment cannot be opened or read.
    fn read_segment(&self, id: &str) -> StorageResult<Vec<u8>> {
        let mut reader = self.open_for_read(id)?;
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf)?;
        Ok(buf)
    }

    /// Deletes one segment. Deleting a missing segment is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the deletion fails.
    fn delete_segment(&self, id: &str) -> StorageResult<()>;

    /// Deletes every segment and backup.
    ///
    /// # Errors
    ///
    /// Returns an error if any deletion fails.
    fn delete_all(&self) -> StorageResult<()>;

    /// Copies a segment byte-for-byte to a new id, replacing any existing copy.
    ///
    /// # Errors
    ///
    /// Returns an error if the source is missing or the copy fails.
    fn copy_segment(&self, src: &str, dst: &str) -> StorageResult<()>;

    /// Truncates a segment to `len` bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the segment is missing, `len` exceeds its current
    /// length, or the truncation fails.
    fn truncate_segment(&self, id: &str, len: u64) -> StorageResult<()>;

    /// How recovery should treat segments without decodable data.
    fn cleanup_policy(&self) -> CleanupPolicy {
        CleanupPolicy::Delete
    }
}

impl<T: SegmentBackend + ?Sized> SegmentBackend for Arc<T> {
    fn create_or_open_for_append(
        &self,
        id: &str,
        capacity: u64,
    ) -> StorageResult<Box<dyn SegmentWriter>> {
        (**self).create_or_open_for_append(id, capacity)
    }

    fn list_segments(&self) -> StorageResult<Vec<SegmentInfo>> {
        (**self).list_segments()
    }

    fn open_for_read(&self, id: &str) -> StorageResult<Box<dyn Read + Send>> {
        (**self).open_for_read(id)
    }

    fn read_segment(&self, id: &str) -> StorageResult<Vec<u8>> {
        (**self).read_segment(id)
    }

    fn delete_segment(&self, id: &str) -> StorageResult<()> {
        (**self).delete_segment(id)
    }

    fn delete_all(&self) -> StorageResult<()> {
        (**self).delete_all()
    }

    fn copy_segment(&self, src: &str, dst: &str) -> StorageResult<()> {
        (**self).copy_segment(src, dst)
    }

    fn truncate_segment(&self, id: &str, len: u64) -> StorageResult<()> {
        (**self).truncate_segment(id, len)
    }

    fn cleanup_policy(&self) -> CleanupPolicy {
        (**self).cleanup_policy()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn segment_id_filter() {
        assert!(is_segment_id("00000000-2024-01-01-000000.dat"));
        assert!(is_segment_id("a.dat"));
        assert!(!is_segment_id("a.dat.bak"));
        assert!(!is_segment_id("LOCK"));
        assert!(!is_segment_id(".dat"));
    }
}
