//! In-memory segment backend for testing and page-blob emulation.

use crate::backend::{is_segment_id, CleanupPolicy, SegmentBackend, SegmentInfo, SegmentWriter};
use crate::error::{StorageError, StorageResult};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::io::{Cursor, Read};
use std::sync::Arc;

#[derive(Debug, Default)]
struct MemorySegment {
    data: Vec<u8>,
    capacity: u64,
}

type SharedSegment = Arc<RwLock<MemorySegment>>;

/// An in-memory segment backend.
///
/// Two flavours exist:
///
/// - [`InMemoryBackend::new`] grows segments on demand, like files do.
/// - [`InMemoryBackend::paged`] behaves like a cloud page blob: every segment
///   is preallocated (zero-filled) to its capacity, writes must be aligned to
///   the page size and stay within capacity, and recovery skips rather than
///   deletes unreadable segments.
///
/// # Example
///
/// ```rust
/// use tapestore_storage::{InMemoryBackend, SegmentBackend};
///
/// let backend = InMemoryBackend::new();
/// let mut writer = backend.create_or_open_for_append("a.dat", 1024).unwrap();
/// writer.write_page(0, b"hello").unwrap();
/// assert_eq!(backend.read_segment("a.dat").unwrap(), b"hello");
/// ```
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    segments: RwLock<BTreeMap<String, SharedSegment>>,
    page_size: Option<usize>,
}

impl InMemoryBackend {
    /// Creates a new empty backend with growable segments.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new empty backend with page-blob semantics.
    ///
    /// # Panics
    ///
    /// Panics if `page_size` is zero.
    #[must_use]
    pub fn paged(page_size: usize) -> Self {
        assert!(page_size > 0, "page size must be positive");
        Self {
            segments: RwLock::new(BTreeMap::new()),
            page_size: Some(page_size),
        }
    }

    /// Inserts a segment with pre-existing contents.
    ///
    /// Useful for testing recovery scenarios.
    pub fn insert_segment(&self, id: &str, data: Vec<u8>) {
        let capacity = data.len() as u64;
        self.segments.write().insert(
            id.to_string(),
            Arc::new(RwLock::new(MemorySegment { data, capacity })),
        );
    }

    /// Returns a copy of a segment's bytes, including backups.
    #[must_use]
    pub fn segment_data(&self, id: &str) -> Option<Vec<u8>> {
        self.segments.read().get(id).map(|s| s.read().data.clone())
    }

    /// Returns every stored id, including backups.
    #[must_use]
    pub fn ids(&self) -> Vec<String> {
        self.segments.read().keys().cloned().collect()
    }

    fn get(&self, id: &str) -> StorageResult<SharedSegment> {
        self.segments
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| StorageError::SegmentNotFound(id.to_string()))
    }
}

impl SegmentBackend for InMemoryBackend {
    fn create_or_open_for_append(
        &self,
        id: &str,
        capacity: u64,
    ) -> StorageResult<Box<dyn SegmentWriter>> {
        let mut segments = self.segments.write();
        let segment = segments
            .entry(id.to_string())
            .or_insert_with(|| {
                let segment = match self.page_size {
                    // Page blobs are allocated up front and read back as zeros.
                    Some(page) => {
                        let capacity = round_up(capacity, page as u64);
                        MemorySegment {
                            data: vec![0u8; capacity as usize],
                            capacity,
                        }
                    }
                    None => MemorySegment {
                        data: Vec::new(),
                        capacity,
                    },
                };
                Arc::new(RwLock::new(segment))
            })
            .clone();

        Ok(Box::new(MemorySegmentWriter {
            segment,
            page_size: self.page_size,
        }))
    }

    fn list_segments(&self) -> StorageResult<Vec<SegmentInfo>> {
        Ok(self
            .segments
            .read()
            .iter()
            .filter(|(id, _)| is_segment_id(id))
            .map(|(id, segment)| SegmentInfo {
                id: id.clone(),
                len: segment.read().data.len() as u64,
            })
            .collect())
    }

    fn open_for_read(&self, id: &str) -> StorageResult<Box<dyn Read + Send>> {
        let data = self.get(id)?.read().data.clone();
        Ok(Box::new(Cursor::new(data)))
    }

    fn read_segment(&self, id: &str) -> StorageResult<Vec<u8>> {
        Ok(self.get(id)?.read().data.clone())
    }

    fn delete_segment(&self, id: &str) -> StorageResult<()> {
        self.segments.write().remove(id);
        Ok(())
    }

    fn delete_all(&self) -> StorageResult<()> {
        self.segments.write().clear();
        Ok(())
    }

    fn copy_segment(&self, src: &str, dst: &str) -> StorageResult<()> {
        let source = self.get(src)?;
        let copy = {
            let source = source.read();
            MemorySegment {
                data: source.data.clone(),
                capacity: source.capacity,
            }
        };
        self.segments
            .write()
            .insert(dst.to_string(), Arc::new(RwLock::new(copy)));
        Ok(())
    }

    fn truncate_segment(&self, id: &str, len: u64) -> StorageResult<()> {
        let segment = self.get(id)?;
        let mut segment = segment.write();
        let current = segment.data.len() as u64;

        if len > current {
            return Err(StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("cannot truncate {id} to {len} bytes, current size is {current}"),
            )));
        }

        segment.data.truncate(len as usize);
        Ok(())
    }

    fn cleanup_policy(&self) -> CleanupPolicy {
        match self.page_size {
            Some(_) => CleanupPolicy::Skip,
            None => CleanupPolicy::Delete,
        }
    }
}

struct MemorySegmentWriter {
    segment: SharedSegment,
    page_size: Option<usize>,
}

impl SegmentWriter for MemorySegmentWriter {
    fn write_page(&mut self, offset: u64, data: &[u8]) -> StorageResult<()> {
        let mut segment = self.segment.write();

        if let Some(page_size) = self.page_size {
            if offset % page_size as u64 != 0 || data.len() % page_size != 0 {
                return Err(StorageError::Misaligned {
                    offset,
                    len: data.len(),
                    page_size,
                });
            }
            if offset + data.len() as u64 > segment.capacity {
                return Err(StorageError::CapacityExceeded {
                    offset,
                    len: data.len(),
                    capacity: segment.capacity,
                });
            }
        }

        let start = offset as usize;
        let end = start + data.len();
        if segment.data.len() < end {
            segment.data.resize(end, 0);
        }
        segment.data[start..end].copy_from_slice(data);
        Ok(())
    }

    fn sync(&mut self) -> StorageResult<()> {
        // Nothing is buffered outside the shared vector
        Ok(())
    }
}

fn round_up(value: u64, multiple: u64) -> u64 {
    value.div_ceil(multiple) * multiple
}
