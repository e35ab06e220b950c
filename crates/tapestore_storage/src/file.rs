//! Directory-based segment backend for persistent storage.
//!
//! Layout:
//!
//! ```text
//! <store_path>/
//! ├─ LOCK                                  # Advisory lock for single-writer
//! ├─ 00000000-2024-05-01-120000.dat        # Segments, one file each
//! ├─ 00000042-2024-05-01-130512.dat
//! └─ 00000042-2024-05-01-130512.dat.bak    # Backup taken before a repair
//! ```

use crate::backend::{
    is_segment_id, SegmentBackend, SegmentInfo, SegmentWriter, BACKUP_SUFFIX, SEGMENT_EXTENSION,
};
use crate::error::{StorageError, StorageResult};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

const LOCK_FILE: &str = "LOCK";

/// A segment backend storing one file per segment in a directory.
///
/// # Durability
///
/// Every page write is followed by `File::sync_data()`. Creating and deleting
/// segments fsyncs the directory on Unix.
///
/// # Locking
///
/// The backend holds an exclusive advisory lock on `LOCK` for as long as it
/// lives. A second backend on the same directory fails with
/// [`StorageError::Locked`]. [`FileBackend::open_read_only`] takes no lock
/// and refuses every mutation, so inspection tools can run next to a live
/// writer; they may observe a page that is still being written.
///
/// # Example
///
/// ```no_run
/// use tapestore_storage::{FileBackend, SegmentBackend};
/// use std::path::Path;
///
/// let backend = FileBackend::open(Path::new("tape"), true).unwrap();
/// let mut writer = backend.create_or_open_for_append("a.dat", 1 << 20).unwrap();
/// writer.write_page(0, b"persistent data").unwrap();
/// ```
#[derive(Debug)]
pub struct FileBackend {
    path: PathBuf,
    /// `None` for read-only backends.
    lock_file: Option<File>,
}

impl FileBackend {
    /// Opens or creates a store directory and takes its lock.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The directory doesn't exist and `create_if_missing` is false
    /// - Another process holds the lock (returns `Locked`)
    /// - I/O errors occur
    pub fn open(path: &Path, create_if_missing: bool) -> StorageResult<Self> {
        if !path.exists() {
            if create_if_missing {
                fs::create_dir_all(path)?;
            } else {
                return Err(StorageError::Io(io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("store directory does not exist: {}", path.display()),
                )));
            }
        }

        if !path.is_dir() {
            return Err(StorageError::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("path is not a directory: {}", path.display()),
            )));
        }

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.join(LOCK_FILE))?;

        if lock_file.try_lock_exclusive().is_err() {
            return Err(StorageError::Locked);
        }

        Ok(Self {
            path: path.to_path_buf(),
            lock_file: Some(lock_file),
        })
    }

    /// Opens an existing store directory for reading without locking it.
    ///
    /// Creating, deleting, copying and truncating segments fail with
    /// [`StorageError::ReadOnly`].
    ///
    /// # Errors
    ///
    /// Returns an error if the path is missing or not a directory.
    pub fn open_read_only(path: &Path) -> StorageResult<Self> {
        if !path.is_dir() {
            return Err(StorageError::Io(io::Error::new(
                io::ErrorKind::NotFound,
                format!("store directory does not exist: {}", path.display()),
            )));
        }
        Ok(Self {
            path: path.to_path_buf(),
            lock_file: None,
        })
    }

    /// Whether this backend refuses mutations.
    #[must_use]
    pub fn is_read_only(&self) -> bool {
        self.lock_file.is_none()
    }

    fn check_writable(&self) -> StorageResult<()> {
        if self.is_read_only() {
            return Err(StorageError::ReadOnly);
        }
        Ok(())
    }

    /// Returns the store directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn segment_path(&self, id: &str) -> StorageResult<PathBuf> {
        if id.is_empty() || id.contains(['/', '\\']) || id == "." || id == ".." {
            return Err(StorageError::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("invalid segment id: {id:?}"),
            )));
        }
        Ok(self.path.join(id))
    }

    #[cfg(unix)]
    fn sync_directory(&self) -> StorageResult<()> {
        File::open(&self.path)?.sync_all()?;
        Ok(())
    }

    #[cfg(not(unix))]
    fn sync_directory(&self) -> StorageResult<()> {
        Ok(())
    }
}

impl SegmentBackend for FileBackend {
    fn create_or_open_for_append(
        &self,
        id: &str,
        _capacity: u64,
    ) -> StorageResult<Box<dyn SegmentWriter>> {
        self.check_writable()?;
        let path = self.segment_path(id)?;
        let existed = path.exists();

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        if !existed {
            self.sync_directory()?;
        }

        Ok(Box::new(FileSegmentWriter { file }))
    }

    fn list_segments(&self) -> StorageResult<Vec<SegmentInfo>> {
        let mut segments = Vec::new();

        for entry in fs::read_dir(&self.path)? {
            let entry = entry?;
            let Some(id) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if !is_segment_id(&id) {
                continue;
            }
            let metadata = entry.metadata()?;
            if !metadata.is_file() {
                continue;
            }
            segments.push(SegmentInfo {
                id,
                len: metadata.len(),
            });
        }

        segments.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(segments)
    }

    fn open_for_read(&self, id: &str) -> StorageResult<Box<dyn Read + Send>> {
        let path = self.segment_path(id)?;
        match File::open(&path) {
            Ok(file) => Ok(Box::new(io::BufReader::new(file))),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(StorageError::SegmentNotFound(id.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn delete_segment(&self, id: &str) -> StorageResult<()> {
        self.check_writable()?;
        let path = self.segment_path(id)?;
        match fs::remove_file(&path) {
            Ok(()) => self.sync_directory(),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn delete_all(&self) -> StorageResult<()> {
        self.check_writable()?;
        let backup_extension = format!(".{SEGMENT_EXTENSION}{BACKUP_SUFFIX}");
        let mut deleted = 0usize;

        for entry in fs::read_dir(&self.path)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if is_segment_id(name) || name.ends_with(&backup_extension) {
                fs::remove_file(entry.path())?;
                deleted += 1;
            }
        }

        if deleted > 0 {
            self.sync_directory()?;
        }
        Ok(())
    }

    fn copy_segment(&self, src: &str, dst: &str) -> StorageResult<()> {
        self.check_writable()?;
        let src_path = self.segment_path(src)?;
        let dst_path = self.segment_path(dst)?;

        if !src_path.exists() {
            return Err(StorageError::SegmentNotFound(src.to_string()));
        }

        fs::copy(&src_path, &dst_path)?;
        File::open(&dst_path)?.sync_all()?;
        self.sync_directory()
    }

    fn truncate_segment(&self, id: &str, len: u64) -> StorageResult<()> {
        self.check_writable()?;
        let path = self.segment_path(id)?;
        let file = match OpenOptions::new().write(true).open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(StorageError::SegmentNotFound(id.to_string()));
            }
            Err(e) => return Err(e.into()),
        };

        let current = file.metadata()?.len();
        if len > current {
            return Err(StorageError::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("cannot truncate {id} to {len} bytes, current size is {current}"),
            )));
        }

        file.set_len(len)?;
        file.sync_all()?;
        Ok(())
    }
}

#[derive(Debug)]
struct FileSegmentWriter {
    file: File,
}

impl SegmentWriter for FileSegmentWriter {
    fn write_page(&mut self, offset: u64, data: &[u8]) -> StorageResult<()> {
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(data)?;
        self.file.sync_data()?;
        Ok(())
    }

    fn sync(&mut self) -> StorageResult<()> {
        self.file.flush()?;
        self.file.sync_all()?;
        Ok(())
    }
}
