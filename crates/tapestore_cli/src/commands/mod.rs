//! CLI command implementations.

pub mod dump;
pub mod inspect;
pub mod verify;

use std::path::Path;
use tapestore_core::{
    scan_segments, sort_segments, CancelFlag, SegmentScan, StoreConfig, StreamIndex,
};
use tapestore_storage::{FileBackend, SegmentBackend, SegmentInfo};

/// Segments of a store directory with their decoded contents.
pub struct Snapshot {
    /// Segments in log order.
    pub segments: Vec<SegmentInfo>,
    /// Scan of each segment, in the same order.
    pub scans: Vec<SegmentScan>,
}

/// Reads every segment of the store at `path` without modifying anything.
///
/// The store lock is not taken, so this works while another process has the
/// store open.
pub fn load_snapshot(path: &Path) -> Result<Snapshot, Box<dyn std::error::Error>> {
    if !path.is_dir() {
        return Err(format!("No store found at {}", path.display()).into());
    }

    let backend = FileBackend::open_read_only(path)?;
    let config = StoreConfig::default();
    let retry = config.retry.policy();

    let mut segments = retry.run("list_segments", || backend.list_segments())?;
    sort_segments(&mut segments);

    let scans = scan_segments(
        &backend,
        &segments,
        config.load_parallelism,
        &retry,
        &CancelFlag::new(),
    )?;

    Ok(Snapshot { segments, scans })
}

impl Snapshot {
    /// Replays every decoded frame into a fresh index.
    pub fn index(&self) -> Result<StreamIndex, Box<dyn std::error::Error>> {
        let index = StreamIndex::new();
        index.load_history(self.scans.iter().flat_map(|scan| scan.frames.iter().cloned()))?;
        Ok(index)
    }
}

/// Formats a byte count for humans.
pub fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.1} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}
