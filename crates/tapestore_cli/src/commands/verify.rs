//! Verify command implementation.

use super::load_snapshot;
use std::path::Path;
use tapestore_core::{classify, SegmentHealth, SegmentScan};

/// Verification result.
#[derive(Debug, Default)]
pub struct VerifyResult {
    /// Number of segments checked.
    pub segments_checked: usize,
    /// Number of decodable frames.
    pub valid_frames: usize,
    /// Segments recovery would delete or skip.
    pub invalid_segments: Vec<String>,
    /// Segments recovery would truncate.
    pub torn_segments: Vec<String>,
    /// Segments with a short undecodable tail.
    pub dirty_tails: Vec<String>,
}

impl VerifyResult {
    fn is_ok(&self) -> bool {
        self.invalid_segments.is_empty()
            && self.torn_segments.is_empty()
            && self.dirty_tails.is_empty()
    }

    fn record(&mut self, id: &str, scan: &SegmentScan, page_size: usize) {
        self.segments_checked += 1;
        match classify(scan, page_size) {
            SegmentHealth::Invalid => {
                println!("  ✗ {id}: no decodable frames ({} bytes)", scan.total_len);
                self.invalid_segments.push(id.to_string());
            }
            SegmentHealth::Torn { valid_len } => {
                println!(
                    "  ✗ {id}: torn write, {} frames then {} undecodable bytes from offset {valid_len}",
                    scan.frames.len(),
                    scan.tail_len()
                );
                self.valid_frames += scan.frames.len();
                self.torn_segments.push(id.to_string());
            }
            SegmentHealth::Readable if !scan.is_clean() => {
                println!(
                    "  ! {id}: {} frames, {} undecodable tail bytes",
                    scan.frames.len(),
                    scan.tail_len()
                );
                self.valid_frames += scan.frames.len();
                self.dirty_tails.push(id.to_string());
            }
            SegmentHealth::Readable => {
                println!("  ✓ {id}: {} frames", scan.frames.len());
                self.valid_frames += scan.frames.len();
            }
        }
    }
}

/// Runs the verify command.
pub fn run(path: &Path, page_size: usize) -> Result<(), Box<dyn std::error::Error>> {
    if page_size == 0 {
        return Err("page size must be positive".into());
    }

    println!("Verifying store at {}", path.display());
    println!();

    let snapshot = load_snapshot(path)?;
    let mut result = VerifyResult::default();
    for (info, scan) in snapshot.segments.iter().zip(&snapshot.scans) {
        result.record(&info.id, scan, page_size);
    }

    println!();
    println!("  Segments checked: {}", result.segments_checked);
    println!("  Valid frames:     {}", result.valid_frames);
    println!("  Invalid:          {}", result.invalid_segments.len());
    println!("  Torn:             {}", result.torn_segments.len());
    println!("  Dirty tails:      {}", result.dirty_tails.len());
    println!();

    if result.is_ok() {
        println!("✓ Store verification passed");
        Ok(())
    } else {
        println!("✗ Store verification failed; opening the store will repair it");
        Err("Verification failed".into())
    }
}
