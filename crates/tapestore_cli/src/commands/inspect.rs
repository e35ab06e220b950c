//! Inspect command implementation.

use super::{format_size, load_snapshot};
use serde::Serialize;
use std::path::Path;

/// Store inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Store path.
    pub path: String,
    /// Total size of all segments in bytes.
    pub total_size: u64,
    /// Store version: number of decodable frames.
    pub store_version: u64,
    /// Number of distinct streams.
    pub stream_count: usize,
    /// Segments in log order.
    pub segments: Vec<SegmentSummary>,
    /// Stream versions (if requested).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub streams: Option<Vec<StreamSummary>>,
}

/// Summary of one segment.
#[derive(Debug, Serialize)]
pub struct SegmentSummary {
    /// Segment id.
    pub id: String,
    /// Physical size in bytes.
    pub size: u64,
    /// Number of decodable frames.
    pub frames: usize,
    /// End of the last decodable frame.
    pub valid_len: u64,
}

/// Version of one stream.
#[derive(Debug, Serialize)]
pub struct StreamSummary {
    /// Stream key.
    pub key: String,
    /// Number of frames in the stream.
    pub version: u64,
}

/// Runs the inspect command.
pub fn run(path: &Path, show_streams: bool, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let snapshot = load_snapshot(path)?;
    let index = snapshot.index()?;

    let segments: Vec<SegmentSummary> = snapshot
        .segments
        .iter()
        .zip(&snapshot.scans)
        .map(|(info, scan)| SegmentSummary {
            id: info.id.clone(),
            size: info.len,
            frames: scan.frames.len(),
            valid_len: scan.valid_len,
        })
        .collect();

    let result = InspectResult {
        path: path.display().to_string(),
        total_size: segments.iter().map(|s| s.size).sum(),
        store_version: index.store_version(),
        stream_count: index.stream_count(),
        segments,
        streams: show_streams.then(|| {
            index
                .streams()
                .into_iter()
                .map(|(key, version)| StreamSummary { key, version })
                .collect()
        }),
    };

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        _ => {
            print_text_output(&result);
        }
    }

    Ok(())
}

fn print_text_output(result: &InspectResult) {
    println!("TapeStore Inspection");
    println!("====================");
    println!();
    println!("Path: {}", result.path);
    println!();
    println!("Log:");
    println!("  Store version: {}", result.store_version);
    println!("  Streams:       {}", result.stream_count);
    println!("  Total size:    {}", format_size(result.total_size));
    println!();
    println!("Segments ({}):", result.segments.len());
    for segment in &result.segments {
        println!(
            "  {}  {:>10}  {} frames, {} valid bytes",
            segment.id,
            format_size(segment.size),
            segment.frames,
            segment.valid_len
        );
    }

    if let Some(streams) = &result.streams {
        println!();
        println!("Streams:");
        for stream in streams {
            println!("  {} v{}", stream.key, stream.version);
        }
    }
}
