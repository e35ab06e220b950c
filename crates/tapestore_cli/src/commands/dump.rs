//! Dump command implementation.

use super::load_snapshot;
use serde::Serialize;
use std::fmt::Write as _;
use std::path::Path;
use tapestore_core::Frame;

const PREVIEW_BYTES: usize = 16;

/// Frame representation for output.
#[derive(Debug, Serialize)]
pub struct FrameInfo {
    /// Position in the whole log.
    pub store_version: u64,
    /// Stream key.
    pub stream: String,
    /// Position in the stream.
    pub stream_version: u64,
    /// Payload size in bytes.
    pub payload_size: usize,
    /// Hex of the first payload bytes.
    pub preview: String,
}

impl From<&Frame> for FrameInfo {
    fn from(frame: &Frame) -> Self {
        Self {
            store_version: frame.store_version,
            stream: frame.stream_key.to_string(),
            stream_version: frame.stream_version,
            payload_size: frame.payload.len(),
            preview: hex_preview(&frame.payload),
        }
    }
}

/// Runs the dump command.
pub fn run(
    path: &Path,
    stream: Option<&str>,
    after: u64,
    limit: Option<usize>,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let index = load_snapshot(path)?.index()?;
    let max_count = limit.unwrap_or(usize::MAX);

    let frames = match stream {
        Some(key) => index.read_stream(key, after, max_count),
        None => index.read_all(after, max_count),
    };
    let frames: Vec<FrameInfo> = frames.iter().map(FrameInfo::from).collect();

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&frames)?);
        }
        _ => {
            print_text_output(&frames);
        }
    }

    Ok(())
}

fn hex_preview(payload: &[u8]) -> String {
    let mut out = String::with_capacity(PREVIEW_BYTES * 2 + 3);
    for byte in payload.iter().take(PREVIEW_BYTES) {
        let _ = write!(out, "{byte:02x}");
    }
    if payload.len() > PREVIEW_BYTES {
        out.push_str("...");
    }
    out
}

fn print_text_output(frames: &[FrameInfo]) {
    println!("{:>10}  {:<32} {:>8} {:>8}  PREVIEW", "STORE", "STREAM", "VERSION", "SIZE");
    for frame in frames {
        println!(
            "{:>10}  {:<32} {:>8} {:>8}  {}",
            frame.store_version, frame.stream, frame.stream_version, frame.payload_size, frame.preview
        );
    }
    println!();
    println!("{} frames", frames.len());
}
