//! Binary frame codec.
//!
//! Every record is stored as one self-describing frame:
//!
//! ```text
//! ┌────────────┬──────────────┬──────────────────┬─────────────┬─────────┬────────────┐
//! │ key_len    │ key          │ stream_version   │ payload_len │ payload │ hash       │
//! │ u32 LE     │ UTF-8        │ u64 LE           │ u32 LE      │ bytes   │ 16 bytes   │
//! └────────────┴──────────────┴──────────────────┴─────────────┴─────────┴────────────┘
//! ```
//!
//! The hash is the first 16 bytes of SHA-256 over everything preceding it.
//! Decoding never fails on bad data: anything that is not a complete, valid
//! frame reads as "no frame", which is how torn writes and zero padding are
//! told apart from records.

use crate::error::{CoreError, CoreResult};
use bytes::Bytes;
use sha2::{Digest, Sha256};
use std::io::{self, Read};

/// Maximum stream key length in bytes.
pub const MAX_KEY_LEN: usize = 64 * 1024;

/// Maximum payload length in bytes.
pub const MAX_PAYLOAD_LEN: usize = u32::MAX as usize;

/// Length of the truncated digest.
pub const HASH_LEN: usize = 16;

/// Bytes a frame adds around its key and payload.
pub const FRAME_OVERHEAD: usize = 4 + 8 + 4 + HASH_LEN;

/// Returns the encoded size of a frame.
#[must_use]
pub const fn encoded_len(key_len: usize, payload_len: usize) -> usize {
    FRAME_OVERHEAD + key_len + payload_len
}

/// A frame read back from a segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedFrame {
    /// The stream key.
    pub stream_key: String,
    /// The payload.
    pub payload: Bytes,
    /// The stream version recorded when the frame was written.
    pub stream_version: u64,
}

/// Checks that a key and payload can be framed.
///
/// # Errors
///
/// Returns `InvalidArgument` for an empty key, a key longer than
/// [`MAX_KEY_LEN`], or a payload longer than [`MAX_PAYLOAD_LEN`].
pub fn validate_frame(key: &str, payload_len: usize) -> CoreResult<()> {
    if key.is_empty() {
        return Err(CoreError::invalid_argument("stream key must not be empty"));
    }
    if key.len() > MAX_KEY_LEN {
        return Err(CoreError::invalid_argument(format!(
            "stream key too long: {} bytes exceeds maximum of {MAX_KEY_LEN} bytes",
            key.len()
        )));
    }
    if payload_len > MAX_PAYLOAD_LEN {
        return Err(CoreError::invalid_argument(format!(
            "payload too large: {payload_len} bytes exceeds maximum of {MAX_PAYLOAD_LEN} bytes"
        )));
    }
    Ok(())
}

/// Encodes one frame.
///
/// # Errors
///
/// Returns `InvalidArgument` if [`validate_frame`] rejects the key or
/// payload, or for stream version 0.
pub fn encode_frame(key: &str, payload: &[u8], stream_version: u64) -> CoreResult<Vec<u8>> {
    validate_frame(key, payload.len())?;
    if stream_version == 0 {
        return Err(CoreError::invalid_argument("stream version must be at least 1"));
    }

    let mut buf = Vec::with_capacity(encoded_len(key.len(), payload.len()));
    // Lengths were validated above
    buf.extend_from_slice(&(key.len() as u32).to_le_bytes());
    buf.extend_from_slice(key.as_bytes());
    buf.extend_from_slice(&stream_version.to_le_bytes());
    buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    buf.extend_from_slice(payload);

    let digest = Sha256::digest(&buf);
    buf.extend_from_slice(&digest[..HASH_LEN]);
    Ok(buf)
}

/// Reads frames sequentially from any byte source.
///
/// After [`FrameReader::try_read_frame`] returns `Ok(None)` the reader may
/// have consumed bytes past [`FrameReader::valid_end`]; callers stop
/// decoding there. [`FrameReader::position`] counts every byte consumed.
pub struct FrameReader<R> {
    inner: R,
    position: u64,
    valid_end: u64,
}

impl<R: Read> FrameReader<R> {
    /// Creates a reader positioned at the start of `inner`.
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            position: 0,
            valid_end: 0,
        }
    }

    /// End offset of the last frame that decoded successfully.
    #[must_use]
    pub fn valid_end(&self) -> u64 {
        self.valid_end
    }

    /// Number of bytes consumed from the source so far.
    #[must_use]
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Returns the underlying source.
    pub fn get_mut(&mut self) -> &mut R {
        &mut self.inner
    }

    /// Reads the next frame.
    ///
    /// Returns `Ok(None)` when the remaining bytes do not hold a valid frame:
    /// too few bytes, key length 0 or above [`MAX_KEY_LEN`], a non-UTF-8 key,
    /// stream version 0, or a digest mismatch.
    ///
    /// # Errors
    ///
    /// Propagates I/O errors other than unexpected end of data.
    pub fn try_read_frame(&mut self) -> io::Result<Option<DecodedFrame>> {
        let mut hasher = Sha256::new();

        let mut len_buf = [0u8; 4];
        if !self.fill(&mut len_buf)? {
            return Ok(None);
        }
        let key_len = u32::from_le_bytes(len_buf) as usize;
        if key_len == 0 || key_len > MAX_KEY_LEN {
            return Ok(None);
        }
        hasher.update(len_buf);

        let mut key = vec![0u8; key_len];
        if !self.fill(&mut key)? {
            return Ok(None);
        }
        hasher.update(&key);

        let mut version_buf = [0u8; 8];
        if !self.fill(&mut version_buf)? {
            return Ok(None);
        }
        let stream_version = u64::from_le_bytes(version_buf);
        if stream_version == 0 {
            return Ok(None);
        }
        hasher.update(version_buf);

        if !self.fill(&mut len_buf)? {
            return Ok(None);
        }
        let payload_len = u64::from(u32::from_le_bytes(len_buf));
        hasher.update(len_buf);

        // Grows with the data actually present, so a garbage length cannot
        // force a huge allocation.
        let mut payload = Vec::new();
        let read = (&mut self.inner).take(payload_len).read_to_end(&mut payload)?;
        self.position += read as u64;
        if (read as u64) < payload_len {
            return Ok(None);
        }
        hasher.update(&payload);

        let mut hash = [0u8; HASH_LEN];
        if !self.fill(&mut hash)? {
            return Ok(None);
        }
        if hasher.finalize()[..HASH_LEN] != hash {
            return Ok(None);
        }

        let Ok(stream_key) = String::from_utf8(key) else {
            return Ok(None);
        };

        self.valid_end = self.position;
        Ok(Some(DecodedFrame {
            stream_key,
            payload: Bytes::from(payload),
            stream_version,
        }))
    }

    /// Fills `buf` completely. Returns false if the data ran out first.
    fn fill(&mut self, buf: &mut [u8]) -> io::Result<bool> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.inner.read(&mut buf[filled..]) {
                Ok(0) => {
                    self.position += filled as u64;
                    return Ok(false);
                }
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    self.position += filled as u64;
                    return Ok(false);
                }
                Err(e) => return Err(e),
            }
        }
        self.position += filled as u64;
        Ok(true)
    }
}

impl<R: Read> Iterator for FrameReader<R> {
    type Item = io::Result<DecodedFrame>;

    fn next(&mut self) -> Option<Self::Item> {
        self.try_read_frame().transpose()
    }
}

/// Result of decoding a whole segment image.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SegmentScan {
    /// Frames in physical order.
    pub frames: Vec<DecodedFrame>,
    /// End offset of the last valid frame.
    pub valid_len: u64,
    /// Physical length of the segment.
    pub total_len: u64,
    /// Whether every byte after `valid_len` is zero.
    pub tail_is_zero: bool,
}

impl SegmentScan {
    /// Number of bytes after the last valid frame.
    #[must_use]
    pub fn tail_len(&self) -> u64 {
        self.total_len - self.valid_len
    }

    /// True if the segment holds nothing but frames and zero padding.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.tail_is_zero
    }
}

/// Remembers whether any non-zero byte passed through since the last reset.
struct ZeroWatch<R> {
    inner: R,
    saw_nonzero: bool,
}

impl<R: Read> Read for ZeroWatch<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        if !self.saw_nonzero && buf[..n].iter().any(|&b| b != 0) {
            self.saw_nonzero = true;
        }
        Ok(n)
    }
}

/// Decodes every frame of a segment read sequentially from `source`.
///
/// Only the decoded frames are kept in memory; the undecodable remainder is
/// streamed through to measure it.
///
/// # Errors
///
/// Propagates I/O errors of `source` other than unexpected end of data.
pub fn scan_reader<R: Read>(source: R) -> io::Result<SegmentScan> {
    let mut reader = FrameReader::new(ZeroWatch {
        inner: source,
        saw_nonzero: false,
    });
    let mut frames = Vec::new();
    while let Some(frame) = reader.try_read_frame()? {
        reader.get_mut().saw_nonzero = false;
        frames.push(frame);
    }

    let consumed = reader.position();
    let rest = io::copy(reader.get_mut(), &mut io::sink())?;
    Ok(SegmentScan {
        frames,
        valid_len: reader.valid_end(),
        total_len: consumed + rest,
        tail_is_zero: !reader.get_mut().saw_nonzero,
    })
}

/// Decodes every frame of an in-memory segment image.
#[must_use]
pub fn scan_segment(bytes: &[u8]) -> SegmentScan {
    // Reading from a slice cannot fail
    scan_reader(bytes).unwrap_or_default()
}
