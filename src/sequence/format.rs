//! Binary format definitions for sequence container files.

use std::collections::TryReserveError;
use std::io::{self, Write};

use serde::{Deserialize, Serialize};

/// Signature of the legacy (version 1) layout.
pub const SEQUENCE_SIGNATURE_V1: i32 = 0x320;

/// Signature of the compact (version 2) layout.
pub const SEQUENCE_SIGNATURE_V2: i32 = 0x321;

/// Largest header any version can carry.
pub const MAX_HEADER_LEN: usize = 20;

/// Components per decoded pixel in `ImageCodec` mode (RGBA8).
pub const PIXEL_COMPONENTS: usize = 4;

/// How frame payloads are encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u32)]
pub enum EncodingMode {
    /// Each payload is a standalone encoded image (PNG, JPEG, ...).
    ImageCodec = 0,
    /// Fixed-size raw pixel frames, LZ4 block compressed.
    #[default]
    RawCompressed = 1,
}

impl EncodingMode {
    pub fn from_u32(v: u32) -> Option<Self> {
        match v {
            0 => Some(EncodingMode::ImageCodec),
            1 => Some(EncodingMode::RawCompressed),
            _ => None,
        }
    }
}

/// Layout revision, folded into the signature word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FormatVersion {
    /// 20-byte header, `bytes_per_row` always stored.
    V1,
    /// `bytes_per_row` stored only in `RawCompressed` mode.
    #[default]
    V2,
}

impl FormatVersion {
    pub fn from_signature(signature: i32) -> Option<Self> {
        match signature {
            SEQUENCE_SIGNATURE_V1 => Some(FormatVersion::V1),
            SEQUENCE_SIGNATURE_V2 => Some(FormatVersion::V2),
            _ => None,
        }
    }

    pub fn signature(self) -> i32 {
        match self {
            FormatVersion::V1 => SEQUENCE_SIGNATURE_V1,
            FormatVersion::V2 => SEQUENCE_SIGNATURE_V2,
        }
    }

    /// Size of the header in bytes for the given mode.
    /// Signature(4) + Mode(4) + FrameCount(4) + Width(2) + Height(2) [+ BytesPerRow(4)]
    pub fn header_len(self, mode: EncodingMode) -> usize {
        match (self, mode) {
            (FormatVersion::V2, EncodingMode::ImageCodec) => 16,
            _ => 20,
        }
    }
}

/// Errors raised while parsing container structures.
#[derive(Debug, thiserror::Error)]
pub enum FormatError {
    #[error("Invalid sequence format: {0}")]
    InvalidFormat(String),
    #[error("Truncated sequence: need {needed} bytes, only {available} available")]
    Truncated { needed: u64, available: u64 },
    #[error("Out of memory allocating frame index: {0}")]
    OutOfMemory(#[from] TryReserveError),
}

/// Parsed container header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequenceHeader {
    pub version: FormatVersion,
    pub mode: EncodingMode,
    pub frame_count: u32,
    pub width: u16,
    pub height: u16,
    /// Stride of one decoded row; only present in `RawCompressed` mode.
    pub bytes_per_row: Option<u32>,
}

impl SequenceHeader {
    /// Encoded size of this header.
    pub fn header_len(&self) -> usize {
        self.version.header_len(self.mode)
    }

    /// Size of the frame index table that follows the header.
    pub fn index_len(&self) -> u64 {
        self.frame_count as u64 * FrameIndexEntry::SIZE as u64
    }

    /// Offset of the first byte after the index table.
    pub fn payload_start(&self) -> u64 {
        self.header_len() as u64 + self.index_len()
    }

    /// Decoded size of one frame in bytes.
    pub fn frame_byte_size(&self) -> usize {
        match (self.mode, self.bytes_per_row) {
            (EncodingMode::RawCompressed, Some(bpr)) => self.height as usize * bpr as usize,
            _ => self.height as usize * self.width as usize * PIXEL_COMPONENTS,
        }
    }

    /// Write header to output.
    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_all(&self.version.signature().to_le_bytes())?;
        w.write_all(&(self.mode as u32).to_le_bytes())?;
        w.write_all(&self.frame_count.to_le_bytes())?;
        w.write_all(&self.width.to_le_bytes())?;
        w.write_all(&self.height.to_le_bytes())?;
        match (self.version, self.mode) {
            (FormatVersion::V2, EncodingMode::ImageCodec) => {}
            (FormatVersion::V1, EncodingMode::ImageCodec) => {
                let stride = self.width as u32 * PIXEL_COMPONENTS as u32;
                w.write_all(&stride.to_le_bytes())?;
            }
            (_, EncodingMode::RawCompressed) => {
                w.write_all(&self.bytes_per_row.unwrap_or(0).to_le_bytes())?;
            }
        }
        Ok(())
    }
}

/// Index entry for a single frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameIndexEntry {
    /// Absolute byte offset of the payload.
    pub position: u32,
    /// Encoded payload length in bytes.
    pub length: u32,
}

impl FrameIndexEntry {
    /// Size of one index entry in bytes.
    pub const SIZE: usize = 8;

    /// One past the last payload byte.
    pub fn end(&self) -> u64 {
        self.position as u64 + self.length as u64
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_all(&self.position.to_le_bytes())?;
        w.write_all(&self.length.to_le_bytes())?;
        Ok(())
    }
}

fn read_u16(bytes: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([bytes[at], bytes[at + 1]])
}

fn read_u32(bytes: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

fn truncated(needed: usize, available: usize) -> FormatError {
    FormatError::Truncated {
        needed: needed as u64,
        available: available as u64,
    }
}

/// Parse the header at the start of `bytes`.
///
/// The signature is read first and selects the per-version layout; only
/// then are the remaining fields interpreted.
pub fn parse_header(bytes: &[u8]) -> Result<SequenceHeader, FormatError> {
    if bytes.len() < 4 {
        return Err(truncated(4, bytes.len()));
    }
    let signature = read_u32(bytes, 0) as i32;
    let version = FormatVersion::from_signature(signature).ok_or_else(|| {
        FormatError::InvalidFormat(format!("unrecognized signature {signature:#x}"))
    })?;

    if bytes.len() < 8 {
        return Err(truncated(8, bytes.len()));
    }
    let raw_mode = read_u32(bytes, 4);
    let mode = EncodingMode::from_u32(raw_mode)
        .ok_or_else(|| FormatError::InvalidFormat(format!("unknown encoding mode {raw_mode}")))?;

    let len = version.header_len(mode);
    if bytes.len() < len {
        return Err(truncated(len, bytes.len()));
    }

    let frame_count = read_u32(bytes, 8);
    let width = read_u16(bytes, 12);
    let height = read_u16(bytes, 14);
    let bytes_per_row = match mode {
        EncodingMode::RawCompressed => Some(read_u32(bytes, 16)),
        // V1 stores a stride here too, but it carries no meaning for encoded images
        EncodingMode::ImageCodec => None,
    };

    if frame_count == 0 {
        return Err(FormatError::InvalidFormat("frame count is zero".into()));
    }
    if width == 0 || height == 0 {
        return Err(FormatError::InvalidFormat(format!(
            "degenerate frame size {width}x{height}"
        )));
    }
    if bytes_per_row == Some(0) {
        return Err(FormatError::InvalidFormat("bytes per row is zero".into()));
    }

    Ok(SequenceHeader {
        version,
        mode,
        frame_count,
        width,
        height,
        bytes_per_row,
    })
}

/// Parse `frame_count` index entries from the start of `bytes`.
pub fn parse_frame_index(
    bytes: &[u8],
    frame_count: u32,
) -> Result<Vec<FrameIndexEntry>, FormatError> {
    let needed = frame_count as usize * FrameIndexEntry::SIZE;
    if bytes.len() < needed {
        return Err(truncated(needed, bytes.len()));
    }

    let mut entries = Vec::new();
    entries.try_reserve_exact(frame_count as usize)?;
    entries.extend(
        bytes[..needed]
            .chunks_exact(FrameIndexEntry::SIZE)
            .map(|chunk| FrameIndexEntry {
                position: read_u32(chunk, 0),
                length: read_u32(chunk, 4),
            }),
    );
    Ok(entries)
}

/// Check the payload region against the index invariants.
///
/// Positions must be non-decreasing, spans must not overlap each other or
/// the header/index region, and every span must end inside the file.
pub fn validate_layout(
    header: &SequenceHeader,
    entries: &[FrameIndexEntry],
    file_len: u64,
) -> Result<(), FormatError> {
    let mut cursor = header.payload_start();
    for (i, entry) in entries.iter().enumerate() {
        if (entry.position as u64) < cursor {
            return Err(FormatError::InvalidFormat(format!(
                "frame {i} at offset {} overlaps preceding data ending at {cursor}",
                entry.position
            )));
        }
        if entry.end() > file_len {
            return Err(FormatError::Truncated {
                needed: entry.end(),
                available: file_len,
            });
        }
        cursor = entry.end();
    }
    Ok(())
}
