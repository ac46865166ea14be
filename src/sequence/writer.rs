//! Sequence writer producing complete container files.

use std::fs::File;
use std::io::{self, BufWriter, Seek, SeekFrom, Write};
use std::path::Path;

use log::debug;

use super::codec::{compress_frame, encode_image, probe_dimensions};
use super::format::{EncodingMode, FrameIndexEntry, PIXEL_COMPONENTS, SequenceHeader};
use crate::config::{ConfigError, WriterConfig};

/// Pixel geometry shared by every frame of a sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameGeometry {
    pub width: u16,
    pub height: u16,
    /// Row stride of a raw frame. Ignored for encoded images.
    pub bytes_per_row: u32,
}

impl FrameGeometry {
    /// Tightly packed RGBA8 rows.
    pub fn rgba(width: u16, height: u16) -> Self {
        Self {
            width,
            height,
            bytes_per_row: width as u32 * PIXEL_COMPONENTS as u32,
        }
    }

    pub fn with_stride(width: u16, height: u16, bytes_per_row: u32) -> Self {
        Self {
            width,
            height,
            bytes_per_row,
        }
    }
}

/// Errors raised while writing a container.
#[derive(Debug, thiserror::Error)]
pub enum WriteError {
    #[error("I/O error writing sequence: {0}")]
    Io(#[from] io::Error),
    #[error("Invalid writer configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("Invalid sequence geometry: {0}")]
    InvalidGeometry(String),
    #[error("Frame holds {actual} bytes, expected {expected}")]
    FrameSize { expected: usize, actual: usize },
    #[error("Sequence declares {expected} frames, got {actual}")]
    FrameCount { expected: u32, actual: u32 },
    #[error("Encoded image is {}x{}, sequence is {}x{}", .actual.0, .actual.1, .expected.0, .expected.1)]
    Dimensions {
        expected: (u32, u32),
        actual: (u32, u32),
    },
    #[error("Operation requires {expected:?} mode, sequence is {actual:?}")]
    ModeMismatch {
        expected: EncodingMode,
        actual: EncodingMode,
    },
    #[error("Image encoding failed: {0}")]
    Encode(#[from] image::ImageError),
    #[error("Sequence exceeds 32-bit offsets at {0} bytes")]
    TooLarge(u64),
    #[error("Writer is unusable after an earlier write error")]
    Failed,
}

/// Writer that lays out a complete sequence container.
///
/// The header and a placeholder index are written up front; the real index
/// is written back in place by [`finish`](Self::finish).
///
/// A failed payload write may leave partial bytes in the output, so after
/// one every push and `finish` return [`WriteError::Failed`].
///
/// Usage:
/// ```ignore
/// let geometry = FrameGeometry::rgba(256, 256);
/// let mut writer = SequenceWriter::create("out.seq", geometry, frames.len() as u32, Default::default())?;
/// for frame in &frames {
///     writer.push_raw(frame)?;
/// }
/// writer.finish()?;
/// ```
pub struct SequenceWriter<W: Write + Seek> {
    writer: W,
    header: SequenceHeader,
    config: WriterConfig,
    entries: Vec<FrameIndexEntry>,
    /// Offset of the next payload.
    cursor: u64,
    raw_bytes: u64,
    /// Set once a payload write fails partway.
    failed: bool,
}

impl SequenceWriter<BufWriter<File>> {
    /// Create a sequence file at `path`.
    pub fn create<P: AsRef<Path>>(
        path: P,
        geometry: FrameGeometry,
        frame_count: u32,
        config: WriterConfig,
    ) -> Result<Self, WriteError> {
        let file = File::create(path)?;
        Self::new(BufWriter::new(file), geometry, frame_count, config)
    }
}

impl<W: Write + Seek> SequenceWriter<W> {
    /// Start a sequence of exactly `frame_count` frames on `writer`.
    pub fn new(
        mut writer: W,
        geometry: FrameGeometry,
        frame_count: u32,
        config: WriterConfig,
    ) -> Result<Self, WriteError> {
        config.validate()?;

        if frame_count == 0 {
            return Err(WriteError::InvalidGeometry("frame count is zero".into()));
        }
        if geometry.width == 0 || geometry.height == 0 {
            return Err(WriteError::InvalidGeometry(format!(
                "degenerate frame size {}x{}",
                geometry.width, geometry.height
            )));
        }
        if config.mode == EncodingMode::RawCompressed && geometry.bytes_per_row == 0 {
            return Err(WriteError::InvalidGeometry("bytes per row is zero".into()));
        }

        let header = SequenceHeader {
            version: config.version,
            mode: config.mode,
            frame_count,
            width: geometry.width,
            height: geometry.height,
            bytes_per_row: match config.mode {
                EncodingMode::RawCompressed => Some(geometry.bytes_per_row),
                EncodingMode::ImageCodec => None,
            },
        };

        let payload_start = header.payload_start();
        if payload_start > u32::MAX as u64 {
            return Err(WriteError::TooLarge(payload_start));
        }

        header.write_to(&mut writer)?;
        // Placeholder index, rewritten on finish
        for _ in 0..frame_count {
            FrameIndexEntry::default().write_to(&mut writer)?;
        }

        Ok(Self {
            writer,
            header,
            config,
            entries: Vec::with_capacity(frame_count as usize),
            cursor: payload_start,
            raw_bytes: 0,
            failed: false,
        })
    }

    pub fn header(&self) -> &SequenceHeader {
        &self.header
    }

    /// Get number of frames written so far.
    pub fn frames_written(&self) -> u32 {
        self.entries.len() as u32
    }

    /// Append one frame of uncompressed pixels.
    ///
    /// Raw sequences take `height * bytes_per_row` bytes; encoded-image
    /// sequences take tightly packed RGBA8 and encode it with the configured
    /// image encoder.
    pub fn push_raw(&mut self, pixels: &[u8]) -> Result<(), WriteError> {
        self.check_usable()?;
        self.check_capacity()?;

        let expected = self.header.frame_byte_size();
        if pixels.len() != expected {
            return Err(WriteError::FrameSize {
                expected,
                actual: pixels.len(),
            });
        }

        let payload = match self.header.mode {
            EncodingMode::RawCompressed => compress_frame(pixels),
            EncodingMode::ImageCodec => encode_image(
                pixels,
                self.header.width as u32,
                self.header.height as u32,
                self.config.image,
            )?,
        };
        self.append(&payload)?;
        self.raw_bytes += pixels.len() as u64;
        Ok(())
    }

    /// Append an already encoded image (encoded-image sequences only).
    pub fn push_encoded(&mut self, encoded: &[u8]) -> Result<(), WriteError> {
        self.check_usable()?;
        if self.header.mode != EncodingMode::ImageCodec {
            return Err(WriteError::ModeMismatch {
                expected: EncodingMode::ImageCodec,
                actual: self.header.mode,
            });
        }
        self.check_capacity()?;

        let expected = (self.header.width as u32, self.header.height as u32);
        let actual = probe_dimensions(encoded)?;
        if actual != expected {
            return Err(WriteError::Dimensions { expected, actual });
        }

        self.append(encoded)?;
        self.raw_bytes += self.header.frame_byte_size() as u64;
        Ok(())
    }

    fn check_usable(&self) -> Result<(), WriteError> {
        if self.failed {
            return Err(WriteError::Failed);
        }
        Ok(())
    }

    fn check_capacity(&self) -> Result<(), WriteError> {
        if self.entries.len() as u32 >= self.header.frame_count {
            return Err(WriteError::FrameCount {
                expected: self.header.frame_count,
                actual: self.header.frame_count.saturating_add(1),
            });
        }
        Ok(())
    }

    fn append(&mut self, payload: &[u8]) -> Result<(), WriteError> {
        let end = self.cursor + payload.len() as u64;
        if end > u32::MAX as u64 {
            return Err(WriteError::TooLarge(end));
        }

        if let Err(e) = self.writer.write_all(payload) {
            self.failed = true;
            return Err(e.into());
        }
        self.entries.push(FrameIndexEntry {
            position: self.cursor as u32,
            length: payload.len() as u32,
        });
        self.cursor = end;
        Ok(())
    }

    /// Write the frame index and flush.
    pub fn finish(self) -> Result<WriteStats, WriteError> {
        self.finish_into_inner().map(|(_, stats)| stats)
    }

    /// Like [`finish`](Self::finish), also handing back the underlying writer.
    pub fn finish_into_inner(mut self) -> Result<(W, WriteStats), WriteError> {
        self.check_usable()?;
        let written = self.entries.len() as u32;
        if written != self.header.frame_count {
            return Err(WriteError::FrameCount {
                expected: self.header.frame_count,
                actual: written,
            });
        }

        // Seek back and rewrite index
        self.writer
            .seek(SeekFrom::Start(self.header.header_len() as u64))?;
        for entry in &self.entries {
            entry.write_to(&mut self.writer)?;
        }
        self.writer.flush()?;

        let payload_bytes = self.cursor - self.header.payload_start();
        let stats = WriteStats {
            frame_count: written,
            total_bytes: self.cursor,
            average_frame_size: payload_bytes / written as u64,
            raw_bytes: self.raw_bytes,
            mode: self.header.mode,
        };
        debug!("Finished sequence: {stats}");

        Ok((self.writer, stats))
    }
}

/// Statistics from a finished write.
#[derive(Debug, Clone)]
pub struct WriteStats {
    /// Total frames written.
    pub frame_count: u32,
    /// Total file size in bytes.
    pub total_bytes: u64,
    /// Average encoded payload size.
    pub average_frame_size: u64,
    /// Sum of decoded frame sizes.
    pub raw_bytes: u64,
    /// Payload encoding used.
    pub mode: EncodingMode,
}

impl std::fmt::Display for WriteStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} frames, {} bytes total, {} bytes/frame avg ({:?}, {} bytes decoded)",
            self.frame_count, self.total_bytes, self.average_frame_size, self.mode, self.raw_bytes
        )
    }
}
