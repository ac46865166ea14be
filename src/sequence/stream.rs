//! Random-access reader for sequence container files.

use std::collections::TryReserveError;
use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::ops::Range;
use std::path::{Path, PathBuf};

use log::{debug, trace, warn};

use super::codec::{decode_image, decompress_frame, probe_dimensions};
use super::format::{
    EncodingMode, FormatError, FrameIndexEntry, MAX_HEADER_LEN, SequenceHeader, parse_frame_index,
    parse_header, validate_layout,
};
use crate::config::{ReaderConfig, ScratchPolicy};

/// Errors raised by [`SequenceStream::open`].
#[derive(Debug, thiserror::Error)]
pub enum OpenError {
    #[error("Could not open {path}: {source}")]
    NotFound {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Invalid sequence format: {0}")]
    InvalidFormat(String),
    #[error("Truncated sequence: need {needed} bytes, file has {available}")]
    Truncated { needed: u64, available: u64 },
    #[error("Out of memory: {0}")]
    OutOfMemory(#[from] TryReserveError),
    #[error("I/O error reading sequence: {0}")]
    Io(#[from] io::Error),
}

impl From<FormatError> for OpenError {
    fn from(err: FormatError) -> Self {
        match err {
            FormatError::InvalidFormat(reason) => OpenError::InvalidFormat(reason),
            FormatError::Truncated { needed, available } => {
                OpenError::Truncated { needed, available }
            }
            FormatError::OutOfMemory(e) => OpenError::OutOfMemory(e),
        }
    }
}

/// Errors raised by [`SequenceStream::decode`].
///
/// A failed decode leaves the stream usable for other frames.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("Frame {frame} out of range (frame count {frame_count})")]
    OutOfRange { frame: usize, frame_count: u32 },
    #[error("Destination holds {actual} bytes, frame needs {needed}")]
    BufferTooSmall { needed: usize, actual: usize },
    #[error("Frame {frame}: {length} bytes at offset {position} not available (file is {file_len} bytes)")]
    ShortRead {
        frame: usize,
        position: u32,
        length: u32,
        file_len: u64,
    },
    #[error("Frame {frame} payload is corrupt: {reason}")]
    CorruptPayload { frame: usize, reason: String },
    #[error("Sequence stream is closed")]
    Closed,
    #[error("I/O error decoding frame: {0}")]
    Io(#[from] io::Error),
}

/// Resources held while the stream is open.
struct OpenSequence {
    reader: BufReader<File>,
    frames: Vec<FrameIndexEntry>,
    file_len: u64,
    /// Reused compressed-payload buffer (raw mode).
    scratch: Vec<u8>,
}

/// Reader serving random-access frame decodes from a sequence file.
///
/// Usage:
/// ```ignore
/// let mut stream = SequenceStream::open("turntable.seq")?;
/// let mut pixels = vec![0u8; stream.frame_byte_size()];
///
/// // Frames may be decoded in any order
/// stream.decode(41, &mut pixels)?;
/// stream.decode(3, &mut pixels)?;
/// ```
///
/// Decoding mutates the file cursor and scratch buffer, so one stream must
/// not be shared between threads without a lock. Separate streams over the
/// same path are independent.
pub struct SequenceStream {
    path: PathBuf,
    header: SequenceHeader,
    frame_size: usize,
    inner: Option<OpenSequence>,
}

impl SequenceStream {
    /// Open a sequence file with default options.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, OpenError> {
        Self::open_with(path, &ReaderConfig::default())
    }

    /// Open a sequence file.
    ///
    /// Reads and validates the header and the whole frame index. Nothing
    /// outlives a failed open.
    pub fn open_with<P: AsRef<Path>>(path: P, config: &ReaderConfig) -> Result<Self, OpenError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| OpenError::NotFound {
            path: path.to_path_buf(),
            source,
        })?;
        let file_len = file.metadata()?.len();
        let mut reader = BufReader::new(file);

        // Read header
        let mut head = Vec::with_capacity(MAX_HEADER_LEN);
        reader
            .by_ref()
            .take(MAX_HEADER_LEN as u64)
            .read_to_end(&mut head)?;
        let header = parse_header(&head)?;

        // Read frame index, which directly follows the header
        if file_len < header.payload_start() {
            return Err(OpenError::Truncated {
                needed: header.payload_start(),
                available: file_len,
            });
        }
        let index_len = header.index_len() as usize;
        let mut index_bytes = Vec::new();
        index_bytes.try_reserve_exact(index_len)?;
        index_bytes.resize(index_len, 0);
        reader.seek(SeekFrom::Start(header.header_len() as u64))?;
        reader.read_exact(&mut index_bytes).map_err(|e| match e.kind() {
            io::ErrorKind::UnexpectedEof => OpenError::Truncated {
                needed: header.payload_start(),
                available: file_len,
            },
            _ => OpenError::Io(e),
        })?;
        let frames = parse_frame_index(&index_bytes, header.frame_count)?;

        if config.verify_layout {
            validate_layout(&header, &frames, file_len)?;
        }

        let mut scratch = Vec::new();
        if header.mode == EncodingMode::RawCompressed && config.scratch == ScratchPolicy::Eager {
            // Spans past EOF can never be read, so they don't size the buffer
            let largest = frames
                .iter()
                .filter(|f| f.end() <= file_len)
                .map(|f| f.length as usize)
                .max()
                .unwrap_or(0);
            scratch.try_reserve_exact(largest)?;
            scratch.resize(largest, 0);
        }

        let frame_size = header.frame_byte_size();
        debug!(
            "Opened {}: {:?} {:?}, {} frames of {}x{} ({} bytes decoded)",
            path.display(),
            header.version,
            header.mode,
            header.frame_count,
            header.width,
            header.height,
            frame_size
        );

        Ok(Self {
            path: path.to_path_buf(),
            header,
            frame_size,
            inner: Some(OpenSequence {
                reader,
                frames,
                file_len,
                scratch,
            }),
        })
    }

    /// Get the parsed header.
    pub fn header(&self) -> &SequenceHeader {
        &self.header
    }

    /// Path this stream was opened from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn encoding_mode(&self) -> EncodingMode {
        self.header.mode
    }

    /// Get total number of frames.
    pub fn frame_count(&self) -> u32 {
        self.header.frame_count
    }

    pub fn width(&self) -> u32 {
        self.header.width as u32
    }

    pub fn height(&self) -> u32 {
        self.header.height as u32
    }

    /// Row stride of a decoded raw frame; `None` for encoded-image sequences.
    pub fn bytes_per_row(&self) -> Option<u32> {
        self.header.bytes_per_row
    }

    /// Bytes a destination buffer needs to hold one decoded frame.
    pub fn frame_byte_size(&self) -> usize {
        self.frame_size
    }

    /// Valid frame numbers.
    pub fn range(&self) -> Range<usize> {
        0..self.header.frame_count as usize
    }

    pub fn valid_frame(&self, frame: usize) -> bool {
        frame < self.header.frame_count as usize
    }

    /// Index entry of a frame, if the stream is open and the frame exists.
    pub fn frame_entry(&self, frame: usize) -> Option<FrameIndexEntry> {
        self.inner.as_ref()?.frames.get(frame).copied()
    }

    pub fn is_open(&self) -> bool {
        self.inner.is_some()
    }

    /// Decode one frame into the first [`frame_byte_size`](Self::frame_byte_size)
    /// bytes of `destination`.
    ///
    /// Every call seeks explicitly, so frames can be requested in any order.
    /// On failure the contents of `destination` are unspecified.
    pub fn decode(&mut self, frame: usize, destination: &mut [u8]) -> Result<(), DecodeError> {
        let header = self.header;
        let frame_size = self.frame_size;
        let open = self.inner.as_mut().ok_or(DecodeError::Closed)?;

        let entry = *open.frames.get(frame).ok_or(DecodeError::OutOfRange {
            frame,
            frame_count: header.frame_count,
        })?;
        if destination.len() < frame_size {
            return Err(DecodeError::BufferTooSmall {
                needed: frame_size,
                actual: destination.len(),
            });
        }
        let short_read = DecodeError::ShortRead {
            frame,
            position: entry.position,
            length: entry.length,
            file_len: open.file_len,
        };
        if entry.end() > open.file_len {
            return Err(short_read);
        }

        trace!(
            "Decoding frame {} ({} bytes at {})",
            frame, entry.length, entry.position
        );
        open.reader.seek(SeekFrom::Start(entry.position as u64))?;
        let length = entry.length as usize;
        let output = &mut destination[..frame_size];

        match header.mode {
            EncodingMode::RawCompressed => {
                if open.scratch.len() < length {
                    open.scratch.resize(length, 0);
                }
                let compressed = &mut open.scratch[..length];
                read_payload(&mut open.reader, compressed, short_read)?;

                let produced = decompress_frame(compressed, output)
                    .map_err(|e| corrupt(frame, e.to_string()))?;
                if produced != frame_size {
                    return Err(corrupt(
                        frame,
                        format!("decompressed {produced} bytes, expected {frame_size}"),
                    ));
                }
            }
            EncodingMode::ImageCodec => {
                let mut encoded = vec![0u8; length];
                read_payload(&mut open.reader, &mut encoded, short_read)?;

                let expected = (header.width as u32, header.height as u32);
                // Reject on the image header alone before any pixels are allocated
                let declared =
                    probe_dimensions(&encoded).map_err(|e| corrupt(frame, e.to_string()))?;
                if declared != expected {
                    return Err(corrupt(
                        frame,
                        format!(
                            "image declares {}x{}, sequence is {}x{}",
                            declared.0, declared.1, header.width, header.height
                        ),
                    ));
                }

                let image = decode_image(&encoded).map_err(|e| corrupt(frame, e.to_string()))?;
                if (image.width(), image.height()) != expected {
                    return Err(corrupt(
                        frame,
                        format!(
                            "image is {}x{}, sequence is {}x{}",
                            image.width(),
                            image.height(),
                            header.width,
                            header.height
                        ),
                    ));
                }
                output.copy_from_slice(image.as_bytes());
            }
        }

        Ok(())
    }

    /// Decode one frame into a newly allocated buffer.
    pub fn decode_to_vec(&mut self, frame: usize) -> Result<Vec<u8>, DecodeError> {
        let mut buf = vec![0u8; self.frame_size];
        self.decode(frame, &mut buf)?;
        Ok(buf)
    }

    /// Create an iterator over all frames in order.
    pub fn frames(&mut self) -> FrameIterator<'_> {
        FrameIterator {
            stream: self,
            current: 0,
        }
    }

    /// Release the file handle, index table and scratch buffer.
    ///
    /// Safe to call more than once. Geometry accessors keep answering after
    /// close; `decode` returns [`DecodeError::Closed`].
    pub fn close(&mut self) {
        if self.inner.take().is_some() {
            debug!("Closed {}", self.path.display());
        }
    }
}

impl Drop for SequenceStream {
    fn drop(&mut self) {
        self.close();
    }
}

fn corrupt(frame: usize, reason: String) -> DecodeError {
    warn!("Frame {frame} failed to decode: {reason}");
    DecodeError::CorruptPayload { frame, reason }
}

fn read_payload<R: Read>(
    reader: &mut R,
    buf: &mut [u8],
    short_read: DecodeError,
) -> Result<(), DecodeError> {
    reader.read_exact(buf).map_err(|e| match e.kind() {
        io::ErrorKind::UnexpectedEof => short_read,
        _ => DecodeError::Io(e),
    })
}

/// Iterator over decoded frames.
pub struct FrameIterator<'a> {
    stream: &'a mut SequenceStream,
    current: usize,
}

impl<'a> Iterator for FrameIterator<'a> {
    type Item = Result<Vec<u8>, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if !self.stream.valid_frame(self.current) {
            return None;
        }

        let result = self.stream.decode_to_vec(self.current);
        self.current += 1;
        Some(result)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.stream.range().end - self.current;
        (remaining, Some(remaining))
    }
}

impl<'a> ExactSizeIterator for FrameIterator<'a> {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ImageEncoding, WriterConfig};
    use crate::sequence::codec::{compress_frame, encode_image};
    use crate::sequence::format::{FormatVersion, PIXEL_COMPONENTS};
    use crate::sequence::{FrameGeometry, SequenceWriter};
    use proptest::collection::vec;
    use proptest::prelude::*;
    use std::fs::{self, OpenOptions};
    use tempfile::tempdir;

    fn checker_frame(width: u16, height: u16, seed: u8) -> Vec<u8> {
        let size = width as usize * height as usize * PIXEL_COMPONENTS;
        (0..size)
            .map(|i| seed.wrapping_mul(31).wrapping_add((i / 5) as u8))
            .collect()
    }

    fn write_sequence(path: &Path, mode: EncodingMode, frames: &[Vec<u8>], width: u16, height: u16) {
        let config = WriterConfig {
            mode,
            ..Default::default()
        };
        let mut writer = SequenceWriter::create(
            path,
            FrameGeometry::rgba(width, height),
            frames.len() as u32,
            config,
        )
        .unwrap();
        for frame in frames {
            writer.push_raw(frame).unwrap();
        }
        writer.finish().unwrap();
    }

    /// Three 4x4 frames of 0x00, 0x11 and 0x22 packed by hand.
    fn hand_built_container() -> Vec<u8> {
        let payloads: Vec<Vec<u8>> = [0x00u8, 0x11, 0x22]
            .iter()
            .map(|&v| compress_frame(&[v; 64]))
            .collect();

        let mut buf = Vec::new();
        buf.extend_from_slice(&0x321i32.to_le_bytes());
        buf.extend_from_slice(&1u32.to_le_bytes());
        buf.extend_from_slice(&3u32.to_le_bytes());
        buf.extend_from_slice(&4u16.to_le_bytes());
        buf.extend_from_slice(&4u16.to_le_bytes());
        buf.extend_from_slice(&16u32.to_le_bytes());

        let mut position = 20 + 3 * 8;
        for payload in &payloads {
            buf.extend_from_slice(&(position as u32).to_le_bytes());
            buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
            position += payload.len();
        }
        for payload in &payloads {
            buf.extend_from_slice(payload);
        }
        buf
    }

    #[test]
    fn test_hand_built_container() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("hand.seq");
        fs::write(&path, hand_built_container()).unwrap();

        let mut stream = SequenceStream::open(&path).unwrap();
        assert_eq!(stream.frame_count(), 3);
        assert_eq!((stream.width(), stream.height()), (4, 4));
        assert_eq!(stream.frame_byte_size(), 64);

        let mut buf = vec![0u8; 64];
        stream.decode(1, &mut buf).unwrap();
        assert!(buf.iter().all(|&b| b == 0x11));

        stream.decode(2, &mut buf).unwrap();
        assert!(buf.iter().all(|&b| b == 0x22));
        stream.decode(0, &mut buf).unwrap();
        assert!(buf.iter().all(|&b| b == 0x00));
    }

    #[test]
    fn test_frame_byte_size_from_stride() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("stride.seq");

        let geometry = FrameGeometry::with_stride(60, 64, 256);
        let mut writer =
            SequenceWriter::create(&path, geometry, 2, WriterConfig::default()).unwrap();
        writer.push_raw(&vec![7u8; 16384]).unwrap();
        writer.push_raw(&vec![9u8; 16384]).unwrap();
        writer.finish().unwrap();

        let mut stream = SequenceStream::open(&path).unwrap();
        assert_eq!(stream.frame_byte_size(), 16384);
        assert_eq!(stream.bytes_per_row(), Some(256));

        let mut exact = vec![0u8; 16384];
        stream.decode(1, &mut exact).unwrap();
        assert!(exact.iter().all(|&b| b == 9));
    }

    #[test]
    fn test_bounds() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bounds.seq");
        let frames: Vec<_> = (0..5).map(|i| checker_frame(8, 8, i)).collect();
        write_sequence(&path, EncodingMode::RawCompressed, &frames, 8, 8);

        let mut stream = SequenceStream::open(&path).unwrap();
        let mut buf = vec![0u8; stream.frame_byte_size()];

        assert!(stream.decode(0, &mut buf).is_ok());
        assert!(stream.decode(4, &mut buf).is_ok());
        assert!(matches!(
            stream.decode(5, &mut buf),
            Err(DecodeError::OutOfRange {
                frame: 5,
                frame_count: 5
            })
        ));
        // -1 wrapped to an unsigned index
        assert!(matches!(
            stream.decode(usize::MAX, &mut buf),
            Err(DecodeError::OutOfRange { .. })
        ));

        assert!(stream.valid_frame(4));
        assert!(!stream.valid_frame(5));
        assert_eq!(stream.range(), 0..5);
    }

    #[test]
    fn test_raw_roundtrip_out_of_order() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("raw.seq");
        let frames: Vec<_> = (0..6).map(|i| checker_frame(13, 7, i)).collect();
        write_sequence(&path, EncodingMode::RawCompressed, &frames, 13, 7);

        let mut stream = SequenceStream::open(&path).unwrap();
        let mut buf = vec![0u8; stream.frame_byte_size()];
        for i in [5, 0, 3, 3, 1, 4, 2] {
            stream.decode(i, &mut buf).unwrap();
            assert_eq!(buf, frames[i], "Mismatch at frame {}", i);
        }
    }

    #[test]
    fn test_image_codec_roundtrip_out_of_order() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("png.seq");
        let frames: Vec<_> = (0..4).map(|i| checker_frame(9, 6, i)).collect();
        write_sequence(&path, EncodingMode::ImageCodec, &frames, 9, 6);

        let mut stream = SequenceStream::open(&path).unwrap();
        assert_eq!(stream.encoding_mode(), EncodingMode::ImageCodec);
        assert_eq!(stream.bytes_per_row(), None);
        assert_eq!(stream.frame_byte_size(), 9 * 6 * 4);

        let mut buf = vec![0u8; stream.frame_byte_size()];
        for i in [3, 1, 2, 0] {
            stream.decode(i, &mut buf).unwrap();
            assert_eq!(buf, frames[i], "Mismatch at frame {}", i);
        }
    }

    #[test]
    fn test_legacy_layout_decodes() {
        let dir = tempdir().unwrap();
        let frames: Vec<_> = (0..3).map(|i| checker_frame(5, 5, i)).collect();

        for mode in [EncodingMode::RawCompressed, EncodingMode::ImageCodec] {
            let path = dir.path().join(format!("legacy-{mode:?}.seq"));
            let config = WriterConfig {
                mode,
                version: FormatVersion::V1,
                ..Default::default()
            };
            let mut writer =
                SequenceWriter::create(&path, FrameGeometry::rgba(5, 5), 3, config).unwrap();
            for frame in &frames {
                writer.push_raw(frame).unwrap();
            }
            writer.finish().unwrap();

            let mut stream = SequenceStream::open(&path).unwrap();
            assert_eq!(stream.header().version, FormatVersion::V1);
            assert_eq!(stream.decode_to_vec(2).unwrap(), frames[2]);
        }
    }

    #[test]
    fn test_rejects_bad_signature() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.seq");
        let mut bytes = hand_built_container();
        bytes[0..4].copy_from_slice(b"RIFF");
        fs::write(&path, bytes).unwrap();

        assert!(matches!(
            SequenceStream::open(&path),
            Err(OpenError::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_rejects_truncated_index() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("short.seq");
        let bytes = hand_built_container();
        // Header plus one and a half index entries
        fs::write(&path, &bytes[..20 + 12]).unwrap();

        assert!(matches!(
            SequenceStream::open(&path),
            Err(OpenError::Truncated {
                needed: 44,
                available: 32
            })
        ));
    }

    #[test]
    fn test_missing_file() {
        let dir = tempdir().unwrap();
        assert!(matches!(
            SequenceStream::open(dir.path().join("nope.seq")),
            Err(OpenError::NotFound { .. })
        ));
    }

    #[test]
    fn test_truncated_payload() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cut.seq");
        let bytes = hand_built_container();
        fs::write(&path, &bytes[..bytes.len() - 1]).unwrap();

        assert!(matches!(
            SequenceStream::open(&path),
            Err(OpenError::Truncated { .. })
        ));

        // Without layout checks the damage surfaces per frame
        let config = ReaderConfig {
            verify_layout: false,
            ..Default::default()
        };
        let mut stream = SequenceStream::open_with(&path, &config).unwrap();
        let mut buf = vec![0u8; 64];
        assert!(matches!(
            stream.decode(2, &mut buf),
            Err(DecodeError::ShortRead { frame: 2, .. })
        ));
        stream.decode(1, &mut buf).unwrap();
        assert!(buf.iter().all(|&b| b == 0x11));
    }

    #[test]
    fn test_file_truncated_after_open() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("shrink.seq");
        let bytes = hand_built_container();
        fs::write(&path, &bytes).unwrap();

        let mut stream = SequenceStream::open(&path).unwrap();
        let last = stream.frame_entry(2).unwrap();
        OpenOptions::new()
            .write(true)
            .open(&path)
            .unwrap()
            .set_len(last.position as u64 + 1)
            .unwrap();

        let mut buf = vec![0u8; 64];
        assert!(matches!(
            stream.decode(2, &mut buf),
            Err(DecodeError::ShortRead { .. })
        ));
        stream.decode(0, &mut buf).unwrap();
    }

    #[test]
    fn test_buffer_too_small() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("small.seq");
        fs::write(&path, hand_built_container()).unwrap();

        let mut stream = SequenceStream::open(&path).unwrap();
        let mut buf = vec![0u8; 63];
        assert!(matches!(
            stream.decode(0, &mut buf),
            Err(DecodeError::BufferTooSmall {
                needed: 64,
                actual: 63
            })
        ));

        // Larger buffers are fine; bytes past the frame are untouched
        let mut big = vec![0xeeu8; 80];
        stream.decode(2, &mut big).unwrap();
        assert!(big[..64].iter().all(|&b| b == 0x22));
        assert!(big[64..].iter().all(|&b| b == 0xee));
    }

    #[test]
    fn test_close_is_idempotent() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("close.seq");
        fs::write(&path, hand_built_container()).unwrap();

        let mut stream = SequenceStream::open(&path).unwrap();
        assert!(stream.is_open());
        stream.close();
        stream.close();
        assert!(!stream.is_open());

        assert_eq!(stream.frame_count(), 3);
        assert_eq!(stream.frame_entry(0), None);
        let mut buf = vec![0u8; 64];
        assert!(matches!(
            stream.decode(0, &mut buf),
            Err(DecodeError::Closed)
        ));
    }

    #[test]
    fn test_corrupt_payload_never_missized() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("flip.seq");
        let original = hand_built_container();
        let entry_start = u32::from_le_bytes(original[28..32].try_into().unwrap()) as usize;
        let entry_len = u32::from_le_bytes(original[32..36].try_into().unwrap()) as usize;

        for offset in entry_start..entry_start + entry_len {
            let mut bytes = original.clone();
            bytes[offset] ^= 0x5a;
            fs::write(&path, &bytes).unwrap();

            let mut stream = SequenceStream::open(&path).unwrap();
            let mut buf = vec![0u8; 64];
            match stream.decode(1, &mut buf) {
                Ok(()) => {}
                Err(DecodeError::CorruptPayload { frame: 1, .. }) => {}
                Err(other) => panic!("unexpected error at offset {offset}: {other}"),
            }

            // The bad frame does not poison the stream
            stream.decode(0, &mut buf).unwrap();
            assert!(buf.iter().all(|&b| b == 0x00));
        }
    }

    #[test]
    fn test_image_dimension_mismatch_is_corrupt() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("mismatch.seq");
        let payload = encode_image(&[0u8; 2 * 2 * 4], 2, 2, ImageEncoding::Png).unwrap();

        let mut bytes = Vec::new();
        let header = SequenceHeader {
            version: FormatVersion::V2,
            mode: EncodingMode::ImageCodec,
            frame_count: 1,
            width: 4,
            height: 4,
            bytes_per_row: None,
        };
        header.write_to(&mut bytes).unwrap();
        FrameIndexEntry {
            position: header.payload_start() as u32,
            length: payload.len() as u32,
        }
        .write_to(&mut bytes)
        .unwrap();
        bytes.extend_from_slice(&payload);
        fs::write(&path, bytes).unwrap();

        let mut stream = SequenceStream::open(&path).unwrap();
        match stream.decode_to_vec(0) {
            Err(DecodeError::CorruptPayload { frame: 0, reason }) => {
                assert!(reason.contains("declares 2x2"), "{reason}");
            }
            other => panic!("expected corrupt payload, got {other:?}"),
        }
    }

    #[test]
    fn test_oversized_image_rejected_from_header() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("oversized.seq");
        // Compresses to a few KiB but decodes to 4 MiB
        let payload =
            encode_image(&vec![0x40u8; 1024 * 1024 * 4], 1024, 1024, ImageEncoding::Png).unwrap();

        let header = SequenceHeader {
            version: FormatVersion::V2,
            mode: EncodingMode::ImageCodec,
            frame_count: 1,
            width: 4,
            height: 4,
            bytes_per_row: None,
        };
        let mut bytes = Vec::new();
        header.write_to(&mut bytes).unwrap();
        FrameIndexEntry {
            position: header.payload_start() as u32,
            length: payload.len() as u32,
        }
        .write_to(&mut bytes)
        .unwrap();
        bytes.extend_from_slice(&payload);
        fs::write(&path, bytes).unwrap();

        let mut stream = SequenceStream::open(&path).unwrap();
        let mut buf = vec![0u8; stream.frame_byte_size()];
        match stream.decode(0, &mut buf) {
            Err(DecodeError::CorruptPayload { reason, .. }) => {
                assert!(reason.contains("declares 1024x1024"), "{reason}");
            }
            other => panic!("expected corrupt payload, got {other:?}"),
        }
    }

    #[test]
    fn test_lazy_scratch() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("lazy.seq");
        fs::write(&path, hand_built_container()).unwrap();

        let config = ReaderConfig {
            scratch: ScratchPolicy::Lazy,
            ..Default::default()
        };
        let mut stream = SequenceStream::open_with(&path, &config).unwrap();
        assert!(stream.decode_to_vec(2).unwrap().iter().all(|&b| b == 0x22));
    }

    #[test]
    fn test_eager_scratch_bounded_by_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("huge-length.seq");

        let header = SequenceHeader {
            version: FormatVersion::V2,
            mode: EncodingMode::RawCompressed,
            frame_count: 1,
            width: 4,
            height: 4,
            bytes_per_row: Some(16),
        };
        let mut bytes = Vec::new();
        header.write_to(&mut bytes).unwrap();
        FrameIndexEntry {
            position: header.payload_start() as u32,
            length: 0x1000_0000,
        }
        .write_to(&mut bytes)
        .unwrap();
        bytes.extend_from_slice(&[0u8; 8]);
        fs::write(&path, &bytes).unwrap();

        let config = ReaderConfig {
            verify_layout: false,
            ..Default::default()
        };
        let mut stream = SequenceStream::open_with(&path, &config).unwrap();
        let scratch_len = stream.inner.as_ref().unwrap().scratch.len();
        assert!(scratch_len as u64 <= bytes.len() as u64, "scratch is {scratch_len} bytes");

        let mut buf = vec![0u8; 64];
        assert!(matches!(
            stream.decode(0, &mut buf),
            Err(DecodeError::ShortRead { frame: 0, .. })
        ));
    }

    #[test]
    fn test_frame_iterator() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("iter.seq");
        fs::write(&path, hand_built_container()).unwrap();

        let mut stream = SequenceStream::open(&path).unwrap();
        let frames = stream.frames();
        assert_eq!(frames.len(), 3);

        let decoded: Vec<_> = frames.map(|f| f.unwrap()).collect();
        for (frame, value) in decoded.iter().zip([0x00u8, 0x11, 0x22]) {
            assert!(frame.iter().all(|&b| b == value));
        }
    }

    #[test]
    fn test_independent_streams() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("shared.seq");
        fs::write(&path, hand_built_container()).unwrap();

        let mut a = SequenceStream::open(&path).unwrap();
        let mut b = SequenceStream::open(&path).unwrap();
        let frame_a = a.decode_to_vec(2).unwrap();
        b.close();
        let frame_a_again = a.decode_to_vec(2).unwrap();
        assert_eq!(frame_a, frame_a_again);
    }

    fn sequence_strategy() -> impl Strategy<Value = (u16, u16, Vec<Vec<u8>>, Vec<usize>)> {
        (1u16..9, 1u16..9, 1usize..6)
            .prop_flat_map(|(w, h, n)| {
                let size = w as usize * h as usize * PIXEL_COMPONENTS;
                (Just(w), Just(h), vec(vec(any::<u8>(), size), n))
            })
            .prop_flat_map(|(w, h, frames)| {
                let order: Vec<usize> = (0..frames.len()).collect();
                (Just(w), Just(h), Just(frames), Just(order).prop_shuffle())
            })
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn prop_roundtrip_any_order((w, h, frames, order) in sequence_strategy()) {
            let dir = tempdir().unwrap();
            for mode in [EncodingMode::RawCompressed, EncodingMode::ImageCodec] {
                let path = dir.path().join(format!("{mode:?}.seq"));
                write_sequence(&path, mode, &frames, w, h);

                let mut stream = SequenceStream::open(&path).unwrap();
                let mut buf = vec![0u8; stream.frame_byte_size()];
                for &i in &order {
                    stream.decode(i, &mut buf).unwrap();
                    prop_assert_eq!(&buf, &frames[i]);
                }
            }
        }
    }
}
