//! Seekable container for raster image sequences.
//!
//! A sequence file packs a numbered run of equally sized frames behind a
//! frame index so any single frame can be decoded without touching the
//! rest.
//!
//! # File Format
//!
//! All integers are little-endian and tightly packed:
//!
//! ```text
//! Header (16 or 20 bytes):
//!   Signature: i32 (0x320 = version 1, 0x321 = version 2)
//!   Encoding mode: u32 (0 = encoded image, 1 = LZ4 raw)
//!   Frame count: u32
//!   Width: u16
//!   Height: u16
//!   Bytes per row: u32 (version 1 always, version 2 raw mode only)
//!
//! Frame index table (frame_count * 8 bytes):
//!   Position: u32 (absolute offset)
//!   Length: u32 (encoded size)
//!
//! Frame data (variable):
//!   Raw mode: LZ4 block of height * bytes_per_row bytes
//!   Encoded-image mode: a complete image file (PNG, JPEG, ...)
//! ```

mod codec;
mod format;
mod stream;
mod writer;

pub use codec::{DecodedImage, compress_frame, decode_image, decompress_frame, encode_image};
pub use format::{
    EncodingMode, FormatError, FormatVersion, FrameIndexEntry, MAX_HEADER_LEN, PIXEL_COMPONENTS,
    SEQUENCE_SIGNATURE_V1, SEQUENCE_SIGNATURE_V2, SequenceHeader, parse_frame_index, parse_header,
    validate_layout,
};
pub use stream::{DecodeError, FrameIterator, OpenError, SequenceStream};
pub use writer::{FrameGeometry, SequenceWriter, WriteError, WriteStats};
