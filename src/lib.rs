//! Seqstream - single-file containers for pre-rendered image sequences.
//!
//! Turntables and flipbooks are often shipped as hundreds of loose image
//! files. This crate packs such a sequence into one seekable file and
//! decodes any single frame on demand, which suits interactive scrubbing
//! where frames are requested out of order.
//!
//! # Architecture
//!
//! - `sequence`: the container format, its reader and writer
//! - `config`: reader and writer options
//!
//! # Example
//!
//! ```rust,no_run
//! use seqstream::SequenceStream;
//!
//! let mut stream = SequenceStream::open("turntable.seq")?;
//! let mut pixels = vec![0u8; stream.frame_byte_size()];
//!
//! for frame in stream.range().rev() {
//!     stream.decode(frame, &mut pixels)?;
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod config;
pub mod sequence;

// Re-export commonly used types
pub use config::{ImageEncoding, ReaderConfig, ScratchPolicy, WriterConfig};
pub use sequence::{
    DecodeError, EncodingMode, FormatVersion, FrameGeometry, OpenError, SequenceStream,
    SequenceWriter, WriteError,
};
