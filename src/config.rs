//! Configuration types for reading and writing sequence containers.

use serde::{Deserialize, Serialize};

use crate::sequence::{EncodingMode, FormatVersion};

fn default_verify_layout() -> bool {
    true
}

/// When the reader allocates its compressed-frame scratch buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScratchPolicy {
    /// Reserve the largest compressed payload at open time.
    #[default]
    Eager,
    /// Grow on demand during decode.
    Lazy,
}

/// Reader options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReaderConfig {
    /// Scratch buffer allocation policy (raw mode only).
    #[serde(default)]
    pub scratch: ScratchPolicy,
    /// Check index ordering and payload bounds against the file at open.
    #[serde(default = "default_verify_layout")]
    pub verify_layout: bool,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            scratch: ScratchPolicy::Eager,
            verify_layout: true,
        }
    }
}

/// Encoder used for `ImageCodec` frames given as raw pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "format")]
pub enum ImageEncoding {
    /// Lossless.
    #[default]
    Png,
    /// Lossy, quality in 1..=100.
    Jpeg { quality: u8 },
}

/// Writer options.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WriterConfig {
    /// Payload encoding for every frame.
    #[serde(default)]
    pub mode: EncodingMode,
    /// Header layout revision.
    #[serde(default)]
    pub version: FormatVersion,
    /// Image encoder for `ImageCodec` mode.
    #[serde(default)]
    pub image: ImageEncoding,
}

impl WriterConfig {
    /// Validate configuration parameters.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let ImageEncoding::Jpeg { quality } = self.image {
            if quality == 0 || quality > 100 {
                return Err(ConfigError::InvalidQuality(quality));
            }
        }
        Ok(())
    }
}

/// Configuration validation errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("JPEG quality must be in 1..=100, got {0}")]
    InvalidQuality(u8),
}
