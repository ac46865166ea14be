//! Payload codecs: LZ4 block compression for raw frames and the general
//! image codec for encoded frames.

use std::io::Cursor;

use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::{ColorType, ImageEncoder, ImageResult, RgbaImage};
use lz4_flex::block::DecompressError;

use crate::config::ImageEncoding;

/// Compress one raw frame into an LZ4 block (no size prefix).
pub fn compress_frame(raw: &[u8]) -> Vec<u8> {
    lz4_flex::block::compress(raw)
}

/// Decompress an LZ4 block into `output`, returning the bytes produced.
///
/// Never writes past `output.len()`; a block that would expand further is
/// reported as an error.
pub fn decompress_frame(compressed: &[u8], output: &mut [u8]) -> Result<usize, DecompressError> {
    lz4_flex::block::decompress_into(compressed, output)
}

/// A decoded image owned for the span of one decode call.
///
/// Holds the codec's pixel buffer; dropping it releases the buffer on every
/// exit path.
pub struct DecodedImage {
    pixels: RgbaImage,
}

impl DecodedImage {
    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    /// RGBA8 pixel bytes, row-major with no padding.
    pub fn as_bytes(&self) -> &[u8] {
        self.pixels.as_raw()
    }
}

/// Decode a self-describing encoded image to RGBA8.
///
/// Every call is one-shot: the format is sniffed from the payload and no
/// state survives between calls.
pub fn decode_image(encoded: &[u8]) -> ImageResult<DecodedImage> {
    let pixels = image::load_from_memory(encoded)?.into_rgba8();
    Ok(DecodedImage { pixels })
}

/// Read the dimensions of an encoded image without decoding its pixels.
pub fn probe_dimensions(encoded: &[u8]) -> ImageResult<(u32, u32)> {
    image::io::Reader::new(Cursor::new(encoded))
        .with_guessed_format()?
        .into_dimensions()
}

/// Encode RGBA8 pixels with the configured image encoder.
pub fn encode_image(
    rgba: &[u8],
    width: u32,
    height: u32,
    encoding: ImageEncoding,
) -> ImageResult<Vec<u8>> {
    let mut out = Vec::new();
    match encoding {
        ImageEncoding::Png => {
            PngEncoder::new(&mut out).write_image(rgba, width, height, ColorType::Rgba8)?;
        }
        ImageEncoding::Jpeg { quality } => {
            // JPEG carries no alpha channel
            let rgb: Vec<u8> = rgba
                .chunks_exact(4)
                .flat_map(|px| [px[0], px[1], px[2]])
                .collect();
            JpegEncoder::new_with_quality(&mut out, quality).write_image(
                &rgb,
                width,
                height,
                ColorType::Rgb8,
            )?;
        }
    }
    Ok(out)
}
