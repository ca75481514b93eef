//! Decoding of compressed tile payloads.

use image::{load_from_memory_with_format, DynamicImage, ImageFormat};

use super::encoding::TransportEncoding;
use crate::error::{RasterError, RasterResult};
use crate::pixel::{PixelBuffer, PixelType};

/// Turns an encoded tile into a band-sequential pixel buffer.
pub trait TileDecoder: Send + Sync {
    fn decode(&self, encoding: TransportEncoding, data: &[u8]) -> RasterResult<PixelBuffer>;
}

/// Decoder for PNG and JPEG tiles backed by the `image` crate.
///
/// JPEG2000 payloads are rejected; a session configured for them needs a
/// decoder that understands the format.
#[derive(Debug, Default, Clone, Copy)]
pub struct ImageTileDecoder;

impl TileDecoder for ImageTileDecoder {
    fn decode(&self, encoding: TransportEncoding, data: &[u8]) -> RasterResult<PixelBuffer> {
        let format = match encoding {
            TransportEncoding::Png => ImageFormat::Png,
            TransportEncoding::Jpeg => ImageFormat::Jpeg,
            other => {
                return Err(RasterError::Protocol(format!(
                    "no decoder available for {} tiles",
                    other
                )))
            }
        };
        let image = load_from_memory_with_format(data, format)
            .map_err(|e| RasterError::Protocol(format!("failed to decode {} tile: {}", encoding, e)))?;
        deinterleave(&image)
    }
}

/// Split interleaved image samples into band-sequential order.
fn deinterleave(image: &DynamicImage) -> RasterResult<PixelBuffer> {
    let color = image.color();
    let channels = color.channel_count() as usize;
    let sample_size = color.bytes_per_pixel() as usize / channels;
    let pixel_type = match sample_size {
        1 => PixelType::Byte,
        2 => PixelType::UInt16,
        4 => PixelType::Float32,
        _ => {
            return Err(RasterError::Protocol(format!(
                "unsupported decoded color type {:?}",
                color
            )))
        }
    };

    let width = image.width() as usize;
    let height = image.height() as usize;
    let interleaved = image.as_bytes();
    let pixel_stride = channels * sample_size;
    let band_len = width * height * sample_size;

    let mut data = vec![0u8; band_len * channels];
    for (i, pixel) in interleaved.chunks_exact(pixel_stride).enumerate() {
        for band in 0..channels {
            let dst = band * band_len + i * sample_size;
            let src = band * sample_size;
            data[dst..dst + sample_size].copy_from_slice(&pixel[src..src + sample_size]);
        }
    }

    PixelBuffer::from_bytes(pixel_type, width, height, channels, data)
        .ok_or_else(|| RasterError::Protocol("decoded tile has inconsistent size".to_string()))
}
