//! Transport encoding and resampling negotiation.

use std::fmt;

use tracing::warn;

use crate::config::PixelEncoding;
use crate::pixel::PixelType;

/// Encoding of the pixel part of a tile response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportEncoding {
    Raw,
    Png,
    Jpeg,
    Jpeg2000,
}

impl TransportEncoding {
    /// MIME type of the pixel part.
    pub fn content_type(self) -> &'static str {
        match self {
            TransportEncoding::Raw => "application/octet-stream",
            TransportEncoding::Png => "image/png",
            TransportEncoding::Jpeg => "image/jpeg",
            TransportEncoding::Jpeg2000 => "image/jp2",
        }
    }

    /// True if the encoding can carry `band_count` bands of `pixel_type`.
    pub fn supports(self, band_count: usize, pixel_type: PixelType) -> bool {
        match self {
            TransportEncoding::Raw => true,
            TransportEncoding::Png => {
                matches!(band_count, 1 | 3 | 4) && pixel_type == PixelType::Byte
            }
            TransportEncoding::Jpeg => matches!(band_count, 1 | 3) && pixel_type == PixelType::Byte,
            TransportEncoding::Jpeg2000 => !pixel_type.is_floating(),
        }
    }

    /// Choose the session encoding from the configured one.
    ///
    /// `Auto` selects PNG for 1, 3 or 4 Byte bands and raw otherwise. An
    /// explicit encoding the bands cannot use falls back to raw with a
    /// warning.
    pub fn negotiate(requested: PixelEncoding, band_count: usize, pixel_type: PixelType) -> Self {
        let explicit = match requested {
            PixelEncoding::Auto => {
                return if TransportEncoding::Png.supports(band_count, pixel_type) {
                    TransportEncoding::Png
                } else {
                    TransportEncoding::Raw
                };
            }
            PixelEncoding::Raw => TransportEncoding::Raw,
            PixelEncoding::Png => TransportEncoding::Png,
            PixelEncoding::Jpeg => TransportEncoding::Jpeg,
            PixelEncoding::Jpeg2000 => TransportEncoding::Jpeg2000,
        };
        if explicit.supports(band_count, pixel_type) {
            explicit
        } else {
            warn!(
                encoding = %explicit,
                bands = band_count,
                pixel_type = %pixel_type,
                "Encoding not supported for this band layout, falling back to RAW"
            );
            TransportEncoding::Raw
        }
    }

    /// Encoding used for a single fetch of `band_count` bands.
    ///
    /// PNG and JPEG are only kept for band counts they can carry.
    pub fn for_request(self, band_count: usize) -> Self {
        match self {
            TransportEncoding::Png if matches!(band_count, 1 | 3 | 4) => self,
            TransportEncoding::Jpeg if matches!(band_count, 1 | 3) => self,
            TransportEncoding::Jpeg2000 => self,
            _ => TransportEncoding::Raw,
        }
    }
}

impl fmt::Display for TransportEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransportEncoding::Raw => "RAW",
            TransportEncoding::Png => "PNG",
            TransportEncoding::Jpeg => "JPEG",
            TransportEncoding::Jpeg2000 => "JPEG2000",
        };
        f.write_str(name)
    }
}

/// Resampling requested by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Resampling {
    #[default]
    Nearest,
    Bilinear,
    Cubic,
    CubicSpline,
    Lanczos,
    Average,
    Mode,
    Gauss,
}

impl Resampling {
    /// Sampling algorithm name understood by the service.
    ///
    /// Methods the service does not know are replaced by `BILINEAR`.
    pub fn service_name(self) -> &'static str {
        match self {
            Resampling::Nearest => "NEAREST",
            Resampling::Bilinear => "BILINEAR",
            Resampling::Cubic => "BICUBIC",
            Resampling::Average => "AVERAGE",
            other => {
                warn!(resampling = ?other, "Resampling not supported by server, using BILINEAR");
                "BILINEAR"
            }
        }
    }
}
