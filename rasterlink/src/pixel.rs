//! Pixel types and owned, typed pixel buffers.
//!
//! A [`PixelBuffer`] owns a band-sequential byte buffer in native byte order.
//! Bands and rows are reached through [`BandView`], a strided 2-D view, so
//! callers never do offset arithmetic on the flat buffer themselves.

use std::fmt;

/// Pixel data types supported by the image service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelType {
    Byte,
    UInt16,
    Int16,
    UInt32,
    Int32,
    Float32,
    Float64,
}

impl PixelType {
    /// All supported types, in service declaration order.
    pub const ALL: [PixelType; 7] = [
        PixelType::Byte,
        PixelType::UInt16,
        PixelType::Int16,
        PixelType::UInt32,
        PixelType::Int32,
        PixelType::Float32,
        PixelType::Float64,
    ];

    /// Size of one sample in bytes.
    pub fn size_bytes(self) -> usize {
        match self {
            PixelType::Byte => 1,
            PixelType::UInt16 | PixelType::Int16 => 2,
            PixelType::UInt32 | PixelType::Int32 | PixelType::Float32 => 4,
            PixelType::Float64 => 8,
        }
    }

    /// True for floating point types.
    pub fn is_floating(self) -> bool {
        matches!(self, PixelType::Float32 | PixelType::Float64)
    }

    /// Maps a service `pixelType` name onto a pixel type.
    ///
    /// Names are matched exactly; anything outside the fixed set is `None`.
    pub fn from_service_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.service_name() == name)
    }

    /// The name the service uses for this type.
    pub fn service_name(self) -> &'static str {
        match self {
            PixelType::Byte => "Byte",
            PixelType::UInt16 => "UInt16",
            PixelType::Int16 => "Int16",
            PixelType::UInt32 => "UInt32",
            PixelType::Int32 => "Int32",
            PixelType::Float32 => "Float32",
            PixelType::Float64 => "Float64",
        }
    }

    /// Reads one native-order sample as `f64`.
    pub(crate) fn read_value(self, bytes: &[u8]) -> f64 {
        match self {
            PixelType::Byte => bytes[0] as f64,
            PixelType::UInt16 => u16::from_ne_bytes([bytes[0], bytes[1]]) as f64,
            PixelType::Int16 => i16::from_ne_bytes([bytes[0], bytes[1]]) as f64,
            PixelType::UInt32 => u32::from_ne_bytes(four(bytes)) as f64,
            PixelType::Int32 => i32::from_ne_bytes(four(bytes)) as f64,
            PixelType::Float32 => f32::from_ne_bytes(four(bytes)) as f64,
            PixelType::Float64 => f64::from_ne_bytes(eight(bytes)),
        }
    }

    /// Writes one native-order sample, rounding and saturating integers.
    pub(crate) fn write_value(self, value: f64, out: &mut [u8]) {
        let rounded = if value.is_nan() { 0.0 } else { value.round() };
        match self {
            PixelType::Byte => out[0] = rounded as u8,
            PixelType::UInt16 => out[..2].copy_from_slice(&(rounded as u16).to_ne_bytes()),
            PixelType::Int16 => out[..2].copy_from_slice(&(rounded as i16).to_ne_bytes()),
            PixelType::UInt32 => out[..4].copy_from_slice(&(rounded as u32).to_ne_bytes()),
            PixelType::Int32 => out[..4].copy_from_slice(&(rounded as i32).to_ne_bytes()),
            PixelType::Float32 => out[..4].copy_from_slice(&(value as f32).to_ne_bytes()),
            PixelType::Float64 => out[..8].copy_from_slice(&value.to_ne_bytes()),
        }
    }
}

impl fmt::Display for PixelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.service_name())
    }
}

fn four(bytes: &[u8]) -> [u8; 4] {
    [bytes[0], bytes[1], bytes[2], bytes[3]]
}

fn eight(bytes: &[u8]) -> [u8; 8] {
    let mut out = [0u8; 8];
    out.copy_from_slice(&bytes[..8]);
    out
}

/// Owned band-sequential pixel buffer.
#[derive(Clone, PartialEq)]
pub struct PixelBuffer {
    pixel_type: PixelType,
    width: usize,
    height: usize,
    bands: usize,
    data: Vec<u8>,
}

impl fmt::Debug for PixelBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PixelBuffer")
            .field("pixel_type", &self.pixel_type)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bands", &self.bands)
            .field("bytes", &self.data.len())
            .finish()
    }
}

impl PixelBuffer {
    /// Creates a buffer with every sample set to `value`.
    pub fn filled(
        pixel_type: PixelType,
        width: usize,
        height: usize,
        bands: usize,
        value: f64,
    ) -> Self {
        let size = pixel_type.size_bytes();
        let mut data = vec![0u8; width * height * bands * size];
        if value != 0.0 {
            let mut sample = [0u8; 8];
            pixel_type.write_value(value, &mut sample);
            for chunk in data.chunks_exact_mut(size) {
                chunk.copy_from_slice(&sample[..size]);
            }
        }
        Self {
            pixel_type,
            width,
            height,
            bands,
            data,
        }
    }

    /// Wraps native-order band-sequential bytes.
    ///
    /// Returns `None` when the length does not match the dimensions.
    pub fn from_bytes(
        pixel_type: PixelType,
        width: usize,
        height: usize,
        bands: usize,
        data: Vec<u8>,
    ) -> Option<Self> {
        if data.len() != width * height * bands * pixel_type.size_bytes() {
            return None;
        }
        Some(Self {
            pixel_type,
            width,
            height,
            bands,
            data,
        })
    }

    /// Wraps little-endian band-sequential bytes, converting to native order.
    pub fn from_le_bytes(
        pixel_type: PixelType,
        width: usize,
        height: usize,
        bands: usize,
        mut data: Vec<u8>,
    ) -> Option<Self> {
        if cfg!(target_endian = "big") {
            let size = pixel_type.size_bytes();
            for chunk in data.chunks_exact_mut(size) {
                chunk.reverse();
            }
        }
        Self::from_bytes(pixel_type, width, height, bands, data)
    }

    pub fn pixel_type(&self) -> PixelType {
        self.pixel_type
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn band_count(&self) -> usize {
        self.bands
    }

    /// Raw native-order bytes of all bands.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Size of the owned buffer in bytes.
    pub fn byte_len(&self) -> usize {
        self.data.len()
    }

    fn band_len(&self) -> usize {
        self.width * self.height * self.pixel_type.size_bytes()
    }

    /// Strided view over one band.
    ///
    /// # Panics
    ///
    /// Panics if `band` is out of range.
    pub fn band(&self, band: usize) -> BandView<'_> {
        assert!(band < self.bands, "band {} out of range", band);
        let len = self.band_len();
        BandView {
            data: &self.data[band * len..(band + 1) * len],
            pixel_type: self.pixel_type,
            width: self.width,
            height: self.height,
        }
    }

    /// Sample value of `band` at `(x, y)`.
    pub fn value(&self, band: usize, x: usize, y: usize) -> f64 {
        self.band(band).value(x, y)
    }

    /// Copies a `width`×`height` window of `src_band` into this buffer.
    ///
    /// Samples are converted when the pixel types differ.
    #[allow(clippy::too_many_arguments)]
    pub fn copy_window_from(
        &mut self,
        dst_band: usize,
        dst_x: usize,
        dst_y: usize,
        src: &BandView<'_>,
        src_x: usize,
        src_y: usize,
        width: usize,
        height: usize,
    ) {
        let dst_size = self.pixel_type.size_bytes();
        let src_size = src.pixel_type.size_bytes();
        let band_offset = dst_band * self.band_len();
        let row_stride = self.width * dst_size;
        for row in 0..height {
            let src_row = src.row(src_y + row);
            let dst_start = band_offset + (dst_y + row) * row_stride + dst_x * dst_size;
            let dst_row = &mut self.data[dst_start..dst_start + width * dst_size];
            let src_row = &src_row[src_x * src_size..(src_x + width) * src_size];
            if src.pixel_type == self.pixel_type {
                dst_row.copy_from_slice(src_row);
            } else {
                for (d, s) in dst_row
                    .chunks_exact_mut(dst_size)
                    .zip(src_row.chunks_exact(src_size))
                {
                    self.pixel_type.write_value(src.pixel_type.read_value(s), d);
                }
            }
        }
    }
}

/// Borrowed view over one band of a [`PixelBuffer`].
#[derive(Debug, Clone, Copy)]
pub struct BandView<'a> {
    data: &'a [u8],
    pixel_type: PixelType,
    width: usize,
    height: usize,
}

impl<'a> BandView<'a> {
    pub fn pixel_type(&self) -> PixelType {
        self.pixel_type
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    /// Bytes of row `y`.
    pub fn row(&self, y: usize) -> &'a [u8] {
        let stride = self.width * self.pixel_type.size_bytes();
        &self.data[y * stride..(y + 1) * stride]
    }

    /// Sample at `(x, y)` as `f64`.
    pub fn value(&self, x: usize, y: usize) -> f64 {
        let size = self.pixel_type.size_bytes();
        self.pixel_type.read_value(&self.row(y)[x * size..(x + 1) * size])
    }
}
