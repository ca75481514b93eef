//! Image and band descriptors.

use std::collections::BTreeMap;
use std::fmt;

use crate::pixel::PixelType;

/// Six-coefficient affine transform from pixel/line to georeferenced
/// coordinates.
pub type GeoTransform = [f64; 6];

/// Identity geotransform used when the service declares none.
pub const IDENTITY_GEOTRANSFORM: GeoTransform = [0.0, 1.0, 0.0, 0.0, 0.0, 1.0];

/// Number of coefficients in each RPC polynomial.
pub const RPC_COEFF_COUNT: usize = 20;

/// Color interpretation name that designates the main mask band.
pub const MAIN_MASK_INTERPRETATION: &str = "MAIN_MASK";

/// Addresses a band of a session.
///
/// Ordinary bands are numbered `1..=N`; the main mask band lives outside
/// that numbering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BandId {
    MainMask,
    Band(usize),
}

impl BandId {
    /// Numeric index, with the main mask at 0.
    pub fn index(self) -> usize {
        match self {
            BandId::MainMask => 0,
            BandId::Band(n) => n,
        }
    }
}

impl fmt::Display for BandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BandId::MainMask => f.write_str("mask"),
            BandId::Band(n) => write!(f, "band {}", n),
        }
    }
}

/// Declared color interpretation of a band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ColorInterpretation {
    #[default]
    Undefined,
    Red,
    Green,
    Blue,
    Gray,
    Alpha,
}

impl ColorInterpretation {
    /// Case-insensitive lookup; unknown names map to `Undefined`.
    pub fn from_service_name(name: &str) -> Self {
        match name.to_ascii_uppercase().as_str() {
            "RED" => ColorInterpretation::Red,
            "GREEN" => ColorInterpretation::Green,
            "BLUE" => ColorInterpretation::Blue,
            "GRAY" => ColorInterpretation::Gray,
            "ALPHA" => ColorInterpretation::Alpha,
            _ => ColorInterpretation::Undefined,
        }
    }
}

/// One band as declared by the service.
#[derive(Debug, Clone, PartialEq)]
pub struct BandDescriptor {
    /// 1-based position in the service's `bands` array.
    pub source_index: usize,
    /// Name used to address the band in tile requests.
    pub name: String,
    pub pixel_type: PixelType,
    pub description: Option<String>,
    /// Raw `colorInterpretation` value as sent by the service.
    pub color_interpretation_name: Option<String>,
    pub color_interpretation: ColorInterpretation,
    pub is_mask: bool,
}

/// Spatial reference as sent by the service (`type` + `value`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SrsRef {
    pub srs_type: String,
    pub value: String,
}

impl SrsRef {
    pub fn new(srs_type: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            srs_type: srs_type.into(),
            value: value.into(),
        }
    }

    /// True for SRS kinds a spatial reference library can interpret.
    pub fn is_interpretable(&self) -> bool {
        matches!(self.srs_type.as_str(), "urn" | "proj4" | "epsg")
    }
}

/// Rational polynomial camera model, carried opaquely.
#[derive(Debug, Clone, PartialEq)]
pub struct RpcModel {
    pub err_bias: Option<f64>,
    pub err_rand: Option<f64>,
    pub samp_off: f64,
    pub line_off: f64,
    pub lat_off: f64,
    pub long_off: f64,
    pub height_off: f64,
    pub line_scale: f64,
    pub samp_scale: f64,
    pub lat_scale: f64,
    pub long_scale: f64,
    pub height_scale: f64,
    pub line_num_coeff: [f64; RPC_COEFF_COUNT],
    pub line_den_coeff: [f64; RPC_COEFF_COUNT],
    pub samp_num_coeff: [f64; RPC_COEFF_COUNT],
    pub samp_den_coeff: [f64; RPC_COEFF_COUNT],
}

/// Acquisition metadata of the scene.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AcquisitionInfo {
    /// Normalised to `YYYY-MM-DD HH:MM:SS`.
    pub acquisition_date: Option<String>,
    pub cloud_cover: Option<f64>,
    pub satellite: Option<String>,
}

impl AcquisitionInfo {
    /// Cloud cover with two decimals.
    pub fn cloud_cover_display(&self) -> Option<String> {
        self.cloud_cover.map(|c| format!("{:.2}", c))
    }
}

/// Everything the service declares about an image.
///
/// Built once when a session opens and shared read-only with every
/// overview level.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageDescriptor {
    pub width: u32,
    pub height: u32,
    /// Exposed ordinary bands, in service order.
    pub bands: Vec<BandDescriptor>,
    pub main_mask: Option<BandDescriptor>,
    pub nodata: Option<f64>,
    pub geotransform: Option<GeoTransform>,
    pub srs: Option<SrsRef>,
    pub rpc: Option<RpcModel>,
    pub acquisition: AcquisitionInfo,
    /// Significant bits per sample when not a whole type width.
    pub nbits: Option<u32>,
    /// Pixel type of the first declared band.
    pub dataset_pixel_type: PixelType,
    /// Tile-fetch endpoint advertised by the service.
    pub get_buffer_url: String,
    /// Remaining scalar properties, stringified.
    pub extra: BTreeMap<String, String>,
}

impl ImageDescriptor {
    /// Number of exposed ordinary bands.
    pub fn band_count(&self) -> usize {
        self.bands.len()
    }

    /// Descriptor for a band id.
    pub fn band(&self, id: BandId) -> Option<&BandDescriptor> {
        match id {
            BandId::MainMask => self.main_mask.as_ref(),
            BandId::Band(n) if n >= 1 => self.bands.get(n - 1),
            BandId::Band(_) => None,
        }
    }

    /// Every addressable band: the main mask first, if any, then `1..=N`.
    pub fn all_band_ids(&self) -> Vec<BandId> {
        let mut ids = Vec::with_capacity(self.bands.len() + 1);
        if self.main_mask.is_some() {
            ids.push(BandId::MainMask);
        }
        ids.extend((1..=self.bands.len()).map(BandId::Band));
        ids
    }

    /// True for the main mask and for bands flagged as masks.
    pub fn is_mask(&self, id: BandId) -> bool {
        match id {
            BandId::MainMask => true,
            other => self.band(other).is_some_and(|b| b.is_mask),
        }
    }

    /// Pixel type of a band; the main mask defaults to `Byte`.
    pub fn pixel_type(&self, id: BandId) -> Option<PixelType> {
        match id {
            BandId::MainMask => self.main_mask.as_ref().map(|_| PixelType::Byte),
            other => self.band(other).map(|b| b.pixel_type),
        }
    }

    /// Value used to fill samples the service did not deliver.
    pub fn fill_value(&self) -> f64 {
        self.nodata.unwrap_or(0.0)
    }
}
