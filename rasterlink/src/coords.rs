//! Coordinate model: geotransform, SRS and server-side reprojection.
//!
//! A session starts in [`RequestMode::Image`], where tile requests address
//! the full-resolution raster in pixel coordinates. Negotiating a target SRS
//! switches it to [`RequestMode::Georeferenced`], where requests carry
//! coordinates in the target SRS and an explicit sampling step.

use tracing::{debug, warn};

use crate::error::{RasterError, RasterResult};
use crate::metadata::{GeoTransform, ImageDescriptor, SrsRef, IDENTITY_GEOTRANSFORM};

/// A rectangle of pixels in raster coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Window {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Window {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Exclusive right edge.
    pub fn right(&self) -> u64 {
        self.x as u64 + self.width as u64
    }

    /// Exclusive bottom edge.
    pub fn bottom(&self) -> u64 {
        self.y as u64 + self.height as u64
    }

    /// True if `other` lies entirely inside this window.
    pub fn contains(&self, other: &Window) -> bool {
        other.x >= self.x
            && other.y >= self.y
            && other.right() <= self.right()
            && other.bottom() <= self.bottom()
    }

    /// True if the window lies inside a `width`×`height` raster.
    pub fn fits_in(&self, width: u32, height: u32) -> bool {
        self.right() <= width as u64 && self.bottom() <= height as u64
    }

    /// Number of pixels.
    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// The part of the window inside a `width`×`height` raster, if any.
    pub fn clipped_to(&self, width: u32, height: u32) -> Option<Window> {
        let right = self.right().min(width as u64);
        let bottom = self.bottom().min(height as u64);
        if self.x as u64 >= right || self.y as u64 >= bottom {
            return None;
        }
        Some(Window::new(
            self.x,
            self.y,
            (right - self.x as u64) as u32,
            (bottom - self.y as u64) as u32,
        ))
    }
}

/// A rectangular range of blocks on the block grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockRange {
    pub x_off: u32,
    pub y_off: u32,
    pub x_count: u32,
    pub y_count: u32,
}

impl BlockRange {
    pub fn new(x_off: u32, y_off: u32, x_count: u32, y_count: u32) -> Self {
        Self {
            x_off,
            y_off,
            x_count,
            y_count,
        }
    }

    /// Smallest range covering a non-empty window.
    pub fn covering(window: &Window, block_size: u32) -> Self {
        let x_off = window.x / block_size;
        let y_off = window.y / block_size;
        let x_last = ((window.right() - 1) / block_size as u64) as u32;
        let y_last = ((window.bottom() - 1) / block_size as u64) as u32;
        Self {
            x_off,
            y_off,
            x_count: x_last - x_off + 1,
            y_count: y_last - y_off + 1,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.x_count == 0 || self.y_count == 0
    }

    /// Number of blocks.
    pub fn block_count(&self) -> u64 {
        self.x_count as u64 * self.y_count as u64
    }

    /// Block coordinates in row-major order.
    pub fn blocks(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        (self.y_off..self.y_off + self.y_count)
            .flat_map(move |by| (self.x_off..self.x_off + self.x_count).map(move |bx| (bx, by)))
    }

    /// Pixel window covered by the range, clipped to the raster.
    pub fn pixel_window(&self, block_size: u32, width: u32, height: u32) -> Window {
        let ulx = self.x_off as u64 * block_size as u64;
        let uly = self.y_off as u64 * block_size as u64;
        let lrx = ((self.x_off + self.x_count) as u64 * block_size as u64).min(width as u64);
        let lry = ((self.y_off + self.y_count) as u64 * block_size as u64).min(height as u64);
        Window::new(
            ulx as u32,
            uly as u32,
            lrx.saturating_sub(ulx) as u32,
            lry.saturating_sub(uly) as u32,
        )
    }

    /// Uncompressed bytes of full blocks for the given total sample size.
    pub fn byte_volume(&self, block_size: u32, bytes_per_pixel: u64) -> u64 {
        self.block_count() * block_size as u64 * block_size as u64 * bytes_per_pixel
    }
}

/// How tile request bounding boxes are expressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestMode {
    Image,
    Georeferenced,
}

/// An authority-qualified SRS code such as `EPSG:4326`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorityCode {
    pub authority: String,
    pub code: String,
}

/// Resolves user-supplied SRS strings to authority codes.
pub trait SrsResolver: Send + Sync {
    fn resolve(&self, srs: &str) -> Option<AuthorityCode>;
}

/// Resolver for `AUTH:code` and `urn:ogc:def:crs:AUTH:[version]:code` strings.
#[derive(Debug, Default, Clone, Copy)]
pub struct AuthorityCodeResolver;

impl SrsResolver for AuthorityCodeResolver {
    fn resolve(&self, srs: &str) -> Option<AuthorityCode> {
        let srs = srs.trim();
        let (authority, code) = match srs.strip_prefix("urn:ogc:def:crs:") {
            Some(rest) => {
                let mut parts = rest.split(':');
                let authority = parts.next()?;
                let code = parts.last()?;
                (authority, code)
            }
            None => srs.split_once(':')?,
        };
        if authority.is_empty() || code.is_empty() || !code.chars().all(|c| c.is_ascii_digit()) {
            return None;
        }
        Some(AuthorityCode {
            authority: authority.to_ascii_uppercase(),
            code: code.to_string(),
        })
    }
}

/// Raster footprint handed to an [`OutputExtentSuggester`].
#[derive(Debug, Clone, PartialEq)]
pub struct SourceFootprint {
    pub width: u32,
    pub height: u32,
    pub geotransform: GeoTransform,
    pub srs: SrsRef,
}

/// Output raster size and geotransform for a reprojection.
#[derive(Debug, Clone, PartialEq)]
pub struct SuggestedExtent {
    pub width: u32,
    pub height: u32,
    pub geotransform: GeoTransform,
}

/// Computes the output extent of warping a raster into another SRS.
pub trait OutputExtentSuggester: Send + Sync {
    fn suggest(&self, source: &SourceFootprint, target: &AuthorityCode) -> Option<SuggestedExtent>;
}

/// Geotransform, SRS and request mode of one raster level.
#[derive(Debug, Clone, PartialEq)]
pub struct CoordinateModel {
    width: u32,
    height: u32,
    geotransform: Option<GeoTransform>,
    srs: Option<SrsRef>,
    mode: RequestMode,
}

impl CoordinateModel {
    /// Model of the full-resolution raster described by `desc`.
    pub fn from_descriptor(desc: &ImageDescriptor) -> Self {
        if let Some(srs) = &desc.srs {
            if !srs.is_interpretable() {
                warn!(
                    srs_type = %srs.srs_type,
                    "Ambiguous SRS profile, treating the image as having no usable projection"
                );
            }
        }
        Self {
            width: desc.width,
            height: desc.height,
            geotransform: desc.geotransform,
            srs: desc.srs.clone(),
            mode: RequestMode::Image,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn mode(&self) -> RequestMode {
        self.mode
    }

    pub fn srs(&self) -> Option<&SrsRef> {
        self.srs.as_ref()
    }

    /// True when the service declared a geotransform (or one was negotiated).
    pub fn has_geotransform(&self) -> bool {
        self.geotransform.is_some()
    }

    /// The geotransform, defaulting to identity.
    pub fn geotransform(&self) -> GeoTransform {
        self.geotransform.unwrap_or(IDENTITY_GEOTRANSFORM)
    }

    /// Map pixel/line coordinates through the geotransform.
    pub fn apply(&self, pixel: f64, line: f64) -> (f64, f64) {
        let gt = self.geotransform();
        (
            gt[0] + pixel * gt[1] + line * gt[2],
            gt[3] + pixel * gt[4] + line * gt[5],
        )
    }

    /// Sampling step sent with tile requests: the pixel size when
    /// georeferenced, zero otherwise.
    pub fn request_step(&self) -> (f64, f64) {
        match self.mode {
            RequestMode::Georeferenced => {
                let gt = self.geotransform();
                (gt[1], gt[5].abs())
            }
            RequestMode::Image => (0.0, 0.0),
        }
    }

    /// Switch to georeferenced requests in `target_srs`.
    ///
    /// Requires a usable source SRS and geotransform, a target that resolves
    /// to an EPSG code, and a successful extent suggestion.
    pub fn negotiate_reprojection(
        &mut self,
        target_srs: &str,
        resolver: &dyn SrsResolver,
        suggester: &dyn OutputExtentSuggester,
    ) -> RasterResult<()> {
        let source_srs = self.srs.clone().filter(SrsRef::is_interpretable);
        let (Some(source_srs), Some(geotransform)) = (source_srs, self.geotransform) else {
            return Err(RasterError::Metadata(
                "target SRS is specified, but projection and/or geotransform are missing in image metadata"
                    .to_string(),
            ));
        };

        let target = resolver
            .resolve(target_srs)
            .ok_or_else(|| RasterError::Metadata(format!("invalid target SRS '{}'", target_srs)))?;
        if !target.authority.eq_ignore_ascii_case("EPSG") {
            return Err(RasterError::Metadata(format!(
                "target SRS '{}' cannot be identified to a EPSG code",
                target_srs
            )));
        }

        let footprint = SourceFootprint {
            width: self.width,
            height: self.height,
            geotransform,
            srs: source_srs,
        };
        let extent = suggester
            .suggest(&footprint, &target)
            .filter(|e| e.width > 0 && e.height > 0)
            .ok_or_else(|| {
                RasterError::Metadata(format!("cannot find extent in target SRS '{}'", target_srs))
            })?;

        debug!(
            target = %target_srs,
            width = extent.width,
            height = extent.height,
            "Switching to georeferenced requests"
        );
        self.width = extent.width;
        self.height = extent.height;
        self.geotransform = Some(extent.geotransform);
        self.srs = Some(SrsRef::new("epsg", format!("epsg:{}", target.code)));
        self.mode = RequestMode::Georeferenced;
        Ok(())
    }

    /// Model of a reduced-resolution level of this raster.
    ///
    /// The pixel size grows by the ratio of the base size to the level size.
    pub fn for_level(&self, width: u32, height: u32) -> Self {
        let geotransform = self.geotransform.map(|gt| {
            [
                gt[0],
                gt[1] * self.width as f64 / width as f64,
                gt[2],
                gt[3],
                gt[4],
                gt[5] * self.height as f64 / height as f64,
            ]
        });
        Self {
            width,
            height,
            geotransform,
            srs: self.srs.clone(),
            mode: self.mode,
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::metadata::descriptor;

    /// Suggester returning a fixed extent.
    pub struct FixedSuggester(pub Option<SuggestedExtent>);

    impl OutputExtentSuggester for FixedSuggester {
        fn suggest(&self, _: &SourceFootprint, _: &AuthorityCode) -> Option<SuggestedExtent> {
            self.0.clone()
        }
    }

    fn georeferenced_descriptor() -> ImageDescriptor {
        let mut desc = descriptor(1000, 800, Vec::new());
        desc.geotransform = Some([100.0, 2.0, 0.0, 500.0, 0.0, -2.0]);
        desc.srs = Some(SrsRef::new("urn", "urn:ogc:def:crs:EPSG::32631"));
        desc
    }

    fn extent() -> SuggestedExtent {
        SuggestedExtent {
            width: 400,
            height: 300,
            geotransform: [2.0, 0.001, 0.0, 49.0, 0.0, -0.001],
        }
    }

    #[test]
    fn test_resolver_forms() {
        let r = AuthorityCodeResolver;
        let expected = Some(AuthorityCode {
            authority: "EPSG".to_string(),
            code: "4326".to_string(),
        });
        assert_eq!(r.resolve("EPSG:4326"), expected);
        assert_eq!(r.resolve("epsg:4326"), expected);
        assert_eq!(r.resolve("urn:ogc:def:crs:EPSG::4326"), expected);
        assert_eq!(r.resolve("urn:ogc:def:crs:EPSG:9.8:4326"), expected);
        assert_eq!(r.resolve("ESRI:102100").unwrap().authority, "ESRI");
        assert_eq!(r.resolve("WGS84"), None);
        assert_eq!(r.resolve("EPSG:abc"), None);
    }

    #[test]
    fn test_identity_default() {
        let model = CoordinateModel::from_descriptor(&descriptor(10, 10, Vec::new()));
        assert!(!model.has_geotransform());
        assert_eq!(model.geotransform(), IDENTITY_GEOTRANSFORM);
        assert_eq!(model.apply(3.0, 4.0), (3.0, 4.0));
        assert_eq!(model.request_step(), (0.0, 0.0));
        assert_eq!(model.mode(), RequestMode::Image);
    }

    #[test]
    fn test_negotiation_switches_mode() {
        let mut model = CoordinateModel::from_descriptor(&georeferenced_descriptor());
        model
            .negotiate_reprojection(
                "EPSG:4326",
                &AuthorityCodeResolver,
                &FixedSuggester(Some(extent())),
            )
            .unwrap();
        assert_eq!(model.mode(), RequestMode::Georeferenced);
        assert_eq!((model.width(), model.height()), (400, 300));
        assert_eq!(model.srs(), Some(&SrsRef::new("epsg", "epsg:4326")));
        assert_eq!(model.request_step(), (0.001, 0.001));
        assert_eq!(model.apply(0.0, 0.0), (2.0, 49.0));
    }

    #[test]
    fn test_negotiation_failures() {
        let suggester = FixedSuggester(Some(extent()));

        let mut model = CoordinateModel::from_descriptor(&descriptor(10, 10, Vec::new()));
        let err = model
            .negotiate_reprojection("EPSG:4326", &AuthorityCodeResolver, &suggester)
            .unwrap_err();
        assert!(matches!(err, RasterError::Metadata(_)));

        let mut model = CoordinateModel::from_descriptor(&georeferenced_descriptor());
        assert!(model
            .negotiate_reprojection("nonsense", &AuthorityCodeResolver, &suggester)
            .is_err());
        assert!(model
            .negotiate_reprojection("ESRI:102100", &AuthorityCodeResolver, &suggester)
            .is_err());
        assert!(model
            .negotiate_reprojection("EPSG:4326", &AuthorityCodeResolver, &FixedSuggester(None))
            .is_err());
        assert_eq!(model.mode(), RequestMode::Image);
    }

    #[test]
    fn test_uninterpretable_srs_blocks_negotiation() {
        let mut desc = georeferenced_descriptor();
        desc.srs = Some(SrsRef::new("wkt", "PROJCS[...]"));
        let mut model = CoordinateModel::from_descriptor(&desc);
        assert!(model
            .negotiate_reprojection(
                "EPSG:4326",
                &AuthorityCodeResolver,
                &FixedSuggester(Some(extent()))
            )
            .is_err());
    }

    #[test]
    fn test_window_containment() {
        let outer = Window::new(0, 0, 100, 100);
        assert!(outer.contains(&Window::new(10, 10, 90, 90)));
        assert!(!outer.contains(&Window::new(10, 10, 91, 10)));
        assert!(Window::new(5, 5, 0, 3).is_empty());
        assert!(outer.fits_in(100, 100));
        assert!(!outer.fits_in(99, 100));
    }

    #[test]
    fn test_window_clipping() {
        let window = Window::new(0, 0, 3000, 3000);
        assert_eq!(window.clipped_to(1000, 800), Some(Window::new(0, 0, 1000, 800)));
        let inside = Window::new(10, 20, 30, 40);
        assert_eq!(inside.clipped_to(1000, 800), Some(inside));
        assert_eq!(Window::new(1000, 0, 5, 5).clipped_to(1000, 800), None);
        assert_eq!(Window::new(0, 900, 5, 5).clipped_to(1000, 800), None);
    }

    #[test]
    fn test_block_range_covering() {
        let range = BlockRange::covering(&Window::new(500, 0, 30, 1000), 512);
        assert_eq!(range, BlockRange::new(0, 0, 2, 2));

        let range = BlockRange::covering(&Window::new(512, 512, 1, 1), 512);
        assert_eq!(range, BlockRange::new(1, 1, 1, 1));
        assert_eq!(range.block_count(), 1);
    }

    #[test]
    fn test_block_range_edge_clipping() {
        let range = BlockRange::new(0, 0, 2, 2);
        let window = range.pixel_window(512, 1000, 1000);
        assert_eq!(window, Window::new(0, 0, 1000, 1000));

        let edge = BlockRange::new(1, 1, 1, 1).pixel_window(512, 1000, 1000);
        assert_eq!(edge, Window::new(512, 512, 488, 488));
    }

    #[test]
    fn test_block_iteration_and_volume() {
        let range = BlockRange::new(2, 3, 2, 2);
        let blocks: Vec<_> = range.blocks().collect();
        assert_eq!(blocks, vec![(2, 3), (3, 3), (2, 4), (3, 4)]);
        assert_eq!(range.byte_volume(256, 3), 4 * 256 * 256 * 3);
    }

    #[test]
    fn test_level_geotransform_scaling() {
        let model = CoordinateModel::from_descriptor(&georeferenced_descriptor());
        let level = model.for_level(500, 400);
        let gt = level.geotransform();
        assert_eq!(gt[1], 4.0);
        assert_eq!(gt[5], -4.0);
        assert_eq!(gt[0], 100.0);
        assert_eq!((level.width(), level.height()), (500, 400));
    }
}
