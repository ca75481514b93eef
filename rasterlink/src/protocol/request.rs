//! Tile request documents.

use serde_json::{json, Value};

use super::encoding::{Resampling, TransportEncoding};
use crate::coords::{BlockRange, CoordinateModel, RequestMode, Window};
use crate::http::HttpRequest;
use crate::metadata::{BandId, ImageDescriptor};

/// Raster geometry of the level a request is built for.
#[derive(Debug, Clone, Copy)]
pub struct LevelGeometry<'a> {
    /// Coordinate model of this level.
    pub coords: &'a CoordinateModel,
    /// Size of the full-resolution raster.
    pub base_width: u32,
    pub base_height: u32,
    pub block_size: u32,
}

/// A built tile request, ready to be sent.
#[derive(Debug, Clone, PartialEq)]
pub struct TileRequest {
    /// JSON body.
    pub body: Value,
    /// Pixel window of the level covered by the request.
    pub window: Window,
    /// Bands in the order the response returns them.
    pub bands: Vec<BandId>,
    /// Encoding negotiated for this request.
    pub encoding: TransportEncoding,
}

impl TileRequest {
    /// Build the request for a block range.
    pub fn build(
        desc: &ImageDescriptor,
        level: &LevelGeometry<'_>,
        range: &BlockRange,
        bands: &[BandId],
        resampling: Resampling,
        session_encoding: TransportEncoding,
    ) -> Self {
        let coords = level.coords;
        let (level_w, level_h) = (coords.width(), coords.height());
        let window = range.pixel_window(level.block_size, level_w, level_h);
        let (ulx, uly) = (window.x as u64, window.y as u64);
        let (lrx, lry) = (window.right(), window.bottom());

        let (bbox_srs, ul, lr) = match coords.mode() {
            RequestMode::Georeferenced => {
                let srs = coords
                    .srs()
                    .map(|s| json!({"type": s.srs_type, "value": s.value}))
                    .unwrap_or_else(|| json!({"type": "image"}));
                let (ulx_geo, uly_geo) = coords.apply(ulx as f64, uly as f64);
                let (lrx_geo, lry_geo) = coords.apply(lrx as f64, lry as f64);
                (
                    srs,
                    json!({"x": ulx_geo, "y": uly_geo}),
                    json!({"x": lrx_geo, "y": lry_geo}),
                )
            }
            RequestMode::Image => {
                let scale = |v: u64, level: u32, base: u32| v * base as u64 / level as u64;
                let scale_lr = |v: u64, level: u32, base: u32| {
                    if v == level as u64 {
                        base as u64
                    } else {
                        scale(v, level, base)
                    }
                };
                (
                    json!({"type": "image"}),
                    json!({
                        "x": scale(ulx, level_w, level.base_width),
                        "y": scale(uly, level_h, level.base_height),
                    }),
                    json!({
                        "x": scale_lr(lrx, level_w, level.base_width),
                        "y": scale_lr(lry, level_h, level.base_height),
                    }),
                )
            }
        };

        let step = match coords.mode() {
            RequestMode::Georeferenced => {
                let (sx, sy) = coords.request_step();
                json!({"x": sx, "y": sy})
            }
            RequestMode::Image => json!({"x": 0, "y": 0}),
        };

        let mut target_model = json!({
            "step": step,
            "size": {"columns": window.width, "lines": window.height},
            "sampling-algo": resampling.service_name(),
            "strictOutputSize": true,
        });
        if coords.mode() == RequestMode::Image {
            target_model["srs"] = json!({"type": "image"});
        }

        let mut body = json!({
            "bbox": {"srs": bbox_srs, "ul": ul, "lr": lr},
            "target-model": target_model,
        });

        let names: Option<Vec<&str>> = bands
            .iter()
            .map(|id| desc.band(*id).map(|b| b.name.as_str()).filter(|n| !n.is_empty()))
            .collect();
        if let Some(names) = names {
            body["bands"] = json!(names);
        }

        Self {
            body,
            window,
            bands: bands.to_vec(),
            encoding: session_encoding.for_request(bands.len()),
        }
    }

    /// Requested output width.
    pub fn width(&self) -> u32 {
        self.window.width
    }

    /// Requested output height.
    pub fn height(&self) -> u32 {
        self.window.height
    }

    /// HTTP request posting this document to `url`.
    pub fn to_http(&self, url: &str, headers: Vec<(String, String)>) -> HttpRequest {
        let mut request = HttpRequest::post(url, self.body.to_string().into_bytes());
        request.headers = headers;
        request
            .with_header("Content-Type", "application/json")
            .with_header("Accept", self.encoding.content_type())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coords::tests::FixedSuggester;
    use crate::coords::{AuthorityCodeResolver, SuggestedExtent};
    use crate::metadata::{band, descriptor, SrsRef};
    use crate::pixel::PixelType;

    fn rgb_descriptor() -> ImageDescriptor {
        let mut desc = descriptor(
            1000,
            1000,
            vec![
                band(1, "R", PixelType::Byte),
                band(2, "G", PixelType::Byte),
                band(3, "B", PixelType::Byte),
            ],
        );
        desc.main_mask = Some(band(4, "MASK", PixelType::Byte));
        desc
    }

    fn level<'a>(coords: &'a CoordinateModel, base: u32) -> LevelGeometry<'a> {
        LevelGeometry {
            coords,
            base_width: base,
            base_height: base,
            block_size: 512,
        }
    }

    fn all_bands() -> Vec<BandId> {
        vec![BandId::Band(1), BandId::Band(2), BandId::Band(3)]
    }

    #[test]
    fn test_image_mode_full_extent() {
        let desc = rgb_descriptor();
        let coords = CoordinateModel::from_descriptor(&desc);
        let req = TileRequest::build(
            &desc,
            &level(&coords, 1000),
            &BlockRange::new(0, 0, 2, 2),
            &all_bands(),
            Resampling::Nearest,
            TransportEncoding::Png,
        );

        assert_eq!(req.body["bbox"]["srs"], json!({"type": "image"}));
        assert_eq!(req.body["bbox"]["ul"], json!({"x": 0, "y": 0}));
        assert_eq!(req.body["bbox"]["lr"], json!({"x": 1000, "y": 1000}));
        assert_eq!(req.body["target-model"]["size"], json!({"columns": 1000, "lines": 1000}));
        assert_eq!(req.body["target-model"]["step"], json!({"x": 0, "y": 0}));
        assert_eq!(req.body["target-model"]["sampling-algo"], "NEAREST");
        assert_eq!(req.body["target-model"]["strictOutputSize"], true);
        assert_eq!(req.body["target-model"]["srs"], json!({"type": "image"}));
        assert_eq!(req.body["bands"], json!(["R", "G", "B"]));
        assert_eq!(req.encoding, TransportEncoding::Png);
    }

    #[test]
    fn test_edge_block_is_clipped() {
        let desc = rgb_descriptor();
        let coords = CoordinateModel::from_descriptor(&desc);
        let req = TileRequest::build(
            &desc,
            &level(&coords, 1000),
            &BlockRange::new(1, 1, 1, 1),
            &all_bands(),
            Resampling::Bilinear,
            TransportEncoding::Raw,
        );
        assert_eq!((req.width(), req.height()), (488, 488));
        assert_eq!(req.body["bbox"]["ul"], json!({"x": 512, "y": 512}));
    }

    #[test]
    fn test_overview_coordinates_scale_to_base() {
        let desc = rgb_descriptor();
        let base = CoordinateModel::from_descriptor(&desc);
        let coords = base.for_level(500, 500);
        let req = TileRequest::build(
            &desc,
            &level(&coords, 1000),
            &BlockRange::new(0, 0, 1, 1),
            &[BandId::Band(1)],
            Resampling::Average,
            TransportEncoding::Jpeg,
        );
        // Level is 500 wide, block covers 0..500 which is the full level
        assert_eq!(req.body["bbox"]["lr"], json!({"x": 1000, "y": 1000}));
        assert_eq!(req.body["target-model"]["size"], json!({"columns": 500, "lines": 500}));
        assert_eq!(req.encoding, TransportEncoding::Jpeg);
    }

    #[test]
    fn test_mask_request_uses_mask_name() {
        let desc = rgb_descriptor();
        let coords = CoordinateModel::from_descriptor(&desc);
        let req = TileRequest::build(
            &desc,
            &level(&coords, 1000),
            &BlockRange::new(0, 0, 1, 1),
            &[BandId::MainMask],
            Resampling::Nearest,
            TransportEncoding::Raw,
        );
        assert_eq!(req.body["bands"], json!(["MASK"]));
    }

    #[test]
    fn test_georeferenced_request() {
        let mut desc = rgb_descriptor();
        desc.geotransform = Some([0.0, 1.0, 0.0, 0.0, 0.0, -1.0]);
        desc.srs = Some(SrsRef::new("urn", "urn:ogc:def:crs:EPSG::32631"));
        let mut coords = CoordinateModel::from_descriptor(&desc);
        coords
            .negotiate_reprojection(
                "EPSG:4326",
                &AuthorityCodeResolver,
                &FixedSuggester(Some(SuggestedExtent {
                    width: 1024,
                    height: 1024,
                    geotransform: [2.0, 0.5, 0.0, 50.0, 0.0, -0.25],
                })),
            )
            .unwrap();

        let req = TileRequest::build(
            &desc,
            &level(&coords, 1024),
            &BlockRange::new(1, 0, 1, 1),
            &all_bands(),
            Resampling::Cubic,
            TransportEncoding::Raw,
        );
        assert_eq!(
            req.body["bbox"]["srs"],
            json!({"type": "epsg", "value": "epsg:4326"})
        );
        assert_eq!(req.body["bbox"]["ul"], json!({"x": 258.0, "y": 50.0}));
        assert_eq!(req.body["bbox"]["lr"], json!({"x": 514.0, "y": -78.0}));
        assert_eq!(req.body["target-model"]["step"], json!({"x": 0.5, "y": 0.25}));
        assert_eq!(req.body["target-model"]["sampling-algo"], "BICUBIC");
        assert!(req.body["target-model"].get("srs").is_none());
    }

    #[test]
    fn test_http_request_headers() {
        let desc = rgb_descriptor();
        let coords = CoordinateModel::from_descriptor(&desc);
        let req = TileRequest::build(
            &desc,
            &level(&coords, 1000),
            &BlockRange::new(0, 0, 1, 1),
            &all_bands(),
            Resampling::Nearest,
            TransportEncoding::Png,
        );
        let http = req.to_http(
            "https://svc/buffer",
            vec![("Authorization".to_string(), "Bearer t".to_string())],
        );
        assert_eq!(http.header("Authorization"), Some("Bearer t"));
        assert_eq!(http.header("Content-Type"), Some("application/json"));
        assert_eq!(http.header("Accept"), Some("image/png"));
        let body: Value = serde_json::from_slice(http.body.as_deref().unwrap()).unwrap();
        assert_eq!(body, req.body);
    }
}
