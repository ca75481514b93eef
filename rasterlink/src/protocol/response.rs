//! Tile response parsing.

use serde_json::Value;

use super::decode::TileDecoder;
use super::encoding::TransportEncoding;
use super::multipart::{self, Part};
use super::request::TileRequest;
use crate::error::{RasterError, RasterResult};
use crate::http::HttpResponse;
use crate::metadata::{BandId, ImageDescriptor};
use crate::pixel::{PixelBuffer, PixelType};

/// Outcome of a tile fetch.
#[derive(Debug, Clone, PartialEq)]
pub enum TileResponse {
    /// Empty body: the service has no data for the requested area.
    NoData,
    /// Band-sequential pixels, one band per requested band, sized as
    /// requested.
    Data(PixelBuffer),
}

/// Parse the response to `request`.
pub fn parse_response(
    response: &HttpResponse,
    request: &TileRequest,
    desc: &ImageDescriptor,
    decoder: &dyn TileDecoder,
) -> RasterResult<TileResponse> {
    if response.body.is_empty() {
        return Ok(TileResponse::NoData);
    }

    let parts = multipart::parse(response.content_type.as_deref(), &response.body)?;
    let content_type = request.encoding.content_type();

    let meta_part = parts
        .iter()
        .find(|p| p.content_type() == Some("application/json"))
        .ok_or_else(|| RasterError::Protocol("cannot find metadata part of response".to_string()))?;
    let data_part = parts
        .iter()
        .find(|p| p.content_type() == Some(content_type) || is_data_disposition(p))
        .ok_or_else(|| RasterError::Protocol("cannot find data part of response".to_string()))?;

    let meta: Value = serde_json::from_slice(&meta_part.body)
        .map_err(|e| RasterError::Protocol(format!("invalid response metadata: {}", e)))?;
    let props = meta
        .get("properties")
        .ok_or_else(|| RasterError::Protocol("response metadata has no properties".to_string()))?;

    let width = props.get("width").and_then(Value::as_u64);
    let height = props.get("height").and_then(Value::as_u64);
    let (Some(width), Some(height)) = (width, height) else {
        return Err(RasterError::Protocol(
            "response metadata lacks width/height".to_string(),
        ));
    };
    if width != request.width() as u64 || height != request.height() as u64 {
        return Err(RasterError::Protocol(format!(
            "returned size {}x{} does not match requested {}x{}",
            width,
            height,
            request.width(),
            request.height()
        )));
    }

    let pixel_type = buffer_pixel_type(props, request, desc)?;
    let (width, height) = (width as usize, height as usize);
    let band_count = request.bands.len();

    let buffer = match request.encoding {
        TransportEncoding::Raw => {
            let expected = width * height * band_count * pixel_type.size_bytes();
            if data_part.body.len() != expected {
                return Err(RasterError::Protocol(format!(
                    "raw payload is {} bytes, expected {}",
                    data_part.body.len(),
                    expected
                )));
            }
            PixelBuffer::from_le_bytes(pixel_type, width, height, band_count, data_part.body.to_vec())
                .ok_or_else(|| RasterError::Protocol("raw payload size mismatch".to_string()))?
        }
        encoding => {
            let decoded = decoder.decode(encoding, &data_part.body)?;
            if decoded.width() != width || decoded.height() != height {
                return Err(RasterError::Protocol(format!(
                    "decoded tile is {}x{}, expected {}x{}",
                    decoded.width(),
                    decoded.height(),
                    width,
                    height
                )));
            }
            match (decoded.band_count(), band_count) {
                (n, m) if n == m => decoded,
                (4, 1) => first_band(&decoded)?,
                (n, m) => {
                    return Err(RasterError::Protocol(format!(
                        "decoded tile has {} bands, expected {}",
                        n, m
                    )))
                }
            }
        }
    };

    Ok(TileResponse::Data(buffer))
}

fn is_data_disposition(part: &Part) -> bool {
    part.header("Content-Disposition")
        .is_some_and(|v| v.trim() == "form-data; name=\"Data\";")
}

/// Sample type of the returned buffer.
fn buffer_pixel_type(
    props: &Value,
    request: &TileRequest,
    desc: &ImageDescriptor,
) -> RasterResult<PixelType> {
    let declared = props
        .get("bands")
        .and_then(Value::as_array)
        .and_then(|bands| bands.first())
        .and_then(|band| band.get("pixelType"))
        .and_then(Value::as_str);

    match declared {
        Some(name) => PixelType::from_service_name(name).ok_or_else(|| {
            RasterError::Protocol(format!("unsupported returned pixel type '{}'", name))
        }),
        None => Ok(match request.bands.first() {
            Some(BandId::MainMask) | None => PixelType::Byte,
            Some(id) => desc.pixel_type(*id).unwrap_or(PixelType::Byte),
        }),
    }
}

fn first_band(buffer: &PixelBuffer) -> RasterResult<PixelBuffer> {
    let len = buffer.width() * buffer.height() * buffer.pixel_type().size_bytes();
    PixelBuffer::from_bytes(
        buffer.pixel_type(),
        buffer.width(),
        buffer.height(),
        1,
        buffer.as_bytes()[..len].to_vec(),
    )
    .ok_or_else(|| RasterError::Protocol("cannot extract first channel".to_string()))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::coords::{BlockRange, CoordinateModel};
    use crate::metadata::{band, descriptor};
    use crate::protocol::decode::tests::encode_png;
    use crate::protocol::decode::ImageTileDecoder;
    use crate::protocol::encoding::Resampling;
    use crate::protocol::multipart::tests::build;
    use crate::protocol::request::LevelGeometry;

    const BOUNDARY: &str = "tileboundary";

    /// Multipart tile response with a metadata part and a data part.
    pub fn tile_response(
        width: u32,
        height: u32,
        pixel_type: Option<&str>,
        data_type: &str,
        data: &[u8],
    ) -> HttpResponse {
        let mut props = serde_json::json!({"width": width, "height": height});
        if let Some(pt) = pixel_type {
            props["bands"] = serde_json::json!([{"pixelType": pt}]);
        }
        let meta = serde_json::json!({"properties": props}).to_string();
        let body = build(
            BOUNDARY,
            &[
                (&[("Content-Type", "application/json")], meta.as_bytes()),
                (&[("Content-Type", data_type)], data),
            ],
        );
        HttpResponse::ok(
            Some(&format!("multipart/form-data; boundary={}", BOUNDARY)),
            body,
        )
    }

    fn request(
        desc: &ImageDescriptor,
        bands: &[BandId],
        encoding: TransportEncoding,
    ) -> TileRequest {
        let coords = CoordinateModel::from_descriptor(desc);
        let level = LevelGeometry {
            coords: &coords,
            base_width: desc.width,
            base_height: desc.height,
            block_size: 64,
        };
        TileRequest::build(
            desc,
            &level,
            &BlockRange::new(0, 0, 1, 1),
            bands,
            Resampling::Nearest,
            encoding,
        )
    }

    fn two_band_u16() -> ImageDescriptor {
        descriptor(
            2,
            2,
            vec![band(1, "A", PixelType::UInt16), band(2, "B", PixelType::UInt16)],
        )
    }

    #[test]
    fn test_empty_body_is_no_data() {
        let desc = two_band_u16();
        let req = request(&desc, &[BandId::Band(1)], TransportEncoding::Raw);
        let resp = HttpResponse::ok(None, Vec::<u8>::new());
        assert_eq!(
            parse_response(&resp, &req, &desc, &ImageTileDecoder).unwrap(),
            TileResponse::NoData
        );
    }

    #[test]
    fn test_raw_little_endian_payload() {
        let desc = two_band_u16();
        let req = request(&desc, &[BandId::Band(1), BandId::Band(2)], TransportEncoding::Raw);
        let samples: Vec<u16> = vec![1, 2, 3, 4, 100, 200, 300, 400];
        let bytes: Vec<u8> = samples.iter().flat_map(|v| v.to_le_bytes()).collect();
        let resp = tile_response(2, 2, Some("UInt16"), "application/octet-stream", &bytes);

        let TileResponse::Data(buf) = parse_response(&resp, &req, &desc, &ImageTileDecoder).unwrap()
        else {
            panic!("expected data");
        };
        assert_eq!(buf.band_count(), 2);
        assert_eq!(buf.value(0, 1, 0), 2.0);
        assert_eq!(buf.value(1, 1, 1), 400.0);
    }

    #[test]
    fn test_raw_size_mismatch_is_rejected() {
        let desc = two_band_u16();
        let req = request(&desc, &[BandId::Band(1)], TransportEncoding::Raw);
        let resp = tile_response(2, 2, Some("UInt16"), "application/octet-stream", &[0; 7]);
        assert!(matches!(
            parse_response(&resp, &req, &desc, &ImageTileDecoder),
            Err(RasterError::Protocol(_))
        ));
    }

    #[test]
    fn test_size_disagreement_is_rejected() {
        let desc = two_band_u16();
        let req = request(&desc, &[BandId::Band(1)], TransportEncoding::Raw);
        let resp = tile_response(3, 2, Some("UInt16"), "application/octet-stream", &[0; 12]);
        assert!(parse_response(&resp, &req, &desc, &ImageTileDecoder).is_err());
    }

    #[test]
    fn test_missing_parts() {
        let desc = two_band_u16();
        let req = request(&desc, &[BandId::Band(1)], TransportEncoding::Raw);
        // Data part with the wrong type
        let resp = tile_response(2, 2, Some("UInt16"), "text/plain", &[0; 8]);
        assert!(parse_response(&resp, &req, &desc, &ImageTileDecoder).is_err());
    }

    #[test]
    fn test_pixel_type_defaults_to_requested_band() {
        let desc = two_band_u16();
        let req = request(&desc, &[BandId::Band(2)], TransportEncoding::Raw);
        let resp = tile_response(2, 2, None, "application/octet-stream", &[0; 8]);
        let TileResponse::Data(buf) = parse_response(&resp, &req, &desc, &ImageTileDecoder).unwrap()
        else {
            panic!("expected data");
        };
        assert_eq!(buf.pixel_type(), PixelType::UInt16);

        let resp = tile_response(2, 2, Some("Complex64"), "application/octet-stream", &[0; 8]);
        assert!(parse_response(&resp, &req, &desc, &ImageTileDecoder).is_err());
    }

    #[test]
    fn test_png_rgba_accepted_for_single_band() {
        let desc = descriptor(2, 1, vec![band(1, "P", PixelType::Byte)]);
        let req = request(&desc, &[BandId::Band(1)], TransportEncoding::Png);
        let png = encode_png(2, 1, 4, &[7, 0, 0, 255, 9, 0, 0, 255]);
        let resp = tile_response(2, 1, Some("Byte"), "image/png", &png);
        let TileResponse::Data(buf) = parse_response(&resp, &req, &desc, &ImageTileDecoder).unwrap()
        else {
            panic!("expected data");
        };
        assert_eq!(buf.band_count(), 1);
        assert_eq!(buf.as_bytes(), &[7, 9]);
    }

    #[test]
    fn test_png_band_count_mismatch() {
        let desc = descriptor(
            2,
            1,
            vec![
                band(1, "R", PixelType::Byte),
                band(2, "G", PixelType::Byte),
                band(3, "B", PixelType::Byte),
            ],
        );
        let req = request(
            &desc,
            &[BandId::Band(1), BandId::Band(2), BandId::Band(3)],
            TransportEncoding::Png,
        );
        let png = encode_png(2, 1, 1, &[1, 2]);
        let resp = tile_response(2, 1, Some("Byte"), "image/png", &png);
        assert!(parse_response(&resp, &req, &desc, &ImageTileDecoder).is_err());
    }

    #[test]
    fn test_data_part_found_by_disposition() {
        let desc = descriptor(1, 1, vec![band(1, "A", PixelType::Byte)]);
        let req = request(&desc, &[BandId::Band(1)], TransportEncoding::Raw);
        let meta = r#"{"properties":{"width":1,"height":1}}"#;
        let body = build(
            BOUNDARY,
            &[
                (&[("Content-Type", "application/json")], meta.as_bytes()),
                (
                    &[("Content-Disposition", "form-data; name=\"Data\";")],
                    &[42],
                ),
            ],
        );
        let resp = HttpResponse::ok(Some("multipart/form-data"), body);
        let TileResponse::Data(buf) = parse_response(&resp, &req, &desc, &ImageTileDecoder).unwrap()
        else {
            panic!("expected data");
        };
        assert_eq!(buf.as_bytes(), &[42]);
    }
}
