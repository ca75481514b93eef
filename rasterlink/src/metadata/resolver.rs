//! Fetches and validates the image metadata document.

use std::collections::BTreeMap;

use chrono::NaiveDateTime;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use super::types::{
    AcquisitionInfo, BandDescriptor, ColorInterpretation, GeoTransform, ImageDescriptor,
    RpcModel, SrsRef, MAIN_MASK_INTERPRETATION, RPC_COEFF_COUNT,
};
use crate::auth::Authenticator;
use crate::error::{RasterError, RasterResult};
use crate::http::{HttpRequest, RetryingClient};
use crate::pixel::PixelType;

/// Largest accepted raster dimension.
pub const MAX_RASTER_DIMENSION: u64 = i32::MAX as u64;

/// Properties that are not copied into [`ImageDescriptor::extra`].
const RESERVED_PROPERTIES: [&str; 11] = [
    "aoiFactor",
    "crsCode",
    "nbBands",
    "nbBits",
    "nBits",
    "actualBitDepth",
    "width",
    "height",
    "noDataValue",
    "step",
    "pixelType",
];

/// Fetch the metadata document at `url` and parse it.
pub fn resolve(
    http: &RetryingClient,
    auth: &Authenticator,
    url: &str,
    expose_masks: bool,
) -> RasterResult<ImageDescriptor> {
    let mut request = HttpRequest::get(url);
    request.headers = auth.request_headers(http)?;

    let response = http
        .fetch(&request)
        .map_err(|e| RasterError::Metadata(format!("Get request {} failed: {}", url, e)))?;
    if response.body.is_empty() {
        return Err(RasterError::Metadata(format!(
            "Get request {} failed: empty content returned by server",
            url
        )));
    }
    debug!(url, bytes = response.body.len(), "Received image metadata");

    parse_metadata(&response.body, expose_masks)
}

/// Parse a metadata document into an [`ImageDescriptor`].
pub fn parse_metadata(body: &[u8], expose_masks: bool) -> RasterResult<ImageDescriptor> {
    let doc: Value = serde_json::from_slice(body)
        .map_err(|e| RasterError::Metadata(format!("cannot parse metadata response: {}", e)))?;

    let props = doc
        .pointer("/response/payload/payload/imageMetadata/properties")
        .or_else(|| doc.get("properties"))
        .and_then(Value::as_object)
        .ok_or_else(|| {
            RasterError::Metadata(
                "cannot find response/payload/payload/imageMetadata/properties nor properties"
                    .to_string(),
            )
        })?;

    let width = dimension(props, "width")?;
    let height = dimension(props, "height")?;

    let nbits = props
        .get("actualBitDepth")
        .and_then(Value::as_u64)
        .filter(|d| !matches!(d, 0 | 8 | 16 | 32 | 64))
        .map(|d| d as u32);

    let nodata = props.get("noDataValue").and_then(Value::as_f64);
    let get_buffer_url = get_buffer_href(props)?;
    let geotransform = read_geotransform(props);
    let (bands, main_mask, dataset_pixel_type) = read_bands(props, expose_masks)?;
    let srs = read_srs(props);
    let rpc = props.get("rpc").and_then(Value::as_object).and_then(read_rpc);

    Ok(ImageDescriptor {
        width,
        height,
        bands,
        main_mask,
        nodata,
        geotransform,
        srs,
        rpc,
        acquisition: read_acquisition(props),
        nbits,
        dataset_pixel_type,
        get_buffer_url,
        extra: read_extra(props),
    })
}

fn dimension(props: &Map<String, Value>, key: &str) -> RasterResult<u32> {
    let value = props
        .get(key)
        .ok_or_else(|| RasterError::Metadata(format!("{} missing", key)))?
        .as_i64()
        .ok_or_else(|| RasterError::Metadata(format!("{} not an integer", key)))?;
    if value <= 0 || value as u64 > MAX_RASTER_DIMENSION {
        return Err(RasterError::Metadata(format!(
            "invalid dataset dimension {} = {}",
            key, value
        )));
    }
    Ok(value as u32)
}

fn get_buffer_href(props: &Map<String, Value>) -> RasterResult<String> {
    let link = props
        .get("_links")
        .and_then(|l| l.get("getBuffer"))
        .ok_or_else(|| RasterError::Metadata("_links/getBuffer missing".to_string()))?;
    let link = match link {
        Value::Array(items) => items.first(),
        Value::Object(_) => Some(link),
        _ => None,
    };
    link.and_then(|l| l.get("href"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| RasterError::Metadata("_links/getBuffer/href missing".to_string()))
}

fn read_geotransform(props: &Map<String, Value>) -> Option<GeoTransform> {
    let values = props.get("geotransform")?.as_array()?;
    if values.len() != 6 {
        return None;
    }
    let mut gt = [0.0; 6];
    for (slot, v) in gt.iter_mut().zip(values) {
        *slot = v.as_f64()?;
    }
    Some(gt)
}

type BandList = (Vec<BandDescriptor>, Option<BandDescriptor>, PixelType);

fn read_bands(props: &Map<String, Value>, expose_masks: bool) -> RasterResult<BandList> {
    let items = props
        .get("bands")
        .and_then(Value::as_array)
        .filter(|a| !a.is_empty())
        .ok_or_else(|| RasterError::Metadata("missing or empty bands array".to_string()))?;

    let mut bands = Vec::new();
    let mut main_mask = None;
    let mut dataset_pixel_type = None;

    for (i, item) in items.iter().enumerate() {
        let obj = item
            .as_object()
            .ok_or_else(|| RasterError::Metadata("invalid bands[] element".to_string()))?;

        let name = obj
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| RasterError::Metadata(format!("bands[{}].name missing", i)))?;
        let type_name = obj
            .get("pixelType")
            .and_then(Value::as_str)
            .ok_or_else(|| RasterError::Metadata(format!("bands[{}].pixelType missing", i)))?;
        let pixel_type = PixelType::from_service_name(type_name).ok_or_else(|| {
            RasterError::Metadata(format!("unsupported value pixelType = '{}'", type_name))
        })?;
        dataset_pixel_type.get_or_insert(pixel_type);

        let color_name = obj
            .get("colorInterpretation")
            .and_then(Value::as_str)
            .map(str::to_string);
        let desc = BandDescriptor {
            source_index: i + 1,
            name: name.to_string(),
            pixel_type,
            description: obj
                .get("description")
                .and_then(Value::as_str)
                .map(str::to_string),
            color_interpretation: color_name
                .as_deref()
                .map(ColorInterpretation::from_service_name)
                .unwrap_or_default(),
            color_interpretation_name: color_name,
            is_mask: obj.get("isMask").and_then(Value::as_bool).unwrap_or(false),
        };

        if !expose_masks && desc.is_mask {
            continue;
        }
        if main_mask.is_none()
            && desc.color_interpretation_name.as_deref() == Some(MAIN_MASK_INTERPRETATION)
        {
            main_mask = Some(desc);
        } else {
            bands.push(desc);
        }
    }

    // At least one element was checked above
    let dataset_pixel_type = dataset_pixel_type.unwrap_or(PixelType::Byte);
    Ok((bands, main_mask, dataset_pixel_type))
}

fn read_srs(props: &Map<String, Value>) -> Option<SrsRef> {
    let names = props
        .get("srsExpression")
        .and_then(|s| s.get("names"))
        .and_then(Value::as_array);

    let Some(names) = names else {
        return props
            .get("crsCode")
            .and_then(Value::as_str)
            .filter(|c| !c.is_empty())
            .map(|c| SrsRef::new("urn", c));
    };

    let mut chosen: Option<SrsRef> = None;
    for entry in names.iter().filter_map(Value::as_object) {
        let srs_type = entry.get("type").and_then(Value::as_str).unwrap_or("");
        let value = entry.get("value").and_then(Value::as_str).unwrap_or("");
        if srs_type.is_empty() || value.is_empty() {
            continue;
        }
        let current = chosen.as_ref().map(|c| c.srs_type.as_str());
        let take = match srs_type {
            "urn" => true,
            "proj4" => current != Some("urn"),
            _ => chosen.is_none(),
        };
        if take {
            chosen = Some(SrsRef::new(srs_type, value));
        }
    }
    chosen
}

fn read_rpc(rpc: &Map<String, Value>) -> Option<RpcModel> {
    let scalar = |key: &str| rpc.get(key).and_then(Value::as_f64);
    let required = |key: &str| {
        let v = scalar(key);
        if v.is_none() {
            warn!(field = key, "RPC field missing, ignoring RPC block");
        }
        v
    };
    let coeffs = |key: &str| -> Option<[f64; RPC_COEFF_COUNT]> {
        let values = rpc.get(key).and_then(Value::as_array);
        match values {
            Some(values) if values.len() == RPC_COEFF_COUNT => {
                let mut out = [0.0; RPC_COEFF_COUNT];
                for (slot, v) in out.iter_mut().zip(values) {
                    *slot = v.as_f64()?;
                }
                Some(out)
            }
            _ => {
                warn!(field = key, "Cannot find RPC coefficients, ignoring RPC block");
                None
            }
        }
    };

    Some(RpcModel {
        err_bias: scalar("errBias"),
        err_rand: scalar("errRand"),
        samp_off: required("sampOff")?,
        line_off: required("lineOff")?,
        lat_off: required("latOff")?,
        long_off: required("longOff")?,
        height_off: required("heightOff")?,
        line_scale: required("lineScale")?,
        samp_scale: required("sampScale")?,
        lat_scale: required("latScale")?,
        long_scale: required("longScale")?,
        height_scale: required("heightScale")?,
        line_num_coeff: coeffs("lineNumCoeff")?,
        line_den_coeff: coeffs("lineDenCoeff")?,
        samp_num_coeff: coeffs("sampNumCoeff")?,
        samp_den_coeff: coeffs("sampDenCoeff")?,
    })
}

fn read_acquisition(props: &Map<String, Value>) -> AcquisitionInfo {
    let acquisition_date = props
        .get("acquisitionDate")
        .and_then(Value::as_str)
        .and_then(normalize_date);
    AcquisitionInfo {
        acquisition_date,
        cloud_cover: props.get("cloudCover").and_then(Value::as_f64),
        satellite: props
            .get("satellite")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string),
    }
}

/// `2019-05-17T10:11:12.345Z` becomes `2019-05-17 10:11:12`.
fn normalize_date(raw: &str) -> Option<String> {
    ["%Y-%m-%dT%H:%M:%S%.fZ", "%Y-%m-%dT%H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw.trim(), fmt).ok())
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
}

fn read_extra(props: &Map<String, Value>) -> BTreeMap<String, String> {
    props
        .iter()
        .filter(|(k, _)| !RESERVED_PROPERTIES.contains(&k.as_str()))
        .filter_map(|(k, v)| {
            let text = match v {
                Value::String(s) => s.clone(),
                Value::Number(n) => n.to_string(),
                Value::Bool(b) => b.to_string(),
                Value::Null | Value::Array(_) | Value::Object(_) => return None,
            };
            Some((k.clone(), text))
        })
        .collect()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use serde_json::json;

    pub fn sample_properties() -> Value {
        json!({
            "width": 1000,
            "height": 800,
            "noDataValue": 0,
            "actualBitDepth": 12,
            "acquisitionDate": "2019-05-17T10:11:12.345Z",
            "cloudCover": 3.14159,
            "satellite": "PHR1A",
            "productType": "ortho",
            "aoiFactor": 2,
            "geotransform": [100.0, 0.5, 0.0, 200.0, 0.0, -0.5],
            "srsExpression": {
                "names": [
                    {"type": "wkt", "value": "GEOGCS[...]"},
                    {"type": "proj4", "value": "+proj=longlat"},
                    {"type": "urn", "value": "urn:ogc:def:crs:EPSG::4326"}
                ]
            },
            "bands": [
                {"name": "R", "pixelType": "UInt16", "colorInterpretation": "RED"},
                {"name": "G", "pixelType": "UInt16", "colorInterpretation": "GREEN"},
                {"name": "B", "pixelType": "UInt16", "colorInterpretation": "BLUE",
                 "description": "blue band"},
                {"name": "MASK", "pixelType": "Byte", "colorInterpretation": "MAIN_MASK",
                 "isMask": true},
                {"name": "CLOUDS", "pixelType": "Byte", "isMask": true}
            ],
            "_links": {"getBuffer": {"href": "https://svc/images/1/buffer"}}
        })
    }

    fn parse(props: Value, expose_masks: bool) -> RasterResult<ImageDescriptor> {
        let doc = json!({ "properties": props });
        parse_metadata(doc.to_string().as_bytes(), expose_masks)
    }

    #[test]
    fn test_parse_full_document() {
        let desc = parse(sample_properties(), true).unwrap();
        assert_eq!((desc.width, desc.height), (1000, 800));
        assert_eq!(desc.bands.len(), 4);
        assert_eq!(desc.bands[3].name, "CLOUDS");
        assert!(desc.bands[3].is_mask);
        let mask = desc.main_mask.as_ref().unwrap();
        assert_eq!(mask.name, "MASK");
        assert_eq!(mask.source_index, 4);
        assert_eq!(desc.bands[2].description.as_deref(), Some("blue band"));
        assert_eq!(desc.bands[0].color_interpretation, ColorInterpretation::Red);
        assert_eq!(desc.dataset_pixel_type, PixelType::UInt16);
        assert_eq!(desc.nodata, Some(0.0));
        assert_eq!(desc.nbits, Some(12));
        assert_eq!(desc.geotransform, Some([100.0, 0.5, 0.0, 200.0, 0.0, -0.5]));
        assert_eq!(
            desc.srs,
            Some(SrsRef::new("urn", "urn:ogc:def:crs:EPSG::4326"))
        );
        assert_eq!(desc.get_buffer_url, "https://svc/images/1/buffer");
        assert_eq!(
            desc.acquisition.acquisition_date.as_deref(),
            Some("2019-05-17 10:11:12")
        );
        assert_eq!(desc.acquisition.cloud_cover_display().as_deref(), Some("3.14"));
        assert_eq!(desc.acquisition.satellite.as_deref(), Some("PHR1A"));
        assert_eq!(desc.extra.get("productType").map(String::as_str), Some("ortho"));
        assert!(!desc.extra.contains_key("aoiFactor"));
        assert!(!desc.extra.contains_key("width"));
        assert!(!desc.extra.contains_key("bands"));
    }

    #[test]
    fn test_masks_disabled_drops_mask_bands() {
        let desc = parse(sample_properties(), false).unwrap();
        assert_eq!(desc.bands.len(), 3);
        assert!(desc.main_mask.is_none());
    }

    #[test]
    fn test_nested_properties_location() {
        let doc = json!({
            "response": {"payload": {"payload": {"imageMetadata": {
                "properties": sample_properties()
            }}}}
        });
        let desc = parse_metadata(doc.to_string().as_bytes(), true).unwrap();
        assert_eq!(desc.width, 1000);
    }

    #[test]
    fn test_missing_properties() {
        let err = parse_metadata(br#"{"foo": 1}"#, true).unwrap_err();
        assert!(matches!(err, RasterError::Metadata(_)));
        assert!(parse_metadata(b"not json", true).is_err());
    }

    #[test]
    fn test_invalid_dimensions() {
        let mut props = sample_properties();
        props["width"] = json!(0);
        assert!(parse(props, true).is_err());

        let mut props = sample_properties();
        props.as_object_mut().unwrap().remove("height");
        assert!(parse(props, true).is_err());
    }

    #[test]
    fn test_unsupported_pixel_type_is_fatal() {
        let mut props = sample_properties();
        props["bands"][1]["pixelType"] = json!("CFloat32");
        let err = parse(props, true).unwrap_err();
        assert!(err.to_string().contains("CFloat32"));
    }

    #[test]
    fn test_empty_bands_is_fatal() {
        let mut props = sample_properties();
        props["bands"] = json!([]);
        assert!(parse(props, true).is_err());

        let mut props = sample_properties();
        props["bands"] = json!([1, 2]);
        assert!(parse(props, true).is_err());
    }

    #[test]
    fn test_get_buffer_link_forms() {
        let mut props = sample_properties();
        props["_links"]["getBuffer"] = json!([{"href": "https://a"}, {"href": "https://b"}]);
        assert_eq!(parse(props, true).unwrap().get_buffer_url, "https://a");

        let mut props = sample_properties();
        props["_links"]["getBuffer"] = json!([]);
        assert!(parse(props, true).is_err());

        let mut props = sample_properties();
        props.as_object_mut().unwrap().remove("_links");
        assert!(parse(props, true).is_err());
    }

    #[test]
    fn test_geotransform_requires_six_entries() {
        let mut props = sample_properties();
        props["geotransform"] = json!([1.0, 2.0, 3.0]);
        assert!(parse(props, true).unwrap().geotransform.is_none());
    }

    #[test]
    fn test_srs_preference() {
        let mut props = sample_properties();
        props["srsExpression"]["names"] = json!([
            {"type": "wkt", "value": "X"},
            {"type": "proj4", "value": "+proj=utm"}
        ]);
        assert_eq!(
            parse(props, true).unwrap().srs,
            Some(SrsRef::new("proj4", "+proj=utm"))
        );

        let mut props = sample_properties();
        props["srsExpression"]["names"] = json!([{"type": "wkt", "value": "X"}]);
        assert_eq!(parse(props, true).unwrap().srs, Some(SrsRef::new("wkt", "X")));

        let mut props = sample_properties();
        props.as_object_mut().unwrap().remove("srsExpression");
        props["crsCode"] = json!("urn:ogc:def:crs:EPSG::32631");
        assert_eq!(
            parse(props, true).unwrap().srs,
            Some(SrsRef::new("urn", "urn:ogc:def:crs:EPSG::32631"))
        );
    }

    fn rpc_block() -> Value {
        let coeffs: Vec<f64> = (0..20).map(|i| i as f64).collect();
        json!({
            "errBias": 1.0,
            "sampOff": 1.0, "lineOff": 2.0, "latOff": 3.0, "longOff": 4.0,
            "heightOff": 5.0, "lineScale": 6.0, "sampScale": 7.0, "latScale": 8.0,
            "longScale": 9.0, "heightScale": 10.0,
            "lineNumCoeff": coeffs, "lineDenCoeff": coeffs,
            "sampNumCoeff": coeffs, "sampDenCoeff": coeffs
        })
    }

    #[test]
    fn test_rpc_block() {
        let mut props = sample_properties();
        props["rpc"] = rpc_block();
        let rpc = parse(props, true).unwrap().rpc.unwrap();
        assert_eq!(rpc.err_bias, Some(1.0));
        assert_eq!(rpc.err_rand, None);
        assert_eq!(rpc.height_scale, 10.0);
        assert_eq!(rpc.samp_den_coeff[19], 19.0);
    }

    #[test]
    fn test_rpc_short_array_rejects_block_but_opens() {
        let mut props = sample_properties();
        props["rpc"] = rpc_block();
        props["rpc"]["lineDenCoeff"] = json!([1.0, 2.0]);
        let desc = parse(props, true).unwrap();
        assert!(desc.rpc.is_none());
    }

    #[test]
    fn test_rpc_missing_scalar_rejects_block() {
        let mut props = sample_properties();
        props["rpc"] = rpc_block();
        props["rpc"].as_object_mut().unwrap().remove("latScale");
        assert!(parse(props, true).unwrap().rpc.is_none());
    }

    #[test]
    fn test_normalize_date() {
        assert_eq!(
            normalize_date("2020-01-02T03:04:05Z").as_deref(),
            Some("2020-01-02 03:04:05")
        );
        assert_eq!(normalize_date("yesterday"), None);
    }

    #[test]
    fn test_whole_bit_depth_not_reported() {
        let mut props = sample_properties();
        props["actualBitDepth"] = json!(16);
        assert_eq!(parse(props, true).unwrap().nbits, None);
    }
}
