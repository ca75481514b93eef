//! Wire protocol of the tile-fetch endpoint.
//!
//! A fetch is a JSON [`TileRequest`] posted to the service; the answer is a
//! multipart body with a JSON metadata part and a pixel part, or an empty
//! body when the service has no data for the area.

mod decode;
mod encoding;
mod multipart;
mod request;
mod response;

pub use decode::{ImageTileDecoder, TileDecoder};
pub use encoding::{Resampling, TransportEncoding};
pub use multipart::{boundary_from_content_type, Part};
pub use request::{LevelGeometry, TileRequest};
pub use response::{parse_response, TileResponse};

#[cfg(test)]
pub(crate) use response::tests::tile_response;

use std::sync::Arc;

use crate::coords::BlockRange;
use crate::error::RasterResult;
use crate::http::HttpResponse;
use crate::metadata::{BandId, ImageDescriptor};

/// Request builder and response parser sharing one negotiated encoding.
#[derive(Clone)]
pub struct ProtocolCodec {
    encoding: TransportEncoding,
    decoder: Arc<dyn TileDecoder>,
}

impl std::fmt::Debug for ProtocolCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtocolCodec")
            .field("encoding", &self.encoding)
            .finish()
    }
}

impl ProtocolCodec {
    pub fn new(encoding: TransportEncoding, decoder: Arc<dyn TileDecoder>) -> Self {
        Self { encoding, decoder }
    }

    /// Session-level encoding.
    pub fn encoding(&self) -> TransportEncoding {
        self.encoding
    }

    /// Build the request for `range` on a level.
    pub fn build_request(
        &self,
        desc: &ImageDescriptor,
        level: &LevelGeometry<'_>,
        range: &BlockRange,
        bands: &[BandId],
        resampling: Resampling,
    ) -> TileRequest {
        TileRequest::build(desc, level, range, bands, resampling, self.encoding)
    }

    /// Parse the response to `request`.
    pub fn parse_response(
        &self,
        response: &HttpResponse,
        request: &TileRequest,
        desc: &ImageDescriptor,
    ) -> RasterResult<TileResponse> {
        parse_response(response, request, desc, self.decoder.as_ref())
    }
}
