//! Raster access sessions.
//!
//! A [`RasterSession`] is opened from a [`SessionConfig`]: it authenticates,
//! resolves the image metadata, negotiates the transport encoding and the
//! optional server-side reprojection, and derives the overview pyramid.
//! Reads then go through the per-level prefetch planner and the shared
//! block cache.
//!
//! # Example
//!
//! ```ignore
//! use rasterlink::{RasterSession, RasterSource, SessionConfig, Window, BandId, Resampling};
//!
//! let config = SessionConfig::new("https://example.com/images/42/metadata")
//!     .with_api_key("client", "secret");
//! let session = RasterSession::open(config)?;
//! let buffers = session.read_region(
//!     &Window::new(0, 0, 512, 512),
//!     &[BandId::Band(1), BandId::Band(2), BandId::Band(3)],
//!     Resampling::Nearest,
//! )?;
//! session.close();
//! ```

mod overview;
mod source;

pub use overview::{overview_sizes, RasterLevel, OVERVIEW_THRESHOLD};
pub use source::RasterSource;

use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tracing::{info, warn};

use crate::auth::{Authenticator, Clock, SystemClock};
use crate::cache::{BlockCache, MemoryBlockCache};
use crate::config::SessionConfig;
use crate::coords::{
    AuthorityCodeResolver, CoordinateModel, OutputExtentSuggester, SrsResolver, Window,
};
use crate::error::{RasterError, RasterResult};
use crate::http::{HttpClient, ReqwestClient, RetryPolicy, RetryingClient};
use crate::metadata::{self, BandId, ImageDescriptor};
use crate::pixel::PixelBuffer;
use crate::protocol::{
    ImageTileDecoder, ProtocolCodec, Resampling, TileDecoder, TransportEncoding,
};

/// State shared by every level of a session.
pub(crate) struct SessionCore {
    pub(crate) desc: ImageDescriptor,
    pub(crate) auth: Authenticator,
    pub(crate) http: RetryingClient,
    pub(crate) codec: ProtocolCodec,
    pub(crate) cache: Arc<dyn BlockCache>,
    pub(crate) get_buffer_url: String,
    pub(crate) block_size: u32,
    /// Size of the full-resolution level.
    pub(crate) base_width: u32,
    pub(crate) base_height: u32,
    pub(crate) server_byte_limit: u64,
    pub(crate) resident_coverage_threshold: f64,
    /// Resampling of the most recent region read.
    pub(crate) resampling: Mutex<Resampling>,
}

/// Builder for sessions with injected collaborators.
///
/// Anything not supplied falls back to the real implementation: reqwest
/// transport, an in-memory block cache, the `image` crate decoder, the
/// system clock and the authority-code SRS resolver. There is no default
/// extent suggester; a session with a target SRS needs one.
pub struct SessionBuilder {
    config: SessionConfig,
    http_client: Option<Arc<dyn HttpClient>>,
    cache: Option<Arc<dyn BlockCache>>,
    decoder: Option<Arc<dyn TileDecoder>>,
    clock: Option<Arc<dyn Clock>>,
    srs_resolver: Option<Arc<dyn SrsResolver>>,
    extent_suggester: Option<Arc<dyn OutputExtentSuggester>>,
}

impl SessionBuilder {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            http_client: None,
            cache: None,
            decoder: None,
            clock: None,
            srs_resolver: None,
            extent_suggester: None,
        }
    }

    pub fn with_http_client(mut self, client: Arc<dyn HttpClient>) -> Self {
        self.http_client = Some(client);
        self
    }

    pub fn with_cache(mut self, cache: Arc<dyn BlockCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_decoder(mut self, decoder: Arc<dyn TileDecoder>) -> Self {
        self.decoder = Some(decoder);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn with_srs_resolver(mut self, resolver: Arc<dyn SrsResolver>) -> Self {
        self.srs_resolver = Some(resolver);
        self
    }

    pub fn with_extent_suggester(mut self, suggester: Arc<dyn OutputExtentSuggester>) -> Self {
        self.extent_suggester = Some(suggester);
        self
    }

    /// Open the session.
    pub fn open(self) -> RasterResult<RasterSession> {
        let started = Instant::now();
        let config = self.config;

        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let auth = Authenticator::new(&config, clock)?;
        config.validate()?;

        let client: Arc<dyn HttpClient> = match self.http_client {
            Some(client) => client,
            None => Arc::new(
                ReqwestClient::with_timeout(config.request_timeout)
                    .map_err(|e| RasterError::Config(e.to_string()))?,
            ),
        };
        let http = RetryingClient::new(
            client,
            RetryPolicy::with_initial_delay(config.initial_retry_delay),
        );

        let result = open_with(
            &config,
            auth,
            http,
            self.cache,
            self.decoder,
            self.srs_resolver,
            self.extent_suggester,
        );
        match &result {
            Ok(session) => info!(
                url = %config.metadata_url,
                width = session.width(),
                height = session.height(),
                bands = session.descriptor().band_count(),
                encoding = %session.encoding(),
                overviews = session.overview_count(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Opened raster session"
            ),
            Err(e) => warn!(
                url = %config.metadata_url,
                error = %e,
                "Failed to open raster session"
            ),
        }
        result
    }
}

fn open_with(
    config: &SessionConfig,
    auth: Authenticator,
    http: RetryingClient,
    cache: Option<Arc<dyn BlockCache>>,
    decoder: Option<Arc<dyn TileDecoder>>,
    srs_resolver: Option<Arc<dyn SrsResolver>>,
    extent_suggester: Option<Arc<dyn OutputExtentSuggester>>,
) -> RasterResult<RasterSession> {
    auth.authenticate(&http)?;
    let desc = metadata::resolve(&http, &auth, &config.metadata_url, config.expose_masks)?;

    let encoding = TransportEncoding::negotiate(
        config.pixel_encoding,
        desc.band_count(),
        desc.dataset_pixel_type,
    );

    let mut coords = CoordinateModel::from_descriptor(&desc);
    if let Some(target) = config.target_srs.as_deref().filter(|s| !s.is_empty()) {
        let suggester = extent_suggester.ok_or_else(|| {
            RasterError::Metadata(format!(
                "cannot reproject to '{}' without an output extent suggester",
                target
            ))
        })?;
        let resolver = srs_resolver.unwrap_or_else(|| Arc::new(AuthorityCodeResolver));
        coords.negotiate_reprojection(target, resolver.as_ref(), suggester.as_ref())?;
    }

    let get_buffer_url = config
        .get_buffer_url
        .clone()
        .filter(|u| !u.is_empty())
        .unwrap_or_else(|| desc.get_buffer_url.clone());
    let decoder = decoder.unwrap_or_else(|| Arc::new(ImageTileDecoder));
    let cache = cache.unwrap_or_else(|| Arc::new(MemoryBlockCache::default()));

    let core = Arc::new(SessionCore {
        auth,
        http,
        codec: ProtocolCodec::new(encoding, decoder),
        cache,
        get_buffer_url,
        block_size: config.block_size,
        base_width: coords.width(),
        base_height: coords.height(),
        server_byte_limit: config.server_byte_limit,
        resident_coverage_threshold: config.resident_coverage_threshold,
        resampling: Mutex::new(Resampling::default()),
        desc,
    });

    let mut levels = vec![RasterLevel::new(core.clone(), coords.clone())];
    levels.extend(
        overview_sizes(coords.width(), coords.height())
            .into_iter()
            .map(|(w, h)| RasterLevel::new(core.clone(), coords.for_level(w, h))),
    );

    Ok(RasterSession { core, levels })
}

/// An open connection to one remote image.
pub struct RasterSession {
    core: Arc<SessionCore>,
    /// Full resolution first, then overviews.
    levels: Vec<RasterLevel>,
}

impl std::fmt::Debug for RasterSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RasterSession")
            .field("width", &self.width())
            .field("height", &self.height())
            .field("bands", &self.core.desc.band_count())
            .field("encoding", &self.core.codec.encoding())
            .field("levels", &self.levels.len())
            .finish()
    }
}

impl RasterSession {
    /// Open a session with the default collaborators.
    pub fn open(config: SessionConfig) -> RasterResult<Self> {
        SessionBuilder::new(config).open()
    }

    /// Start building a session with injected collaborators.
    pub fn builder(config: SessionConfig) -> SessionBuilder {
        SessionBuilder::new(config)
    }

    /// Metadata of the image.
    pub fn descriptor(&self) -> &ImageDescriptor {
        &self.core.desc
    }

    /// Transport encoding negotiated for the session.
    pub fn encoding(&self) -> TransportEncoding {
        self.core.codec.encoding()
    }

    /// Coordinate model of the full-resolution level.
    pub fn coords(&self) -> &CoordinateModel {
        self.full_resolution().coords()
    }

    /// Authentication state.
    pub fn authenticator(&self) -> &Authenticator {
        &self.core.auth
    }

    fn full_resolution(&self) -> &RasterLevel {
        // levels is never empty
        &self.levels[0]
    }

    /// Forget the last fetched range on every level. Cached blocks stay.
    pub fn flush_cache(&self) {
        for level in &self.levels {
            level.flush();
        }
    }

    /// The unconsumed read-ahead hint of the full-resolution level.
    pub fn hint(&self) -> Option<Window> {
        self.full_resolution().hint()
    }

    /// Tear down the connection pool. Reads fail afterwards.
    pub fn close(&self) {
        self.core.http.close();
    }

    pub fn is_closed(&self) -> bool {
        self.core.http.is_closed()
    }
}

impl RasterSource for RasterSession {
    fn width(&self) -> u32 {
        self.full_resolution().width()
    }

    fn height(&self) -> u32 {
        self.full_resolution().height()
    }

    fn block_size(&self) -> u32 {
        self.core.block_size
    }

    fn band_ids(&self) -> Vec<BandId> {
        self.core.desc.all_band_ids()
    }

    fn read_block(
        &self,
        band: BandId,
        block_x: u32,
        block_y: u32,
    ) -> RasterResult<Arc<PixelBuffer>> {
        self.full_resolution().read_block(band, block_x, block_y)
    }

    fn read_region(
        &self,
        window: &Window,
        bands: &[BandId],
        resampling: Resampling,
    ) -> RasterResult<Vec<PixelBuffer>> {
        self.full_resolution().read_region(window, bands, resampling)
    }

    fn advise_region(&self, window: Window) {
        self.full_resolution().advise_region(window)
    }

    fn overview_count(&self) -> usize {
        self.levels.len() - 1
    }

    fn overview(&self, index: usize) -> Option<&dyn RasterSource> {
        self.levels
            .get(index + 1)
            .map(|level| level as &dyn RasterSource)
    }
}

impl Drop for RasterSession {
    fn drop(&mut self) {
        self.core.http.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::MockHttpClient;
    use crate::http::HttpResponse;
    use crate::metadata::sample_properties;
    use crate::protocol::tile_response;

    fn metadata_response() -> HttpResponse {
        let doc = serde_json::json!({ "properties": sample_properties() });
        HttpResponse::ok(Some("application/json"), doc.to_string())
    }

    fn open_with_mock(
        config: SessionConfig,
        responses: Vec<HttpResponse>,
    ) -> (Arc<MockHttpClient>, RasterResult<RasterSession>) {
        let mock = Arc::new(MockHttpClient::with_responses(responses.into_iter().map(Ok)));
        let session = RasterSession::builder(config)
            .with_http_client(mock.clone())
            .open();
        (mock, session)
    }

    #[test]
    fn test_open_builds_levels() {
        let (mock, session) = open_with_mock(
            SessionConfig::new("https://svc/images/1/metadata"),
            vec![metadata_response()],
        );
        let session = session.unwrap();
        assert_eq!(mock.request_count(), 1);
        assert_eq!((session.width(), session.height()), (1000, 800));
        // UInt16 bands travel raw
        assert_eq!(session.encoding(), TransportEncoding::Raw);
        assert_eq!(session.overview_count(), 2);
        assert_eq!(session.overview(0).map(|l| l.width()), Some(500));
        assert_eq!(session.band_ids()[0], BandId::MainMask);
        assert!(!session.authenticator().is_authenticated());
    }

    #[test]
    fn test_metadata_failure_is_session_fatal() {
        let (_, session) = open_with_mock(
            SessionConfig::new("https://svc/images/1/metadata"),
            vec![HttpResponse::with_status(404, "no such image")],
        );
        let err = session.unwrap_err();
        assert!(matches!(err, RasterError::Metadata(_)));
        assert!(err.is_fatal_to_session());
    }

    #[test]
    fn test_missing_metadata_url_is_config_error() {
        let (mock, session) = open_with_mock(SessionConfig::default(), vec![]);
        assert!(matches!(session.unwrap_err(), RasterError::Config(_)));
        assert_eq!(mock.request_count(), 0);
    }

    #[test]
    fn test_get_buffer_url_override() {
        let (_, session) = open_with_mock(
            SessionConfig::new("https://svc/images/1/metadata")
                .with_get_buffer_url("https://mirror/buffer"),
            vec![metadata_response()],
        );
        assert_eq!(session.unwrap().core.get_buffer_url, "https://mirror/buffer");
    }

    #[test]
    fn test_drop_closes_pool() {
        let (_, session) = open_with_mock(
            SessionConfig::new("https://svc/images/1/metadata"),
            vec![metadata_response()],
        );
        let session = session.unwrap();
        let core = session.core.clone();
        drop(session);
        assert!(core.http.is_closed());
    }

    #[test]
    fn test_read_block_through_mock() {
        let data: Vec<u8> = [2u8, 1].repeat(488 * 288);
        let (mock, session) = open_with_mock(
            SessionConfig::new("https://svc/images/1/metadata"),
            vec![
                metadata_response(),
                tile_response(488, 288, Some("UInt16"), "application/octet-stream", &data),
            ],
        );
        let session = session.unwrap();

        let block = session.read_block(BandId::Band(1), 1, 1).unwrap();
        assert_eq!((block.width(), block.height()), (512, 512));
        assert_eq!(block.value(0, 0, 0), 258.0);
        assert_eq!(block.value(0, 487, 287), 258.0);
        assert_eq!(block.value(0, 488, 0), 0.0);
        assert_eq!(block.value(0, 0, 288), 0.0);

        let requests = mock.requests.lock();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1].url, "https://svc/images/1/buffer");
        assert_eq!(requests[1].header("Accept"), Some("application/octet-stream"));

        // Served from the cache
        drop(requests);
        session.read_block(BandId::Band(1), 1, 1).unwrap();
        assert_eq!(mock.request_count(), 2);
    }
}
