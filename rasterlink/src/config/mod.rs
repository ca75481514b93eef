//! Session configuration.
//!
//! [`SessionConfig`] is an explicit value owned by each session. Fallbacks
//! that other tools read from process-wide settings are captured once, at
//! construction, by [`SessionConfig::with_env_fallbacks`] and never consulted
//! again afterwards.
//!
//! ```ignore
//! use rasterlink::config::{PixelEncoding, SessionConfig};
//!
//! let config = SessionConfig::new("https://service/images/42/metadata")
//!     .with_api_key("client", "secret")
//!     .with_block_size(1024)
//!     .with_pixel_encoding(PixelEncoding::Png);
//! config.validate()?;
//! ```

pub mod file;

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{RasterError, RasterResult};

/// Smallest accepted block size.
pub const MIN_BLOCK_SIZE: u32 = 64;

/// Default block size.
pub const DEFAULT_BLOCK_SIZE: u32 = 512;

/// Largest accepted block size.
pub const MAX_BLOCK_SIZE: u32 = 8192;

/// Default server limit on uncompressed bytes per tile fetch (100 MiB).
pub const DEFAULT_SERVER_BYTE_LIMIT: u64 = 100 * 1024 * 1024;

/// Default initial delay before the first retry, in seconds.
pub const DEFAULT_INITIAL_RETRY_DELAY_SECS: f64 = 1.0;

/// Default timeout for a single HTTP request (30 minutes).
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 1800;

/// Fraction of already-resident blocks above which the planner stops issuing
/// one large mixed-band fetch.
pub const DEFAULT_RESIDENT_COVERAGE_THRESHOLD: f64 = 0.25;

/// Default token endpoint.
pub const DEFAULT_AUTH_URL: &str =
    "https://authenticate.geoapi-airbusds.com/auth/realms/IDP/protocol/openid-connect/token";

/// Environment variable prefix read by [`SessionConfig::with_env_fallbacks`].
pub const ENV_PREFIX: &str = "RASTERLINK_";

/// Requested pixel transport encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PixelEncoding {
    /// Pick the best encoding for the band layout.
    #[default]
    Auto,
    Raw,
    Png,
    Jpeg,
    Jpeg2000,
}

impl FromStr for PixelEncoding {
    type Err = RasterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "AUTO" => Ok(PixelEncoding::Auto),
            "RAW" => Ok(PixelEncoding::Raw),
            "PNG" => Ok(PixelEncoding::Png),
            "JPEG" => Ok(PixelEncoding::Jpeg),
            "JPEG2000" => Ok(PixelEncoding::Jpeg2000),
            other => Err(RasterError::Config(format!(
                "unsupported pixel encoding '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for PixelEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PixelEncoding::Auto => "AUTO",
            PixelEncoding::Raw => "RAW",
            PixelEncoding::Png => "PNG",
            PixelEncoding::Jpeg => "JPEG",
            PixelEncoding::Jpeg2000 => "JPEG2000",
        };
        f.write_str(name)
    }
}

/// Configuration for a raster access session.
#[derive(Clone, PartialEq)]
pub struct SessionConfig {
    /// URL of the image metadata document (required).
    pub metadata_url: String,

    /// Client id for the API key exchange.
    pub client_id: Option<String>,

    /// API key for the API key exchange.
    pub api_key: Option<String>,

    /// Bearer token used verbatim; wins over client id / API key.
    pub access_token: Option<String>,

    /// Identity forwarded in `X-Forwarded-User`.
    pub forwarded_user: Option<String>,

    /// Raw `Authorization` header value used when no token is configured.
    pub authorization_header: Option<String>,

    /// Block edge length in pixels, clamped to
    /// [`MIN_BLOCK_SIZE`]..=[`MAX_BLOCK_SIZE`].
    pub block_size: u32,

    /// Requested pixel transport encoding.
    pub pixel_encoding: PixelEncoding,

    /// Target SRS for server-side reprojection.
    pub target_srs: Option<String>,

    /// Whether bands flagged as masks are exposed.
    pub expose_masks: bool,

    /// Whether to authenticate at all.
    pub perform_auth: bool,

    /// Token endpoint.
    pub auth_url: String,

    /// Overrides the tile-fetch URL advertised by the metadata.
    pub get_buffer_url: Option<String>,

    /// Maximum uncompressed bytes per tile fetch.
    pub server_byte_limit: u64,

    /// Delay before the first retry of a failed request.
    pub initial_retry_delay: Duration,

    /// Timeout of a single HTTP request.
    pub request_timeout: Duration,

    /// Resident-block fraction that switches the planner to per-band fetches.
    pub resident_coverage_threshold: f64,
}

impl fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Secrets stay out of logs
        f.debug_struct("SessionConfig")
            .field("metadata_url", &self.metadata_url)
            .field("client_id", &self.client_id)
            .field("api_key", &self.api_key.as_ref().map(|_| "***"))
            .field("access_token", &self.access_token.as_ref().map(|_| "***"))
            .field("forwarded_user", &self.forwarded_user)
            .field("block_size", &self.block_size)
            .field("pixel_encoding", &self.pixel_encoding)
            .field("target_srs", &self.target_srs)
            .field("expose_masks", &self.expose_masks)
            .field("perform_auth", &self.perform_auth)
            .field("auth_url", &self.auth_url)
            .field("get_buffer_url", &self.get_buffer_url)
            .field("server_byte_limit", &self.server_byte_limit)
            .field("initial_retry_delay", &self.initial_retry_delay)
            .field("request_timeout", &self.request_timeout)
            .field(
                "resident_coverage_threshold",
                &self.resident_coverage_threshold,
            )
            .finish()
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            metadata_url: String::new(),
            client_id: None,
            api_key: None,
            access_token: None,
            forwarded_user: None,
            authorization_header: None,
            block_size: DEFAULT_BLOCK_SIZE,
            pixel_encoding: PixelEncoding::Auto,
            target_srs: None,
            expose_masks: true,
            perform_auth: true,
            auth_url: DEFAULT_AUTH_URL.to_string(),
            get_buffer_url: None,
            server_byte_limit: DEFAULT_SERVER_BYTE_LIMIT,
            initial_retry_delay: Duration::from_secs_f64(DEFAULT_INITIAL_RETRY_DELAY_SECS),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            resident_coverage_threshold: DEFAULT_RESIDENT_COVERAGE_THRESHOLD,
        }
    }
}

impl SessionConfig {
    /// Create a configuration for the given metadata URL.
    pub fn new(metadata_url: impl Into<String>) -> Self {
        Self {
            metadata_url: metadata_url.into(),
            ..Default::default()
        }
    }

    /// Authenticate with a client id and API key.
    pub fn with_api_key(mut self, client_id: impl Into<String>, api_key: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self.api_key = Some(api_key.into());
        self
    }

    /// Use a bearer token verbatim.
    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }

    /// Forward the given user identity.
    pub fn with_forwarded_user(mut self, user: impl Into<String>) -> Self {
        self.forwarded_user = Some(user.into());
        self
    }

    /// Set the block size; out-of-range values are clamped.
    pub fn with_block_size(mut self, block_size: u32) -> Self {
        self.block_size = block_size.clamp(MIN_BLOCK_SIZE, MAX_BLOCK_SIZE);
        self
    }

    /// Set the requested pixel encoding.
    pub fn with_pixel_encoding(mut self, encoding: PixelEncoding) -> Self {
        self.pixel_encoding = encoding;
        self
    }

    /// Request server-side reprojection to the given SRS.
    pub fn with_target_srs(mut self, srs: impl Into<String>) -> Self {
        self.target_srs = Some(srs.into());
        self
    }

    /// Enable or disable mask band exposure.
    pub fn with_expose_masks(mut self, expose: bool) -> Self {
        self.expose_masks = expose;
        self
    }

    /// Enable or disable authentication.
    pub fn with_perform_auth(mut self, perform: bool) -> Self {
        self.perform_auth = perform;
        self
    }

    /// Set the token endpoint.
    pub fn with_auth_url(mut self, url: impl Into<String>) -> Self {
        self.auth_url = url.into();
        self
    }

    /// Override the tile-fetch URL.
    pub fn with_get_buffer_url(mut self, url: impl Into<String>) -> Self {
        self.get_buffer_url = Some(url.into());
        self
    }

    /// Set the server byte limit.
    pub fn with_server_byte_limit(mut self, limit: u64) -> Self {
        self.server_byte_limit = limit;
        self
    }

    /// Set the initial retry delay.
    pub fn with_initial_retry_delay(mut self, delay: Duration) -> Self {
        self.initial_retry_delay = delay;
        self
    }

    /// Set the HTTP request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the resident coverage threshold.
    pub fn with_resident_coverage_threshold(mut self, threshold: f64) -> Self {
        self.resident_coverage_threshold = threshold;
        self
    }

    /// Fill unset values from `RASTERLINK_*` environment variables.
    ///
    /// Explicitly configured values always win. Recognised variables:
    /// `CLIENT_ID`, `API_KEY`, `ACCESS_TOKEN`, `X_FORWARDED_USER`,
    /// `AUTHORIZATION`, `AUTH_URL`, `GET_BUFFER_URL`, `SERVER_BYTE_LIMIT`,
    /// `INITIAL_RETRY_DELAY`, `PERFORM_AUTH`.
    pub fn with_env_fallbacks(self) -> Self {
        self.with_fallbacks_from(|key| std::env::var(format!("{}{}", ENV_PREFIX, key)).ok())
    }

    pub(crate) fn with_fallbacks_from<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if self.client_id.is_none() {
            self.client_id = get("CLIENT_ID");
        }
        if self.api_key.is_none() {
            self.api_key = get("API_KEY");
        }
        if self.access_token.is_none() {
            self.access_token = get("ACCESS_TOKEN");
        }
        if self.forwarded_user.is_none() {
            self.forwarded_user = get("X_FORWARDED_USER");
        }
        if self.authorization_header.is_none() {
            self.authorization_header = get("AUTHORIZATION");
        }
        if self.get_buffer_url.is_none() {
            self.get_buffer_url = get("GET_BUFFER_URL");
        }
        if self.auth_url == DEFAULT_AUTH_URL {
            if let Some(url) = get("AUTH_URL") {
                self.auth_url = url;
            }
        }
        if self.server_byte_limit == DEFAULT_SERVER_BYTE_LIMIT {
            if let Some(limit) = get("SERVER_BYTE_LIMIT").and_then(|v| v.trim().parse().ok()) {
                self.server_byte_limit = limit;
            }
        }
        if let Some(delay) = get("INITIAL_RETRY_DELAY")
            .and_then(|v| v.trim().parse::<f64>().ok())
            .filter(|d| d.is_finite() && *d >= 0.0)
        {
            if self.initial_retry_delay
                == Duration::from_secs_f64(DEFAULT_INITIAL_RETRY_DELAY_SECS)
            {
                self.initial_retry_delay = Duration::from_secs_f64(delay);
            }
        }
        if let Some(v) = get("PERFORM_AUTH") {
            if let Some(flag) = parse_bool(&v) {
                self.perform_auth = self.perform_auth && flag;
            }
        }
        self
    }

    /// Check the configuration for missing or inconsistent values.
    pub fn validate(&self) -> RasterResult<()> {
        if self.metadata_url.trim().is_empty() {
            return Err(RasterError::Config("metadata URL is missing".to_string()));
        }
        let has_id = self.client_id.as_deref().is_some_and(|s| !s.is_empty());
        let has_key = self.api_key.as_deref().is_some_and(|s| !s.is_empty());
        if has_id != has_key && self.access_token.is_none() {
            return Err(RasterError::Config(if has_id {
                "client id defined, but API key missing".to_string()
            } else {
                "API key defined, but client id missing".to_string()
            }));
        }
        if !(MIN_BLOCK_SIZE..=MAX_BLOCK_SIZE).contains(&self.block_size) {
            return Err(RasterError::Config(format!(
                "block size {} not within {}..={}",
                self.block_size, MIN_BLOCK_SIZE, MAX_BLOCK_SIZE
            )));
        }
        if self.server_byte_limit == 0 {
            return Err(RasterError::Config(
                "server byte limit must be positive".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.resident_coverage_threshold) {
            return Err(RasterError::Config(format!(
                "resident coverage threshold {} not within 0..=1",
                self.resident_coverage_threshold
            )));
        }
        Ok(())
    }
}

/// Parse a yes/no style boolean.
pub(crate) fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "yes" | "true" | "on" => Some(true),
        "0" | "no" | "false" | "off" => Some(false),
        _ => None,
    }
}
