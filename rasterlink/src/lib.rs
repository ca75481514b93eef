//! RasterLink - Remote tiled raster access over an HTTP image service
//!
//! This library opens a session against an image service, resolves the image
//! metadata, and serves block and region reads from a shared block cache,
//! batching neighbouring blocks into as few service requests as possible.

pub mod auth;
pub mod cache;
pub mod config;
pub mod coords;
pub mod error;
pub mod http;
pub mod logging;
pub mod metadata;
pub mod pixel;
pub mod planner;
pub mod protocol;
pub mod session;

pub use config::{PixelEncoding, SessionConfig};
pub use coords::{BlockRange, CoordinateModel, Window};
pub use error::{RasterError, RasterResult, TransportError};
pub use metadata::{BandId, ImageDescriptor};
pub use pixel::{PixelBuffer, PixelType};
pub use protocol::{Resampling, TransportEncoding};
pub use session::{RasterLevel, RasterSession, RasterSource, SessionBuilder};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
