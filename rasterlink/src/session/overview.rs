//! Raster levels: the full-resolution raster and its overviews.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use super::source::RasterSource;
use super::SessionCore;
use crate::cache::{next_namespace, BlockKey};
use crate::coords::{BlockRange, CoordinateModel, Window};
use crate::error::{RasterError, RasterResult, TransportError};
use crate::metadata::BandId;
use crate::pixel::{PixelBuffer, PixelType};
use crate::planner::{BlockStore, PlannerConfig, PrefetchOutcome, PrefetchPlanner};
use crate::protocol::{LevelGeometry, Resampling, TileResponse};

/// Dimensions below which no further overview is derived.
pub const OVERVIEW_THRESHOLD: u32 = 256;

/// Sizes of the overview levels of a `width`×`height` raster, largest
/// first. Each level halves the previous one.
pub fn overview_sizes(width: u32, height: u32) -> Vec<(u32, u32)> {
    let mut sizes = Vec::new();
    let mut shift = 0;
    while (width >> shift) > OVERVIEW_THRESHOLD || (height >> shift) > OVERVIEW_THRESHOLD {
        shift += 1;
        let (w, h) = (width >> shift, height >> shift);
        if w == 0 || h == 0 {
            break;
        }
        sizes.push((w, h));
    }
    sizes
}

/// One resolution level of a session.
///
/// Levels share the session's metadata, authenticator, codec and cache;
/// each has its own planner and cache namespace.
pub struct RasterLevel {
    core: Arc<SessionCore>,
    coords: CoordinateModel,
    namespace: u64,
    planner: Mutex<PrefetchPlanner>,
}

impl std::fmt::Debug for RasterLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RasterLevel")
            .field("width", &self.coords.width())
            .field("height", &self.coords.height())
            .field("namespace", &self.namespace)
            .finish()
    }
}

impl RasterLevel {
    pub(crate) fn new(core: Arc<SessionCore>, coords: CoordinateModel) -> Self {
        let config = PlannerConfig::new(
            core.block_size,
            core.server_byte_limit,
            core.cache.capacity_bytes() / 2,
            core.resident_coverage_threshold,
        );
        Self {
            core,
            coords,
            namespace: next_namespace(),
            planner: Mutex::new(PrefetchPlanner::new(config)),
        }
    }

    /// Coordinate model of this level.
    pub fn coords(&self) -> &CoordinateModel {
        &self.coords
    }

    /// Forget the last fetched range.
    pub fn flush(&self) {
        self.planner.lock().flush();
    }

    /// The unconsumed read-ahead hint.
    pub fn hint(&self) -> Option<Window> {
        self.planner.lock().hint()
    }

    fn key(&self, band: BandId, block_x: u32, block_y: u32) -> BlockKey {
        BlockKey::new(self.namespace, band, block_x, block_y)
    }

    fn ensure_open(&self) -> RasterResult<()> {
        if self.core.http.is_closed() {
            return Err(TransportError::Closed.into());
        }
        Ok(())
    }

    fn check_band(&self, band: BandId) -> RasterResult<PixelType> {
        self.core
            .desc
            .pixel_type(band)
            .ok_or_else(|| RasterError::InvalidRead(format!("{} does not exist", band)))
    }

    /// Fetch `range` for `bands` in one request and commit the blocks that
    /// are not resident yet.
    fn fetch(
        &self,
        range: &BlockRange,
        bands: &[BandId],
        resampling: Resampling,
    ) -> RasterResult<Vec<(BlockKey, Arc<PixelBuffer>)>> {
        let core = &self.core;
        let desc = &core.desc;
        let level = LevelGeometry {
            coords: &self.coords,
            base_width: core.base_width,
            base_height: core.base_height,
            block_size: core.block_size,
        };
        let request = core
            .codec
            .build_request(desc, &level, range, bands, resampling);
        let headers = core.auth.request_headers(&core.http)?;
        let http_request = request.to_http(&core.get_buffer_url, headers);

        debug!(
            blocks = range.block_count(),
            bands = bands.len(),
            width = request.width(),
            height = request.height(),
            encoding = %request.encoding,
            "Fetching blocks"
        );
        let response = core.http.fetch(&http_request)?;
        let parsed = core.codec.parse_response(&response, &request, desc)?;
        if matches!(parsed, TileResponse::NoData) {
            debug!("Service returned no data, filling with nodata");
        }

        let bs = core.block_size;
        let fill = desc.fill_value();
        let window = request.window;
        let mut committed = Vec::new();
        for (index, band) in bands.iter().enumerate() {
            let pixel_type = self.check_band(*band)?;
            for (bx, by) in range.blocks() {
                let key = self.key(*band, bx, by);
                if core.cache.contains(&key) {
                    continue;
                }
                let mut block =
                    PixelBuffer::filled(pixel_type, bs as usize, bs as usize, 1, fill);
                if let TileResponse::Data(buffer) = &parsed {
                    let area = BlockRange::new(bx, by, 1, 1).pixel_window(
                        bs,
                        self.coords.width(),
                        self.coords.height(),
                    );
                    block.copy_window_from(
                        0,
                        0,
                        0,
                        &buffer.band(index),
                        (area.x - window.x) as usize,
                        (area.y - window.y) as usize,
                        area.width as usize,
                        area.height as usize,
                    );
                }
                let block = Arc::new(block);
                core.cache.insert(key, block.clone());
                committed.push((key, block));
            }
        }
        Ok(committed)
    }

    /// Block from the cache, or from a one-block fetch.
    fn block(
        &self,
        band: BandId,
        block_x: u32,
        block_y: u32,
        resampling: Resampling,
    ) -> RasterResult<Arc<PixelBuffer>> {
        let key = self.key(band, block_x, block_y);
        if let Some(block) = self.core.cache.try_get(&key) {
            return Ok(block);
        }
        let range = BlockRange::new(block_x, block_y, 1, 1);
        let committed = self.fetch(&range, &[band], resampling)?;
        committed
            .into_iter()
            .find(|(k, _)| *k == key)
            .map(|(_, block)| block)
            .or_else(|| self.core.cache.try_get(&key))
            .ok_or_else(|| {
                RasterError::Protocol(format!("block {}/{} not delivered", block_x, block_y))
            })
    }

    fn prefetch(
        &self,
        window: &Window,
        bands: &[BandId],
        resampling: Resampling,
    ) -> RasterResult<PrefetchOutcome> {
        let store = LevelStore {
            level: self,
            resampling,
        };
        self.planner
            .lock()
            .prefetch(&self.core.desc, &store, window, bands, bands[0])
    }

    /// Prefetch one band, following spatial splits.
    fn prefetch_band(
        &self,
        window: &Window,
        band: BandId,
        resampling: Resampling,
    ) -> RasterResult<()> {
        let outcome = self.prefetch(window, &[band], resampling)?;
        if let PrefetchOutcome::RetrySpatialSplit(plan) = outcome {
            self.prefetch_band(&plan.first, band, resampling)?;
            self.prefetch_band(&plan.second, band, resampling)?;
        }
        Ok(())
    }

    /// Read `window` into `out` at `(dst_x, dst_y)`.
    fn read_into(
        &self,
        window: &Window,
        bands: &[BandId],
        out: &mut [PixelBuffer],
        dst: (u32, u32),
        resampling: Resampling,
    ) -> RasterResult<()> {
        match self.prefetch(window, bands, resampling)? {
            PrefetchOutcome::RetrySpatialSplit(plan) => {
                self.read_into(&plan.first, bands, out, dst, resampling)?;
                let (dx, dy) = plan.second_offset();
                let second_dst = (dst.0 + dx, dst.1 + dy);
                return self.read_into(&plan.second, bands, out, second_dst, resampling);
            }
            PrefetchOutcome::RetryPerBand if bands.len() > 1 => {
                for band in bands {
                    self.prefetch_band(window, *band, resampling)?;
                }
            }
            _ => {}
        }

        let bs = self.core.block_size;
        let range = BlockRange::covering(window, bs);
        for (index, band) in bands.iter().enumerate() {
            for (bx, by) in range.blocks() {
                let block = self.block(*band, bx, by, resampling)?;
                let area = BlockRange::new(bx, by, 1, 1).pixel_window(
                    bs,
                    self.coords.width(),
                    self.coords.height(),
                );
                let x0 = area.x.max(window.x);
                let y0 = area.y.max(window.y);
                let x1 = (area.right().min(window.right())) as u32;
                let y1 = (area.bottom().min(window.bottom())) as u32;
                out[index].copy_window_from(
                    0,
                    (dst.0 + x0 - window.x) as usize,
                    (dst.1 + y0 - window.y) as usize,
                    &block.band(0),
                    (x0 - area.x) as usize,
                    (y0 - area.y) as usize,
                    (x1 - x0) as usize,
                    (y1 - y0) as usize,
                );
            }
        }
        Ok(())
    }
}

impl RasterSource for RasterLevel {
    fn width(&self) -> u32 {
        self.coords.width()
    }

    fn height(&self) -> u32 {
        self.coords.height()
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
        self.ensure_open()?;
        self.check_band(band)?;
        let (x_blocks, y_blocks) = self.block_counts();
        if block_x >= x_blocks || block_y >= y_blocks {
            return Err(RasterError::InvalidRead(format!(
                "block {}/{} outside {}x{} block grid",
                block_x, block_y, x_blocks, y_blocks
            )));
        }
        self.block(band, block_x, block_y, *self.core.resampling.lock())
    }

    fn read_region(
        &self,
        window: &Window,
        bands: &[BandId],
        resampling: Resampling,
    ) -> RasterResult<Vec<PixelBuffer>> {
        self.ensure_open()?;
        if window.is_empty() || !window.fits_in(self.width(), self.height()) {
            return Err(RasterError::InvalidRead(format!(
                "window {:?} outside {}x{} raster",
                window,
                self.width(),
                self.height()
            )));
        }
        if bands.is_empty() {
            return Err(RasterError::InvalidRead("no band requested".to_string()));
        }
        *self.core.resampling.lock() = resampling;

        let fill = self.core.desc.fill_value();
        let mut out = bands
            .iter()
            .map(|band| {
                let pixel_type = self.check_band(*band)?;
                Ok(PixelBuffer::filled(
                    pixel_type,
                    window.width as usize,
                    window.height as usize,
                    1,
                    fill,
                ))
            })
            .collect::<RasterResult<Vec<_>>>()?;
        self.read_into(window, bands, &mut out, (0, 0), resampling)?;
        Ok(out)
    }

    fn advise_region(&self, window: Window) {
        match window.clipped_to(self.width(), self.height()) {
            Some(clipped) => self.planner.lock().advise(clipped),
            None => debug!(?window, "Ignoring read-ahead hint outside the raster"),
        }
    }
}

/// [`BlockStore`] view of a level for one read.
struct LevelStore<'a> {
    level: &'a RasterLevel,
    resampling: Resampling,
}

impl BlockStore for LevelStore<'_> {
    fn is_resident(&self, band: BandId, block_x: u32, block_y: u32) -> bool {
        self.level
            .core
            .cache
            .contains(&self.level.key(band, block_x, block_y))
    }

    fn fetch_blocks(&self, range: &BlockRange, bands: &[BandId]) -> RasterResult<usize> {
        Ok(self.level.fetch(range, bands, self.resampling)?.len())
    }
}
