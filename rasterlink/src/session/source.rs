//! Read capability shared by a session and its overview levels.

use std::sync::Arc;

use crate::coords::Window;
use crate::error::RasterResult;
use crate::metadata::BandId;
use crate::pixel::PixelBuffer;
use crate::protocol::Resampling;

/// A tiled raster that can be read block by block or by region.
pub trait RasterSource {
    fn width(&self) -> u32;

    fn height(&self) -> u32;

    /// Edge length of the square blocks.
    fn block_size(&self) -> u32;

    /// Addressable bands, main mask first.
    fn band_ids(&self) -> Vec<BandId>;

    /// Blocks per row and per column.
    fn block_counts(&self) -> (u32, u32) {
        let bs = self.block_size();
        (self.width().div_ceil(bs), self.height().div_ceil(bs))
    }

    /// One full block of one band.
    ///
    /// Edge blocks are full squares; the area outside the raster holds the
    /// nodata value.
    fn read_block(&self, band: BandId, block_x: u32, block_y: u32)
        -> RasterResult<Arc<PixelBuffer>>;

    /// One single-band buffer per requested band, each covering `window`.
    fn read_region(
        &self,
        window: &Window,
        bands: &[BandId],
        resampling: Resampling,
    ) -> RasterResult<Vec<PixelBuffer>>;

    /// Hint that `window` is about to be read.
    fn advise_region(&self, window: Window);

    /// Number of reduced-resolution levels below this one.
    fn overview_count(&self) -> usize {
        0
    }

    /// Overview `index`, halving the resolution `index + 1` times.
    fn overview(&self, _index: usize) -> Option<&dyn RasterSource> {
        None
    }
}
