//! Block prefetch planning.
//!
//! Before a region is assembled from blocks, the planner decides how to get
//! the missing blocks over the network:
//!
//! - **Dedupe**: a multi-band request for the same block range as the
//!   previous multi-band fetch needs no network call.
//! - **Read-ahead**: an advised region that contains the request and fits the
//!   budget replaces the request's range.
//! - **Trimming**: fully resident block rows are dropped from the top.
//! - **Residency**: when most of the range is already resident, the caller is
//!   told to go per band instead of issuing a large mixed fetch.
//! - **Budget**: ranges larger than the byte budget are split per band or
//!   spatially, and the caller recurses.
//!
//! # Example
//!
//! ```ignore
//! let mut planner = PrefetchPlanner::new(PlannerConfig::new(512, limit, cache_bytes / 2, 0.25));
//! match planner.prefetch(&desc, &store, &window, &bands, bands[0])? {
//!     PrefetchOutcome::RetrySpatialSplit(plan) => { /* recurse on plan.first / plan.second */ }
//!     _ => { /* assemble from cache */ }
//! }
//! ```

use tracing::debug;

use crate::coords::{BlockRange, Window};
use crate::error::{RasterError, RasterResult};
use crate::metadata::{BandId, ImageDescriptor};

/// Access to block residency and fetching for one raster level.
pub trait BlockStore {
    /// True if the block is resident in the cache.
    fn is_resident(&self, band: BandId, block_x: u32, block_y: u32) -> bool;

    /// Fetch `range` for `bands` in one request and commit every block that
    /// is not resident yet. Returns the number of committed blocks.
    fn fetch_blocks(&self, range: &BlockRange, bands: &[BandId]) -> RasterResult<usize>;
}

/// Budgets and thresholds of a planner.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlannerConfig {
    pub block_size: u32,
    /// Server-imposed limit on uncompressed bytes per fetch.
    pub server_byte_limit: u64,
    /// Share of the block cache a single fetch may fill.
    pub cache_budget: u64,
    /// Resident fraction above which mixed fetches are avoided.
    pub resident_coverage_threshold: f64,
}

impl PlannerConfig {
    pub fn new(
        block_size: u32,
        server_byte_limit: u64,
        cache_budget: u64,
        resident_coverage_threshold: f64,
    ) -> Self {
        Self {
            block_size,
            server_byte_limit,
            cache_budget,
            resident_coverage_threshold,
        }
    }

    /// Largest uncompressed fetch allowed.
    pub fn byte_budget(&self) -> u64 {
        self.server_byte_limit.min(self.cache_budget)
    }
}

/// Direction of a spatial split.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SplitAxis {
    /// Top and bottom halves.
    Rows,
    /// Left and right halves.
    Columns,
}

/// Two halves of a window, split on a block boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SplitPlan {
    pub axis: SplitAxis,
    pub first: Window,
    pub second: Window,
}

impl SplitPlan {
    /// Position of `second` relative to the top-left of `first`.
    pub fn second_offset(&self) -> (u32, u32) {
        (self.second.x - self.first.x, self.second.y - self.first.y)
    }

    /// Byte offset of `second` inside a destination buffer laid out with
    /// the given pixel and line spacing.
    pub fn data_shift(&self, pixel_space: usize, line_space: usize) -> usize {
        match self.axis {
            SplitAxis::Rows => self.first.height as usize * line_space,
            SplitAxis::Columns => self.first.width as usize * pixel_space,
        }
    }
}

/// Split `window` at a block boundary, rows first.
///
/// Returns `None` when the window lies within a single block.
pub fn split_window(window: &Window, block_size: u32) -> Option<SplitPlan> {
    if window.is_empty() {
        return None;
    }
    let range = BlockRange::covering(window, block_size);
    if range.y_count > 1 {
        let cut = (range.y_off + range.y_count / 2) * block_size;
        let top = cut - window.y;
        return Some(SplitPlan {
            axis: SplitAxis::Rows,
            first: Window::new(window.x, window.y, window.width, top),
            second: Window::new(window.x, cut, window.width, window.height - top),
        });
    }
    if range.x_count > 1 {
        let cut = (range.x_off + range.x_count / 2) * block_size;
        let left = cut - window.x;
        return Some(SplitPlan {
            axis: SplitAxis::Columns,
            first: Window::new(window.x, window.y, left, window.height),
            second: Window::new(cut, window.y, window.width - left, window.height),
        });
    }
    None
}

/// Result of planning a prefetch.
#[derive(Debug, Clone, PartialEq)]
pub enum PrefetchOutcome {
    /// Nothing to fetch.
    AlreadySatisfied,
    /// Blocks were fetched and committed.
    Fetched { range: BlockRange, requests: usize },
    /// Fetch bands one at a time instead.
    RetryPerBand,
    /// Prefetch each half separately.
    RetrySpatialSplit(SplitPlan),
}

/// Split a band set into ordinary bands and mask bands, dropping empty
/// groups. Mask bands are addressed through their own channel.
pub fn partition_bands(desc: &ImageDescriptor, bands: &[BandId]) -> Vec<Vec<BandId>> {
    if bands.len() < 2 {
        return vec![bands.to_vec()];
    }
    let (masks, ordinary): (Vec<BandId>, Vec<BandId>) =
        bands.iter().partition(|id| desc.is_mask(**id));
    [ordinary, masks]
        .into_iter()
        .filter(|group| !group.is_empty())
        .collect()
}

/// Per-level prefetch state.
#[derive(Debug)]
pub struct PrefetchPlanner {
    config: PlannerConfig,
    hint: Option<Window>,
    last_fetched: Option<BlockRange>,
}

impl PrefetchPlanner {
    pub fn new(config: PlannerConfig) -> Self {
        Self {
            config,
            hint: None,
            last_fetched: None,
        }
    }

    pub fn config(&self) -> &PlannerConfig {
        &self.config
    }

    /// Record a read-ahead hint, replacing any previous one.
    pub fn advise(&mut self, window: Window) {
        self.hint = (!window.is_empty()).then_some(window);
    }

    /// The unconsumed read-ahead hint.
    pub fn hint(&self) -> Option<Window> {
        self.hint
    }

    /// Range of the last multi-band fetch.
    pub fn last_fetched(&self) -> Option<BlockRange> {
        self.last_fetched
    }

    /// Forget the last fetched range.
    pub fn flush(&mut self) {
        self.last_fetched = None;
    }

    /// Plan and run the fetches needed to make `window` resident for
    /// `bands`. `current` is the band the read is driven by.
    pub fn prefetch(
        &mut self,
        desc: &ImageDescriptor,
        store: &dyn BlockStore,
        window: &Window,
        bands: &[BandId],
        current: BandId,
    ) -> RasterResult<PrefetchOutcome> {
        if window.is_empty() || bands.is_empty() {
            return Ok(PrefetchOutcome::AlreadySatisfied);
        }
        let bs = self.config.block_size;
        let multi_band = bands.len() > 1;
        let requested = BlockRange::covering(window, bs);

        if multi_band && self.last_fetched == Some(requested) {
            debug!(?requested, "Range already fetched by previous request");
            return Ok(PrefetchOutcome::AlreadySatisfied);
        }

        let bytes_per_pixel: u64 = bands
            .iter()
            .map(|id| desc.pixel_type(*id).map_or(1, |t| t.size_bytes() as u64))
            .sum();
        let budget = self.config.byte_budget();

        let mut range = requested;
        if let Some(hint) = self.hint.filter(|h| h.contains(window)) {
            let widened = BlockRange::covering(&hint, bs);
            if widened.byte_volume(bs, bytes_per_pixel) <= budget {
                debug!(?hint, blocks = widened.block_count(), "Using advise read");
                range = widened;
                if multi_band {
                    self.hint = None;
                }
            }
        }

        // Drop fully resident rows from the top
        let row_total = range.x_count as u64 * bands.len() as u64;
        let mut trimmed_rows = 0;
        while range.y_count > 0
            && count_resident(store, &range, range.y_off, bands, current).0 == row_total
        {
            range.y_off += 1;
            range.y_count -= 1;
            trimmed_rows += 1;
        }
        let (cached, cached_current) = (range.y_off..range.y_off + range.y_count)
            .map(|by| count_resident(store, &range, by, bands, current))
            .fold((0, 0), |acc, row| (acc.0 + row.0, acc.1 + row.1));
        if trimmed_rows > 0 {
            debug!(rows = trimmed_rows, "Trimmed resident block rows");
        }

        if range.is_empty() {
            if multi_band {
                self.last_fetched = Some(requested);
            }
            return Ok(PrefetchOutcome::AlreadySatisfied);
        }

        let threshold = self.config.resident_coverage_threshold;
        let total = range.block_count() * bands.len() as u64;
        if cached as f64 > total as f64 * threshold
            && cached_current as f64 > range.block_count() as f64 * threshold
        {
            debug!(
                cached,
                total, "Range mostly resident, falling back to per-band reads"
            );
            return Ok(PrefetchOutcome::RetryPerBand);
        }

        let required = range.byte_volume(bs, bytes_per_pixel);
        if required > budget {
            let current_size = desc.pixel_type(current).map_or(1, |t| t.size_bytes() as u64);
            if multi_band && range.byte_volume(bs, current_size) <= budget {
                debug!(required, budget, "Fetch too large, retrying per band");
                return Ok(PrefetchOutcome::RetryPerBand);
            }
            if let Some(plan) = split_window(window, bs) {
                debug!(required, budget, axis = ?plan.axis, "Fetch too large, splitting");
                return Ok(PrefetchOutcome::RetrySpatialSplit(plan));
            }
            return Err(RasterError::BudgetExceeded { required, budget });
        }

        let groups = partition_bands(desc, bands);
        for group in &groups {
            store.fetch_blocks(&range, group)?;
        }
        if multi_band {
            self.last_fetched = Some(requested);
        }
        Ok(PrefetchOutcome::Fetched {
            range,
            requests: groups.len(),
        })
    }
}

/// Resident blocks of row `by` of `range`: across all bands, and for
/// `current` alone.
fn count_resident(
    store: &dyn BlockStore,
    range: &BlockRange,
    by: u32,
    bands: &[BandId],
    current: BandId,
) -> (u64, u64) {
    let mut all = 0;
    let mut this_band = 0;
    for bx in range.x_off..range.x_off + range.x_count {
        for band in bands {
            if store.is_resident(*band, bx, by) {
                all += 1;
                if *band == current {
                    this_band += 1;
                }
            }
        }
    }
    (all, this_band)
}
