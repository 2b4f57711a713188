//! Range scheduling.
//!
//! One pass over the selected pages tries the fast path on each page while
//! it is loaded. Pages that were not extracted are coalesced into maximal
//! contiguous [`Range`]s for the thread pool. Before a range is rendered
//! concurrently, [`preload`] opens and closes each of its pages once, in
//! order, on one thread, so the backend's lazily built caches are populated
//! before two threads can race on them.

use crate::backend::BackendDocument;
use crate::encode::output_path;
use crate::fast_path::{self, FastPathError};
use crate::page::{PageDescriptor, PageState};
use crate::worker::RenderSession;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// A contiguous, end-exclusive span of page indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Range {
    pub start: usize,
    pub len: usize,
}

impl Range {
    pub fn new(start: usize, len: usize) -> Self {
        Self { start, len }
    }

    pub fn end(&self) -> usize {
        self.start + self.len
    }

    pub fn indices(&self) -> std::ops::Range<usize> {
        self.start..self.end()
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Coalesce sorted page indices into maximal contiguous ranges.
pub fn coalesce(pending: &[usize]) -> Vec<Range> {
    let mut ranges: Vec<Range> = Vec::new();
    for &index in pending {
        match ranges.last_mut() {
            Some(last) if last.end() == index => last.len += 1,
            _ => ranges.push(Range::new(index, 1)),
        }
    }
    ranges
}

/// How the pages of one worker will be produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Schedule {
    /// Pages already emitted by the fast path.
    pub extracted: Vec<usize>,
    /// Pages left to rasterize, sorted and non-overlapping.
    pub ranges: Vec<Range>,
}

impl Schedule {
    pub fn pending_pages(&self) -> usize {
        self.ranges.iter().map(|r| r.len).sum()
    }

    /// True if ranges plus extracted pages cover `pages` exactly once each.
    pub fn covers_exactly(&self, pages: std::ops::Range<usize>) -> bool {
        let mut seen: Vec<usize> = self
            .ranges
            .iter()
            .flat_map(Range::indices)
            .chain(self.extracted.iter().copied())
            .collect();
        seen.sort_unstable();
        let sorted_ranges = self.ranges.windows(2).all(|w| w[0].end() <= w[1].start);
        sorted_ranges && seen.into_iter().eq(pages)
    }
}

/// Classify every page in `pages`, extracting fast-path pages on the way.
pub fn plan<D: BackendDocument>(session: &RenderSession<'_, D>, pages: std::ops::Range<usize>) -> Schedule {
    let mut extracted = Vec::new();
    let mut pending = Vec::new();

    for index in pages.clone() {
        session.states.transition(index, PageState::FastPathAttempted);
        if session.job.fast_path_enabled() && try_fast_path(session, index) {
            session.states.transition(index, PageState::Extracted);
            extracted.push(index);
        } else {
            session.states.transition(index, PageState::PendingSlow);
            pending.push(index);
        }
    }

    let schedule = Schedule {
        extracted,
        ranges: coalesce(&pending),
    };
    debug_assert!(schedule.covers_exactly(pages));
    info!(
        extracted = schedule.extracted.len(),
        pending = schedule.pending_pages(),
        ranges = schedule.ranges.len(),
        "Scheduled pages"
    );
    schedule
}

/// Detect and extract in one page load. Any failure means "rasterize instead".
fn try_fast_path<D: BackendDocument>(session: &RenderSession<'_, D>, index: usize) -> bool {
    let discard = session.job.benchmark_mode();
    let attempt = session.ctx.with_page(index, |page| {
        let descriptor = session
            .descriptors
            .get_or_derive(index, || Ok(PageDescriptor::read(index, page)))?;
        if !descriptor.is_fast_path_eligible {
            return Ok(Err(FastPathError::NotEligible));
        }
        Ok(fast_path::detect_and_extract(
            page,
            |codec| output_path(&session.output_dir, index, codec.extension()),
            discard,
        ))
    });

    match attempt {
        Ok(Ok(bytes)) => {
            debug!(page = index, bytes, "Fast path extracted page");
            session.metrics.record_extracted(bytes);
            true
        }
        Ok(Err(FastPathError::NotEligible)) => false,
        Ok(Err(reason)) => {
            debug!(page = index, %reason, "Fast path rejected, rasterizing");
            false
        }
        Err(error) => {
            debug!(page = index, %error, "Page failed to load during fast path check");
            false
        }
    }
}

/// Open and close every pending page of `range` once, sequentially, in order.
///
/// Pages that fail to load are marked failed here and skipped by the renderer.
/// Returns the number of pages preloaded.
pub fn preload<D: BackendDocument>(session: &RenderSession<'_, D>, range: &Range) -> usize {
    let mut preloaded = 0;
    for index in range.indices() {
        if session.states.get(index) != PageState::PendingSlow {
            continue;
        }
        let loaded = session.ctx.with_page(index, |page| {
            session
                .descriptors
                .get_or_derive(index, || Ok(PageDescriptor::read(index, page)))
        });
        match loaded {
            Ok(_) => {
                session.states.transition(index, PageState::CachePreloaded);
                preloaded += 1;
            }
            Err(e) => session.fail_page(index, &e),
        }
    }
    debug!(start = range.start, len = range.len, preloaded, "Preloaded range");
    preloaded
}
