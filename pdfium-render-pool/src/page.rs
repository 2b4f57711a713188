//! Per-page bookkeeping: descriptors and the page state machine.

use crate::backend::BackendPage;
use crate::error::Result;
use crate::fast_path;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::OnceLock;

/// Immutable facts about one page, derived on first touch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageDescriptor {
    pub index: usize,
    pub width_pts: f32,
    pub height_pts: f32,
    pub has_transparency: bool,
    /// Provisional: extraction can still fail and send the page to rasterization.
    pub is_fast_path_eligible: bool,
}

impl PageDescriptor {
    /// Read the descriptor of a loaded page.
    pub fn read<P: BackendPage>(index: usize, page: &P) -> Self {
        let (width_pts, height_pts) = page.size_points();
        Self {
            index,
            width_pts,
            height_pts,
            has_transparency: page.has_transparency(),
            is_fast_path_eligible: fast_path::detect(page).is_some(),
        }
    }
}

/// Lazily populated descriptors for one job, shared by every render thread.
#[derive(Debug)]
pub struct DescriptorCache {
    cells: Vec<OnceLock<PageDescriptor>>,
}

impl DescriptorCache {
    pub fn new(page_count: usize) -> Self {
        Self {
            cells: (0..page_count).map(|_| OnceLock::new()).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&PageDescriptor> {
        self.cells.get(index).and_then(OnceLock::get)
    }

    /// Return the cached descriptor, deriving it with `derive` on first touch.
    ///
    /// If two threads race, both may run `derive` but only one result is kept.
    pub fn get_or_derive<F>(&self, index: usize, derive: F) -> Result<PageDescriptor>
    where
        F: FnOnce() -> Result<PageDescriptor>,
    {
        let cell = &self.cells[index];
        if let Some(descriptor) = cell.get() {
            return Ok(*descriptor);
        }
        let descriptor = derive()?;
        Ok(*cell.get_or_init(|| descriptor))
    }
}

/// Lifecycle of a single page.
///
/// ```text
/// Unprocessed -> FastPathAttempted -> Extracted
///                                  -> PendingSlow -> CachePreloaded -> Rasterized -> Encoded -> Written
/// ```
/// `Failed` is reachable from every non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PageState {
    Unprocessed = 0,
    FastPathAttempted = 1,
    Extracted = 2,
    PendingSlow = 3,
    CachePreloaded = 4,
    Rasterized = 5,
    Encoded = 6,
    Written = 7,
    Failed = 8,
}

impl PageState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => PageState::Unprocessed,
            1 => PageState::FastPathAttempted,
            2 => PageState::Extracted,
            3 => PageState::PendingSlow,
            4 => PageState::CachePreloaded,
            5 => PageState::Rasterized,
            6 => PageState::Encoded,
            7 => PageState::Written,
            _ => PageState::Failed,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, PageState::Extracted | PageState::Written | PageState::Failed)
    }

    pub fn can_advance_to(self, next: PageState) -> bool {
        use PageState::*;
        match (self, next) {
            (current, Failed) => !current.is_terminal(),
            (Unprocessed, FastPathAttempted)
            | (FastPathAttempted, Extracted)
            | (FastPathAttempted, PendingSlow)
            | (PendingSlow, CachePreloaded)
            | (CachePreloaded, Rasterized)
            | (Rasterized, Encoded)
            | (Encoded, Written) => true,
            _ => false,
        }
    }
}

/// Counts of pages by terminal state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StateTally {
    pub extracted: usize,
    pub written: usize,
    pub failed: usize,
    pub unfinished: usize,
}

impl StateTally {
    pub fn succeeded(&self) -> usize {
        self.extracted + self.written
    }
}

/// Per-page state ledger; one atomic cell per page.
#[derive(Debug)]
pub struct PageStates {
    first_index: usize,
    cells: Vec<AtomicU8>,
}

impl PageStates {
    /// Ledger for the pages `first_index..first_index + len`.
    pub fn new(first_index: usize, len: usize) -> Self {
        Self {
            first_index,
            cells: (0..len).map(|_| AtomicU8::new(PageState::Unprocessed as u8)).collect(),
        }
    }

    fn cell(&self, index: usize) -> &AtomicU8 {
        &self.cells[index - self.first_index]
    }

    pub fn get(&self, index: usize) -> PageState {
        PageState::from_u8(self.cell(index).load(Ordering::Acquire))
    }

    /// Move `index` to `next`. Returns false (and changes nothing) if the
    /// transition is not legal from the page's current state.
    pub fn transition(&self, index: usize, next: PageState) -> bool {
        let cell = self.cell(index);
        let mut current = cell.load(Ordering::Acquire);
        loop {
            if !PageState::from_u8(current).can_advance_to(next) {
                return false;
            }
            match cell.compare_exchange_weak(current, next as u8, Ordering::AcqRel, Ordering::Acquire) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    pub fn tally(&self) -> StateTally {
        let mut tally = StateTally::default();
        for cell in &self.cells {
            match PageState::from_u8(cell.load(Ordering::Acquire)) {
                PageState::Extracted => tally.extracted += 1,
                PageState::Written => tally.written += 1,
                PageState::Failed => tally.failed += 1,
                _ => tally.unfinished += 1,
            }
        }
        tally
    }

    /// Page indices currently in `state`, in index order.
    pub fn indices_in(&self, state: PageState) -> Vec<usize> {
        (0..self.cells.len())
            .map(|offset| offset + self.first_index)
            .filter(|&index| self.get(index) == state)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RenderError;

    #[test]
    fn test_slow_path_lifecycle() {
        let states = PageStates::new(10, 2);
        for next in [
            PageState::FastPathAttempted,
            PageState::PendingSlow,
            PageState::CachePreloaded,
            PageState::Rasterized,
            PageState::Encoded,
            PageState::Written,
        ] {
            assert!(states.transition(10, next), "{next:?}");
        }
        assert_eq!(states.get(10), PageState::Written);
        assert!(!states.transition(10, PageState::Failed), "terminal states are final");
    }

    #[test]
    fn test_illegal_transitions_rejected() {
        let states = PageStates::new(0, 1);
        assert!(!states.transition(0, PageState::Rasterized));
        assert!(states.transition(0, PageState::FastPathAttempted));
        assert!(!states.transition(0, PageState::Written));
        assert!(states.transition(0, PageState::Extracted));
        assert!(!states.transition(0, PageState::PendingSlow));
    }

    #[test]
    fn test_tally() {
        let states = PageStates::new(0, 4);
        states.transition(0, PageState::FastPathAttempted);
        states.transition(0, PageState::Extracted);
        states.transition(1, PageState::Failed);
        states.transition(2, PageState::FastPathAttempted);
        let tally = states.tally();
        assert_eq!(tally, StateTally { extracted: 1, written: 0, failed: 1, unfinished: 2 });
        assert_eq!(states.indices_in(PageState::Unprocessed), vec![3]);
    }

    #[test]
    fn test_descriptor_derived_once() {
        let cache = DescriptorCache::new(3);
        let mut calls = 0;
        let descriptor = PageDescriptor {
            index: 1,
            width_pts: 612.0,
            height_pts: 792.0,
            has_transparency: false,
            is_fast_path_eligible: false,
        };
        for _ in 0..3 {
            let got = cache
                .get_or_derive(1, || {
                    calls += 1;
                    Ok(descriptor)
                })
                .unwrap();
            assert_eq!(got, descriptor);
        }
        assert_eq!(calls, 1);
        assert!(cache.get(0).is_none());

        let err = cache.get_or_derive(2, || {
            Err(RenderError::PageLoadFailure { index: 2, reason: "broken".into() })
        });
        assert!(err.is_err());
        assert!(cache.get(2).is_none());
    }
}
