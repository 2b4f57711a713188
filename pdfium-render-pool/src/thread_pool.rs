//! K-thread rendering of one range over a shared document.

use crate::backend::BackendDocument;
use crate::error::{RenderError, Result};
use crate::metrics::RangeTiming;
use crate::page::PageState;
use crate::raster::{rasterize_page, Raster};
use crate::scheduler::Range;
use crate::worker::RenderSession;
use rayon::prelude::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;
use tracing::info;

/// Result of rendering one range.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RangeOutcome {
    /// Pages rasterized and handed to the completion callback.
    pub completed: usize,
    /// Pages that failed to load or rasterize, including during preload.
    pub failed: usize,
}

pub struct ThreadPoolRenderer {
    pool: rayon::ThreadPool,
    threads: usize,
}

impl ThreadPoolRenderer {
    pub fn new(threads: usize) -> Result<Self> {
        let threads = threads.max(1);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("render-{i}"))
            .build()
            .map_err(|e| RenderError::WorkerSpawnFailure {
                worker_id: 0,
                source: std::io::Error::other(e.to_string()),
            })?;
        Ok(Self { pool, threads })
    }

    pub fn threads(&self) -> usize {
        self.threads
    }

    /// Render every preloaded page of `range`, calling `on_complete` with each
    /// raster as soon as it is ready. Blocks until the whole range is done.
    ///
    /// Pages must already be in `CachePreloaded`; pages in any other state
    /// are skipped.
    pub fn render_range<D, F>(&self, session: &RenderSession<'_, D>, range: &Range, on_complete: F) -> RangeOutcome
    where
        D: BackendDocument,
        F: Fn(Raster) + Sync,
    {
        let started = Instant::now();
        let completed = AtomicUsize::new(0);
        let failed = AtomicUsize::new(0);

        self.pool.install(|| {
            range.indices().into_par_iter().for_each(|index| {
                match session.states.get(index) {
                    PageState::CachePreloaded => {}
                    PageState::Failed => {
                        failed.fetch_add(1, Ordering::Relaxed);
                        return;
                    }
                    _ => return,
                }
                match rasterize_page(session.ctx, &session.descriptors, index, &session.job, &session.pool) {
                    Ok(raster) => {
                        session.states.transition(index, PageState::Rasterized);
                        on_complete(raster);
                        completed.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(e) => {
                        session.fail_page(index, &e);
                        failed.fetch_add(1, Ordering::Relaxed);
                    }
                }
            });
        });

        let outcome = RangeOutcome {
            completed: completed.into_inner(),
            failed: failed.into_inner(),
        };
        let elapsed = started.elapsed();
        session.metrics.record_range(RangeTiming {
            start: range.start,
            len: range.len,
            threads: self.threads,
            elapsed_ms: elapsed.as_secs_f64() * 1000.0,
        });
        info!(
            start = range.start,
            len = range.len,
            threads = self.threads,
            completed = outcome.completed,
            failed = outcome.failed,
            "Rendered range in {:.2}s",
            elapsed.as_secs_f64()
        );
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{RenderBackend, RenderContext};
    use crate::config::RenderJob;
    use crate::metrics::JobMetrics;
    use crate::scheduler::{plan, preload};
    use crate::testing::{FakeBackend, FakeDocumentSpec};
    use std::sync::{Arc, Mutex};

    fn render_all(threads: usize, spec: FakeDocumentSpec) -> (Vec<(usize, Vec<u8>)>, RangeOutcome) {
        let dir = tempfile::tempdir().unwrap();
        let backend = FakeBackend::new();
        let pages = spec.page_count();
        let path = backend.register("doc.pdf", spec);
        let ctx = RenderContext::new(backend.open_document(&path).unwrap());
        let job = RenderJob::builder().dpi(72.0).build().unwrap();
        let session = RenderSession::new(&ctx, &job, dir.path(), 0..pages, Arc::new(JobMetrics::new(pages)));

        let schedule = plan(&session, 0..pages);
        let renderer = ThreadPoolRenderer::new(threads).unwrap();
        let rasters = Mutex::new(Vec::new());
        let mut total = RangeOutcome::default();
        for range in &schedule.ranges {
            preload(&session, range);
            let outcome = renderer.render_range(&session, range, |raster| {
                rasters.lock().unwrap().push((raster.page_index, raster.buffer.to_vec()));
            });
            total.completed += outcome.completed;
            total.failed += outcome.failed;
        }
        let mut rasters = rasters.into_inner().unwrap();
        rasters.sort_by_key(|(index, _)| *index);
        (rasters, total)
    }

    #[test]
    fn test_thread_count_does_not_change_pixels() {
        let (single, _) = render_all(1, FakeDocumentSpec::vector(12));
        let (multi, outcome) = render_all(8, FakeDocumentSpec::vector(12));
        assert_eq!(outcome, RangeOutcome { completed: 12, failed: 0 });
        assert_eq!(single, multi);
    }

    #[test]
    fn test_failed_page_does_not_stop_range() {
        let (rasters, outcome) = render_all(4, FakeDocumentSpec::vector(6).with_broken_page(2));
        assert_eq!(outcome, RangeOutcome { completed: 5, failed: 1 });
        assert!(rasters.iter().all(|(index, _)| *index != 2));
    }
}
