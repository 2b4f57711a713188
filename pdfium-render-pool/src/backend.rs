//! Rendering backend abstraction.
//!
//! The engine never talks to a PDF library directly. It opens documents
//! through [`RenderBackend`], shares one [`BackendDocument`] between the
//! render threads of a process and touches pages only through a
//! [`RenderContext`], which fires the host hooks around every page open.

use crate::config::{PixelFormat, QualityLevel};
use crate::error::Result;
use std::path::Path;
use std::sync::Arc;

/// The single image object covering a page, as reported by the backend.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageObjectInfo {
    /// Left edge of the bounding box in page space
    pub left_pts: f32,
    /// Bottom edge of the bounding box in page space
    pub bottom_pts: f32,
    /// Bounding box width in points
    pub width_pts: f32,
    /// Bounding box height in points
    pub height_pts: f32,
    /// Stream filter chain, outermost first (e.g. `["DCTDecode"]`)
    pub filters: Vec<String>,
}

/// Destination description for [`BackendPage::render_into`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderTarget {
    pub width: u32,
    pub height: u32,
    pub stride: usize,
    pub pixel_format: PixelFormat,
    pub quality: QualityLevel,
}

/// Opens documents. One backend value lives for the whole process.
pub trait RenderBackend: Send + Sync {
    type Document<'a>: BackendDocument
    where
        Self: 'a;

    fn open_document(&self, path: &Path) -> Result<Self::Document<'_>>;
}

/// An open document. Shared by reference across the render threads.
pub trait BackendDocument: Send + Sync {
    type Page<'p>: BackendPage
    where
        Self: 'p;

    fn page_count(&self) -> usize;

    /// Load one page. Errors are reported as `PageLoadFailure`.
    fn load_page(&self, index: usize) -> Result<Self::Page<'_>>;
}

/// A loaded page. Confined to the thread that loaded it.
pub trait BackendPage {
    /// Page size in points (width, height).
    fn size_points(&self) -> (f32, f32);

    fn has_transparency(&self) -> bool;

    /// Number of drawable objects on the page.
    fn object_count(&self) -> usize;

    /// The page's image object, if the page holds exactly one object and it is an image.
    fn sole_image(&self) -> Option<ImageObjectInfo>;

    /// Undecoded bytes of the sole image's stream.
    fn raw_image_stream(&self) -> Result<Vec<u8>>;

    /// Rasterize into `buffer` (`target.stride * target.height` bytes), white background.
    fn render_into(&self, target: &RenderTarget, buffer: &mut [u8]) -> Result<()>;

    /// Plain text content of the page.
    fn text(&self) -> Result<String>;
}

/// Host callbacks fired around page lifecycle events.
pub trait PageHooks: Send + Sync {
    fn page_loaded(&self, _index: usize) {}

    fn page_closed(&self, _index: usize) {}
}

/// Hooks that do nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHooks;

impl PageHooks for NoopHooks {}

/// One open document plus the hooks installed for it.
pub struct RenderContext<D> {
    document: D,
    hooks: Arc<dyn PageHooks>,
}

impl<D: BackendDocument> RenderContext<D> {
    pub fn new(document: D) -> Self {
        Self::with_hooks(document, Arc::new(NoopHooks))
    }

    pub fn with_hooks(document: D, hooks: Arc<dyn PageHooks>) -> Self {
        Self { document, hooks }
    }

    pub fn page_count(&self) -> usize {
        self.document.page_count()
    }

    pub fn document(&self) -> &D {
        &self.document
    }

    /// Open page `index`, run `f` on it, then close it.
    pub fn with_page<'s, R, F>(&'s self, index: usize, f: F) -> Result<R>
    where
        F: FnOnce(&D::Page<'s>) -> Result<R>,
    {
        let page = self.document.load_page(index)?;
        self.hooks.page_loaded(index);
        let result = f(&page);
        drop(page);
        self.hooks.page_closed(index);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeBackend, FakeDocumentSpec};
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingHooks {
        events: Mutex<Vec<(&'static str, usize)>>,
    }

    impl PageHooks for RecordingHooks {
        fn page_loaded(&self, index: usize) {
            self.events.lock().unwrap().push(("loaded", index));
        }

        fn page_closed(&self, index: usize) {
            self.events.lock().unwrap().push(("closed", index));
        }
    }

    #[test]
    fn test_hooks_fire_around_each_page() {
        let backend = FakeBackend::new();
        let path = backend.register("doc.pdf", FakeDocumentSpec::vector(3));
        let hooks = Arc::new(RecordingHooks::default());
        let ctx = RenderContext::with_hooks(backend.open_document(&path).unwrap(), hooks.clone());

        let size = ctx.with_page(2, |page| Ok(page.size_points())).unwrap();
        assert_eq!(size, (612.0, 792.0));
        assert_eq!(*hooks.events.lock().unwrap(), vec![("loaded", 2), ("closed", 2)]);
    }

    #[test]
    fn test_failed_load_fires_no_hooks() {
        let backend = FakeBackend::new();
        let path = backend.register("doc.pdf", FakeDocumentSpec::vector(3).with_broken_page(1));
        let hooks = Arc::new(RecordingHooks::default());
        let ctx = RenderContext::with_hooks(backend.open_document(&path).unwrap(), hooks.clone());

        assert!(ctx.with_page(1, |_| Ok(())).is_err());
        assert!(hooks.events.lock().unwrap().is_empty());
    }
}
