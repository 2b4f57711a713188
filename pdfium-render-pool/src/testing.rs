//! Deterministic in-memory backend for tests.
//!
//! Documents are registered under a path and opened through the normal
//! [`RenderBackend`] interface. Vector pages render a fill pattern derived
//! from their index, image pages carry an arbitrary embedded stream, and
//! broken pages fail to load. Every page references shared lazily-warmed
//! resources; touching a resource while another thread is still warming it
//! is counted as a first-touch violation.

use crate::backend::{BackendDocument, BackendPage, ImageObjectInfo, RenderBackend, RenderTarget};
use crate::config::PixelFormat;
use crate::error::{RenderError, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const COLD: u8 = 0;
const WARMING: u8 = 1;
const WARM: u8 = 2;

/// Number of shared resources per document ("fonts", "colour spaces").
const RESOURCE_COUNT: usize = 2;

const LETTER_WIDTH: f32 = 612.0;
const LETTER_HEIGHT: f32 = 792.0;

/// Content of one fake page.
#[derive(Debug, Clone, PartialEq)]
pub enum FakePage {
    Vector {
        width_pts: f32,
        height_pts: f32,
        transparent: bool,
    },
    Image {
        coverage: f32,
        /// Bottom-left corner of the image box.
        origin: (f32, f32),
        filters: Vec<String>,
        data: Vec<u8>,
        extra_objects: usize,
    },
    Broken,
}

/// Blueprint for a fake document.
#[derive(Debug, Clone, PartialEq)]
pub struct FakeDocumentSpec {
    pages: Vec<FakePage>,
    unreadable: bool,
}

impl FakeDocumentSpec {
    /// `count` letter-sized vector pages.
    pub fn vector(count: usize) -> Self {
        Self {
            pages: (0..count)
                .map(|_| FakePage::Vector {
                    width_pts: LETTER_WIDTH,
                    height_pts: LETTER_HEIGHT,
                    transparent: false,
                })
                .collect(),
            unreadable: false,
        }
    }

    /// A document that exists but cannot be parsed.
    pub fn unreadable() -> Self {
        Self {
            pages: Vec::new(),
            unreadable: true,
        }
    }

    pub fn with_page(mut self, index: usize, page: FakePage) -> Self {
        self.pages[index] = page;
        self
    }

    pub fn with_broken_page(self, index: usize) -> Self {
        self.with_page(index, FakePage::Broken)
    }

    pub fn with_transparent_page(self, index: usize) -> Self {
        self.with_page(
            index,
            FakePage::Vector {
                width_pts: LETTER_WIDTH,
                height_pts: LETTER_HEIGHT,
                transparent: true,
            },
        )
    }

    pub fn with_page_size(self, index: usize, width_pts: f32, height_pts: f32) -> Self {
        self.with_page(
            index,
            FakePage::Vector {
                width_pts,
                height_pts,
                transparent: false,
            },
        )
    }

    /// A single DCT-encoded image covering `coverage` of the page.
    pub fn with_jpeg_page(self, index: usize, coverage: f32) -> Self {
        self.with_image_page(index, coverage, &["DCTDecode"], fake_jpeg(index as u8))
    }

    pub fn with_image_page(self, index: usize, coverage: f32, filters: &[&str], data: Vec<u8>) -> Self {
        self.with_page(
            index,
            FakePage::Image {
                coverage,
                origin: (0.0, 0.0),
                filters: filters.iter().map(|f| f.to_string()).collect(),
                data,
                extra_objects: 0,
            },
        )
    }

    /// Move the image box of an image page so its bottom-left corner sits at `(left, bottom)`.
    pub fn with_image_origin(mut self, index: usize, left: f32, bottom: f32) -> Self {
        if let FakePage::Image { origin, .. } = &mut self.pages[index] {
            *origin = (left, bottom);
        }
        self
    }

    /// Add `count` more objects on top of an image page.
    pub fn with_overlay(mut self, index: usize, count: usize) -> Self {
        if let FakePage::Image { extra_objects, .. } = &mut self.pages[index] {
            *extra_objects = count;
        }
        self
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }
}

/// A minimal JFIF-shaped byte stream: SOI, an APP0 marker, payload, EOI.
pub fn fake_jpeg(seed: u8) -> Vec<u8> {
    let mut data = vec![0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, b'J', b'F', b'I', b'F', 0x00];
    data.extend((0..64u8).map(|i| i.wrapping_mul(seed | 1)));
    data.extend([0xFF, 0xD9]);
    data
}

/// Text the fake backend reports for page `index`.
pub fn fake_page_text(index: usize) -> String {
    format!("Page {index}\nπ ≈ 3.14159\n")
}

/// The byte a vector page renders at (x, y, channel).
pub fn fake_pixel(seed: usize, x: usize, y: usize, channel: usize) -> u8 {
    (seed as u8).wrapping_mul(31)
        ^ (x as u8).wrapping_mul(7)
        ^ (y as u8).wrapping_mul(13)
        ^ (channel as u8).wrapping_mul(71)
}

/// Counters shared by every document opened from one backend.
#[derive(Debug, Default)]
pub struct FakeStats {
    pub documents_opened: AtomicUsize,
    pub pages_loaded: AtomicUsize,
    pub first_touch_violations: AtomicUsize,
    rendered: Mutex<Vec<usize>>,
}

impl FakeStats {
    /// Page indices passed to `render_into`, sorted.
    pub fn rendered_pages(&self) -> Vec<usize> {
        let mut pages = self.rendered.lock().map(|p| p.clone()).unwrap_or_default();
        pages.sort_unstable();
        pages
    }

    pub fn violations(&self) -> usize {
        self.first_touch_violations.load(Ordering::SeqCst)
    }
}

/// In-memory [`RenderBackend`].
#[derive(Debug, Clone, Default)]
pub struct FakeBackend {
    documents: Arc<Mutex<HashMap<PathBuf, Arc<FakeDocumentSpec>>>>,
    stats: Arc<FakeStats>,
    warm_delay: Duration,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self {
            warm_delay: Duration::from_millis(1),
            ..Self::default()
        }
    }

    pub fn register(&self, path: impl AsRef<Path>, spec: FakeDocumentSpec) -> PathBuf {
        let path = path.as_ref().to_path_buf();
        if let Ok(mut documents) = self.documents.lock() {
            documents.insert(path.clone(), Arc::new(spec));
        }
        path
    }

    pub fn stats(&self) -> &FakeStats {
        &self.stats
    }
}

impl RenderBackend for FakeBackend {
    type Document<'a> = FakeDocument where Self: 'a;

    fn open_document(&self, path: &Path) -> Result<FakeDocument> {
        let spec = self
            .documents
            .lock()
            .ok()
            .and_then(|documents| documents.get(path).cloned())
            .ok_or_else(|| RenderError::LoadFailure {
                path: path.to_path_buf(),
                reason: "file not found".to_string(),
            })?;
        if spec.unreadable {
            return Err(RenderError::LoadFailure {
                path: path.to_path_buf(),
                reason: "not a PDF".to_string(),
            });
        }
        self.stats.documents_opened.fetch_add(1, Ordering::SeqCst);
        Ok(FakeDocument {
            spec,
            resources: (0..RESOURCE_COUNT).map(|_| AtomicU8::new(COLD)).collect(),
            stats: Arc::clone(&self.stats),
            warm_delay: self.warm_delay,
        })
    }
}

/// A document opened from a [`FakeBackend`]. Owns its own resource cache.
#[derive(Debug)]
pub struct FakeDocument {
    spec: Arc<FakeDocumentSpec>,
    resources: Vec<AtomicU8>,
    stats: Arc<FakeStats>,
    warm_delay: Duration,
}

impl FakeDocument {
    fn touch_resource(&self, resource: usize) {
        let state = &self.resources[resource];
        match state.compare_exchange(COLD, WARMING, Ordering::AcqRel, Ordering::Acquire) {
            Ok(_) => {
                std::thread::sleep(self.warm_delay);
                state.store(WARM, Ordering::Release);
            }
            Err(WARMING) => {
                self.stats.first_touch_violations.fetch_add(1, Ordering::SeqCst);
            }
            Err(_) => {}
        }
    }
}

impl BackendDocument for FakeDocument {
    type Page<'p> = FakePageRef<'p> where Self: 'p;

    fn page_count(&self) -> usize {
        self.spec.pages.len()
    }

    fn load_page(&self, index: usize) -> Result<FakePageRef<'_>> {
        let page = self.spec.pages.get(index).ok_or_else(|| RenderError::PageLoadFailure {
            index,
            reason: "index out of range".to_string(),
        })?;
        if matches!(page, FakePage::Broken) {
            return Err(RenderError::PageLoadFailure {
                index,
                reason: "corrupt page object".to_string(),
            });
        }
        self.stats.pages_loaded.fetch_add(1, Ordering::SeqCst);
        self.touch_resource(index % RESOURCE_COUNT);
        Ok(FakePageRef { document: self, index, page })
    }
}

/// A loaded fake page.
#[derive(Debug)]
pub struct FakePageRef<'d> {
    document: &'d FakeDocument,
    index: usize,
    page: &'d FakePage,
}

impl BackendPage for FakePageRef<'_> {
    fn size_points(&self) -> (f32, f32) {
        match self.page {
            FakePage::Vector { width_pts, height_pts, .. } => (*width_pts, *height_pts),
            _ => (LETTER_WIDTH, LETTER_HEIGHT),
        }
    }

    fn has_transparency(&self) -> bool {
        matches!(self.page, FakePage::Vector { transparent: true, .. })
    }

    fn object_count(&self) -> usize {
        match self.page {
            FakePage::Vector { .. } => 3,
            FakePage::Image { extra_objects, .. } => 1 + extra_objects,
            FakePage::Broken => 0,
        }
    }

    fn sole_image(&self) -> Option<ImageObjectInfo> {
        match self.page {
            FakePage::Image { coverage, origin, filters, extra_objects: 0, .. } => Some(ImageObjectInfo {
                left_pts: origin.0,
                bottom_pts: origin.1,
                width_pts: LETTER_WIDTH,
                height_pts: LETTER_HEIGHT * coverage,
                filters: filters.clone(),
            }),
            _ => None,
        }
    }

    fn raw_image_stream(&self) -> Result<Vec<u8>> {
        match self.page {
            FakePage::Image { data, .. } => Ok(data.clone()),
            _ => Err(RenderError::PageLoadFailure {
                index: self.index,
                reason: "page has no image stream".to_string(),
            }),
        }
    }

    fn render_into(&self, target: &RenderTarget, buffer: &mut [u8]) -> Result<()> {
        let needed = target.stride * target.height as usize;
        if buffer.len() < needed {
            return Err(RenderError::EncodeFailure {
                index: self.index,
                reason: format!("buffer of {} bytes, need {needed}", buffer.len()),
            });
        }
        if let Ok(mut rendered) = self.document.stats.rendered.lock() {
            rendered.push(self.index);
        }
        let seed = match self.page {
            FakePage::Image { data, .. } => data.len(),
            _ => self.index,
        };
        let bpp = target.pixel_format.bytes_per_pixel();
        for y in 0..target.height as usize {
            let row = &mut buffer[y * target.stride..y * target.stride + target.width as usize * bpp];
            for (x, pixel) in row.chunks_exact_mut(bpp).enumerate() {
                for (channel, byte) in pixel.iter_mut().enumerate() {
                    *byte = fake_pixel(seed, x, y, channel);
                }
                if target.pixel_format == PixelFormat::Bgrx {
                    pixel[3] = 0xFF;
                }
            }
        }
        Ok(())
    }

    fn text(&self) -> Result<String> {
        Ok(fake_page_text(self.index))
    }
}
