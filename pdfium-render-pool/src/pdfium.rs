//! PDFium backend built on `pdfium-render`.

use crate::backend::{BackendDocument, BackendPage, ImageObjectInfo, RenderBackend, RenderTarget};
use crate::config::PixelFormat;
use crate::error::{RenderError, Result};
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, Weak};
use tracing::{debug, info};

/// Environment variable naming the directory that holds the PDFium shared library.
pub const PDFIUM_LIB_ENV: &str = "PDFIUM_DYNAMIC_LIB_PATH";

static LIBRARY: Mutex<Weak<PdfiumLibrary>> = Mutex::new(Weak::new());

/// The process-wide PDFium binding.
///
/// At most one exists per process. [`PdfiumLibrary::acquire`] hands out
/// clones of the same `Arc`; the library is torn down when the last clone
/// drops. Child worker processes bind their own.
pub struct PdfiumLibrary {
    pdfium: Pdfium,
    location: Option<PathBuf>,
}

impl PdfiumLibrary {
    /// Bind PDFium (from `library_dir` if given, else the system library path)
    /// or return the binding this process already holds.
    pub fn acquire(library_dir: Option<&Path>) -> Result<Arc<Self>> {
        let mut slot = LIBRARY.lock().map_err(|_| RenderError::BackendUnavailable {
            reason: "library registry poisoned".to_string(),
        })?;
        if let Some(existing) = slot.upgrade() {
            return Ok(existing);
        }

        let bindings = match library_dir {
            Some(dir) => Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path(dir)),
            None => Pdfium::bind_to_system_library(),
        }
        .map_err(|e| RenderError::BackendUnavailable {
            reason: e.to_string(),
        })?;

        let library = Arc::new(Self {
            pdfium: Pdfium::new(bindings),
            location: library_dir.map(Path::to_path_buf),
        });
        *slot = Arc::downgrade(&library);
        info!(
            location = %library_dir.map_or_else(|| "system".to_string(), |d| d.display().to_string()),
            "PDFium library bound"
        );
        Ok(library)
    }

    /// Directory the library was loaded from, `None` for the system path.
    pub fn location(&self) -> Option<&Path> {
        self.location.as_deref()
    }
}

impl Drop for PdfiumLibrary {
    fn drop(&mut self) {
        debug!("Releasing PDFium library");
    }
}

/// [`RenderBackend`] over a shared [`PdfiumLibrary`].
#[derive(Clone)]
pub struct PdfiumBackend {
    library: Arc<PdfiumLibrary>,
}

impl PdfiumBackend {
    pub fn new(library: Arc<PdfiumLibrary>) -> Self {
        Self { library }
    }

    /// Acquire the process library and wrap it.
    pub fn acquire(library_dir: Option<&Path>) -> Result<Self> {
        PdfiumLibrary::acquire(library_dir).map(Self::new)
    }
}

impl RenderBackend for PdfiumBackend {
    type Document<'a> = PdfiumDocument<'a> where Self: 'a;

    fn open_document(&self, path: &Path) -> Result<PdfiumDocument<'_>> {
        let document = self
            .library
            .pdfium
            .load_pdf_from_file(path, None)
            .map_err(|e| RenderError::LoadFailure {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
        Ok(PdfiumDocument { document })
    }
}

pub struct PdfiumDocument<'a> {
    document: PdfDocument<'a>,
}

impl<'a> BackendDocument for PdfiumDocument<'a> {
    type Page<'p> = PdfiumPage<'a> where Self: 'p;

    fn page_count(&self) -> usize {
        self.document.pages().len() as usize
    }

    fn load_page(&self, index: usize) -> Result<PdfiumPage<'a>> {
        let page_index = PdfPageIndex::try_from(index).map_err(|_| RenderError::PageLoadFailure {
            index,
            reason: "page index exceeds PDFium limits".to_string(),
        })?;
        let page = self
            .document
            .pages()
            .get(page_index)
            .map_err(|e| RenderError::PageLoadFailure {
                index,
                reason: e.to_string(),
            })?;
        Ok(PdfiumPage { index, page })
    }
}

pub struct PdfiumPage<'a> {
    index: usize,
    page: PdfPage<'a>,
}

impl<'a> PdfiumPage<'a> {
    fn sole_object(&self) -> Option<PdfPageObject<'a>> {
        let objects = self.page.objects();
        if objects.len() != 1 {
            return None;
        }
        objects.get(0).ok()
    }

    fn encode_error(&self, e: PdfiumError) -> RenderError {
        RenderError::EncodeFailure {
            index: self.index,
            reason: e.to_string(),
        }
    }
}

fn bitmap_format(format: PixelFormat) -> PdfBitmapFormat {
    match format {
        PixelFormat::Bgrx => PdfBitmapFormat::BGRx,
        PixelFormat::Bgr => PdfBitmapFormat::BGR,
        PixelFormat::Gray => PdfBitmapFormat::Gray,
    }
}

fn render_config(target: &RenderTarget) -> PdfRenderConfig {
    let quality = target.quality;
    PdfRenderConfig::new()
        .set_fixed_size(target.width as Pixels, target.height as Pixels)
        .set_format(bitmap_format(target.pixel_format))
        .set_reverse_byte_order(false)
        .clear_before_rendering(true)
        .set_clear_color(PdfColor::WHITE)
        .render_form_data(true)
        .set_text_smoothing(quality.smooth_text())
        .set_path_smoothing(quality.smooth_paths())
        .set_image_smoothing(quality.smooth_images())
        .limit_render_image_cache_size(quality.limit_image_cache())
        .use_print_quality(quality.print_quality())
}

impl BackendPage for PdfiumPage<'_> {
    fn size_points(&self) -> (f32, f32) {
        (self.page.width().value, self.page.height().value)
    }

    fn has_transparency(&self) -> bool {
        self.page.has_transparency()
    }

    fn object_count(&self) -> usize {
        self.page.objects().len()
    }

    fn sole_image(&self) -> Option<ImageObjectInfo> {
        let object = self.sole_object()?;
        let image = object.as_image_object()?;
        let bounds = object.bounds().ok()?;
        Some(ImageObjectInfo {
            left_pts: bounds.left().value,
            bottom_pts: bounds.bottom().value,
            width_pts: object.width().ok()?.value,
            height_pts: object.height().ok()?.value,
            filters: image.filters().iter().map(|f| f.name().to_string()).collect(),
        })
    }

    fn raw_image_stream(&self) -> Result<Vec<u8>> {
        let object = self.sole_object().ok_or_else(|| RenderError::PageLoadFailure {
            index: self.index,
            reason: "page does not hold exactly one object".to_string(),
        })?;
        let image = object.as_image_object().ok_or_else(|| RenderError::PageLoadFailure {
            index: self.index,
            reason: "page object is not an image".to_string(),
        })?;
        image.get_raw_image_data().map_err(|e| RenderError::PageLoadFailure {
            index: self.index,
            reason: e.to_string(),
        })
    }

    fn render_into(&self, target: &RenderTarget, buffer: &mut [u8]) -> Result<()> {
        let needed = target.stride * target.height as usize;
        if buffer.len() < needed {
            return Err(RenderError::EncodeFailure {
                index: self.index,
                reason: format!("buffer of {} bytes, need {needed}", buffer.len()),
            });
        }
        let bitmap = self
            .page
            .render_with_config(&render_config(target))
            .map_err(|e| self.encode_error(e))?;
        let bytes = bitmap.as_raw_bytes();
        let rendered: &[u8] = bytes.as_ref();
        if rendered.len() < needed {
            return Err(RenderError::EncodeFailure {
                index: self.index,
                reason: format!("PDFium returned {} bytes, expected {needed}", rendered.len()),
            });
        }
        buffer[..needed].copy_from_slice(&rendered[..needed]);
        Ok(())
    }

    fn text(&self) -> Result<String> {
        let text = self.page.text().map_err(|e| RenderError::PageLoadFailure {
            index: self.index,
            reason: e.to_string(),
        })?;
        Ok(text.all())
    }
}
