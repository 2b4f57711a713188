//! Page rasterization and the worker-local buffer arena.

use crate::backend::{BackendDocument, BackendPage, RenderContext, RenderTarget};
use crate::config::{PixelFormat, RenderJob};
use crate::error::Result;
use crate::geometry::PageGeometry;
use crate::page::{DescriptorCache, PageDescriptor};
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex};

/// Default number of idle buffers an arena keeps.
const DEFAULT_RETAINED_BUFFERS: usize = 16;

/// Reusable page buffers shared by the threads of one worker.
///
/// Buffers are cleared, not freed, between pages; a buffer comes back to the
/// arena when the [`PooledBuffer`] holding it drops.
#[derive(Debug, Clone)]
pub struct RasterPool {
    idle: Arc<Mutex<Vec<Vec<u8>>>>,
    max_retained: usize,
}

impl Default for RasterPool {
    fn default() -> Self {
        Self::new(DEFAULT_RETAINED_BUFFERS)
    }
}

impl RasterPool {
    pub fn new(max_retained: usize) -> Self {
        Self {
            idle: Arc::new(Mutex::new(Vec::new())),
            max_retained,
        }
    }

    /// Take a zero-filled buffer of `len` bytes.
    pub fn take(&self, len: usize) -> PooledBuffer {
        let mut data = self
            .idle
            .lock()
            .ok()
            .and_then(|mut idle| idle.pop())
            .unwrap_or_default();
        data.clear();
        data.resize(len, 0);
        PooledBuffer {
            data,
            home: Arc::clone(&self.idle),
            max_retained: self.max_retained,
        }
    }

    /// Buffers currently waiting for reuse.
    pub fn idle_count(&self) -> usize {
        self.idle.lock().map(|idle| idle.len()).unwrap_or(0)
    }
}

/// A buffer on loan from a [`RasterPool`].
#[derive(Debug)]
pub struct PooledBuffer {
    data: Vec<u8>,
    home: Arc<Mutex<Vec<Vec<u8>>>>,
    max_retained: usize,
}

impl Deref for PooledBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.data
    }
}

impl DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        let data = std::mem::take(&mut self.data);
        if let Ok(mut idle) = self.home.lock() {
            if idle.len() < self.max_retained {
                idle.push(data);
            }
        }
    }
}

/// Pixels of one rendered page.
#[derive(Debug)]
pub struct Raster {
    pub page_index: usize,
    pub width: u32,
    pub height: u32,
    /// Bytes per row including alignment padding.
    pub stride: usize,
    pub pixel_format: PixelFormat,
    pub buffer: PooledBuffer,
}

impl Raster {
    /// Row `y` without padding.
    pub fn row(&self, y: usize) -> &[u8] {
        let start = y * self.stride;
        &self.buffer[start..start + self.width as usize * self.pixel_format.bytes_per_pixel()]
    }

    pub fn rows(&self) -> impl Iterator<Item = &[u8]> + '_ {
        (0..self.height as usize).map(move |y| self.row(y))
    }
}

/// Pixel format for a page.
///
/// Deliberately ignores the page's transparency flag: every page renders
/// opaque in the configured format so output is the same for any thread count.
pub fn select_pixel_format(job: &RenderJob, _descriptor: &PageDescriptor) -> PixelFormat {
    job.pixel_format()
}

/// Render page `index` into a buffer from `pool`.
pub fn rasterize_page<D: BackendDocument>(
    ctx: &RenderContext<D>,
    descriptors: &DescriptorCache,
    index: usize,
    job: &RenderJob,
    pool: &RasterPool,
) -> Result<Raster> {
    ctx.with_page(index, |page| {
        let descriptor = descriptors.get_or_derive(index, || Ok(PageDescriptor::read(index, page)))?;
        let geometry = PageGeometry::compute(
            index,
            descriptor.width_pts,
            descriptor.height_pts,
            descriptor.has_transparency,
            job.dpi(),
        )?;
        let pixel_format = select_pixel_format(job, &descriptor);
        let stride = geometry.stride(pixel_format);
        let mut buffer = pool.take(geometry.buffer_len(pixel_format));

        let target = RenderTarget {
            width: geometry.width,
            height: geometry.height,
            stride,
            pixel_format,
            quality: job.quality_level(),
        };
        page.render_into(&target, &mut buffer)?;

        Ok(Raster {
            page_index: index,
            width: geometry.width,
            height: geometry.height,
            stride,
            pixel_format,
            buffer,
        })
    })
}
