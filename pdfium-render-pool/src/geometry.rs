//! Page pixel geometry.

use crate::config::PixelFormat;
use crate::error::{RenderError, Result};

/// Decimal places kept in the points-to-pixels scale factor.
const SCALE_PRECISION: f64 = 1_000_000.0;

/// Points per inch in PDF user space.
pub const POINTS_PER_INCH: f64 = 72.0;

/// Scale factor for a target DPI, truncated to six decimal places.
///
/// Sequential and parallel paths must agree on pixel dimensions, so every
/// caller goes through this function rather than dividing inline.
pub fn scale_for_dpi(dpi: f64) -> f64 {
    (dpi / POINTS_PER_INCH * SCALE_PRECISION).trunc() / SCALE_PRECISION
}

/// Pixel dimensions of one page at one resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageGeometry {
    pub width: u32,
    pub height: u32,
    pub has_transparency: bool,
}

impl PageGeometry {
    /// Compute pixel dimensions for a page of `width_pts` x `height_pts` points.
    pub fn compute(
        index: usize,
        width_pts: f32,
        height_pts: f32,
        has_transparency: bool,
        dpi: f64,
    ) -> Result<Self> {
        if !(width_pts.is_finite() && height_pts.is_finite()) || width_pts <= 0.0 || height_pts <= 0.0 {
            return Err(RenderError::PageLoadFailure {
                index,
                reason: format!("invalid page size {width_pts}x{height_pts} pt"),
            });
        }
        let scale = scale_for_dpi(dpi);
        let to_pixels = |points: f32| ((points as f64 * scale).floor() as u32).max(1);
        Ok(Self {
            width: to_pixels(width_pts),
            height: to_pixels(height_pts),
            has_transparency,
        })
    }

    /// Row stride in bytes, rounded up to a multiple of 4.
    pub fn stride(&self, format: PixelFormat) -> usize {
        (self.width as usize * format.bytes_per_pixel() + 3) & !3
    }

    /// Size in bytes of a buffer holding the whole page.
    pub fn buffer_len(&self, format: PixelFormat) -> usize {
        self.stride(format) * self.height as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scale_truncation() {
        assert_eq!(scale_for_dpi(72.0), 1.0);
        assert_eq!(scale_for_dpi(300.0), 4.166666);
        assert_eq!(scale_for_dpi(100.0), 1.388888);
    }

    #[test]
    fn test_letter_page_at_300_dpi() {
        let geometry = PageGeometry::compute(0, 612.0, 792.0, false, 300.0).unwrap();
        // 612 * 4.166666 = 2549.99959..., floored
        assert_eq!(geometry.width, 2549);
        assert_eq!(geometry.height, 3299);
    }

    #[test]
    fn test_minimum_one_pixel() {
        let geometry = PageGeometry::compute(0, 0.1, 0.1, false, 72.0).unwrap();
        assert_eq!((geometry.width, geometry.height), (1, 1));
    }

    #[test]
    fn test_rejects_degenerate_pages() {
        assert!(matches!(
            PageGeometry::compute(4, 0.0, 100.0, false, 150.0),
            Err(RenderError::PageLoadFailure { index: 4, .. })
        ));
        assert!(PageGeometry::compute(0, f32::NAN, 100.0, false, 150.0).is_err());
    }

    #[test]
    fn test_stride_alignment() {
        let geometry = PageGeometry::compute(0, 5.0, 2.0, false, 72.0).unwrap();
        assert_eq!(geometry.stride(PixelFormat::Bgrx), 20);
        assert_eq!(geometry.stride(PixelFormat::Bgr), 16);
        assert_eq!(geometry.stride(PixelFormat::Gray), 8);
        assert_eq!(geometry.buffer_len(PixelFormat::Bgr), 32);
    }
}
