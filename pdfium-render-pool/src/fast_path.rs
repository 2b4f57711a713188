//! JPEG fast path for scanned pages.
//!
//! A page whose only content is one image covering at least 95% of the page,
//! stored as a bare DCT stream, is emitted by copying that stream to disk.
//! No decode, rasterize or encode happens. Eligibility is provisional: any
//! failure during extraction sends the page back to normal rendering.

use crate::backend::{BackendPage, ImageObjectInfo};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Minimum page coverage for a scanned page (95%)
pub const SCANNED_COVERAGE_THRESHOLD: f64 = 0.95;

/// An embedded stream format that is also a standalone file format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamCodec {
    Jpeg,
}

impl StreamCodec {
    /// The codec for a filter chain, if the chain can be written out verbatim.
    pub fn from_filters(filters: &[String]) -> Option<Self> {
        match filters {
            [only] if only == "DCTDecode" => Some(StreamCodec::Jpeg),
            _ => None,
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            StreamCodec::Jpeg => "jpg",
        }
    }

    fn magic(self) -> &'static [u8] {
        match self {
            StreamCodec::Jpeg => &[0xFF, 0xD8, 0xFF],
        }
    }

    fn trailer(self) -> &'static [u8] {
        match self {
            StreamCodec::Jpeg => &[0xFF, 0xD9],
        }
    }

    /// Check the stream is a complete standalone file of this codec.
    pub fn validate(self, data: &[u8]) -> Result<(), FastPathError> {
        let (magic, trailer) = (self.magic(), self.trailer());
        if data.len() < magic.len().max(4) {
            return Err(FastPathError::Truncated { len: data.len() });
        }
        if !data.starts_with(magic) {
            return Err(FastPathError::BadHeader { codec: self });
        }
        if !data.ends_with(trailer) {
            return Err(FastPathError::Truncated { len: data.len() });
        }
        Ok(())
    }
}

/// Why a page was not emitted by the fast path. Never fatal.
#[derive(Error, Debug)]
pub enum FastPathError {
    #[error("page is not a single full-page image with a transportable stream")]
    NotEligible,

    #[error("raw image stream unavailable: {0}")]
    StreamUnavailable(String),

    #[error("stream does not start with the {codec:?} header")]
    BadHeader { codec: StreamCodec },

    #[error("stream of {len} bytes is truncated")]
    Truncated { len: usize },

    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Decide whether `page` can be emitted verbatim, and in which codec.
///
/// Checks, in order: exactly one object, that object is an image, the image
/// covers at least [`SCANNED_COVERAGE_THRESHOLD`] of the page area, and its
/// filter chain is a single transportable codec. Nothing is decoded.
pub fn detect<P: BackendPage>(page: &P) -> Option<StreamCodec> {
    if page.object_count() != 1 {
        return None;
    }
    let image = page.sole_image()?;

    let (page_width, page_height) = page.size_points();
    let page_area = page_width as f64 * page_height as f64;
    if page_area <= 0.0 {
        return None;
    }
    let coverage = visible_area(&image, page_width, page_height) / page_area;
    if coverage < SCANNED_COVERAGE_THRESHOLD {
        return None;
    }

    StreamCodec::from_filters(&image.filters)
}

/// Area of the image box that lies on the page, in square points.
fn visible_area(image: &ImageObjectInfo, page_width: f32, page_height: f32) -> f64 {
    let span = |start: f32, len: f32, limit: f32| {
        let lo = (start as f64).max(0.0);
        let hi = (start as f64 + len as f64).min(limit as f64);
        (hi - lo).max(0.0)
    };
    span(image.left_pts, image.width_pts, page_width) * span(image.bottom_pts, image.height_pts, page_height)
}

/// Pull the page's stream, validate it and write it to `dest`.
///
/// With `discard` set the stream is validated but not written.
/// Returns the number of bytes in the stream.
pub fn extract<P: BackendPage>(
    page: &P,
    codec: StreamCodec,
    dest: &Path,
    discard: bool,
) -> Result<usize, FastPathError> {
    let data = page
        .raw_image_stream()
        .map_err(|e| FastPathError::StreamUnavailable(e.to_string()))?;
    codec.validate(&data)?;
    if !discard {
        fs::write(dest, &data).map_err(|source| FastPathError::Write {
            path: dest.to_path_buf(),
            source,
        })?;
    }
    Ok(data.len())
}

/// [`detect`] followed by [`extract`] on the same loaded page.
///
/// `dest` maps the detected codec to the output path.
pub fn detect_and_extract<P, F>(page: &P, dest: F, discard: bool) -> Result<usize, FastPathError>
where
    P: BackendPage,
    F: FnOnce(StreamCodec) -> PathBuf,
{
    let codec = detect(page).ok_or(FastPathError::NotEligible)?;
    extract(page, codec, &dest(codec), discard)
}
