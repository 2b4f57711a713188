//! Job configuration: render settings, page selection and parallelism limits.

use crate::error::{RenderError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const DEFAULT_DPI: f64 = 300.0;
pub const MIN_DPI: f64 = 72.0;
pub const MAX_DPI: f64 = 600.0;
pub const DEFAULT_JPEG_QUALITY: u8 = 85;
pub const MAX_WORKERS: usize = 16;
pub const MAX_THREADS: usize = 32;

/// Pixel format for rendered rasters.
///
/// There is deliberately no alpha variant: every path renders opaque pixels
/// so that single- and multi-threaded output stay byte-identical.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    /// BGRx format (4 bytes per pixel, padding byte) - default
    #[default]
    Bgrx,
    /// BGR format (3 bytes per pixel)
    Bgr,
    /// Grayscale format (1 byte per pixel)
    Gray,
}

impl PixelFormat {
    /// Get the number of bytes per pixel for this format.
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Bgrx => 4,
            PixelFormat::Bgr => 3,
            PixelFormat::Gray => 1,
        }
    }
}

impl FromStr for PixelFormat {
    type Err = RenderError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "bgrx" => Ok(PixelFormat::Bgrx),
            "bgr" => Ok(PixelFormat::Bgr),
            "gray" | "grey" => Ok(PixelFormat::Gray),
            other => Err(RenderError::invalid(
                "--pixel-format",
                format!("unknown pixel format '{other}'"),
                "use one of bgrx, bgr, gray",
            )),
        }
    }
}

/// Anti-aliasing / image cache tradeoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityLevel {
    /// No anti-aliasing, limited image cache
    None,
    /// Text anti-aliasing only, limited image cache
    Fast,
    /// Full anti-aliasing
    #[default]
    Balanced,
    /// Full anti-aliasing with print-quality rendering
    High,
}

impl QualityLevel {
    pub fn smooth_text(self) -> bool {
        !matches!(self, QualityLevel::None)
    }

    pub fn smooth_paths(self) -> bool {
        matches!(self, QualityLevel::Balanced | QualityLevel::High)
    }

    pub fn smooth_images(self) -> bool {
        matches!(self, QualityLevel::Balanced | QualityLevel::High)
    }

    pub fn limit_image_cache(self) -> bool {
        matches!(self, QualityLevel::None | QualityLevel::Fast)
    }

    pub fn print_quality(self) -> bool {
        matches!(self, QualityLevel::High)
    }
}

impl FromStr for QualityLevel {
    type Err = RenderError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(QualityLevel::None),
            "fast" => Ok(QualityLevel::Fast),
            "balanced" => Ok(QualityLevel::Balanced),
            "high" => Ok(QualityLevel::High),
            other => Err(RenderError::invalid(
                "--quality",
                format!("unknown quality level '{other}'"),
                "use one of none, fast, balanced, high",
            )),
        }
    }
}

/// Output file format for rendered pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Png,
    Jpg,
    Ppm,
    Raw,
}

impl OutputFormat {
    pub fn extension(self) -> &'static str {
        match self {
            OutputFormat::Png => "png",
            OutputFormat::Jpg => "jpg",
            OutputFormat::Ppm => "ppm",
            OutputFormat::Raw => "raw",
        }
    }
}

impl FromStr for OutputFormat {
    type Err = RenderError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "png" => Ok(OutputFormat::Png),
            "jpg" | "jpeg" => Ok(OutputFormat::Jpg),
            "ppm" => Ok(OutputFormat::Ppm),
            "raw" => Ok(OutputFormat::Raw),
            other => Err(RenderError::invalid(
                "--format",
                format!("unknown output format '{other}'"),
                "use one of png, jpg, ppm, raw",
            )),
        }
    }
}

/// Validated, immutable render configuration shared by every worker.
///
/// Build it with [`RenderJob::builder`]. Deserializing (the form child
/// workers receive it in) runs the same validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RenderJobBuilder", into = "RenderJobBuilder")]
pub struct RenderJob {
    dpi: f64,
    pixel_format: PixelFormat,
    quality_level: QualityLevel,
    output_format: OutputFormat,
    jpeg_quality: u8,
    benchmark_mode: bool,
    fast_path: bool,
}

impl Default for RenderJob {
    fn default() -> Self {
        Self {
            dpi: DEFAULT_DPI,
            pixel_format: PixelFormat::default(),
            quality_level: QualityLevel::default(),
            output_format: OutputFormat::default(),
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            benchmark_mode: false,
            fast_path: true,
        }
    }
}

impl RenderJob {
    pub fn builder() -> RenderJobBuilder {
        RenderJobBuilder::default()
    }

    pub fn dpi(&self) -> f64 {
        self.dpi
    }

    pub fn pixel_format(&self) -> PixelFormat {
        self.pixel_format
    }

    pub fn quality_level(&self) -> QualityLevel {
        self.quality_level
    }

    pub fn output_format(&self) -> OutputFormat {
        self.output_format
    }

    pub fn jpeg_quality(&self) -> u8 {
        self.jpeg_quality
    }

    /// Perform all work but skip the final writes.
    pub fn benchmark_mode(&self) -> bool {
        self.benchmark_mode
    }

    /// Whether pages may be emitted by verbatim stream extraction.
    ///
    /// Only JPEG output can be satisfied by copying an embedded stream.
    pub fn fast_path_enabled(&self) -> bool {
        self.fast_path && self.output_format == OutputFormat::Jpg
    }
}

/// Unvalidated render settings. `build()` produces a [`RenderJob`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderJobBuilder {
    dpi: f64,
    pixel_format: PixelFormat,
    quality_level: QualityLevel,
    output_format: OutputFormat,
    jpeg_quality: u32,
    benchmark_mode: bool,
    fast_path: bool,
}

impl Default for RenderJobBuilder {
    fn default() -> Self {
        RenderJob::default().into()
    }
}

impl RenderJobBuilder {
    pub fn dpi(mut self, dpi: f64) -> Self {
        self.dpi = dpi;
        self
    }

    pub fn pixel_format(mut self, format: PixelFormat) -> Self {
        self.pixel_format = format;
        self
    }

    pub fn quality_level(mut self, quality: QualityLevel) -> Self {
        self.quality_level = quality;
        self
    }

    pub fn output_format(mut self, format: OutputFormat) -> Self {
        self.output_format = format;
        self
    }

    pub fn jpeg_quality(mut self, quality: u32) -> Self {
        self.jpeg_quality = quality;
        self
    }

    pub fn benchmark_mode(mut self, enabled: bool) -> Self {
        self.benchmark_mode = enabled;
        self
    }

    pub fn fast_path(mut self, enabled: bool) -> Self {
        self.fast_path = enabled;
        self
    }

    pub fn build(self) -> Result<RenderJob> {
        if !self.dpi.is_finite() || !(MIN_DPI..=MAX_DPI).contains(&self.dpi) {
            return Err(RenderError::invalid(
                "--dpi",
                format!("{} is outside {MIN_DPI}-{MAX_DPI}", self.dpi),
                "pass a --dpi between 72 and 600",
            ));
        }
        if self.jpeg_quality > 100 {
            return Err(RenderError::invalid(
                "--jpeg-quality",
                format!("{} is above 100", self.jpeg_quality),
                "pass a --jpeg-quality between 0 and 100",
            ));
        }
        Ok(RenderJob {
            dpi: self.dpi,
            pixel_format: self.pixel_format,
            quality_level: self.quality_level,
            output_format: self.output_format,
            jpeg_quality: self.jpeg_quality as u8,
            benchmark_mode: self.benchmark_mode,
            fast_path: self.fast_path,
        })
    }
}

impl From<RenderJob> for RenderJobBuilder {
    fn from(job: RenderJob) -> Self {
        Self {
            dpi: job.dpi,
            pixel_format: job.pixel_format,
            quality_level: job.quality_level,
            output_format: job.output_format,
            jpeg_quality: u32::from(job.jpeg_quality),
            benchmark_mode: job.benchmark_mode,
            fast_path: job.fast_path,
        }
    }
}

impl TryFrom<RenderJobBuilder> for RenderJob {
    type Error = RenderError;

    fn try_from(builder: RenderJobBuilder) -> Result<Self> {
        builder.build()
    }
}

/// Inclusive, 0-based page selection (`--pages START-END` or `--pages N`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageSelection {
    start: usize,
    end: usize,
}

impl PageSelection {
    /// Create a selection; rejects `start > end` before any document is opened.
    pub fn new(start: usize, end: usize) -> Result<Self> {
        if start > end {
            return Err(RenderError::PageRangeInvalid {
                start,
                end,
                reason: "start page is after end page".to_string(),
            });
        }
        Ok(Self { start, end })
    }

    pub fn single(page: usize) -> Self {
        Self {
            start: page,
            end: page,
        }
    }

    pub fn start(&self) -> usize {
        self.start
    }

    pub fn end(&self) -> usize {
        self.end
    }

    /// Check the selection against the document and return the
    /// end-exclusive span of page indices it covers.
    pub fn resolve(&self, page_count: usize) -> Result<std::ops::Range<usize>> {
        if self.end >= page_count {
            return Err(RenderError::PageRangeInvalid {
                start: self.start,
                end: self.end,
                reason: format!("document has {page_count} pages (valid indices 0-{})", page_count.saturating_sub(1)),
            });
        }
        Ok(self.start..self.end + 1)
    }
}

impl FromStr for PageSelection {
    type Err = RenderError;

    fn from_str(s: &str) -> Result<Self> {
        let parse = |part: &str| {
            part.trim().parse::<usize>().map_err(|_| {
                RenderError::invalid(
                    "--pages",
                    format!("'{s}' is not a page number or START-END range"),
                    "use --pages 5 or --pages 0-9 (0-based, inclusive)",
                )
            })
        };
        match s.split_once('-') {
            Some((start, end)) => PageSelection::new(parse(start)?, parse(end)?),
            None => Ok(PageSelection::single(parse(s)?)),
        }
    }
}

impl fmt::Display for PageSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.start == self.end {
            write!(f, "{}", self.start)
        } else {
            write!(f, "{}-{}", self.start, self.end)
        }
    }
}

/// Requested process (N) and thread (K) counts. `None` means "not pinned".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Parallelism {
    pub workers: Option<usize>,
    pub threads: Option<usize>,
}

impl Parallelism {
    pub fn new(workers: Option<usize>, threads: Option<usize>) -> Result<Self> {
        let parallelism = Self { workers, threads };
        parallelism.validate()?;
        Ok(parallelism)
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(workers) = self.workers {
            if !(1..=MAX_WORKERS).contains(&workers) {
                return Err(RenderError::invalid(
                    "--workers",
                    format!("{workers} is outside 1-{MAX_WORKERS}"),
                    "reduce --workers (1-16)",
                ));
            }
        }
        if let Some(threads) = self.threads {
            if !(1..=MAX_THREADS).contains(&threads) {
                return Err(RenderError::invalid(
                    "--threads",
                    format!("{threads} is outside 1-{MAX_THREADS}"),
                    "reduce --threads (1-32)",
                ));
            }
        }
        Ok(())
    }
}
