//! render-pages: one image file per page

use super::JobOptions;
use anyhow::Result;
use clap::Args;
use pdfium_render_pool::config::{DEFAULT_DPI, DEFAULT_JPEG_QUALITY};
use pdfium_render_pool::{Operation, RenderJob};

#[derive(Args, Debug)]
pub struct RenderCommand {
    #[command(flatten)]
    options: JobOptions,

    /// Resolution in dots per inch (72-600)
    #[arg(long, default_value_t = DEFAULT_DPI)]
    dpi: f64,

    /// Rendering quality: none, fast, balanced, high
    #[arg(long, default_value = "balanced")]
    quality: String,

    /// Output format: png, jpg, ppm, raw
    #[arg(short, long, default_value = "png")]
    format: String,

    /// JPEG quality (0-100)
    #[arg(long, default_value_t = u32::from(DEFAULT_JPEG_QUALITY))]
    jpeg_quality: u32,

    /// Pixel layout of rendered pages: bgrx, bgr, gray
    #[arg(long, default_value = "bgrx")]
    pixel_format: String,

    /// Render and encode but do not write page files
    #[arg(long)]
    benchmark: bool,

    /// Rasterize scanned JPEG pages instead of copying their image stream
    #[arg(long)]
    no_fast_path: bool,
}

impl RenderCommand {
    fn job(&self) -> Result<RenderJob> {
        let job = RenderJob::builder()
            .dpi(self.dpi)
            .quality_level(self.quality.parse()?)
            .output_format(self.format.parse()?)
            .jpeg_quality(self.jpeg_quality)
            .pixel_format(self.pixel_format.parse()?)
            .benchmark_mode(self.benchmark)
            .fast_path(!self.no_fast_path)
            .build()?;
        Ok(job)
    }

    pub fn execute(self, log_filter: &str) -> Result<i32> {
        let job = self.job()?;
        super::run(Operation::RenderPages, &self.options, job, log_filter)
    }
}
