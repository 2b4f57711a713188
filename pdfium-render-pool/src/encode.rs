//! Output naming and raster encoding.

use crate::config::{OutputFormat, PixelFormat, RenderJob};
use crate::error::{RenderError, Result};
use crate::metrics::JobMetrics;
use crate::page::{PageState, PageStates};
use crate::raster::Raster;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::warn;

/// `page_NNNN.ext`, keyed by the global page index.
pub fn output_file_name(index: usize, extension: &str) -> String {
    format!("page_{index:04}.{extension}")
}

pub fn output_path(dir: &Path, index: usize, extension: &str) -> PathBuf {
    dir.join(output_file_name(index, extension))
}

/// Encode a raster in the job's output format.
pub fn encode(raster: &Raster, job: &RenderJob) -> Result<Vec<u8>> {
    match job.output_format() {
        OutputFormat::Png => encode_png(raster),
        OutputFormat::Jpg => encode_jpeg(raster, job.jpeg_quality()),
        OutputFormat::Ppm => Ok(encode_ppm(raster)),
        OutputFormat::Raw => Ok(packed_rows(raster)),
    }
}

/// Rows without stride padding, in the raster's own pixel format.
pub fn packed_rows(raster: &Raster) -> Vec<u8> {
    let row_len = raster.width as usize * raster.pixel_format.bytes_per_pixel();
    let mut out = Vec::with_capacity(row_len * raster.height as usize);
    for row in raster.rows() {
        out.extend_from_slice(row);
    }
    out
}

/// RGB (or gray) samples without padding.
fn to_rgb(raster: &Raster) -> Vec<u8> {
    let bpp = raster.pixel_format.bytes_per_pixel();
    if raster.pixel_format == PixelFormat::Gray {
        return packed_rows(raster);
    }
    let mut rgb = Vec::with_capacity(raster.width as usize * raster.height as usize * 3);
    for row in raster.rows() {
        for pixel in row.chunks_exact(bpp) {
            rgb.extend_from_slice(&[pixel[2], pixel[1], pixel[0]]);
        }
    }
    rgb
}

fn encode_failure(raster: &Raster, reason: impl ToString) -> RenderError {
    RenderError::EncodeFailure {
        index: raster.page_index,
        reason: reason.to_string(),
    }
}

fn encode_png(raster: &Raster) -> Result<Vec<u8>> {
    use png::{BitDepth, ColorType, Encoder};

    let color_type = match raster.pixel_format {
        PixelFormat::Gray => ColorType::Grayscale,
        PixelFormat::Bgr | PixelFormat::Bgrx => ColorType::Rgb,
    };
    let data = to_rgb(raster);

    let mut out = Vec::new();
    let mut encoder = Encoder::new(&mut out, raster.width, raster.height);
    encoder.set_color(color_type);
    encoder.set_depth(BitDepth::Eight);
    let mut writer = encoder.write_header().map_err(|e| encode_failure(raster, e))?;
    writer.write_image_data(&data).map_err(|e| encode_failure(raster, e))?;
    writer.finish().map_err(|e| encode_failure(raster, e))?;
    Ok(out)
}

fn encode_jpeg(raster: &Raster, quality: u8) -> Result<Vec<u8>> {
    use jpeg_encoder::{ColorType, Encoder};

    let width = u16::try_from(raster.width).map_err(|_| encode_failure(raster, "width exceeds JPEG limit"))?;
    let height = u16::try_from(raster.height).map_err(|_| encode_failure(raster, "height exceeds JPEG limit"))?;
    // Bgrx goes in as Bgra; JPEG has no alpha channel so the padding byte is dropped.
    let color_type = match raster.pixel_format {
        PixelFormat::Bgrx => ColorType::Bgra,
        PixelFormat::Bgr => ColorType::Bgr,
        PixelFormat::Gray => ColorType::Luma,
    };
    let data = packed_rows(raster);

    let mut out = Vec::new();
    Encoder::new(&mut out, quality.clamp(1, 100))
        .encode(&data, width, height, color_type)
        .map_err(|e| encode_failure(raster, e))?;
    Ok(out)
}

fn encode_ppm(raster: &Raster) -> Vec<u8> {
    let magic = if raster.pixel_format == PixelFormat::Gray { "P5" } else { "P6" };
    let mut out = format!("{magic}\n{} {}\n255\n", raster.width, raster.height).into_bytes();
    out.extend_from_slice(&to_rgb(raster));
    out
}

/// Encodes rasters and writes them to the output directory, updating the
/// page ledger and metrics. Cloned into every write task.
#[derive(Debug, Clone)]
pub struct PageWriter {
    job: RenderJob,
    output_dir: PathBuf,
    states: Arc<PageStates>,
    metrics: Arc<JobMetrics>,
}

impl PageWriter {
    pub fn new(job: RenderJob, output_dir: PathBuf, states: Arc<PageStates>, metrics: Arc<JobMetrics>) -> Self {
        Self {
            job,
            output_dir,
            states,
            metrics,
        }
    }

    /// Encode and write one raster. Failures are recorded against the page.
    pub fn write(&self, raster: Raster) -> bool {
        let index = raster.page_index;
        match self.encode_and_write(raster) {
            Ok(bytes) => {
                self.states.transition(index, PageState::Written);
                self.metrics.record_written(bytes);
                true
            }
            Err(e) => {
                warn!(page = index, error = %e, "Failed to write page");
                if self.states.transition(index, PageState::Failed) {
                    self.metrics.record_failed();
                }
                false
            }
        }
    }

    fn encode_and_write(&self, raster: Raster) -> Result<usize> {
        let index = raster.page_index;
        let bytes = encode(&raster, &self.job)?;
        // Release the pixel buffer before touching the disk.
        drop(raster);
        self.states.transition(index, PageState::Encoded);

        if self.job.benchmark_mode() {
            return Ok(bytes.len());
        }
        let path = output_path(&self.output_dir, index, self.job.output_format().extension());
        write_file(&path, &bytes)?;
        Ok(bytes.len())
    }
}

fn write_file(path: &Path, bytes: &[u8]) -> Result<()> {
    let write = || -> std::io::Result<()> {
        let mut file = fs::File::create(path)?;
        file.write_all(bytes)?;
        Ok(())
    };
    write().map_err(|source| RenderError::WriteFailure {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raster::RasterPool;

    fn raster(format: PixelFormat, width: u32, height: u32) -> Raster {
        let bpp = format.bytes_per_pixel();
        let stride = (width as usize * bpp + 3) & !3;
        let mut buffer = RasterPool::default().take(stride * height as usize);
        for y in 0..height as usize {
            for x in 0..width as usize * bpp {
                buffer[y * stride + x] = (y * 16 + x) as u8;
            }
        }
        Raster {
            page_index: 3,
            width,
            height,
            stride,
            pixel_format: format,
            buffer,
        }
    }

    #[test]
    fn test_output_naming() {
        assert_eq!(output_file_name(7, "png"), "page_0007.png");
        assert_eq!(output_file_name(12345, "jpg"), "page_12345.jpg");
        assert_eq!(output_path(Path::new("out"), 0, "raw"), Path::new("out/page_0000.raw"));
    }

    #[test]
    fn test_raw_strips_padding() {
        let raster = raster(PixelFormat::Bgr, 3, 2);
        assert_eq!(raster.stride, 12);
        let raw = packed_rows(&raster);
        assert_eq!(raw.len(), 18);
        assert_eq!(&raw[9..12], &[16, 17, 18]);
    }

    #[test]
    fn test_ppm_headers() {
        let color = encode_ppm(&raster(PixelFormat::Bgrx, 2, 1));
        assert!(color.starts_with(b"P6\n2 1\n255\n"));
        // BGRx (0,1,2,3) becomes RGB (2,1,0)
        assert_eq!(&color[color.len() - 6..color.len() - 3], &[2, 1, 0]);

        let gray = encode_ppm(&raster(PixelFormat::Gray, 2, 2));
        assert!(gray.starts_with(b"P5\n2 2\n255\n"));
        assert_eq!(gray.len(), b"P5\n2 2\n255\n".len() + 4);
    }

    #[test]
    fn test_png_and_jpeg_signatures() {
        let job = RenderJob::builder().build().unwrap();
        let png = encode(&raster(PixelFormat::Bgrx, 4, 4), &job).unwrap();
        assert!(png.starts_with(&[0x89, b'P', b'N', b'G']));

        let job = RenderJob::builder()
            .output_format(OutputFormat::Jpg)
            .jpeg_quality(0)
            .build()
            .unwrap();
        for format in [PixelFormat::Bgrx, PixelFormat::Bgr, PixelFormat::Gray] {
            let jpg = encode(&raster(format, 4, 4), &job).unwrap();
            assert!(jpg.starts_with(&[0xFF, 0xD8]), "{format:?}");
            assert!(jpg.ends_with(&[0xFF, 0xD9]), "{format:?}");
        }
    }

    #[test]
    fn test_writer_records_failures() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("does/not/exist");
        let states = Arc::new(PageStates::new(3, 1));
        for state in [PageState::FastPathAttempted, PageState::PendingSlow, PageState::CachePreloaded, PageState::Rasterized] {
            states.transition(3, state);
        }
        let metrics = Arc::new(JobMetrics::new(1));
        let writer = PageWriter::new(RenderJob::default(), missing, states.clone(), metrics.clone());

        assert!(!writer.write(raster(PixelFormat::Gray, 2, 2)));
        assert_eq!(states.get(3), PageState::Failed);
        assert_eq!(metrics.snapshot().pages_failed, 1);

        // A page that is already failed is not counted a second time.
        assert!(!writer.write(raster(PixelFormat::Gray, 2, 2)));
        assert_eq!(metrics.snapshot().pages_failed, 1);
    }
}
