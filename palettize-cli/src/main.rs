use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use common_types::{LoopCount, PalettizeError, PixelFormat};
use format_registry::FormatRegistry;
use frame_pipeline::{FrameSequencePipeline, GifSink, SequenceFrame};
use image::imageops::FilterType;
use quant_core::{Bitmap, ExactPalette, NeuQuantStrategy, OctreeStrategy, PaletteStrategy, QuantizeEngine};
use std::fs::{read_dir, File};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "palettize")]
#[command(about = "Indexed-color pipeline: PNG frames → quantize → animated GIF")]
struct Args {
    /// Input directory containing PNG frames, encoded in sort order
    #[arg(long, value_name = "DIR")]
    frames: PathBuf,

    /// Output GIF file path
    #[arg(long, value_name = "FILE")]
    out: PathBuf,

    /// Palette reduction strategy
    #[arg(long, value_enum, default_value = "octree")]
    strategy: StrategyKind,

    /// Palette color budget
    #[arg(long, default_value = "256")]
    max_colors: usize,

    /// NeuQuant sample factor (1=best, 30=fastest)
    #[arg(long, default_value = "10")]
    samplefac: i32,

    /// Frame delay in centiseconds (~4cs ≈ 25fps)
    #[arg(long, default_value = "4")]
    delay_cs: u16,

    /// Enable infinite loop
    #[arg(long)]
    r#loop: bool,

    /// Downscale frames so the longest edge fits this size
    #[arg(long)]
    max_size: Option<u32>,

    /// Write a JSON processing report to this path
    #[arg(long, value_name = "FILE")]
    report: Option<PathBuf>,
}

#[derive(Debug, Copy, Clone, ValueEnum)]
enum StrategyKind {
    /// Lossless identity mapping, fails past the color budget
    Exact,
    /// Octree reducer
    Octree,
    /// NeuQuant neural quantizer
    Neuquant,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();
    let args = Args::parse();

    info!(input = ?args.frames, output = ?args.out, strategy = ?args.strategy, "palettize pipeline");

    let registry = FormatRegistry::bootstrap().context("format registry bootstrap failed")?;
    let target = registry
        .by_extension("gif")
        .context("GIF descriptor missing from registry")?;
    if target.requires_quantization() {
        info!(
            mime = target.mime_type(),
            "target format is indexed; per-frame quantization enabled"
        );
    }

    let bitmaps = load_png_frames(&registry, &args.frames)?;
    if bitmaps.is_empty() {
        bail!("no PNG frames found in {:?}", args.frames);
    }
    info!(frames = bitmaps.len(), "frames loaded");

    let (screen_w, screen_h) =
        gif_screen_size(target_dimensions(&bitmaps[0], args.max_size))?;
    let frames: Vec<SequenceFrame> = bitmaps
        .into_iter()
        .map(|image| SequenceFrame::new(image).with_delay_cs(args.delay_cs))
        .collect();

    let strategy: Box<dyn PaletteStrategy> = match args.strategy {
        StrategyKind::Exact => Box::new(ExactPalette::new(args.max_colors)),
        StrategyKind::Octree => Box::new(OctreeStrategy::new(args.max_colors)),
        StrategyKind::Neuquant => {
            Box::new(NeuQuantStrategy::new(args.max_colors).with_sample_factor(args.samplefac))
        }
    };
    let mut engine = QuantizeEngine::new(strategy);

    let loop_count = if args.r#loop {
        LoopCount::Infinite
    } else {
        LoopCount::Finite(1)
    };
    let output_file = File::create(&args.out)
        .with_context(|| format!("cannot create output file {:?}", args.out))?;
    let mut sink = GifSink::new(BufWriter::new(output_file), screen_w, screen_h, loop_count)
        .context("GIF sink construction failed")?;

    let max_size = args.max_size;
    let mut report = FrameSequencePipeline::new()
        .process(
            frames,
            move |image| resize_transform(image, max_size),
            &mut engine,
            &mut sink,
        )
        .context("frame sequence processing failed")?;
    let mut writer = sink.into_writer().context("GIF finalization failed")?;
    writer.flush().context("output flush failed")?;

    report.output_size_bytes = std::fs::metadata(&args.out)
        .with_context(|| format!("cannot stat {:?}", args.out))?
        .len();
    info!(
        frames = report.frame_count,
        bytes = report.output_size_bytes,
        duration_ms = report.processing_time_ms,
        "GIF written"
    );

    if let Some(report_path) = &args.report {
        let file = File::create(report_path)
            .with_context(|| format!("cannot create report file {report_path:?}"))?;
        serde_json::to_writer_pretty(BufWriter::new(file), &report)
            .context("report serialization failed")?;
        info!(path = ?report_path, "report written");
    }

    Ok(())
}

/// Load every PNG in the directory, sorted by path; non-PNG files are
/// skipped with a warning after a signature sniff.
fn load_png_frames(registry: &FormatRegistry, dir: &PathBuf) -> Result<Vec<Bitmap>> {
    let mut entries: Vec<_> = read_dir(dir)
        .with_context(|| format!("cannot read frame directory {dir:?}"))?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().is_file())
        .collect();
    entries.sort_by_key(|entry| entry.path());

    let mut frames = Vec::new();
    for entry in entries {
        let path = entry.path();
        let bytes =
            std::fs::read(&path).with_context(|| format!("cannot read frame {path:?}"))?;
        match registry.sniff(&bytes) {
            Some(descriptor) if descriptor.name() == "png" => {}
            Some(descriptor) => {
                warn!(path = ?path, format = descriptor.name(), "skipping non-PNG frame");
                continue;
            }
            None => {
                warn!(path = ?path, "skipping file with unrecognized signature");
                continue;
            }
        }

        let decoded = image::load_from_memory(&bytes)
            .with_context(|| format!("cannot decode PNG {path:?}"))?
            .to_rgba8();
        let bitmap = bitmap_from_rgba(decoded.width(), decoded.height(), decoded.as_raw())?;
        info!(path = ?path, width = bitmap.width(), height = bitmap.height(), "frame loaded");
        frames.push(bitmap);
    }
    Ok(frames)
}

fn bitmap_from_rgba(width: u32, height: u32, rgba: &[u8]) -> Result<Bitmap> {
    let mut bgra = Vec::with_capacity(rgba.len());
    for px in rgba.chunks_exact(4) {
        bgra.extend_from_slice(&[px[2], px[1], px[0], px[3]]);
    }
    Ok(Bitmap::from_tight_bytes(width, height, PixelFormat::Bgra32, bgra)?)
}

fn rgba_from_bitmap(bitmap: &Bitmap) -> Result<image::RgbaImage, PalettizeError> {
    let bgra = bitmap.to_tight_bytes();
    let mut rgba = Vec::with_capacity(bgra.len());
    for px in bgra.chunks_exact(4) {
        rgba.extend_from_slice(&[px[2], px[1], px[0], px[3]]);
    }
    image::RgbaImage::from_raw(bitmap.width(), bitmap.height(), rgba).ok_or_else(|| {
        PalettizeError::ResourceState {
            message: "tight RGBA buffer does not match bitmap dimensions".to_string(),
        }
    })
}

fn target_dimensions(first: &Bitmap, max_size: Option<u32>) -> (u32, u32) {
    let (w, h) = (first.width(), first.height());
    match max_size {
        Some(max) if w.max(h) > max => {
            let scale = max as f64 / w.max(h) as f64;
            (
                ((w as f64 * scale).round() as u32).max(1),
                ((h as f64 * scale).round() as u32).max(1),
            )
        }
        _ => (w, h),
    }
}

/// The GIF logical screen stores each side as a `u16`; anything larger is a
/// hard error rather than a silent truncation.
fn gif_screen_size((width, height): (u32, u32)) -> Result<(u16, u16)> {
    match (u16::try_from(width), u16::try_from(height)) {
        (Ok(w), Ok(h)) => Ok((w, h)),
        _ => bail!("frame size {width}x{height} exceeds the GIF limit of 65535 per side"),
    }
}

/// The external drawing routine of this pipeline: Lanczos3 downscale through
/// the `image` crate, or a plain pass-through when no resize is requested.
fn resize_transform(image: &Bitmap, max_size: Option<u32>) -> Result<Bitmap, PalettizeError> {
    let (target_w, target_h) = target_dimensions(image, max_size);
    if (target_w, target_h) == (image.width(), image.height()) {
        return Ok(image.clone());
    }
    let resized = image::imageops::resize(
        &rgba_from_bitmap(image)?,
        target_w,
        target_h,
        FilterType::Lanczos3,
    );
    let mut bgra = Vec::with_capacity((target_w * target_h * 4) as usize);
    for px in resized.as_raw().chunks_exact(4) {
        bgra.extend_from_slice(&[px[2], px[1], px[0], px[3]]);
    }
    Bitmap::from_tight_bytes(target_w, target_h, PixelFormat::Bgra32, bgra)
}

#[cfg(test)]
mod tests {
    use super::gif_screen_size;

    #[test]
    fn screen_size_within_gif_limits_passes_through() {
        assert_eq!(gif_screen_size((640, 480)).unwrap(), (640, 480));
        assert_eq!(gif_screen_size((65535, 1)).unwrap(), (65535, 1));
    }

    #[test]
    fn oversized_screen_is_rejected_not_truncated() {
        // 70_000 truncated to u16 would be 4_464; it must error instead.
        let err = gif_screen_size((70_000, 480)).unwrap_err();
        assert!(err.to_string().contains("65535"));
        assert!(gif_screen_size((480, 70_000)).is_err());
    }
}
