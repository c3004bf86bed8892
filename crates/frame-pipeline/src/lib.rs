//! Per-frame processing for animated sequences: apply a transform, quantize,
//! and hand each frame to an encoder sink while its timing and positioning
//! metadata pass through untouched.

pub mod gif_sink;

use std::time::Instant;

use common_types::{DisposalHint, PalettizeError, SequenceReport};
use quant_core::{Bitmap, PaletteStrategy, QuantizeEngine};
use tracing::{debug, info, span, Level};

pub use gif_sink::GifSink;

/// One element of an animated sequence.
///
/// The image is replaced in place twice during processing (transformed, then
/// quantized); the surrounding metadata belongs to the encoder and is never
/// touched by the pipeline.
#[derive(Debug, Clone)]
pub struct SequenceFrame {
    pub image: Bitmap,
    /// Display delay in centiseconds.
    pub delay_cs: u16,
    pub left: u16,
    pub top: u16,
    pub disposal: DisposalHint,
}

impl SequenceFrame {
    pub fn new(image: Bitmap) -> Self {
        Self {
            image,
            delay_cs: 0,
            left: 0,
            top: 0,
            disposal: DisposalHint::default(),
        }
    }

    pub fn with_delay_cs(mut self, delay_cs: u16) -> Self {
        self.delay_cs = delay_cs;
        self
    }

    pub fn with_offset(mut self, left: u16, top: u16) -> Self {
        self.left = left;
        self.top = top;
        self
    }

    pub fn with_disposal(mut self, disposal: DisposalHint) -> Self {
        self.disposal = disposal;
        self
    }
}

/// Consumer of quantized frames. The sequence loop count is fixed at sink
/// construction, not per frame.
pub trait FrameSink {
    fn append(&mut self, frame: &SequenceFrame) -> Result<(), PalettizeError>;

    /// Finalize the underlying stream. Sinks without a terminal step keep the
    /// default.
    fn finish(self) -> Result<(), PalettizeError>
    where
        Self: Sized,
    {
        Ok(())
    }
}

/// Drives transform → quantize → encode across every frame of a sequence.
pub struct FrameSequencePipeline {
    log_every: usize,
}

impl Default for FrameSequencePipeline {
    fn default() -> Self {
        Self { log_every: 10 }
    }
}

impl FrameSequencePipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process the frames in original order.
    ///
    /// Each frame's image is replaced by `transform(&image)`, quantized with
    /// the shared engine, replaced again by the indexed result, and appended
    /// to the sink. A failure at any step aborts the whole sequence wrapped
    /// as a frame-processing error carrying the frame index; nothing appended
    /// so far is considered valid output.
    pub fn process<S, T, K>(
        &self,
        mut frames: Vec<SequenceFrame>,
        mut transform: T,
        engine: &mut QuantizeEngine<S>,
        sink: &mut K,
    ) -> Result<SequenceReport, PalettizeError>
    where
        S: PaletteStrategy,
        T: FnMut(&Bitmap) -> Result<Bitmap, PalettizeError>,
        K: FrameSink,
    {
        let span = span!(Level::INFO, "frame_sequence", frames = frames.len());
        let _guard = span.enter();
        let start = Instant::now();

        info!(frames = frames.len(), "starting frame sequence");

        let mut palette_sizes = Vec::with_capacity(frames.len());
        let mut width = 0;
        let mut height = 0;

        for (frame_index, frame) in frames.iter_mut().enumerate() {
            frame.image = transform(&frame.image).map_err(|e| e.at_frame(frame_index))?;
            frame.image = engine
                .quantize(&frame.image)
                .map_err(|e| e.at_frame(frame_index))?;

            let palette_len = frame
                .image
                .palette()
                .map(|p| p.len() as u16)
                .unwrap_or_default();
            palette_sizes.push(palette_len);
            width = frame.image.width();
            height = frame.image.height();

            sink.append(frame).map_err(|e| e.at_frame(frame_index))?;

            if frame_index % self.log_every == 0 {
                debug!(
                    frame = frame_index,
                    palette = palette_len,
                    delay_cs = frame.delay_cs,
                    "frame encoded"
                );
            }
        }

        let report = SequenceReport {
            frame_count: frames.len() as u32,
            width,
            height,
            palette_sizes,
            output_size_bytes: 0,
            processing_time_ms: start.elapsed().as_millis() as u64,
        };

        info!(
            frames = report.frame_count,
            duration_ms = report.processing_time_ms,
            "frame sequence complete"
        );
        Ok(report)
    }
}
