use std::borrow::Cow;
use std::io::Write;

use common_types::{DisposalHint, LoopCount, PalettizeError, PixelFormat};
use gif::{DisposalMethod, Encoder, Repeat};
use tracing::debug;

use crate::{FrameSink, SequenceFrame};

/// GIF89a encoder behind the [`FrameSink`] contract.
///
/// The logical screen size and the loop count are fixed at construction;
/// every appended frame carries its own local color table, delay, offsets
/// and disposal method.
pub struct GifSink<W: Write> {
    encoder: Encoder<W>,
    screen_width: u16,
    screen_height: u16,
    frames_written: u32,
}

impl<W: Write> GifSink<W> {
    pub fn new(
        writer: W,
        width: u16,
        height: u16,
        loop_count: LoopCount,
    ) -> Result<Self, PalettizeError> {
        let mut encoder = Encoder::new(writer, width, height, &[]).map_err(encoding_error)?;
        let repeat = match loop_count {
            LoopCount::Infinite => Repeat::Infinite,
            LoopCount::Finite(count) => Repeat::Finite(count),
        };
        encoder.set_repeat(repeat).map_err(encoding_error)?;
        Ok(Self {
            encoder,
            screen_width: width,
            screen_height: height,
            frames_written: 0,
        })
    }

    pub fn frames_written(&self) -> u32 {
        self.frames_written
    }

    /// Write the trailer and hand the underlying writer back.
    pub fn into_writer(self) -> Result<W, PalettizeError> {
        self.encoder
            .into_inner()
            .map_err(|e| PalettizeError::Encoding {
                message: format!("failed to finalize GIF stream: {e}"),
            })
    }
}

impl<W: Write> FrameSink for GifSink<W> {
    fn append(&mut self, frame: &SequenceFrame) -> Result<(), PalettizeError> {
        if frame.image.format() != PixelFormat::Indexed8 {
            return Err(PalettizeError::Encoding {
                message: format!(
                    "GIF sink needs indexed frames, got {:?}",
                    frame.image.format()
                ),
            });
        }
        let palette = frame.image.palette().ok_or_else(|| PalettizeError::Encoding {
            message: "indexed frame has no palette attached".to_string(),
        })?;

        let width = frame.image.width() as u16;
        let height = frame.image.height() as u16;
        if frame.left as u32 + width as u32 > self.screen_width as u32
            || frame.top as u32 + height as u32 > self.screen_height as u32
        {
            return Err(PalettizeError::Encoding {
                message: format!(
                    "frame {width}x{height}+{}+{} exceeds {}x{} logical screen",
                    frame.left, frame.top, self.screen_width, self.screen_height
                ),
            });
        }

        // The encoder rejects degenerate color tables; one-entry palettes are
        // padded to two.
        let mut palette_rgb = palette.to_rgb_bytes();
        if palette_rgb.len() < 6 {
            palette_rgb.resize(6, 0);
        }

        let mut gif_frame = gif::Frame::default();
        gif_frame.width = width;
        gif_frame.height = height;
        gif_frame.left = frame.left;
        gif_frame.top = frame.top;
        gif_frame.delay = frame.delay_cs;
        gif_frame.dispose = disposal_method(frame.disposal);
        gif_frame.palette = Some(palette_rgb);
        gif_frame.buffer = Cow::Owned(frame.image.to_tight_bytes());

        self.encoder.write_frame(&gif_frame).map_err(encoding_error)?;
        self.frames_written += 1;
        debug!(
            frame = self.frames_written,
            delay_cs = frame.delay_cs,
            palette = palette.len(),
            "GIF frame written"
        );
        Ok(())
    }

    fn finish(self) -> Result<(), PalettizeError> {
        self.into_writer().map(|_| ())
    }
}

fn disposal_method(hint: DisposalHint) -> DisposalMethod {
    match hint {
        DisposalHint::Unspecified => DisposalMethod::Any,
        DisposalHint::Keep => DisposalMethod::Keep,
        DisposalHint::RestoreBackground => DisposalMethod::Background,
        DisposalHint::RestorePrevious => DisposalMethod::Previous,
    }
}

fn encoding_error(error: gif::EncodingError) -> PalettizeError {
    PalettizeError::Encoding {
        message: error.to_string(),
    }
}
