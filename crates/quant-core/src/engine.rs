use common_types::{PalettizeError, PixelFormat};
use tracing::{debug, span, Level};

use crate::bitmap::{widen_to_bgra, Bitmap};
use crate::strategy::PaletteStrategy;

/// Two-pass quantization engine, generic over the palette strategy.
///
/// One engine instance can be threaded across the frames of a sequence; the
/// strategy's per-image state is reset at the start of every `quantize` call.
pub struct QuantizeEngine<S: PaletteStrategy> {
    strategy: S,
}

impl<S: PaletteStrategy> QuantizeEngine<S> {
    pub fn new(strategy: S) -> Self {
        Self { strategy }
    }

    pub fn strategy(&self) -> &S {
        &self.strategy
    }

    /// Reduce a source image to an 8-bit indexed bitmap with an attached
    /// palette of at most 256 colors.
    ///
    /// Sources that are not 32-bit BGRA are first normalized through a
    /// widening copy so the traversal below sees one memory layout. Both the
    /// source read lock and the destination write lock are scoped guards,
    /// released on every exit path; on failure no partial output escapes.
    pub fn quantize(&mut self, source: &Bitmap) -> Result<Bitmap, PalettizeError> {
        let span = span!(
            Level::DEBUG,
            "quantize",
            width = source.width(),
            height = source.height()
        );
        let _guard = span.enter();

        let normalized;
        let source = match source.format() {
            PixelFormat::Bgra32 => source,
            _ => {
                normalized = widen_to_bgra(source)?;
                &normalized
            }
        };

        let width = source.width();
        let height = source.height();
        let mut dest = Bitmap::new(width, height, PixelFormat::Indexed8);

        self.strategy.reset();
        let reader = source.reader()?;

        // First pass: observation only, no output pixels. Row-major, with the
        // row offset advanced by the source stride so alignment padding is
        // never decoded as pixel data.
        if self.strategy.is_two_pass() {
            for y in 0..height {
                for x in 0..width {
                    self.strategy.observe(reader.pixel(x, y)?)?;
                }
            }
            debug!(pixels = width as u64 * height as u64, "observation pass complete");
        }

        // The palette must exist on the destination before any index is
        // written.
        let palette = self.strategy.build_palette(dest.take_palette())?;
        debug!(palette = palette.len(), "palette attached");
        dest.set_palette(palette);

        {
            let mut writer = dest.writer()?;
            let mut previous: Option<(u32, u8)> = None;
            for y in 0..height {
                for x in 0..width {
                    let pixel = reader.pixel(x, y)?;
                    let bits = pixel.to_bits();
                    let index = match previous {
                        // A pixel identical to its immediate predecessor
                        // reuses the cached index; the palette is fixed, so
                        // the mapping is the same for both.
                        Some((prev_bits, prev_index)) if prev_bits == bits => prev_index,
                        _ => {
                            let index = self.strategy.classify(pixel)?;
                            previous = Some((bits, index));
                            index
                        }
                    };
                    writer.set_index(x, y, index)?;
                }
            }
        }

        Ok(dest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::ExactPalette;
    use common_types::PackedPixel;

    fn bgra_bitmap(width: u32, height: u32, pixels: &[PackedPixel]) -> Bitmap {
        let mut bitmap = Bitmap::new(width, height, PixelFormat::Bgra32);
        {
            let mut writer = bitmap.writer().unwrap();
            for (i, px) in pixels.iter().enumerate() {
                let x = i as u32 % width;
                let y = i as u32 / width;
                writer.set_pixel(x, y, *px).unwrap();
            }
        }
        bitmap
    }

    #[test]
    fn two_by_two_identity_scenario() {
        let red = PackedPixel::opaque(255, 0, 0);
        let blue = PackedPixel::opaque(0, 0, 255);
        let green = PackedPixel::opaque(0, 255, 0);
        let source = bgra_bitmap(2, 2, &[red, red, blue, green]);

        let mut engine = QuantizeEngine::new(ExactPalette::new(4));
        let indexed = engine.quantize(&source).unwrap();

        assert_eq!(indexed.width(), 2);
        assert_eq!(indexed.height(), 2);
        assert_eq!(indexed.format(), PixelFormat::Indexed8);

        let palette = indexed.palette().unwrap();
        assert_eq!(palette.entries(), &[red, blue, green]);

        let reader = indexed.reader().unwrap();
        let indices = [
            reader.index(0, 0).unwrap(),
            reader.index(1, 0).unwrap(),
            reader.index(0, 1).unwrap(),
            reader.index(1, 1).unwrap(),
        ];
        assert_eq!(indices, [0, 0, 1, 2]);
    }

    #[test]
    fn source_lock_released_after_quantize() {
        let source = bgra_bitmap(1, 1, &[PackedPixel::opaque(9, 9, 9)]);
        let mut engine = QuantizeEngine::new(ExactPalette::new(4));
        engine.quantize(&source).unwrap();
        assert!(!source.is_locked());
        // A second run over the same source must not hit a stale lock.
        engine.quantize(&source).unwrap();
    }

    #[test]
    fn overflow_aborts_without_partial_output() {
        let source = bgra_bitmap(
            3,
            1,
            &[
                PackedPixel::opaque(1, 0, 0),
                PackedPixel::opaque(2, 0, 0),
                PackedPixel::opaque(3, 0, 0),
            ],
        );
        let mut engine = QuantizeEngine::new(ExactPalette::new(2));
        let err = engine.quantize(&source).unwrap_err();
        assert!(matches!(err, PalettizeError::PaletteOverflow { attempted: 3 }));
        assert!(!source.is_locked());
    }

    #[test]
    fn rgb24_source_is_normalized() {
        let mut source = Bitmap::new(2, 1, PixelFormat::Rgb24);
        {
            let mut writer = source.writer().unwrap();
            writer.set_pixel(0, 0, PackedPixel::opaque(10, 20, 30)).unwrap();
            writer.set_pixel(1, 0, PackedPixel::opaque(10, 20, 30)).unwrap();
        }
        let mut engine = QuantizeEngine::new(ExactPalette::new(4));
        let indexed = engine.quantize(&source).unwrap();
        assert_eq!(indexed.palette().unwrap().len(), 1);
        let reader = indexed.reader().unwrap();
        assert_eq!(reader.index(0, 0).unwrap(), 0);
        assert_eq!(reader.index(1, 0).unwrap(), 0);
    }
}
