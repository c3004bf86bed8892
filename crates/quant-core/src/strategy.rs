use std::collections::HashMap;

use common_types::{PackedPixel, Palette, PalettizeError, MAX_PALETTE_COLORS};

/// Contract for a concrete palette-reduction algorithm.
///
/// Two-pass strategies accumulate state through [`observe`] before the
/// palette is built; single-pass strategies skip the observation pass
/// entirely. [`classify`] must be deterministic for a fixed state: the same
/// pixel always maps to the same index once the palette exists.
///
/// [`observe`]: PaletteStrategy::observe
/// [`classify`]: PaletteStrategy::classify
pub trait PaletteStrategy {
    /// Whether the engine should run the observation pass at all.
    fn is_two_pass(&self) -> bool {
        true
    }

    /// Clear any per-image state so the same instance can be threaded across
    /// the frames of a sequence.
    fn reset(&mut self) {}

    /// Observation hook, called once per source pixel during the first pass.
    fn observe(&mut self, _pixel: PackedPixel) -> Result<(), PalettizeError> {
        Ok(())
    }

    /// Map a pixel to its palette index. Only called after `build_palette`.
    fn classify(&mut self, pixel: PackedPixel) -> Result<u8, PalettizeError>;

    /// Materialize the palette from accumulated state. Receives the
    /// destination's existing palette purely so the container can be reused;
    /// the returned palette is a complete replacement.
    fn build_palette(&mut self, previous: Palette) -> Result<Palette, PalettizeError>;
}

impl<S: PaletteStrategy + ?Sized> PaletteStrategy for Box<S> {
    fn is_two_pass(&self) -> bool {
        (**self).is_two_pass()
    }

    fn reset(&mut self) {
        (**self).reset();
    }

    fn observe(&mut self, pixel: PackedPixel) -> Result<(), PalettizeError> {
        (**self).observe(pixel)
    }

    fn classify(&mut self, pixel: PackedPixel) -> Result<u8, PalettizeError> {
        (**self).classify(pixel)
    }

    fn build_palette(&mut self, previous: Palette) -> Result<Palette, PalettizeError> {
        (**self).build_palette(previous)
    }
}

/// Lossless identity mapping for sources that already fit a color budget.
///
/// Colors enter the palette in first-occurrence order. A distinct color past
/// the budget is a hard failure, never a silent merge; sources with more
/// colors than the budget belong with a reducing strategy instead.
pub struct ExactPalette {
    max_colors: usize,
    order: Vec<PackedPixel>,
    lookup: HashMap<u32, u8>,
}

impl ExactPalette {
    pub fn new(max_colors: usize) -> Self {
        Self {
            max_colors: max_colors.min(MAX_PALETTE_COLORS),
            order: Vec::new(),
            lookup: HashMap::new(),
        }
    }
}

impl Default for ExactPalette {
    fn default() -> Self {
        Self::new(MAX_PALETTE_COLORS)
    }
}

impl PaletteStrategy for ExactPalette {
    fn reset(&mut self) {
        self.order.clear();
        self.lookup.clear();
    }

    fn observe(&mut self, pixel: PackedPixel) -> Result<(), PalettizeError> {
        let bits = pixel.to_bits();
        if self.lookup.contains_key(&bits) {
            return Ok(());
        }
        if self.order.len() >= self.max_colors {
            return Err(PalettizeError::PaletteOverflow {
                attempted: self.order.len() + 1,
            });
        }
        self.lookup.insert(bits, self.order.len() as u8);
        self.order.push(pixel);
        Ok(())
    }

    fn classify(&mut self, pixel: PackedPixel) -> Result<u8, PalettizeError> {
        if let Some(&index) = self.lookup.get(&pixel.to_bits()) {
            return Ok(index);
        }
        // Unobserved color: fall back to the nearest registered entry.
        let nearest = self
            .order
            .iter()
            .enumerate()
            .min_by_key(|(_, entry)| color_distance_sq(pixel, **entry))
            .map(|(index, _)| index as u8);
        nearest.ok_or_else(|| PalettizeError::ResourceState {
            message: "classify called with no registered colors".to_string(),
        })
    }

    fn build_palette(&mut self, mut previous: Palette) -> Result<Palette, PalettizeError> {
        previous.clear();
        for &color in &self.order {
            previous.push(color)?;
        }
        Ok(previous)
    }
}

pub(crate) fn color_distance_sq(a: PackedPixel, b: PackedPixel) -> u32 {
    let dr = a.red as i32 - b.red as i32;
    let dg = a.green as i32 - b.green as i32;
    let db = a.blue as i32 - b.blue as i32;
    let da = a.alpha as i32 - b.alpha as i32;
    (dr * dr + dg * dg + db * db + da * da) as u32
}
