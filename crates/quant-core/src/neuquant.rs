use color_quant::NeuQuant;
use common_types::{PackedPixel, Palette, PalettizeError};
use tracing::debug;

use crate::strategy::PaletteStrategy;

/// NeuQuant neural-network quantizer behind the strategy contract.
///
/// The observation pass accumulates RGBA samples; `build_palette` trains the
/// network over them and `classify` maps through the trained network. The
/// sample factor trades quality for training time (1 = best, 30 = fastest).
pub struct NeuQuantStrategy {
    sample_factor: i32,
    max_colors: usize,
    samples: Vec<u8>,
    trained: Option<NeuQuant>,
}

impl NeuQuantStrategy {
    pub fn new(max_colors: usize) -> Self {
        Self {
            sample_factor: 10,
            max_colors: max_colors.clamp(2, 256),
            samples: Vec::new(),
            trained: None,
        }
    }

    pub fn with_sample_factor(mut self, sample_factor: i32) -> Self {
        self.sample_factor = sample_factor.clamp(1, 30);
        self
    }
}

impl PaletteStrategy for NeuQuantStrategy {
    fn reset(&mut self) {
        self.samples.clear();
        self.trained = None;
    }

    fn observe(&mut self, pixel: PackedPixel) -> Result<(), PalettizeError> {
        self.samples
            .extend_from_slice(&[pixel.red, pixel.green, pixel.blue, pixel.alpha]);
        Ok(())
    }

    fn classify(&mut self, pixel: PackedPixel) -> Result<u8, PalettizeError> {
        let trained = self.trained.as_ref().ok_or_else(|| PalettizeError::ResourceState {
            message: "NeuQuant classify called before build_palette".to_string(),
        })?;
        let rgba = [pixel.red, pixel.green, pixel.blue, pixel.alpha];
        Ok(trained.index_of(&rgba) as u8)
    }

    fn build_palette(&mut self, mut previous: Palette) -> Result<Palette, PalettizeError> {
        previous.clear();
        if self.samples.is_empty() {
            return Ok(previous);
        }
        let trained = NeuQuant::new(self.sample_factor, self.max_colors, &self.samples);
        for rgba in trained.color_map_rgba().chunks_exact(4) {
            previous.push(PackedPixel::from_rgba(rgba[0], rgba[1], rgba[2], rgba[3]))?;
        }
        debug!(
            samples = self.samples.len() / 4,
            palette = previous.len(),
            sample_factor = self.sample_factor,
            "NeuQuant palette trained"
        );
        self.trained = Some(trained);
        Ok(previous)
    }
}
