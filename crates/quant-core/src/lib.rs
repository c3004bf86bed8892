//! Two-pass color quantization core: stride-aware pixel buffers, the
//! quantization engine, and the pluggable palette strategies.

pub mod bitmap;
pub mod engine;
pub mod neuquant;
pub mod octree;
pub mod strategy;

pub use bitmap::{widen_to_bgra, Bitmap, PixelReader, PixelWriter};
pub use engine::QuantizeEngine;
pub use neuquant::NeuQuantStrategy;
pub use octree::OctreeStrategy;
pub use strategy::{ExactPalette, PaletteStrategy};
