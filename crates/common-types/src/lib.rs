use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Hard ceiling on palette entries for 8-bit indexed output.
pub const MAX_PALETTE_COLORS: usize = 256;

/// A 32-bit pixel packed as blue, green, red, alpha — in that byte order.
///
/// The byte view and the `u32` view must agree bit for bit; the integer form
/// exists for fast equality comparison during traversal.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PackedPixel {
    pub blue: u8,
    pub green: u8,
    pub red: u8,
    pub alpha: u8,
}

impl PackedPixel {
    pub const BYTES: usize = 4;

    /// Construct from 4 bytes in buffer order (B, G, R, A).
    #[inline]
    pub fn from_bgra_bytes(bytes: [u8; 4]) -> Self {
        Self {
            blue: bytes[0],
            green: bytes[1],
            red: bytes[2],
            alpha: bytes[3],
        }
    }

    #[inline]
    pub fn to_bgra_bytes(self) -> [u8; 4] {
        [self.blue, self.green, self.red, self.alpha]
    }

    /// Construct from channel values in the conventional R, G, B, A order.
    #[inline]
    pub fn from_rgba(red: u8, green: u8, blue: u8, alpha: u8) -> Self {
        Self {
            blue,
            green,
            red,
            alpha,
        }
    }

    /// Opaque color from R, G, B channels.
    #[inline]
    pub fn opaque(red: u8, green: u8, blue: u8) -> Self {
        Self::from_rgba(red, green, blue, 0xFF)
    }

    /// Reinterpret the four channel bytes as a single little-endian `u32`.
    #[inline]
    pub fn to_bits(self) -> u32 {
        u32::from_le_bytes(self.to_bgra_bytes())
    }

    #[inline]
    pub fn from_bits(bits: u32) -> Self {
        Self::from_bgra_bytes(bits.to_le_bytes())
    }
}

/// In-memory layout of a bitmap's pixel data.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelFormat {
    /// 4 bytes per pixel, B/G/R/A byte order. The canonical working format.
    Bgra32,
    /// 3 bytes per pixel, B/G/R byte order, no alpha channel.
    Rgb24,
    /// 1 byte per pixel, each byte an index into an attached palette.
    Indexed8,
}

impl PixelFormat {
    #[inline]
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Bgra32 => 4,
            PixelFormat::Rgb24 => 3,
            PixelFormat::Indexed8 => 1,
        }
    }
}

/// Ordered color table for an indexed image, at most 256 entries.
///
/// Index `i` in an indexed buffer refers to `entries()[i]`. Built exactly once
/// per quantization pass and attached to the destination before any index is
/// written.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Palette {
    entries: Vec<PackedPixel>,
}

impl Palette {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register one more color; fails once the 256-entry ceiling is reached.
    pub fn push(&mut self, color: PackedPixel) -> Result<u8, PalettizeError> {
        if self.entries.len() >= MAX_PALETTE_COLORS {
            return Err(PalettizeError::PaletteOverflow {
                attempted: self.entries.len() + 1,
            });
        }
        self.entries.push(color);
        Ok((self.entries.len() - 1) as u8)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[inline]
    pub fn get(&self, index: u8) -> Option<PackedPixel> {
        self.entries.get(index as usize).copied()
    }

    #[inline]
    pub fn entries(&self) -> &[PackedPixel] {
        &self.entries
    }

    /// Drop all entries but keep the allocation, so a strategy can reuse the
    /// destination's existing container when rebuilding.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Flatten to R, G, B triplets, the layout GIF color tables use.
    pub fn to_rgb_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.entries.len() * 3);
        for entry in &self.entries {
            bytes.extend_from_slice(&[entry.red, entry.green, entry.blue]);
        }
        bytes
    }
}

/// How a frame's area is treated once its display delay elapses.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DisposalHint {
    Unspecified,
    Keep,
    RestoreBackground,
    RestorePrevious,
}

impl Default for DisposalHint {
    fn default() -> Self {
        DisposalHint::Unspecified
    }
}

/// Sequence-wide repeat behavior, fixed once at encoder construction.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoopCount {
    Infinite,
    Finite(u16),
}

/// Summary of one frame-sequence run, serializable for reporting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SequenceReport {
    pub frame_count: u32,
    pub width: u32,
    pub height: u32,
    pub palette_sizes: Vec<u16>,
    pub output_size_bytes: u64,
    pub processing_time_ms: u64,
}

/// Structured error taxonomy with stable codes.
#[derive(Error, Debug)]
pub enum PalettizeError {
    // Pixel buffer errors (E_BUFFER_*)
    #[error("E_BUFFER_STATE: buffer lock state violation: {message}")]
    ResourceState { message: String },

    #[error("E_BUFFER_BOUNDS: pixel access out of bounds at ({x}, {y})")]
    PixelOutOfBounds { x: u32, y: u32 },

    // Quantization errors (E_QUANT_*)
    #[error("E_QUANT_FORMAT: source pixel format {format} cannot be widened to BGRA")]
    UnsupportedPixelFormat { format: String },

    #[error("E_QUANT_OVERFLOW: strategy attempted to register palette entry {attempted} (max 256)")]
    PaletteOverflow { attempted: usize },

    // Sequence errors (E_SEQ_*)
    #[error("E_SEQ_FRAME: processing failed at frame {frame_index}: {source}")]
    FrameProcessing {
        frame_index: usize,
        #[source]
        source: Box<PalettizeError>,
    },

    #[error("E_SEQ_ENCODE: encoder failed: {message}")]
    Encoding { message: String },

    // Registry errors (E_REGISTRY_*)
    #[error("E_REGISTRY_INIT: format registry bootstrap failed: {message}")]
    RegistryInit { message: String },
}

impl PalettizeError {
    /// Stable error code for logging and monitoring.
    pub fn code(&self) -> &'static str {
        match self {
            PalettizeError::ResourceState { .. } => "E_BUFFER_STATE",
            PalettizeError::PixelOutOfBounds { .. } => "E_BUFFER_BOUNDS",
            PalettizeError::UnsupportedPixelFormat { .. } => "E_QUANT_FORMAT",
            PalettizeError::PaletteOverflow { .. } => "E_QUANT_OVERFLOW",
            PalettizeError::FrameProcessing { .. } => "E_SEQ_FRAME",
            PalettizeError::Encoding { .. } => "E_SEQ_ENCODE",
            PalettizeError::RegistryInit { .. } => "E_REGISTRY_INIT",
        }
    }

    /// Wrap a failure with the index of the frame it occurred on.
    pub fn at_frame(self, frame_index: usize) -> Self {
        PalettizeError::FrameProcessing {
            frame_index,
            source: Box::new(self),
        }
    }
}
