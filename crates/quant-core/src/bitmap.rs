use std::cell::Cell;

use common_types::{PackedPixel, Palette, PalettizeError, PixelFormat};
use tracing::debug;

/// Rows are padded out to this boundary when a bitmap computes its own stride.
const ROW_ALIGN: usize = 4;

/// A stride-aware pixel buffer with an explicit lock discipline.
///
/// Every pixel lives at `row * stride_bytes + col * bytes_per_pixel`; the
/// stride may exceed `width * bytes_per_pixel` because of row alignment
/// padding, and accessors never touch the padding bytes. Pixel data can only
/// be read or written through a [`PixelReader`] or [`PixelWriter`] guard,
/// which acquires the lock on construction and releases it on every exit
/// path when dropped.
#[derive(Debug)]
pub struct Bitmap {
    data: Vec<u8>,
    width: u32,
    height: u32,
    stride_bytes: usize,
    format: PixelFormat,
    palette: Option<Palette>,
    locked: Cell<bool>,
}

impl Clone for Bitmap {
    fn clone(&self) -> Self {
        // A clone is a fresh, unlocked buffer regardless of the source state.
        Self {
            data: self.data.clone(),
            width: self.width,
            height: self.height,
            stride_bytes: self.stride_bytes,
            format: self.format,
            palette: self.palette.clone(),
            locked: Cell::new(false),
        }
    }
}

impl Bitmap {
    /// Allocate a zeroed bitmap with rows aligned to a 4-byte boundary.
    pub fn new(width: u32, height: u32, format: PixelFormat) -> Self {
        let row_bytes = width as usize * format.bytes_per_pixel();
        let stride_bytes = (row_bytes + ROW_ALIGN - 1) / ROW_ALIGN * ROW_ALIGN;
        Self {
            data: vec![0; stride_bytes * height as usize],
            width,
            height,
            stride_bytes,
            format,
            palette: None,
            locked: Cell::new(false),
        }
    }

    /// Allocate a zeroed bitmap with an explicit stride, for layouts whose
    /// padding differs from the default alignment.
    pub fn with_stride(
        width: u32,
        height: u32,
        format: PixelFormat,
        stride_bytes: usize,
    ) -> Result<Self, PalettizeError> {
        let row_bytes = width as usize * format.bytes_per_pixel();
        if stride_bytes < row_bytes {
            return Err(PalettizeError::ResourceState {
                message: format!(
                    "stride {stride_bytes} is smaller than row width {row_bytes}"
                ),
            });
        }
        Ok(Self {
            data: vec![0; stride_bytes * height as usize],
            width,
            height,
            stride_bytes,
            format,
            palette: None,
            locked: Cell::new(false),
        })
    }

    /// Wrap tightly packed pixel bytes (no row padding).
    pub fn from_tight_bytes(
        width: u32,
        height: u32,
        format: PixelFormat,
        data: Vec<u8>,
    ) -> Result<Self, PalettizeError> {
        let row_bytes = width as usize * format.bytes_per_pixel();
        let expected = row_bytes * height as usize;
        if data.len() != expected {
            return Err(PalettizeError::ResourceState {
                message: format!(
                    "buffer holds {} bytes, tight {width}x{height} layout needs {expected}",
                    data.len()
                ),
            });
        }
        Ok(Self {
            data,
            width,
            height,
            stride_bytes: row_bytes,
            format,
            palette: None,
            locked: Cell::new(false),
        })
    }

    #[inline]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.height
    }

    #[inline]
    pub fn stride_bytes(&self) -> usize {
        self.stride_bytes
    }

    #[inline]
    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn palette(&self) -> Option<&Palette> {
        self.palette.as_ref()
    }

    pub fn set_palette(&mut self, palette: Palette) {
        self.palette = Some(palette);
    }

    /// Detach the current palette, leaving an empty container behind for the
    /// strategy that rebuilds it.
    pub fn take_palette(&mut self) -> Palette {
        self.palette.take().unwrap_or_default()
    }

    /// Raw backing bytes, padding included. Read-only; pixel access goes
    /// through the guards.
    pub fn raw_data(&self) -> &[u8] {
        &self.data
    }

    /// Copy out the pixel rows without the stride padding.
    pub fn to_tight_bytes(&self) -> Vec<u8> {
        let row_bytes = self.width as usize * self.format.bytes_per_pixel();
        if self.stride_bytes == row_bytes {
            return self.data.clone();
        }
        let mut tight = Vec::with_capacity(row_bytes * self.height as usize);
        for row in 0..self.height as usize {
            let start = row * self.stride_bytes;
            tight.extend_from_slice(&self.data[start..start + row_bytes]);
        }
        tight
    }

    /// Mark the backing memory as locked. Fails if a lock is already held.
    pub fn lock(&self) -> Result<(), PalettizeError> {
        if self.locked.get() {
            return Err(PalettizeError::ResourceState {
                message: "bitmap is already locked".to_string(),
            });
        }
        self.locked.set(true);
        Ok(())
    }

    /// Release the lock. Fails if the bitmap is not currently locked.
    pub fn unlock(&self) -> Result<(), PalettizeError> {
        if !self.locked.get() {
            return Err(PalettizeError::ResourceState {
                message: "bitmap is not locked".to_string(),
            });
        }
        self.locked.set(false);
        Ok(())
    }

    #[inline]
    pub fn is_locked(&self) -> bool {
        self.locked.get()
    }

    /// Acquire a scoped read view. The lock is released when the guard drops.
    pub fn reader(&self) -> Result<PixelReader<'_>, PalettizeError> {
        self.lock()?;
        Ok(PixelReader { bitmap: self })
    }

    /// Acquire a scoped write view. The lock is released when the guard drops.
    pub fn writer(&mut self) -> Result<PixelWriter<'_>, PalettizeError> {
        self.lock()?;
        Ok(PixelWriter { bitmap: self })
    }

    #[inline]
    fn offset(&self, x: u32, y: u32) -> Result<usize, PalettizeError> {
        if x >= self.width || y >= self.height {
            return Err(PalettizeError::PixelOutOfBounds { x, y });
        }
        Ok(y as usize * self.stride_bytes + x as usize * self.format.bytes_per_pixel())
    }
}

/// Scoped read-only view over a locked bitmap.
pub struct PixelReader<'a> {
    bitmap: &'a Bitmap,
}

impl PixelReader<'_> {
    /// Decode the pixel at (x, y) to its packed BGRA form, regardless of the
    /// underlying format. Indexed sources resolve through their palette.
    pub fn pixel(&self, x: u32, y: u32) -> Result<PackedPixel, PalettizeError> {
        let offset = self.bitmap.offset(x, y)?;
        let data = &self.bitmap.data;
        match self.bitmap.format {
            PixelFormat::Bgra32 => Ok(PackedPixel::from_bgra_bytes([
                data[offset],
                data[offset + 1],
                data[offset + 2],
                data[offset + 3],
            ])),
            PixelFormat::Rgb24 => Ok(PackedPixel {
                blue: data[offset],
                green: data[offset + 1],
                red: data[offset + 2],
                alpha: 0xFF,
            }),
            PixelFormat::Indexed8 => {
                let palette = self.bitmap.palette.as_ref().ok_or_else(|| {
                    PalettizeError::UnsupportedPixelFormat {
                        format: "Indexed8 without an attached palette".to_string(),
                    }
                })?;
                palette
                    .get(data[offset])
                    .ok_or(PalettizeError::PixelOutOfBounds { x, y })
            }
        }
    }

    /// Read the raw palette index at (x, y). Only valid for indexed bitmaps.
    pub fn index(&self, x: u32, y: u32) -> Result<u8, PalettizeError> {
        if self.bitmap.format != PixelFormat::Indexed8 {
            return Err(PalettizeError::ResourceState {
                message: format!("index read on a {:?} bitmap", self.bitmap.format),
            });
        }
        let offset = self.bitmap.offset(x, y)?;
        Ok(self.bitmap.data[offset])
    }
}

impl Drop for PixelReader<'_> {
    fn drop(&mut self) {
        self.bitmap.locked.set(false);
    }
}

/// Scoped write view over a locked bitmap.
pub struct PixelWriter<'a> {
    bitmap: &'a mut Bitmap,
}

impl PixelWriter<'_> {
    /// Write a whole pixel at (x, y). Only valid for direct-color bitmaps.
    pub fn set_pixel(&mut self, x: u32, y: u32, pixel: PackedPixel) -> Result<(), PalettizeError> {
        let offset = self.bitmap.offset(x, y)?;
        match self.bitmap.format {
            PixelFormat::Bgra32 => {
                self.bitmap.data[offset..offset + 4].copy_from_slice(&pixel.to_bgra_bytes());
                Ok(())
            }
            PixelFormat::Rgb24 => {
                self.bitmap.data[offset] = pixel.blue;
                self.bitmap.data[offset + 1] = pixel.green;
                self.bitmap.data[offset + 2] = pixel.red;
                Ok(())
            }
            PixelFormat::Indexed8 => Err(PalettizeError::ResourceState {
                message: "direct pixel write on an indexed bitmap".to_string(),
            }),
        }
    }

    /// Write a 1-byte palette index at (x, y). Only valid for indexed bitmaps.
    pub fn set_index(&mut self, x: u32, y: u32, index: u8) -> Result<(), PalettizeError> {
        if self.bitmap.format != PixelFormat::Indexed8 {
            return Err(PalettizeError::ResourceState {
                message: format!("index write on a {:?} bitmap", self.bitmap.format),
            });
        }
        let offset = self.bitmap.offset(x, y)?;
        self.bitmap.data[offset] = index;
        Ok(())
    }
}

impl Drop for PixelWriter<'_> {
    fn drop(&mut self) {
        self.bitmap.locked.set(false);
    }
}

/// Normalize a source to BGRA by copying it pixel-for-pixel onto a freshly
/// allocated 32-bit canvas of identical dimensions.
pub fn widen_to_bgra(source: &Bitmap) -> Result<Bitmap, PalettizeError> {
    match source.format() {
        PixelFormat::Bgra32 => Ok(source.clone()),
        PixelFormat::Rgb24 | PixelFormat::Indexed8 => {
            debug!(
                from = ?source.format(),
                width = source.width(),
                height = source.height(),
                "widening source to BGRA"
            );
            let mut canvas = Bitmap::new(source.width(), source.height(), PixelFormat::Bgra32);
            let reader = source.reader()?;
            let mut writer = canvas.writer()?;
            for y in 0..source.height() {
                for x in 0..source.width() {
                    writer.set_pixel(x, y, reader.pixel(x, y)?)?;
                }
            }
            drop(writer);
            Ok(canvas)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stride_is_aligned_to_four_bytes() {
        let bmp = Bitmap::new(3, 2, PixelFormat::Rgb24);
        // 3 * 3 = 9 bytes per row, padded to 12
        assert_eq!(bmp.stride_bytes(), 12);
        assert_eq!(bmp.raw_data().len(), 24);
    }

    #[test]
    fn explicit_stride_must_cover_row() {
        let err = Bitmap::with_stride(4, 1, PixelFormat::Bgra32, 15).unwrap_err();
        assert_eq!(err.code(), "E_BUFFER_STATE");
        assert!(Bitmap::with_stride(4, 1, PixelFormat::Bgra32, 20).is_ok());
    }

    #[test]
    fn tight_bytes_rejects_wrong_length() {
        let err =
            Bitmap::from_tight_bytes(2, 2, PixelFormat::Bgra32, vec![0; 15]).unwrap_err();
        assert_eq!(err.code(), "E_BUFFER_STATE");
    }

    #[test]
    fn double_unlock_fails() {
        let bmp = Bitmap::new(1, 1, PixelFormat::Bgra32);
        bmp.lock().unwrap();
        bmp.unlock().unwrap();
        let err = bmp.unlock().unwrap_err();
        assert!(matches!(err, PalettizeError::ResourceState { .. }));
        assert_eq!(err.code(), "E_BUFFER_STATE");
    }

    #[test]
    fn double_lock_fails() {
        let bmp = Bitmap::new(1, 1, PixelFormat::Bgra32);
        let _reader = bmp.reader().unwrap();
        assert!(bmp.lock().is_err());
    }

    #[test]
    fn guard_drop_releases_lock() {
        let bmp = Bitmap::new(1, 1, PixelFormat::Bgra32);
        {
            let _reader = bmp.reader().unwrap();
            assert!(bmp.is_locked());
        }
        assert!(!bmp.is_locked());
        assert!(bmp.reader().is_ok());
    }

    #[test]
    fn pixel_round_trip_with_padded_stride() {
        let mut bmp = Bitmap::with_stride(2, 2, PixelFormat::Bgra32, 13).unwrap();
        let px = PackedPixel::from_rgba(1, 2, 3, 4);
        {
            let mut writer = bmp.writer().unwrap();
            writer.set_pixel(1, 1, px).unwrap();
        }
        let reader = bmp.reader().unwrap();
        assert_eq!(reader.pixel(1, 1).unwrap(), px);
        assert_eq!(reader.pixel(0, 0).unwrap(), PackedPixel::from_rgba(0, 0, 0, 0));
    }

    #[test]
    fn out_of_bounds_access_fails() {
        let bmp = Bitmap::new(2, 2, PixelFormat::Bgra32);
        let reader = bmp.reader().unwrap();
        let err = reader.pixel(2, 0).unwrap_err();
        assert!(matches!(err, PalettizeError::PixelOutOfBounds { x: 2, y: 0 }));
        assert!(reader.pixel(0, 2).is_err());
    }

    #[test]
    fn widen_rgb24_gains_opaque_alpha() {
        let mut src = Bitmap::new(2, 1, PixelFormat::Rgb24);
        {
            let mut writer = src.writer().unwrap();
            writer.set_pixel(0, 0, PackedPixel::opaque(10, 20, 30)).unwrap();
            writer.set_pixel(1, 0, PackedPixel::opaque(40, 50, 60)).unwrap();
        }
        let widened = widen_to_bgra(&src).unwrap();
        assert_eq!(widened.format(), PixelFormat::Bgra32);
        let reader = widened.reader().unwrap();
        assert_eq!(reader.pixel(0, 0).unwrap(), PackedPixel::opaque(10, 20, 30));
        assert_eq!(reader.pixel(1, 0).unwrap().alpha, 0xFF);
    }

    #[test]
    fn widen_indexed_resolves_through_palette() {
        let mut palette = Palette::new();
        palette.push(PackedPixel::opaque(255, 0, 0)).unwrap();
        palette.push(PackedPixel::opaque(0, 0, 255)).unwrap();

        let mut src = Bitmap::new(2, 1, PixelFormat::Indexed8);
        src.set_palette(palette);
        {
            let mut writer = src.writer().unwrap();
            writer.set_index(0, 0, 0).unwrap();
            writer.set_index(1, 0, 1).unwrap();
        }
        let widened = widen_to_bgra(&src).unwrap();
        let reader = widened.reader().unwrap();
        assert_eq!(reader.pixel(0, 0).unwrap(), PackedPixel::opaque(255, 0, 0));
        assert_eq!(reader.pixel(1, 0).unwrap(), PackedPixel::opaque(0, 0, 255));
    }

    #[test]
    fn widen_indexed_without_palette_fails() {
        let src = Bitmap::new(1, 1, PixelFormat::Indexed8);
        let err = widen_to_bgra(&src).unwrap_err();
        assert_eq!(err.code(), "E_QUANT_FORMAT");
    }
}
