use common_types::{PackedPixel, Palette, PalettizeError, PixelFormat};
use quant_core::{
    Bitmap, ExactPalette, NeuQuantStrategy, OctreeStrategy, PaletteStrategy, QuantizeEngine,
};

fn fill_bgra(bitmap: &mut Bitmap, pixels: &[PackedPixel]) {
    let width = bitmap.width();
    let mut writer = bitmap.writer().unwrap();
    for (i, px) in pixels.iter().enumerate() {
        writer
            .set_pixel(i as u32 % width, i as u32 / width, *px)
            .unwrap();
    }
}

fn collect_indices(indexed: &Bitmap) -> Vec<u8> {
    let reader = indexed.reader().unwrap();
    let mut indices = Vec::new();
    for y in 0..indexed.height() {
        for x in 0..indexed.width() {
            indices.push(reader.index(x, y).unwrap());
        }
    }
    indices
}

/// Delegates to `ExactPalette` while counting `classify` invocations, to pin
/// down how often the engine takes the adjacency shortcut.
struct CountingExact {
    inner: ExactPalette,
    classify_calls: usize,
}

impl PaletteStrategy for CountingExact {
    fn reset(&mut self) {
        self.inner.reset();
    }

    fn observe(&mut self, pixel: PackedPixel) -> Result<(), PalettizeError> {
        self.inner.observe(pixel)
    }

    fn classify(&mut self, pixel: PackedPixel) -> Result<u8, PalettizeError> {
        self.classify_calls += 1;
        self.inner.classify(pixel)
    }

    fn build_palette(&mut self, previous: Palette) -> Result<Palette, PalettizeError> {
        self.inner.build_palette(previous)
    }
}

#[test]
fn adjacency_shortcut_changes_performance_not_output() {
    // 8x2 image made of runs of identical pixels.
    let a = PackedPixel::opaque(200, 10, 10);
    let b = PackedPixel::opaque(10, 200, 10);
    let c = PackedPixel::opaque(10, 10, 200);
    let pixels = [a, a, a, b, b, b, c, c, c, c, a, a, b, c, c, a];

    let mut source = Bitmap::new(8, 2, PixelFormat::Bgra32);
    fill_bgra(&mut source, &pixels);

    let mut engine = QuantizeEngine::new(CountingExact {
        inner: ExactPalette::new(16),
        classify_calls: 0,
    });
    let indexed = engine.quantize(&source).unwrap();

    // Naive per-pixel classification against the same first-occurrence
    // palette, never shortcutting.
    let mut naive = ExactPalette::new(16);
    for px in pixels {
        naive.observe(px).unwrap();
    }
    naive.build_palette(Palette::new()).unwrap();
    let expected: Vec<u8> = pixels.iter().map(|px| naive.classify(*px).unwrap()).collect();

    assert_eq!(collect_indices(&indexed), expected);
    // 16 pixels but only 7 run starts: the shortcut must have skipped the
    // rest.
    assert_eq!(engine.strategy().classify_calls, 7);
}

#[test]
fn padded_and_tight_layouts_produce_identical_output() {
    let pixels: Vec<PackedPixel> = (0..6)
        .map(|i| PackedPixel::opaque(i as u8 * 40, 255 - i as u8 * 40, 7))
        .collect();

    let mut tight = Bitmap::with_stride(3, 2, PixelFormat::Bgra32, 12).unwrap();
    fill_bgra(&mut tight, &pixels);

    // Same pixels behind 11 bytes of per-row padding.
    let mut padded = Bitmap::with_stride(3, 2, PixelFormat::Bgra32, 23).unwrap();
    fill_bgra(&mut padded, &pixels);

    let mut engine = QuantizeEngine::new(ExactPalette::new(16));
    let from_tight = engine.quantize(&tight).unwrap();
    let from_padded = engine.quantize(&padded).unwrap();

    assert_eq!(collect_indices(&from_tight), collect_indices(&from_padded));
    assert_eq!(from_tight.palette(), from_padded.palette());
}

#[test]
fn destination_padding_bytes_stay_zero() {
    // Width 3 at 1 byte per pixel pads each destination row out to 4 bytes.
    let pixels: Vec<PackedPixel> = (0..9)
        .map(|i| PackedPixel::opaque(i as u8, i as u8, i as u8))
        .collect();
    let mut source = Bitmap::new(3, 3, PixelFormat::Bgra32);
    fill_bgra(&mut source, &pixels);

    let mut engine = QuantizeEngine::new(ExactPalette::new(16));
    let indexed = engine.quantize(&source).unwrap();
    assert_eq!(indexed.stride_bytes(), 4);

    let raw = indexed.raw_data();
    for row in 0..3 {
        assert_eq!(raw[row * 4 + 3], 0, "padding byte touched in row {row}");
    }
}

#[test]
fn distinct_color_257_fails_the_whole_call() {
    let pixels: Vec<PackedPixel> = (0..257u32)
        .map(|i| PackedPixel::opaque((i % 256) as u8, (i / 256) as u8, 0))
        .collect();
    let mut source = Bitmap::new(257, 1, PixelFormat::Bgra32);
    fill_bgra(&mut source, &pixels);

    let mut engine = QuantizeEngine::new(ExactPalette::default());
    let err = engine.quantize(&source).unwrap_err();
    assert_eq!(err.code(), "E_QUANT_OVERFLOW");
    assert!(matches!(err, PalettizeError::PaletteOverflow { attempted: 257 }));
}

#[test]
fn octree_preserves_dimensions_and_budget() {
    let mut source = Bitmap::new(64, 32, PixelFormat::Bgra32);
    {
        let mut writer = source.writer().unwrap();
        for y in 0..32 {
            for x in 0..64 {
                writer
                    .set_pixel(x, y, PackedPixel::opaque((x * 4) as u8, (y * 8) as u8, 90))
                    .unwrap();
            }
        }
    }

    let mut engine = QuantizeEngine::new(OctreeStrategy::new(32));
    let indexed = engine.quantize(&source).unwrap();

    assert_eq!(indexed.width(), 64);
    assert_eq!(indexed.height(), 32);
    let palette = indexed.palette().unwrap();
    assert!(palette.len() <= 32);
    for index in collect_indices(&indexed) {
        assert!((index as usize) < palette.len());
    }
}

#[test]
fn neuquant_end_to_end() {
    let mut source = Bitmap::new(16, 16, PixelFormat::Bgra32);
    {
        let mut writer = source.writer().unwrap();
        for y in 0..16 {
            for x in 0..16 {
                writer
                    .set_pixel(x, y, PackedPixel::opaque((x * 16) as u8, (y * 16) as u8, 128))
                    .unwrap();
            }
        }
    }

    let mut engine = QuantizeEngine::new(NeuQuantStrategy::new(64).with_sample_factor(30));
    let indexed = engine.quantize(&source).unwrap();
    assert_eq!(indexed.width(), 16);
    assert_eq!(indexed.height(), 16);
    let palette = indexed.palette().unwrap();
    assert!(palette.len() <= 64);
    assert!(!palette.is_empty());
}

/// Single-pass strategy with a palette fixed at construction time.
struct FixedPalette {
    colors: Vec<PackedPixel>,
    observe_calls: usize,
}

impl PaletteStrategy for FixedPalette {
    fn is_two_pass(&self) -> bool {
        false
    }

    fn observe(&mut self, _pixel: PackedPixel) -> Result<(), PalettizeError> {
        self.observe_calls += 1;
        Ok(())
    }

    fn classify(&mut self, pixel: PackedPixel) -> Result<u8, PalettizeError> {
        self.colors
            .iter()
            .enumerate()
            .min_by_key(|(_, entry)| {
                let dr = pixel.red as i32 - entry.red as i32;
                let dg = pixel.green as i32 - entry.green as i32;
                let db = pixel.blue as i32 - entry.blue as i32;
                dr * dr + dg * dg + db * db
            })
            .map(|(index, _)| index as u8)
            .ok_or_else(|| PalettizeError::ResourceState {
                message: "fixed palette is empty".to_string(),
            })
    }

    fn build_palette(&mut self, mut previous: Palette) -> Result<Palette, PalettizeError> {
        previous.clear();
        for &color in &self.colors {
            previous.push(color)?;
        }
        Ok(previous)
    }
}

#[test]
fn single_pass_strategy_skips_observation_entirely() {
    let black = PackedPixel::opaque(0, 0, 0);
    let white = PackedPixel::opaque(255, 255, 255);
    let pixels = [
        PackedPixel::opaque(10, 10, 10),
        PackedPixel::opaque(240, 240, 240),
        PackedPixel::opaque(250, 250, 250),
        PackedPixel::opaque(5, 5, 5),
    ];
    let mut source = Bitmap::new(2, 2, PixelFormat::Bgra32);
    fill_bgra(&mut source, &pixels);

    let mut engine = QuantizeEngine::new(FixedPalette {
        colors: vec![black, white],
        observe_calls: 0,
    });
    let indexed = engine.quantize(&source).unwrap();

    // No first pass ran; the eagerly known palette still drives the mapping.
    assert_eq!(engine.strategy().observe_calls, 0);
    assert_eq!(indexed.palette().unwrap().entries(), &[black, white]);
    assert_eq!(collect_indices(&indexed), vec![0, 1, 1, 0]);
}

#[test]
fn boxed_strategy_works_through_the_engine() {
    let strategy: Box<dyn PaletteStrategy> = Box::new(ExactPalette::new(4));
    let mut engine = QuantizeEngine::new(strategy);

    let px = PackedPixel::opaque(12, 34, 56);
    let mut source = Bitmap::new(2, 1, PixelFormat::Bgra32);
    fill_bgra(&mut source, &[px, px]);

    let indexed = engine.quantize(&source).unwrap();
    assert_eq!(indexed.palette().unwrap().entries(), &[px]);
    assert_eq!(collect_indices(&indexed), vec![0, 0]);
}
