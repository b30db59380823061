//! Variant generation: raw image bytes + preset -> JPEG bytes.
//!
//! Pure and synchronous. Callers on an async runtime go through
//! [`crate::pool::WorkerPool`].

use image::imageops::FilterType;
use image::{DynamicImage, ExtendedColorType, GenericImageView};

use crate::error::MediaError;
use crate::preset::{FitMode, Preset, PresetTable};

/// JPEG quality used when the caller does not specify one.
pub const DEFAULT_QUALITY: u8 = 82;

/// One resized rendition of an upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Variant {
    pub preset_name: String,
    pub bytes: Vec<u8>,
}

/// Look up `preset_name` and render `bytes` into it.
pub fn generate_variant(
    presets: &PresetTable,
    bytes: &[u8],
    preset_name: &str,
    quality: u8,
) -> Result<Variant, MediaError> {
    let preset = presets.get(preset_name)?;
    Ok(Variant {
        preset_name: preset.name.clone(),
        bytes: render(bytes, preset, quality)?,
    })
}

/// Decode, resize according to `preset`, and re-encode as baseline JPEG.
///
/// A source smaller than the box in any constrained dimension is never
/// upscaled; it is only re-encoded.
pub fn render(bytes: &[u8], preset: &Preset, quality: u8) -> Result<Vec<u8>, MediaError> {
    let source = image::load_from_memory(bytes).map_err(|e| MediaError::Decode(e.to_string()))?;
    let dimensions = source.dimensions();

    let resized = if would_upscale(dimensions, preset) {
        source
    } else {
        let (width, height) = target_box(dimensions, preset);
        match preset.fit {
            FitMode::Fit => source.resize(width, height, FilterType::Lanczos3),
            FitMode::Cover => source.resize_to_fill(width, height, FilterType::Lanczos3),
        }
    };

    encode_jpeg(&resized, quality)
}

/// Target box for a source of `(width, height)`; unconstrained sides follow
/// the source.
pub fn target_box((width, height): (u32, u32), preset: &Preset) -> (u32, u32) {
    (preset.width.unwrap_or(width), preset.height.unwrap_or(height))
}

/// True when the source is smaller than the preset in any constrained side.
pub fn would_upscale((width, height): (u32, u32), preset: &Preset) -> bool {
    preset.width.is_some_and(|w| width < w) || preset.height.is_some_and(|h| height < h)
}

fn encode_jpeg(image: &DynamicImage, quality: u8) -> Result<Vec<u8>, MediaError> {
    let rgb = image.to_rgb8();
    let mut out = Vec::new();
    let mut encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut out, quality.clamp(1, 100));
    encoder
        .encode(rgb.as_raw(), rgb.width(), rgb.height(), ExtendedColorType::Rgb8)
        .map_err(|e| MediaError::Encode(e.to_string()))?;
    Ok(out)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use image::{ImageFormat, Rgb, RgbImage};
    use proptest::prelude::*;
    use std::io::Cursor;

    pub(crate) fn png(width: u32, height: u32) -> Vec<u8> {
        let img = RgbImage::from_fn(width, height, |x, y| {
            Rgb([(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8])
        });
        let mut buf = Vec::new();
        DynamicImage::ImageRgb8(img)
            .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
            .unwrap();
        buf
    }

    fn dims(jpeg: &[u8]) -> (u32, u32) {
        image::load_from_memory(jpeg).unwrap().dimensions()
    }

    fn table() -> PresetTable {
        PresetTable::new([
            Preset::new("card", Some(64), Some(40), FitMode::Cover),
            Preset::new("wide", Some(100), None, FitMode::Fit),
        ])
        .unwrap()
    }

    #[test]
    fn cover_fills_box_exactly() {
        let out = generate_variant(&table(), &png(300, 120), "card", DEFAULT_QUALITY).unwrap();
        assert_eq!(out.preset_name, "card");
        assert_eq!(dims(&out.bytes), (64, 40));
    }

    #[test]
    fn fit_keeps_aspect_ratio_with_open_height() {
        let out = generate_variant(&table(), &png(400, 200), "wide", DEFAULT_QUALITY).unwrap();
        assert_eq!(dims(&out.bytes), (100, 50));
    }

    #[test]
    fn output_is_jpeg() {
        let out = generate_variant(&table(), &png(300, 120), "card", 90).unwrap();
        assert_eq!(image::guess_format(&out.bytes).unwrap(), ImageFormat::Jpeg);
    }

    #[test]
    fn unknown_preset_and_garbage_input_fail() {
        assert_eq!(
            generate_variant(&table(), &png(10, 10), "nope", 82).unwrap_err(),
            MediaError::UnknownPreset("nope".into())
        );
        assert!(matches!(
            generate_variant(&table(), b"definitely not an image", "card", 82),
            Err(MediaError::Decode(_))
        ));
    }

    #[test]
    fn regenerating_a_variant_keeps_its_size() {
        let first = generate_variant(&table(), &png(300, 120), "card", 82).unwrap();
        let second = generate_variant(&table(), &first.bytes, "card", 82).unwrap();
        assert_eq!(dims(&first.bytes), dims(&second.bytes));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(24))]

        #[test]
        fn never_upscales_small_sources(width in 1u32..64, height in 1u32..40) {
            let table = table();
            let out = generate_variant(&table, &png(width, height), "card", 82).unwrap();
            prop_assert_eq!(dims(&out.bytes), (width, height));
        }

        #[test]
        fn open_side_never_triggers_upscale_guard(height in 1u32..2000) {
            let preset = Preset::new("w", Some(100), None, FitMode::Fit);
            prop_assert!(!would_upscale((100, height), &preset));
            prop_assert_eq!(target_box((100, height), &preset), (100, height));
        }
    }
}
