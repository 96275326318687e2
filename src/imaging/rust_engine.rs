//! Pure Rust engine on top of the `image` crate ecosystem.
//!
//! ## Crate mapping
//!
//! | Operation | Crate / function |
//! |---|---|
//! | Decode (JPEG, PNG, GIF, BMP, TIFF, WebP) | `image::ImageReader` with format sniffing |
//! | Crop | `DynamicImage::crop_imm` |
//! | Resize / thumbnail | `DynamicImage::resize_exact` (Lanczos3 unless a filter is given) |
//! | Fit / frame / watermark | `image::imageops::overlay` onto an RGBA canvas |
//! | Text | `imageproc::drawing::draw_text_mut` + `ab_glyph` fonts, rotated with `rotate_about_center` |
//! | Encode | `JpegEncoder` (quality), `PngEncoder` (compression), lossless `WebPEncoder`, `write_to` for the rest |

use super::calculations::{
    MAX_CANVAS_BYTES, canvas_fits, center_crop_origin, crop_fits, fit_offset, frame_dimensions,
    outbound_scaled_dimensions, thumbnail_dimensions,
};
use super::engine::{EngineError, ImageEngine, ImageHandle};
use super::params::{
    Color, FontOptions, OutputFormat, PngCompression, Point, ResizeFilter, SaveOptions, Size,
    ThumbnailMode,
};
use ab_glyph::{FontVec, PxScale};
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{CompressionType, FilterType as PngFilter, PngEncoder};
use image::codecs::webp::WebPEncoder;
use image::imageops::{self, FilterType};
use image::{DynamicImage, ImageFormat, ImageReader, Rgba, RgbaImage};
use imageproc::drawing::{draw_text_mut, text_size};
use imageproc::geometric_transformations::{Interpolation, rotate_about_center};
use std::io::Cursor;
use std::path::Path;

/// JPEG quality when neither the config nor the preset sets one.
const DEFAULT_JPEG_QUALITY: u8 = 90;

/// Engine backed by the `image` and `imageproc` crates.
///
/// See the [module docs](self) for the crate-to-operation mapping.
pub struct RustEngine;

impl RustEngine {
    /// Name used in the `engines` config list.
    pub const NAME: &'static str = "image";

    pub fn new() -> Self {
        Self
    }

    /// Whether at least one decoder is compiled in.
    pub fn is_available() -> bool {
        [ImageFormat::Jpeg, ImageFormat::Png, ImageFormat::WebP]
            .iter()
            .any(|f| f.reading_enabled())
    }
}

impl Default for RustEngine {
    fn default() -> Self {
        Self::new()
    }
}

fn non_negative(start: Point) -> Result<(u32, u32), EngineError> {
    let coord = |v: i64| u32::try_from(v).ok();
    match (coord(start.x), coord(start.y)) {
        (Some(x), Some(y)) => Ok((x, y)),
        _ => Err(EngineError::InvalidArgument(format!(
            "crop start must be non-negative, got ({}, {})",
            start.x, start.y
        ))),
    }
}

fn check_canvas(operation: &str, (width, height): (u32, u32)) -> Result<(), EngineError> {
    if canvas_fits((width, height)) {
        Ok(())
    } else {
        Err(EngineError::InvalidArgument(format!(
            "{operation}: a {width}x{height} canvas exceeds {MAX_CANVAS_BYTES} bytes"
        )))
    }
}

fn load_font(path: &Path) -> Result<FontVec, EngineError> {
    let data = std::fs::read(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => EngineError::NotFound(path.to_path_buf()),
        _ => EngineError::Io(e),
    })?;
    FontVec::try_from_vec(data)
        .map_err(|e| EngineError::Font(format!("{}: {}", path.display(), e)))
}

impl ImageEngine for RustEngine {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn open(&self, path: &Path) -> Result<ImageHandle, EngineError> {
        if !path.is_file() {
            return Err(EngineError::NotFound(path.to_path_buf()));
        }
        let image = ImageReader::open(path)?
            .with_guessed_format()?
            .decode()
            .map_err(|e| EngineError::Decode {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;
        Ok(ImageHandle::new(image))
    }

    fn crop(&self, image: ImageHandle, size: Size, start: Point) -> Result<ImageHandle, EngineError> {
        let (x, y) = non_negative(start)?;
        let bounds = image.dimensions();
        if !crop_fits(bounds, (x, y), size.as_tuple()) {
            return Err(EngineError::InvalidArgument(format!(
                "crop {size} at ({x}, {y}) exceeds the {}x{} image",
                bounds.0, bounds.1
            )));
        }
        let cropped = image.as_image().crop_imm(x, y, size.width, size.height);
        Ok(ImageHandle::new(cropped))
    }

    fn resize(
        &self,
        image: ImageHandle,
        size: Size,
        filter: ResizeFilter,
    ) -> Result<ImageHandle, EngineError> {
        check_canvas("resize", size.as_tuple())?;
        let resized = image
            .as_image()
            .resize_exact(size.width, size.height, filter.filter_type());
        Ok(ImageHandle::new(resized))
    }

    fn thumbnail(
        &self,
        image: ImageHandle,
        size: Size,
        mode: ThumbnailMode,
    ) -> Result<ImageHandle, EngineError> {
        let source = image.dimensions();
        let target = thumbnail_dimensions(source, size.as_tuple(), mode);
        let img = image.into_image();

        let scaled_to = match mode {
            ThumbnailMode::Inset => target,
            ThumbnailMode::Outbound => outbound_scaled_dimensions(source, size.as_tuple()),
        };
        let scaled = if scaled_to == source {
            img
        } else {
            img.resize_exact(scaled_to.0, scaled_to.1, FilterType::Lanczos3)
        };

        let thumb = if scaled_to == target {
            scaled
        } else {
            let (x, y) = center_crop_origin(scaled_to, target);
            scaled.crop_imm(x, y, target.0, target.1)
        };
        Ok(ImageHandle::new(thumb))
    }

    fn fit(&self, image: ImageHandle, size: Size, mode: ThumbnailMode) -> Result<ImageHandle, EngineError> {
        check_canvas("fit", size.as_tuple())?;
        let thumb = self.thumbnail(image, size, mode)?;
        let (x, y) = fit_offset(size.as_tuple(), thumb.dimensions());

        let mut canvas = RgbaImage::from_pixel(size.width, size.height, Color::WHITE.to_rgba());
        imageops::overlay(
            &mut canvas,
            &thumb.into_image().into_rgba8(),
            i64::from(x),
            i64::from(y),
        );
        Ok(ImageHandle::new(DynamicImage::ImageRgba8(canvas)))
    }

    fn watermark(
        &self,
        image: ImageHandle,
        watermark: &Path,
        start: Point,
    ) -> Result<ImageHandle, EngineError> {
        let mark = self.open(watermark)?.into_image().into_rgba8();
        let mut base = image.into_image().into_rgba8();
        imageops::overlay(&mut base, &mark, start.x, start.y);
        Ok(ImageHandle::new(DynamicImage::ImageRgba8(base)))
    }

    fn text(
        &self,
        image: ImageHandle,
        text: &str,
        font: &Path,
        start: Point,
        options: &FontOptions,
    ) -> Result<ImageHandle, EngineError> {
        if !options.size.is_finite() || !options.angle.is_finite() {
            return Err(EngineError::InvalidArgument(format!(
                "text: font size {} and angle {} must be finite",
                options.size, options.angle
            )));
        }
        let face = load_font(font)?;
        let scale = PxScale::from(options.size);
        let color = options.color.to_rgba();
        // Glyphs are rasterized into buffers as large as their bounds.
        let (w, h) = text_size(scale, &face, text);
        check_canvas("text", (w, h))?;
        let mut canvas = image.into_image().into_rgba8();

        if options.angle == 0.0 {
            let origin = |v: i64| {
                i32::try_from(v).map_err(|_| {
                    EngineError::InvalidArgument(format!("text: start {v} is out of range"))
                })
            };
            draw_text_mut(
                &mut canvas,
                color,
                origin(start.x)?,
                origin(start.y)?,
                scale,
                &face,
                text,
            );
            return Ok(ImageHandle::new(DynamicImage::ImageRgba8(canvas)));
        }

        // Render onto a transparent square big enough for any rotation, turn
        // it about the text's center, then lay it over the canvas so the
        // unrotated text would start at `start`.
        let side = ((w as f64).hypot(h as f64).ceil() as u32).max(1);
        check_canvas("text", (side, side))?;
        let pad = ((side - w.min(side)) / 2, (side - h.min(side)) / 2);
        let mut layer = RgbaImage::new(side, side);
        draw_text_mut(&mut layer, color, pad.0 as i32, pad.1 as i32, scale, &face, text);
        let rotated = rotate_about_center(
            &layer,
            -options.angle.to_radians(),
            Interpolation::Bilinear,
            Rgba([0, 0, 0, 0]),
        );
        imageops::overlay(
            &mut canvas,
            &rotated,
            start.x.saturating_sub(i64::from(pad.0)),
            start.y.saturating_sub(i64::from(pad.1)),
        );
        Ok(ImageHandle::new(DynamicImage::ImageRgba8(canvas)))
    }

    fn frame(&self, image: ImageHandle, margin: u32, color: Color) -> Result<ImageHandle, EngineError> {
        let (width, height) = frame_dimensions(image.dimensions(), margin).ok_or_else(|| {
            EngineError::InvalidArgument(format!("frame margin {margin} is too large"))
        })?;
        check_canvas("frame", (width, height))?;
        let mut canvas = RgbaImage::from_pixel(width, height, color.to_rgba());
        imageops::overlay(
            &mut canvas,
            &image.into_image().into_rgba8(),
            i64::from(margin),
            i64::from(margin),
        );
        Ok(ImageHandle::new(DynamicImage::ImageRgba8(canvas)))
    }

    fn encode(
        &self,
        image: &ImageHandle,
        format: OutputFormat,
        options: &SaveOptions,
    ) -> Result<Vec<u8>, EngineError> {
        let img = image.as_image();
        let mut buf = Vec::new();
        let result = match format {
            OutputFormat::Jpeg => {
                // JPEG has no alpha channel.
                let quality = options.quality.unwrap_or(DEFAULT_JPEG_QUALITY);
                DynamicImage::ImageRgb8(img.to_rgb8())
                    .write_with_encoder(JpegEncoder::new_with_quality(&mut buf, quality))
            }
            OutputFormat::Png => {
                let compression = match options.png_compression.unwrap_or(PngCompression::Default) {
                    PngCompression::Default => CompressionType::Default,
                    PngCompression::Fast => CompressionType::Fast,
                    PngCompression::Best => CompressionType::Best,
                };
                img.write_with_encoder(PngEncoder::new_with_quality(
                    &mut buf,
                    compression,
                    PngFilter::Adaptive,
                ))
            }
            OutputFormat::WebP => DynamicImage::ImageRgba8(img.to_rgba8())
                .write_with_encoder(WebPEncoder::new_lossless(&mut buf)),
            OutputFormat::Gif | OutputFormat::Bmp | OutputFormat::Tiff => {
                let image_format = match format {
                    OutputFormat::Gif => ImageFormat::Gif,
                    OutputFormat::Bmp => ImageFormat::Bmp,
                    _ => ImageFormat::Tiff,
                };
                let mut cursor = Cursor::new(Vec::new());
                let written =
                    DynamicImage::ImageRgba8(img.to_rgba8()).write_to(&mut cursor, image_format);
                buf = cursor.into_inner();
                written
            }
        };
        result.map_err(|e| EngineError::Encode(format!("{format:?}: {e}")))?;
        Ok(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{write_test_jpeg, write_test_png};
    use image::{GenericImageView, RgbImage};

    fn size(w: i64, h: i64) -> Size {
        Size::new(w, h).unwrap()
    }

    fn fixture_font() -> std::path::PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR")).join("fixtures/fonts/DejaVuSansMono.ttf")
    }

    /// Bounding box (left, top, right, bottom) of pixels brighter than mid-gray.
    fn lit_bounds(image: &ImageHandle) -> Option<(u32, u32, u32, u32)> {
        let img = image.as_image();
        let lit: Vec<(u32, u32)> = img
            .pixels()
            .filter(|(_, _, p)| p.0[0] > 128)
            .map(|(x, y, _)| (x, y))
            .collect();
        let left = lit.iter().map(|p| p.0).min()?;
        let right = lit.iter().map(|p| p.0).max()?;
        let top = lit.iter().map(|p| p.1).min()?;
        let bottom = lit.iter().map(|p| p.1).max()?;
        Some((left, top, right, bottom))
    }

    fn solid(width: u32, height: u32, rgb: [u8; 3]) -> ImageHandle {
        ImageHandle::new(DynamicImage::ImageRgb8(RgbImage::from_pixel(
            width,
            height,
            image::Rgb(rgb),
        )))
    }

    #[test]
    fn engine_is_available() {
        assert!(RustEngine::is_available());
        assert_eq!(RustEngine::new().name(), "image");
    }

    #[test]
    fn open_synthetic_jpeg() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("a.jpg");
        write_test_jpeg(&path, 200, 150);

        let image = RustEngine::new().open(&path).unwrap();
        assert_eq!(image.dimensions(), (200, 150));
    }

    #[test]
    fn open_missing_is_not_found() {
        let result = RustEngine::new().open(Path::new("/nonexistent/image.jpg"));
        assert!(matches!(result, Err(EngineError::NotFound(_))));
    }

    #[test]
    fn open_garbage_is_decode_error() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("broken.jpg");
        std::fs::write(&path, b"definitely not an image").unwrap();

        let result = RustEngine::new().open(&path);
        assert!(matches!(result, Err(EngineError::Decode { .. })));
    }

    #[test]
    fn crop_takes_region() {
        let engine = RustEngine::new();
        let image = ImageHandle::new(DynamicImage::ImageRgb8(RgbImage::from_fn(10, 10, |x, y| {
            image::Rgb([x as u8, y as u8, 0])
        })));
        let cropped = engine.crop(image, size(4, 3), Point::new(2, 5)).unwrap();
        assert_eq!(cropped.dimensions(), (4, 3));
        assert_eq!(cropped.as_image().get_pixel(0, 0).0, [2, 5, 0, 255]);
    }

    #[test]
    fn crop_outside_image_errors() {
        let engine = RustEngine::new();
        let result = engine.crop(solid(10, 10, [0, 0, 0]), size(8, 8), Point::new(5, 5));
        assert!(matches!(result, Err(EngineError::InvalidArgument(_))));

        let result = engine.crop(solid(10, 10, [0, 0, 0]), size(2, 2), Point::new(-1, 0));
        assert!(matches!(result, Err(EngineError::InvalidArgument(_))));
    }

    #[test]
    fn resize_is_exact() {
        let resized = RustEngine::new()
            .resize(solid(40, 20, [1, 2, 3]), size(13, 17), ResizeFilter::Undefined)
            .unwrap();
        assert_eq!(resized.dimensions(), (13, 17));
    }

    #[test]
    fn thumbnail_inset_preserves_aspect() {
        let thumb = RustEngine::new()
            .thumbnail(solid(400, 200, [9, 9, 9]), size(100, 100), ThumbnailMode::Inset)
            .unwrap();
        assert_eq!(thumb.dimensions(), (100, 50));
    }

    #[test]
    fn thumbnail_outbound_fills_box() {
        let thumb = RustEngine::new()
            .thumbnail(solid(400, 200, [9, 9, 9]), size(100, 100), ThumbnailMode::Outbound)
            .unwrap();
        assert_eq!(thumb.dimensions(), (100, 100));
    }

    #[test]
    fn fit_is_exact_box_with_white_padding() {
        let fitted = RustEngine::new()
            .fit(solid(400, 200, [0, 0, 0]), size(100, 100), ThumbnailMode::Inset)
            .unwrap();
        assert_eq!(fitted.dimensions(), (100, 100));

        let img = fitted.as_image();
        // Content is 100x50, offset (0, 25).
        assert_eq!(img.get_pixel(50, 10).0, [255, 255, 255, 255]);
        assert_eq!(img.get_pixel(50, 50).0, [0, 0, 0, 255]);
        assert_eq!(img.get_pixel(50, 90).0, [255, 255, 255, 255]);
    }

    #[test]
    fn fit_for_every_aspect_ratio() {
        let engine = RustEngine::new();
        for (w, h) in [(10, 300), (300, 10), (64, 64), (30, 20), (1, 1)] {
            let fitted = engine
                .fit(solid(w, h, [5, 5, 5]), size(48, 32), ThumbnailMode::Inset)
                .unwrap();
            assert_eq!(fitted.dimensions(), (48, 32), "source {w}x{h}");
        }
    }

    #[test]
    fn frame_grows_canvas_and_pastes_at_margin() {
        let color = Color::parse("666", 100).unwrap();
        let framed = RustEngine::new()
            .frame(solid(30, 20, [10, 20, 30]), 5, color)
            .unwrap();
        assert_eq!(framed.dimensions(), (40, 30));

        let img = framed.as_image();
        assert_eq!(img.get_pixel(0, 0).0, [0x66, 0x66, 0x66, 255]);
        assert_eq!(img.get_pixel(4, 4).0, [0x66, 0x66, 0x66, 255]);
        assert_eq!(img.get_pixel(5, 5).0, [10, 20, 30, 255]);
        assert_eq!(img.get_pixel(34, 24).0, [10, 20, 30, 255]);
        assert_eq!(img.get_pixel(35, 25).0, [0x66, 0x66, 0x66, 255]);
    }

    #[test]
    fn watermark_honors_alpha() {
        let tmp = tempfile::TempDir::new().unwrap();
        let mark_path = tmp.path().join("mark.png");
        // Left column opaque red, right column fully transparent.
        RgbaImage::from_fn(2, 1, |x, _| {
            if x == 0 {
                Rgba([255, 0, 0, 255])
            } else {
                Rgba([255, 0, 0, 0])
            }
        })
        .save(&mark_path)
        .unwrap();

        let marked = RustEngine::new()
            .watermark(solid(4, 4, [0, 0, 255]), &mark_path, Point::new(1, 1))
            .unwrap();
        let img = marked.as_image();
        assert_eq!(img.get_pixel(1, 1).0, [255, 0, 0, 255]);
        assert_eq!(img.get_pixel(2, 1).0, [0, 0, 255, 255]);
        assert_eq!(img.get_pixel(0, 0).0, [0, 0, 255, 255]);
    }

    #[test]
    fn watermark_missing_is_not_found() {
        let result = RustEngine::new().watermark(
            solid(4, 4, [0, 0, 0]),
            Path::new("/nonexistent/mark.png"),
            Point::ORIGIN,
        );
        assert!(matches!(result, Err(EngineError::NotFound(_))));
    }

    #[test]
    fn text_missing_font_is_not_found() {
        let result = RustEngine::new().text(
            solid(4, 4, [0, 0, 0]),
            "hi",
            Path::new("/nonexistent/font.ttf"),
            Point::ORIGIN,
            &FontOptions::default(),
        );
        assert!(matches!(result, Err(EngineError::NotFound(_))));
    }

    #[test]
    fn text_invalid_font_is_font_error() {
        let tmp = tempfile::TempDir::new().unwrap();
        let font = tmp.path().join("font.ttf");
        std::fs::write(&font, b"not a font").unwrap();

        let result = RustEngine::new().text(
            solid(4, 4, [0, 0, 0]),
            "hi",
            &font,
            Point::ORIGIN,
            &FontOptions::default(),
        );
        assert!(matches!(result, Err(EngineError::Font(_))));
    }

    #[test]
    fn text_renders_at_start() {
        let options = FontOptions {
            size: 20.0,
            color: Color::parse("fff", 100).unwrap(),
            angle: 0.0,
        };
        let drawn = RustEngine::new()
            .text(solid(120, 60, [0, 0, 0]), "HHHH", &fixture_font(), Point::new(10, 10), &options)
            .unwrap();
        assert_eq!(drawn.dimensions(), (120, 60));

        let (left, top, right, bottom) = lit_bounds(&drawn).expect("text was drawn");
        assert!(left >= 10 && top >= 10, "text starts before (10, 10): {left},{top}");
        assert!(right - left > bottom - top, "unrotated text runs horizontally");
    }

    #[test]
    fn text_rotated_quarter_turn_runs_vertically() {
        let options = FontOptions {
            size: 20.0,
            color: Color::parse("fff", 100).unwrap(),
            angle: 90.0,
        };
        let drawn = RustEngine::new()
            .text(solid(160, 160, [0, 0, 0]), "HHHH", &fixture_font(), Point::new(40, 40), &options)
            .unwrap();
        assert_eq!(drawn.dimensions(), (160, 160));

        let (left, top, right, bottom) = lit_bounds(&drawn).expect("text was drawn");
        assert!(bottom - top > right - left, "rotated text runs vertically");
    }

    #[test]
    fn text_start_outside_i32_is_invalid() {
        let result = RustEngine::new().text(
            solid(4, 4, [0, 0, 0]),
            "hi",
            &fixture_font(),
            Point::new(i64::MAX, 0),
            &FontOptions::default(),
        );
        assert!(matches!(result, Err(EngineError::InvalidArgument(_))));
    }

    #[test]
    fn text_huge_or_non_finite_size_is_invalid() {
        let engine = RustEngine::new();
        for size in [1.0e9, f32::INFINITY, f32::NAN] {
            let options = FontOptions {
                size,
                ..FontOptions::default()
            };
            let result = engine.text(solid(4, 4, [0, 0, 0]), "hi", &fixture_font(), Point::ORIGIN, &options);
            assert!(matches!(result, Err(EngineError::InvalidArgument(_))), "size {size}");
        }
    }

    #[test]
    fn oversized_canvases_are_invalid() {
        let engine = RustEngine::new();

        let result = engine.resize(solid(4, 4, [0, 0, 0]), size(100_000, 100_000), ResizeFilter::Undefined);
        assert!(matches!(result, Err(EngineError::InvalidArgument(_))));

        let result = engine.fit(
            solid(4, 4, [0, 0, 0]),
            size(4_000_000_000, 4_000_000_000),
            ThumbnailMode::Inset,
        );
        assert!(matches!(result, Err(EngineError::InvalidArgument(_))));

        let color = Color::parse("000", 100).unwrap();
        let result = engine.frame(solid(4, 4, [0, 0, 0]), 2_000_000_000, color);
        assert!(matches!(result, Err(EngineError::InvalidArgument(_))));
    }

    #[test]
    fn encode_jpeg_and_png_decode_back() {
        let engine = RustEngine::new();
        let image = solid(16, 8, [200, 100, 50]);
        for format in [OutputFormat::Jpeg, OutputFormat::Png, OutputFormat::WebP, OutputFormat::Bmp] {
            let bytes = engine.encode(&image, format, &SaveOptions::default()).unwrap();
            let decoded = image::load_from_memory(&bytes).unwrap();
            assert_eq!(decoded.dimensions(), (16, 8), "{format:?}");
        }
    }

    #[test]
    fn encode_is_deterministic() {
        let engine = RustEngine::new();
        let options = SaveOptions {
            quality: Some(80),
            ..SaveOptions::default()
        };
        let a = engine.encode(&solid(32, 32, [1, 2, 3]), OutputFormat::Jpeg, &options).unwrap();
        let b = engine.encode(&solid(32, 32, [1, 2, 3]), OutputFormat::Jpeg, &options).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn save_infers_format_from_extension() {
        let tmp = tempfile::TempDir::new().unwrap();
        let source = tmp.path().join("src.png");
        write_test_png(&source, 20, 10);

        let engine = RustEngine::new();
        let image = engine.open(&source).unwrap();
        let out = tmp.path().join("out.jpg");
        engine.save(&image, &out, &SaveOptions::default()).unwrap();

        let reopened = engine.open(&out).unwrap();
        assert_eq!(reopened.dimensions(), (20, 10));
        let bytes = std::fs::read(&out).unwrap();
        assert_eq!(image::guess_format(&bytes).unwrap(), ImageFormat::Jpeg);
    }
}
