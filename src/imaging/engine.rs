//! Image engine trait and shared types.
//!
//! The [`ImageEngine`] trait is the only place pixels are touched. Every
//! geometric operation consumes the current [`ImageHandle`] and returns the
//! next one, so the pipeline can fold a preset over a single owned handle and
//! no operation ever observes a stale canvas.
//!
//! The production implementation is
//! [`RustEngine`](super::rust_engine::RustEngine), built on the `image` and
//! `imageproc` crates. Tests use the recording [`tests::MockEngine`].

use super::params::{Color, FontOptions, OutputFormat, Point, ResizeFilter, SaveOptions, Size, ThumbnailMode};
use image::DynamicImage;
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Image not found: {}", .0.display())]
    NotFound(PathBuf),
    #[error("Failed to decode {}: {message}", path.display())]
    Decode { path: PathBuf, message: String },
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("Font error: {0}")]
    Font(String),
    #[error("Unsupported output format: {0}")]
    UnsupportedFormat(String),
    #[error("Encoding failed: {0}")]
    Encode(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A decoded image owned by exactly one pipeline run.
///
/// Deliberately not `Clone`: operations take the handle by value and hand
/// back its replacement.
pub struct ImageHandle {
    image: DynamicImage,
}

impl ImageHandle {
    pub fn new(image: DynamicImage) -> Self {
        Self { image }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.image.width(), self.image.height())
    }

    pub fn as_image(&self) -> &DynamicImage {
        &self.image
    }

    pub fn into_image(self) -> DynamicImage {
        self.image
    }
}

impl fmt::Debug for ImageHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageHandle")
            .field("width", &self.width())
            .field("height", &self.height())
            .field("color", &self.image.color())
            .finish()
    }
}

/// Trait for image engines.
///
/// An engine is chosen once at startup (see
/// [`select_engine`](super::select_engine)) and shared read-only by every
/// request, hence the `Send + Sync` bound.
pub trait ImageEngine: Send + Sync {
    /// Backend name as used in the `engines` config list.
    fn name(&self) -> &'static str;

    /// Decode an image from disk.
    fn open(&self, path: &Path) -> Result<ImageHandle, EngineError>;

    /// Cut a `size` region starting at `start`.
    fn crop(&self, image: ImageHandle, size: Size, start: Point) -> Result<ImageHandle, EngineError>;

    /// Scale to exactly `size`, ignoring aspect ratio.
    fn resize(
        &self,
        image: ImageHandle,
        size: Size,
        filter: ResizeFilter,
    ) -> Result<ImageHandle, EngineError>;

    /// Scale into (`Inset`) or over (`Outbound`) the `size` box, keeping aspect ratio.
    fn thumbnail(
        &self,
        image: ImageHandle,
        size: Size,
        mode: ThumbnailMode,
    ) -> Result<ImageHandle, EngineError>;

    /// Thumbnail, then center it on an opaque white canvas of exactly `size`.
    fn fit(&self, image: ImageHandle, size: Size, mode: ThumbnailMode) -> Result<ImageHandle, EngineError>;

    /// Paste the image at `watermark` over `image` at `start`, honoring its alpha.
    fn watermark(
        &self,
        image: ImageHandle,
        watermark: &Path,
        start: Point,
    ) -> Result<ImageHandle, EngineError>;

    /// Draw `text` with the font file at `font`.
    fn text(
        &self,
        image: ImageHandle,
        text: &str,
        font: &Path,
        start: Point,
        options: &FontOptions,
    ) -> Result<ImageHandle, EngineError>;

    /// Surround the image with a `margin`-wide border of `color`.
    fn frame(&self, image: ImageHandle, margin: u32, color: Color) -> Result<ImageHandle, EngineError>;

    /// Serialize to `format`.
    fn encode(
        &self,
        image: &ImageHandle,
        format: OutputFormat,
        options: &SaveOptions,
    ) -> Result<Vec<u8>, EngineError>;

    /// Encode for `path` (format from `options.format` or the extension) and
    /// write it atomically.
    fn save(&self, image: &ImageHandle, path: &Path, options: &SaveOptions) -> Result<(), EngineError> {
        let format = options
            .output_format(path)
            .ok_or_else(|| EngineError::UnsupportedFormat(path.display().to_string()))?;
        let bytes = self.encode(image, format, options)?;
        write_atomic(path, &bytes)?;
        Ok(())
    }
}

/// Write `bytes` to a temporary file next to `path`, then rename it into place.
///
/// Readers only ever see the previous file or the complete new one. The
/// parent directory must already exist.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    let mut builder = tempfile::Builder::new();
    builder.prefix(TEMP_PREFIX);
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        builder.permissions(std::fs::Permissions::from_mode(0o644));
    }
    let mut tmp = builder.tempfile_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Prefix of in-progress files created by [`write_atomic`].
pub const TEMP_PREFIX: &str = ".imagecache-tmp-";
