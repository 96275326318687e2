//! Parameter types for engine operations.
//!
//! These types describe *what* an operation should do. They are the interface
//! between the [`pipeline`](crate::pipeline) (which parses preset arguments
//! into them) and the [`engine`](super::engine) (which does the pixel work).
//! Everything here is validated on construction, so an engine never sees a
//! zero-sized box or a malformed color.
//!
//! ## Types
//!
//! - [`Size`]: a non-empty `width × height` box.
//! - [`Point`]: an `(x, y)` origin, built from a two-element coordinate list.
//! - [`Color`]: an RGB color with an opacity percentage (100 = opaque).
//! - [`ResizeFilter`]: interpolation algorithm for `resize`.
//! - [`ThumbnailMode`]: `inset` (fit inside) or `outbound` (fill and crop).
//! - [`FontOptions`]: size, color and angle for `text`.
//! - [`OutputFormat`] / [`SaveOptions`]: encoder selection and settings.

use image::imageops::FilterType;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use thiserror::Error;

/// Error raised when a parameter value cannot be constructed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct ParamError(pub String);

/// A non-empty box in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    /// Both sides must be positive.
    pub fn new(width: i64, height: i64) -> Result<Self, ParamError> {
        if width <= 0 || height <= 0 {
            return Err(ParamError(format!(
                "width and height must be positive, got {width}x{height}"
            )));
        }
        let width = u32::try_from(width)
            .map_err(|_| ParamError(format!("width {width} is too large")))?;
        let height = u32::try_from(height)
            .map_err(|_| ParamError(format!("height {height} is too large")))?;
        Ok(Self { width, height })
    }

    pub fn as_tuple(self) -> (u32, u32) {
        (self.width, self.height)
    }
}

impl fmt::Display for Size {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// An origin on the canvas. May be negative for overlays that start off-canvas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Point {
    pub x: i64,
    pub y: i64,
}

impl Point {
    pub const ORIGIN: Point = Point { x: 0, y: 0 };

    pub fn new(x: i64, y: i64) -> Self {
        Self { x, y }
    }

    /// Build a point from a `[x, y]` coordinate list.
    pub fn from_pair(coords: &[i64]) -> Result<Self, ParamError> {
        match coords {
            [x, y] => Ok(Self { x: *x, y: *y }),
            _ => Err(ParamError(format!(
                "start must be an array of two elements, got {}",
                coords.len()
            ))),
        }
    }
}

/// RGB color plus opacity as a percentage (0 = transparent, 100 = opaque).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Color {
    pub red: u8,
    pub green: u8,
    pub blue: u8,
    pub alpha: u8,
}

impl Color {
    pub const WHITE: Color = Color {
        red: 0xff,
        green: 0xff,
        blue: 0xff,
        alpha: 100,
    };

    /// Parse a hex color (`"fff"`, `"#ffffff"`, `"a0b1c2"`) with an opacity percentage.
    pub fn parse(hex: &str, alpha: u8) -> Result<Self, ParamError> {
        if alpha > 100 {
            return Err(ParamError(format!("alpha must be 0-100, got {alpha}")));
        }
        let digits = hex.trim().trim_start_matches('#');
        let invalid = || ParamError(format!("invalid color: {hex:?}"));
        if !digits.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(invalid());
        }
        let expanded: String = match digits.len() {
            3 => digits.chars().flat_map(|c| [c, c]).collect(),
            6 => digits.to_string(),
            _ => return Err(invalid()),
        };
        let channel = |i: usize| u8::from_str_radix(&expanded[i..i + 2], 16).map_err(|_| invalid());
        Ok(Self {
            red: channel(0)?,
            green: channel(2)?,
            blue: channel(4)?,
            alpha,
        })
    }

    /// RGBA pixel with the opacity percentage scaled to 0-255.
    pub fn to_rgba(self) -> image::Rgba<u8> {
        let alpha = (u32::from(self.alpha) * 255 + 50) / 100;
        image::Rgba([self.red, self.green, self.blue, alpha as u8])
    }
}

/// Interpolation used by `resize`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResizeFilter {
    /// Let the engine choose.
    #[default]
    Undefined,
    Point,
    Triangle,
    CatmullRom,
    Gaussian,
    Lanczos,
}

impl ResizeFilter {
    pub fn parse(name: &str) -> Result<Self, ParamError> {
        match name.to_ascii_lowercase().as_str() {
            "undefined" | "" => Ok(Self::Undefined),
            "point" | "nearest" => Ok(Self::Point),
            "triangle" | "linear" => Ok(Self::Triangle),
            "catrom" | "catmullrom" | "cubic" => Ok(Self::CatmullRom),
            "gaussian" => Ok(Self::Gaussian),
            "lanczos" | "lanczos3" => Ok(Self::Lanczos),
            other => Err(ParamError(format!("unknown resize filter: {other:?}"))),
        }
    }

    /// The `image` crate filter this maps to. `Undefined` resolves to Lanczos3.
    pub fn filter_type(self) -> FilterType {
        match self {
            Self::Point => FilterType::Nearest,
            Self::Triangle => FilterType::Triangle,
            Self::CatmullRom => FilterType::CatmullRom,
            Self::Gaussian => FilterType::Gaussian,
            Self::Undefined | Self::Lanczos => FilterType::Lanczos3,
        }
    }
}

/// How `thumbnail` treats the target box.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ThumbnailMode {
    /// Whole image inside the box; one axis may underfill.
    #[default]
    Inset,
    /// Box completely covered; overflow is center-cropped.
    Outbound,
}

impl ThumbnailMode {
    pub fn parse(name: &str) -> Result<Self, ParamError> {
        match name.to_ascii_lowercase().as_str() {
            "inset" => Ok(Self::Inset),
            "outbound" => Ok(Self::Outbound),
            other => Err(ParamError(format!(
                "thumbnail mode must be \"inset\" or \"outbound\", got {other:?}"
            ))),
        }
    }
}

/// Font settings for `text`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FontOptions {
    /// Glyph height in pixels.
    pub size: f32,
    pub color: Color,
    /// Counter-clockwise rotation in degrees.
    pub angle: f32,
}

impl Default for FontOptions {
    fn default() -> Self {
        Self {
            size: 12.0,
            color: Color {
                red: 0xff,
                green: 0xff,
                blue: 0xff,
                alpha: 100,
            },
            angle: 0.0,
        }
    }
}

/// Encoded output formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Jpeg,
    Png,
    Gif,
    Bmp,
    Tiff,
    WebP,
}

impl OutputFormat {
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "jpg" | "jpeg" => Some(Self::Jpeg),
            "png" => Some(Self::Png),
            "gif" => Some(Self::Gif),
            "bmp" => Some(Self::Bmp),
            "tif" | "tiff" => Some(Self::Tiff),
            "webp" => Some(Self::WebP),
            _ => None,
        }
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|e| e.to_str())
            .and_then(Self::from_extension)
    }

    pub fn mime_type(self) -> &'static str {
        match self {
            Self::Jpeg => "image/jpeg",
            Self::Png => "image/png",
            Self::Gif => "image/gif",
            Self::Bmp => "image/bmp",
            Self::Tiff => "image/tiff",
            Self::WebP => "image/webp",
        }
    }
}

/// PNG compression effort.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PngCompression {
    Default,
    Fast,
    Best,
}

/// Encoder settings. Every field is optional so preset-level `save` tables can
/// override just the keys they name; see [`SaveOptions::merged_over`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SaveOptions {
    /// Lossy quality (1-100). Used by JPEG.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quality: Option<u8>,
    /// Force an output format instead of inferring it from the file extension.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub png_compression: Option<PngCompression>,
}

impl SaveOptions {
    /// Keys set on `self` win; unset keys fall back to `base`.
    pub fn merged_over(&self, base: &SaveOptions) -> SaveOptions {
        SaveOptions {
            quality: self.quality.or(base.quality),
            format: self.format.clone().or_else(|| base.format.clone()),
            png_compression: self.png_compression.or(base.png_compression),
        }
    }

    pub fn validate(&self) -> Result<(), ParamError> {
        if let Some(q) = self.quality
            && !(1..=100).contains(&q)
        {
            return Err(ParamError(format!("quality must be 1-100, got {q}")));
        }
        if let Some(fmt) = &self.format
            && OutputFormat::from_extension(fmt).is_none()
        {
            return Err(ParamError(format!("unsupported output format: {fmt:?}")));
        }
        Ok(())
    }

    /// Format to encode `path` with: explicit `format` first, then the extension.
    pub fn output_format(&self, path: &Path) -> Option<OutputFormat> {
        match &self.format {
            Some(fmt) => OutputFormat::from_extension(fmt),
            None => OutputFormat::from_path(path),
        }
    }
}
