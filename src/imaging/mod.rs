//! Image processing: the pixel-level capability behind every preset.
//!
//! | Operation | Engine method |
//! |---|---|
//! | **Decode** | [`ImageEngine::open`] |
//! | **Crop / resize** | [`ImageEngine::crop`], [`ImageEngine::resize`] |
//! | **Thumbnail / fit** | [`ImageEngine::thumbnail`], [`ImageEngine::fit`] |
//! | **Overlays** | [`ImageEngine::watermark`], [`ImageEngine::text`], [`ImageEngine::frame`] |
//! | **Encode / save** | [`ImageEngine::encode`], [`ImageEngine::save`] |
//!
//! The module is split into:
//! - **Calculations**: Pure functions for dimension math (unit testable)
//! - **Parameters**: Validated operation parameters
//! - **Engine**: [`ImageEngine`] trait + [`ImageHandle`]
//! - **Rust engine**: [`RustEngine`], the `image`/`imageproc` implementation
//!
//! Engines are chosen once at startup with [`select_engine`] and injected into
//! the [`Pipeline`](crate::pipeline::Pipeline); nothing here is global.

pub mod calculations;
pub mod engine;
mod params;
pub mod rust_engine;

pub use engine::{EngineError, ImageEngine, ImageHandle, write_atomic};
pub use params::{
    Color, FontOptions, OutputFormat, ParamError, PngCompression, Point, ResizeFilter,
    SaveOptions, Size, ThumbnailMode,
};
pub use rust_engine::RustEngine;

use crate::config::ConfigError;
use std::sync::Arc;

/// Backend names understood by [`select_engine`], in no particular order.
pub const KNOWN_ENGINES: &[&str] = &[RustEngine::NAME];

/// Pick the first available engine from a priority list.
///
/// An unknown name is a configuration error even if a later name would have
/// worked.
pub fn select_engine(names: &[String]) -> Result<Arc<dyn ImageEngine>, ConfigError> {
    for name in names {
        match name.as_str() {
            RustEngine::NAME => {
                if RustEngine::is_available() {
                    return Ok(Arc::new(RustEngine::new()));
                }
            }
            other => return Err(ConfigError::UnknownEngine(other.to_string())),
        }
    }
    Err(ConfigError::NoEngine(names.to_vec()))
}
