//! Shared test utilities for the imagecache test suite.
//!
//! Provides synthetic image writers, mtime control, and a throwaway cache
//! layout (`static/` + `cache/` inside a temp directory) with a config that
//! points at it.
//!
//! # Usage
//!
//! ```ignore
//! use crate::test_helpers::*;
//!
//! let fixture = CacheFixture::new("[presets.thumb_100x100]\nthumbnail = [100, 100]\n");
//! let source = fixture.write_source("photos/a.jpg");
//! set_mtime(&source, hours_ago(2));
//! ```

use crate::config::CacheConfig;
use image::{ImageEncoder, RgbImage, RgbaImage};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tempfile::TempDir;

// =========================================================================
// Synthetic images
// =========================================================================

/// Write a small valid JPEG with a gradient pattern.
pub fn write_test_jpeg(path: &Path, width: u32, height: u32) {
    let img = RgbImage::from_fn(width, height, |x, y| {
        image::Rgb([(x % 256) as u8, (y % 256) as u8, 128])
    });
    ensure_parent(path);
    let file = fs::File::create(path).unwrap();
    let writer = std::io::BufWriter::new(file);
    image::codecs::jpeg::JpegEncoder::new(writer)
        .write_image(img.as_raw(), width, height, image::ExtendedColorType::Rgb8)
        .unwrap();
}

/// Write a small valid RGBA PNG. The left half is opaque red, the right half
/// fully transparent.
pub fn write_test_png(path: &Path, width: u32, height: u32) {
    let img = RgbaImage::from_fn(width, height, |x, _| {
        if x < width / 2 {
            image::Rgba([255, 0, 0, 255])
        } else {
            image::Rgba([0, 0, 0, 0])
        }
    });
    ensure_parent(path);
    img.save_with_format(path, image::ImageFormat::Png).unwrap();
}

fn ensure_parent(path: &Path) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
}

// =========================================================================
// Modification times
// =========================================================================

/// Set a file's modification time.
pub fn set_mtime(path: &Path, time: SystemTime) {
    let file = fs::OpenOptions::new().write(true).open(path).unwrap();
    file.set_modified(time).unwrap();
}

pub fn mtime(path: &Path) -> SystemTime {
    fs::metadata(path).unwrap().modified().unwrap()
}

pub fn hours_ago(hours: u64) -> SystemTime {
    SystemTime::now() - Duration::from_secs(hours * 3600)
}

// =========================================================================
// Cache layout fixture
// =========================================================================

/// A temp directory holding `static/` and `cache/`, plus a config for it.
pub struct CacheFixture {
    pub tmp: TempDir,
    pub config: CacheConfig,
}

impl CacheFixture {
    /// `presets_toml` is parsed as a config overlay; anything valid in
    /// `imagecache.toml` may appear in it.
    pub fn new(presets_toml: &str) -> Self {
        let tmp = TempDir::new().unwrap();
        let config: CacheConfig = toml::from_str(presets_toml).unwrap();
        let config = CacheConfig {
            static_root: tmp.path().join("static"),
            cache_root: tmp.path().join("cache"),
            ..config
        };
        config.validate().unwrap();
        fs::create_dir_all(&config.static_root).unwrap();
        Self { tmp, config }
    }

    pub fn static_root(&self) -> &Path {
        &self.config.static_root
    }

    pub fn cache_root(&self) -> &Path {
        &self.config.cache_root
    }

    /// Write a JPEG source at `relative` under the static root.
    pub fn write_source(&self, relative: &str) -> PathBuf {
        let path = self.static_root().join(relative);
        write_test_jpeg(&path, 400, 200);
        path
    }

    /// Where `preset` caches `relative`.
    pub fn cache_path(&self, preset: &str, relative: &str) -> PathBuf {
        self.cache_root().join(preset).join(relative)
    }
}
