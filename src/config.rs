//! Cache configuration module.
//!
//! Handles loading, validating, and merging `imagecache.toml`. The stock
//! defaults are serialized to a TOML table and the user file is merged on top,
//! so a config file only needs the keys it wants to change.
//!
//! ## Configuration Options
//!
//! ```toml
//! # All options are optional - defaults shown below
//!
//! static_root = "static"      # Directory holding source images
//! static_url = "/static"      # Public URL prefix of static_root
//! cache_root = "cache"        # Directory holding generated artifacts
//! cache_url = "/cache"        # Public URL prefix of cache_root
//! persist = true              # Save artifacts generated while serving
//! generate_with_url = true    # URL lookups generate missing artifacts
//! engines = ["image"]         # Backend priority list
//!
//! [save]
//! quality = 100               # Default encoder options
//!
//! [processing]
//! max_processes = 4           # Max parallel workers for `warm` (omit for auto)
//!
//! [presets.thumb_100x100]
//! thumbnail = [100, 100, "inset"]
//! ```
//!
//! Relative `static_root` and `cache_root` paths are resolved against the
//! directory containing the config file.
//!
//! Unknown keys are rejected to catch typos early.

use crate::imaging::SaveOptions;
use crate::preset::{PresetError, PresetRegistry, RawPreset};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Default config file name, looked up in the working directory.
pub const CONFIG_FILE: &str = "imagecache.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
    #[error("Invalid preset: {0}")]
    Preset(#[from] PresetError),
    #[error("Unknown image engine: {0:?}")]
    UnknownEngine(String),
    #[error("No image engine available (tried: {})", .0.join(", "))]
    NoEngine(Vec<String>),
}

/// Cache configuration loaded from `imagecache.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheConfig {
    /// Directory holding source images.
    pub static_root: PathBuf,
    /// Public URL prefix that maps 1:1 onto `static_root`.
    pub static_url: String,
    /// Directory holding generated artifacts, one subdirectory per preset.
    pub cache_root: PathBuf,
    /// Public URL prefix that maps 1:1 onto `cache_root`.
    pub cache_url: String,
    /// Whether artifacts generated by the serve flow are written to disk.
    pub persist: bool,
    /// Whether URL lookups generate missing or stale artifacts, or only
    /// compute where they would live.
    pub generate_with_url: bool,
    /// Engine names in priority order; the first available one wins.
    pub engines: Vec<String>,
    /// Encoder options applied under every preset's own `save` entry.
    pub save: SaveOptions,
    /// Parallel processing settings.
    pub processing: ProcessingConfig,
    /// Preset definitions by name.
    pub presets: BTreeMap<String, RawPreset>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            static_root: PathBuf::from("static"),
            static_url: "/static".to_string(),
            cache_root: PathBuf::from("cache"),
            cache_url: "/cache".to_string(),
            persist: true,
            generate_with_url: true,
            engines: vec!["image".to_string()],
            save: SaveOptions {
                quality: Some(100),
                ..SaveOptions::default()
            },
            processing: ProcessingConfig::default(),
            presets: BTreeMap::new(),
        }
    }
}

impl CacheConfig {
    /// Validate values and normalize every preset definition.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (key, value) in [
            ("static_root", self.static_root.as_os_str().is_empty()),
            ("cache_root", self.cache_root.as_os_str().is_empty()),
            ("static_url", self.static_url.trim().is_empty()),
            ("cache_url", self.cache_url.trim().is_empty()),
        ] {
            if value {
                return Err(ConfigError::Validation(format!("{key} must not be empty")));
            }
        }
        if self.static_root == self.cache_root {
            return Err(ConfigError::Validation(
                "cache_root must differ from static_root".into(),
            ));
        }
        if self.static_url.trim_end_matches('/') == self.cache_url.trim_end_matches('/') {
            return Err(ConfigError::Validation(
                "cache_url must differ from static_url".into(),
            ));
        }
        if self.engines.is_empty() {
            return Err(ConfigError::Validation("engines must not be empty".into()));
        }
        self.save
            .validate()
            .map_err(|e| ConfigError::Validation(format!("save: {e}")))?;
        self.registry()?;
        Ok(())
    }

    /// Normalize the `presets` table into a registry.
    pub fn registry(&self) -> Result<PresetRegistry, ConfigError> {
        Ok(PresetRegistry::from_raw(&self.presets)?)
    }

    /// Make relative roots relative to `base` instead of the working directory.
    pub fn with_base_dir(mut self, base: &Path) -> Self {
        if self.static_root.is_relative() {
            self.static_root = base.join(&self.static_root);
        }
        if self.cache_root.is_relative() {
            self.cache_root = base.join(&self.cache_root);
        }
        self
    }
}

/// Parallel processing settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProcessingConfig {
    /// Maximum number of parallel workers used when warming the cache.
    /// When absent, defaults to the number of CPU cores.
    /// Values larger than the core count are clamped down.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_processes: Option<usize>,
}

/// Worker count for `warm`: all cores unless `max_processes` asks for fewer.
pub fn effective_threads(config: &ProcessingConfig) -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    config
        .max_processes
        .map(|n| n.clamp(1, cores))
        .unwrap_or(cores)
}

// =============================================================================
// Config loading, merging, and validation
// =============================================================================

/// [`CacheConfig::default`] as a TOML table, the layer a config file is
/// merged onto.
pub fn stock_defaults_value() -> Result<toml::Value, ConfigError> {
    Ok(toml::Value::try_from(CacheConfig::default())?)
}

/// Merge `overlay` into `base`. Tables merge per key, recursively; any other
/// overlay value replaces the base value whole.
///
/// Preset arrays are replaced, not concatenated, so a config file redefines
/// a preset entirely.
pub fn merge_toml(base: toml::Value, overlay: toml::Value) -> toml::Value {
    match (base, overlay) {
        (toml::Value::Table(mut base_table), toml::Value::Table(overlay_table)) => {
            for (key, overlay_val) in overlay_table {
                let merged = match base_table.remove(&key) {
                    Some(base_val) => merge_toml(base_val, overlay_val),
                    None => overlay_val,
                };
                base_table.insert(key, merged);
            }
            toml::Value::Table(base_table)
        }
        (_, overlay) => overlay,
    }
}

/// Parse a config file without interpreting it. `Ok(None)` if it does not exist.
pub fn load_raw_config(path: &Path) -> Result<Option<toml::Value>, ConfigError> {
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(path)?;
    let value: toml::Value = toml::from_str(&content)?;
    Ok(Some(value))
}

/// Deserialize `base` with `overlay` merged on top, then validate.
pub fn resolve_config(
    base: toml::Value,
    overlay: Option<toml::Value>,
) -> Result<CacheConfig, ConfigError> {
    let merged = match overlay {
        Some(ov) => merge_toml(base, ov),
        None => base,
    };
    let config: CacheConfig = merged.try_into()?;
    config.validate()?;
    Ok(config)
}

/// Load config from the file at `path`.
///
/// A missing file yields the defaults. Relative roots are anchored at the
/// file's directory.
pub fn load_config(path: &Path) -> Result<CacheConfig, ConfigError> {
    let base = stock_defaults_value()?;
    let overlay = load_raw_config(path)?;
    let config = resolve_config(base, overlay)?;
    let dir = path.parent().unwrap_or(Path::new(""));
    Ok(config.with_base_dir(dir))
}

/// Returns a fully-commented stock `imagecache.toml` with all keys and explanations.
///
/// Used by the `gen-config` CLI command.
pub fn stock_config_toml() -> &'static str {
    r##"# Image Cache Configuration
# =========================
# All settings are optional. Remove or comment out any you don't need.
# Values shown below are the defaults.
# Unknown keys will cause an error.

# Directory holding source images. Relative paths are resolved against the
# directory containing this file.
static_root = "static"

# Public URL prefix that maps onto static_root.
static_url = "/static"

# Directory holding generated artifacts. Each preset gets a subdirectory that
# mirrors the layout of static_root.
cache_root = "cache"

# Public URL prefix that maps onto cache_root.
cache_url = "/cache"

# Save artifacts generated while serving a cache URL. When false, images are
# generated for every request and never written.
persist = true

# Generate missing or stale artifacts when asked for their URL. When false,
# only the would-be URL is computed.
generate_with_url = true

# Image engines in priority order. The first available one is used.
engines = ["image"]

# ---------------------------------------------------------------------------
# Default encoder options (each preset may override them with `save`)
# ---------------------------------------------------------------------------
[save]
# Lossy quality (1-100), used for JPEG.
quality = 100

# Force an output format instead of using the artifact's extension.
# format = "png"

# PNG compression: "default", "fast" or "best".
# png_compression = "default"

# ---------------------------------------------------------------------------
# Processing
# ---------------------------------------------------------------------------
[processing]
# Maximum parallel workers for `imagecache warm`.
# Omit or comment out to auto-detect (= number of CPU cores).
# max_processes = 4

# ---------------------------------------------------------------------------
# Presets
# ---------------------------------------------------------------------------
# A preset is an ordered list of operations. Write it as a table (operations
# run in the order they appear) or as an array of single-operation tables.
# Arguments are a positional array or a table of named arguments.
#
#   crop      = [width, height, start = [0, 0]]
#   resize    = [width, height, filter = "undefined"]
#   thumbnail = [width, height, mode = "inset"]        # or "outbound"
#   fit       = [width, height, mode = "inset"]
#   watermark = [file, start = [0, 0]]
#   text      = [text, font, start = [0, 0], { size = 12, color = "fff", angle = 0 }]
#   frame     = [margin = 20, color = "666", alpha = 100]
#
# The reserved `save` key holds encoder options for that preset.
[presets]

# [presets.thumb_100x100]
# thumbnail = [100, 100, "inset"]
#
# [presets.card]
# fit = { width = 320, height = 200 }
# frame = { margin = 4, color = "ddd" }
# save = { quality = 80 }
"##
}
