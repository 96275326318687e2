//! On-demand artifact cache.
//!
//! [`CacheResolver`] turns a `(source, preset)` pair into a cached artifact
//! and its public URL. Every request walks the same states:
//!
//! ```text
//! resolve paths -> check freshness -> fresh:  done
//!                                  -> stale / missing: generate -> persist -> done
//! ```
//!
//! # Freshness
//!
//! There is no manifest: the cache tree under `cache_root/<preset>/` mirrors
//! the static tree, and an artifact is valid iff it exists and its mtime is
//! not older than the source's ([`judge`]). A fresh hit never decodes
//! anything. Rewriting a source with an older or identical mtime is not
//! detected.
//!
//! # Concurrency
//!
//! The resolver is `Send + Sync` and meant to be shared. Misses for the same
//! artifact path are serialized by a keyed in-flight lock; whoever waited
//! re-checks freshness after acquiring it and returns the artifact the first
//! caller produced. Artifacts are written to a temp file and renamed into
//! place, so a concurrent reader never sees a partial file.
//!
//! # Errors
//!
//! [`CacheError::class`] sorts every failure into the three outcomes a front
//! end needs: bad request, not found, or server fault.

use crate::config::{CacheConfig, ConfigError};
use crate::imaging::{EngineError, ImageEngine, ImageHandle, OutputFormat, SaveOptions, select_engine, write_atomic};
use crate::invalidate::{self, InvalidationReport};
use crate::layout::{Layout, LayoutError, ResolvedPaths, SourceRef};
use crate::pipeline::{Pipeline, PipelineError};
use crate::preset::{CustomOp, Preset, PresetError, PresetRegistry};
use dashmap::DashMap;
use parking_lot::Mutex;
use rayon::prelude::*;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Preset \"{0}\" does not exist")]
    InvalidPreset(String),
    #[error(transparent)]
    InvalidSource(#[from] LayoutError),
    #[error("Source image not found: {}", .0.display())]
    SourceNotFound(PathBuf),
    #[error("Failed to create cache directory {}: {source}", path.display())]
    DirectoryCreateFailed { path: PathBuf, source: io::Error },
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
    #[error("Failed to write {}: {source}", path.display())]
    Persist { path: PathBuf, source: EngineError },
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// How a front end should report a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    BadRequest,
    NotFound,
    ServerFault,
}

impl ErrorClass {
    pub fn status_code(self) -> u16 {
        match self {
            ErrorClass::BadRequest => 400,
            ErrorClass::NotFound => 404,
            ErrorClass::ServerFault => 500,
        }
    }
}

impl CacheError {
    pub fn class(&self) -> ErrorClass {
        match self {
            CacheError::InvalidPreset(_) | CacheError::InvalidSource(_) => ErrorClass::BadRequest,
            CacheError::SourceNotFound(_) => ErrorClass::NotFound,
            CacheError::Pipeline(err) => pipeline_class(err),
            CacheError::DirectoryCreateFailed { .. }
            | CacheError::Persist { .. }
            | CacheError::Io(_) => ErrorClass::ServerFault,
        }
    }
}

fn pipeline_class(err: &PipelineError) -> ErrorClass {
    match err {
        PipelineError::InvalidArgument { .. } => ErrorClass::BadRequest,
        PipelineError::UnknownOperation(_) | PipelineError::Callback { .. } => {
            ErrorClass::ServerFault
        }
        PipelineError::Engine(engine) => match engine {
            EngineError::Decode { .. }
            | EngineError::InvalidArgument(_)
            | EngineError::UnsupportedFormat(_) => ErrorClass::BadRequest,
            EngineError::NotFound(_)
            | EngineError::Font(_)
            | EngineError::Encode(_)
            | EngineError::Io(_) => ErrorClass::ServerFault,
        },
    }
}

/// State of a cached artifact relative to its source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    Fresh,
    Stale,
    Missing,
}

/// Freshness from the two modification times.
///
/// No cache file is `Missing`. An existing artifact is `Stale` only if it is
/// strictly older than the source; an unreadable source mtime keeps it `Fresh`.
pub fn judge(cache_mtime: Option<SystemTime>, source_mtime: Option<SystemTime>) -> Freshness {
    match (cache_mtime, source_mtime) {
        (None, _) => Freshness::Missing,
        (Some(cached), Some(source)) if cached < source => Freshness::Stale,
        (Some(_), _) => Freshness::Fresh,
    }
}

fn file_mtime(path: &Path) -> Option<SystemTime> {
    let meta = fs::metadata(path).ok()?;
    if !meta.is_file() {
        return None;
    }
    meta.modified().ok()
}

/// Whether a request was answered from disk or by running the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Hit,
    Generated,
}

/// Encoded artifact bytes returned by [`CacheResolver::render`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rendered {
    pub bytes: Vec<u8>,
    pub format: OutputFormat,
    pub outcome: Outcome,
}

/// Result of one `warm` job.
#[derive(Debug)]
pub struct WarmItem {
    pub source: PathBuf,
    pub preset: String,
    pub result: Result<Outcome, CacheError>,
}

/// Summary of a warm run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u32,
    pub generated: u32,
    pub failed: u32,
}

impl CacheStats {
    pub fn from_items(items: &[WarmItem]) -> Self {
        let mut stats = Self::default();
        for item in items {
            match item.result {
                Ok(Outcome::Hit) => stats.hits += 1,
                Ok(Outcome::Generated) => stats.generated += 1,
                Err(_) => stats.failed += 1,
            }
        }
        stats
    }

    pub fn total(&self) -> u32 {
        self.hits + self.generated + self.failed
    }
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} cached, {} generated", self.hits, self.generated)?;
        if self.failed > 0 {
            write!(f, ", {} failed", self.failed)?;
        }
        write!(f, " ({} total)", self.total())
    }
}

/// Per-artifact mutual exclusion.
///
/// Entries live only while someone holds or waits on them.
#[derive(Debug, Default)]
struct InFlight {
    locks: DashMap<PathBuf, Arc<Mutex<()>>>,
}

impl InFlight {
    fn with_lock<T>(&self, key: &Path, f: impl FnOnce() -> T) -> T {
        let lock = Arc::clone(&self.locks.entry(key.to_path_buf()).or_default());
        let result = {
            let _held = lock.lock();
            f()
        };
        // One reference is the map's, one is ours.
        self.locks.remove_if(key, |_, entry| Arc::strong_count(entry) <= 2);
        result
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.locks.len()
    }
}

/// Resolves, generates and serves cached artifacts.
pub struct CacheResolver {
    layout: Layout,
    registry: PresetRegistry,
    pipeline: Pipeline,
    default_save: SaveOptions,
    generate_with_url: bool,
    persist: bool,
    in_flight: InFlight,
}

impl CacheResolver {
    pub fn new(layout: Layout, registry: PresetRegistry, pipeline: Pipeline) -> Self {
        Self {
            layout,
            registry,
            pipeline,
            default_save: SaveOptions::default(),
            generate_with_url: true,
            persist: true,
            in_flight: InFlight::default(),
        }
    }

    /// Build from configuration, selecting the engine from `config.engines`.
    pub fn from_config(config: &CacheConfig) -> Result<Self, ConfigError> {
        let engine = select_engine(&config.engines)?;
        Self::with_engine(config, engine)
    }

    /// Build from configuration with an explicit engine.
    pub fn with_engine(config: &CacheConfig, engine: Arc<dyn ImageEngine>) -> Result<Self, ConfigError> {
        let registry = config.registry()?;
        let pipeline = Pipeline::new(engine, &config.static_root);
        Ok(Self::new(Layout::from_config(config), registry, pipeline)
            .with_default_save(config.save.clone())
            .with_generate_with_url(config.generate_with_url)
            .with_persist(config.persist))
    }

    /// Encoder options every preset's own `save` entry is merged over.
    pub fn with_default_save(mut self, save: SaveOptions) -> Self {
        self.default_save = save;
        self
    }

    pub fn with_generate_with_url(mut self, generate: bool) -> Self {
        self.generate_with_url = generate;
        self
    }

    pub fn with_persist(mut self, persist: bool) -> Self {
        self.persist = persist;
        self
    }

    /// Make `name` usable as an operation in configured presets.
    pub fn with_callback(mut self, name: impl Into<String>, op: CustomOp) -> Self {
        self.pipeline = self.pipeline.with_callback(name, op);
        self
    }

    /// Register a preset built in code, e.g. one holding [`CustomOp`] steps.
    pub fn with_preset(mut self, preset: Preset) -> Result<Self, PresetError> {
        self.registry.insert(preset)?;
        Ok(self)
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn registry(&self) -> &PresetRegistry {
        &self.registry
    }

    pub fn engine(&self) -> &dyn ImageEngine {
        self.pipeline.engine()
    }

    pub fn has_preset(&self, name: &str) -> bool {
        self.registry.has(name)
    }

    fn preset(&self, name: &str) -> Result<&Preset, CacheError> {
        self.registry
            .get(name)
            .map_err(|_| CacheError::InvalidPreset(name.to_string()))
    }

    /// Encoder options and output format for an artifact. Fails before any
    /// pixel work when the artifact's extension has no encoder.
    fn output_settings(&self, paths: &ResolvedPaths) -> Result<(SaveOptions, OutputFormat), CacheError> {
        let save = self.save_options(self.preset(&paths.preset)?);
        let format = save.output_format(&paths.cache_path).ok_or_else(|| {
            PipelineError::Engine(EngineError::UnsupportedFormat(
                paths.cache_path.display().to_string(),
            ))
        })?;
        Ok((save, format))
    }

    /// Effective encoder options for `preset`.
    pub fn save_options(&self, preset: &Preset) -> SaveOptions {
        preset.save().merged_over(&self.default_save)
    }

    /// Derive source path, artifact path and artifact URL.
    ///
    /// The preset is checked first, so an unknown name fails before any
    /// filesystem access.
    pub fn resolve_paths(&self, source: SourceRef<'_>, preset: &str) -> Result<ResolvedPaths, CacheError> {
        if !self.registry.has(preset) {
            return Err(CacheError::InvalidPreset(preset.to_string()));
        }
        let relative = self.layout.relative(source)?;
        let paths = self.layout.resolve(preset, &relative);
        debug!(preset, source = %paths.source.display(), cache = %paths.cache_path.display(), "resolved");
        Ok(paths)
    }

    pub fn check_freshness(&self, paths: &ResolvedPaths) -> Freshness {
        judge(file_mtime(&paths.cache_path), file_mtime(&paths.source))
    }

    /// Make sure the artifact for `paths` exists and is fresh.
    pub fn ensure(&self, paths: &ResolvedPaths) -> Result<Outcome, CacheError> {
        self.output_settings(paths)?;
        if self.check_freshness(paths) == Freshness::Fresh {
            debug!(preset = %paths.preset, path = %paths.cache_path.display(), "cache hit");
            return Ok(Outcome::Hit);
        }
        self.in_flight.with_lock(&paths.cache_path, || -> Result<Outcome, CacheError> {
            // Someone else may have generated it while we waited.
            if self.check_freshness(paths) == Freshness::Fresh {
                debug!(preset = %paths.preset, path = %paths.cache_path.display(), "generated concurrently");
                return Ok(Outcome::Hit);
            }
            let (preset, image) = self.generate(paths)?;
            self.create_parent(&paths.cache_path)?;
            self.engine()
                .save(&image, &paths.cache_path, &self.save_options(preset))
                .map_err(|source| CacheError::Persist {
                    path: paths.cache_path.clone(),
                    source,
                })?;
            info!(preset = %paths.preset, path = %paths.cache_path.display(), "generated");
            Ok(Outcome::Generated)
        })
    }

    /// Generate the artifact if needed and return its URL.
    pub fn ensure_up_to_date(&self, source: SourceRef<'_>, preset: &str) -> Result<String, CacheError> {
        let paths = self.resolve_paths(source, preset)?;
        self.ensure(&paths)?;
        Ok(paths.cache_url)
    }

    /// Artifact URL for a source file. Generates first unless
    /// `generate_with_url` is off.
    pub fn url_for_path(&self, source: &Path, preset: &str) -> Result<String, CacheError> {
        self.url_for(SourceRef::Path(source), preset)
    }

    /// Artifact URL for a source URL under `static_url`.
    pub fn url_for_url(&self, source: &str, preset: &str) -> Result<String, CacheError> {
        self.url_for(SourceRef::Url(source), preset)
    }

    fn url_for(&self, source: SourceRef<'_>, preset: &str) -> Result<String, CacheError> {
        let paths = self.resolve_paths(source, preset)?;
        if self.generate_with_url {
            self.ensure(&paths)?;
        }
        Ok(paths.cache_url)
    }

    /// Artifact path, generated if needed.
    pub fn path_for(&self, source: SourceRef<'_>, preset: &str) -> Result<PathBuf, CacheError> {
        let paths = self.resolve_paths(source, preset)?;
        self.ensure(&paths)?;
        Ok(paths.cache_path)
    }

    /// Open the source and run the preset without persisting anything.
    pub fn get_image(&self, source: SourceRef<'_>, preset: &str) -> Result<ImageHandle, CacheError> {
        let paths = self.resolve_paths(source, preset)?;
        Ok(self.generate(&paths)?.1)
    }

    /// Encoded bytes for `paths`: read from a fresh artifact, or generated
    /// (and persisted when `persist` is on).
    pub fn render(&self, paths: &ResolvedPaths) -> Result<Rendered, CacheError> {
        let (save, format) = self.output_settings(paths)?;

        if let Some(rendered) = self.read_fresh(paths, format)? {
            return Ok(rendered);
        }
        self.in_flight.with_lock(&paths.cache_path, || -> Result<Rendered, CacheError> {
            if let Some(rendered) = self.read_fresh(paths, format)? {
                return Ok(rendered);
            }
            let (_, image) = self.generate(paths)?;
            let bytes = self
                .engine()
                .encode(&image, format, &save)
                .map_err(PipelineError::from)?;
            if self.persist {
                self.create_parent(&paths.cache_path)?;
                write_atomic(&paths.cache_path, &bytes).map_err(|e| CacheError::Persist {
                    path: paths.cache_path.clone(),
                    source: e.into(),
                })?;
                info!(preset = %paths.preset, path = %paths.cache_path.display(), "generated");
            }
            Ok(Rendered {
                bytes,
                format,
                outcome: Outcome::Generated,
            })
        })
    }

    fn read_fresh(&self, paths: &ResolvedPaths, format: OutputFormat) -> Result<Option<Rendered>, CacheError> {
        if self.check_freshness(paths) != Freshness::Fresh {
            return Ok(None);
        }
        match fs::read(&paths.cache_path) {
            Ok(bytes) => {
                debug!(preset = %paths.preset, path = %paths.cache_path.display(), "cache hit");
                Ok(Some(Rendered {
                    bytes,
                    format,
                    outcome: Outcome::Hit,
                }))
            }
            // Removed between the freshness check and the read.
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Require the source, then run the pipeline.
    fn generate(&self, paths: &ResolvedPaths) -> Result<(&Preset, ImageHandle), CacheError> {
        let preset = self.preset(&paths.preset)?;
        if !paths.source.is_file() {
            return Err(CacheError::SourceNotFound(paths.source.clone()));
        }
        let image = self
            .pipeline
            .open_and_run(&paths.source, preset)
            .map_err(|err| match err {
                PipelineError::Engine(EngineError::NotFound(path)) if path == paths.source => {
                    CacheError::SourceNotFound(path)
                }
                other => other.into(),
            })?;
        Ok((preset, image))
    }

    fn create_parent(&self, path: &Path) -> Result<(), CacheError> {
        let Some(dir) = path.parent() else {
            return Ok(());
        };
        fs::create_dir_all(dir).map_err(|source| CacheError::DirectoryCreateFailed {
            path: dir.to_path_buf(),
            source,
        })
    }

    /// Generate many `(source, preset)` pairs in parallel on the current
    /// rayon pool.
    pub fn warm(&self, jobs: &[(PathBuf, String)]) -> Vec<WarmItem> {
        jobs.par_iter()
            .map(|(source, preset)| WarmItem {
                source: source.clone(),
                preset: preset.clone(),
                result: self
                    .resolve_paths(SourceRef::Path(source), preset)
                    .and_then(|paths| self.ensure(&paths)),
            })
            .collect()
    }

    /// Delete every preset's artifact for `source`.
    pub fn invalidate(&self, source: SourceRef<'_>) -> Result<InvalidationReport, CacheError> {
        let relative = self.layout.relative(source)?;
        Ok(invalidate::invalidate(
            &self.layout,
            self.registry.names(),
            &relative,
        ))
    }

    /// Delete the whole cache tree.
    pub fn flush_all(&self) -> Result<bool, CacheError> {
        Ok(invalidate::flush_all(self.layout.cache_root())?)
    }

    /// Delete every artifact of one preset.
    pub fn flush_preset(&self, preset: &str) -> Result<bool, CacheError> {
        self.preset(preset)?;
        Ok(invalidate::flush_all(&self.layout.preset_dir(preset))?)
    }
}
