//! # Image Cache
//!
//! On-demand image presets. A preset is a named, ordered list of operations
//! (crop, resize, thumbnail, fit, watermark, text, frame) plus encoder
//! settings. Applying a preset to a source image under `static_root` produces
//! an artifact under `cache_root/<preset>/` at the same relative path, which
//! is reused until the source changes.
//!
//! ```text
//! static_root/photos/dawn.jpg  --thumb-->  cache_root/thumb/photos/dawn.jpg
//! static_url/photos/dawn.jpg               cache_url/thumb/photos/dawn.jpg
//! ```
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`cache`] | [`CacheResolver`](cache::CacheResolver): freshness, generation, persistence, URL lookups, warm |
//! | [`request`] | Parses a cache URL and serves the artifact bytes for it |
//! | [`pipeline`] | Runs a preset's operations in order on an engine |
//! | [`preset`] | Preset model, normalization of config entries, and the registry |
//! | [`imaging`] | Engine trait, parameter types, geometry, and the `image`-crate engine |
//! | [`layout`] | Source, artifact, and URL path mapping |
//! | [`invalidate`] | Deletes artifacts per source, per preset, or all |
//! | [`inventory`] | Disk usage per preset and discovery of source images |
//! | [`config`] | `imagecache.toml` loading, merging, and validation |
//! | [`output`] | CLI output formatting |
//!
//! # Design Decisions
//!
//! ## Filesystem as Index
//!
//! The cache keeps no manifest or database. Whether an artifact is valid is
//! decided by comparing its modification time with the source's, so the cache
//! directory can be deleted, rsynced, or served by any static file server
//! without getting out of sync with some other record.
//!
//! ## Pluggable Engines
//!
//! Pixel work goes through the [`imaging::ImageEngine`] trait. The engine is
//! picked once from the configured priority list and shared, so the pipeline
//! and cache logic are tested against a recording mock without decoding any
//! real image.
//!
//! ## Shareable Resolver
//!
//! A [`CacheResolver`](cache::CacheResolver) is `Send + Sync`. Concurrent
//! misses for the same artifact generate it once, and artifacts are written
//! atomically, so a front end can share one resolver across all its workers.

pub mod cache;
pub mod config;
pub mod imaging;
pub mod invalidate;
pub mod inventory;
pub mod layout;
pub mod output;
pub mod pipeline;
pub mod preset;
pub mod request;

#[cfg(test)]
pub(crate) mod test_helpers;
