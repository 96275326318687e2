//! Disk usage and source discovery.
//!
//! The cache keeps no index, so statistics come from walking the tree:
//! every directory directly under `cache_root` is a preset, and every file
//! below it is an artifact. Directories that match no registered preset are
//! reported separately (left behind after a preset was removed from config).

use crate::imaging::{OutputFormat, engine::TEMP_PREFIX};
use crate::layout::Layout;
use crate::preset::PresetRegistry;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Artifact count and size of one preset directory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PresetUsage {
    pub files: u64,
    pub bytes: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Inventory {
    /// Every registered preset, including ones with nothing cached.
    pub presets: BTreeMap<String, PresetUsage>,
    /// Preset directories on disk with no registered preset.
    pub orphans: BTreeMap<String, PresetUsage>,
    /// Leftover temp files from interrupted writes.
    pub temp_files: u64,
}

impl Inventory {
    pub fn total(&self) -> PresetUsage {
        self.presets
            .values()
            .chain(self.orphans.values())
            .fold(PresetUsage::default(), |acc, u| PresetUsage {
                files: acc.files + u.files,
                bytes: acc.bytes + u.bytes,
            })
    }
}

fn is_temp_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with(TEMP_PREFIX))
}

/// Walk the cache root and tally artifacts per preset.
pub fn inventory(layout: &Layout, registry: &PresetRegistry) -> Inventory {
    let mut inventory = Inventory {
        presets: registry
            .names()
            .map(|name| (name.to_string(), PresetUsage::default()))
            .collect(),
        ..Inventory::default()
    };
    let root = layout.cache_root();

    for entry in WalkDir::new(root)
        .min_depth(2)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
    {
        if is_temp_file(entry.path()) {
            inventory.temp_files += 1;
            continue;
        }
        let Some(preset) = entry
            .path()
            .strip_prefix(root)
            .ok()
            .and_then(|rel| rel.components().next())
            .and_then(|c| c.as_os_str().to_str())
        else {
            continue;
        };
        let bytes = entry.metadata().map(|m| m.len()).unwrap_or(0);
        let usage = if registry.has(preset) {
            inventory.presets.entry(preset.to_string()).or_default()
        } else {
            inventory.orphans.entry(preset.to_string()).or_default()
        };
        usage.files += 1;
        usage.bytes += bytes;
    }
    inventory
}

/// Every image below the static root that the engine can write back out,
/// skipping the cache tree when it is nested inside the static root.
pub fn discover_sources(layout: &Layout) -> Vec<PathBuf> {
    let cache_root = layout.cache_root();
    let mut sources: Vec<PathBuf> = WalkDir::new(layout.static_root())
        .into_iter()
        .filter_entry(|e| e.path() != cache_root)
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| OutputFormat::from_path(p).is_some() && !is_temp_file(p))
        .collect();
    sources.sort();
    sources
}
