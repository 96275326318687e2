//! CLI output formatting.
//!
//! Each command has a `format_*` function that returns lines (pure, so tests
//! can assert on exact output) and a `print_*` wrapper that writes them to
//! stdout. Logging goes to stderr through `tracing`; these functions produce
//! the command's actual result.
//!
//! # Warm
//!
//! ```text
//! 001 photos/dawn.jpg
//!     thumb: cached
//!     card: generated
//! 002 photos/dusk.jpg
//!     thumb: failed (Source image not found: ...)
//!
//! 1 cached, 1 generated, 1 failed (3 total)
//! ```
//!
//! # Stats
//!
//! ```text
//! card      0 files        0 B
//! thumb    12 files   340.2 KB
//!
//! Orphaned
//! old       3 files    18.0 KB
//!
//! Total    15 files   358.2 KB
//! ```

use crate::cache::{CacheStats, Outcome, WarmItem};
use crate::invalidate::InvalidationReport;
use crate::inventory::{Inventory, PresetUsage};
use std::path::Path;

/// Format a 1-based positional index as 3-digit zero-padded.
fn format_index(pos: usize) -> String {
    format!("{:0>3}", pos)
}

fn indent(depth: usize) -> String {
    "    ".repeat(depth)
}

/// Human-readable byte count, one decimal above a kilobyte.
fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["KB", "MB", "GB", "TB"];
    if bytes < 1024 {
        return format!("{} B", bytes);
    }
    let mut value = bytes as f64 / 1024.0;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{:.1} {}", value, UNITS[unit])
}

/// Path relative to `root` for display, or as-is when it lies elsewhere.
fn display_path(path: &Path, root: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .display()
        .to_string()
}

// ============================================================================
// warm
// ============================================================================

fn warm_status(item: &WarmItem) -> String {
    match &item.result {
        Ok(Outcome::Hit) => "cached".to_string(),
        Ok(Outcome::Generated) => "generated".to_string(),
        Err(e) => format!("failed ({})", e),
    }
}

/// One header per source, one line per preset, then the totals.
///
/// Items for the same source are grouped in the order they first appear.
pub fn format_warm_output(items: &[WarmItem], static_root: &Path) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current: Option<&Path> = None;
    let mut index = 0;

    for item in items {
        if current != Some(item.source.as_path()) {
            index += 1;
            current = Some(item.source.as_path());
            lines.push(format!(
                "{} {}",
                format_index(index),
                display_path(&item.source, static_root)
            ));
        }
        lines.push(format!("{}{}: {}", indent(1), item.preset, warm_status(item)));
    }

    if !lines.is_empty() {
        lines.push(String::new());
    }
    lines.push(CacheStats::from_items(items).to_string());
    lines
}

pub fn print_warm_output(items: &[WarmItem], static_root: &Path) {
    for line in format_warm_output(items, static_root) {
        println!("{}", line);
    }
}

// ============================================================================
// stats
// ============================================================================

fn usage_line(name: &str, usage: &PresetUsage, width: usize) -> String {
    format!(
        "{:<width$} {:>5} files {:>10}",
        name,
        usage.files,
        format_bytes(usage.bytes),
        width = width
    )
}

pub fn format_inventory(inventory: &Inventory) -> Vec<String> {
    let width = inventory
        .presets
        .keys()
        .chain(inventory.orphans.keys())
        .map(|name| name.len())
        .chain(std::iter::once("Total".len()))
        .max()
        .unwrap_or(0);

    let mut lines: Vec<String> = inventory
        .presets
        .iter()
        .map(|(name, usage)| usage_line(name, usage, width))
        .collect();

    if !inventory.orphans.is_empty() {
        lines.push(String::new());
        lines.push("Orphaned".to_string());
        lines.extend(
            inventory
                .orphans
                .iter()
                .map(|(name, usage)| usage_line(name, usage, width)),
        );
    }

    lines.push(String::new());
    lines.push(usage_line("Total", &inventory.total(), width));
    if inventory.temp_files > 0 {
        lines.push(format!(
            "{} leftover temp file(s) from interrupted writes",
            inventory.temp_files
        ));
    }
    lines
}

pub fn print_inventory(inventory: &Inventory) {
    for line in format_inventory(inventory) {
        println!("{}", line);
    }
}

// ============================================================================
// invalidate
// ============================================================================

pub fn format_invalidation(report: &InvalidationReport, cache_root: &Path) -> Vec<String> {
    let mut lines = Vec::new();
    for path in &report.removed {
        lines.push(format!("removed {}", display_path(path, cache_root)));
    }
    for (path, error) in &report.failed {
        lines.push(format!("failed  {} ({})", display_path(path, cache_root), error));
    }
    lines.push(format!(
        "{} removed, {} not cached, {} failed",
        report.removed.len(),
        report.absent.len(),
        report.failed.len()
    ));
    lines
}

pub fn print_invalidation(report: &InvalidationReport, cache_root: &Path) {
    for line in format_invalidation(report, cache_root) {
        println!("{}", line);
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheError;
    use std::collections::BTreeMap;
    use std::io;
    use std::path::PathBuf;

    #[test]
    fn format_index_pads() {
        assert_eq!(format_index(1), "001");
        assert_eq!(format_index(100), "100");
    }

    #[test]
    fn format_bytes_units() {
        assert_eq!(format_bytes(0), "0 B");
        assert_eq!(format_bytes(1023), "1023 B");
        assert_eq!(format_bytes(1024), "1.0 KB");
        assert_eq!(format_bytes(1536), "1.5 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.0 MB");
    }

    fn item(source: &str, preset: &str, result: Result<Outcome, CacheError>) -> WarmItem {
        WarmItem {
            source: PathBuf::from("/srv/static").join(source),
            preset: preset.to_string(),
            result,
        }
    }

    #[test]
    fn warm_groups_by_source() {
        let items = vec![
            item("a.jpg", "thumb", Ok(Outcome::Hit)),
            item("a.jpg", "card", Ok(Outcome::Generated)),
            item("b.jpg", "thumb", Err(CacheError::InvalidPreset("x".into()))),
        ];
        let lines = format_warm_output(&items, Path::new("/srv/static"));
        assert_eq!(
            lines,
            vec![
                "001 a.jpg",
                "    thumb: cached",
                "    card: generated",
                "002 b.jpg",
                "    thumb: failed (Preset \"x\" does not exist)",
                "",
                "1 cached, 1 generated, 1 failed (3 total)",
            ]
        );
    }

    #[test]
    fn warm_empty() {
        let lines = format_warm_output(&[], Path::new("/srv/static"));
        assert_eq!(lines, vec!["0 cached, 0 generated (0 total)"]);
    }

    #[test]
    fn inventory_table() {
        let inventory = Inventory {
            presets: BTreeMap::from([
                ("card".to_string(), PresetUsage::default()),
                ("thumb".to_string(), PresetUsage { files: 2, bytes: 2048 }),
            ]),
            orphans: BTreeMap::from([("old".to_string(), PresetUsage { files: 1, bytes: 10 })]),
            temp_files: 1,
        };
        let lines = format_inventory(&inventory);
        assert_eq!(
            lines,
            vec![
                "card      0 files        0 B",
                "thumb     2 files     2.0 KB",
                "",
                "Orphaned",
                "old       1 files       10 B",
                "",
                "Total     3 files     2.0 KB",
                "1 leftover temp file(s) from interrupted writes",
            ]
        );
    }

    #[test]
    fn invalidation_summary() {
        let report = InvalidationReport {
            removed: vec![PathBuf::from("/c/thumb/a.jpg")],
            absent: vec![PathBuf::from("/c/card/a.jpg")],
            failed: vec![(
                PathBuf::from("/c/big/a.jpg"),
                io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
            )],
        };
        let lines = format_invalidation(&report, Path::new("/c"));
        assert_eq!(
            lines,
            vec![
                "removed thumb/a.jpg",
                "failed  big/a.jpg (denied)",
                "1 removed, 1 not cached, 1 failed",
            ]
        );
    }
}
