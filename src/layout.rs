//! Mapping between sources, artifacts and their URLs.
//!
//! ```text
//! static_root/<relative>           <->  static_url/<relative>
//! cache_root/<preset>/<relative>   <->  cache_url/<preset>/<relative>
//! ```
//!
//! Every lookup is reduced to a normalized `<relative>` path first. All
//! normalization is lexical (no filesystem access), so a path can be resolved
//! whether or not the file exists, and a `..` that would climb out of the
//! static root is rejected instead of followed.

use crate::config::CacheConfig;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LayoutError {
    #[error("Source path {} is outside the static root {}", path.display(), root.display())]
    OutsideRoot { path: PathBuf, root: PathBuf },
    #[error("Source path {} escapes the static root", .0.display())]
    Escapes(PathBuf),
    #[error("Source path is empty")]
    Empty,
    #[error("URL {url:?} does not start with {prefix:?}")]
    UrlPrefix { url: String, prefix: String },
}

/// A source image, by file path or by public URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceRef<'a> {
    /// Absolute, or relative to the static root.
    Path(&'a Path),
    /// Under `static_url`.
    Url(&'a str),
}

/// Everything derived from one `(source, preset)` pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPaths {
    pub preset: String,
    /// Path below the static root (and below `cache_root/<preset>`).
    pub relative: PathBuf,
    pub source: PathBuf,
    pub cache_path: PathBuf,
    pub cache_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    static_root: PathBuf,
    static_url: String,
    cache_root: PathBuf,
    cache_url: String,
}

impl Layout {
    pub fn new(
        static_root: impl AsRef<Path>,
        static_url: &str,
        cache_root: impl AsRef<Path>,
        cache_url: &str,
    ) -> Self {
        Self {
            static_root: lexical_normalize(static_root.as_ref()),
            static_url: static_url.trim_end_matches('/').to_string(),
            cache_root: lexical_normalize(cache_root.as_ref()),
            cache_url: cache_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(
            &config.static_root,
            &config.static_url,
            &config.cache_root,
            &config.cache_url,
        )
    }

    pub fn static_root(&self) -> &Path {
        &self.static_root
    }

    pub fn cache_root(&self) -> &Path {
        &self.cache_root
    }

    pub fn cache_url_prefix(&self) -> &str {
        &self.cache_url
    }

    /// Directory holding every artifact of `preset`.
    pub fn preset_dir(&self, preset: &str) -> PathBuf {
        self.cache_root.join(preset)
    }

    /// Normalized path of `source` below the static root.
    pub fn relative(&self, source: SourceRef<'_>) -> Result<PathBuf, LayoutError> {
        match source {
            SourceRef::Path(path) => self.relative_from_path(path),
            SourceRef::Url(url) => self.relative_from_url(url),
        }
    }

    /// Absolute paths must lie under the static root. Relative paths are
    /// taken as relative to it; a leading static root prefix is accepted.
    pub fn relative_from_path(&self, path: &Path) -> Result<PathBuf, LayoutError> {
        if path.has_root() {
            let normalized = lexical_normalize(path);
            let relative = normalized.strip_prefix(&self.static_root).map_err(|_| {
                LayoutError::OutsideRoot {
                    path: path.to_path_buf(),
                    root: self.static_root.clone(),
                }
            })?;
            return normalize_relative(relative);
        }
        let relative = lexical_normalize(path);
        let relative = relative
            .strip_prefix(&self.static_root)
            .unwrap_or(relative.as_path());
        normalize_relative(relative)
    }

    /// The part of `url` after `static_url`, as a relative path.
    pub fn relative_from_url(&self, url: &str) -> Result<PathBuf, LayoutError> {
        let rest = strip_url_prefix(url, &self.static_url).ok_or_else(|| LayoutError::UrlPrefix {
            url: url.to_string(),
            prefix: self.static_url.clone(),
        })?;
        normalize_relative(Path::new(rest))
    }

    /// Derive every path and URL for an already-normalized `relative`.
    pub fn resolve(&self, preset: &str, relative: &Path) -> ResolvedPaths {
        ResolvedPaths {
            preset: preset.to_string(),
            relative: relative.to_path_buf(),
            source: self.static_root.join(relative),
            cache_path: self.cache_path(preset, relative),
            cache_url: self.cache_url(preset, relative),
        }
    }

    pub fn cache_path(&self, preset: &str, relative: &Path) -> PathBuf {
        self.preset_dir(preset).join(relative)
    }

    pub fn cache_url(&self, preset: &str, relative: &Path) -> String {
        format!("{}/{}/{}", self.cache_url, preset, url_path(relative))
    }

    pub fn static_url(&self, relative: &Path) -> String {
        format!("{}/{}", self.static_url, url_path(relative))
    }
}

/// `url` minus `prefix` and the `/` that follows it.
pub(crate) fn strip_url_prefix<'a>(url: &'a str, prefix: &str) -> Option<&'a str> {
    url.strip_prefix(prefix)?.strip_prefix('/')
}

fn url_path(relative: &Path) -> String {
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Resolve `.` and `..` without touching the filesystem. `..` at the root
/// stays at the root; leading `..` of a relative path is kept.
pub fn lexical_normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                let popped = matches!(out.components().next_back(), Some(Component::Normal(_)))
                    && out.pop();
                if !popped && !out.has_root() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Normalize a path that must stay below its root.
fn normalize_relative(path: &Path) -> Result<PathBuf, LayoutError> {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    return Err(LayoutError::Escapes(path.to_path_buf()));
                }
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(LayoutError::Escapes(path.to_path_buf()));
            }
        }
    }
    if out.as_os_str().is_empty() {
        return Err(LayoutError::Empty);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout() -> Layout {
        Layout::new("/srv/static", "/static/", "/srv/cache", "https://cdn.example.com/ic")
    }

    #[test]
    fn resolve_derives_paths_and_urls() {
        let resolved = layout().resolve("thumb", Path::new("photos/a.jpg"));
        assert_eq!(resolved.source, PathBuf::from("/srv/static/photos/a.jpg"));
        assert_eq!(resolved.cache_path, PathBuf::from("/srv/cache/thumb/photos/a.jpg"));
        assert_eq!(resolved.cache_url, "https://cdn.example.com/ic/thumb/photos/a.jpg");
    }

    #[test]
    fn absolute_path_under_root() {
        let rel = layout()
            .relative_from_path(Path::new("/srv/static/photos/./x/../a.jpg"))
            .unwrap();
        assert_eq!(rel, PathBuf::from("photos/a.jpg"));
    }

    #[test]
    fn absolute_path_outside_root() {
        let result = layout().relative_from_path(Path::new("/etc/passwd"));
        assert!(matches!(result, Err(LayoutError::OutsideRoot { .. })));

        let result = layout().relative_from_path(Path::new("/srv/static/../secret.jpg"));
        assert!(matches!(result, Err(LayoutError::OutsideRoot { .. })));
    }

    #[test]
    fn relative_path_is_under_root() {
        let rel = layout().relative_from_path(Path::new("photos/a.jpg")).unwrap();
        assert_eq!(rel, PathBuf::from("photos/a.jpg"));
    }

    #[test]
    fn relative_path_escaping_root_rejected() {
        let result = layout().relative_from_path(Path::new("photos/../../a.jpg"));
        assert!(matches!(result, Err(LayoutError::Escapes(_))));
    }

    #[test]
    fn relative_static_root_prefix_is_stripped() {
        let layout = Layout::new("./static", "/static", "cache", "/cache");
        let rel = layout
            .relative_from_path(Path::new("static/photos/a.jpg"))
            .unwrap();
        assert_eq!(rel, PathBuf::from("photos/a.jpg"));
        assert_eq!(
            layout.resolve("p", &rel).cache_path,
            PathBuf::from("cache/p/photos/a.jpg")
        );
    }

    #[test]
    fn empty_path_rejected() {
        assert_eq!(
            layout().relative_from_path(Path::new("/srv/static")),
            Err(LayoutError::Empty)
        );
        assert_eq!(layout().relative_from_path(Path::new(".")), Err(LayoutError::Empty));
    }

    #[test]
    fn url_maps_to_relative() {
        let rel = layout().relative_from_url("/static/photos/a.jpg").unwrap();
        assert_eq!(rel, PathBuf::from("photos/a.jpg"));
        assert_eq!(layout().static_url(&rel), "/static/photos/a.jpg");
    }

    #[test]
    fn url_prefix_must_match_whole_segment() {
        assert!(matches!(
            layout().relative_from_url("/staticfiles/a.jpg"),
            Err(LayoutError::UrlPrefix { .. })
        ));
        assert!(matches!(
            layout().relative_from_url("/other/a.jpg"),
            Err(LayoutError::UrlPrefix { .. })
        ));
    }

    #[test]
    fn url_escaping_root_rejected() {
        let result = layout().relative_from_url("/static/../config.toml");
        assert!(matches!(result, Err(LayoutError::Escapes(_))));
    }

    #[test]
    fn source_ref_dispatch() {
        let layout = layout();
        assert_eq!(
            layout.relative(SourceRef::Url("/static/a.png")).unwrap(),
            layout.relative(SourceRef::Path(Path::new("/srv/static/a.png"))).unwrap()
        );
    }

    #[test]
    fn lexical_normalize_cases() {
        assert_eq!(lexical_normalize(Path::new("/a/b/../c")), PathBuf::from("/a/c"));
        assert_eq!(lexical_normalize(Path::new("/../a")), PathBuf::from("/a"));
        assert_eq!(lexical_normalize(Path::new("./a/./b")), PathBuf::from("a/b"));
        assert_eq!(lexical_normalize(Path::new("../a")), PathBuf::from("../a"));
    }
}
