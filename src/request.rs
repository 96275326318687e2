//! Cache URL requests.
//!
//! A front end that receives `GET <cache_url>/<preset>/<relative>.<ext>` for
//! an artifact that is not on disk hands the URL to [`serve`], which parses
//! it, generates the artifact and returns the encoded bytes with their
//! content type. Routing, headers and status codes stay with the caller;
//! [`RequestError::class`] says which kind of failure to report.

use crate::cache::{CacheError, CacheResolver, ErrorClass, Outcome};
use crate::layout::{SourceRef, strip_url_prefix};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RequestError {
    #[error("Malformed cache URL: {0:?}")]
    Malformed(String),
    #[error(transparent)]
    Cache(#[from] CacheError),
}

impl RequestError {
    pub fn class(&self) -> ErrorClass {
        match self {
            RequestError::Malformed(_) => ErrorClass::BadRequest,
            RequestError::Cache(err) => err.class(),
        }
    }
}

/// A parsed cache URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheRequest {
    pub preset: String,
    /// Source path below the static root, extension included.
    pub relative: PathBuf,
    /// Lowercased extension; selects the output format.
    pub extension: String,
}

/// Split `<prefix>/<preset>/<relative>.<ext>`.
///
/// Any query string or fragment is ignored. The extension is everything after
/// the last dot of the final segment.
pub fn parse_cache_url(prefix: &str, url: &str) -> Result<CacheRequest, RequestError> {
    let malformed = || RequestError::Malformed(url.to_string());
    let path = url.split(['?', '#']).next().unwrap_or_default();
    let rest = strip_url_prefix(path, prefix.trim_end_matches('/')).ok_or_else(malformed)?;
    let (preset, relative) = rest.split_once('/').ok_or_else(malformed)?;
    let file_name = relative.rsplit('/').next().unwrap_or_default();
    let (stem, extension) = file_name.rsplit_once('.').ok_or_else(malformed)?;
    if preset.is_empty() || stem.is_empty() || extension.is_empty() {
        return Err(malformed());
    }
    Ok(CacheRequest {
        preset: preset.to_string(),
        relative: PathBuf::from(relative),
        extension: extension.to_ascii_lowercase(),
    })
}

/// Bytes to send back for a cache URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub bytes: Vec<u8>,
    pub content_type: &'static str,
    pub outcome: Outcome,
}

/// Resolve a cache URL to encoded image bytes.
///
/// The artifact is read from disk when fresh, otherwise generated and,
/// if the resolver persists, saved for the next request.
pub fn serve(resolver: &CacheResolver, url: &str) -> Result<Response, RequestError> {
    let request = parse_cache_url(resolver.layout().cache_url_prefix(), url)?;
    let paths = resolver.resolve_paths(SourceRef::Path(&request.relative), &request.preset)?;
    let rendered = resolver.render(&paths)?;
    Ok(Response {
        bytes: rendered.bytes,
        content_type: rendered.format.mime_type(),
        outcome: rendered.outcome,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imaging::engine::tests::MockEngine;
    use crate::test_helpers::CacheFixture;
    use std::sync::Arc;

    #[test]
    fn parse_splits_preset_path_and_extension() {
        let req = parse_cache_url("/cache", "/cache/thumb/photos/2024/a.b.JPG").unwrap();
        assert_eq!(req.preset, "thumb");
        assert_eq!(req.relative, PathBuf::from("photos/2024/a.b.JPG"));
        assert_eq!(req.extension, "jpg");
    }

    #[test]
    fn parse_ignores_query() {
        let req = parse_cache_url("/cache/", "/cache/thumb/a.png?v=3").unwrap();
        assert_eq!(req.relative, PathBuf::from("a.png"));
    }

    #[test]
    fn parse_rejects_malformed() {
        for url in [
            "/other/thumb/a.jpg",
            "/cache/thumb",
            "/cache/thumb/noext",
            "/cache//a.jpg",
            "/cache/thumb/dir.d/file",
            "/cache/thumb/.jpg",
            "/cachething/thumb/a.jpg",
        ] {
            let err = parse_cache_url("/cache", url).unwrap_err();
            assert!(matches!(err, RequestError::Malformed(_)), "{url}");
            assert_eq!(err.class(), ErrorClass::BadRequest);
        }
    }

    fn fixture_and_resolver(extra: &str) -> (CacheFixture, CacheResolver, Arc<MockEngine>) {
        let fixture = CacheFixture::new(&format!(
            "{extra}[presets.thumb]\nthumbnail = [100, 100]\n"
        ));
        let engine = Arc::new(MockEngine::new());
        let resolver = CacheResolver::with_engine(&fixture.config, engine.clone()).unwrap();
        (fixture, resolver, engine)
    }

    #[test]
    fn serve_generates_and_persists() {
        let (fixture, resolver, _) = fixture_and_resolver("");
        fixture.write_source("photos/a.jpg");

        let response = serve(&resolver, "/cache/thumb/photos/a.jpg").unwrap();

        assert_eq!(response.content_type, "image/jpeg");
        assert_eq!(response.bytes, b"mock Jpeg 100x50");
        assert_eq!(response.outcome, Outcome::Generated);
        assert!(fixture.cache_path("thumb", "photos/a.jpg").is_file());
    }

    #[test]
    fn serve_error_classes() {
        let (fixture, resolver, _) = fixture_and_resolver("");
        fixture.write_source("a.jpg");

        let unknown_preset = serve(&resolver, "/cache/large/a.jpg").unwrap_err();
        assert_eq!(unknown_preset.class(), ErrorClass::BadRequest);

        let missing = serve(&resolver, "/cache/thumb/missing.jpg").unwrap_err();
        assert_eq!(missing.class(), ErrorClass::NotFound);

        let escape = serve(&resolver, "/cache/thumb/../../etc/passwd.jpg").unwrap_err();
        assert_eq!(escape.class(), ErrorClass::BadRequest);
    }

    #[test]
    fn serve_without_persist() {
        let (fixture, resolver, _) = fixture_and_resolver("persist = false\n");
        fixture.write_source("a.jpg");

        let response = serve(&resolver, "/cache/thumb/a.jpg").unwrap();

        assert_eq!(response.outcome, Outcome::Generated);
        assert!(!fixture.cache_path("thumb", "a.jpg").exists());
    }
}
