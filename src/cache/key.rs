use std::fmt;

use http::Method;
use url::Url;
use uuid::Uuid;

/// Stable identity of a cacheable request.
///
/// Derived as a version-5 UUID in the nil namespace over `"<METHOD> <URL>"`, so
/// the same request maps to the same key on every host and across restarts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey(Uuid);

impl CacheKey {
    pub fn derive(method: &Method, url: &Url) -> Self {
        let identity = format!("{method} {url}");
        Self(Uuid::new_v5(&Uuid::nil(), identity.as_bytes()))
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.hyphenated().fmt(f)
    }
}

/// Location of an artifact inside the store, relative to the store base URL.
///
/// Layout is `{repository}/{host}/{path…}/{query}/{key}`. The leading segments
/// only aid browsing; the trailing cache key is what makes the path unique.
/// Segments are kept percent-encoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorePath {
    segments: Vec<String>,
}

impl StorePath {
    pub fn new(repository: &str, url: &Url, key: &CacheKey) -> Self {
        let mut segments: Vec<String> = clean_segments(repository.split('/')).collect();

        if let Some(host) = url.host_str() {
            segments.push(host.trim_start_matches('[').trim_end_matches(']').to_string());
        }
        if let Some(path) = url.path_segments() {
            segments.extend(clean_segments(path));
        }
        if let Some(query) = url.query().filter(|query| !query.is_empty()) {
            segments.push(escape_query_segment(query));
        }
        segments.push(key.to_string());

        Self { segments }
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Terminal, uniqueness-bearing segment.
    pub fn key(&self) -> &str {
        self.segments.last().map(String::as_str).unwrap_or_default()
    }

    /// Joins this path onto the store base URL, dropping any query or fragment.
    pub fn to_url(&self, base: &Url) -> Url {
        let mut url = base.clone();
        let mut path = base.path().trim_end_matches('/').to_string();
        for segment in &self.segments {
            path.push('/');
            path.push_str(segment);
        }
        url.set_path(&path);
        url.set_query(None);
        url.set_fragment(None);
        url
    }
}

impl fmt::Display for StorePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.segments.join("/"))
    }
}

fn clean_segments<'a, I>(segments: I) -> impl Iterator<Item = String> + 'a
where
    I: Iterator<Item = &'a str> + 'a,
{
    segments
        .filter(|segment| !segment.is_empty() && *segment != "." && *segment != "..")
        .map(str::to_string)
}

// Queries may legally carry '/' and '?', neither of which may appear raw in a path segment.
fn escape_query_segment(query: &str) -> String {
    query.replace('/', "%2F").replace('?', "%3F")
}
