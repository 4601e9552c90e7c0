use std::net::SocketAddr;

use anyhow::{Context, Result, anyhow, bail, ensure};
use bytes::Bytes;
use http::{HeaderMap, Method};
use url::Url;

use crate::logging::AccessLogBuilder;

/// A client request after parsing, as seen by the proxy hooks and the outbound
/// transport.
#[derive(Debug, Clone)]
pub struct ProxyRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl ProxyRequest {
    pub fn new(method: Method, url: Url, headers: HeaderMap, body: Bytes) -> Self {
        Self {
            method,
            url,
            headers,
            body,
        }
    }

    pub fn host(&self) -> &str {
        self.url.host_str().unwrap_or_default()
    }

    pub fn access_log_builder(&self, peer: SocketAddr) -> AccessLogBuilder {
        AccessLogBuilder::new(peer)
            .method(self.method.as_str())
            .scheme(self.url.scheme())
            .host(self.host())
            .path(self.url.path())
    }
}

/// Resolves an HTTP/1.1 request target into an absolute origin URL.
///
/// Absolute-form targets are used as-is; origin-form targets are combined with
/// the `Host` header and treated as plain `http`.
pub fn parse_request_target(target: &str, host_header: Option<&str>) -> Result<Url> {
    if target == "*" {
        bail!("asterisk-form request target is not supported by a forward proxy");
    }

    if target.starts_with('/') {
        let host_header = host_header.ok_or_else(|| {
            anyhow!("request missing Host header required for origin-form request")
        })?;
        let authority = parse_host_header(host_header)?;
        let url = Url::parse(&format!("http://{authority}{target}"))
            .with_context(|| format!("invalid request target '{target}'"))?;
        return Ok(url);
    }

    let url = Url::parse(target).with_context(|| format!("invalid request target '{target}'"))?;
    match url.scheme() {
        "http" | "https" => {}
        other => bail!("unsupported scheme '{other}'"),
    }
    ensure!(
        url.host_str().is_some_and(|host| !host.is_empty()),
        "request target missing host"
    );
    ensure!(
        url.username().is_empty() && url.password().is_none(),
        "request target must not contain userinfo"
    );
    Ok(url)
}

/// Validates a Host header value, returning it lower-cased.
pub fn parse_host_header(value: &str) -> Result<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        bail!("empty Host header");
    }
    if trimmed.chars().any(|c| c.is_whitespace()) {
        bail!("authority must not contain whitespace");
    }
    if trimmed.contains('@') {
        bail!("authority must not contain userinfo");
    }
    if trimmed.contains('/')
        || trimmed.contains('?')
        || trimmed.contains('#')
        || trimmed.contains('\\')
    {
        bail!("authority must not contain path or query");
    }
    Ok(trimmed.to_ascii_lowercase())
}
