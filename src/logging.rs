use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use anyhow::{Result, anyhow};
use http::StatusCode;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing_subscriber::{EnvFilter, fmt};

use crate::cli::LogFormat;

const DEFAULT_FILTER: &str = "info";

pub fn init_logger(format: LogFormat) -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    match format {
        LogFormat::Json => fmt::fmt()
            .with_env_filter(filter)
            .json()
            .with_current_span(false)
            .with_span_list(false)
            .with_thread_ids(false)
            .with_thread_names(false)
            .try_init()
            .map_err(|err| anyhow!(err))?,
        LogFormat::Text => fmt::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .compact()
            .try_init()
            .map_err(|err| anyhow!(err))?,
    }

    Ok(())
}

#[derive(Debug, Clone)]
pub struct AccessLogEvent {
    pub client_ip: IpAddr,
    pub client_port: u16,
    pub method: String,
    pub scheme: String,
    pub host: String,
    pub path: String,
    pub cache: Option<String>,
    pub status: u16,
    pub bytes_in: u64,
    pub bytes_out: u64,
    pub elapsed_ms: u128,
    pub upstream: Option<String>,
    pub error_reason: Option<String>,
    pub error_detail: Option<String>,
}

/// Accumulates per-request fields and emits a single `access_log` event.
/// Callers only construct one when the `access_log` setting is on.
#[derive(Debug)]
pub struct AccessLogBuilder {
    event: AccessLogEvent,
}

impl AccessLogBuilder {
    pub fn new(peer: SocketAddr) -> Self {
        Self {
            event: AccessLogEvent {
                client_ip: peer.ip(),
                client_port: peer.port(),
                method: String::new(),
                scheme: String::new(),
                host: String::new(),
                path: String::new(),
                cache: None,
                status: 0,
                bytes_in: 0,
                bytes_out: 0,
                elapsed_ms: 0,
                upstream: None,
                error_reason: None,
                error_detail: None,
            },
        }
    }

    pub fn method(mut self, method: impl Into<String>) -> Self {
        self.event.method = method.into();
        self
    }

    pub fn scheme(mut self, scheme: impl Into<String>) -> Self {
        self.event.scheme = scheme.into();
        self
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.event.host = host.into();
        self
    }

    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.event.path = path.into();
        self
    }

    pub fn cache(mut self, value: impl Into<String>) -> Self {
        self.event.cache = Some(value.into());
        self
    }

    pub fn status(mut self, status: StatusCode) -> Self {
        self.event.status = status.as_u16();
        self
    }

    pub fn bytes(mut self, in_bytes: u64, out_bytes: u64) -> Self {
        self.event.bytes_in = in_bytes;
        self.event.bytes_out = out_bytes;
        self
    }

    pub fn elapsed(mut self, elapsed: Duration) -> Self {
        self.event.elapsed_ms = elapsed.as_millis();
        self
    }

    pub fn upstream(mut self, upstream: impl Into<String>) -> Self {
        self.event.upstream = Some(upstream.into());
        self
    }

    pub fn error_reason(mut self, reason: impl Into<String>) -> Self {
        self.event.error_reason = Some(reason.into());
        self
    }

    pub fn error_detail(mut self, detail: impl Into<String>) -> Self {
        self.event.error_detail = Some(detail.into());
        self
    }

    pub fn build(self) -> AccessLogEvent {
        self.event
    }

    pub fn log(self) {
        log_access(self.build());
    }

    pub fn for_connect(peer: SocketAddr, authority: impl Into<String>) -> Self {
        Self::new(peer)
            .method("CONNECT")
            .scheme("https")
            .host(authority)
            .path("")
            .cache("BYPASS")
    }
}

pub fn log_access(event: AccessLogEvent) {
    let AccessLogEvent {
        client_ip,
        client_port,
        method,
        scheme,
        host,
        path,
        cache,
        status,
        bytes_in,
        bytes_out,
        elapsed_ms,
        upstream,
        error_reason,
        error_detail,
    } = event;

    let ts = OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_default();

    tracing::info!(
        target = "access_log",
        ts,
        client_ip = %client_ip,
        method,
        scheme,
        host,
        path,
        cache = cache.as_deref(),
        status,
        bytes_in,
        bytes_out,
        elapsed_ms,
        client_port,
        upstream = upstream.as_deref(),
        error_reason = error_reason.as_deref(),
        error_detail = error_detail.as_deref()
    );
}
