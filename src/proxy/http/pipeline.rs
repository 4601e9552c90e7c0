use std::net::SocketAddr;
use std::time::Instant;

use anyhow::Result;
use http::{Method, StatusCode};
use tokio::io::{AsyncRead, AsyncWrite, BufReader};
use tracing::{debug, warn};

use crate::cache::CacheStatus;
use crate::io_util::{flush_with_timeout, write_all_with_timeout};
use crate::logging::AccessLogBuilder;
use crate::proxy::{
    AppContext,
    forward_error::{classify_forward_error, log_forward_error},
    request::{ProxyRequest, parse_request_target},
};

use super::body::{BodyPlan, BodyTooLarge, read_request_body};
use super::codec::{Http1HeaderAccumulator, Http1RequestHead};
use super::respond::{respond_with_access_log, write_response};

pub enum ClientDisposition {
    Continue,
    Close,
}

pub struct RequestContext {
    pub method: Method,
    pub target: String,
    pub headers: Http1HeaderAccumulator,
    pub request_bytes: u64,
    pub start: Instant,
}

impl From<(Http1RequestHead, Instant)> for RequestContext {
    fn from((head, start): (Http1RequestHead, Instant)) -> Self {
        let request_bytes = head.total_bytes();
        Self {
            method: head.method,
            target: head.target,
            headers: head.headers,
            request_bytes,
            start,
        }
    }
}

/// Handles one non-CONNECT request: validates framing, reads the body, runs the
/// hooks around the upstream exchange and writes the response.
pub async fn handle_request<S>(
    reader: &mut BufReader<S>,
    peer: SocketAddr,
    app: &AppContext,
    ctx: RequestContext,
) -> Result<ClientDisposition>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let RequestContext {
        method,
        target,
        headers,
        request_bytes,
        start,
    } = ctx;
    let client_timeout = app.settings.client_timeout();
    let access_log = app.settings.access_log;
    let error_log = |host: &str| {
        access_log.then(|| {
            AccessLogBuilder::new(peer)
                .method(method.as_str())
                .scheme("http")
                .host(host)
                .path(target.clone())
                .cache(CacheStatus::Bypass.as_str())
        })
    };

    let expect_continue = match headers.expect_continue() {
        Ok(value) => value,
        Err(err) => {
            warn!(peer = %peer, error = %err, "unsupported Expect header");
            respond_with_access_log(
                reader.get_mut(),
                StatusCode::EXPECTATION_FAILED,
                b"expectation failed\r\n",
                client_timeout,
                request_bytes,
                start.elapsed(),
                error_log(headers.host().unwrap_or("")),
            )
            .await?;
            return Ok(ClientDisposition::Close);
        }
    };

    if !headers.is_chunked()
        && let Some(length) = headers.content_length()
        && length > app.settings.max_request_body_size
    {
        warn!(
            peer = %peer,
            length,
            max = app.settings.max_request_body_size,
            "request body exceeds limit"
        );
        respond_with_access_log(
            reader.get_mut(),
            StatusCode::PAYLOAD_TOO_LARGE,
            b"request body exceeds configured limit\r\n",
            client_timeout,
            request_bytes,
            start.elapsed(),
            error_log(headers.host().unwrap_or("")).map(|log| log.error_reason("body_too_large")),
        )
        .await?;
        return Ok(ClientDisposition::Close);
    }

    let body_plan = if headers.is_chunked() {
        BodyPlan::Chunked
    } else {
        match headers.content_length() {
            Some(length) if length > 0 => BodyPlan::Fixed(length),
            _ => BodyPlan::Empty,
        }
    };

    let url = match parse_request_target(&target, headers.host()) {
        Ok(url) => url,
        Err(err) => {
            warn!(peer = %peer, error = ?err, "failed to parse HTTP request target");
            respond_with_access_log(
                reader.get_mut(),
                StatusCode::BAD_REQUEST,
                b"invalid request target\r\n",
                client_timeout,
                request_bytes,
                start.elapsed(),
                error_log(headers.host().unwrap_or("")).map(|log| log.error_reason("bad_target")),
            )
            .await?;
            return Ok(ClientDisposition::Close);
        }
    };
    let close_after = headers.wants_connection_close();

    if expect_continue && body_plan != BodyPlan::Empty {
        write_all_with_timeout(
            reader.get_mut(),
            b"HTTP/1.1 100 Continue\r\n\r\n",
            client_timeout,
            "writing 100 Continue",
        )
        .await?;
        flush_with_timeout(reader.get_mut(), client_timeout, "flushing 100 Continue").await?;
    }

    let (body, body_bytes) = match read_request_body(
        reader,
        body_plan,
        client_timeout,
        peer,
        app.settings.max_request_body_size,
    )
    .await
    {
        Ok(read) => read,
        Err(err) => {
            let over_limit = err.downcast_ref::<BodyTooLarge>().map(|body| body.bytes_read);
            let (status, message, reason) = if over_limit.is_some() {
                (
                    StatusCode::PAYLOAD_TOO_LARGE,
                    &b"request body exceeds configured limit\r\n"[..],
                    "body_too_large",
                )
            } else {
                (
                    StatusCode::BAD_REQUEST,
                    &b"invalid request body\r\n"[..],
                    "bad_body",
                )
            };
            warn!(
                peer = %peer,
                bytes_read = ?over_limit,
                error = %err,
                "failed to read request body"
            );
            respond_with_access_log(
                reader.get_mut(),
                status,
                message,
                client_timeout,
                request_bytes,
                start.elapsed(),
                error_log(url.host_str().unwrap_or("")).map(|log| log.error_reason(reason)),
            )
            .await?;
            return Ok(ClientDisposition::Close);
        }
    };
    let bytes_in = request_bytes.saturating_add(body_bytes);

    let mut request = ProxyRequest::new(method, url, headers.into_forward_headers(), body);
    let log_builder = access_log.then(|| request.access_log_builder(peer));

    let cache_status = app.hooks.on_request(&mut request).await;
    let upstream = match cache_status {
        CacheStatus::Hit => "store",
        CacheStatus::Miss | CacheStatus::Bypass => "origin",
    };
    let log_builder = log_builder.map(|log| log.cache(cache_status.as_str()).upstream(upstream));

    let forwarded = async {
        let response = app.transport.send(&request).await?;
        let response = app.hooks.on_response(&request, response).await?;
        anyhow::Ok(response)
    }
    .await;

    let response = match forwarded {
        Ok(response) => response,
        Err(err) => {
            let kind = classify_forward_error(&err);
            log_forward_error(&kind, peer, request.host(), &err);
            respond_with_access_log(
                reader.get_mut(),
                kind.status(),
                kind.body(),
                client_timeout,
                bytes_in,
                start.elapsed(),
                log_builder.map(|log| {
                    log.error_reason(kind.reason())
                        .error_detail(format!("{err:#}"))
                }),
            )
            .await?;
            return Ok(ClientDisposition::Close);
        }
    };

    let status = response.status();
    match write_response(
        reader.get_mut(),
        &request.method,
        response,
        close_after,
        client_timeout,
    )
    .await
    {
        Ok(bytes_out) => {
            if let Some(log) = log_builder {
                log.status(status)
                    .bytes(bytes_in, bytes_out)
                    .elapsed(start.elapsed())
                    .log();
            }
        }
        Err(err) => {
            debug!(peer = %peer, error = ?err, "failed to relay response to client");
            if let Some(log) = log_builder {
                log.status(status)
                    .bytes(bytes_in, 0)
                    .elapsed(start.elapsed())
                    .error_reason("relay_failed")
                    .error_detail(format!("{err:#}"))
                    .log();
            }
            return Ok(ClientDisposition::Close);
        }
    }

    if close_after {
        Ok(ClientDisposition::Close)
    } else {
        Ok(ClientDisposition::Continue)
    }
}
