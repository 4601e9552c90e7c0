use std::time::Duration;

use anyhow::{Context, Result, bail};
use http::{HeaderMap, Method, StatusCode, header};
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::io_util::{flush_with_timeout, write_all_with_timeout};
use crate::logging::AccessLogBuilder;
use crate::proxy::headers::{connection_tokens, is_hop_by_hop};
use crate::util::timeout_with_context;

/// Writes a synthesized plain-text response, closes the stream and emits the
/// access log entry when one is supplied.
#[allow(clippy::too_many_arguments)]
pub async fn respond_with_access_log<S>(
    stream: &mut S,
    status: StatusCode,
    body: &[u8],
    timeout_dur: Duration,
    bytes_in: u64,
    elapsed: Duration,
    log_builder: Option<AccessLogBuilder>,
) -> Result<()>
where
    S: AsyncWrite + Unpin,
{
    let bytes_out = send_response(stream, status, body, timeout_dur).await?;
    shutdown_stream(stream, timeout_dur).await?;
    if let Some(log_builder) = log_builder {
        log_builder
            .status(status)
            .bytes(bytes_in, bytes_out as u64)
            .elapsed(elapsed)
            .log();
    }
    Ok(())
}

pub async fn send_response<S>(
    stream: &mut S,
    status: StatusCode,
    body: &[u8],
    timeout_dur: Duration,
) -> Result<usize>
where
    S: AsyncWrite + Unpin,
{
    let header = format!(
        "HTTP/1.1 {} {}\r\nContent-Length: {}\r\nConnection: close\r\nContent-Type: text/plain; charset=utf-8\r\n\r\n",
        status.as_u16(),
        status.canonical_reason().unwrap_or("Unknown"),
        body.len()
    );
    write_all_with_timeout(
        stream,
        header.as_bytes(),
        timeout_dur,
        "writing response header",
    )
    .await?;
    let mut written = header.len();
    if !body.is_empty() {
        write_all_with_timeout(stream, body, timeout_dur, "writing response body").await?;
        written += body.len();
    }
    Ok(written)
}

pub async fn shutdown_stream<S>(stream: &mut S, timeout_dur: Duration) -> Result<()>
where
    S: AsyncWrite + Unpin,
{
    timeout_with_context(
        timeout_dur,
        stream.shutdown(),
        "shutting down client stream",
    )
    .await
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ResponseFraming {
    NoBody,
    Fixed(u64),
    Chunked,
}

fn response_framing(method: &Method, status: StatusCode, headers: &HeaderMap) -> ResponseFraming {
    if *method == Method::HEAD
        || status.is_informational()
        || status == StatusCode::NO_CONTENT
        || status == StatusCode::NOT_MODIFIED
    {
        return ResponseFraming::NoBody;
    }
    headers
        .get(header::CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<u64>().ok())
        .map(ResponseFraming::Fixed)
        .unwrap_or(ResponseFraming::Chunked)
}

/// Serializes the status line and relayable headers of an upstream response.
fn encode_response_head(
    status: StatusCode,
    headers: &HeaderMap,
    framing: ResponseFraming,
    close: bool,
) -> Vec<u8> {
    let mut head = format!(
        "HTTP/1.1 {} {}\r\n",
        status.as_u16(),
        status.canonical_reason().unwrap_or("Unknown")
    )
    .into_bytes();
    let tokens = connection_tokens(headers);

    for (name, value) in headers {
        let name = name.as_str();
        if is_hop_by_hop(name) || tokens.contains(name) {
            continue;
        }
        if framing == ResponseFraming::Chunked && name == "content-length" {
            continue;
        }
        head.extend_from_slice(name.as_bytes());
        head.extend_from_slice(b": ");
        head.extend_from_slice(value.as_bytes());
        head.extend_from_slice(b"\r\n");
    }
    if framing == ResponseFraming::Chunked {
        head.extend_from_slice(b"Transfer-Encoding: chunked\r\n");
    }
    if close {
        head.extend_from_slice(b"Connection: close\r\n");
    }
    head.extend_from_slice(b"\r\n");
    head
}

/// Streams an upstream response to the client, re-framing the body when the
/// upstream length is unknown. Returns the number of bytes written.
pub async fn write_response<S>(
    stream: &mut S,
    method: &Method,
    mut response: reqwest::Response,
    close: bool,
    timeout_dur: Duration,
) -> Result<u64>
where
    S: AsyncWrite + Unpin,
{
    let status = response.status();
    let framing = response_framing(method, status, response.headers());
    let head = encode_response_head(status, response.headers(), framing, close);
    write_all_with_timeout(stream, &head, timeout_dur, "writing response header").await?;
    let mut written = head.len() as u64;

    if framing == ResponseFraming::NoBody {
        flush_with_timeout(stream, timeout_dur, "flushing response").await?;
        return Ok(written);
    }

    let mut body_bytes = 0u64;
    while let Some(chunk) = response
        .chunk()
        .await
        .context("reading upstream response body")?
    {
        if chunk.is_empty() {
            continue;
        }
        body_bytes = body_bytes.saturating_add(chunk.len() as u64);
        if framing == ResponseFraming::Chunked {
            let size_line = format!("{:x}\r\n", chunk.len());
            write_all_with_timeout(stream, size_line.as_bytes(), timeout_dur, "writing chunk size")
                .await?;
            write_all_with_timeout(stream, &chunk, timeout_dur, "writing chunk data").await?;
            write_all_with_timeout(stream, b"\r\n", timeout_dur, "writing chunk terminator")
                .await?;
            written = written.saturating_add(size_line.len() as u64 + chunk.len() as u64 + 2);
        } else {
            write_all_with_timeout(stream, &chunk, timeout_dur, "writing response body").await?;
            written = written.saturating_add(chunk.len() as u64);
        }
    }

    match framing {
        ResponseFraming::Chunked => {
            write_all_with_timeout(stream, b"0\r\n\r\n", timeout_dur, "writing final chunk")
                .await?;
            written = written.saturating_add(5);
        }
        ResponseFraming::Fixed(expected) if expected != body_bytes => {
            bail!("upstream body length {body_bytes} does not match Content-Length {expected}");
        }
        _ => {}
    }
    flush_with_timeout(stream, timeout_dur, "flushing response").await?;
    Ok(written)
}
