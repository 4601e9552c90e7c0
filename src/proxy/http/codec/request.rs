use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail, ensure};
use http::Method;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::time::Instant;
use tracing::debug;

use super::headers::Http1HeaderAccumulator;
use super::line::{LineBudget, LineTooLong, read_line};

pub(crate) struct Http1RequestHead {
    pub method: Method,
    pub target: String,
    pub headers: Http1HeaderAccumulator,
    pub request_line_bytes: usize,
}

impl Http1RequestHead {
    pub fn total_bytes(&self) -> u64 {
        (self.request_line_bytes + self.headers.total_bytes()) as u64
    }
}

/// Reads the next request line and header section from a client connection.
///
/// Returns `Ok(None)` when the client goes idle past `idle_timeout` or closes the
/// connection between requests. Once the first byte arrives, the whole head must
/// be received within `header_timeout`.
pub(crate) async fn read_http1_request_head<S>(
    reader: &mut BufReader<S>,
    peer: SocketAddr,
    idle_timeout: Duration,
    header_timeout: Duration,
    max_header_bytes: usize,
) -> Result<Option<Http1RequestHead>>
where
    S: AsyncRead + Unpin,
{
    let available = match tokio::time::timeout(idle_timeout, reader.fill_buf()).await {
        Ok(Ok(buf)) => buf,
        Ok(Err(err)) => {
            return Err(err).with_context(|| format!("waiting for request data from {peer}"));
        }
        Err(_) => return Ok(None),
    };
    if available.is_empty() {
        return Ok(None);
    }

    let budget = LineBudget::Deadline(Instant::now() + header_timeout);
    let mut request_line = String::new();
    let request_line_bytes =
        read_line(reader, &mut request_line, budget, peer, max_header_bytes)
            .await
            .map_err(|err| rename_line_error(err, max_header_bytes))?;
    if request_line_bytes == 0 {
        debug!(peer = %peer, "connection closed before request line");
        return Ok(None);
    }
    let request_line = request_line.trim_end_matches(['\r', '\n']);
    if request_line.is_empty() {
        bail!("empty request line from {peer}");
    }

    let mut parts = request_line.split_whitespace();
    let method_str = parts
        .next()
        .ok_or_else(|| anyhow!("malformed request line: missing method"))?;
    let target = parts
        .next()
        .ok_or_else(|| anyhow!("malformed request line: missing target"))?;
    let version = parts
        .next()
        .ok_or_else(|| anyhow!("malformed request line: missing version"))?;
    if parts.next().is_some() {
        bail!("malformed request line: unexpected data");
    }
    match version {
        "HTTP/1.1" => {}
        "HTTP/1.0" => bail!("HTTP/1.0 requests are not supported"),
        other => bail!("invalid HTTP version '{other}'"),
    }

    let method = Method::from_bytes(method_str.as_bytes())
        .with_context(|| format!("invalid method '{method_str}'"))?;
    let target = target.to_string();

    let remaining = max_header_bytes
        .checked_sub(request_line_bytes)
        .filter(|remaining| *remaining > 0)
        .ok_or_else(|| anyhow!("request headers exceed configured limit"))?;
    let mut headers = Http1HeaderAccumulator::new(remaining);
    let mut header_line = String::new();
    loop {
        let read = read_line(reader, &mut header_line, budget, peer, remaining).await?;
        ensure!(read > 0, "connection closed while reading headers from {peer}");
        if !headers
            .push_line(&header_line)
            .with_context(|| format!("invalid header from {peer}"))?
        {
            break;
        }
    }

    Ok(Some(Http1RequestHead {
        method,
        target,
        headers,
        request_line_bytes,
    }))
}

fn rename_line_error(err: anyhow::Error, limit: usize) -> anyhow::Error {
    if err.is::<LineTooLong>() {
        err.context(format!("request line exceeds configured limit of {limit} bytes"))
    } else {
        err
    }
}
