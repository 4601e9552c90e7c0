use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use bytes::{Bytes, BytesMut};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, BufReader};

use crate::{proxy::http::codec::read_line_with_timeout, util::timeout_with_context};

const MAX_CHUNK_LINE_LENGTH: usize = 8192;

#[derive(Debug, Error)]
#[error("request body exceeds configured limit")]
pub struct BodyTooLarge {
    pub bytes_read: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BodyPlan {
    Empty,
    Fixed(usize),
    Chunked,
}

/// Tracks cumulative payload bytes against the configured body limit.
struct BodySizeTracker {
    max_bytes: usize,
    total_bytes: usize,
}

impl BodySizeTracker {
    fn new(max_bytes: usize) -> Self {
        Self {
            max_bytes,
            total_bytes: 0,
        }
    }

    fn record(&mut self, chunk_len: usize) -> Result<(), BodyTooLarge> {
        self.total_bytes = self
            .total_bytes
            .checked_add(chunk_len)
            .filter(|total| *total <= self.max_bytes)
            .ok_or(BodyTooLarge {
                bytes_read: self.total_bytes as u64,
            })?;
        Ok(())
    }
}

/// Reads the request body described by `plan` into memory.
///
/// Chunked bodies are de-chunked; trailers are read and discarded. Returns the
/// payload together with the number of wire bytes consumed from the client.
pub async fn read_request_body<S>(
    reader: &mut BufReader<S>,
    plan: BodyPlan,
    client_timeout: Duration,
    peer: SocketAddr,
    max_body_size: usize,
) -> Result<(Bytes, u64)>
where
    S: AsyncRead + Unpin,
{
    match plan {
        BodyPlan::Empty => Ok((Bytes::new(), 0)),
        BodyPlan::Fixed(length) => {
            if length > max_body_size {
                return Err(BodyTooLarge {
                    bytes_read: 0,
                }
                .into());
            }
            let body = read_fixed_body(reader, length, client_timeout).await?;
            let wire = body.len() as u64;
            Ok((body, wire))
        }
        BodyPlan::Chunked => read_chunked_body(reader, client_timeout, peer, max_body_size).await,
    }
}

async fn read_fixed_body<S>(
    reader: &mut BufReader<S>,
    length: usize,
    client_timeout: Duration,
) -> Result<Bytes>
where
    S: AsyncRead + Unpin,
{
    let mut body = BytesMut::with_capacity(length);
    let mut buffer = [0u8; 8192];
    let mut remaining = length;
    while remaining > 0 {
        let to_read = remaining.min(buffer.len());
        let read = timeout_with_context(
            client_timeout,
            reader.read(&mut buffer[..to_read]),
            "reading request body from client",
        )
        .await?;
        if read == 0 {
            bail!("unexpected EOF while reading request body from client");
        }
        body.extend_from_slice(&buffer[..read]);
        remaining -= read;
    }
    Ok(body.freeze())
}

async fn read_chunked_body<S>(
    reader: &mut BufReader<S>,
    client_timeout: Duration,
    peer: SocketAddr,
    max_body_size: usize,
) -> Result<(Bytes, u64)>
where
    S: AsyncRead + Unpin,
{
    let mut tracker = BodySizeTracker::new(max_body_size);
    let mut body = BytesMut::new();
    let mut wire_bytes = 0u64;
    let mut line = String::new();

    loop {
        let size_bytes = read_line_with_timeout(
            reader,
            &mut line,
            client_timeout,
            peer,
            MAX_CHUNK_LINE_LENGTH,
        )
        .await?;
        if size_bytes == 0 {
            bail!("unexpected EOF while reading chunk size from {peer}");
        }
        wire_bytes = wire_bytes.saturating_add(size_bytes as u64);
        let trimmed = line.trim_end_matches(['\r', '\n']);
        let size_str = trimmed
            .split_once(';')
            .map(|(size, _)| size)
            .unwrap_or(trimmed)
            .trim();
        let chunk_size = usize::from_str_radix(size_str, 16)
            .with_context(|| format!("invalid chunk size '{size_str}'"))?;

        if chunk_size == 0 {
            loop {
                let trailer_bytes = read_line_with_timeout(
                    reader,
                    &mut line,
                    client_timeout,
                    peer,
                    MAX_CHUNK_LINE_LENGTH,
                )
                .await?;
                if trailer_bytes == 0 {
                    bail!("unexpected EOF while reading chunk trailer from {peer}");
                }
                wire_bytes = wire_bytes.saturating_add(trailer_bytes as u64);
                if line.trim_end_matches(['\r', '\n']).is_empty() {
                    break;
                }
            }
            break;
        }

        tracker.record(chunk_size)?;
        let chunk = read_fixed_body(reader, chunk_size, client_timeout)
            .await
            .with_context(|| format!("reading chunk data from {peer}"))?;
        body.extend_from_slice(&chunk);
        wire_bytes = wire_bytes.saturating_add(chunk_size as u64);

        let mut crlf = [0u8; 2];
        timeout_with_context(
            client_timeout,
            reader.read_exact(&mut crlf),
            format!("reading chunk terminator from {peer}"),
        )
        .await?;
        if &crlf != b"\r\n" {
            bail!("invalid chunk terminator when reading from {peer}");
        }
        wire_bytes = wire_bytes.saturating_add(2);
    }

    Ok((body.freeze(), wire_bytes))
}
