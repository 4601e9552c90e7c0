use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Result, anyhow, bail, ensure};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::time::Instant;

use crate::util::timeout_with_context;

#[derive(Debug, Error)]
#[error("line from {peer} exceeds configured limit of {limit} bytes")]
pub(super) struct LineTooLong {
    pub peer: SocketAddr,
    pub limit: usize,
}

/// How long a line read may wait for more bytes.
#[derive(Clone, Copy)]
pub(super) enum LineBudget {
    /// Whole line must arrive before this instant.
    Deadline(Instant),
    /// Each individual read may idle for at most this long.
    Idle(Duration),
}

impl LineBudget {
    fn next_wait(self, context: &str) -> Result<Duration> {
        match self {
            LineBudget::Deadline(deadline) => remaining_deadline(deadline, context),
            LineBudget::Idle(duration) => Ok(duration),
        }
    }
}

/// Reads one `\n`-terminated line into `buf`, returning the number of bytes consumed
/// (0 on clean EOF before any byte).
pub(super) async fn read_line<S>(
    reader: &mut BufReader<S>,
    buf: &mut String,
    budget: LineBudget,
    peer: SocketAddr,
    max_len: usize,
) -> Result<usize>
where
    S: AsyncRead + Unpin,
{
    ensure!(max_len > 0, "line length limit must be greater than zero");
    buf.clear();
    let mut collected = Vec::new();
    let context = format!("reading line from {peer}");

    loop {
        let wait = budget.next_wait(&context)?;
        let available = timeout_with_context(wait, reader.fill_buf(), context.as_str()).await?;

        if available.is_empty() {
            if collected.is_empty() {
                return Ok(0);
            }
            bail!("connection closed while reading line from {peer}");
        }

        let newline_pos = available.iter().position(|byte| *byte == b'\n');
        let consume = newline_pos.map(|idx| idx + 1).unwrap_or(available.len());

        if collected
            .len()
            .checked_add(consume)
            .ok_or_else(|| anyhow!("line length overflow for {peer}"))?
            > max_len
        {
            return Err(LineTooLong {
                peer,
                limit: max_len,
            }
            .into());
        }

        collected.extend_from_slice(&available[..consume]);
        reader.consume(consume);

        if newline_pos.is_some() {
            break;
        }
    }

    *buf = String::from_utf8(collected)
        .map_err(|_| anyhow!("line from {peer} contained invalid bytes"))?;
    Ok(buf.len())
}

pub(crate) async fn read_line_with_timeout<S>(
    reader: &mut BufReader<S>,
    buf: &mut String,
    timeout_dur: Duration,
    peer: SocketAddr,
    max_len: usize,
) -> Result<usize>
where
    S: AsyncRead + Unpin,
{
    read_line(reader, buf, LineBudget::Idle(timeout_dur), peer, max_len).await
}

pub(super) fn remaining_deadline(deadline: Instant, context: &str) -> Result<Duration> {
    deadline
        .checked_duration_since(Instant::now())
        .filter(|remaining| !remaining.is_zero())
        .ok_or_else(|| anyhow!("timed out {context}"))
}
