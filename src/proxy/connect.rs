//! Blind CONNECT tunnelling. Tunnelled bytes are opaque to the proxy and never
//! reach the cache.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow, ensure};
use http::StatusCode;
use tokio::io::{self, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tracing::{debug, warn};

use crate::logging::AccessLogBuilder;
use crate::proxy::AppContext;
use crate::proxy::http::respond_with_access_log;
use crate::proxy::request::parse_host_header;
use crate::util::timeout_with_context;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectTarget {
    pub host: String,
    pub port: u16,
}

impl ConnectTarget {
    pub fn authority(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

pub fn parse_connect_target(target: &str) -> Result<ConnectTarget> {
    let authority = parse_host_header(target)?;
    let (host, port) = authority
        .rsplit_once(':')
        .ok_or_else(|| anyhow!("CONNECT target must include an explicit port"))?;
    let host = if let Some(inner) = host.strip_prefix('[') {
        inner
            .strip_suffix(']')
            .ok_or_else(|| anyhow!("unterminated IPv6 literal in CONNECT target"))?
    } else {
        ensure!(
            !host.contains(':'),
            "IPv6 CONNECT targets must be enclosed in brackets"
        );
        host
    };
    ensure!(!host.is_empty(), "CONNECT target missing host");
    let port = port
        .parse::<u16>()
        .with_context(|| format!("invalid CONNECT port '{port}'"))?;
    ensure!(port != 0, "CONNECT port must not be zero");
    Ok(ConnectTarget {
        host: host.to_string(),
        port,
    })
}

pub struct ConnectRequest<'a> {
    pub reader: BufReader<TcpStream>,
    pub peer: SocketAddr,
    pub target: &'a str,
    pub app: &'a AppContext,
    pub request_bytes: u64,
    pub start: Instant,
}

/// Opens a TCP connection to the CONNECT target and splices bytes in both
/// directions until either side closes or idles out.
pub async fn handle_connect(ctx: ConnectRequest<'_>) -> Result<()> {
    let ConnectRequest {
        reader,
        peer,
        target,
        app,
        request_bytes,
        start,
    } = ctx;
    let client_timeout = app.settings.client_timeout();
    let access_log = app.settings.access_log;
    let log_builder = || {
        access_log.then(|| AccessLogBuilder::for_connect(peer, target.to_string()))
    };

    let parsed = match parse_connect_target(target) {
        Ok(parsed) => parsed,
        Err(err) => {
            warn!(peer = %peer, target, error = %err, "invalid CONNECT target");
            let mut stream = reader.into_inner();
            return respond_with_access_log(
                &mut stream,
                StatusCode::BAD_REQUEST,
                b"invalid CONNECT target\r\n",
                client_timeout,
                request_bytes,
                start.elapsed(),
                log_builder().map(|builder| builder.error_reason("invalid_target")),
            )
            .await;
        }
    };

    let connect_timeout = app.settings.upstream_connect_timeout();
    let upstream = match timeout_with_context(
        connect_timeout,
        TcpStream::connect((parsed.host.as_str(), parsed.port)),
        format!("connecting to {}", parsed.authority()),
    )
    .await
    {
        Ok(stream) => stream,
        Err(err) => {
            warn!(peer = %peer, target = %parsed.authority(), error = %err, "CONNECT upstream unreachable");
            let mut stream = reader.into_inner();
            return respond_with_access_log(
                &mut stream,
                StatusCode::BAD_GATEWAY,
                b"failed to connect to upstream\r\n",
                client_timeout,
                request_bytes,
                start.elapsed(),
                log_builder().map(|builder| {
                    builder
                        .error_reason("connect_failed")
                        .error_detail(err.to_string())
                }),
            )
            .await;
        }
    };
    if let Err(err) = upstream.set_nodelay(true) {
        debug!(peer = %peer, error = %err, "failed to set TCP_NODELAY on tunnel stream");
    }

    let stats = splice(reader, upstream, client_timeout, app.settings.upstream_timeout()).await;
    match stats {
        Ok(stats) => {
            if let Some(builder) = log_builder() {
                builder
                    .status(StatusCode::OK)
                    .bytes(
                        request_bytes.saturating_add(stats.client_bytes),
                        stats.handshake_bytes.saturating_add(stats.upstream_bytes),
                    )
                    .elapsed(start.elapsed())
                    .upstream(parsed.authority())
                    .log();
            }
            Ok(())
        }
        Err(err) => Err(err.context(format!("CONNECT tunnel to {} failed", parsed.authority()))),
    }
}

struct SpliceStats {
    client_bytes: u64,
    upstream_bytes: u64,
    handshake_bytes: u64,
}

async fn splice(
    reader: BufReader<TcpStream>,
    mut upstream: TcpStream,
    client_timeout: Duration,
    upstream_timeout: Duration,
) -> Result<SpliceStats> {
    // Bytes the client pipelined behind the CONNECT head belong to the tunnel.
    let pending = reader.buffer().to_vec();
    let mut client = reader.into_inner();

    let handshake_bytes = send_connect_established(&mut client, client_timeout).await?;
    if !pending.is_empty() {
        timeout_with_context(
            upstream_timeout,
            upstream.write_all(&pending),
            "forwarding buffered tunnel bytes",
        )
        .await?;
    }

    let (client_bytes, upstream_bytes) =
        relay_with_idle_timeouts(&mut client, &mut upstream, client_timeout, upstream_timeout)
            .await
            .context("CONNECT splice relay failed")?;

    Ok(SpliceStats {
        client_bytes: client_bytes.saturating_add(pending.len() as u64),
        upstream_bytes,
        handshake_bytes,
    })
}

async fn send_connect_established(stream: &mut TcpStream, client_timeout: Duration) -> Result<u64> {
    let established = b"HTTP/1.1 200 Connection Established\r\nProxy-Agent: artifact-proxy\r\n\r\n";
    timeout_with_context(
        client_timeout,
        stream.write_all(established),
        "writing CONNECT response",
    )
    .await?;
    timeout_with_context(client_timeout, stream.flush(), "flushing CONNECT response").await?;
    Ok(established.len() as u64)
}

async fn relay_with_idle_timeouts(
    client_stream: &mut TcpStream,
    upstream_stream: &mut TcpStream,
    client_timeout: Duration,
    upstream_timeout: Duration,
) -> Result<(u64, u64)> {
    let (mut client_reader, mut client_writer) = io::split(client_stream);
    let (mut upstream_reader, mut upstream_writer) = io::split(upstream_stream);

    let client_to_upstream = transfer_half(
        &mut client_reader,
        &mut upstream_writer,
        client_timeout,
        upstream_timeout,
        "CONNECT client",
        "upstream server",
    );
    let upstream_to_client = transfer_half(
        &mut upstream_reader,
        &mut client_writer,
        upstream_timeout,
        client_timeout,
        "upstream server",
        "CONNECT client",
    );

    let (client_bytes, upstream_bytes) = tokio::try_join!(client_to_upstream, upstream_to_client)?;
    Ok((client_bytes, upstream_bytes))
}

async fn transfer_half<R, W>(
    reader: &mut R,
    writer: &mut W,
    read_timeout: Duration,
    write_timeout: Duration,
    read_label: &str,
    write_label: &str,
) -> Result<u64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut transferred = 0u64;
    let mut buffer = [0u8; 8192];
    loop {
        let read = timeout_with_context(
            read_timeout,
            reader.read(&mut buffer),
            format!("reading from {read_label} during CONNECT splice"),
        )
        .await?;
        if read == 0 {
            timeout_with_context(
                write_timeout,
                writer.shutdown(),
                format!("shutting down {write_label} during CONNECT splice"),
            )
            .await?;
            break;
        }
        timeout_with_context(
            write_timeout,
            writer.write_all(&buffer[..read]),
            format!("forwarding to {write_label} during CONNECT splice"),
        )
        .await?;
        transferred = transferred.saturating_add(read as u64);
    }
    timeout_with_context(
        write_timeout,
        writer.flush(),
        format!("flushing {write_label} during CONNECT splice"),
    )
    .await?;
    Ok(transferred)
}
