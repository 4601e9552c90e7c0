use std::{net::SocketAddr, time::Instant};

use anyhow::Result;
use http::{Method, StatusCode};
use tokio::io::{AsyncRead, AsyncWrite, BufReader};
use tracing::{debug, warn};

use crate::logging::AccessLogBuilder;
use crate::proxy::AppContext;

use super::codec::read_http1_request_head;
use super::pipeline::{ClientDisposition, RequestContext, handle_request};
use super::respond::respond_with_access_log;

pub(super) enum LoopOutcome<S> {
    Completed,
    Connect(ConnectHandoff<S>),
}

pub(super) struct ConnectHandoff<S> {
    pub reader: BufReader<S>,
    pub target: String,
    pub request_bytes: u64,
    pub start: Instant,
}

/// Serves keep-alive HTTP/1.1 requests on one client connection until the
/// client closes, asks to close, or issues CONNECT.
pub(super) async fn serve_http_loop<S>(
    stream: S,
    peer: SocketAddr,
    app: &AppContext,
) -> Result<LoopOutcome<S>>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let client_timeout = app.settings.client_timeout();
    let max_header_size = app.settings.max_request_header_size;
    let mut reader = BufReader::new(stream);

    loop {
        let start = Instant::now();
        let head = match read_http1_request_head(
            &mut reader,
            peer,
            client_timeout,
            client_timeout,
            max_header_size,
        )
        .await
        {
            Ok(Some(head)) => head,
            Ok(None) => break,
            Err(err) => {
                warn!(peer = %peer, error = %err, "malformed request");
                let log = app.settings.access_log.then(|| {
                    AccessLogBuilder::new(peer)
                        .error_reason("bad_request")
                        .error_detail(err.to_string())
                });
                if let Err(write_err) = respond_with_access_log(
                    reader.get_mut(),
                    StatusCode::BAD_REQUEST,
                    b"malformed request\r\n",
                    client_timeout,
                    0,
                    start.elapsed(),
                    log,
                )
                .await
                {
                    debug!(peer = %peer, error = %write_err, "failed to report malformed request");
                }
                break;
            }
        };

        if head.method == Method::CONNECT {
            let request_bytes = head.total_bytes();
            return Ok(LoopOutcome::Connect(ConnectHandoff {
                reader,
                target: head.target,
                request_bytes,
                start,
            }));
        }

        let ctx = RequestContext::from((head, start));
        match handle_request(&mut reader, peer, app, ctx).await? {
            ClientDisposition::Continue => continue,
            ClientDisposition::Close => break,
        }
    }

    Ok(LoopOutcome::Completed)
}
