use std::net::SocketAddr;

use anyhow::Result;
use tokio::net::TcpStream;

use crate::proxy::AppContext;
use crate::proxy::connect::{self, ConnectRequest};

use super::dispatch::{self, LoopOutcome};

pub async fn handle_http(stream: TcpStream, peer: SocketAddr, app: AppContext) -> Result<()> {
    match dispatch::serve_http_loop(stream, peer, &app).await? {
        LoopOutcome::Completed => Ok(()),
        LoopOutcome::Connect(connect) => {
            connect::handle_connect(ConnectRequest {
                reader: connect.reader,
                peer,
                target: connect.target.as_str(),
                app: &app,
                request_bytes: connect.request_bytes,
                start: connect.start,
            })
            .await
        }
    }
}
