use std::net::SocketAddr;

use anyhow::{Context, Result};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info};

use super::{AppContext, http};

/// Binds the configured listen address. Failing to bind is fatal; everything
/// after that is handled per connection.
pub async fn start_listener(app: AppContext) -> Result<()> {
    let bind_addr = app.settings.listen;
    let listener = TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("failed to bind proxy listener on {bind_addr}"))?;
    serve(listener, app).await
}

/// Accepts clients on an already bound listener until the task is dropped.
pub async fn serve(listener: TcpListener, app: AppContext) -> Result<()> {
    let local_addr = listener
        .local_addr()
        .context("proxy listener has no local address")?;
    info!(
        address = %local_addr,
        store = %app.settings.store.url,
        repository = %app.settings.store.repository,
        "artifact proxy listening"
    );

    loop {
        match listener.accept().await {
            Ok((stream, peer)) => spawn_client(stream, peer, app.clone()),
            Err(err) => error!(error = %err, "failed to accept client connection"),
        }
    }
}

fn spawn_client(stream: TcpStream, peer: SocketAddr, app: AppContext) {
    if let Err(err) = stream.set_nodelay(true) {
        debug!(peer = %peer, error = %err, "failed to set TCP_NODELAY on client stream");
    }
    tokio::spawn(async move {
        if let Err(err) = http::handle_http(stream, peer, app).await {
            debug!(peer = %peer, error = ?err, "client connection ended with error");
        }
    });
}
