pub mod cache;
pub mod cli;
pub mod io_util;
pub mod logging;
pub mod proxy;
pub mod settings;
pub mod store;
pub mod tls;
pub mod util;

use std::sync::Arc;

use anyhow::{Context, Result};
use rustls::ClientConfig;
use tracing::{info, warn};

use crate::{
    cache::CacheOrchestrator,
    proxy::{AppContext, upstream::OutboundTransport},
    settings::Settings,
    store::{ArtifactStore, HttpArtifactStore},
};

pub async fn run(settings: Settings) -> Result<()> {
    let settings = Arc::new(settings);
    let tls = tls::build_client_config()?;
    let app = build_app(settings, tls).await?;
    proxy::run(app).await
}

/// Wires the outbound transport, store client and cache hooks into an
/// [`AppContext`]. An unreachable store is logged and tolerated; every probe
/// against it will then fall through to the origin.
pub async fn build_app(settings: Arc<Settings>, tls: Arc<ClientConfig>) -> Result<AppContext> {
    let transport = OutboundTransport::new(&settings, &tls)?;
    let store = HttpArtifactStore::new(&settings.store, &tls)
        .context("failed to configure artifact store client")?;

    match store.ping().await {
        Ok(()) => info!(store = %store.base_url(), "artifact store reachable"),
        Err(err) => warn!(
            store = %store.base_url(),
            error = ?err,
            "artifact store unreachable; requests will bypass the cache until it recovers"
        ),
    }

    let store: Arc<dyn ArtifactStore> = Arc::new(store);
    let hooks = Arc::new(CacheOrchestrator::new(
        store,
        settings.store.repository.clone(),
        transport.clone(),
        settings.cache_max_artifact_size,
    ));
    Ok(AppContext::new(settings, transport, hooks))
}
