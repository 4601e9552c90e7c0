//! Artifact caching on top of the forward proxy.
//!
//! Cacheable requests are probed against the store; a hit is redirected to the
//! stored artifact, a miss is forwarded to the origin while a background fill
//! uploads the same resource for next time.

mod fill;
mod gate;
mod key;
mod probe;
#[cfg(test)]
pub(crate) mod testing;

use std::sync::Arc;

use async_trait::async_trait;
use http::header::{AUTHORIZATION, COOKIE};
use tracing::info;

use crate::proxy::hooks::ProxyHooks;
use crate::proxy::redirect::{RedirectError, resolve_redirect};
use crate::proxy::request::ProxyRequest;
use crate::proxy::upstream::OutboundTransport;
use crate::store::ArtifactStore;

pub use fill::{CacheFill, FillError, FillReport};
pub use gate::is_cacheable;
pub use key::{CacheKey, StorePath};
pub use probe::{CacheDecision, probe};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    Hit,
    Miss,
    Bypass,
}

impl CacheStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheStatus::Hit => "HIT",
            CacheStatus::Miss => "MISS",
            CacheStatus::Bypass => "BYPASS",
        }
    }
}

/// Proxy hooks wiring the gate, probe, fill and redirect resolution together.
pub struct CacheOrchestrator {
    store: Arc<dyn ArtifactStore>,
    repository: String,
    transport: OutboundTransport,
    fill: Arc<CacheFill>,
}

impl CacheOrchestrator {
    pub fn new(
        store: Arc<dyn ArtifactStore>,
        repository: impl Into<String>,
        transport: OutboundTransport,
        max_artifact_size: u64,
    ) -> Self {
        let fill = Arc::new(CacheFill::new(
            transport.clone(),
            store.clone(),
            max_artifact_size,
        ));
        Self {
            store,
            repository: repository.into(),
            transport,
            fill,
        }
    }

    pub fn store_path(&self, request: &ProxyRequest) -> StorePath {
        let key = CacheKey::derive(&request.method, &request.url);
        StorePath::new(&self.repository, &request.url, &key)
    }

    /// Points `request` at the stored artifact. Client credentials meant for the
    /// origin are replaced with the store's own.
    fn redirect_to_store(&self, request: &mut ProxyRequest, store_url: url::Url) {
        request.url = store_url;
        request.headers.remove(AUTHORIZATION);
        request.headers.remove(COOKIE);
        if let Some(authorization) = self.store.read_authorization() {
            request.headers.insert(AUTHORIZATION, authorization);
        }
    }
}

#[async_trait]
impl ProxyHooks for CacheOrchestrator {
    async fn on_request(&self, request: &mut ProxyRequest) -> CacheStatus {
        if !is_cacheable(&request.method) {
            return CacheStatus::Bypass;
        }

        let path = self.store_path(request);
        match probe(self.store.as_ref(), &path).await {
            CacheDecision::Hit(store_url) => {
                info!(url = %request.url, store_url = %store_url, "serving from cache");
                self.redirect_to_store(request, store_url);
                CacheStatus::Hit
            }
            CacheDecision::Miss => {
                info!(url = %request.url, store_url = %self.store.locate(&path), "caching");
                self.fill
                    .spawn(request.method.clone(), request.url.clone(), path);
                CacheStatus::Miss
            }
        }
    }

    async fn on_response(
        &self,
        request: &ProxyRequest,
        response: reqwest::Response,
    ) -> Result<reqwest::Response, RedirectError> {
        resolve_redirect(&self.transport, &request.method, response).await
    }
}
