use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use http::{Method, StatusCode};
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use url::Url;

use crate::proxy::redirect::{RedirectError, resolve_redirect};
use crate::proxy::upstream::OutboundTransport;
use crate::store::{ArtifactStore, Checksum, StoreError};

use super::StorePath;

#[derive(Debug, Error)]
pub enum FillError {
    #[error("origin request failed")]
    Fetch(#[source] reqwest::Error),
    #[error(transparent)]
    Redirect(#[from] RedirectError),
    #[error("origin returned {0}")]
    Status(StatusCode),
    #[error("origin body exceeds {limit} bytes")]
    TooLarge { limit: u64 },
    #[error("failed to read origin body")]
    Read(#[source] reqwest::Error),
    #[error(transparent)]
    Upload(#[from] StoreError),
}

impl FillError {
    /// Short name of the step that failed, for logs.
    pub fn step(&self) -> &'static str {
        match self {
            FillError::Fetch(_) => "fetch",
            FillError::Redirect(_) => "redirect",
            FillError::Status(_) => "status",
            FillError::TooLarge { .. } | FillError::Read(_) => "read",
            FillError::Upload(_) => "upload",
        }
    }
}

#[derive(Debug, Clone)]
pub struct FillReport {
    pub size: usize,
    pub checksum: Checksum,
}

/// Populates the store on a cache miss by fetching the origin a second time,
/// independently of the response already on its way to the client.
pub struct CacheFill {
    transport: OutboundTransport,
    store: Arc<dyn ArtifactStore>,
    max_artifact_size: u64,
}

impl CacheFill {
    pub fn new(
        transport: OutboundTransport,
        store: Arc<dyn ArtifactStore>,
        max_artifact_size: u64,
    ) -> Self {
        Self {
            transport,
            store,
            max_artifact_size,
        }
    }

    /// Fetches `url`, follows at most one redirect, and uploads the full body
    /// with its SHA-256 to `path`. Nothing is retried.
    pub async fn run(
        &self,
        method: Method,
        url: Url,
        path: &StorePath,
    ) -> Result<FillReport, FillError> {
        let response = self
            .transport
            .fetch(method.clone(), url)
            .await
            .map_err(FillError::Fetch)?;
        let response = resolve_redirect(&self.transport, &method, response).await?;

        let status = response.status();
        if !status.is_success() {
            return Err(FillError::Status(status));
        }

        let body = self.read_body(response).await?;
        let checksum = Checksum::sha256_of(&body);
        let size = body.len();
        self.store.deploy(path, body, &checksum).await?;
        Ok(FillReport { size, checksum })
    }

    async fn read_body(&self, mut response: reqwest::Response) -> Result<Bytes, FillError> {
        let limit = self.max_artifact_size;
        if response.content_length().is_some_and(|length| length > limit) {
            return Err(FillError::TooLarge { limit });
        }
        let mut body = BytesMut::new();
        while let Some(chunk) = response.chunk().await.map_err(FillError::Read)? {
            if body.len() as u64 + chunk.len() as u64 > limit {
                return Err(FillError::TooLarge { limit });
            }
            body.extend_from_slice(&chunk);
        }
        Ok(body.freeze())
    }

    /// Runs the fill on its own task. The outcome is only logged.
    pub fn spawn(self: &Arc<Self>, method: Method, url: Url, path: StorePath) -> JoinHandle<()> {
        let fill = Arc::clone(self);
        tokio::spawn(async move {
            match fill.run(method, url.clone(), &path).await {
                Ok(report) => info!(
                    url = %url,
                    path = %path,
                    size = report.size,
                    sha256 = report.checksum.sha256(),
                    "artifact cached"
                ),
                Err(err) => warn!(
                    url = %url,
                    path = %path,
                    step = err.step(),
                    error = ?err,
                    "cache fill abandoned"
                ),
            }
        })
    }
}
