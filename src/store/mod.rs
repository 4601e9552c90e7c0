//! Boundary to the remote artifact store that backs the cache.
//!
//! The proxy never inspects how the store persists artifacts; it only issues
//! existence probes, checksum-verified uploads and a startup ping.

mod artifactory;
#[cfg(test)]
pub(crate) mod memory;

use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderValue, StatusCode};
use sha2::{Digest, Sha256};
use thiserror::Error;
use url::Url;

use crate::cache::StorePath;

pub use artifactory::HttpArtifactStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("artifact store request to {url} failed")]
    Transport {
        url: Url,
        #[source]
        source: reqwest::Error,
    },
    #[error("artifact store returned {status} for {method} {url}")]
    Status {
        method: &'static str,
        url: Url,
        status: StatusCode,
    },
    #[error("invalid artifact store configuration: {0}")]
    Config(String),
}

/// SHA-256 digest of an artifact body, hex encoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checksum {
    sha256: String,
}

impl Checksum {
    pub fn sha256_of(body: &[u8]) -> Self {
        Self {
            sha256: hex::encode(Sha256::digest(body)),
        }
    }

    pub fn sha256(&self) -> &str {
        &self.sha256
    }
}

#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Absolute URL of the artifact at `path`, as a client would fetch it.
    fn locate(&self, path: &StorePath) -> Url;

    /// Credentials to attach when a request is redirected to the store.
    fn read_authorization(&self) -> Option<HeaderValue> {
        None
    }

    /// Reachability check performed once at startup.
    async fn ping(&self) -> Result<(), StoreError>;

    /// Metadata-only existence check. `Ok(true)` only for an explicit "found".
    async fn exists(&self, path: &StorePath) -> Result<bool, StoreError>;

    /// Uploads `body` to `path`, asking the store to verify it against `checksum`.
    async fn deploy(
        &self,
        path: &StorePath,
        body: Bytes,
        checksum: &Checksum,
    ) -> Result<(), StoreError>;
}
