use tracing::{debug, warn};
use url::Url;

use crate::store::ArtifactStore;

use super::StorePath;

/// Outcome of asking the store whether an artifact exists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheDecision {
    /// Artifact found; carries the URL to fetch it from.
    Hit(Url),
    Miss,
}

/// Checks the store for `path`. Any store failure is reported as a miss so a
/// broken store never blocks traffic to the origin.
pub async fn probe(store: &dyn ArtifactStore, path: &StorePath) -> CacheDecision {
    match store.exists(path).await {
        Ok(true) => CacheDecision::Hit(store.locate(path)),
        Ok(false) => {
            debug!(path = %path, "artifact not in store");
            CacheDecision::Miss
        }
        Err(err) => {
            warn!(path = %path, error = %err, "store probe failed; treating as miss");
            CacheDecision::Miss
        }
    }
}
