use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use http::StatusCode;
use url::Url;

use crate::cache::StorePath;

use super::{ArtifactStore, Checksum, StoreError};

/// In-process store used by unit tests.
pub(crate) struct MemoryStore {
    base: Url,
    artifacts: Mutex<HashMap<String, (Bytes, Checksum)>>,
    pub(crate) unavailable: AtomicBool,
    pub(crate) probes: AtomicUsize,
    pub(crate) deploys: AtomicUsize,
}

impl MemoryStore {
    pub(crate) fn new() -> Self {
        Self {
            base: Url::parse("http://store.test/artifactory/").expect("static url"),
            artifacts: Mutex::new(HashMap::new()),
            unavailable: AtomicBool::new(false),
            probes: AtomicUsize::new(0),
            deploys: AtomicUsize::new(0),
        }
    }

    pub(crate) fn insert(&self, path: &StorePath, body: &'static [u8]) {
        self.artifacts.lock().unwrap().insert(
            path.to_string(),
            (Bytes::from_static(body), Checksum::sha256_of(body)),
        );
    }

    pub(crate) fn get(&self, path: &StorePath) -> Option<(Bytes, Checksum)> {
        self.artifacts.lock().unwrap().get(&path.to_string()).cloned()
    }

    fn check_available(&self, method: &'static str, path: &StorePath) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Status {
                method,
                url: self.locate(path),
                status: StatusCode::SERVICE_UNAVAILABLE,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl ArtifactStore for MemoryStore {
    fn locate(&self, path: &StorePath) -> Url {
        path.to_url(&self.base)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Config("store offline".to_string()));
        }
        Ok(())
    }

    async fn exists(&self, path: &StorePath) -> Result<bool, StoreError> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        self.check_available("HEAD", path)?;
        Ok(self.get(path).is_some())
    }

    async fn deploy(
        &self,
        path: &StorePath,
        body: Bytes,
        checksum: &Checksum,
    ) -> Result<(), StoreError> {
        self.check_available("PUT", path)?;
        self.artifacts
            .lock()
            .unwrap()
            .insert(path.to_string(), (body, checksum.clone()));
        self.deploys.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
