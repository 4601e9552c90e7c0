use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, header::AUTHORIZATION};
use reqwest::Client;
use rustls::ClientConfig;
use tracing::debug;
use url::Url;

use crate::cache::StorePath;
use crate::settings::StoreSettings;

use super::{ArtifactStore, Checksum, StoreError};

static CHECKSUM_DEPLOY: HeaderName = HeaderName::from_static("x-checksum-deploy");
static CHECKSUM_SHA256: HeaderName = HeaderName::from_static("x-checksum-sha256");

/// Artifactory-compatible store client.
#[derive(Clone)]
pub struct HttpArtifactStore {
    client: Client,
    base: Url,
    ping_url: Url,
    authorization: Option<HeaderValue>,
    request_timeout: Duration,
}

impl fmt::Debug for HttpArtifactStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpArtifactStore")
            .field("base", &self.base.as_str())
            .field("ping_url", &self.ping_url.as_str())
            .field("authenticated", &self.authorization.is_some())
            .finish()
    }
}

impl HttpArtifactStore {
    pub fn new(settings: &StoreSettings, tls: &ClientConfig) -> Result<Self, StoreError> {
        let authorization = settings
            .token
            .as_deref()
            .map(bearer_authorization)
            .transpose()?;

        let mut default_headers = HeaderMap::new();
        if let Some(value) = &authorization {
            default_headers.insert(AUTHORIZATION, value.clone());
        }

        // Uploads are bounded by size, not wall time; only requests without a
        // body carry `request_timeout`.
        let client = Client::builder()
            .use_preconfigured_tls(tls.clone())
            .default_headers(default_headers)
            .connect_timeout(settings.timeout())
            .tcp_keepalive(settings.timeout())
            .redirect(reqwest::redirect::Policy::none())
            .no_proxy()
            .build()
            .map_err(|err| StoreError::Config(format!("failed to build store client: {err}")))?;

        let base = settings.url.clone();
        let ping_url = join_path(&base, &settings.ping_path);
        Ok(Self {
            client,
            base,
            ping_url,
            authorization,
            request_timeout: settings.timeout(),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    async fn send(&self, method: Method, url: Url) -> Result<reqwest::Response, StoreError> {
        self.client
            .request(method, url.clone())
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(|source| StoreError::Transport { url, source })
    }
}

#[async_trait]
impl ArtifactStore for HttpArtifactStore {
    fn locate(&self, path: &StorePath) -> Url {
        path.to_url(&self.base)
    }

    fn read_authorization(&self) -> Option<HeaderValue> {
        self.authorization.clone()
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let response = self.send(Method::GET, self.ping_url.clone()).await?;
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(StoreError::Status {
                method: "GET",
                url: self.ping_url.clone(),
                status,
            })
        }
    }

    async fn exists(&self, path: &StorePath) -> Result<bool, StoreError> {
        let url = self.locate(path);
        let response = self.send(Method::HEAD, url.clone()).await?;
        match response.status() {
            StatusCode::OK => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            status => Err(StoreError::Status {
                method: "HEAD",
                url,
                status,
            }),
        }
    }

    async fn deploy(
        &self,
        path: &StorePath,
        body: Bytes,
        checksum: &Checksum,
    ) -> Result<(), StoreError> {
        let url = self.locate(path);
        let sha256 = HeaderValue::from_str(checksum.sha256())
            .map_err(|err| StoreError::Config(format!("invalid checksum header: {err}")))?;
        let size = body.len();
        let response = self
            .client
            .put(url.clone())
            .header(CHECKSUM_DEPLOY.clone(), HeaderValue::from_static("true"))
            .header(CHECKSUM_SHA256.clone(), sha256)
            .body(body)
            .send()
            .await
            .map_err(|source| StoreError::Transport {
                url: url.clone(),
                source,
            })?;
        let status = response.status();
        if !status.is_success() {
            return Err(StoreError::Status {
                method: "PUT",
                url,
                status,
            });
        }
        debug!(url = %url, size, sha256 = checksum.sha256(), "artifact deployed");
        Ok(())
    }
}

fn bearer_authorization(token: &str) -> Result<HeaderValue, StoreError> {
    let mut value = HeaderValue::from_str(&format!("Bearer {}", token.trim()))
        .map_err(|_| StoreError::Config("store token contains invalid characters".to_string()))?;
    value.set_sensitive(true);
    Ok(value)
}

fn join_path(base: &Url, relative: &str) -> Url {
    let mut url = base.clone();
    let path = format!(
        "{}/{}",
        base.path().trim_end_matches('/'),
        relative.trim_start_matches('/')
    );
    url.set_path(&path);
    url.set_query(None);
    url.set_fragment(None);
    url
}
