use std::sync::Arc;

use anyhow::{Context, Result};
use http::Method;
use rustls::ClientConfig;
use url::Url;

use crate::proxy::request::ProxyRequest;
use crate::settings::Settings;

/// Pooled HTTP client shared by request forwarding, cache population and
/// redirect resolution.
///
/// Redirects are never followed automatically and proxy environment variables
/// are ignored so outbound traffic can not loop back through this proxy.
#[derive(Clone, Debug)]
pub struct OutboundTransport {
    client: reqwest::Client,
}

impl OutboundTransport {
    pub fn new(settings: &Settings, tls: &Arc<ClientConfig>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .use_preconfigured_tls(ClientConfig::clone(tls))
            .redirect(reqwest::redirect::Policy::none())
            .no_proxy()
            .connect_timeout(settings.upstream_connect_timeout())
            .read_timeout(settings.upstream_timeout())
            .pool_max_idle_per_host(settings.upstream_pool_capacity)
            .build()
            .context("failed to build outbound HTTP client")?;
        Ok(Self { client })
    }

    /// Forwards a client request as-is.
    pub async fn send(&self, request: &ProxyRequest) -> Result<reqwest::Response, reqwest::Error> {
        let mut builder = self
            .client
            .request(request.method.clone(), request.url.clone())
            .headers(request.headers.clone());
        if !request.body.is_empty() {
            builder = builder.body(request.body.clone());
        }
        builder.send().await
    }

    /// Issues a bodyless request with no client headers.
    pub async fn fetch(&self, method: Method, url: Url) -> Result<reqwest::Response, reqwest::Error> {
        self.client.request(method, url).send().await
    }
}
