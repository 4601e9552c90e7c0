use async_trait::async_trait;

use crate::cache::CacheStatus;
use crate::proxy::redirect::RedirectError;
use crate::proxy::request::ProxyRequest;

/// Interception points invoked by the connection loop around every forwarded
/// request.
#[async_trait]
pub trait ProxyHooks: Send + Sync {
    /// Called before the request is forwarded. May rewrite the destination or
    /// headers and start background work.
    async fn on_request(&self, request: &mut ProxyRequest) -> CacheStatus;

    /// Called with the upstream response before it is written to the client.
    /// May substitute a different response; an error becomes a proxy error.
    async fn on_response(
        &self,
        request: &ProxyRequest,
        response: reqwest::Response,
    ) -> Result<reqwest::Response, RedirectError>;
}

/// Hooks that forward everything untouched.
pub struct Passthrough;

#[async_trait]
impl ProxyHooks for Passthrough {
    async fn on_request(&self, _request: &mut ProxyRequest) -> CacheStatus {
        CacheStatus::Bypass
    }

    async fn on_response(
        &self,
        _request: &ProxyRequest,
        response: reqwest::Response,
    ) -> Result<reqwest::Response, RedirectError> {
        Ok(response)
    }
}
