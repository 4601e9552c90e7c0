use http::{Method, StatusCode, header::LOCATION};
use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::proxy::upstream::OutboundTransport;

#[derive(Debug, Error)]
pub enum RedirectError {
    #[error("redirect from {url} has no Location header")]
    MissingLocation { url: Url },
    #[error("redirect from {url} has a non-UTF-8 Location header")]
    UnreadableLocation { url: Url },
    #[error("redirect Location '{location}' is not a valid URL")]
    InvalidLocation {
        location: String,
        #[source]
        source: url::ParseError,
    },
    #[error("redirect target {url} uses unsupported scheme")]
    UnsupportedScheme { url: Url },
    #[error("request to redirect target {url} failed")]
    Request {
        url: Url,
        #[source]
        source: reqwest::Error,
    },
}

pub fn is_redirect(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::MOVED_PERMANENTLY
            | StatusCode::FOUND
            | StatusCode::SEE_OTHER
            | StatusCode::TEMPORARY_REDIRECT
            | StatusCode::PERMANENT_REDIRECT
    )
}

/// Replaces a redirect response with the response of its target.
///
/// Exactly one hop is followed, re-using `method`. Non-redirect responses are
/// returned untouched. A relative `Location` is resolved against the URL that
/// produced the redirect.
pub async fn resolve_redirect(
    transport: &OutboundTransport,
    method: &Method,
    response: reqwest::Response,
) -> Result<reqwest::Response, RedirectError> {
    if !is_redirect(response.status()) {
        return Ok(response);
    }

    let target = redirect_target(response.url(), response.headers().get(LOCATION))?;
    debug!(
        from = %response.url(),
        to = %target,
        status = response.status().as_u16(),
        "resolving redirect"
    );
    drop(response);

    transport
        .fetch(method.clone(), target.clone())
        .await
        .map_err(|source| RedirectError::Request {
            url: target,
            source,
        })
}

fn redirect_target(
    base: &Url,
    location: Option<&http::HeaderValue>,
) -> Result<Url, RedirectError> {
    let location = location.ok_or_else(|| RedirectError::MissingLocation { url: base.clone() })?;
    let location = location
        .to_str()
        .map_err(|_| RedirectError::UnreadableLocation { url: base.clone() })?
        .trim();
    if location.is_empty() {
        return Err(RedirectError::MissingLocation { url: base.clone() });
    }
    let target = base
        .join(location)
        .map_err(|source| RedirectError::InvalidLocation {
            location: location.to_string(),
            source,
        })?;
    if !matches!(target.scheme(), "http" | "https") {
        return Err(RedirectError::UnsupportedScheme { url: target });
    }
    Ok(target)
}
