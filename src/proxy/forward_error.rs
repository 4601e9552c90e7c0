use std::net::SocketAddr;

use anyhow::Error;
use http::StatusCode;
use tracing::warn;

use crate::proxy::redirect::RedirectError;

/// Normalized classification of forwarding failures so each maps to one client response.
pub enum ForwardErrorKind<'a> {
    Redirect(&'a RedirectError),
    Upstream(&'a reqwest::Error),
    Other,
}

pub fn classify_forward_error(err: &Error) -> ForwardErrorKind<'_> {
    if let Some(redirect) = err.downcast_ref::<RedirectError>() {
        ForwardErrorKind::Redirect(redirect)
    } else if let Some(upstream) = err.downcast_ref::<reqwest::Error>() {
        ForwardErrorKind::Upstream(upstream)
    } else {
        ForwardErrorKind::Other
    }
}

impl ForwardErrorKind<'_> {
    pub fn status(&self) -> StatusCode {
        match self {
            ForwardErrorKind::Upstream(err) if err.is_timeout() => StatusCode::GATEWAY_TIMEOUT,
            ForwardErrorKind::Redirect(_)
            | ForwardErrorKind::Upstream(_)
            | ForwardErrorKind::Other => StatusCode::BAD_GATEWAY,
        }
    }

    pub fn body(&self) -> &'static [u8] {
        match self {
            ForwardErrorKind::Redirect(_) => b"failed to resolve upstream redirect\r\n",
            ForwardErrorKind::Upstream(_) | ForwardErrorKind::Other => {
                b"upstream request failed\r\n"
            }
        }
    }

    pub fn reason(&self) -> &'static str {
        match self {
            ForwardErrorKind::Redirect(_) => "redirect_failed",
            ForwardErrorKind::Upstream(_) | ForwardErrorKind::Other => "upstream_error",
        }
    }
}

pub fn log_forward_error(kind: &ForwardErrorKind<'_>, peer: SocketAddr, host: &str, err: &Error) {
    match kind {
        ForwardErrorKind::Redirect(redirect) => warn!(
            peer = %peer,
            host,
            error = %redirect,
            "failed to resolve upstream redirect"
        ),
        ForwardErrorKind::Upstream(_) | ForwardErrorKind::Other => warn!(
            peer = %peer,
            host,
            error = ?err,
            "upstream request failed"
        ),
    }
}
