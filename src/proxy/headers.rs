use std::collections::HashSet;

use http::HeaderMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderDisposition {
    Connection,
    Host,
    ContentLength,
    TransferEncoding,
    Skip,
    Forward,
}

/// Returns true when the header conveys forwarding metadata that should be stripped.
pub fn is_forwarding_header(name: &str) -> bool {
    name.starts_with("x-forwarded-")
        || name.ends_with("-client-ip")
        || matches!(
            name,
            "forwarded" | "via" | "x-real-ip" | "true-client-ip" | "cf-connecting-ip"
        )
}

/// Classifies a lower-cased request header name read from a client.
pub fn classify_request_header(name: &str) -> HeaderDisposition {
    match name {
        "connection" => HeaderDisposition::Connection,
        "host" => HeaderDisposition::Host,
        "content-length" => HeaderDisposition::ContentLength,
        "transfer-encoding" => HeaderDisposition::TransferEncoding,
        "keep-alive" | "upgrade" | "te" | "trailer" | "expect" => HeaderDisposition::Skip,
        _ if name.starts_with("proxy-") || is_forwarding_header(name) => HeaderDisposition::Skip,
        _ => HeaderDisposition::Forward,
    }
}

/// Hop-by-hop headers that must not be relayed from an upstream response.
pub fn is_hop_by_hop(name: &str) -> bool {
    matches!(
        name,
        "connection"
            | "keep-alive"
            | "proxy-connection"
            | "proxy-authenticate"
            | "te"
            | "trailer"
            | "transfer-encoding"
            | "upgrade"
    )
}

/// Collects the lower-cased tokens listed in every `Connection` header of `headers`.
pub fn connection_tokens(headers: &HeaderMap) -> HashSet<String> {
    headers
        .get_all(http::header::CONNECTION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .map(|token| token.trim().to_ascii_lowercase())
        .filter(|token| !token.is_empty())
        .collect()
}
