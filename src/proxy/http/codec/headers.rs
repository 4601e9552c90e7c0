use std::collections::HashSet;

use anyhow::{Context, Result, anyhow, bail, ensure};
use http::{HeaderMap, HeaderName, HeaderValue};

use crate::proxy::headers::{HeaderDisposition, classify_request_header};

/// Accumulates request header lines, enforcing the header byte budget and
/// separating message framing from the headers that are forwarded.
pub(crate) struct Http1HeaderAccumulator {
    max_bytes: usize,
    consumed: usize,
    headers: HeaderMap,
    host: Option<String>,
    content_length: Option<usize>,
    chunked: bool,
    connection_tokens: HashSet<String>,
    expect: Option<String>,
}

impl Http1HeaderAccumulator {
    pub fn new(max_bytes: usize) -> Self {
        Self {
            max_bytes,
            consumed: 0,
            headers: HeaderMap::new(),
            host: None,
            content_length: None,
            chunked: false,
            connection_tokens: HashSet::new(),
            expect: None,
        }
    }

    /// Records one raw header line. Returns `false` once the blank line ending the
    /// header section has been consumed.
    pub fn push_line(&mut self, line: &str) -> Result<bool> {
        self.reserve(line.len())?;
        let trimmed = line.trim_end_matches(['\r', '\n']);
        if trimmed.is_empty() {
            return Ok(false);
        }

        let (name, value) = trimmed
            .split_once(':')
            .ok_or_else(|| anyhow!("header missing ':' separator"))?;
        let name = name.trim();
        let value = value.trim();
        ensure!(!name.is_empty(), "header name must not be empty");
        let header_name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| anyhow!("invalid header name '{name}'"))?;

        match classify_request_header(header_name.as_str()) {
            HeaderDisposition::Connection => {
                self.connection_tokens.extend(
                    value
                        .split(',')
                        .map(|token| token.trim().to_ascii_lowercase())
                        .filter(|token| !token.is_empty()),
                );
            }
            HeaderDisposition::Host => {
                if self.host.is_some() {
                    bail!("duplicate Host header");
                }
                ensure!(!value.is_empty(), "Host header must not be empty");
                self.host = Some(value.to_ascii_lowercase());
            }
            HeaderDisposition::ContentLength => {
                ensure!(
                    !self.chunked,
                    "request must not include both Content-Length and Transfer-Encoding"
                );
                if self.content_length.is_some() {
                    bail!("multiple Content-Length headers are not supported");
                }
                let length = value
                    .parse::<usize>()
                    .with_context(|| format!("invalid Content-Length value '{value}'"))?;
                self.content_length = Some(length);
            }
            HeaderDisposition::TransferEncoding => {
                ensure!(
                    self.content_length.is_none(),
                    "request must not include both Content-Length and Transfer-Encoding"
                );
                if self.chunked {
                    bail!("duplicate Transfer-Encoding header");
                }
                if !value.trim().eq_ignore_ascii_case("chunked") {
                    bail!("unsupported Transfer-Encoding '{value}'");
                }
                self.chunked = true;
            }
            HeaderDisposition::Skip => {
                if header_name == http::header::EXPECT {
                    self.expect = Some(value.to_string());
                }
            }
            HeaderDisposition::Forward => {
                let header_value = HeaderValue::from_str(value)
                    .map_err(|_| anyhow!("invalid value for header '{name}'"))?;
                self.headers.append(header_name, header_value);
            }
        }
        Ok(true)
    }

    fn reserve(&mut self, byte_len: usize) -> Result<()> {
        self.consumed = self
            .consumed
            .checked_add(byte_len)
            .filter(|consumed| *consumed <= self.max_bytes)
            .ok_or_else(|| anyhow!("header section exceeds configured limit"))?;
        Ok(())
    }

    pub fn host(&self) -> Option<&str> {
        self.host.as_deref()
    }

    pub fn content_length(&self) -> Option<usize> {
        self.content_length
    }

    pub fn is_chunked(&self) -> bool {
        self.chunked
    }

    pub fn total_bytes(&self) -> usize {
        self.consumed
    }

    pub fn has_connection_token(&self, token: &str) -> bool {
        self.connection_tokens.contains(token)
    }

    pub fn wants_connection_close(&self) -> bool {
        self.has_connection_token("close")
    }

    pub fn expect_continue(&self) -> Result<bool> {
        match self.expect.as_deref() {
            None => Ok(false),
            Some(value) if value.eq_ignore_ascii_case("100-continue") => Ok(true),
            Some(value) => bail!("unsupported Expect header value '{value}'"),
        }
    }

    /// End-to-end headers to forward, minus any named by a `Connection` token.
    pub fn into_forward_headers(self) -> HeaderMap {
        let Self {
            mut headers,
            connection_tokens,
            ..
        } = self;
        for token in &connection_tokens {
            if let Ok(name) = HeaderName::from_bytes(token.as_bytes()) {
                headers.remove(name);
            }
        }
        headers
    }
}
