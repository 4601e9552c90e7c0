use std::net::SocketAddr;

use anyhow::Result;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

use super::http_utils::{HttpResponse, parse_http_response, read_http_response, read_until_double_crlf};

pub struct ProxyClient {
    stream: TcpStream,
}

impl ProxyClient {
    pub async fn connect(addr: SocketAddr) -> Result<Self> {
        Ok(Self {
            stream: TcpStream::connect(addr).await?,
        })
    }

    pub async fn send(&mut self, request: impl AsRef<[u8]>) -> Result<()> {
        self.stream.write_all(request.as_ref()).await?;
        self.stream.flush().await?;
        Ok(())
    }

    pub async fn read_response(&mut self) -> Result<String> {
        read_http_response(&mut self.stream).await
    }

    pub async fn read_headers(&mut self) -> Result<String> {
        read_until_double_crlf(&mut self.stream).await
    }

    pub fn stream_mut(&mut self) -> &mut TcpStream {
        &mut self.stream
    }
}

/// Sends a single absolute-form request through the proxy and reads the
/// response until the proxy closes the connection.
pub async fn proxy_request(
    proxy: SocketAddr,
    method: &str,
    url: &str,
    extra_headers: &[(&str, &str)],
    body: &str,
) -> Result<HttpResponse> {
    let parsed = url::Url::parse(url)?;
    let host = match parsed.port() {
        Some(port) => format!("{}:{port}", parsed.host_str().unwrap_or_default()),
        None => parsed.host_str().unwrap_or_default().to_string(),
    };
    let mut request = format!("{method} {url} HTTP/1.1\r\nHost: {host}\r\nConnection: close\r\n");
    for (name, value) in extra_headers {
        request.push_str(&format!("{name}: {value}\r\n"));
    }
    if !body.is_empty() {
        request.push_str(&format!("Content-Length: {}\r\n", body.len()));
    }
    request.push_str("\r\n");
    request.push_str(body);

    let mut client = ProxyClient::connect(proxy).await?;
    client.send(request).await?;
    let raw = client.read_response().await?;
    parse_http_response(&raw)
}
