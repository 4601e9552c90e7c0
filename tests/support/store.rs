use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use super::http_utils::{RecordedRequest, read_request};

pub const STORE_TOKEN: &str = "store-token";

#[derive(Debug, Clone)]
pub struct StoredArtifact {
    pub body: Vec<u8>,
    pub sha256: Option<String>,
    pub checksum_deploy: Option<String>,
    pub authorization: Option<String>,
}

#[derive(Default)]
struct StoreState {
    artifacts: Mutex<HashMap<String, StoredArtifact>>,
    available: AtomicBool,
    heads: AtomicUsize,
    puts: AtomicUsize,
    gets: AtomicUsize,
    get_authorizations: Mutex<Vec<Option<String>>>,
}

/// Artifactory-style store kept in memory: HEAD probes, PUT deploys and GET
/// downloads keyed by request path. While unavailable every request gets 503.
pub struct MockStore {
    addr: SocketAddr,
    state: Arc<StoreState>,
    handle: JoinHandle<()>,
}

impl MockStore {
    pub async fn spawn() -> Result<Self> {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await?;
        let addr = listener.local_addr()?;
        let state = Arc::new(StoreState::default());
        state.available.store(true, Ordering::SeqCst);

        let handle = {
            let state = state.clone();
            tokio::spawn(async move {
                loop {
                    let (stream, _) = match listener.accept().await {
                        Ok(conn) => conn,
                        Err(_) => break,
                    };
                    let state = state.clone();
                    tokio::spawn(async move {
                        let mut reader = BufReader::new(stream);
                        let Ok(Some(request)) = read_request(&mut reader).await else {
                            return;
                        };
                        let response = state.respond(request);
                        let mut stream = reader.into_inner();
                        let _ = stream.write_all(&response).await;
                        let _ = stream.shutdown().await;
                    });
                }
            })
        };

        Ok(Self {
            addr,
            state,
            handle,
        })
    }

    pub fn base_url(&self) -> String {
        format!("http://{}/artifactory", self.addr)
    }

    pub fn set_available(&self, available: bool) {
        self.state.available.store(available, Ordering::SeqCst);
    }

    pub fn heads(&self) -> usize {
        self.state.heads.load(Ordering::SeqCst)
    }

    pub fn puts(&self) -> usize {
        self.state.puts.load(Ordering::SeqCst)
    }

    pub fn gets(&self) -> usize {
        self.state.gets.load(Ordering::SeqCst)
    }

    pub fn artifacts(&self) -> HashMap<String, StoredArtifact> {
        self.state.artifacts.lock().unwrap().clone()
    }

    pub fn get_authorizations(&self) -> Vec<Option<String>> {
        self.state.get_authorizations.lock().unwrap().clone()
    }
}

impl Drop for MockStore {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

impl StoreState {
    fn respond(&self, request: RecordedRequest) -> Vec<u8> {
        if !self.available.load(Ordering::SeqCst) {
            return status_only(503, "Service Unavailable");
        }
        if request.target.ends_with("/api/system/ping") {
            return with_body(200, "OK", b"OK");
        }

        match request.method.as_str() {
            "HEAD" => {
                self.heads.fetch_add(1, Ordering::SeqCst);
                if self.artifacts.lock().unwrap().contains_key(&request.target) {
                    status_only(200, "OK")
                } else {
                    status_only(404, "Not Found")
                }
            }
            "PUT" => {
                let artifact = StoredArtifact {
                    sha256: request.header("x-checksum-sha256").map(str::to_string),
                    checksum_deploy: request.header("x-checksum-deploy").map(str::to_string),
                    authorization: request.header("authorization").map(str::to_string),
                    body: request.body,
                };
                self.artifacts
                    .lock()
                    .unwrap()
                    .insert(request.target, artifact);
                // Counted after the insert so waiters observe the stored artifact.
                self.puts.fetch_add(1, Ordering::SeqCst);
                status_only(201, "Created")
            }
            "GET" => {
                self.gets.fetch_add(1, Ordering::SeqCst);
                self.get_authorizations
                    .lock()
                    .unwrap()
                    .push(request.header("authorization").map(str::to_string));
                match self.artifacts.lock().unwrap().get(&request.target) {
                    Some(artifact) => with_body(200, "OK", &artifact.body),
                    None => status_only(404, "Not Found"),
                }
            }
            _ => status_only(405, "Method Not Allowed"),
        }
    }
}

fn status_only(code: u16, reason: &str) -> Vec<u8> {
    format!("HTTP/1.1 {code} {reason}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n")
        .into_bytes()
}

fn with_body(code: u16, reason: &str, body: &[u8]) -> Vec<u8> {
    let mut response = format!(
        "HTTP/1.1 {code} {reason}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        body.len()
    )
    .into_bytes();
    response.extend_from_slice(body);
    response
}
