use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;

use anyhow::Result;
use rustls::RootCertStore;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use artifact_proxy::{
    build_app,
    cli::LogFormat,
    proxy::listener,
    settings::{Settings, StoreSettings},
    tls::client_config_with_roots,
};

use super::store::STORE_TOKEN;

fn default_test_settings(listen: SocketAddr, store_url: &str) -> Result<Settings> {
    Ok(Settings {
        listen,
        log: LogFormat::Text,
        access_log: true,
        client_timeout: 10,
        upstream_connect_timeout: 5,
        upstream_timeout: 10,
        upstream_pool_capacity: 32,
        max_request_header_size: 32 * 1024,
        max_request_body_size: 1024 * 1024,
        cache_max_artifact_size: 1024 * 1024,
        store: StoreSettings {
            url: store_url.parse()?,
            token: Some(STORE_TOKEN.to_string()),
            repository: "remote-cache".to_string(),
            ping_path: "api/system/ping".to_string(),
            timeout: 5,
        },
    })
}

/// A proxy serving on an ephemeral loopback port for the lifetime of the value.
pub struct ProxyHarness {
    pub addr: SocketAddr,
    pub settings: Arc<Settings>,
    handle: JoinHandle<()>,
}

impl ProxyHarness {
    pub async fn start(store_url: &str) -> Result<Self> {
        Self::start_with(store_url, |_| {}).await
    }

    pub async fn start_with(store_url: &str, configure: impl FnOnce(&mut Settings)) -> Result<Self> {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await?;
        let addr = listener.local_addr()?;
        let mut settings = default_test_settings(addr, store_url)?;
        configure(&mut settings);
        settings.validate()?;
        let settings = Arc::new(settings);

        let tls = client_config_with_roots(RootCertStore::empty())?;
        let app = build_app(settings.clone(), tls).await?;
        let handle = tokio::spawn(async move {
            if let Err(err) = listener::serve(listener, app).await {
                eprintln!("proxy listener failed: {err:?}");
            }
        });

        Ok(Self {
            addr,
            settings,
            handle,
        })
    }
}

impl Drop for ProxyHarness {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
