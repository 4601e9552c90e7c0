use std::fmt;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Result, ensure};
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use url::Url;

use crate::cli::{Cli, LogFormat};

fn default_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

fn default_log_format() -> LogFormat {
    LogFormat::Json
}

fn default_client_timeout() -> u64 {
    30
}

fn default_upstream_connect_timeout() -> u64 {
    5
}

fn default_upstream_timeout() -> u64 {
    300
}

fn default_upstream_pool_capacity() -> usize {
    32
}

fn default_max_request_header_size() -> usize {
    32 * 1024
}

fn default_max_request_body_size() -> usize {
    64 * 1024 * 1024
}

fn default_cache_max_artifact_size() -> u64 {
    512 * 1024 * 1024
}

fn default_store_ping_path() -> String {
    "api/system/ping".to_string()
}

fn default_store_timeout() -> u64 {
    30
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,
    #[serde(default = "default_log_format")]
    pub log: LogFormat,
    #[serde(default)]
    pub access_log: bool,
    #[serde(default = "default_client_timeout")]
    pub client_timeout: u64,
    #[serde(default = "default_upstream_connect_timeout")]
    pub upstream_connect_timeout: u64,
    #[serde(default = "default_upstream_timeout")]
    pub upstream_timeout: u64,
    #[serde(default = "default_upstream_pool_capacity")]
    pub upstream_pool_capacity: usize,
    #[serde(default = "default_max_request_header_size")]
    pub max_request_header_size: usize,
    #[serde(default = "default_max_request_body_size")]
    pub max_request_body_size: usize,
    #[serde(default = "default_cache_max_artifact_size")]
    pub cache_max_artifact_size: u64,
    pub store: StoreSettings,
}

/// Connection details for the artifact store backing the cache.
#[derive(Clone, Deserialize)]
pub struct StoreSettings {
    pub url: Url,
    #[serde(default)]
    pub token: Option<String>,
    pub repository: String,
    #[serde(default = "default_store_ping_path")]
    pub ping_path: String,
    #[serde(default = "default_store_timeout")]
    pub timeout: u64,
}

impl fmt::Debug for StoreSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreSettings")
            .field("url", &self.url.as_str())
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("repository", &self.repository)
            .field("ping_path", &self.ping_path)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl StoreSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }
}

impl Settings {
    pub fn load(cli: &Cli) -> Result<Self> {
        let mut builder = Config::builder();

        if let Some(config_path) = resolve_config_path(cli) {
            builder = builder.add_source(File::from(config_path).required(true));
        }

        builder = builder.add_source(
            Environment::with_prefix("ARTIFACT_PROXY")
                .separator("__")
                .try_parsing(true),
        );

        builder = builder
            .set_override_option("listen", cli.listen.map(|addr| addr.to_string()))
            .map_err(to_anyhow)?
            .set_override_option("log", cli.log.map(|format| format.as_str().to_string()))
            .map_err(to_anyhow)?;
        if cli.verbose {
            builder = builder
                .set_override("access_log", true)
                .map_err(to_anyhow)?;
        }

        let cfg = builder.build().map_err(to_anyhow)?;
        let settings: Settings = cfg.try_deserialize().map_err(to_anyhow)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn client_timeout(&self) -> Duration {
        Duration::from_secs(self.client_timeout)
    }

    pub fn upstream_connect_timeout(&self) -> Duration {
        Duration::from_secs(self.upstream_connect_timeout)
    }

    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_secs(self.upstream_timeout)
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.upstream_pool_capacity > 0,
            "upstream_pool_capacity must be at least 1 (got {})",
            self.upstream_pool_capacity
        );
        ensure!(
            self.max_request_header_size > 0,
            "max_request_header_size must be greater than 0 (got {})",
            self.max_request_header_size
        );
        ensure!(
            self.max_request_body_size > 0,
            "max_request_body_size must be greater than 0 (got {})",
            self.max_request_body_size
        );
        ensure!(
            self.cache_max_artifact_size > 0,
            "cache_max_artifact_size must be greater than 0 (got {})",
            self.cache_max_artifact_size
        );
        ensure!(
            self.client_timeout > 0,
            "client_timeout must be greater than 0 seconds (got {})",
            self.client_timeout
        );
        ensure!(
            self.upstream_connect_timeout > 0,
            "upstream_connect_timeout must be greater than 0 seconds (got {})",
            self.upstream_connect_timeout
        );
        ensure!(
            self.upstream_timeout > 0,
            "upstream_timeout must be greater than 0 seconds (got {})",
            self.upstream_timeout
        );
        ensure!(
            self.store.timeout > 0,
            "store.timeout must be greater than 0 seconds (got {})",
            self.store.timeout
        );
        ensure!(
            matches!(self.store.url.scheme(), "http" | "https"),
            "store.url must use http or https (got '{}')",
            self.store.url.scheme()
        );
        ensure!(
            !self.store.url.cannot_be_a_base(),
            "store.url must be a hierarchical URL (got '{}')",
            self.store.url
        );
        ensure!(
            !self.store.repository.trim_matches('/').is_empty(),
            "store.repository must not be empty"
        );
        Ok(())
    }
}

fn to_anyhow(err: ConfigError) -> anyhow::Error {
    anyhow::anyhow!(err)
}

impl Cli {
    pub fn config_path(&self) -> Option<&Path> {
        self.config.as_deref()
    }
}

fn resolve_config_path(cli: &Cli) -> Option<PathBuf> {
    if let Some(path) = cli.config_path() {
        return Some(path.to_path_buf());
    }

    default_config_candidates()
        .into_iter()
        .find(|candidate| candidate.exists())
}

fn default_config_candidates() -> [PathBuf; 2] {
    [
        PathBuf::from("artifact-proxy.toml"),
        PathBuf::from("/etc/artifact-proxy/artifact-proxy.toml"),
    ]
}

#[cfg(test)]
pub(crate) fn test_settings() -> Settings {
    Settings {
        listen: "127.0.0.1:0".parse().unwrap(),
        log: LogFormat::Text,
        access_log: false,
        client_timeout: 30,
        upstream_connect_timeout: 5,
        upstream_timeout: 60,
        upstream_pool_capacity: 32,
        max_request_header_size: 1024,
        max_request_body_size: 1024,
        cache_max_artifact_size: 1024,
        store: StoreSettings {
            url: "http://localhost:8081/artifactory".parse().unwrap(),
            token: Some("secret-token".to_string()),
            repository: "proxy".to_string(),
            ping_path: default_store_ping_path(),
            timeout: 30,
        },
    }
}
