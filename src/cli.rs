use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Parser)]
#[command(
    name = "artifact-proxy",
    about = "Caching forward proxy backed by an artifact store"
)]
pub struct Cli {
    /// Path to the runtime configuration file (defaults to ./artifact-proxy.toml if present).
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Proxy listen address, overriding the configured value.
    #[arg(long)]
    pub listen: Option<SocketAddr>,

    /// Log output format, overriding the configured value.
    #[arg(long, value_enum)]
    pub log: Option<LogFormat>,

    /// Emit an access log event for every proxied request.
    #[arg(short, long)]
    pub verbose: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Text,
}

impl LogFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            LogFormat::Json => "json",
            LogFormat::Text => "text",
        }
    }
}
