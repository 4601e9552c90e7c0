pub mod connect;
pub mod forward_error;
pub mod headers;
pub mod hooks;
pub mod http;
pub mod listener;
pub mod redirect;
pub mod request;
pub mod upstream;

use anyhow::Result;
use std::sync::Arc;

use crate::settings::Settings;

use self::hooks::ProxyHooks;
use self::upstream::OutboundTransport;

#[derive(Clone)]
pub struct AppContext {
    pub settings: Arc<Settings>,
    pub transport: OutboundTransport,
    pub hooks: Arc<dyn ProxyHooks>,
}

impl AppContext {
    pub fn new(
        settings: Arc<Settings>,
        transport: OutboundTransport,
        hooks: Arc<dyn ProxyHooks>,
    ) -> Self {
        Self {
            settings,
            transport,
            hooks,
        }
    }
}

pub async fn run(app: AppContext) -> Result<()> {
    listener::start_listener(app).await
}
