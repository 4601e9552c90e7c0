#![allow(dead_code)]
#![allow(unused_imports)]

pub mod harness;
pub mod http_utils;
pub mod origin;
pub mod proxy_client;
pub mod store;

use std::time::Duration as StdDuration;

use anyhow::{Result, anyhow};
use tokio::time::sleep;

pub use harness::ProxyHarness;
pub use http_utils::{HttpResponse, parse_http_response};
pub use origin::MockOrigin;
pub use proxy_client::{ProxyClient, proxy_request};
pub use store::{MockStore, STORE_TOKEN};

/// Polls `condition` until it holds, for background work such as cache fills.
pub async fn wait_until(mut condition: impl FnMut() -> bool) -> Result<()> {
    for _ in 0..100 {
        if condition() {
            return Ok(());
        }
        sleep(StdDuration::from_millis(20)).await;
    }
    Err(anyhow!("condition not reached within 2s"))
}
