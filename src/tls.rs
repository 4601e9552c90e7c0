use std::sync::Arc;

use anyhow::Result;
use rustls::crypto::ring;
use rustls::{ClientConfig, RootCertStore};
use rustls_native_certs as native_certs;
use tracing::warn;

/// Builds the rustls client configuration shared by the outbound transport and the
/// store client, trusting the platform's native anchors.
pub fn build_client_config() -> Result<Arc<ClientConfig>> {
    let mut root_store = RootCertStore::empty();

    match native_certs::load_native_certs() {
        Ok(certs) => {
            let (added, ignored) = root_store.add_parsable_certificates(certs);
            if ignored > 0 {
                warn!(ignored, "ignored {ignored} invalid system trust anchors");
            }
            if added == 0 {
                warn!(
                    "no trust anchors loaded from system locations; HTTPS origins and stores will fail verification"
                );
            }
        }
        Err(err) => {
            warn!(error = %err, "failed to load system trust anchors");
        }
    }

    client_config_with_roots(root_store)
}

pub fn client_config_with_roots(root_store: RootCertStore) -> Result<Arc<ClientConfig>> {
    let provider = ring::default_provider();
    let builder = ClientConfig::builder_with_provider(provider.into());
    let builder = builder.with_safe_default_protocol_versions()?;
    let builder = builder.with_root_certificates(Arc::new(root_store));
    let mut config = builder.with_no_client_auth();
    config.alpn_protocols = vec![b"http/1.1".to_vec()];
    Ok(Arc::new(config))
}
