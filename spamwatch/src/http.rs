//! Shared HTTP client setup.

use std::sync::OnceLock;
use std::time::Duration;

use tracing::debug;

/// Install the process-wide rustls crypto provider once.
pub fn install_rustls_provider() {
    static PROVIDER_INSTALLED: OnceLock<()> = OnceLock::new();
    PROVIDER_INSTALLED.get_or_init(|| {
        if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
            debug!(existing_provider = ?e, "rustls CryptoProvider already installed");
        }
    });
}

/// A client builder with the crate's user agent and a request timeout.
pub fn client_builder(timeout: Duration) -> reqwest::ClientBuilder {
    install_rustls_provider();
    reqwest::Client::builder()
        .user_agent(concat!("spamwatch/", env!("CARGO_PKG_VERSION")))
        .timeout(timeout)
}
