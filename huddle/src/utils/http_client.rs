use std::{sync::OnceLock, time::Duration};

use tracing::debug;

/// Install the aws-lc-rs rustls provider once per process.
///
/// reqwest is built without a bundled provider, so this must run before the
/// first client is constructed.
pub fn install_rustls_provider() {
    static PROVIDER_INSTALLED: OnceLock<()> = OnceLock::new();
    PROVIDER_INSTALLED.get_or_init(|| {
        if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
            // Another crate got there first.
            debug!(existing_provider = ?e, "rustls CryptoProvider already installed");
        }
    });
}

/// Build a client for provider APIs with a per-request timeout.
///
/// HTTP/2 is negotiated through ALPN where the server offers it (APNs
/// requires it).
pub fn build_client(request_timeout: Duration) -> crate::Result<reqwest::Client> {
    install_rustls_provider();

    reqwest::Client::builder()
        .timeout(request_timeout)
        .connect_timeout(Duration::from_secs(10))
        .pool_idle_timeout(Duration::from_secs(90))
        .user_agent(concat!("huddle/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| crate::Error::config(format!("Failed to build HTTP client: {e}")))
}
