//! TLS security context and certificate loading.

use std::fmt;
use std::path::Path;

use axum_server::tls_rustls::RustlsConfig;
use tokio_rustls::TlsAcceptor;

/// Ready-to-use TLS material shared by every server of a process.
#[derive(Clone)]
pub struct SecurityContext {
    config: RustlsConfig,
}

impl SecurityContext {
    pub fn new(config: RustlsConfig) -> Self {
        Self { config }
    }

    /// Configuration handed to the HTTP acceptor.
    pub fn rustls(&self) -> &RustlsConfig {
        &self.config
    }

    /// Acceptor for terminating TLS on raw RPC connections. Picks up the
    /// current certificate each time it is called.
    pub(crate) fn acceptor(&self) -> TlsAcceptor {
        TlsAcceptor::from(self.config.get_inner())
    }
}

impl fmt::Debug for SecurityContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecurityContext").finish_non_exhaustive()
    }
}

/// Load TLS configuration from certificate and key files.
pub async fn load_tls_config(cert_path: &Path, key_path: &Path) -> Result<SecurityContext, std::io::Error> {
    if !cert_path.exists() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("Certificate file not found: {:?}", cert_path),
        ));
    }
    if !key_path.exists() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("Private key file not found: {:?}", key_path),
        ));
    }

    let config = RustlsConfig::from_pem_file(cert_path, key_path).await?;
    tracing::info!(cert = ?cert_path, "TLS configuration loaded");
    Ok(SecurityContext::new(config))
}
