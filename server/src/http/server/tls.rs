use core::net::SocketAddr;

use axum_server::tls_rustls::RustlsConfig as AxumRustlsConfig;
use eyre::WrapErr as _;

use crate::config::TlsConfig;

/// Setup TLS configuration for HTTPS server from the configured PEM files.
#[tracing::instrument]
pub(crate) async fn setup_tls_config(
    tls_cfg: &TlsConfig,
    addr: SocketAddr,
) -> eyre::Result<AxumRustlsConfig> {
    let TlsConfig {
        ref cert_path,
        ref key_path,
    } = *tls_cfg;

    for path in [cert_path, key_path] {
        if !path.exists() {
            eyre::bail!("TLS configuration error: {} does not exist", path.display());
        }
    }

    let rustls_cfg = AxumRustlsConfig::from_pem_file(cert_path, key_path)
        .await
        .wrap_err(format!(
            "Failed to load TLS certificates from cert: {}, key: {}",
            cert_path.display(),
            key_path.display()
        ))?;
    tracing::info!("Listening on https://{}", addr);
    Ok(rustls_cfg)
}
