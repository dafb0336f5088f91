use anyhow::{Context, Result};
use axum_server::tls_rustls::RustlsConfig;
use rcgen::{CertifiedKey, generate_simple_self_signed};

use crate::config::TlsMode;

/// Names the self-signed certificate is valid for.
const LOCAL_NAMES: [&str; 2] = ["localhost", "127.0.0.1"];

/// PEM certificate and key for the loopback listener.
pub struct SelfSigned {
    pub cert_pem: String,
    pub key_pem: String,
}

/// Generates a self-signed certificate for `localhost` and `127.0.0.1`.
pub fn self_signed() -> Result<SelfSigned> {
    let subject_alt_names = LOCAL_NAMES.iter().map(|n| n.to_string()).collect::<Vec<_>>();
    let CertifiedKey { cert, key_pair } = generate_simple_self_signed(subject_alt_names)
        .context("Failed to generate self-signed certificate")?;

    Ok(SelfSigned {
        cert_pem: cert.pem(),
        key_pem: key_pair.serialize_pem(),
    })
}

/// Builds the rustls configuration for `mode`.
///
/// # Returns
///
/// `None` when TLS is disabled.
pub async fn rustls_config(mode: &TlsMode) -> Result<Option<RustlsConfig>> {
    match mode {
        TlsMode::Files { cert, key } => {
            let config = RustlsConfig::from_pem_file(cert, key).await.with_context(|| {
                format!(
                    "Failed to load TLS material from {} and {}",
                    cert.display(),
                    key.display()
                )
            })?;
            tracing::info!("🔐 TLS certificate loaded from {}", cert.display());
            Ok(Some(config))
        }
        TlsMode::SelfSigned => {
            let SelfSigned { cert_pem, key_pem } = self_signed()?;
            let config = RustlsConfig::from_pem(cert_pem.into_bytes(), key_pem.into_bytes())
                .await
                .context("Failed to build TLS configuration")?;
            tracing::info!("🔐 Using a self-signed certificate for localhost");
            Ok(Some(config))
        }
        TlsMode::Disabled => {
            tracing::warn!("⚠️ TLS disabled; serving plain HTTP on loopback");
            Ok(None)
        }
    }
}
