//! TLS configuration and acceptor.

use crate::config::TlsConfig;
use crate::error::ServerError;
use squabble_core::pem::{load_certs, load_private_key};
use std::sync::Arc;
use tokio_rustls::TlsAcceptor;

/// Loads TLS certificates and creates a TLS acceptor.
pub fn create_tls_acceptor(config: &TlsConfig) -> Result<TlsAcceptor, ServerError> {
    let cert_path = config
        .cert_path
        .as_ref()
        .ok_or_else(|| ServerError::TlsConfig("cert_path not set".into()))?;
    let key_path = config
        .key_path
        .as_ref()
        .ok_or_else(|| ServerError::TlsConfig("key_path not set".into()))?;

    let certs = load_certs(cert_path).map_err(|e| ServerError::TlsConfig(e.to_string()))?;
    let key = load_private_key(key_path).map_err(|e| ServerError::TlsConfig(e.to_string()))?;

    let server_config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| ServerError::TlsConfig(format!("invalid server cert/key: {}", e)))?;

    Ok(TlsAcceptor::from(Arc::new(server_config)))
}
