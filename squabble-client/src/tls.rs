//! TLS connector for client.

use crate::config::TlsClientConfig;
use crate::error::ClientError;
use rustls::pki_types::ServerName;
use rustls::RootCertStore;
use squabble_core::pem::load_certs;
use std::sync::Arc;
use tokio_rustls::TlsConnector;

/// Creates a TLS connector from client configuration.
pub fn create_tls_connector(
    config: &TlsClientConfig,
    server_host: &str,
) -> Result<(TlsConnector, ServerName<'static>), ClientError> {
    let mut root_store = RootCertStore::empty();
    match config.ca_cert_path {
        Some(ref ca_path) => {
            let certs = load_certs(ca_path).map_err(|e| ClientError::TlsConfig(e.to_string()))?;
            for cert in certs {
                root_store
                    .add(cert)
                    .map_err(|e| ClientError::TlsConfig(format!("invalid CA cert: {}", e)))?;
            }
        }
        None => root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned()),
    }

    let client_config = rustls::ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth();
    let connector = TlsConnector::from(Arc::new(client_config));

    let server_name_str = config.server_name.as_deref().unwrap_or(server_host);
    let server_name = ServerName::try_from(server_name_str.to_string())
        .map_err(|_| ClientError::TlsConfig(format!("invalid server name: {}", server_name_str)))?;

    Ok((connector, server_name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_connector_with_web_roots() {
        let (_, name) = create_tls_connector(&TlsClientConfig::new(), "chat.example.com").unwrap();
        assert_eq!(name.to_str(), "chat.example.com");
    }

    #[test]
    fn test_server_name_override() {
        let config = TlsClientConfig::new().with_server_name("squabble.internal");
        let (_, name) = create_tls_connector(&config, "10.0.0.5").unwrap();
        assert_eq!(name.to_str(), "squabble.internal");
    }

    #[test]
    fn test_invalid_server_name() {
        let result = create_tls_connector(&TlsClientConfig::new(), "not a host name");
        assert!(matches!(result, Err(ClientError::TlsConfig(_))));
    }

    #[test]
    fn test_missing_ca_file() {
        let config = TlsClientConfig::new().with_ca_cert("/nonexistent/ca.pem");
        let result = create_tls_connector(&config, "localhost");
        match result {
            Err(e) => assert!(e.to_string().contains("cannot open cert file")),
            Ok(_) => panic!("expected error"),
        }
    }

    #[test]
    fn test_empty_ca_file() {
        let mut ca = NamedTempFile::new().unwrap();
        ca.write_all(b"").unwrap();
        let config = TlsClientConfig::new().with_ca_cert(ca.path());
        assert!(create_tls_connector(&config, "localhost").is_err());
    }
}
