//! PEM loading for TLS certificates and private keys.

use crate::error::CoreError;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

/// Loads every certificate in a PEM file.
pub fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, CoreError> {
    let file = File::open(path)
        .map_err(|e| CoreError::Tls(format!("cannot open cert file {:?}: {}", path, e)))?;
    let mut reader = BufReader::new(file);

    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| CoreError::Tls(format!("invalid cert file {:?}: {}", path, e)))?;

    if certs.is_empty() {
        return Err(CoreError::Tls(format!(
            "no certificates found in {:?}",
            path
        )));
    }
    Ok(certs)
}

/// Loads the first private key (PKCS#1, PKCS#8 or SEC1) in a PEM file.
pub fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>, CoreError> {
    let file = File::open(path)
        .map_err(|e| CoreError::Tls(format!("cannot open key file {:?}: {}", path, e)))?;
    let mut reader = BufReader::new(file);

    loop {
        match rustls_pemfile::read_one(&mut reader)
            .map_err(|e| CoreError::Tls(format!("invalid key file {:?}: {}", path, e)))?
        {
            Some(rustls_pemfile::Item::Pkcs1Key(key)) => return Ok(key.into()),
            Some(rustls_pemfile::Item::Pkcs8Key(key)) => return Ok(key.into()),
            Some(rustls_pemfile::Item::Sec1Key(key)) => return Ok(key.into()),
            None => {
                return Err(CoreError::Tls(format!(
                    "no private key found in {:?}",
                    path
                )))
            }
            _ => continue,
        }
    }
}
