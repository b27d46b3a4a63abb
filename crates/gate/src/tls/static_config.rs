//! Serving from a certificate/key pair on disk.

use std::fs;
use std::path::Path;

use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::ServerConfig;
use tracing::info;

use super::error::TlsError;
use super::{server_config_builder, HTTP_ALPN_PROTOCOLS};

/// Parse every certificate in a PEM buffer, skipping malformed sections
pub fn parse_cert_chain(pem: &[u8]) -> Vec<CertificateDer<'static>> {
    rustls_pemfile::certs(&mut &pem[..])
        .filter_map(Result::ok)
        .collect()
}

/// Parse the first private key (PKCS#1, PKCS#8 or SEC1) in a PEM buffer
pub fn parse_private_key(pem: &[u8]) -> Option<PrivateKeyDer<'static>> {
    rustls_pemfile::private_key(&mut &pem[..]).ok().flatten()
}

/// Build a server configuration from a static certificate and key.
///
/// A certificate without its key is rejected outright; the pair is only
/// trusted when both halves are present and parse.
pub fn load_static_server_config(cert_path: &Path, key_path: &Path) -> Result<ServerConfig, TlsError> {
    if !key_path.exists() {
        return Err(TlsError::MissingKey {
            cert: cert_path.to_path_buf(),
            key: key_path.to_path_buf(),
        });
    }

    let cert_pem = read(cert_path)?;
    let certs = parse_cert_chain(&cert_pem);
    if certs.is_empty() {
        return Err(TlsError::NoCertificates(cert_path.to_path_buf()));
    }

    let key_pem = read(key_path)?;
    let key = parse_private_key(&key_pem)
        .ok_or_else(|| TlsError::NoPrivateKey(key_path.to_path_buf()))?;

    let mut config = server_config_builder()?
        .with_no_client_auth()
        .with_single_cert(certs, key)?;
    config.alpn_protocols = HTTP_ALPN_PROTOCOLS.iter().map(|p| p.to_vec()).collect();

    info!(
        cert = %cert_path.display(),
        "Loaded static TLS certificate"
    );
    Ok(config)
}

fn read(path: &Path) -> Result<Vec<u8>, TlsError> {
    fs::read(path).map_err(|source| TlsError::Read {
        path: path.to_path_buf(),
        source,
    })
}
