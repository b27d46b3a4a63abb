//! TLS error types.

use std::io;
use std::path::PathBuf;

use registry_gate_config::ConfigError;
use thiserror::Error;

use crate::acme::AcmeError;

/// Filesystem and certificate errors for the static identity
#[derive(Debug, Error)]
pub enum TlsError {
    #[error("failed to create directory {}: {source}", .path.display())]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to write {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("no certificates found in {}", .0.display())]
    NoCertificates(PathBuf),

    #[error("no private key found in {}", .0.display())]
    NoPrivateKey(PathBuf),

    #[error("certificate {} has no matching key file {}", .cert.display(), .key.display())]
    MissingKey { cert: PathBuf, key: PathBuf },

    #[error("key generation failed: {0}")]
    KeyGeneration(#[from] rsa::Error),

    #[error("key encoding failed: {0}")]
    KeyEncoding(String),

    #[error("random number generation failed: {0}")]
    Random(#[from] rand::Error),

    #[error("certificate generation failed: {0}")]
    Certificate(#[from] rcgen::Error),

    #[error("TLS configuration error: {0}")]
    Rustls(#[from] rustls::Error),
}

/// Errors from building the ACME-backed TLS configuration.
///
/// [`AcmeSetupError::Config`] means the configuration could not be loaded,
/// so ACME was never enabled. Every other variant is reported after ACME was
/// enabled and must not be answered by silently falling back to the
/// self-signed identity.
#[derive(Debug, Error)]
pub enum AcmeSetupError {
    #[error("invalid ACME configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("invalid ACME CA root: {0}")]
    CaRoot(#[source] TlsError),

    #[error(transparent)]
    Issuer(#[from] AcmeError),
}

impl AcmeSetupError {
    /// Whether ACME had been enabled when the error occurred
    pub fn acme_enabled(&self) -> bool {
        !matches!(self, AcmeSetupError::Config(_))
    }
}
