//! ACME error types.

use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;

/// Errors from certificate issuance
#[derive(Error, Debug)]
pub enum AcmeError {
    #[error("ACME protocol error: {0}")]
    Protocol(#[from] instant_acme::Error),

    #[error("Order creation failed: {0}")]
    OrderCreation(String),

    #[error("No supported challenge offered for {0}")]
    NoSupportedChallenge(String),

    #[error("Authorization for {domain} failed: {status}")]
    Authorization { domain: String, status: String },

    #[error("Order became invalid: {0}")]
    OrderInvalid(String),

    #[error("Timeout after {0:?} waiting for {1}")]
    Timeout(Duration, &'static str),

    #[error("Challenge responder could not bind {addr}: {source}")]
    Responder {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("Certificate generation failed: {0}")]
    CertificateGeneration(#[from] rcgen::Error),

    #[error("Invalid certificate: {0}")]
    InvalidCertificate(String),

    #[error("TLS configuration error: {0}")]
    Tls(#[from] rustls::Error),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors from the on-disk certificate store
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
