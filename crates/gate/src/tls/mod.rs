//! TLS server identity for the registry front-end
//!
//! Two sources of identity are supported:
//!
//! - An ACME-issued certificate, obtained and renewed through a
//!   [`CertificateIssuer`](crate::acme::CertificateIssuer). See
//!   [`TlsConfigProvider`].
//! - A self-signed fallback pair on disk, created on first start by
//!   [`ensure_self_signed`] and loaded with [`load_static_server_config`].
//!
//! All rustls configurations built here use the aws-lc-rs provider
//! explicitly, so the process never depends on a global default provider.

mod bootstrap;
mod error;
mod provider;
mod roots;
mod static_config;

use std::sync::Arc;

use rustls::crypto::CryptoProvider;
use rustls::{ConfigBuilder, ServerConfig, WantsVerifier};

pub use bootstrap::{
    ensure_self_signed, generate_self_signed, BootstrapOutcome, SELF_SIGNED_COMMON_NAME,
    SELF_SIGNED_SANS,
};
pub use error::{AcmeSetupError, TlsError};
pub use provider::{acme_settings, merge_alpn, TlsConfigProvider};
pub use roots::{default_client_roots, system_roots, trusted_roots_with};
pub use static_config::{load_static_server_config, parse_cert_chain, parse_private_key};

/// ALPN protocols preferred for regular registry traffic, in order
pub const HTTP_ALPN_PROTOCOLS: [&[u8]; 2] = [b"h2", b"http/1.1"];

/// The crypto provider used for every TLS configuration in the gate
pub fn crypto_provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::aws_lc_rs::default_provider())
}

/// Start a server configuration with safe protocol defaults
pub fn server_config_builder() -> Result<ConfigBuilder<ServerConfig, WantsVerifier>, rustls::Error>
{
    ServerConfig::builder_with_provider(crypto_provider()).with_safe_default_protocol_versions()
}
