//! ACME-backed TLS configuration
//!
//! Turns the environment's ACME settings into a ready-to-serve rustls
//! configuration, or reports that ACME is disabled so the caller can fall
//! back to the self-signed pair.

use std::sync::Arc;

use registry_gate_config::{acme_env_vars, AcmeConfig};
use rustls::ServerConfig;
use tracing::{debug, info};

use super::error::AcmeSetupError;
use super::roots::trusted_roots_with;
use super::HTTP_ALPN_PROTOCOLS;
use crate::acme::{AcmeSettings, CertificateIssuer, DEFAULT_TLS_ALPN_PORT};

/// Builds the dynamic TLS configuration through an injected issuer
#[derive(Debug)]
pub struct TlsConfigProvider<I> {
    issuer: I,
}

impl<I: CertificateIssuer> TlsConfigProvider<I> {
    pub fn new(issuer: I) -> Self {
        Self { issuer }
    }

    pub fn issuer(&self) -> &I {
        &self.issuer
    }

    /// Build from the process environment.
    ///
    /// `Ok(None)` means ACME is disabled.
    pub async fn build(&self) -> Result<Option<ServerConfig>, AcmeSetupError> {
        self.build_from_vars(acme_env_vars()?).await
    }

    /// Build from an explicit set of environment variables
    pub async fn build_from_vars<V>(&self, vars: V) -> Result<Option<ServerConfig>, AcmeSetupError>
    where
        V: IntoIterator<Item = (String, String)>,
    {
        let Some(config) = AcmeConfig::from_vars(vars)? else {
            info!("ACME disabled, static certificate required");
            return Ok(None);
        };

        self.build_for(&config).await.map(Some)
    }

    /// Request a configuration for an already loaded ACME config.
    ///
    /// Issuer errors are returned unchanged.
    pub async fn build_for(&self, config: &AcmeConfig) -> Result<ServerConfig, AcmeSetupError> {
        let settings = acme_settings(config)?;

        info!(
            domains = ?config.domains,
            directory = settings.directory_url(),
            tls_alpn_port = settings.tls_alpn_port,
            "Requesting ACME TLS configuration"
        );

        let mut tls = self.issuer.tls_config(&settings, &config.domains).await?;
        tls.alpn_protocols = merge_alpn(std::mem::take(&mut tls.alpn_protocols));

        debug!(
            protocols = ?tls
                .alpn_protocols
                .iter()
                .map(|p| String::from_utf8_lossy(p).into_owned())
                .collect::<Vec<_>>(),
            "Negotiable ALPN protocols"
        );
        Ok(tls)
    }
}

/// Translate loaded configuration into issuer settings.
///
/// The TLS-ALPN challenge port defaults to 8443: the registry is expected to
/// sit behind a 443 -> 8443 port mapping.
pub fn acme_settings(config: &AcmeConfig) -> Result<AcmeSettings, AcmeSetupError> {
    let trusted_roots = match &config.ca_root_path {
        Some(path) => {
            let roots = trusted_roots_with(path).map_err(AcmeSetupError::CaRoot)?;
            Some(Arc::new(roots))
        }
        None => None,
    };

    Ok(AcmeSettings {
        email: config.email.clone(),
        directory_url: config.ca.clone(),
        http_port: config.alt_http_port,
        tls_alpn_port: config.alt_tls_alpn_port.unwrap_or(DEFAULT_TLS_ALPN_PORT),
        trusted_roots,
        storage_path: config.storage_path.clone(),
    })
}

/// Prefer HTTP protocols while keeping whatever the issuer negotiates.
///
/// The issuer's entries (e.g. `acme-tls/1` for renewal handshakes) follow
/// `h2` and `http/1.1`; none are dropped.
pub fn merge_alpn(existing: Vec<Vec<u8>>) -> Vec<Vec<u8>> {
    let mut merged: Vec<Vec<u8>> = HTTP_ALPN_PROTOCOLS.iter().map(|p| p.to_vec()).collect();
    merged.extend(existing);
    merged
}
