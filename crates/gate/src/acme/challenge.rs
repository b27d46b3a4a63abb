//! Pending ACME challenge state
//!
//! Holds HTTP-01 key authorizations served via
//! `/.well-known/acme-challenge/<token>` and TLS-ALPN-01 certificates
//! presented on `acme-tls/1` handshakes.

use std::sync::Arc;

use dashmap::DashMap;
use rcgen::{CertificateParams, CustomExtension, KeyPair};
use rustls::pki_types::{PrivateKeyDer, PrivatePkcs8KeyDer};
use rustls::sign::CertifiedKey;
use tracing::{debug, trace};

use super::error::AcmeError;

/// HTTP-01 challenge path prefix
pub const ACME_CHALLENGE_PREFIX: &str = "/.well-known/acme-challenge/";

/// Manages pending ACME challenges
///
/// The ACME server validates a domain either by fetching a URL (HTTP-01) or
/// by opening a TLS handshake with the `acme-tls/1` protocol (TLS-ALPN-01).
/// This manager stores what to answer in both cases.
///
/// Clones share state, so the client can register challenges while the
/// resolver and responders read them from other tasks.
#[derive(Debug, Clone, Default)]
pub struct ChallengeManager {
    /// Challenge token -> key authorization
    http01: Arc<DashMap<String, String>>,
    /// Lowercased domain -> challenge certificate
    tls_alpn01: Arc<DashMap<String, Arc<CertifiedKey>>>,
}

impl ChallengeManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a pending HTTP-01 challenge
    pub fn add_http01(&self, token: &str, key_authorization: &str) {
        debug!(token = %token, "Registering ACME HTTP-01 challenge");
        self.http01
            .insert(token.to_string(), key_authorization.to_string());
    }

    /// Remove a completed or expired HTTP-01 challenge
    pub fn remove_http01(&self, token: &str) {
        if self.http01.remove(token).is_some() {
            debug!(token = %token, "Removed ACME HTTP-01 challenge");
        }
    }

    /// Key authorization for a challenge token
    pub fn http01_response(&self, token: &str) -> Option<String> {
        let result = self.http01.get(token).map(|v| v.clone());
        trace!(token = %token, found = result.is_some(), "ACME HTTP-01 lookup");
        result
    }

    /// Register the certificate to present for a TLS-ALPN-01 challenge
    pub fn add_tls_alpn(&self, domain: &str, certificate: Arc<CertifiedKey>) {
        debug!(domain = %domain, "Registering ACME TLS-ALPN-01 challenge");
        self.tls_alpn01.insert(domain.to_ascii_lowercase(), certificate);
    }

    pub fn remove_tls_alpn(&self, domain: &str) {
        if self.tls_alpn01.remove(&domain.to_ascii_lowercase()).is_some() {
            debug!(domain = %domain, "Removed ACME TLS-ALPN-01 challenge");
        }
    }

    /// Challenge certificate for a server name, if one is pending
    pub fn tls_alpn_certificate(&self, domain: &str) -> Option<Arc<CertifiedKey>> {
        let result = self
            .tls_alpn01
            .get(&domain.to_ascii_lowercase())
            .map(|v| Arc::clone(&v));
        trace!(domain = %domain, found = result.is_some(), "ACME TLS-ALPN-01 lookup");
        result
    }

    /// Token from an HTTP-01 request path, if it is one
    pub fn extract_token(path: &str) -> Option<&str> {
        path.strip_prefix(ACME_CHALLENGE_PREFIX)
    }

    /// Number of pending challenges of both kinds
    pub fn pending_count(&self) -> usize {
        self.http01.len() + self.tls_alpn01.len()
    }
}

/// Build the RFC 8737 validation certificate for `domain`.
///
/// `key_authorization_digest` is the SHA-256 of the key authorization; it is
/// carried in the critical `id-pe-acmeIdentifier` extension.
pub fn tls_alpn_challenge_certificate(
    domain: &str,
    key_authorization_digest: &[u8],
) -> Result<Arc<CertifiedKey>, AcmeError> {
    let key_pair = KeyPair::generate()?;
    let mut params = CertificateParams::new(vec![domain.to_string()])?;
    params
        .custom_extensions
        .push(CustomExtension::new_acme_identifier(key_authorization_digest));
    let cert = params.self_signed(&key_pair)?;

    let key_der = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key_pair.serialize_der()));
    let signing_key = rustls::crypto::aws_lc_rs::sign::any_supported_type(&key_der)?;

    Ok(Arc::new(CertifiedKey::new(
        vec![cert.der().clone()],
        signing_key,
    )))
}
