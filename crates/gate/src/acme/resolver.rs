//! Certificate resolver for ACME-managed listeners

use std::fmt;
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use rustls::server::{ClientHello, ResolvesServerCert};
use rustls::sign::CertifiedKey;
use tracing::{debug, trace, warn};

use super::challenge::ChallengeManager;
use super::error::AcmeError;
use crate::tls::{parse_cert_chain, parse_private_key};

/// ALPN protocol identifier of TLS-ALPN-01 validation handshakes
pub const ACME_TLS_ALPN_NAME: &[u8] = b"acme-tls/1";

/// Serves the issued certificate, or a challenge certificate when the ACME
/// server is validating.
///
/// The served certificate can be swapped at any time without rebuilding the
/// `ServerConfig`; handshakes in flight keep the key they started with.
pub struct AcmeCertResolver {
    current: ArcSwapOption<CertifiedKey>,
    challenges: ChallengeManager,
}

impl AcmeCertResolver {
    pub fn new(challenges: ChallengeManager) -> Self {
        Self {
            current: ArcSwapOption::empty(),
            challenges,
        }
    }

    pub fn with_certificate(challenges: ChallengeManager, certificate: Arc<CertifiedKey>) -> Self {
        let resolver = Self::new(challenges);
        resolver.set_certificate(certificate);
        resolver
    }

    /// Replace the served certificate
    pub fn set_certificate(&self, certificate: Arc<CertifiedKey>) {
        self.current.store(Some(certificate));
        debug!("Swapped served ACME certificate");
    }

    /// Load a PEM pair and start serving it
    pub fn set_certificate_pem(&self, cert_pem: &str, key_pem: &str) -> Result<(), AcmeError> {
        self.set_certificate(certified_key_from_pem(cert_pem, key_pem)?);
        Ok(())
    }

    pub fn certificate(&self) -> Option<Arc<CertifiedKey>> {
        self.current.load_full()
    }

    /// Pick a certificate for a handshake.
    ///
    /// A handshake offering exactly `acme-tls/1` is a validation attempt and
    /// gets the pending challenge certificate or nothing at all.
    pub fn select<'a>(
        &self,
        server_name: Option<&str>,
        alpn: impl IntoIterator<Item = &'a [u8]>,
    ) -> Option<Arc<CertifiedKey>> {
        if is_tls_alpn_challenge(alpn) {
            let Some(name) = server_name else {
                warn!("ACME TLS-ALPN-01 handshake without SNI");
                return None;
            };
            let cert = self.challenges.tls_alpn_certificate(name);
            if cert.is_none() {
                warn!(domain = %name, "No pending ACME TLS-ALPN-01 challenge");
            }
            return cert;
        }

        let cert = self.certificate();
        if cert.is_none() {
            trace!(server_name = ?server_name, "No ACME certificate issued yet");
        }
        cert
    }
}

impl ResolvesServerCert for AcmeCertResolver {
    fn resolve(&self, client_hello: ClientHello<'_>) -> Option<Arc<CertifiedKey>> {
        let alpn: Vec<&[u8]> = client_hello.alpn().map(Iterator::collect).unwrap_or_default();
        self.select(client_hello.server_name(), alpn)
    }
}

impl fmt::Debug for AcmeCertResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AcmeCertResolver")
            .field("has_certificate", &self.current.load().is_some())
            .field("pending_challenges", &self.challenges.pending_count())
            .finish()
    }
}

fn is_tls_alpn_challenge<'a>(alpn: impl IntoIterator<Item = &'a [u8]>) -> bool {
    let mut protocols = alpn.into_iter();
    matches!(
        (protocols.next(), protocols.next()),
        (Some(ACME_TLS_ALPN_NAME), None)
    )
}

/// Parse a PEM chain and key into a signing-ready certificate
pub(crate) fn certified_key_from_pem(
    cert_pem: &str,
    key_pem: &str,
) -> Result<Arc<CertifiedKey>, AcmeError> {
    let chain = parse_cert_chain(cert_pem.as_bytes());
    if chain.is_empty() {
        return Err(AcmeError::InvalidCertificate(
            "no certificates in PEM chain".to_string(),
        ));
    }
    let key = parse_private_key(key_pem.as_bytes())
        .ok_or_else(|| AcmeError::InvalidCertificate("no private key in PEM".to_string()))?;
    let signing_key = rustls::crypto::aws_lc_rs::sign::any_supported_type(&key)?;

    Ok(Arc::new(CertifiedKey::new(chain, signing_key)))
}
