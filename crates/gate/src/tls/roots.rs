//! Trust stores for outbound TLS to the certificate authority.

use std::fs;
use std::path::Path;

use rustls::RootCertStore;
use tracing::{debug, info, warn};

use super::error::TlsError;
use super::static_config::parse_cert_chain;

/// Load the platform's trusted roots.
///
/// Never fails: when the platform store cannot be read the result is an
/// empty store and the failure is logged.
pub fn system_roots() -> RootCertStore {
    let mut roots = RootCertStore::empty();

    let native = rustls_native_certs::load_native_certs();
    if let Some(err) = native.errors.first() {
        warn!(
            error = %err,
            failures = native.errors.len(),
            "Error loading some system CA certificates"
        );
    }

    let (added, ignored) = roots.add_parsable_certificates(native.certs);
    debug!(added, ignored, "Loaded system CA certificates");

    roots
}

/// System roots plus the bundled Mozilla set as a baseline.
///
/// Used when no custom CA root is configured so a minimal container image
/// can still reach public certificate authorities.
pub fn default_client_roots() -> RootCertStore {
    let mut roots = system_roots();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    roots
}

/// System roots extended with every certificate in a PEM file.
///
/// Fails when the file cannot be read or yields no usable certificate: an
/// override that adds nothing would look exactly like a missing one.
pub fn trusted_roots_with(pem_path: &Path) -> Result<RootCertStore, TlsError> {
    let mut roots = system_roots();

    let pem = fs::read(pem_path).map_err(|source| TlsError::Read {
        path: pem_path.to_path_buf(),
        source,
    })?;

    let (added, ignored) = roots.add_parsable_certificates(parse_cert_chain(&pem));
    if added == 0 {
        return Err(TlsError::NoCertificates(pem_path.to_path_buf()));
    }

    info!(
        path = %pem_path.display(),
        added,
        ignored,
        total = roots.len(),
        "Added custom CA roots"
    );
    Ok(roots)
}
