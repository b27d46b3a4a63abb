//! Self-signed fallback identity
//!
//! Guarantees a certificate/key pair exists on disk so the registry can
//! always serve TLS, even before (or without) ACME.

use std::fs;
use std::io::Write;
use std::path::Path;

use rand::rngs::OsRng;
use rand::RngCore;
use rcgen::{
    CertificateParams, DistinguishedName, DnType, ExtendedKeyUsagePurpose, IsCa, KeyPair,
    KeyUsagePurpose, SerialNumber,
};
use rsa::pkcs1::EncodeRsaPrivateKey;
use rsa::pkcs8::{EncodePrivateKey, LineEnding};
use rsa::RsaPrivateKey;
use time::{Duration, OffsetDateTime};
use tracing::{debug, info};

use super::error::TlsError;

/// Subject common name of the generated certificate
pub const SELF_SIGNED_COMMON_NAME: &str = "registry";

/// Subject alternative names of the generated certificate
pub const SELF_SIGNED_SANS: [&str; 2] = ["registry", "localhost"];

const RSA_KEY_BITS: usize = 2048;

/// 16 random bytes keeps the serial below 2^128
const SERIAL_BYTES: usize = 16;

/// Backdating for clients with a slow clock
const CLOCK_SKEW: Duration = Duration::HOUR;

const VALIDITY: Duration = Duration::days(365);

/// What [`ensure_self_signed`] did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapOutcome {
    /// Both files were already present and left untouched
    AlreadyPresent,
    /// A fresh pair was written
    Generated,
}

/// Make sure a certificate and key exist at the given paths.
///
/// When both files exist nothing is read or written. When either is missing
/// the certificate's directory is created and a new pair overwrites whatever
/// was there.
///
/// Not safe to race against itself for the same paths; run it once before
/// accepting connections.
pub fn ensure_self_signed(cert_path: &Path, key_path: &Path) -> Result<BootstrapOutcome, TlsError> {
    if cert_path.exists() && key_path.exists() {
        debug!(
            cert = %cert_path.display(),
            key = %key_path.display(),
            "Self-signed certificate already present"
        );
        return Ok(BootstrapOutcome::AlreadyPresent);
    }

    if let Some(dir) = cert_path.parent().filter(|d| !d.as_os_str().is_empty()) {
        create_private_dir(dir)?;
    }

    info!(cert = %cert_path.display(), "Generating self-signed certificate");
    generate_self_signed(cert_path, key_path)?;
    Ok(BootstrapOutcome::Generated)
}

/// Generate a new self-signed pair and write it, overwriting existing files.
///
/// The certificate is written first. If writing the key fails the pair on
/// disk is inconsistent and must not be served.
pub fn generate_self_signed(cert_path: &Path, key_path: &Path) -> Result<(), TlsError> {
    let mut rng = OsRng;

    let private_key = RsaPrivateKey::new(&mut rng, RSA_KEY_BITS)?;
    let pkcs8_pem = private_key
        .to_pkcs8_pem(LineEnding::LF)
        .map_err(|e| TlsError::KeyEncoding(e.to_string()))?;
    let key_pair = KeyPair::from_pem_and_sign_algo(&pkcs8_pem, &rcgen::PKCS_RSA_SHA256)?;

    let mut serial = [0u8; SERIAL_BYTES];
    rng.try_fill_bytes(&mut serial)?;

    let params = self_signed_params(&serial, OffsetDateTime::now_utc())?;
    let cert = params.self_signed(&key_pair)?;

    let key_pem = private_key
        .to_pkcs1_pem(LineEnding::LF)
        .map_err(|e| TlsError::KeyEncoding(e.to_string()))?;

    write_private_file(cert_path, cert.pem().as_bytes())?;
    write_private_file(key_path, key_pem.as_bytes())?;

    debug!(
        cert = %cert_path.display(),
        key = %key_path.display(),
        serial = %hex::encode(serial),
        "Wrote self-signed certificate"
    );
    Ok(())
}

fn self_signed_params(serial: &[u8], now: OffsetDateTime) -> Result<CertificateParams, TlsError> {
    let sans: Vec<String> = SELF_SIGNED_SANS.iter().map(|s| s.to_string()).collect();
    let mut params = CertificateParams::new(sans)?;

    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, SELF_SIGNED_COMMON_NAME);
    params.distinguished_name = dn;

    params.serial_number = Some(SerialNumber::from_slice(serial));
    params.not_before = now - CLOCK_SKEW;
    params.not_after = now + VALIDITY;
    params.key_usages = vec![
        KeyUsagePurpose::DigitalSignature,
        KeyUsagePurpose::KeyEncipherment,
    ];
    params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];
    params.is_ca = IsCa::ExplicitNoCa;

    Ok(params)
}

fn create_private_dir(dir: &Path) -> Result<(), TlsError> {
    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);

    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o750);
    }

    builder.create(dir).map_err(|source| TlsError::CreateDir {
        path: dir.to_path_buf(),
        source,
    })
}

/// Write a file readable only by the owner
fn write_private_file(path: &Path, contents: &[u8]) -> Result<(), TlsError> {
    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);

    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let write = || -> std::io::Result<()> {
        let mut file = options.open(path)?;
        file.write_all(contents)?;
        file.sync_all()?;

        // mode() only applies on creation; tighten files that already existed
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
        }
        Ok(())
    };

    write().map_err(|source| TlsError::Write {
        path: path.to_path_buf(),
        source,
    })
}
