//! Issuer settings.

use std::path::PathBuf;
use std::sync::Arc;

use instant_acme::LetsEncrypt;
use rustls::RootCertStore;

/// TLS-ALPN-01 port when none is configured (external 443 maps to 8443)
pub const DEFAULT_TLS_ALPN_PORT: u16 = 8443;

/// HTTP-01 port when none is configured
pub const DEFAULT_HTTP_PORT: u16 = 80;

/// Immutable issuer configuration, built once at startup.
///
/// `None` fields fall back to the issuer's defaults.
#[derive(Debug, Clone)]
pub struct AcmeSettings {
    /// Account contact email
    pub email: Option<String>,
    /// ACME directory URL (Let's Encrypt production when unset)
    pub directory_url: Option<String>,
    /// HTTP-01 challenge port override
    pub http_port: Option<u16>,
    /// TLS-ALPN-01 challenge port
    pub tls_alpn_port: u16,
    /// Roots trusted when talking to the ACME directory
    pub trusted_roots: Option<Arc<RootCertStore>>,
    /// Durable storage directory for account and certificates
    pub storage_path: Option<PathBuf>,
}

impl Default for AcmeSettings {
    fn default() -> Self {
        Self {
            email: None,
            directory_url: None,
            http_port: None,
            tls_alpn_port: DEFAULT_TLS_ALPN_PORT,
            trusted_roots: None,
            storage_path: None,
        }
    }
}

impl AcmeSettings {
    /// The directory URL to use
    pub fn directory_url(&self) -> &str {
        self.directory_url
            .as_deref()
            .unwrap_or(LetsEncrypt::Production.url())
    }

    /// The HTTP-01 port to listen on
    pub fn http_challenge_port(&self) -> u16 {
        self.http_port.unwrap_or(DEFAULT_HTTP_PORT)
    }

    /// The storage directory to use.
    ///
    /// Defaults to the per-user data directory, or `./acme` when there is no
    /// home directory (e.g. a bare container user).
    pub fn storage_dir(&self) -> PathBuf {
        self.storage_path.clone().unwrap_or_else(|| {
            directories::ProjectDirs::from("", "", "registry-gate")
                .map(|dirs| dirs.data_dir().join("acme"))
                .unwrap_or_else(|| PathBuf::from("acme"))
        })
    }
}
