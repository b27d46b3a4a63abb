//! ACME certificate authority configuration.
//!
//! Read from `REGISTRY_ACME_*` environment variables:
//!
//! ```text
//! REGISTRY_ACME_DOMAINS=registry.example.com,mirror.example.com
//! REGISTRY_ACME_ENABLE=true
//! REGISTRY_ACME_EMAIL=ops@example.com
//! REGISTRY_ACME_CA=https://acme.internal/directory
//! REGISTRY_ACME_CA_ROOT=/etc/registry/acme-root.pem
//! REGISTRY_ACME_STORAGE=/var/lib/registry/acme
//! REGISTRY_ACME_HTTP_PORT=8080
//! REGISTRY_ACME_TLS_ALPN_PORT=8443
//! ```
//!
//! ACME is enabled when the flag is true or at least one domain is listed.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::env::{parse_flag, parse_port, prefixed_vars, split_comma_list, trimmed};
use crate::errors::ConfigError;

/// Prefix shared by every ACME variable
pub const ENV_PREFIX: &str = "REGISTRY_ACME_";

pub const DOMAINS_VAR: &str = "REGISTRY_ACME_DOMAINS";
pub const ENABLE_VAR: &str = "REGISTRY_ACME_ENABLE";
pub const EMAIL_VAR: &str = "REGISTRY_ACME_EMAIL";
pub const CA_VAR: &str = "REGISTRY_ACME_CA";
pub const CA_ROOT_VAR: &str = "REGISTRY_ACME_CA_ROOT";
pub const STORAGE_VAR: &str = "REGISTRY_ACME_STORAGE";
pub const HTTP_PORT_VAR: &str = "REGISTRY_ACME_HTTP_PORT";
pub const TLS_ALPN_PORT_VAR: &str = "REGISTRY_ACME_TLS_ALPN_PORT";

/// Raw variables as found in the environment, before validation
#[derive(Debug, Default, Deserialize)]
struct AcmeEnv {
    domains: Option<String>,
    enable: Option<String>,
    email: Option<String>,
    ca: Option<String>,
    ca_root: Option<String>,
    storage: Option<String>,
    http_port: Option<String>,
    tls_alpn_port: Option<String>,
}

/// Validated ACME configuration.
///
/// Only ever constructed with a non-empty domain list. Optional fields left
/// as `None` fall back to the certificate issuer's defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AcmeConfig {
    /// Hostnames to obtain a certificate for, in configured order
    pub domains: Vec<String>,
    /// Account contact email
    pub email: Option<String>,
    /// ACME directory URL
    pub ca: Option<String>,
    /// PEM file with additional trusted roots for talking to the CA
    pub ca_root_path: Option<PathBuf>,
    /// Directory for account credentials and issued certificates
    pub storage_path: Option<PathBuf>,
    /// HTTP-01 challenge port override
    pub alt_http_port: Option<u16>,
    /// TLS-ALPN-01 challenge port override
    pub alt_tls_alpn_port: Option<u16>,
}

impl AcmeConfig {
    /// Load from the process environment.
    ///
    /// Returns `Ok(None)` when ACME is not requested at all.
    pub fn from_env() -> Result<Option<Self>, ConfigError> {
        Self::from_vars(acme_env_vars()?)
    }

    /// Load from an explicit set of variables.
    pub fn from_vars<I>(vars: I) -> Result<Option<Self>, ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let env: AcmeEnv = envy::prefixed(ENV_PREFIX).from_iter(vars)?;
        Self::from_raw(env)
    }

    fn from_raw(env: AcmeEnv) -> Result<Option<Self>, ConfigError> {
        let domains = split_comma_list(env.domains.as_deref().unwrap_or_default());
        let enabled = parse_flag(ENABLE_VAR, env.enable.as_deref(), false)?;

        if !enabled && domains.is_empty() {
            debug!("ACME not configured");
            return Ok(None);
        }
        if domains.is_empty() {
            return Err(ConfigError::MissingDomains {
                domains_var: DOMAINS_VAR,
                enable_var: ENABLE_VAR,
            });
        }

        let config = AcmeConfig {
            domains,
            email: trimmed(env.email.as_deref()),
            ca: trimmed(env.ca.as_deref()),
            ca_root_path: trimmed(env.ca_root.as_deref()).map(PathBuf::from),
            storage_path: trimmed(env.storage.as_deref()).map(PathBuf::from),
            alt_http_port: parse_port(HTTP_PORT_VAR, env.http_port.as_deref())?,
            alt_tls_alpn_port: parse_port(TLS_ALPN_PORT_VAR, env.tls_alpn_port.as_deref())?,
        };

        info!(
            domains = ?config.domains,
            ca = config.ca.as_deref().unwrap_or("default"),
            custom_root = config.ca_root_path.is_some(),
            storage = ?config.storage_path,
            "Loaded ACME configuration"
        );

        Ok(Some(config))
    }

    /// The first configured domain; certificates are stored under it
    pub fn primary_domain(&self) -> &str {
        &self.domains[0]
    }
}

/// The `REGISTRY_ACME_*` variables of the process environment
pub fn acme_env_vars() -> Result<Vec<(String, String)>, ConfigError> {
    prefixed_vars(ENV_PREFIX, std::env::vars_os())
}

/// Load ACME configuration from the process environment
pub fn load_acme_config() -> Result<Option<AcmeConfig>, ConfigError> {
    AcmeConfig::from_env()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn load(pairs: &[(&str, &str)]) -> Result<Option<AcmeConfig>, ConfigError> {
        AcmeConfig::from_vars(vars(pairs))
    }

    #[test]
    fn test_disabled_when_nothing_set() {
        assert_eq!(load(&[]).unwrap(), None);
        assert_eq!(load(&[(ENABLE_VAR, ""), (DOMAINS_VAR, "")]).unwrap(), None);
        assert_eq!(load(&[(ENABLE_VAR, "false"), (DOMAINS_VAR, " , ")]).unwrap(), None);
    }

    #[test]
    fn test_enable_without_domains_is_error() {
        let err = load(&[(ENABLE_VAR, "true"), (DOMAINS_VAR, "")]).unwrap_err();
        assert!(matches!(err, ConfigError::MissingDomains { .. }));
        assert!(err.to_string().contains(DOMAINS_VAR));
    }

    #[test]
    fn test_domains_alone_enable_acme() {
        let config = load(&[(DOMAINS_VAR, "registry.example.com")])
            .unwrap()
            .expect("enabled");
        assert_eq!(config.domains, vec!["registry.example.com"]);
        assert_eq!(config.primary_domain(), "registry.example.com");
        assert_eq!(config.alt_tls_alpn_port, None);
    }

    #[test]
    fn test_full_parsing() {
        let config = load(&[
            (DOMAINS_VAR, "example.com, registry.example.com "),
            (EMAIL_VAR, " ops@example.com "),
            (CA_VAR, "https://acme.local/directory"),
            (CA_ROOT_VAR, "/etc/acme/root.pem"),
            (STORAGE_VAR, "/var/lib/acme"),
            (HTTP_PORT_VAR, "8080"),
            (TLS_ALPN_PORT_VAR, "8443"),
        ])
        .unwrap()
        .expect("enabled");

        assert_eq!(config.domains, vec!["example.com", "registry.example.com"]);
        assert_eq!(config.email.as_deref(), Some("ops@example.com"));
        assert_eq!(config.ca.as_deref(), Some("https://acme.local/directory"));
        assert_eq!(config.ca_root_path, Some(PathBuf::from("/etc/acme/root.pem")));
        assert_eq!(config.storage_path, Some(PathBuf::from("/var/lib/acme")));
        assert_eq!(config.alt_http_port, Some(8080));
        assert_eq!(config.alt_tls_alpn_port, Some(8443));
    }

    #[test]
    fn test_blank_optionals_are_unset() {
        let config = load(&[
            (DOMAINS_VAR, "example.com"),
            (EMAIL_VAR, "   "),
            (CA_VAR, ""),
            (STORAGE_VAR, " "),
        ])
        .unwrap()
        .expect("enabled");

        assert_eq!(config.email, None);
        assert_eq!(config.ca, None);
        assert_eq!(config.storage_path, None);
    }

    #[test]
    fn test_invalid_port_names_variable() {
        for raw in ["0", "-1", "65536", "abc"] {
            let err = load(&[(DOMAINS_VAR, "example.com"), (TLS_ALPN_PORT_VAR, raw)])
                .unwrap_err();
            let message = err.to_string();
            assert!(message.contains(TLS_ALPN_PORT_VAR), "{message}");
            assert!(message.contains(raw), "{message}");
        }
    }

    #[test]
    fn test_invalid_flag_is_error() {
        let err = load(&[(ENABLE_VAR, "enabled"), (DOMAINS_VAR, "example.com")]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidFlag { var: ENABLE_VAR, .. }));
    }

    #[test]
    fn test_unrelated_variables_ignored() {
        let config = load(&[
            ("PATH", "/usr/bin"),
            ("REGISTRY_TLS_CERT", "/certs/registry.crt"),
            (DOMAINS_VAR, "example.com"),
        ])
        .unwrap();
        assert!(config.is_some());
    }

    #[test]
    fn test_serializes_for_display() {
        let config = load(&[(DOMAINS_VAR, "example.com"), (HTTP_PORT_VAR, "8080")])
            .unwrap()
            .expect("enabled");
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["domains"], serde_json::json!(["example.com"]));
        assert_eq!(json["alt_http_port"], serde_json::json!(8080));
        assert_eq!(json["email"], serde_json::Value::Null);
    }

    #[cfg(unix)]
    #[test]
    fn test_process_env_with_non_unicode_neighbour() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        // The only test touching the process environment
        std::env::set_var(
            "REGISTRY_GATE_TEST_BINARY_VALUE",
            OsStr::from_bytes(b"\xff\xfe"),
        );
        std::env::set_var(DOMAINS_VAR, "example.com");

        let loaded = load_acme_config();

        std::env::remove_var(DOMAINS_VAR);
        std::env::remove_var("REGISTRY_GATE_TEST_BINARY_VALUE");

        let config = loaded.unwrap().expect("enabled");
        assert_eq!(config.domains, vec!["example.com"]);
    }
}
