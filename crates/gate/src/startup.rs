//! Choosing the TLS identity at process start
//!
//! ACME is tried first. Only when it is disabled does the gate fall back to the
//! self-signed pair on disk. An error after ACME was requested is fatal: the
//! registry refuses to start rather than quietly serving a weaker identity.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use registry_gate_config::acme_env_vars;
use rustls::ServerConfig;
use thiserror::Error;
use tracing::{error, info};

use crate::acme::CertificateIssuer;
use crate::tls::{
    ensure_self_signed, load_static_server_config, AcmeSetupError, BootstrapOutcome,
    TlsConfigProvider, TlsError,
};

/// The TLS identity the registry listener will serve
#[derive(Clone)]
pub enum ServerIdentity {
    /// Certificate issued and renewed through ACME
    Acme(Arc<ServerConfig>),
    /// Static fallback pair
    SelfSigned {
        config: Arc<ServerConfig>,
        outcome: BootstrapOutcome,
    },
}

impl ServerIdentity {
    pub fn server_config(&self) -> Arc<ServerConfig> {
        match self {
            Self::Acme(config) | Self::SelfSigned { config, .. } => Arc::clone(config),
        }
    }

    pub fn is_acme(&self) -> bool {
        matches!(self, Self::Acme(_))
    }

    pub fn source(&self) -> &'static str {
        match self {
            Self::Acme(_) => "acme",
            Self::SelfSigned { .. } => "self-signed",
        }
    }
}

impl fmt::Debug for ServerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("ServerIdentity");
        s.field("source", &self.source());
        if let Self::SelfSigned { outcome, .. } = self {
            s.field("outcome", outcome);
        }
        s.finish()
    }
}

/// Startup failures; all of them should abort the process
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("ACME identity unavailable: {0}")]
    Acme(#[from] AcmeSetupError),

    #[error("static identity unavailable: {0}")]
    Static(#[from] TlsError),
}

/// Resolve the identity from the process environment
pub async fn prepare_server_identity<I: CertificateIssuer>(
    provider: &TlsConfigProvider<I>,
    cert_path: &Path,
    key_path: &Path,
) -> Result<ServerIdentity, StartupError> {
    let vars = acme_env_vars().map_err(AcmeSetupError::from)?;
    prepare_server_identity_from_vars(provider, vars, cert_path, key_path).await
}

/// Resolve the identity from an explicit set of environment variables
pub async fn prepare_server_identity_from_vars<I, V>(
    provider: &TlsConfigProvider<I>,
    vars: V,
    cert_path: &Path,
    key_path: &Path,
) -> Result<ServerIdentity, StartupError>
where
    I: CertificateIssuer,
    V: IntoIterator<Item = (String, String)>,
{
    match provider.build_from_vars(vars).await {
        Ok(Some(config)) => {
            info!("Serving ACME-managed certificate");
            return Ok(ServerIdentity::Acme(Arc::new(config)));
        }
        Ok(None) => {}
        Err(e) => {
            error!(
                error = %e,
                acme_enabled = e.acme_enabled(),
                "Failed to set up ACME TLS, refusing to fall back"
            );
            return Err(e.into());
        }
    }

    let outcome = ensure_self_signed(cert_path, key_path)?;
    let config = load_static_server_config(cert_path, key_path)?;
    info!(
        cert = %cert_path.display(),
        outcome = ?outcome,
        "Serving self-signed certificate"
    );

    Ok(ServerIdentity::SelfSigned {
        config: Arc::new(config),
        outcome,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acme::{AcmeCertResolver, AcmeError, AcmeSettings, ChallengeManager};
    use crate::tls::server_config_builder;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    #[derive(Debug, Default)]
    struct StubIssuer {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl CertificateIssuer for StubIssuer {
        async fn tls_config(
            &self,
            _settings: &AcmeSettings,
            _domains: &[String],
        ) -> Result<ServerConfig, AcmeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(AcmeError::OrderInvalid("unauthorized".to_string()));
            }
            Ok(server_config_builder()?
                .with_no_client_auth()
                .with_cert_resolver(Arc::new(AcmeCertResolver::new(ChallengeManager::new()))))
        }
    }

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[tokio::test]
    async fn test_disabled_falls_back_to_self_signed() {
        let dir = TempDir::new().unwrap();
        let cert = dir.path().join("certs/registry.crt");
        let key = dir.path().join("certs/registry.key");
        let provider = TlsConfigProvider::new(StubIssuer::default());

        let identity = prepare_server_identity_from_vars(&provider, vars(&[]), &cert, &key)
            .await
            .unwrap();
        assert!(!identity.is_acme());
        assert!(matches!(
            identity,
            ServerIdentity::SelfSigned {
                outcome: BootstrapOutcome::Generated,
                ..
            }
        ));
        assert_eq!(
            identity.server_config().alpn_protocols,
            vec![b"h2".to_vec(), b"http/1.1".to_vec()]
        );
        assert!(cert.exists() && key.exists());
        assert_eq!(provider.issuer().calls.load(Ordering::SeqCst), 0);

        let again = prepare_server_identity_from_vars(&provider, vars(&[]), &cert, &key)
            .await
            .unwrap();
        assert!(matches!(
            again,
            ServerIdentity::SelfSigned {
                outcome: BootstrapOutcome::AlreadyPresent,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_enabled_uses_acme_and_skips_bootstrap() {
        let dir = TempDir::new().unwrap();
        let cert = dir.path().join("registry.crt");
        let key = dir.path().join("registry.key");
        let provider = TlsConfigProvider::new(StubIssuer::default());

        let identity = prepare_server_identity_from_vars(
            &provider,
            vars(&[("REGISTRY_ACME_DOMAINS", "registry.example.com")]),
            &cert,
            &key,
        )
        .await
        .unwrap();

        assert!(identity.is_acme());
        assert_eq!(identity.source(), "acme");
        assert!(!cert.exists());
    }

    #[tokio::test]
    async fn test_issuer_failure_never_downgrades() {
        let dir = TempDir::new().unwrap();
        let cert = dir.path().join("registry.crt");
        let key = dir.path().join("registry.key");
        let provider = TlsConfigProvider::new(StubIssuer {
            fail: true,
            ..Default::default()
        });

        let err = prepare_server_identity_from_vars(
            &provider,
            vars(&[("REGISTRY_ACME_DOMAINS", "registry.example.com")]),
            &cert,
            &key,
        )
        .await
        .unwrap_err();

        assert!(matches!(
            err,
            StartupError::Acme(AcmeSetupError::Issuer(AcmeError::OrderInvalid(_)))
        ));
        assert!(!cert.exists());
    }

    #[tokio::test]
    async fn test_config_error_aborts() {
        let dir = TempDir::new().unwrap();
        let provider = TlsConfigProvider::new(StubIssuer::default());

        let err = prepare_server_identity_from_vars(
            &provider,
            vars(&[
                ("REGISTRY_ACME_DOMAINS", "registry.example.com"),
                ("REGISTRY_ACME_HTTP_PORT", "99999"),
            ]),
            &dir.path().join("registry.crt"),
            &dir.path().join("registry.key"),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, StartupError::Acme(AcmeSetupError::Config(_))));
    }

    #[tokio::test]
    async fn test_unwritable_cert_dir_is_static_error() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, b"not a directory").unwrap();
        let provider = TlsConfigProvider::new(StubIssuer::default());

        let err = prepare_server_identity_from_vars(
            &provider,
            vars(&[]),
            &blocker.join("registry.crt"),
            &blocker.join("registry.key"),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, StartupError::Static(TlsError::CreateDir { .. })));
    }
}
