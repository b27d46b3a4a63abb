//! Certificate issuer seam

use std::sync::Arc;

use async_trait::async_trait;
use rustls::ServerConfig;
use tracing::info;

use super::challenge::ChallengeManager;
use super::client::AcmeClient;
use super::error::AcmeError;
use super::resolver::{AcmeCertResolver, ACME_TLS_ALPN_NAME};
use super::scheduler::RenewalScheduler;
use super::settings::AcmeSettings;
use crate::tls::server_config_builder;

/// Produces a server configuration serving certificates for `domains`.
///
/// Implementations own obtaining and renewing the certificate; the returned
/// configuration keeps serving the current one.
#[async_trait]
pub trait CertificateIssuer: Send + Sync {
    async fn tls_config(
        &self,
        settings: &AcmeSettings,
        domains: &[String],
    ) -> Result<ServerConfig, AcmeError>;
}

#[async_trait]
impl<T: CertificateIssuer + ?Sized> CertificateIssuer for Arc<T> {
    async fn tls_config(
        &self,
        settings: &AcmeSettings,
        domains: &[String],
    ) -> Result<ServerConfig, AcmeError> {
        (**self).tls_config(settings, domains).await
    }
}

/// Issues certificates from an ACME directory
#[derive(Debug, Clone)]
pub struct AcmeIssuer {
    renew_before_days: u32,
    background_renewal: bool,
}

impl Default for AcmeIssuer {
    fn default() -> Self {
        Self {
            renew_before_days: 30,
            background_renewal: true,
        }
    }
}

impl AcmeIssuer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_renew_before_days(mut self, days: u32) -> Self {
        self.renew_before_days = days;
        self
    }

    /// Skip spawning the renewal task (one-shot commands)
    pub fn without_background_renewal(mut self) -> Self {
        self.background_renewal = false;
        self
    }
}

#[async_trait]
impl CertificateIssuer for AcmeIssuer {
    async fn tls_config(
        &self,
        settings: &AcmeSettings,
        domains: &[String],
    ) -> Result<ServerConfig, AcmeError> {
        let challenges = ChallengeManager::new();
        let client = AcmeClient::new(settings.clone(), domains.to_vec(), challenges.clone())?
            .with_renew_before_days(self.renew_before_days);
        let resolver = Arc::new(AcmeCertResolver::new(challenges));

        let scheduler = RenewalScheduler::new(Arc::new(client), Arc::clone(&resolver));
        scheduler.ensure_certificate().await?;

        if self.background_renewal {
            tokio::spawn(scheduler.run());
        } else {
            info!("Background certificate renewal disabled");
        }

        let mut config = server_config_builder()?
            .with_no_client_auth()
            .with_cert_resolver(resolver);
        config.alpn_protocols = vec![ACME_TLS_ALPN_NAME.to_vec()];
        Ok(config)
    }
}
