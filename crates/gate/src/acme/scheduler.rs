//! Background certificate renewal scheduler
//!
//! Periodically checks the certificate and renews it when needed.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::interval;
use tracing::{debug, error, info};

use super::client::AcmeClient;
use super::error::AcmeError;
use super::resolver::AcmeCertResolver;

/// Default check interval (12 hours)
const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_secs(12 * 3600);

/// Minimum check interval (1 hour)
const MIN_CHECK_INTERVAL: Duration = Duration::from_secs(3600);

/// Background certificate renewal scheduler
///
/// Runs as a background task and periodically checks whether the certificate
/// needs renewal. A renewed certificate is swapped into the resolver, so
/// listeners pick it up on their next handshake.
pub struct RenewalScheduler {
    client: Arc<AcmeClient>,
    resolver: Arc<AcmeCertResolver>,
    check_interval: Duration,
}

impl RenewalScheduler {
    pub fn new(client: Arc<AcmeClient>, resolver: Arc<AcmeCertResolver>) -> Self {
        Self {
            client,
            resolver,
            check_interval: DEFAULT_CHECK_INTERVAL,
        }
    }

    /// Set the check interval
    ///
    /// The interval is clamped to a minimum of 1 hour to avoid
    /// excessive polling.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.check_interval = interval.max(MIN_CHECK_INTERVAL);
        self
    }

    pub fn check_interval(&self) -> Duration {
        self.check_interval
    }

    /// Make sure the resolver has a valid certificate, issuing one if needed.
    ///
    /// Call this during startup before accepting connections.
    pub async fn ensure_certificate(&self) -> Result<(), AcmeError> {
        let domain = self.client.primary_domain();

        let stored = match self.client.load_valid_certificate()? {
            Some(stored) => {
                info!(
                    domain = %domain,
                    expires = %stored.meta.expires,
                    "Using stored ACME certificate"
                );
                stored
            }
            None => {
                info!(domain = %domain, "Initial certificate issuance required");
                self.client.issue().await?
            }
        };

        self.resolver
            .set_certificate_pem(&stored.cert_pem, &stored.key_pem)
    }

    /// Run the renewal loop
    ///
    /// This runs indefinitely; spawn it.
    pub async fn run(self) {
        info!(
            check_interval_hours = self.check_interval.as_secs() / 3600,
            "Starting certificate renewal scheduler"
        );

        let mut interval = interval(self.check_interval);
        // The first tick completes immediately and startup just issued
        interval.tick().await;

        loop {
            interval.tick().await;

            debug!("Running scheduled certificate renewal check");

            if let Err(e) = self.check_renewal().await {
                error!(error = %e, "Certificate renewal check failed");
            }
        }
    }

    /// Renew once if the stored certificate is due
    pub async fn check_renewal(&self) -> Result<bool, AcmeError> {
        let domain = self.client.primary_domain();

        if !self.client.needs_renewal()? {
            debug!(domain = %domain, "Certificate is still valid");
            return Ok(false);
        }

        info!(domain = %domain, "Certificate needs renewal");
        let renewed = self.client.issue().await?;
        self.resolver
            .set_certificate_pem(&renewed.cert_pem, &renewed.key_pem)?;

        info!(
            domain = %domain,
            expires = %renewed.meta.expires,
            "Certificate renewed and swapped in"
        );
        Ok(true)
    }
}

impl std::fmt::Debug for RenewalScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenewalScheduler")
            .field("domains", &self.client.domains())
            .field("check_interval", &self.check_interval)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acme::{AcmeSettings, ChallengeManager};
    use chrono::Utc;
    use tempfile::TempDir;

    fn scheduler(dir: &TempDir) -> RenewalScheduler {
        let settings = AcmeSettings {
            storage_path: Some(dir.path().join("acme")),
            ..Default::default()
        };
        let challenges = ChallengeManager::new();
        let client =
            AcmeClient::new(settings, vec!["example.com".to_string()], challenges.clone()).unwrap();
        RenewalScheduler::new(
            Arc::new(client),
            Arc::new(AcmeCertResolver::new(challenges)),
        )
    }

    fn store_valid(scheduler: &RenewalScheduler) {
        let key_pair = rcgen::KeyPair::generate().unwrap();
        let cert = rcgen::CertificateParams::new(vec!["example.com".to_string()])
            .unwrap()
            .self_signed(&key_pair)
            .unwrap();
        let client = &scheduler.client;
        client
            .storage()
            .save_certificate(
                "example.com",
                &cert.pem(),
                &key_pair.serialize_pem(),
                Utc::now() + chrono::Duration::days(60),
                client.domains(),
                client.settings().directory_url(),
            )
            .unwrap();
    }

    #[test]
    fn test_interval_clamped() {
        let dir = TempDir::new().unwrap();
        let scheduler = scheduler(&dir);
        assert_eq!(scheduler.check_interval(), DEFAULT_CHECK_INTERVAL);

        let scheduler = scheduler.with_interval(Duration::from_secs(60));
        assert_eq!(scheduler.check_interval(), MIN_CHECK_INTERVAL);
    }

    #[tokio::test]
    async fn test_stored_certificate_is_served_without_issuing() {
        let dir = TempDir::new().unwrap();
        let scheduler = scheduler(&dir);
        store_valid(&scheduler);

        scheduler.ensure_certificate().await.unwrap();
        assert!(scheduler.resolver.certificate().is_some());
        assert!(!scheduler.check_renewal().await.unwrap());
    }
}
