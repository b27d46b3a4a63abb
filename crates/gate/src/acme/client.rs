//! ACME protocol client wrapper
//!
//! Drives one order from account lookup to a stored certificate on top of
//! `instant-acme`, answering challenges through the shared
//! [`ChallengeManager`].

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use http_body_util::Full;
use hyper_util::client::legacy::Client as HyperClient;
use hyper_util::rt::TokioExecutor;
use instant_acme::{
    Account, AccountCredentials, AuthorizationStatus, ChallengeType, HttpClient, Identifier,
    NewAccount, NewOrder, Order, OrderStatus,
};
use rcgen::{CertificateParams, DistinguishedName, KeyPair};
use rustls::RootCertStore;
use tokio::sync::OnceCell;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::challenge::{tls_alpn_challenge_certificate, ChallengeManager};
use super::error::AcmeError;
use super::responder::{ChallengeResponder, ResponderKind};
use super::settings::AcmeSettings;
use super::storage::{CertificateMeta, CertificateStorage, StoredCertificate};
use crate::tls::{crypto_provider, default_client_roots};

/// Renew this many days before expiry unless told otherwise
const DEFAULT_RENEW_BEFORE_DAYS: u32 = 30;

/// How long authorizations may take to validate
const VALIDATION_TIMEOUT: Duration = Duration::from_secs(300);

/// How long the CA may take to issue after finalization
const ISSUANCE_TIMEOUT: Duration = Duration::from_secs(120);

const INITIAL_POLL_DELAY: Duration = Duration::from_secs(1);
const MAX_POLL_DELAY: Duration = Duration::from_secs(10);

/// A challenge registered for the current order, removed once it settles
enum PendingChallenge {
    Http01(String),
    TlsAlpn01(String),
}

/// ACME client for one set of domains
pub struct AcmeClient {
    settings: AcmeSettings,
    domains: Vec<String>,
    storage: CertificateStorage,
    challenges: ChallengeManager,
    renew_before_days: u32,
    account: OnceCell<Account>,
}

impl AcmeClient {
    /// Create a client; the account is looked up or registered on first use.
    pub fn new(
        settings: AcmeSettings,
        domains: Vec<String>,
        challenges: ChallengeManager,
    ) -> Result<Self, AcmeError> {
        if domains.is_empty() {
            return Err(AcmeError::OrderCreation("No domains configured".to_string()));
        }
        let storage = CertificateStorage::new(&settings.storage_dir())?;

        Ok(Self {
            settings,
            domains,
            storage,
            challenges,
            renew_before_days: DEFAULT_RENEW_BEFORE_DAYS,
            account: OnceCell::new(),
        })
    }

    pub fn with_renew_before_days(mut self, days: u32) -> Self {
        self.renew_before_days = days;
        self
    }

    pub fn settings(&self) -> &AcmeSettings {
        &self.settings
    }

    pub fn domains(&self) -> &[String] {
        &self.domains
    }

    /// Certificates are stored under the first configured domain
    pub fn primary_domain(&self) -> &str {
        &self.domains[0]
    }

    pub fn storage(&self) -> &CertificateStorage {
        &self.storage
    }

    /// Whether the stored certificate is missing, stale, or for other domains
    pub fn needs_renewal(&self) -> Result<bool, AcmeError> {
        Ok(self.storage.needs_renewal(
            self.primary_domain(),
            &self.domains,
            self.renew_before_days,
        )?)
    }

    /// The stored certificate, if it does not need renewal yet
    pub fn load_valid_certificate(&self) -> Result<Option<StoredCertificate>, AcmeError> {
        if self.needs_renewal()? {
            return Ok(None);
        }
        Ok(self.storage.load_certificate(self.primary_domain())?)
    }

    // =========================================================================
    // Account
    // =========================================================================

    async fn account(&self) -> Result<&Account, AcmeError> {
        self.account.get_or_try_init(|| self.load_or_create_account()).await
    }

    async fn load_or_create_account(&self) -> Result<Account, AcmeError> {
        let directory_url = self.settings.directory_url();

        if let Some(json) = self.storage.load_credentials_json(directory_url)? {
            let credentials: AccountCredentials = serde_json::from_str(&json)?;
            let account = Account::from_credentials_and_http(
                credentials,
                http_client(self.settings.trusted_roots.as_ref())?,
            )
            .await?;
            debug!(directory = %directory_url, "Restored ACME account");
            return Ok(account);
        }

        let contact: Vec<String> = self
            .settings
            .email
            .iter()
            .map(|email| format!("mailto:{email}"))
            .collect();
        let contact: Vec<&str> = contact.iter().map(String::as_str).collect();

        info!(directory = %directory_url, "Registering new ACME account");
        let (account, credentials) = Account::create_with_http(
            &NewAccount {
                contact: &contact,
                terms_of_service_agreed: true,
                only_return_existing: false,
            },
            directory_url,
            None,
            http_client(self.settings.trusted_roots.as_ref())?,
        )
        .await?;

        let json = serde_json::to_string_pretty(&credentials)?;
        self.storage.save_credentials_json(directory_url, &json)?;
        Ok(account)
    }

    // =========================================================================
    // Issuance
    // =========================================================================

    /// Run a full order for the configured domains and store the result
    pub async fn issue(&self) -> Result<StoredCertificate, AcmeError> {
        let start = Instant::now();
        let account = self.account().await?;

        let identifiers: Vec<Identifier> = self
            .domains
            .iter()
            .map(|domain| Identifier::Dns(domain.clone()))
            .collect();
        let mut order = account
            .new_order(&NewOrder {
                identifiers: &identifiers,
            })
            .await
            .map_err(|e| AcmeError::OrderCreation(e.to_string()))?;
        info!(domains = ?self.domains, "Created ACME order");

        let mut pending = Vec::new();
        let validated = self.validate(&mut order, &mut pending).await;
        for challenge in pending {
            match challenge {
                PendingChallenge::Http01(token) => self.challenges.remove_http01(&token),
                PendingChallenge::TlsAlpn01(domain) => self.challenges.remove_tls_alpn(&domain),
            }
        }
        validated?;

        let key_pair = KeyPair::generate()?;
        let mut params = CertificateParams::new(self.domains.clone())?;
        params.distinguished_name = DistinguishedName::new();
        let csr = params.serialize_request(&key_pair)?;
        order.finalize(csr.der()).await?;

        let cert_pem = poll_certificate(&mut order).await?;
        let key_pem = key_pair.serialize_pem();
        let expires = certificate_expiry(&cert_pem)?;

        self.storage.save_certificate(
            self.primary_domain(),
            &cert_pem,
            &key_pem,
            expires,
            &self.domains,
            self.settings.directory_url(),
        )?;

        info!(
            domain = %self.primary_domain(),
            expires = %expires,
            elapsed_secs = start.elapsed().as_secs(),
            "Obtained ACME certificate"
        );

        Ok(StoredCertificate {
            cert_pem,
            key_pem,
            meta: CertificateMeta {
                expires,
                issued: Utc::now(),
                domains: self.domains.clone(),
                directory_url: Some(self.settings.directory_url().to_string()),
            },
        })
    }

    /// Answer every pending authorization and wait for the order to be ready
    async fn validate(
        &self,
        order: &mut Order,
        pending: &mut Vec<PendingChallenge>,
    ) -> Result<(), AcmeError> {
        let authorizations = order.authorizations().await?;
        let mut responders: Vec<ChallengeResponder> = Vec::new();
        let mut ready = Vec::new();

        for authz in &authorizations {
            #[allow(unreachable_patterns)]
            let domain = match &authz.identifier {
                Identifier::Dns(domain) => domain.clone(),
                other => format!("{other:?}"),
            };

            match authz.status {
                AuthorizationStatus::Pending => {}
                AuthorizationStatus::Valid => {
                    debug!(domain = %domain, "Authorization already valid");
                    continue;
                }
                ref status => {
                    return Err(AcmeError::Authorization {
                        domain,
                        status: format!("{status:?}"),
                    })
                }
            }

            let challenge = authz
                .challenges
                .iter()
                .filter_map(|c| challenge_rank(&c.r#type).map(|rank| (rank, c)))
                .min_by_key(|(rank, _)| *rank)
                .map(|(_, c)| c)
                .ok_or_else(|| AcmeError::NoSupportedChallenge(domain.clone()))?;

            let key_authorization = order.key_authorization(challenge);
            let kind = match challenge.r#type {
                ChallengeType::TlsAlpn01 => {
                    let cert =
                        tls_alpn_challenge_certificate(&domain, key_authorization.digest().as_ref())?;
                    self.challenges.add_tls_alpn(&domain, cert);
                    pending.push(PendingChallenge::TlsAlpn01(domain.clone()));
                    ResponderKind::TlsAlpn01
                }
                _ => {
                    self.challenges
                        .add_http01(&challenge.token, key_authorization.as_str());
                    pending.push(PendingChallenge::Http01(challenge.token.clone()));
                    ResponderKind::Http01
                }
            };

            if !responders.iter().any(|r| r.kind() == kind) {
                let addr = SocketAddr::from(([0, 0, 0, 0], self.challenge_port(kind)));
                if let Some(responder) =
                    ChallengeResponder::bind(kind, addr, self.challenges.clone()).await?
                {
                    responders.push(responder);
                }
            }

            debug!(domain = %domain, kind = ?kind, "Challenge ready");
            ready.push(challenge.url.clone());
        }

        for url in &ready {
            order.set_challenge_ready(url).await?;
        }

        poll_ready(order).await
    }

    fn challenge_port(&self, kind: ResponderKind) -> u16 {
        match kind {
            ResponderKind::Http01 => self.settings.http_challenge_port(),
            ResponderKind::TlsAlpn01 => self.settings.tls_alpn_port,
        }
    }
}

impl std::fmt::Debug for AcmeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AcmeClient")
            .field("directory", &self.settings.directory_url())
            .field("domains", &self.domains)
            .field("renew_before_days", &self.renew_before_days)
            .field("has_account", &self.account.initialized())
            .finish()
    }
}

/// Lower is preferred; `None` for challenges we cannot answer
fn challenge_rank(kind: &ChallengeType) -> Option<u8> {
    match kind {
        ChallengeType::TlsAlpn01 => Some(0),
        ChallengeType::Http01 => Some(1),
        _ => None,
    }
}

async fn poll_ready(order: &mut Order) -> Result<(), AcmeError> {
    let deadline = Instant::now() + VALIDATION_TIMEOUT;
    let mut delay = INITIAL_POLL_DELAY;

    loop {
        let state = order.refresh().await?;
        match state.status {
            OrderStatus::Ready | OrderStatus::Valid => return Ok(()),
            OrderStatus::Invalid => {
                let detail = state
                    .error
                    .as_ref()
                    .map(|problem| format!("{problem:?}"))
                    .unwrap_or_else(|| "no detail".to_string());
                return Err(AcmeError::OrderInvalid(detail));
            }
            ref status => debug!(status = ?status, "Waiting for ACME validation"),
        }

        if Instant::now() + delay > deadline {
            warn!("ACME validation did not complete in time");
            return Err(AcmeError::Timeout(VALIDATION_TIMEOUT, "challenge validation"));
        }
        tokio::time::sleep(delay).await;
        delay = (delay * 2).min(MAX_POLL_DELAY);
    }
}

async fn poll_certificate(order: &mut Order) -> Result<String, AcmeError> {
    let deadline = Instant::now() + ISSUANCE_TIMEOUT;
    let mut delay = INITIAL_POLL_DELAY;

    loop {
        if let Some(chain) = order.certificate().await? {
            return Ok(chain);
        }
        if Instant::now() + delay > deadline {
            return Err(AcmeError::Timeout(ISSUANCE_TIMEOUT, "certificate issuance"));
        }
        tokio::time::sleep(delay).await;
        delay = (delay * 2).min(MAX_POLL_DELAY);
    }
}

/// HTTP client for the ACME directory, trusting `roots` when given
fn http_client(roots: Option<&Arc<RootCertStore>>) -> Result<Box<dyn HttpClient>, AcmeError> {
    let roots = match roots {
        Some(roots) => RootCertStore::clone(roots),
        None => default_client_roots(),
    };
    let tls = rustls::ClientConfig::builder_with_provider(crypto_provider())
        .with_safe_default_protocol_versions()?
        .with_root_certificates(roots)
        .with_no_client_auth();

    let connector = hyper_rustls::HttpsConnectorBuilder::new()
        .with_tls_config(tls)
        .https_or_http()
        .enable_http1()
        .build();

    Ok(Box::new(
        HyperClient::builder(TokioExecutor::new()).build::<_, Full<Bytes>>(connector),
    ))
}

/// `notAfter` of the leaf certificate in a PEM chain
pub(crate) fn certificate_expiry(cert_pem: &str) -> Result<DateTime<Utc>, AcmeError> {
    let (_, pem) = x509_parser::pem::parse_x509_pem(cert_pem.as_bytes())
        .map_err(|e| AcmeError::InvalidCertificate(format!("invalid PEM: {e}")))?;
    let cert = pem
        .parse_x509()
        .map_err(|e| AcmeError::InvalidCertificate(format!("invalid X.509: {e}")))?;

    DateTime::from_timestamp(cert.validity().not_after.timestamp(), 0)
        .ok_or_else(|| AcmeError::InvalidCertificate("expiry out of range".to_string()))
}
