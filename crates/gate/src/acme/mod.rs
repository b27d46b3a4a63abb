//! ACME automatic certificate management
//!
//! Provides the certificate issuer that backs
//! [`TlsConfigProvider`](crate::tls::TlsConfigProvider) in production.
//!
//! # Features
//!
//! - Certificate issuance through Let's Encrypt or any RFC 8555 directory
//! - TLS-ALPN-01 challenges, with HTTP-01 as a fallback
//! - Custom trust roots for private certificate authorities
//! - Persistent storage for certificates and account credentials
//! - Background renewal with hot-swap of the served certificate
//!
//! # Architecture
//!
//! - [`CertificateIssuer`] - The seam the TLS provider calls; stubbed in tests
//! - [`AcmeIssuer`] - Production issuer wiring the pieces below together
//! - [`AcmeClient`] - Wrapper around `instant-acme` for ACME protocol operations
//! - [`CertificateStorage`] - Persistent storage for certificates and account keys
//! - [`ChallengeManager`] - Pending HTTP-01 tokens and TLS-ALPN-01 certificates
//! - [`AcmeCertResolver`] - rustls resolver answering challenges and serving the
//!   issued certificate
//! - [`RenewalScheduler`] - Background task for checking and renewing certificates
//!
//! # Settings
//!
//! All issuer knobs travel in an immutable [`AcmeSettings`] value built once at
//! startup and passed by reference. There is no process-wide mutable ACME state.
//!
//! # Challenge Flow
//!
//! When a certificate needs to be obtained or renewed:
//!
//! 1. [`AcmeClient`] creates a new order with the ACME server
//! 2. For each domain, the server offers challenges; TLS-ALPN-01 is preferred
//! 3. [`ChallengeManager`] registers the challenge certificate or key authorization
//! 4. A temporary responder serves it on the challenge port, unless the port is
//!    already taken by the registry listener (which answers through
//!    [`AcmeCertResolver`])
//! 5. Once validated, [`AcmeClient`] finalizes the order and receives the certificate
//! 6. [`CertificateStorage`] persists it and the resolver starts serving it

mod challenge;
mod client;
mod error;
mod issuer;
mod resolver;
mod responder;
mod scheduler;
mod settings;
mod storage;

pub use challenge::{tls_alpn_challenge_certificate, ChallengeManager, ACME_CHALLENGE_PREFIX};
pub use client::AcmeClient;
pub use error::{AcmeError, StorageError};
pub use issuer::{AcmeIssuer, CertificateIssuer};
pub use resolver::{AcmeCertResolver, ACME_TLS_ALPN_NAME};
pub use responder::{ChallengeResponder, ResponderKind};
pub use scheduler::RenewalScheduler;
pub use settings::{AcmeSettings, DEFAULT_HTTP_PORT, DEFAULT_TLS_ALPN_PORT};
pub use storage::{CertificateMeta, CertificateStorage, StoredCertificate};
