//! Registry Gate Library
//!
//! TLS identity and access-policy bootstrap for a container registry front-end.
//!
//! This library provides:
//!
//! - **TLS identity**: a self-signed fallback pair, or an ACME-issued
//!   certificate that is renewed in the background
//! - **ACME**: order handling, challenge answering and certificate storage
//! - **Startup**: picking the identity without ever downgrading silently
//!
//! Group-to-permission mapping lives in `registry-gate-common` and ACME
//! environment loading in `registry-gate-config`; both are re-exported here.
//!
//! # Example
//!
//! ```ignore
//! use registry_gate::{prepare_server_identity, AcmeIssuer, TlsConfigProvider};
//!
//! let provider = TlsConfigProvider::new(AcmeIssuer::new());
//! let identity = prepare_server_identity(&provider, cert_path, key_path).await?;
//! let tls = identity.server_config();
//! ```

// ============================================================================
// Module Declarations
// ============================================================================

pub mod acme;
pub mod startup;
pub mod tls;

// ============================================================================
// Public API Re-exports
// ============================================================================

// ACME
pub use acme::{AcmeError, AcmeIssuer, AcmeSettings, CertificateIssuer};

// TLS identity
pub use tls::{
    ensure_self_signed, load_static_server_config, AcmeSetupError, BootstrapOutcome,
    TlsConfigProvider, TlsError,
};

// Startup
pub use startup::{
    prepare_server_identity, prepare_server_identity_from_vars, ServerIdentity, StartupError,
};

// Configuration and permissions
pub use registry_gate_common::{resolve_group, resolve_groups, AccessLevel, Capability};
pub use registry_gate_config::{load_acme_config, AcmeConfig, ConfigError};
