//! Configuration loading for registry-gate.
//!
//! All settings are sourced from the environment so the gate can be dropped
//! into a container without a config file. Values are validated eagerly:
//! a malformed setting is an error, never a silent fallback.

pub mod acme;
pub mod env;
pub mod errors;

pub use acme::{acme_env_vars, load_acme_config, AcmeConfig};
pub use errors::ConfigError;
