//! Configuration error types.

use thiserror::Error;

/// Errors produced while loading configuration from the environment.
///
/// Any of these means ACME was *not* enabled for this load; the caller
/// should abort startup rather than guess.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// ACME was force-enabled without any domain to obtain a certificate for
    #[error("{domains_var} must be set when {enable_var} is true")]
    MissingDomains {
        domains_var: &'static str,
        enable_var: &'static str,
    },

    /// A port variable is not an integer in 1..=65535
    #[error("invalid {var}: {value:?} (expected a port between 1 and 65535)")]
    InvalidPort { var: &'static str, value: String },

    /// A boolean flag could not be parsed
    #[error("invalid {var}: {value:?} (expected true or false)")]
    InvalidFlag { var: &'static str, value: String },

    /// A variable this crate reads holds a value that is not UTF-8
    #[error("invalid {var}: value is not valid UTF-8")]
    NonUnicode { var: String },

    /// The environment could not be deserialized
    #[error("failed to read environment: {0}")]
    Env(#[from] envy::Error),
}
