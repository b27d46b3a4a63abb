//! Parsing helpers for raw environment values.

use std::ffi::OsString;

use tracing::trace;

use crate::errors::ConfigError;

/// Collect the variables whose name starts with `prefix`.
///
/// Other variables are skipped without being decoded, so a non-UTF-8 value
/// elsewhere in the environment is harmless. A matching variable whose value
/// is not UTF-8 is an error naming it.
pub fn prefixed_vars<I>(prefix: &str, vars: I) -> Result<Vec<(String, String)>, ConfigError>
where
    I: IntoIterator<Item = (OsString, OsString)>,
{
    let mut selected = Vec::new();
    for (key, value) in vars {
        let Some(name) = key.to_str().filter(|name| name.starts_with(prefix)) else {
            continue;
        };
        let name = name.to_string();
        match value.into_string() {
            Ok(value) => selected.push((name, value)),
            Err(_) => return Err(ConfigError::NonUnicode { var: name }),
        }
    }
    Ok(selected)
}

/// Split a comma separated list, trimming entries and dropping empty ones.
///
/// Order is preserved and duplicates are kept.
pub fn split_comma_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(str::to_string)
        .collect()
}

/// Trim an optional value, treating blank as unset
pub fn trimmed(raw: Option<&str>) -> Option<String> {
    raw.map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

/// Parse a boolean flag.
///
/// Accepts the usual spellings (`1`, `t`, `true`, `TRUE`, `0`, `f`, `false`,
/// ...). Unset or blank yields `default`; anything else is rejected so a
/// typo cannot quietly turn a feature off.
pub fn parse_flag(var: &'static str, raw: Option<&str>, default: bool) -> Result<bool, ConfigError> {
    let Some(value) = raw.map(str::trim).filter(|v| !v.is_empty()) else {
        return Ok(default);
    };

    match value {
        "1" | "t" | "T" | "true" | "TRUE" | "True" => Ok(true),
        "0" | "f" | "F" | "false" | "FALSE" | "False" => Ok(false),
        _ => Err(ConfigError::InvalidFlag {
            var,
            value: value.to_string(),
        }),
    }
}

/// Parse an optional TCP port.
///
/// Unset or blank yields `None`. Otherwise the value must be a base-10
/// integer in 1..=65535.
pub fn parse_port(var: &'static str, raw: Option<&str>) -> Result<Option<u16>, ConfigError> {
    let Some(value) = raw.map(str::trim).filter(|v| !v.is_empty()) else {
        return Ok(None);
    };

    match value.parse::<u16>() {
        Ok(port) if port != 0 => {
            trace!(var, port, "Parsed port override");
            Ok(Some(port))
        }
        _ => Err(ConfigError::InvalidPort {
            var,
            value: value.to_string(),
        }),
    }
}
