//! Repository permissions derived from directory-service group names.
//!
//! A group grants access to one namespace when its name follows the
//! `<namespace>_<suffix>` convention, where the suffix is one of:
//!
//! | suffix | pull only | delete allowed |
//! |--------|-----------|----------------|
//! | `rwd`  | no        | yes            |
//! | `rw`   | no        | no             |
//! | `rd`   | yes       | yes            |
//! | `r`    | yes       | no             |
//!
//! Group names come from an external directory and must be treated as
//! untrusted input. Anything that does not match the convention resolves to
//! no capability at all, which callers must treat as "deny".

use std::fmt;
use std::str::FromStr;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, trace};

/// Separator between the namespace and the access suffix
pub const GROUP_SEPARATOR: char = '_';

/// Access level encoded by a group-name suffix
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessLevel {
    /// `r`: pull only
    Read,
    /// `rd`: pull and delete
    ReadDelete,
    /// `rw`: pull and push
    ReadWrite,
    /// `rwd`: pull, push and delete
    ReadWriteDelete,
}

impl AccessLevel {
    /// All recognized levels
    pub const ALL: [AccessLevel; 4] = [
        AccessLevel::Read,
        AccessLevel::ReadDelete,
        AccessLevel::ReadWrite,
        AccessLevel::ReadWriteDelete,
    ];

    /// Parse an exact suffix token
    pub fn from_suffix(suffix: &str) -> Option<Self> {
        match suffix {
            "r" => Some(AccessLevel::Read),
            "rd" => Some(AccessLevel::ReadDelete),
            "rw" => Some(AccessLevel::ReadWrite),
            "rwd" => Some(AccessLevel::ReadWriteDelete),
            _ => None,
        }
    }

    /// The suffix token for this level
    pub fn suffix(self) -> &'static str {
        match self {
            AccessLevel::Read => "r",
            AccessLevel::ReadDelete => "rd",
            AccessLevel::ReadWrite => "rw",
            AccessLevel::ReadWriteDelete => "rwd",
        }
    }

    /// Whether pushes are denied
    pub fn pull_only(self) -> bool {
        matches!(self, AccessLevel::Read | AccessLevel::ReadDelete)
    }

    /// Whether manifest/blob deletion is permitted
    pub fn delete_allowed(self) -> bool {
        matches!(self, AccessLevel::ReadDelete | AccessLevel::ReadWriteDelete)
    }
}

impl fmt::Display for AccessLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.suffix())
    }
}

/// Reasons a group name does not grant any capability
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PermissionError {
    #[error("group {0:?} has no '_' separated access suffix")]
    MissingSeparator(String),

    #[error("group {group:?} has unrecognized access suffix {suffix:?}")]
    UnknownSuffix { group: String, suffix: String },

    #[error("group {0:?} has an empty namespace")]
    EmptyNamespace(String),
}

/// Namespace-scoped capability resolved from a single group
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Capability {
    /// Repository namespace the capability applies to
    pub namespace: String,
    /// Pushes are denied
    pub pull_only: bool,
    /// Deletes are permitted
    pub delete_allowed: bool,
}

impl Capability {
    /// Build the capability for a namespace at the given level
    pub fn new(namespace: impl Into<String>, level: AccessLevel) -> Self {
        Self {
            namespace: namespace.into(),
            pull_only: level.pull_only(),
            delete_allowed: level.delete_allowed(),
        }
    }

    /// The access level these flags correspond to
    pub fn level(&self) -> AccessLevel {
        match (self.pull_only, self.delete_allowed) {
            (true, false) => AccessLevel::Read,
            (true, true) => AccessLevel::ReadDelete,
            (false, false) => AccessLevel::ReadWrite,
            (false, true) => AccessLevel::ReadWriteDelete,
        }
    }
}

impl FromStr for Capability {
    type Err = PermissionError;

    /// Parse `<namespace>_<suffix>`.
    ///
    /// The split happens on the last separator, so namespaces may contain
    /// `_` themselves (`data_team_rw` is namespace `data_team`). The suffix
    /// must match a token exactly; there is no prefix or longest-match
    /// guessing.
    fn from_str(group: &str) -> Result<Self, Self::Err> {
        let (namespace, suffix) = group
            .rsplit_once(GROUP_SEPARATOR)
            .ok_or_else(|| PermissionError::MissingSeparator(group.to_string()))?;

        let level =
            AccessLevel::from_suffix(suffix).ok_or_else(|| PermissionError::UnknownSuffix {
                group: group.to_string(),
                suffix: suffix.to_string(),
            })?;

        if namespace.is_empty() {
            return Err(PermissionError::EmptyNamespace(group.to_string()));
        }

        Ok(Capability::new(namespace, level))
    }
}

/// Resolve a group name to a capability.
///
/// `None` means the group grants nothing.
pub fn resolve_group(group: &str) -> Option<Capability> {
    match group.parse::<Capability>() {
        Ok(capability) => {
            trace!(
                group = %group,
                namespace = %capability.namespace,
                level = %capability.level(),
                "Resolved group capability"
            );
            Some(capability)
        }
        Err(e) => {
            trace!(group = %group, reason = %e, "Group grants no capability");
            None
        }
    }
}

/// Resolve every group a principal belongs to.
///
/// Groups outside the naming convention are skipped; they are common in
/// real directories (e.g. `staff`, `vpn-users`) and simply grant nothing.
pub fn resolve_groups<I, S>(groups: I) -> Vec<Capability>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut capabilities = Vec::new();
    let mut skipped = 0usize;

    for group in groups {
        match resolve_group(group.as_ref()) {
            Some(capability) => capabilities.push(capability),
            None => skipped += 1,
        }
    }

    debug!(
        granted = capabilities.len(),
        skipped, "Resolved directory groups"
    );
    capabilities
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn resolved(group: &str) -> (String, bool, bool) {
        let cap = resolve_group(group).expect("group should resolve");
        (cap.namespace, cap.pull_only, cap.delete_allowed)
    }

    #[test]
    fn test_recognized_suffixes() {
        assert_eq!(resolved("team1_rwd"), ("team1".to_string(), false, true));
        assert_eq!(resolved("team2_rw"), ("team2".to_string(), false, false));
        assert_eq!(resolved("team3_rd"), ("team3".to_string(), true, true));
        assert_eq!(resolved("team4_r"), ("team4".to_string(), true, false));
    }

    #[test]
    fn test_bare_name_is_denied() {
        assert_eq!(resolve_group("team5"), None);
        assert_eq!(
            "team5".parse::<Capability>(),
            Err(PermissionError::MissingSeparator("team5".to_string()))
        );
    }

    #[test]
    fn test_unknown_suffix_is_denied() {
        assert_eq!(resolve_group("team_admin"), None);
        assert_eq!(resolve_group("team_RW"), None);
        assert_eq!(resolve_group("team_rw "), None);
        assert_eq!(resolve_group("team_"), None);
        assert!(matches!(
            "team_wr".parse::<Capability>(),
            Err(PermissionError::UnknownSuffix { ref suffix, .. }) if suffix == "wr"
        ));
    }

    #[test]
    fn test_empty_namespace_is_denied() {
        assert_eq!(resolve_group("_rw"), None);
        assert_eq!(
            "_rwd".parse::<Capability>(),
            Err(PermissionError::EmptyNamespace("_rwd".to_string()))
        );
    }

    #[test]
    fn test_namespace_ending_in_suffix_letters() {
        // Namespaces that themselves end in suffix-like text must not be
        // shortened.
        assert_eq!(resolved("builder_r"), ("builder".to_string(), true, false));
        assert_eq!(resolved("stor_rd"), ("stor".to_string(), true, true));
        assert_eq!(resolved("archive_rw_rd"), ("archive_rw".to_string(), true, true));
        assert_eq!(resolved("data_team_rwd"), ("data_team".to_string(), false, true));
        assert_eq!(resolve_group("teamrw"), None);
    }

    #[test]
    fn test_resolve_groups_skips_foreign_groups() {
        let caps = resolve_groups(["staff", "web_rw", "vpn-users", "ops_rd"]);
        assert_eq!(
            caps,
            vec![
                Capability::new("web", AccessLevel::ReadWrite),
                Capability::new("ops", AccessLevel::ReadDelete),
            ]
        );
    }

    #[test]
    fn test_capability_serializes_flags() {
        let json = serde_json::to_value(Capability::new("team1", AccessLevel::ReadWriteDelete))
            .unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "namespace": "team1",
                "pull_only": false,
                "delete_allowed": true,
            })
        );
    }

    proptest! {
        #[test]
        fn prop_well_formed_groups_resolve(
            namespace in "[a-z0-9][a-z0-9_.-]{0,24}",
            index in 0usize..4,
        ) {
            let level = AccessLevel::ALL[index];
            let group = format!("{namespace}{GROUP_SEPARATOR}{level}");
            let cap = resolve_group(&group).expect("well-formed group");
            prop_assert_eq!(&cap.namespace, &namespace);
            prop_assert_eq!(cap.level(), level);
        }

        #[test]
        fn prop_resolution_never_panics(group in "\\PC{0,40}") {
            if let Some(cap) = resolve_group(&group) {
                prop_assert!(!cap.namespace.is_empty());
                prop_assert!(group.ends_with(cap.level().suffix()));
            }
        }
    }
}
