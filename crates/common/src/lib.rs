//! Shared types for registry-gate.
//!
//! Currently hosts the directory-group permission model consumed by the
//! registry front-end on every authenticated request.

pub mod permissions;

pub use permissions::{
    resolve_group, resolve_groups, AccessLevel, Capability, PermissionError, GROUP_SEPARATOR,
};
