//! Stack identity and naming.
//!
//! Every unit of provisioned infrastructure is addressed by an
//! (owner, project, stack) tuple. Identical tuples always resolve to the
//! same underlying stack, which is what makes re-entry after a crash or a
//! retry converge instead of double-provisioning.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Result, VmgrError};

/// Well-known stack name for the shared per-project network stack.
pub const NETWORK_STACK_NAME: &str = "networking";

/// Prefix for VM stack names, e.g. `web1` -> `vmgrweb1`.
pub const VM_STACK_PREFIX: &str = "vmgr";

/// Fully addressable identity of one stack inside the provisioning engine.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StackIdentity {
    pub owner: String,
    pub project: String,
    pub stack: String,
}

impl StackIdentity {
    pub fn new(owner: impl Into<String>, project: impl Into<String>, stack: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            project: project.into(),
            stack: stack.into(),
        }
    }

    /// The `owner/project/stack` form the provisioning engine expects.
    pub fn fully_qualified(&self) -> String {
        format!("{}/{}/{}", self.owner, self.project, self.stack)
    }
}

impl fmt::Display for StackIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.owner, self.project, self.stack)
    }
}

/// Derive the stack name for a VM.
///
/// Deterministic: the same `vm_name` always addresses the same stack, and
/// distinct names never collide (the prefix keeps VM stacks out of the
/// namespace used by the fixed `networking` stack).
pub fn vm_stack_name(vm_name: &str) -> String {
    format!("{}{}", VM_STACK_PREFIX, vm_name)
}

/// Validate a caller-supplied VM or project name.
///
/// Stack names travel into the provisioning engine's identity tuple, so
/// they are restricted to what every backend accepts: ASCII alphanumerics,
/// hyphens and underscores, starting with an alphanumeric.
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > 100 {
        return Err(VmgrError::Validation(
            "name must be between 1 and 100 characters".to_string(),
        ));
    }

    let mut chars = name.chars();
    let first = chars.next().unwrap_or(' ');
    if !first.is_ascii_alphanumeric() {
        return Err(VmgrError::Validation(format!(
            "name '{}' must start with an ASCII letter or digit",
            name
        )));
    }

    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(VmgrError::Validation(format!(
            "name '{}' may only contain ASCII letters, digits, '-' and '_'",
            name
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fully_qualified_joins_segments() {
        let id = StackIdentity::new("alice", "demo", "networking");
        assert_eq!(id.fully_qualified(), "alice/demo/networking");
        assert_eq!(id.to_string(), "alice/demo/networking");
    }

    #[test]
    fn identical_tuples_compare_equal() {
        let a = StackIdentity::new("alice", "demo", "vmgrweb1");
        let b = StackIdentity::new("alice", "demo", "vmgrweb1");
        assert_eq!(a, b);
    }

    #[test]
    fn vm_stack_name_is_prefixed() {
        assert_eq!(vm_stack_name("web1"), "vmgrweb1");
    }

    #[test]
    fn validate_name_accepts_typical_names() {
        assert!(validate_name("web1").is_ok());
        assert!(validate_name("demo-project_2").is_ok());
    }

    #[test]
    fn validate_name_rejects_bad_input() {
        assert!(validate_name("").is_err());
        assert!(validate_name("-leading").is_err());
        assert!(validate_name("has space").is_err());
        assert!(validate_name(&"x".repeat(101)).is_err());
    }
}
