//! Provisioning-engine abstraction library.
//!
//! This library provides the interface the orchestrator uses to drive a
//! declarative-infrastructure engine: workspaces bound to a program, stacks
//! addressed by an (owner, project, name) identity, and the apply/destroy
//! operations that reconcile declared resources with the cloud. The engine
//! itself is an external collaborator; an in-memory implementation for
//! tests lives behind the `test-helpers` feature.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use vmgr_core::StackIdentity;

pub mod error;
pub mod program;

#[cfg(feature = "test-helpers")]
pub mod mock;

pub use error::{AutomationError, Result};
pub use program::{
    network_program, virtual_machine_program, Export, InstanceTemplate, Resource, ResourceGraph,
    Value, OUTPUT_IP, OUTPUT_NETWORK_ID, OUTPUT_SUBNET_ID,
};

/// Stack outputs as returned by the engine, keyed by export name.
pub type OutputMap = HashMap<String, serde_json::Value>;

/// Result of a successful apply.
#[derive(Debug, Clone)]
pub struct UpResult {
    pub outputs: OutputMap,
}

/// A single configuration value for a stack.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigValue {
    pub value: String,
    pub secret: bool,
}

impl ConfigValue {
    pub fn plain(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            secret: false,
        }
    }

    pub fn secret(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            secret: true,
        }
    }
}

/// Entry point into the provisioning engine.
#[async_trait]
pub trait AutomationClient: Send + Sync {
    /// Create an execution context binding `program` to project metadata.
    async fn new_workspace(
        &self,
        program: ResourceGraph,
        project: &str,
    ) -> Result<Box<dyn Workspace>>;
}

/// Execution context for one program within one project.
#[async_trait]
pub trait Workspace: Send + Sync {
    /// Install a provider plugin the program depends on.
    async fn install_plugin(&self, name: &str, version: &str) -> Result<()>;

    /// The authenticated caller, used as the owner segment of stack identities.
    async fn whoami(&self) -> Result<String>;

    /// Create a brand-new stack. Fails with `StackAlreadyExists` if the
    /// identity is already taken.
    async fn create_stack(&self, identity: &StackIdentity) -> Result<Box<dyn Stack>>;

    /// Select an existing stack. Fails with `StackNotFound` if absent.
    async fn select_stack(&self, identity: &StackIdentity) -> Result<Box<dyn Stack>>;

    /// Remove a stack's bookkeeping entry. The stack's resources must have
    /// been destroyed first.
    async fn remove_stack(&self, identity: &StackIdentity) -> Result<()>;
}

/// One addressable unit of provisioned infrastructure.
#[async_trait]
pub trait Stack: Send + Sync {
    /// Fully qualified `owner/project/stack` name.
    fn name(&self) -> &str;

    async fn set_config(&self, key: &str, value: ConfigValue) -> Result<()>;

    /// Reconcile declared resources with actual cloud state.
    async fn up(&self) -> Result<UpResult>;

    /// Read current outputs without mutating anything.
    async fn outputs(&self) -> Result<OutputMap>;

    /// Tear down every resource in the stack.
    async fn destroy(&self) -> Result<()>;
}

/// Extract a non-empty string output, if present.
pub fn output_str(outputs: &OutputMap, key: &str) -> Option<String> {
    outputs
        .get(key)
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_str_filters_missing_and_empty() {
        let mut outputs = OutputMap::new();
        outputs.insert("networkID".into(), serde_json::json!("net-123"));
        outputs.insert("subnetID".into(), serde_json::json!(""));
        outputs.insert("count".into(), serde_json::json!(3));

        assert_eq!(output_str(&outputs, "networkID").as_deref(), Some("net-123"));
        assert_eq!(output_str(&outputs, "subnetID"), None);
        assert_eq!(output_str(&outputs, "count"), None);
        assert_eq!(output_str(&outputs, "absent"), None);
    }
}
