//! Worker registration.
//!
//! Binds the workflow and the three activities to their public names, and
//! offers a ready-wired orchestrator handle running on the local runtime.
//! A hosted deployment registers the same `ActivityRegistry` with its
//! external durable runtime instead.

use std::sync::Arc;

use vmgr_automation::AutomationClient;

use crate::activity::{ActivityRegistry, CancellationToken, RetryPolicy};
use crate::config::PlatformSettings;
use crate::error::WorkflowError;
use crate::network::NetworkEnsurer;
use crate::runtime::{LocalRuntime, WorkflowContext};
use crate::virtual_machine::{VmDecommissioner, VmProvisioner, VmRecord};
use crate::workflow::{create_virtual_machine, CreateVirtualMachineRequest};

/// Public name of the workflow.
pub const CREATE_VIRTUAL_MACHINE_WORKFLOW: &str = "create-virtual-machine";
/// Public names of the activities.
pub const ENSURE_NETWORK: &str = "ensure-network";
pub const DEPLOY_VIRTUAL_MACHINE: &str = "deploy-virtual-machine";
pub const TEAR_DOWN_VIRTUAL_MACHINE: &str = "tear-down-virtual-machine";

/// Build the registry of the three activities, each wired to the given
/// provisioning client and settings.
pub fn activity_registry(
    client: Arc<dyn AutomationClient>,
    settings: PlatformSettings,
) -> ActivityRegistry {
    let mut registry = ActivityRegistry::new();
    registry.register(
        ENSURE_NETWORK,
        Arc::new(NetworkEnsurer::new(client.clone(), settings.clone())),
    );
    registry.register(
        DEPLOY_VIRTUAL_MACHINE,
        Arc::new(VmProvisioner::new(client.clone(), settings)),
    );
    registry.register(TEAR_DOWN_VIRTUAL_MACHINE, Arc::new(VmDecommissioner::new(client)));
    registry
}

/// Orchestrator handle running workflows on the in-process runtime.
#[derive(Clone)]
pub struct VmOrchestrator {
    runtime: Arc<LocalRuntime>,
}

impl VmOrchestrator {
    /// Default wiring: the three activities against `client`/`settings`.
    pub fn new(
        client: Arc<dyn AutomationClient>,
        settings: PlatformSettings,
        retry_policy: RetryPolicy,
    ) -> Self {
        Self::from_registry(activity_registry(client, settings), retry_policy)
    }

    /// Custom wiring, e.g. a provisioner with a non-default collision
    /// policy or instance template.
    pub fn from_registry(registry: ActivityRegistry, retry_policy: RetryPolicy) -> Self {
        Self {
            runtime: Arc::new(LocalRuntime::new(registry, retry_policy)),
        }
    }

    pub async fn create_virtual_machine(
        &self,
        request: CreateVirtualMachineRequest,
    ) -> Result<VmRecord, WorkflowError> {
        let ctx = WorkflowContext::new(self.runtime.clone());
        create_virtual_machine(&ctx, request).await
    }

    /// Run the workflow under an externally controlled cancellation token.
    pub async fn create_virtual_machine_with_cancellation(
        &self,
        request: CreateVirtualMachineRequest,
        cancellation: CancellationToken,
    ) -> Result<VmRecord, WorkflowError> {
        let ctx = WorkflowContext::with_cancellation(self.runtime.clone(), cancellation);
        create_virtual_machine(&ctx, request).await
    }
}
