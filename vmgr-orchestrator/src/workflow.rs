//! The durable orchestration workflow.
//!
//! A single logical thread of control: ensure the shared network, deploy
//! the VM, and tear the VM down again if provisioning failed after its
//! stack came into existence. The workflow itself performs no blocking
//! I/O; every engine interaction happens inside an activity, which the
//! runtime may retry transparently.

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use vmgr_core::vm_stack_name;

use crate::error::WorkflowError;
use crate::network::Network;
use crate::runtime::WorkflowContext;
use crate::virtual_machine::{
    DeployVirtualMachineRequest, TearDownVirtualMachineRequest, VmRecord,
};
use crate::worker::{DEPLOY_VIRTUAL_MACHINE, ENSURE_NETWORK, TEAR_DOWN_VIRTUAL_MACHINE};

/// States a workflow execution moves through. `Done` and `Failed` are
/// terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowState {
    Start,
    NetworkReady,
    VmReady,
    TearingDown,
    Done,
    Failed,
}

/// Caller-supplied workflow input.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateVirtualMachineRequest {
    pub project_name: String,
    pub vm_name: String,
}

/// Provision a VM on the project's shared network.
///
/// On success returns the VM's stack name and reachable address. On
/// failure returns the first point of failure; if the deploy got far
/// enough to create its stack, the stack is torn down first so the failed
/// path leaves no orphaned resources.
pub async fn create_virtual_machine(
    ctx: &WorkflowContext,
    request: CreateVirtualMachineRequest,
) -> Result<VmRecord, WorkflowError> {
    let mut state = WorkflowState::Start;
    info!(
        state = ?state,
        project = %request.project_name,
        vm = %request.vm_name,
        "starting VM provisioning workflow"
    );

    if ctx.cancellation().is_cancelled() {
        return Err(WorkflowError::Cancelled);
    }

    let network: Network = ctx
        .activity(ENSURE_NETWORK, &request.project_name)
        .await
        .map_err(WorkflowError::EnsureNetwork)?;
    state = WorkflowState::NetworkReady;
    debug!(state = ?state, network_id = %network.network_id, "network ready");

    if ctx.cancellation().is_cancelled() {
        return Err(WorkflowError::Cancelled);
    }

    let deploy = DeployVirtualMachineRequest {
        project_name: request.project_name.clone(),
        vm_name: request.vm_name.clone(),
        network,
    };
    match ctx
        .activity::<_, VmRecord>(DEPLOY_VIRTUAL_MACHINE, &deploy)
        .await
    {
        Ok(record) => {
            state = WorkflowState::Done;
            info!(
                state = ?state,
                stack = %record.stack_name,
                ip = %record.ip_address,
                "VM provisioned"
            );
            Ok(record)
        }
        Err(deploy_error) => {
            // Only inspect enough to decide whether cleanup applies; the
            // deploy error itself is what the caller gets back.
            if deploy_error.resources_created {
                state = WorkflowState::TearingDown;
                debug!(state = ?state, "deploy failed after stack creation, cleaning up");
                let teardown = TearDownVirtualMachineRequest {
                    project_name: request.project_name.clone(),
                    stack_name: vm_stack_name(&request.vm_name),
                };
                // Detached: cleanup runs to completion even under workflow
                // cancellation. Its failure is logged, never raised in
                // place of the deploy error.
                if let Err(cleanup_error) = ctx
                    .detached_activity::<_, ()>(TEAR_DOWN_VIRTUAL_MACHINE, &teardown)
                    .await
                {
                    error!(
                        stack = %teardown.stack_name,
                        error = %cleanup_error,
                        "teardown after failed deploy also failed"
                    );
                }
            }
            Err(WorkflowError::DeployVirtualMachine(deploy_error))
        }
    }
}
