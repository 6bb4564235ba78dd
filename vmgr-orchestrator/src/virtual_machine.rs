//! VM provisioning and decommissioning activities.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use vmgr_automation::{
    output_str, virtual_machine_program, AutomationClient, ConfigValue, InstanceTemplate,
    ResourceGraph, OUTPUT_IP,
};
use vmgr_core::identity::validate_name;
use vmgr_core::{vm_stack_name, StackIdentity};

use crate::activity::{
    decode_input, encode_output, ActivityContext, ActivityError, ActivityHandler, ActivityStep,
};
use crate::config::{
    PlatformSettings, CONFIG_AUTH_URL, CONFIG_REGION, CONFIG_TENANT, PLATFORM_PLUGIN,
    RANDOM_PLUGIN,
};
use crate::network::Network;

/// How to treat an existing stack under the caller-supplied VM name.
///
/// VM names are expected caller-unique, so a collision defaults to an
/// error. `SelectExisting` instead resumes the existing stack, for callers
/// that retry a failed deploy under the same name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollisionPolicy {
    #[default]
    Error,
    SelectExisting,
}

/// Input to the deploy activity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployVirtualMachineRequest {
    pub project_name: String,
    pub vm_name: String,
    pub network: Network,
}

/// Input to the teardown activity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TearDownVirtualMachineRequest {
    pub project_name: String,
    pub stack_name: String,
}

/// A successfully provisioned VM.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VmRecord {
    pub stack_name: String,
    pub ip_address: String,
}

/// Creates a new, uniquely named VM stack attached to the shared network.
pub struct VmProvisioner {
    client: Arc<dyn AutomationClient>,
    settings: PlatformSettings,
    template: InstanceTemplate,
    collision_policy: CollisionPolicy,
}

impl VmProvisioner {
    pub fn new(client: Arc<dyn AutomationClient>, settings: PlatformSettings) -> Self {
        Self {
            client,
            settings,
            template: InstanceTemplate::default(),
            collision_policy: CollisionPolicy::default(),
        }
    }

    pub fn with_template(mut self, template: InstanceTemplate) -> Self {
        self.template = template;
        self
    }

    pub fn with_collision_policy(mut self, policy: CollisionPolicy) -> Self {
        self.collision_policy = policy;
        self
    }

    /// Deploy a webserver VM stack named after `vm_name`.
    ///
    /// Errors carry a `resources_created` marker once the stack exists, so
    /// the workflow knows whether cleanup applies. On a retry attempt the
    /// stack may already exist because an earlier attempt of this same
    /// invocation created it; that case resumes the stack regardless of
    /// the collision policy, which only governs first attempts.
    #[instrument(skip_all, fields(project = %project_name, vm = %vm_name, attempt = ctx.attempt))]
    pub async fn deploy_virtual_machine(
        &self,
        ctx: &ActivityContext,
        project_name: &str,
        vm_name: &str,
        network: &Network,
    ) -> Result<VmRecord, ActivityError> {
        validate_name(vm_name)
            .map_err(|e| ActivityError::non_retryable(ActivityStep::Validation, e.to_string()))?;
        let stack_name = vm_stack_name(vm_name);

        info!(stack = %stack_name, "setting up webserver stack");

        let program = virtual_machine_program(vm_name, &network.network_id, &self.template);
        let workspace = self
            .client
            .new_workspace(program, project_name)
            .await
            .map_err(|e| ActivityError::wrap(ActivityStep::Workspace, e))?;

        for (name, version) in [PLATFORM_PLUGIN, RANDOM_PLUGIN] {
            workspace
                .install_plugin(name, version)
                .await
                .map_err(|e| ActivityError::wrap(ActivityStep::PluginInstall, e))?;
        }

        let user = workspace
            .whoami()
            .await
            .map_err(|e| ActivityError::wrap(ActivityStep::Identity, e))?;

        let identity = StackIdentity::new(user, project_name, stack_name.clone());
        let resume_existing =
            self.collision_policy == CollisionPolicy::SelectExisting || ctx.attempt > 1;
        let stack = match workspace.create_stack(&identity).await {
            Ok(stack) => stack,
            Err(err) if err.is_already_exists() && resume_existing => {
                info!(stack = %stack_name, "stack exists, resuming it");
                workspace
                    .select_stack(&identity)
                    .await
                    .map_err(|e| ActivityError::wrap(ActivityStep::StackSelect, e))?
            }
            Err(err) if err.is_already_exists() => {
                return Err(ActivityError::non_retryable(
                    ActivityStep::StackCreate,
                    err.to_string(),
                ));
            }
            Err(err) => return Err(ActivityError::wrap(ActivityStep::StackCreate, err)),
        };

        // From here on the stack exists; failures leave resources for the
        // workflow to tear down.
        for (key, value) in [
            (CONFIG_AUTH_URL, &self.settings.auth_url),
            (CONFIG_REGION, &self.settings.region),
            (CONFIG_TENANT, &self.settings.tenant),
        ] {
            stack
                .set_config(key, ConfigValue::plain(value.clone()))
                .await
                .map_err(|e| {
                    ActivityError::wrap(ActivityStep::Config, e).with_resources_created()
                })?;
        }

        info!("deploying a VM webserver...");
        let result = stack
            .up()
            .await
            .map_err(|e| ActivityError::wrap(ActivityStep::Apply, e).with_resources_created())?;

        let ip_address = output_str(&result.outputs, OUTPUT_IP).ok_or_else(|| {
            ActivityError::new(ActivityStep::Outputs, "VM stack exported no ip")
                .with_resources_created()
        })?;

        info!(ip = %ip_address, "deployed a new VM");
        Ok(VmRecord {
            stack_name,
            ip_address,
        })
    }
}

#[async_trait]
impl ActivityHandler for VmProvisioner {
    async fn invoke(
        &self,
        ctx: ActivityContext,
        input: serde_json::Value,
    ) -> Result<serde_json::Value, ActivityError> {
        debug!(attempt = ctx.attempt, "deploy-virtual-machine invoked");
        let request: DeployVirtualMachineRequest = decode_input(input)?;
        let record = self
            .deploy_virtual_machine(&ctx, &request.project_name, &request.vm_name, &request.network)
            .await?;
        encode_output(&record)
    }
}

/// Destroys a previously created VM stack.
pub struct VmDecommissioner {
    client: Arc<dyn AutomationClient>,
}

impl VmDecommissioner {
    pub fn new(client: Arc<dyn AutomationClient>) -> Self {
        Self { client }
    }

    /// Destroy the stack's resources and remove its bookkeeping entry.
    ///
    /// A stack that no longer exists counts as success, so retries and
    /// repeated cleanup calls are no-ops.
    #[instrument(skip(self))]
    pub async fn tear_down_virtual_machine(
        &self,
        project_name: &str,
        stack_name: &str,
    ) -> Result<(), ActivityError> {
        // Teardown works off the stack's recorded state; no program needed.
        let workspace = self
            .client
            .new_workspace(ResourceGraph::default(), project_name)
            .await
            .map_err(|e| ActivityError::wrap(ActivityStep::Workspace, e))?;

        let user = workspace
            .whoami()
            .await
            .map_err(|e| ActivityError::wrap(ActivityStep::Identity, e))?;

        let identity = StackIdentity::new(user, project_name, stack_name);
        let stack = match workspace.select_stack(&identity).await {
            Ok(stack) => stack,
            Err(err) if err.is_not_found() => {
                info!(stack = %stack_name, "stack already gone, nothing to tear down");
                return Ok(());
            }
            Err(err) => return Err(ActivityError::wrap(ActivityStep::StackSelect, err)),
        };

        stack
            .destroy()
            .await
            .map_err(|e| ActivityError::wrap(ActivityStep::Destroy, e))?;

        match workspace.remove_stack(&identity).await {
            Ok(()) => {}
            Err(err) if err.is_not_found() => {}
            Err(err) => return Err(ActivityError::wrap(ActivityStep::Remove, err)),
        }

        info!(stack = %stack_name, "tore down VM stack");
        Ok(())
    }
}

#[async_trait]
impl ActivityHandler for VmDecommissioner {
    async fn invoke(
        &self,
        ctx: ActivityContext,
        input: serde_json::Value,
    ) -> Result<serde_json::Value, ActivityError> {
        debug!(attempt = ctx.attempt, "tear-down-virtual-machine invoked");
        let request: TearDownVirtualMachineRequest = decode_input(input)?;
        self.tear_down_virtual_machine(&request.project_name, &request.stack_name)
            .await?;
        encode_output(&())
    }
}
