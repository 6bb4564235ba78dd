//! The network-ensure activity.
//!
//! Guarantees exactly one shared network stack exists per project and
//! returns its identifiers. Safe to call any number of times, from any
//! number of concurrent workflow executions: the engine's stack identity
//! resolution is the only serialization point.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use vmgr_automation::{
    network_program, output_str, AutomationClient, ConfigValue, OUTPUT_NETWORK_ID,
    OUTPUT_SUBNET_ID,
};
use vmgr_core::identity::validate_name;
use vmgr_core::{StackIdentity, NETWORK_STACK_NAME};

use crate::activity::{
    decode_input, encode_output, ActivityContext, ActivityError, ActivityHandler, ActivityStep,
};
use crate::config::{PlatformSettings, CONFIG_REGION, PLATFORM_PLUGIN};

/// Network metadata for VM provisioning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Network {
    pub network_id: String,
    pub subnet_id: String,
}

/// Creates or finds the shared virtual network where VMs are placed.
pub struct NetworkEnsurer {
    client: Arc<dyn AutomationClient>,
    settings: PlatformSettings,
}

impl NetworkEnsurer {
    pub fn new(client: Arc<dyn AutomationClient>, settings: PlatformSettings) -> Self {
        Self { client, settings }
    }

    /// Create or select the project's `networking` stack and return its
    /// identifiers.
    ///
    /// Repeated calls converge on the same stack: creation that collides
    /// with an existing stack falls back to selecting it, and a stack whose
    /// outputs are already populated is returned without touching
    /// infrastructure.
    #[instrument(skip(self))]
    pub async fn ensure_network(&self, project_name: &str) -> Result<Network, ActivityError> {
        validate_name(project_name)
            .map_err(|e| ActivityError::non_retryable(ActivityStep::Validation, e.to_string()))?;

        let workspace = self
            .client
            .new_workspace(network_program(), project_name)
            .await
            .map_err(|e| ActivityError::wrap(ActivityStep::Workspace, e))?;

        workspace
            .install_plugin(PLATFORM_PLUGIN.0, PLATFORM_PLUGIN.1)
            .await
            .map_err(|e| ActivityError::wrap(ActivityStep::PluginInstall, e))?;

        let user = workspace
            .whoami()
            .await
            .map_err(|e| ActivityError::wrap(ActivityStep::Identity, e))?;

        // The well-known networking stack. Concurrent callers race the
        // create; losers select the stack the winner made.
        let identity = StackIdentity::new(user, project_name, NETWORK_STACK_NAME);
        let stack = match workspace.create_stack(&identity).await {
            Ok(stack) => stack,
            Err(err) if err.is_already_exists() => workspace
                .select_stack(&identity)
                .await
                .map_err(|e| ActivityError::wrap(ActivityStep::StackSelect, e))?,
            Err(err) => return Err(ActivityError::wrap(ActivityStep::StackCreate, err)),
        };

        let outputs = stack
            .outputs()
            .await
            .map_err(|e| ActivityError::wrap(ActivityStep::Outputs, e))?;
        if let (Some(network_id), Some(subnet_id)) = (
            output_str(&outputs, OUTPUT_NETWORK_ID),
            output_str(&outputs, OUTPUT_SUBNET_ID),
        ) {
            info!(network_id = %network_id, "found an existing networking stack");
            return Ok(Network {
                network_id,
                subnet_id,
            });
        }

        stack
            .set_config(CONFIG_REGION, ConfigValue::plain(self.settings.region.clone()))
            .await
            .map_err(|e| ActivityError::wrap(ActivityStep::Config, e))?;

        let result = stack
            .up()
            .await
            .map_err(|e| ActivityError::wrap(ActivityStep::Apply, e))?;

        let network_id = output_str(&result.outputs, OUTPUT_NETWORK_ID).ok_or_else(|| {
            ActivityError::new(ActivityStep::Outputs, "networking stack exported no networkID")
        })?;
        let subnet_id = output_str(&result.outputs, OUTPUT_SUBNET_ID).ok_or_else(|| {
            ActivityError::new(ActivityStep::Outputs, "networking stack exported no subnetID")
        })?;

        info!(network_id = %network_id, "created a new networking stack");
        Ok(Network {
            network_id,
            subnet_id,
        })
    }
}

#[async_trait]
impl ActivityHandler for NetworkEnsurer {
    async fn invoke(
        &self,
        ctx: ActivityContext,
        input: serde_json::Value,
    ) -> Result<serde_json::Value, ActivityError> {
        debug!(attempt = ctx.attempt, "ensure-network invoked");
        let project_name: String = decode_input(input)?;
        let network = self.ensure_network(&project_name).await?;
        encode_output(&network)
    }
}
