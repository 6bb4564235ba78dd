use thiserror::Error;

use crate::activity::ActivityError;

/// Terminal outcome of a failed workflow execution.
///
/// Carries the first point of failure; cleanup failures are logged by the
/// workflow, never surfaced here in place of the original cause.
#[derive(Error, Debug)]
pub enum WorkflowError {
    #[error("network provisioning failed: {0}")]
    EnsureNetwork(#[source] ActivityError),

    #[error("VM provisioning failed: {0}")]
    DeployVirtualMachine(#[source] ActivityError),

    #[error("workflow cancelled")]
    Cancelled,
}

impl WorkflowError {
    /// The activity failure underlying this workflow failure, if any.
    pub fn activity_error(&self) -> Option<&ActivityError> {
        match self {
            WorkflowError::EnsureNetwork(err) | WorkflowError::DeployVirtualMachine(err) => {
                Some(err)
            }
            WorkflowError::Cancelled => None,
        }
    }
}
