//! Durable VM lifecycle orchestration.
//!
//! This crate contains the core business logic for provisioning virtual
//! machines on a shared project network: the three activities (ensure
//! network, deploy VM, tear down VM), the workflow that sequences them,
//! and the registration surface a durable-execution runtime hosts them
//! through. The provisioning engine itself lives behind the traits in
//! `vmgr-automation`.

pub mod activity;
pub mod config;
pub mod error;
pub mod network;
pub mod runtime;
pub mod virtual_machine;
pub mod worker;
pub mod workflow;

pub use activity::{
    ActivityContext, ActivityError, ActivityHandler, ActivityRegistry, ActivityStep,
    CancellationToken, RetryPolicy,
};
pub use config::PlatformSettings;
pub use error::WorkflowError;
pub use network::{Network, NetworkEnsurer};
pub use runtime::{LocalRuntime, WorkflowContext};
pub use virtual_machine::{
    CollisionPolicy, DeployVirtualMachineRequest, TearDownVirtualMachineRequest,
    VmDecommissioner, VmProvisioner, VmRecord,
};
pub use worker::{
    activity_registry, VmOrchestrator, CREATE_VIRTUAL_MACHINE_WORKFLOW, DEPLOY_VIRTUAL_MACHINE,
    ENSURE_NETWORK, TEAR_DOWN_VIRTUAL_MACHINE,
};
pub use workflow::{create_virtual_machine, CreateVirtualMachineRequest, WorkflowState};
