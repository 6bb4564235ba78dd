//! End-to-end workflow behavior: success path, cleanup on deploy failure,
//! no cleanup on network failure, and cancellation.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use vmgr_automation::mock::MockEngine;
use vmgr_automation::AutomationClient;
use vmgr_orchestrator::{
    activity_registry, ActivityContext, ActivityError, ActivityHandler, ActivityRegistry,
    ActivityStep, CancellationToken, CreateVirtualMachineRequest, PlatformSettings, RetryPolicy,
    VmDecommissioner, VmOrchestrator, WorkflowError, TEAR_DOWN_VIRTUAL_MACHINE,
};

/// Wraps the real teardown activity and records the stack names it was
/// invoked for.
struct RecordingTeardown {
    inner: Arc<dyn ActivityHandler>,
    calls: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl ActivityHandler for RecordingTeardown {
    async fn invoke(
        &self,
        ctx: ActivityContext,
        input: serde_json::Value,
    ) -> Result<serde_json::Value, ActivityError> {
        let stack_name = input
            .get("stack_name")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        self.calls.lock().unwrap().push(stack_name);
        self.inner.invoke(ctx, input).await
    }
}

/// Standard test wiring: all three activities against `engine`, with the
/// teardown activity instrumented.
fn orchestrator(engine: &MockEngine) -> (VmOrchestrator, Arc<Mutex<Vec<String>>>) {
    let client: Arc<dyn AutomationClient> = Arc::new(engine.clone());
    let mut registry: ActivityRegistry =
        activity_registry(client.clone(), PlatformSettings::default());

    let calls = Arc::new(Mutex::new(Vec::new()));
    registry.register(
        TEAR_DOWN_VIRTUAL_MACHINE,
        Arc::new(RecordingTeardown {
            inner: Arc::new(VmDecommissioner::new(client)),
            calls: calls.clone(),
        }),
    );

    (
        VmOrchestrator::from_registry(registry, RetryPolicy::immediate(2)),
        calls,
    )
}

fn request(vm_name: &str) -> CreateVirtualMachineRequest {
    CreateVirtualMachineRequest {
        project_name: "demo".to_string(),
        vm_name: vm_name.to_string(),
    }
}

#[tokio::test]
async fn workflow_provisions_vm_on_shared_network() {
    let engine = MockEngine::new();
    let (orchestrator, teardowns) = orchestrator(&engine);

    let record = orchestrator
        .create_virtual_machine(request("web1"))
        .await
        .unwrap();
    assert_eq!(record.stack_name, "vmgrweb1");
    assert_eq!(record.ip_address, "203.0.113.10");

    // A second VM reuses the network stack instead of re-applying it.
    let second = orchestrator
        .create_virtual_machine(request("web2"))
        .await
        .unwrap();
    assert_eq!(second.stack_name, "vmgrweb2");
    assert_ne!(second.ip_address, record.ip_address);

    assert_eq!(engine.stack_count(), 3);
    assert_eq!(engine.counts("networking").ups, 1);
    assert!(teardowns.lock().unwrap().is_empty());
}

#[tokio::test]
async fn duplicate_vm_name_fails_and_skips_teardown() {
    let engine = MockEngine::new();
    let (orchestrator, teardowns) = orchestrator(&engine);

    orchestrator
        .create_virtual_machine(request("web1"))
        .await
        .unwrap();
    let err = orchestrator
        .create_virtual_machine(request("web1"))
        .await
        .unwrap_err();

    match &err {
        WorkflowError::DeployVirtualMachine(activity_err) => {
            assert_eq!(activity_err.step, ActivityStep::StackCreate);
            assert!(!activity_err.retryable);
        }
        other => panic!("unexpected workflow error: {:?}", other),
    }

    // The colliding call created nothing; the existing VM must survive.
    assert!(teardowns.lock().unwrap().is_empty());
    assert!(engine.has_stack("vmgrweb1"));
    assert_eq!(engine.counts("vmgrweb1").destroys, 0);
}

#[tokio::test]
async fn deploy_failure_tears_down_the_created_stack() {
    let engine = MockEngine::new();
    engine.fail_up_on("vmgrweb1", u32::MAX);
    let (orchestrator, teardowns) = orchestrator(&engine);

    let err = orchestrator
        .create_virtual_machine(request("web1"))
        .await
        .unwrap_err();

    match &err {
        WorkflowError::DeployVirtualMachine(activity_err) => {
            assert_eq!(activity_err.step, ActivityStep::Apply);
            assert!(activity_err.resources_created);
        }
        other => panic!("unexpected workflow error: {:?}", other),
    }

    // Cleanup ran for exactly the stack the deploy created.
    assert_eq!(*teardowns.lock().unwrap(), ["vmgrweb1"]);
    assert!(!engine.has_stack("vmgrweb1"));
    // The shared network is never torn down.
    assert!(engine.has_stack("networking"));
    assert_eq!(engine.counts("networking").destroys, 0);
}

#[tokio::test]
async fn network_failure_never_invokes_teardown() {
    let engine = MockEngine::new();
    engine.fail_up_on("networking", u32::MAX);
    let (orchestrator, teardowns) = orchestrator(&engine);

    let err = orchestrator
        .create_virtual_machine(request("web1"))
        .await
        .unwrap_err();

    match &err {
        WorkflowError::EnsureNetwork(activity_err) => {
            assert_eq!(activity_err.step, ActivityStep::Apply);
        }
        other => panic!("unexpected workflow error: {:?}", other),
    }

    assert!(teardowns.lock().unwrap().is_empty());
    assert!(!engine.has_stack("vmgrweb1"));
}

#[tokio::test]
async fn teardown_failure_does_not_mask_the_deploy_error() {
    let engine = MockEngine::new();
    engine.fail_up_on("vmgrweb1", u32::MAX);
    engine.fail_destroy_on("vmgrweb1", u32::MAX);
    let (orchestrator, teardowns) = orchestrator(&engine);

    let err = orchestrator
        .create_virtual_machine(request("web1"))
        .await
        .unwrap_err();

    // The caller sees the deploy failure, not the cleanup failure.
    match &err {
        WorkflowError::DeployVirtualMachine(activity_err) => {
            assert_eq!(activity_err.step, ActivityStep::Apply);
        }
        other => panic!("unexpected workflow error: {:?}", other),
    }
    // Teardown was attempted (and retried) for the right stack.
    let calls = teardowns.lock().unwrap();
    assert!(!calls.is_empty());
    assert!(calls.iter().all(|s| s == "vmgrweb1"));
}

#[tokio::test]
async fn cancelled_workflow_schedules_no_activities() {
    let engine = MockEngine::new();
    let (orchestrator, teardowns) = orchestrator(&engine);

    let token = CancellationToken::new();
    token.cancel();
    let err = orchestrator
        .create_virtual_machine_with_cancellation(request("web1"), token)
        .await
        .unwrap_err();

    assert!(matches!(err, WorkflowError::Cancelled));
    assert_eq!(engine.stack_count(), 0);
    assert!(teardowns.lock().unwrap().is_empty());
}
