//! In-process durable-runtime implementation.
//!
//! `LocalRuntime` schedules registered activities with the configured
//! retry policy, which is exactly the contract an external hosted runtime
//! provides. Workflow code talks to either through `WorkflowContext`, so
//! the orchestration logic never knows which one is underneath.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::warn;

use crate::activity::{
    ActivityContext, ActivityError, ActivityRegistry, ActivityStep, CancellationToken,
    RetryPolicy,
};

/// Executes registered activities with retry and backoff.
pub struct LocalRuntime {
    registry: ActivityRegistry,
    retry_policy: RetryPolicy,
}

impl LocalRuntime {
    pub fn new(registry: ActivityRegistry, retry_policy: RetryPolicy) -> Self {
        Self {
            registry,
            retry_policy,
        }
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }

    /// Invoke an activity by name, retrying per the policy.
    ///
    /// Returns the terminal error once attempts are exhausted or a
    /// non-retryable failure surfaces. Cancellation during backoff
    /// re-raises the last real failure so the caller still sees its
    /// `resources_created` marker.
    pub async fn execute_activity(
        &self,
        name: &str,
        input: serde_json::Value,
        cancellation: &CancellationToken,
    ) -> Result<serde_json::Value, ActivityError> {
        let handler = self.registry.get(name).ok_or_else(|| {
            ActivityError::non_retryable(
                ActivityStep::Registration,
                format!("no activity registered under '{}'", name),
            )
        })?;

        let mut attempt: u32 = 1;
        let mut last_error: Option<ActivityError> = None;
        loop {
            if cancellation.is_cancelled() {
                return Err(last_error.unwrap_or_else(|| {
                    ActivityError::non_retryable(ActivityStep::Cancelled, "workflow cancelled")
                }));
            }

            let ctx = ActivityContext::new(attempt, cancellation.clone());
            match handler.invoke(ctx, input.clone()).await {
                Ok(output) => return Ok(output),
                Err(err) if !err.retryable || attempt >= self.retry_policy.max_attempts => {
                    return Err(err);
                }
                Err(err) => {
                    warn!(
                        activity = name,
                        attempt,
                        error = %err,
                        "activity failed, backing off"
                    );
                    let delay = self.retry_policy.delay_for(attempt);
                    last_error = Some(err);
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    attempt += 1;
                }
            }
        }
    }
}

/// Handle a workflow execution uses to schedule activities.
#[derive(Clone)]
pub struct WorkflowContext {
    runtime: Arc<LocalRuntime>,
    cancellation: CancellationToken,
}

impl WorkflowContext {
    pub fn new(runtime: Arc<LocalRuntime>) -> Self {
        Self::with_cancellation(runtime, CancellationToken::new())
    }

    pub fn with_cancellation(runtime: Arc<LocalRuntime>, cancellation: CancellationToken) -> Self {
        Self {
            runtime,
            cancellation,
        }
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// Schedule an activity and wait for its terminal result.
    pub async fn activity<I, O>(&self, name: &str, input: &I) -> Result<O, ActivityError>
    where
        I: Serialize,
        O: DeserializeOwned,
    {
        self.call(name, input, &self.cancellation).await
    }

    /// Schedule an activity that ignores workflow cancellation. Used for
    /// cleanup that must run to completion even while the workflow is
    /// being cancelled.
    pub async fn detached_activity<I, O>(&self, name: &str, input: &I) -> Result<O, ActivityError>
    where
        I: Serialize,
        O: DeserializeOwned,
    {
        self.call(name, input, &CancellationToken::new()).await
    }

    async fn call<I, O>(
        &self,
        name: &str,
        input: &I,
        cancellation: &CancellationToken,
    ) -> Result<O, ActivityError>
    where
        I: Serialize,
        O: DeserializeOwned,
    {
        let input = serde_json::to_value(input)
            .map_err(|e| ActivityError::non_retryable(ActivityStep::Serialization, e.to_string()))?;
        let output = self
            .runtime
            .execute_activity(name, input, cancellation)
            .await?;
        serde_json::from_value(output)
            .map_err(|e| ActivityError::non_retryable(ActivityStep::Serialization, e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activity::ActivityHandler;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct CountingActivity {
        fail_first: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl ActivityHandler for CountingActivity {
        async fn invoke(
            &self,
            _ctx: ActivityContext,
            _input: serde_json::Value,
        ) -> Result<serde_json::Value, ActivityError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.fail_first {
                Err(ActivityError::new(ActivityStep::Apply, "transient"))
            } else {
                Ok(serde_json::json!("ok"))
            }
        }
    }

    fn runtime_with(name: &str, handler: Arc<dyn ActivityHandler>, attempts: u32) -> LocalRuntime {
        let mut registry = ActivityRegistry::new();
        registry.register(name, handler);
        LocalRuntime::new(registry, RetryPolicy::immediate(attempts))
    }

    #[tokio::test]
    async fn retries_until_success() {
        let handler = Arc::new(CountingActivity {
            fail_first: 2,
            calls: AtomicU32::new(0),
        });
        let runtime = runtime_with("flaky", handler.clone(), 5);

        let out = runtime
            .execute_activity("flaky", serde_json::json!(null), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(out, serde_json::json!("ok"));
        assert_eq!(handler.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhausted_attempts_return_last_error() {
        let handler = Arc::new(CountingActivity {
            fail_first: u32::MAX,
            calls: AtomicU32::new(0),
        });
        let runtime = runtime_with("flaky", handler.clone(), 3);

        let err = runtime
            .execute_activity("flaky", serde_json::json!(null), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.step, ActivityStep::Apply);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn unregistered_activity_fails_fast() {
        let runtime = LocalRuntime::new(ActivityRegistry::new(), RetryPolicy::default());
        let err = runtime
            .execute_activity("missing", serde_json::json!(null), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.step, ActivityStep::Registration);
        assert!(!err.retryable);
    }

    #[tokio::test]
    async fn cancellation_stops_before_first_attempt() {
        let handler = Arc::new(CountingActivity {
            fail_first: 0,
            calls: AtomicU32::new(0),
        });
        let runtime = runtime_with("noop", handler.clone(), 3);

        let token = CancellationToken::new();
        token.cancel();
        let err = runtime
            .execute_activity("noop", serde_json::json!(null), &token)
            .await
            .unwrap_err();
        assert_eq!(err.step, ActivityStep::Cancelled);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 0);
    }
}
