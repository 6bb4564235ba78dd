//! The durable-runtime boundary for activities.
//!
//! An activity is a retryable unit of work invoked by the orchestration
//! workflow. The hosting runtime delivers plain serializable arguments,
//! supplies a per-invocation context (attempt counter, cancellation), and
//! owns retry scheduling. Everything crossing this boundary is JSON, so a
//! workflow's recorded history can replay it after a crash.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Cooperative cancellation flag shared between a workflow execution and
/// the runtime hosting it.
#[derive(Clone)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-invocation handle supplied by the runtime to every activity.
pub struct ActivityContext {
    /// 1-based attempt counter maintained by the runtime.
    pub attempt: u32,
    pub cancellation: CancellationToken,
}

impl ActivityContext {
    pub fn new(attempt: u32, cancellation: CancellationToken) -> Self {
        Self {
            attempt,
            cancellation,
        }
    }
}

/// The step an activity was executing when it failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityStep {
    Validation,
    Workspace,
    PluginInstall,
    Identity,
    StackCreate,
    StackSelect,
    Config,
    Apply,
    Outputs,
    Destroy,
    Remove,
    Serialization,
    Registration,
    Cancelled,
}

impl fmt::Display for ActivityStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ActivityStep::Validation => "validation",
            ActivityStep::Workspace => "workspace setup",
            ActivityStep::PluginInstall => "plugin install",
            ActivityStep::Identity => "identity resolution",
            ActivityStep::StackCreate => "stack create",
            ActivityStep::StackSelect => "stack select",
            ActivityStep::Config => "stack config",
            ActivityStep::Apply => "apply",
            ActivityStep::Outputs => "output read",
            ActivityStep::Destroy => "destroy",
            ActivityStep::Remove => "stack removal",
            ActivityStep::Serialization => "serialization",
            ActivityStep::Registration => "activity registration",
            ActivityStep::Cancelled => "cancellation",
        };
        f.write_str(s)
    }
}

/// Error returned across the activity boundary.
///
/// Serializable so the runtime can record it in workflow history. Always
/// identifies the failing step, never a bare engine error.
#[derive(Error, Debug, Clone, Serialize, Deserialize)]
#[error("{step} failed: {message}")]
pub struct ActivityError {
    pub step: ActivityStep,
    pub message: String,
    /// False turns off the runtime's retry loop for this failure.
    pub retryable: bool,
    /// True when the failing call had already created its stack, meaning
    /// cloud resources may exist and cleanup applies.
    pub resources_created: bool,
}

impl ActivityError {
    pub fn new(step: ActivityStep, message: impl Into<String>) -> Self {
        Self {
            step,
            message: message.into(),
            retryable: true,
            resources_created: false,
        }
    }

    pub fn non_retryable(step: ActivityStep, message: impl Into<String>) -> Self {
        Self {
            retryable: false,
            ..Self::new(step, message)
        }
    }

    /// Wrap an underlying error, tagging it with the failing step.
    pub fn wrap(step: ActivityStep, source: impl fmt::Display) -> Self {
        Self::new(step, source.to_string())
    }

    pub fn with_resources_created(mut self) -> Self {
        self.resources_created = true;
        self
    }
}

/// Decode an activity input delivered by the runtime.
pub fn decode_input<T: DeserializeOwned>(input: serde_json::Value) -> Result<T, ActivityError> {
    serde_json::from_value(input)
        .map_err(|e| ActivityError::non_retryable(ActivityStep::Serialization, e.to_string()))
}

/// Encode an activity result for the runtime to record.
pub fn encode_output<T: Serialize>(output: &T) -> Result<serde_json::Value, ActivityError> {
    serde_json::to_value(output)
        .map_err(|e| ActivityError::non_retryable(ActivityStep::Serialization, e.to_string()))
}

/// A registered activity implementation.
#[async_trait]
pub trait ActivityHandler: Send + Sync {
    async fn invoke(
        &self,
        ctx: ActivityContext,
        input: serde_json::Value,
    ) -> Result<serde_json::Value, ActivityError>;
}

/// Name-keyed table of activity handlers, handed to the hosting runtime.
#[derive(Default)]
pub struct ActivityRegistry {
    handlers: HashMap<String, Arc<dyn ActivityHandler>>,
}

impl ActivityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: &str, handler: Arc<dyn ActivityHandler>) {
        self.handlers.insert(name.to_string(), handler);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ActivityHandler>> {
        self.handlers.get(name).cloned()
    }

    pub fn names(&self) -> Vec<&str> {
        self.handlers.keys().map(|s| s.as_str()).collect()
    }
}

/// Exponential backoff with a bounded number of attempts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub initial_interval: Duration,
    pub backoff_coefficient: f64,
    pub max_interval: Duration,
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_secs(1),
            backoff_coefficient: 2.0,
            max_interval: Duration::from_secs(60),
            max_attempts: 5,
        }
    }
}

impl RetryPolicy {
    /// Policy with no backoff delay, for tests and local experimentation.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            initial_interval: Duration::ZERO,
            backoff_coefficient: 1.0,
            max_interval: Duration::ZERO,
            max_attempts,
        }
    }

    /// Delay to wait after the given (1-based) failed attempt.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = self.backoff_coefficient.powi(attempt.saturating_sub(1) as i32);
        let delay = self.initial_interval.mul_f64(factor.max(0.0));
        delay.min(self.max_interval)
    }
}
