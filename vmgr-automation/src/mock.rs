//! In-memory provisioning engine used by tests.
//!
//! Implements the automation traits against a mutex-guarded stack table,
//! which makes the table the same serialization point a real engine's
//! identity resolution provides: concurrent create-or-select races resolve
//! to exactly one stack. Applies assign deterministic fake IDs and
//! addresses, and individual operations can be made to fail for specific
//! stacks to exercise the cleanup paths.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::debug;
use uuid::Uuid;

use vmgr_core::{secrets, StackIdentity};

use crate::program::{Resource, ResourceGraph, Value};
use crate::{
    AutomationClient, AutomationError, ConfigValue, OutputMap, Result, Stack, UpResult, Workspace,
};

/// Bookkeeping metadata for one stack.
#[derive(Debug, Clone)]
pub struct StackInfo {
    pub identity: StackIdentity,
    pub has_outputs: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Per-stack operation counters, keyed by short stack name.
#[derive(Debug, Clone, Default)]
pub struct OperationCounts {
    pub creates: u32,
    pub selects: u32,
    pub config_sets: u32,
    pub ups: u32,
    pub destroys: u32,
    pub removes: u32,
}

#[derive(Debug, Clone)]
struct StackRecord {
    identity: StackIdentity,
    program: ResourceGraph,
    config: HashMap<String, ConfigValue>,
    outputs: OutputMap,
    /// resource name -> attribute -> resolved value
    resolved: HashMap<String, HashMap<String, String>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct Faults {
    /// Remaining `up` failures per short stack name; `u32::MAX` = always.
    fail_up: HashMap<String, u32>,
    fail_destroy: HashMap<String, u32>,
    fail_plugin_install: bool,
    fail_whoami: bool,
}

#[derive(Debug, Default)]
struct EngineState {
    stacks: HashMap<String, StackRecord>,
    counts: HashMap<String, OperationCounts>,
    plugins: Vec<(String, String)>,
    next_ip_octet: u8,
    faults: Faults,
}

/// The engine handle. Cheap to clone; all clones share one state table.
#[derive(Clone)]
pub struct MockEngine {
    user: String,
    state: Arc<Mutex<EngineState>>,
}

impl MockEngine {
    pub fn new() -> Self {
        Self {
            user: "dev".to_string(),
            state: Arc::new(Mutex::new(EngineState::default())),
        }
    }

    pub fn with_user(user: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            ..Self::new()
        }
    }

    fn lock(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().expect("mock engine state poisoned")
    }

    /// Fail the next `times` applies for `stack` (u32::MAX for always).
    pub fn fail_up_on(&self, stack: &str, times: u32) {
        self.lock().faults.fail_up.insert(stack.to_string(), times);
    }

    pub fn fail_destroy_on(&self, stack: &str, times: u32) {
        self.lock()
            .faults
            .fail_destroy
            .insert(stack.to_string(), times);
    }

    pub fn fail_plugin_installs(&self, fail: bool) {
        self.lock().faults.fail_plugin_install = fail;
    }

    pub fn fail_whoami(&self, fail: bool) {
        self.lock().faults.fail_whoami = fail;
    }

    pub fn stack_count(&self) -> usize {
        self.lock().stacks.len()
    }

    pub fn has_stack(&self, stack: &str) -> bool {
        self.lock().stacks.values().any(|r| r.identity.stack == stack)
    }

    pub fn counts(&self, stack: &str) -> OperationCounts {
        self.lock().counts.get(stack).cloned().unwrap_or_default()
    }

    pub fn installed_plugins(&self) -> Vec<(String, String)> {
        self.lock().plugins.clone()
    }

    /// Config values currently set on a stack, keyed by config key.
    pub fn stack_config(&self, stack: &str) -> HashMap<String, ConfigValue> {
        self.lock()
            .stacks
            .values()
            .find(|r| r.identity.stack == stack)
            .map(|r| r.config.clone())
            .unwrap_or_default()
    }

    /// Bookkeeping metadata for a stack, if it exists.
    pub fn stack_info(&self, stack: &str) -> Option<StackInfo> {
        self.lock()
            .stacks
            .values()
            .find(|r| r.identity.stack == stack)
            .map(|r| StackInfo {
                identity: r.identity.clone(),
                has_outputs: !r.outputs.is_empty(),
                created_at: r.created_at,
                updated_at: r.updated_at,
            })
    }

    /// Seed a stack that already exists with the given outputs, as if a
    /// previous process had applied it.
    pub fn seed_stack(&self, project: &str, stack: &str, outputs: OutputMap) {
        let identity = StackIdentity::new(self.user.clone(), project, stack);
        let now = Utc::now();
        self.lock().stacks.insert(
            identity.fully_qualified(),
            StackRecord {
                identity,
                program: ResourceGraph::default(),
                config: HashMap::new(),
                outputs,
                resolved: HashMap::new(),
                created_at: now,
                updated_at: now,
            },
        );
    }
}

impl EngineState {
    fn counts_mut(&mut self, stack: &str) -> &mut OperationCounts {
        self.counts.entry(stack.to_string()).or_default()
    }

    fn consume_fault(faults: &mut HashMap<String, u32>, stack: &str) -> bool {
        match faults.get_mut(stack) {
            Some(0) => false,
            Some(n) => {
                if *n != u32::MAX {
                    *n -= 1;
                }
                true
            }
            None => false,
        }
    }
}

fn short_id(prefix: &str) -> String {
    let id = Uuid::new_v4().simple().to_string();
    format!("{}-{}", prefix, &id[..8])
}

#[async_trait]
impl AutomationClient for MockEngine {
    async fn new_workspace(
        &self,
        program: ResourceGraph,
        project: &str,
    ) -> Result<Box<dyn Workspace>> {
        Ok(Box::new(MockWorkspace {
            engine: self.clone(),
            program,
            project: project.to_string(),
        }))
    }
}

pub struct MockWorkspace {
    engine: MockEngine,
    program: ResourceGraph,
    project: String,
}

#[async_trait]
impl Workspace for MockWorkspace {
    async fn install_plugin(&self, name: &str, version: &str) -> Result<()> {
        let mut state = self.engine.lock();
        if state.faults.fail_plugin_install {
            return Err(AutomationError::PluginInstall {
                name: name.to_string(),
                version: version.to_string(),
                reason: "injected plugin failure".to_string(),
            });
        }
        state.plugins.push((name.to_string(), version.to_string()));
        Ok(())
    }

    async fn whoami(&self) -> Result<String> {
        if self.engine.lock().faults.fail_whoami {
            return Err(AutomationError::Identity(
                "injected identity failure".to_string(),
            ));
        }
        Ok(self.engine.user.clone())
    }

    async fn create_stack(&self, identity: &StackIdentity) -> Result<Box<dyn Stack>> {
        if identity.project != self.project {
            return Err(AutomationError::Engine(format!(
                "workspace is bound to project '{}', not '{}'",
                self.project, identity.project
            )));
        }
        let fq = identity.fully_qualified();
        let mut state = self.engine.lock();
        if state.stacks.contains_key(&fq) {
            return Err(AutomationError::StackAlreadyExists(fq));
        }
        let now = Utc::now();
        state.stacks.insert(
            fq.clone(),
            StackRecord {
                identity: identity.clone(),
                program: self.program.clone(),
                config: HashMap::new(),
                outputs: OutputMap::new(),
                resolved: HashMap::new(),
                created_at: now,
                updated_at: now,
            },
        );
        state.counts_mut(&identity.stack).creates += 1;
        Ok(Box::new(MockStack {
            engine: self.engine.clone(),
            fq,
            stack: identity.stack.clone(),
        }))
    }

    async fn select_stack(&self, identity: &StackIdentity) -> Result<Box<dyn Stack>> {
        let fq = identity.fully_qualified();
        let mut state = self.engine.lock();
        if !state.stacks.contains_key(&fq) {
            return Err(AutomationError::StackNotFound(fq));
        }
        // Selecting re-binds the workspace's program to the stack, the same
        // way a real engine runs whatever program the workspace holds.
        if !self.program.resources.is_empty() {
            if let Some(record) = state.stacks.get_mut(&fq) {
                if record.program.resources.is_empty() {
                    record.program = self.program.clone();
                }
            }
        }
        state.counts_mut(&identity.stack).selects += 1;
        Ok(Box::new(MockStack {
            engine: self.engine.clone(),
            fq,
            stack: identity.stack.clone(),
        }))
    }

    async fn remove_stack(&self, identity: &StackIdentity) -> Result<()> {
        let fq = identity.fully_qualified();
        let mut state = self.engine.lock();
        if state.stacks.remove(&fq).is_none() {
            return Err(AutomationError::StackNotFound(fq));
        }
        state.counts_mut(&identity.stack).removes += 1;
        Ok(())
    }
}

pub struct MockStack {
    engine: MockEngine,
    fq: String,
    stack: String,
}

impl MockStack {
    fn apply(&self, state: &mut EngineState) -> Result<OutputMap> {
        let program = {
            let record = state
                .stacks
                .get(&self.fq)
                .ok_or_else(|| AutomationError::StackNotFound(self.fq.clone()))?;

            // An apply over an already-converged stack is a no-op that
            // returns the existing outputs, so concurrent callers all see
            // one result.
            if !record.outputs.is_empty() {
                return Ok(record.outputs.clone());
            }
            record.program.clone()
        };

        let mut resolved: HashMap<String, HashMap<String, String>> = HashMap::new();
        for resource in &program.resources {
            let mut attrs = HashMap::new();
            match resource {
                Resource::RandomPassword {
                    length, special, ..
                } => {
                    attrs.insert(
                        "result".to_string(),
                        secrets::generate_password(*length, *special),
                    );
                }
                Resource::Network { .. } => {
                    attrs.insert("id".to_string(), short_id("net"));
                }
                Resource::Subnet { .. } => {
                    attrs.insert("id".to_string(), short_id("sub"));
                }
                Resource::Port { .. } => {
                    attrs.insert("id".to_string(), short_id("port"));
                }
                Resource::FloatingIp { .. } => {
                    let octet = state.next_ip_octet.max(10);
                    state.next_ip_octet = octet + 1;
                    attrs.insert("address".to_string(), format!("203.0.113.{}", octet));
                    attrs.insert("fixed_ip".to_string(), format!("192.168.1.{}", octet));
                }
                Resource::ComputeInstance {
                    port, fixed_ip, admin_password, ..
                } => {
                    // Dangling references are a program bug the engine
                    // rejects at apply time.
                    for value in [port, fixed_ip, admin_password] {
                        resolve_value(&resolved, value).ok_or_else(|| {
                            AutomationError::Apply {
                                stack: self.stack.clone(),
                                reason: format!("unresolved reference {:?}", value),
                            }
                        })?;
                    }
                    attrs.insert("id".to_string(), short_id("server"));
                }
            }
            resolved.insert(resource.name().to_string(), attrs);
        }

        let record = state
            .stacks
            .get_mut(&self.fq)
            .ok_or_else(|| AutomationError::StackNotFound(self.fq.clone()))?;
        let mut outputs = OutputMap::new();
        for export in &program.exports {
            let value =
                resolve_value(&resolved, &export.value).ok_or_else(|| AutomationError::Apply {
                    stack: self.stack.clone(),
                    reason: format!("export '{}' references nothing", export.name),
                })?;
            outputs.insert(export.name.clone(), serde_json::Value::String(value));
        }
        record.resolved = resolved;
        record.outputs = outputs.clone();
        record.updated_at = Utc::now();
        Ok(outputs)
    }
}

fn resolve_value(
    resolved: &HashMap<String, HashMap<String, String>>,
    value: &Value,
) -> Option<String> {
    match value {
        Value::Literal(s) => Some(s.clone()),
        Value::Ref {
            resource,
            attribute,
        } => resolved.get(resource)?.get(attribute).cloned(),
    }
}

#[async_trait]
impl Stack for MockStack {
    fn name(&self) -> &str {
        &self.fq
    }

    async fn set_config(&self, key: &str, value: ConfigValue) -> Result<()> {
        let mut state = self.engine.lock();
        let record = state
            .stacks
            .get_mut(&self.fq)
            .ok_or_else(|| AutomationError::StackNotFound(self.fq.clone()))?;
        record.config.insert(key.to_string(), value);
        state.counts_mut(&self.stack).config_sets += 1;
        Ok(())
    }

    async fn up(&self) -> Result<UpResult> {
        let mut state = self.engine.lock();
        state.counts_mut(&self.stack).ups += 1;
        if EngineState::consume_fault(&mut state.faults.fail_up, &self.stack) {
            return Err(AutomationError::Apply {
                stack: self.stack.clone(),
                reason: "injected apply failure".to_string(),
            });
        }
        let outputs = self.apply(&mut state)?;
        debug!(stack = %self.fq, "mock apply converged");
        Ok(UpResult { outputs })
    }

    async fn outputs(&self) -> Result<OutputMap> {
        let state = self.engine.lock();
        let record = state
            .stacks
            .get(&self.fq)
            .ok_or_else(|| AutomationError::StackNotFound(self.fq.clone()))?;
        Ok(record.outputs.clone())
    }

    async fn destroy(&self) -> Result<()> {
        let mut state = self.engine.lock();
        state.counts_mut(&self.stack).destroys += 1;
        if EngineState::consume_fault(&mut state.faults.fail_destroy, &self.stack) {
            return Err(AutomationError::Destroy {
                stack: self.stack.clone(),
                reason: "injected destroy failure".to_string(),
            });
        }
        let record = state
            .stacks
            .get_mut(&self.fq)
            .ok_or_else(|| AutomationError::StackNotFound(self.fq.clone()))?;
        record.outputs.clear();
        record.resolved.clear();
        record.updated_at = Utc::now();
        debug!(stack = %self.fq, "mock stack destroyed");
        Ok(())
    }
}
