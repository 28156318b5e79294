//! Mock CloudSqlClient for unit testing
//!
//! This module provides an in-memory implementation of CloudSqlClientTrait
//! that behaves like the real API closely enough to drive the reconciler
//! through a whole instance lifecycle:
//!
//! - mutations return operations that finish after a configurable number of
//!   `get_operation` polls, and only take effect once they finish
//! - created instances report `PENDING_CREATE` until their operation is done
//! - addresses are assigned from the networking settings
//! - every call is counted and failures can be injected per method

mod helpers;

use crate::cloudsql_trait::CloudSqlClientTrait;
use crate::error::CloudSqlError;
use crate::models::{DatabaseInstance, InstanceState, Operation, OperationError, OperationErrors, OperationStatus};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

/// What a finished operation does to the mock state
#[derive(Debug, Clone)]
enum Effect {
    Create(String),
    Update(String, DatabaseInstance),
    Delete(String),
    SetPassword { instance: String, user: String, password: String },
}

#[derive(Debug)]
struct PendingOperation {
    operation: Operation,
    remaining_polls: u32,
    effect: Option<Effect>,
    fails: bool,
}

#[derive(Debug, Default)]
pub(crate) struct MockState {
    pub(crate) instances: HashMap<String, DatabaseInstance>,
    operations: HashMap<String, PendingOperation>,
    passwords: HashMap<(String, String), String>,
    polls_until_done: u32,
    next_id: u64,
    calls: HashMap<&'static str, usize>,
    failures: HashMap<&'static str, VecDeque<CloudSqlError>>,
    fail_next_operation: bool,
}

/// Mock CloudSqlClient for testing
///
/// Clones share the same in-memory state.
#[derive(Debug, Clone)]
pub struct MockCloudSqlClient {
    project_id: String,
    pub(crate) state: Arc<Mutex<MockState>>,
}

impl MockCloudSqlClient {
    /// Create a new mock client whose operations finish on the first poll
    pub fn new(project_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            state: Arc::new(Mutex::new(MockState {
                polls_until_done: 1,
                next_id: 1,
                ..Default::default()
            })),
        }
    }

    /// Operations finish after `polls` calls to `get_operation` (0 = already done when returned)
    #[must_use]
    pub fn with_operation_polls(self, polls: u32) -> Self {
        self.state.lock().unwrap().polls_until_done = polls;
        self
    }

    /// Add an instance to the mock store (for test setup); defaults its state to `RUNNABLE`
    pub fn add_instance(&self, mut instance: DatabaseInstance) {
        instance.state.get_or_insert(InstanceState::Runnable);
        let mut state = self.state.lock().unwrap();
        let id = state.next_id();
        helpers::assign_ip_addresses(&mut instance, id);
        state.instances.insert(instance.name.clone(), instance);
    }

    /// Current provider-side view of an instance
    pub fn instance(&self, name: &str) -> Option<DatabaseInstance> {
        self.state.lock().unwrap().instances.get(name).cloned()
    }

    /// Force the serving state of an instance
    pub fn set_instance_state(&self, name: &str, instance_state: InstanceState) {
        if let Some(instance) = self.state.lock().unwrap().instances.get_mut(name) {
            instance.state = Some(instance_state);
        }
    }

    /// Grow the data disk the way storage auto-resize does
    pub fn set_disk_size(&self, name: &str, size_gb: i64) {
        if let Some(instance) = self.state.lock().unwrap().instances.get_mut(name) {
            instance.settings.get_or_insert_with(Default::default).data_disk_size_gb = Some(size_gb);
        }
    }

    /// Password currently set for `user` on `instance`
    pub fn password(&self, instance: &str, user: &str) -> Option<String> {
        self.state
            .lock()
            .unwrap()
            .passwords
            .get(&(instance.to_string(), user.to_string()))
            .cloned()
    }

    /// Number of calls made to `method` (e.g. `"create_instance"`)
    pub fn calls(&self, method: &str) -> usize {
        self.state.lock().unwrap().calls.get(method).copied().unwrap_or(0)
    }

    /// Make the next call to `method` fail with `error`
    pub fn fail_next(&self, method: &'static str, error: CloudSqlError) {
        self.state
            .lock()
            .unwrap()
            .failures
            .entry(method)
            .or_default()
            .push_back(error);
    }

    /// Make the next operation finish with an error and without effect
    pub fn fail_next_operation(&self) {
        self.state.lock().unwrap().fail_next_operation = true;
    }

    /// Number of operations that have not finished yet
    pub fn pending_operations(&self) -> usize {
        self.state
            .lock()
            .unwrap()
            .operations
            .values()
            .filter(|op| !op.operation.is_done())
            .count()
    }

    /// Records the call and returns an injected failure, if any
    fn enter(&self, method: &'static str) -> Result<std::sync::MutexGuard<'_, MockState>, CloudSqlError> {
        let mut state = self.state.lock().unwrap();
        *state.calls.entry(method).or_insert(0) += 1;
        if let Some(error) = state.failures.get_mut(method).and_then(VecDeque::pop_front) {
            return Err(error);
        }
        Ok(state)
    }
}

impl MockState {
    fn next_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Registers an operation; finishes it right away when no polls are required
    fn start_operation(&mut self, operation_type: &str, target: &str, effect: Effect) -> Operation {
        let id = self.next_id();
        let fails = std::mem::take(&mut self.fail_next_operation);
        let operation = Operation {
            name: format!("operation-{id}"),
            operation_type: Some(operation_type.to_string()),
            status: OperationStatus::Pending,
            target_id: Some(target.to_string()),
            error: None,
        };
        let mut pending = PendingOperation {
            operation,
            remaining_polls: self.polls_until_done,
            effect: Some(effect),
            fails,
        };
        if pending.remaining_polls == 0 {
            self.finish(&mut pending);
        }
        let operation = pending.operation.clone();
        self.operations.insert(operation.name.clone(), pending);
        operation
    }

    fn finish(&mut self, pending: &mut PendingOperation) {
        pending.operation.status = OperationStatus::Done;
        let Some(effect) = pending.effect.take() else {
            return;
        };
        if pending.fails {
            pending.operation.error = Some(OperationErrors {
                errors: vec![OperationError {
                    code: "INTERNAL_ERROR".to_string(),
                    message: Some("injected operation failure".to_string()),
                }],
            });
            // A failed creation leaves nothing behind
            if let Effect::Create(name) = effect {
                self.instances.remove(&name);
            }
            return;
        }
        self.apply(effect);
    }

    fn apply(&mut self, effect: Effect) {
        match effect {
            Effect::Create(name) => {
                let id = self.next_id();
                if let Some(instance) = self.instances.get_mut(&name) {
                    instance.state = Some(InstanceState::Runnable);
                    helpers::assign_ip_addresses(instance, id);
                }
            }
            Effect::Update(name, patch) => {
                let id = self.next_id();
                if let Some(instance) = self.instances.get_mut(&name) {
                    helpers::merge_instance(instance, patch);
                    helpers::assign_ip_addresses(instance, id);
                }
            }
            Effect::Delete(name) => {
                self.instances.remove(&name);
                self.passwords.retain(|(instance, _), _| *instance != name);
            }
            Effect::SetPassword { instance, user, password } => {
                self.passwords.insert((instance, user), password);
            }
        }
    }

    fn has_running_operation(&self, target: &str) -> bool {
        self.operations
            .values()
            .any(|op| !op.operation.is_done() && op.operation.target_id.as_deref() == Some(target))
    }
}

#[async_trait::async_trait]
impl CloudSqlClientTrait for MockCloudSqlClient {
    fn project_id(&self) -> &str {
        &self.project_id
    }

    async fn get_instance(&self, name: &str) -> Result<Option<DatabaseInstance>, CloudSqlError> {
        let state = self.enter("get_instance")?;
        Ok(state.instances.get(name).cloned())
    }

    async fn create_instance(&self, instance: &DatabaseInstance) -> Result<Operation, CloudSqlError> {
        let mut state = self.enter("create_instance")?;
        if state.instances.contains_key(&instance.name) {
            return Err(CloudSqlError::Conflict(format!(
                "instance {} already exists",
                instance.name
            )));
        }

        let mut created = instance.clone();
        created.state = Some(InstanceState::PendingCreate);
        created.ip_addresses.clear();
        helpers::pick_zone(&mut created);
        state.instances.insert(created.name.clone(), created);

        Ok(state.start_operation("CREATE", &instance.name, Effect::Create(instance.name.clone())))
    }

    async fn update_instance(&self, name: &str, instance: &DatabaseInstance) -> Result<Operation, CloudSqlError> {
        let mut state = self.enter("update_instance")?;
        if !state.instances.contains_key(name) {
            return Err(CloudSqlError::NotFound(format!("instance {name} not found")));
        }
        if state.has_running_operation(name) {
            return Err(CloudSqlError::Conflict(format!("operation in progress for instance {name}")));
        }
        let disk_size = |instance: &DatabaseInstance| instance.settings.as_ref().and_then(|s| s.data_disk_size_gb);
        if let (Some(requested), Some(current)) = (disk_size(instance), state.instances.get(name).and_then(disk_size))
            && requested < current
        {
            return Err(CloudSqlError::InvalidRequest(format!(
                "disk size of instance {name} cannot be decreased from {current} GB to {requested} GB"
            )));
        }
        Ok(state.start_operation("UPDATE", name, Effect::Update(name.to_string(), instance.clone())))
    }

    async fn delete_instance(&self, name: &str) -> Result<Operation, CloudSqlError> {
        let mut state = self.enter("delete_instance")?;
        if !state.instances.contains_key(name) {
            return Err(CloudSqlError::NotFound(format!("instance {name} not found")));
        }
        if state.has_running_operation(name) {
            return Err(CloudSqlError::Conflict(format!("operation in progress for instance {name}")));
        }
        if let Some(instance) = state.instances.get_mut(name) {
            instance.state = Some(InstanceState::PendingDelete);
        }
        Ok(state.start_operation("DELETE", name, Effect::Delete(name.to_string())))
    }

    async fn get_operation(&self, name: &str) -> Result<Operation, CloudSqlError> {
        let mut state = self.enter("get_operation")?;
        let Some(mut pending) = state.operations.remove(name) else {
            return Err(CloudSqlError::NotFound(format!("operation {name} not found")));
        };
        if !pending.operation.is_done() {
            pending.remaining_polls = pending.remaining_polls.saturating_sub(1);
            if pending.remaining_polls == 0 {
                state.finish(&mut pending);
            } else {
                pending.operation.status = OperationStatus::Running;
            }
        }
        let operation = pending.operation.clone();
        state.operations.insert(name.to_string(), pending);
        Ok(operation)
    }

    async fn set_user_password(&self, instance: &str, user: &str, password: &str) -> Result<Operation, CloudSqlError> {
        let mut state = self.enter("set_user_password")?;
        if !state.instances.contains_key(instance) {
            return Err(CloudSqlError::NotFound(format!("instance {instance} not found")));
        }
        Ok(state.start_operation(
            "UPDATE_USER",
            instance,
            Effect::SetPassword {
                instance: instance.to_string(),
                user: user.to_string(),
                password: password.to_string(),
            },
        ))
    }
}
