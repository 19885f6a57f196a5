//! In-memory reference adapters for the engine's ports.
//!
//! Deterministic and test-friendly. Production deployments should put a
//! transactional store behind the repository traits.

use crate::ports::*;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use workflow_types::*;

fn read<'a, T>(lock: &'a RwLock<T>, what: &str) -> WorkflowResult<RwLockReadGuard<'a, T>> {
    lock.read()
        .map_err(|_| WorkflowError::Storage(format!("{} lock poisoned", what)))
}

fn write<'a, T>(lock: &'a RwLock<T>, what: &str) -> WorkflowResult<RwLockWriteGuard<'a, T>> {
    lock.write()
        .map_err(|_| WorkflowError::Storage(format!("{} lock poisoned", what)))
}

/// Shared optimistic check: version 0 inserts, anything else must match
fn check_version(entity: String, saving: u64, stored: Option<u64>) -> WorkflowResult<()> {
    let actual = stored.unwrap_or(0);
    if saving != actual {
        return Err(WorkflowError::ConcurrentModification {
            entity,
            expected: saving,
            actual,
        });
    }
    Ok(())
}

// ── Definitions ──────────────────────────────────────────────────────

#[derive(Default)]
struct DefinitionStore {
    definitions: HashMap<WorkflowDefinitionId, WorkflowDefinition>,
    /// Name → ids in registration order (for versioning)
    by_name: HashMap<String, Vec<WorkflowDefinitionId>>,
}

/// In-memory definition repository with a by-name version index
#[derive(Default)]
pub struct InMemoryDefinitionRepository {
    store: RwLock<DefinitionStore>,
}

impl InMemoryDefinitionRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Latest registered version of a definition by name
    pub fn latest_by_name(&self, name: &str) -> WorkflowResult<Option<WorkflowDefinition>> {
        let store = read(&self.store, "definitions")?;
        Ok(store
            .by_name
            .get(name)
            .and_then(|ids| ids.last())
            .and_then(|id| store.definitions.get(id))
            .cloned())
    }

    /// Every registered version of a definition by name, oldest first
    pub fn versions_of(&self, name: &str) -> WorkflowResult<Vec<WorkflowDefinition>> {
        let store = read(&self.store, "definitions")?;
        Ok(store
            .by_name
            .get(name)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| store.definitions.get(id))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    pub fn count(&self) -> WorkflowResult<usize> {
        Ok(read(&self.store, "definitions")?.definitions.len())
    }
}

impl DefinitionRepository for InMemoryDefinitionRepository {
    fn find(&self, id: &WorkflowDefinitionId) -> WorkflowResult<Option<WorkflowDefinition>> {
        Ok(read(&self.store, "definitions")?.definitions.get(id).cloned())
    }

    fn register(&self, definition: WorkflowDefinition) -> WorkflowResult<WorkflowDefinitionId> {
        definition.validate()?;

        let mut store = write(&self.store, "definitions")?;
        let id = definition.id.clone();
        if store.definitions.contains_key(&id) {
            return Err(WorkflowError::ValidationError(format!(
                "Definition {} is already registered; register a new version instead",
                id
            )));
        }

        store
            .by_name
            .entry(definition.name.clone())
            .or_default()
            .push(id.clone());
        tracing::info!(
            definition_id = %id,
            name = %definition.name,
            version = definition.version,
            "Workflow definition registered"
        );
        store.definitions.insert(id.clone(), definition);
        Ok(id)
    }

    fn list(&self) -> WorkflowResult<Vec<WorkflowDefinition>> {
        let store = read(&self.store, "definitions")?;
        let mut all: Vec<WorkflowDefinition> = store.definitions.values().cloned().collect();
        all.sort_by(|a, b| a.name.cmp(&b.name).then(a.version.cmp(&b.version)));
        Ok(all)
    }
}

// ── Instances ────────────────────────────────────────────────────────

/// In-memory instance repository
#[derive(Default)]
pub struct InMemoryInstanceRepository {
    instances: RwLock<HashMap<WorkflowInstanceId, WorkflowInstance>>,
}

impl InMemoryInstanceRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self) -> WorkflowResult<usize> {
        Ok(read(&self.instances, "instances")?.len())
    }
}

impl InstanceRepository for InMemoryInstanceRepository {
    fn find(&self, id: &WorkflowInstanceId) -> WorkflowResult<Option<WorkflowInstance>> {
        Ok(read(&self.instances, "instances")?.get(id).cloned())
    }

    fn find_active_by_subject(
        &self,
        subject_type: &str,
        subject_id: &str,
    ) -> WorkflowResult<Option<WorkflowInstance>> {
        Ok(read(&self.instances, "instances")?
            .values()
            .find(|i| {
                !i.is_terminal()
                    && i.subject.subject_type == subject_type
                    && i.subject.subject_id == subject_id
            })
            .cloned())
    }

    fn save(&self, instance: &mut WorkflowInstance) -> WorkflowResult<()> {
        let mut instances = write(&self.instances, "instances")?;
        check_version(
            format!("instance {}", instance.id),
            instance.lock_version,
            instances.get(&instance.id).map(|i| i.lock_version),
        )?;

        // one live instance per subject, checked under the same lock
        if !instance.is_terminal() {
            let clash = instances.values().any(|other| {
                other.id != instance.id
                    && !other.is_terminal()
                    && other.subject == instance.subject
            });
            if clash {
                return Err(WorkflowError::DuplicateInstance {
                    subject_type: instance.subject.subject_type.clone(),
                    subject_id: instance.subject.subject_id.clone(),
                });
            }
        }

        instance.lock_version += 1;
        instances.insert(instance.id.clone(), instance.clone());
        Ok(())
    }
}

// ── Tasks ────────────────────────────────────────────────────────────

/// In-memory task repository
#[derive(Default)]
pub struct InMemoryTaskRepository {
    tasks: RwLock<HashMap<TaskId, Task>>,
}

impl InMemoryTaskRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self) -> WorkflowResult<usize> {
        Ok(read(&self.tasks, "tasks")?.len())
    }
}

impl TaskRepository for InMemoryTaskRepository {
    fn find(&self, id: &TaskId) -> WorkflowResult<Option<Task>> {
        Ok(read(&self.tasks, "tasks")?.get(id).cloned())
    }

    fn save(&self, task: &mut Task) -> WorkflowResult<()> {
        let mut tasks = write(&self.tasks, "tasks")?;
        check_version(
            format!("task {}", task.id),
            task.lock_version,
            tasks.get(&task.id).map(|t| t.lock_version),
        )?;

        // one open task per instance, checked under the same lock
        if task.is_open() {
            if let Some(other) = tasks
                .values()
                .find(|t| t.id != task.id && t.instance_id == task.instance_id && t.is_open())
            {
                return Err(WorkflowError::ApprovalPending(other.id.clone()));
            }
        }

        task.lock_version += 1;
        tasks.insert(task.id.clone(), task.clone());
        Ok(())
    }

    fn delete(&self, id: &TaskId) -> WorkflowResult<()> {
        write(&self.tasks, "tasks")?
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| WorkflowError::TaskNotFound(id.clone()))
    }

    fn find_open_for_instance(&self, instance_id: &WorkflowInstanceId) -> WorkflowResult<Option<Task>> {
        Ok(read(&self.tasks, "tasks")?
            .values()
            .find(|t| &t.instance_id == instance_id && t.is_open())
            .cloned())
    }

    fn find_pending_for_actor(&self, actor: &ActorId) -> WorkflowResult<Vec<Task>> {
        let mut pending: Vec<Task> = read(&self.tasks, "tasks")?
            .values()
            .filter(|t| t.is_open() && t.is_assignee(actor) && !t.has_voted(actor))
            .cloned()
            .collect();
        // most urgent first, then oldest
        pending.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then(a.created_at.cmp(&b.created_at))
        });
        Ok(pending)
    }
}

// ── Directory ────────────────────────────────────────────────────────

#[derive(Default)]
struct Directory {
    roles: HashMap<ActorId, Vec<RoleId>>,
    permissions: HashMap<ActorId, HashSet<String>>,
}

/// In-memory actor directory
#[derive(Default)]
pub struct InMemoryActorDirectory {
    directory: RwLock<Directory>,
}

impl InMemoryActorDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`assign_role`](Self::assign_role)
    pub fn with_role(self, actor: impl Into<String>, role: impl Into<String>) -> Self {
        if let Err(e) = self.assign_role(ActorId::new(actor), RoleId::new(role)) {
            tracing::warn!(error = %e, "Role assignment dropped");
        }
        self
    }

    /// Builder form of [`grant`](Self::grant)
    pub fn with_permission(self, actor: impl Into<String>, permission: impl Into<String>) -> Self {
        if let Err(e) = self.grant(ActorId::new(actor), permission) {
            tracing::warn!(error = %e, "Permission grant dropped");
        }
        self
    }

    pub fn assign_role(&self, actor: ActorId, role: RoleId) -> WorkflowResult<()> {
        let mut directory = write(&self.directory, "directory")?;
        let roles = directory.roles.entry(actor).or_default();
        if !roles.contains(&role) {
            roles.push(role);
        }
        Ok(())
    }

    pub fn grant(&self, actor: ActorId, permission: impl Into<String>) -> WorkflowResult<()> {
        write(&self.directory, "directory")?
            .permissions
            .entry(actor)
            .or_default()
            .insert(permission.into());
        Ok(())
    }
}

impl ActorDirectory for InMemoryActorDirectory {
    fn roles_of(&self, actor: &ActorId) -> WorkflowResult<Vec<RoleId>> {
        Ok(read(&self.directory, "directory")?
            .roles
            .get(actor)
            .cloned()
            .unwrap_or_default())
    }

    fn actors_with_role(&self, role: &RoleId) -> WorkflowResult<Vec<ActorId>> {
        let directory = read(&self.directory, "directory")?;
        let mut actors: Vec<ActorId> = directory
            .roles
            .iter()
            .filter(|(_, roles)| roles.contains(role))
            .map(|(actor, _)| actor.clone())
            .collect();
        actors.sort();
        Ok(actors)
    }

    fn has_permission(&self, actor: &ActorId, permission: &str) -> WorkflowResult<bool> {
        Ok(read(&self.directory, "directory")?
            .permissions
            .get(actor)
            .map(|p| p.contains(permission))
            .unwrap_or(false))
    }
}

// ── Notifiers ────────────────────────────────────────────────────────

/// A notification captured by [`RecordingNotifier`]
#[derive(Clone, Debug, PartialEq)]
pub struct Notification {
    pub recipient: ActorId,
    pub template_id: String,
    pub data: Value,
}

/// Records every notification; optionally fails delivery
#[derive(Default)]
pub struct RecordingNotifier {
    sent: RwLock<Vec<Notification>>,
    failing: bool,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// A notifier whose deliveries all fail (after being recorded)
    pub fn failing() -> Self {
        Self {
            sent: RwLock::default(),
            failing: true,
        }
    }

    pub fn sent(&self) -> Vec<Notification> {
        match self.sent.read() {
            Ok(sent) => sent.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn sent_to(&self, recipient: &ActorId) -> Vec<Notification> {
        self.sent()
            .into_iter()
            .filter(|n| &n.recipient == recipient)
            .collect()
    }

    pub fn with_template(&self, template_id: &str) -> Vec<Notification> {
        self.sent()
            .into_iter()
            .filter(|n| n.template_id == template_id)
            .collect()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, recipient: &ActorId, template_id: &str, data: &Value) -> Result<(), NotifyError> {
        let notification = Notification {
            recipient: recipient.clone(),
            template_id: template_id.to_string(),
            data: data.clone(),
        };
        match self.sent.write() {
            Ok(mut sent) => sent.push(notification),
            Err(poisoned) => poisoned.into_inner().push(notification),
        }
        if self.failing {
            return Err(NotifyError {
                recipient: recipient.to_string(),
                reason: "delivery disabled".into(),
            });
        }
        Ok(())
    }
}

/// Discards every notification
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopNotifier;

impl Notifier for NoopNotifier {
    fn notify(&self, _recipient: &ActorId, _template_id: &str, _data: &Value) -> Result<(), NotifyError> {
        Ok(())
    }
}
