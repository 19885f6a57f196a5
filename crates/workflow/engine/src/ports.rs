//! Ports: what the engine needs from its host
//!
//! Persistence, notification delivery and identity live outside the
//! engine. Repositories use optimistic concurrency: `save` succeeds only
//! when the stored `lock_version` matches the one being saved, and bumps
//! it. A record at version 0 has never been stored, so saving it inserts.
//!
//! In-memory reference adapters live in [`crate::memory`].

use serde_json::Value;
use workflow_types::*;

/// Template ids the engine hands to the [`Notifier`]
pub mod templates {
    /// An approval task was assigned to the recipient
    pub const TASK_ASSIGNED: &str = "task_assigned";
    /// An overdue task was escalated to the recipient
    pub const TASK_ESCALATED: &str = "task_escalated";
    /// A task the recipient requested was decided
    pub const TASK_RESOLVED: &str = "task_resolved";
    /// An SLA breach notice
    pub const SLA_BREACHED: &str = "sla_breached";
    /// The recipient's workflow reached a final state
    pub const WORKFLOW_COMPLETED: &str = "workflow_completed";
}

/// Storage for workflow definitions
pub trait DefinitionRepository: Send + Sync {
    fn find(&self, id: &WorkflowDefinitionId) -> WorkflowResult<Option<WorkflowDefinition>>;

    /// Validate and store a definition; definitions are immutable once stored
    fn register(&self, definition: WorkflowDefinition) -> WorkflowResult<WorkflowDefinitionId>;

    fn list(&self) -> WorkflowResult<Vec<WorkflowDefinition>>;
}

/// Storage for workflow instances
pub trait InstanceRepository: Send + Sync {
    fn find(&self, id: &WorkflowInstanceId) -> WorkflowResult<Option<WorkflowInstance>>;

    /// The active instance governing a subject, if any
    fn find_active_by_subject(
        &self,
        subject_type: &str,
        subject_id: &str,
    ) -> WorkflowResult<Option<WorkflowInstance>>;

    /// Conditional write; bumps `lock_version` on success
    fn save(&self, instance: &mut WorkflowInstance) -> WorkflowResult<()>;
}

/// Storage for approval tasks
pub trait TaskRepository: Send + Sync {
    fn find(&self, id: &TaskId) -> WorkflowResult<Option<Task>>;

    /// Conditional write; bumps `lock_version` on success
    ///
    /// Saving an open task while another task of the same instance is
    /// open fails with `ApprovalPending`, atomically with the write.
    fn save(&self, task: &mut Task) -> WorkflowResult<()>;

    fn delete(&self, id: &TaskId) -> WorkflowResult<()>;

    /// The open task of an instance, if any (at most one exists)
    fn find_open_for_instance(&self, instance_id: &WorkflowInstanceId) -> WorkflowResult<Option<Task>>;

    /// Open tasks the actor is a current assignee of and has not voted on
    fn find_pending_for_actor(&self, actor: &ActorId) -> WorkflowResult<Vec<Task>>;
}

/// Failure to deliver a notification
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("notification to '{recipient}' failed: {reason}")]
pub struct NotifyError {
    pub recipient: String,
    pub reason: String,
}

/// Delivers notifications; the engine treats delivery as best effort
pub trait Notifier: Send + Sync {
    fn notify(&self, recipient: &ActorId, template_id: &str, data: &Value) -> Result<(), NotifyError>;
}

/// Identity and authorization lookups
pub trait ActorDirectory: Send + Sync {
    fn roles_of(&self, actor: &ActorId) -> WorkflowResult<Vec<RoleId>>;

    fn actors_with_role(&self, role: &RoleId) -> WorkflowResult<Vec<ActorId>>;

    fn has_permission(&self, actor: &ActorId, permission: &str) -> WorkflowResult<bool>;
}
