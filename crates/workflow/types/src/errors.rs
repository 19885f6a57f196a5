//! Error types for the Workflow layer

use crate::{StateId, TaskId, WorkflowDefinitionId, WorkflowInstanceId};
use serde::{Deserialize, Serialize};

/// One activity whose compensating action could not complete
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompensationFailure {
    /// Name of the activity that failed to compensate
    pub activity: String,
    /// What went wrong
    pub reason: String,
}

impl std::fmt::Display for CompensationFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.activity, self.reason)
    }
}

/// Errors that can occur in Workflow operations
#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    #[error("Workflow definition not found: {0}")]
    DefinitionNotFound(WorkflowDefinitionId),

    #[error("Workflow instance not found: {0}")]
    InstanceNotFound(WorkflowInstanceId),

    #[error("Task not found: {0}")]
    TaskNotFound(TaskId),

    #[error("State not declared: {0}")]
    StateNotFound(StateId),

    #[error("Duplicate state: {0}")]
    DuplicateState(StateId),

    #[error("Duplicate transition: {0}")]
    DuplicateTransition(String),

    #[error("No initial state defined")]
    NoInitialState,

    #[error("Workflow validation error: {0}")]
    ValidationError(String),

    #[error("Invalid transition '{transition}' from state '{from}'")]
    InvalidTransition { transition: String, from: StateId },

    #[error("Guard condition failed for transition '{transition}': {guard}")]
    GuardConditionFailed { transition: String, guard: String },

    #[error("Invalid expression '{expression}': {message}")]
    InvalidExpression { expression: String, message: String },

    #[error("Workflow instance {0} is not active")]
    WorkflowLocked(WorkflowInstanceId),

    #[error("An active instance already exists for {subject_type}#{subject_id}")]
    DuplicateInstance {
        subject_type: String,
        subject_id: String,
    },

    #[error("Unknown approval strategy: {0}")]
    UnknownStrategy(String),

    #[error("Approval deadlock on task {0}: every assignee voted without a verdict")]
    ApprovalDeadlock(TaskId),

    #[error("Approval already pending on task {0}")]
    ApprovalPending(TaskId),

    #[error("Task {0} is already resolved")]
    TaskAlreadyResolved(TaskId),

    #[error("Actor '{actor}' may not act on task {task}")]
    UnauthorizedTaskAction { task: TaskId, actor: String },

    #[error("Actor '{actor}' may not approve their own submission (task {task})")]
    SelfApproval { task: TaskId, actor: String },

    #[error("Actor '{actor}' already voted on task {task}")]
    AlreadyVoted { task: TaskId, actor: String },

    #[error("Delegation chain on task {task} exceeds maximum depth {max}")]
    DelegationChainExceeded { task: TaskId, max: usize },

    #[error("Invalid delegation: {0}")]
    InvalidDelegation(String),

    #[error("Concurrent modification of {entity}: expected version {expected}, found {actual}")]
    ConcurrentModification {
        entity: String,
        expected: u64,
        actual: u64,
    },

    #[error("Unknown activity: {0}")]
    UnknownActivity(String),

    #[error("Activity '{activity}' failed: {reason}")]
    ActivityFailed { activity: String, reason: String },

    #[error("Compensation incomplete: {}", join_failures(.failures))]
    CompensationPartialFailure { failures: Vec<CompensationFailure> },

    #[error("Storage error: {0}")]
    Storage(String),
}

fn join_failures(failures: &[CompensationFailure]) -> String {
    failures
        .iter()
        .map(|f| f.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

impl WorkflowError {
    /// Whether the caller should reload and retry the operation
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ConcurrentModification { .. })
    }

    /// Whether an operator has to step in before the workflow can continue
    pub fn requires_intervention(&self) -> bool {
        matches!(
            self,
            Self::ApprovalDeadlock(_) | Self::CompensationPartialFailure { .. }
        )
    }
}

/// Result type alias for workflow operations
pub type WorkflowResult<T> = Result<T, WorkflowError>;
