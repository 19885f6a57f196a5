//! Workflow instances: a host entity moving through a definition
//!
//! A WorkflowInstance tracks the runtime state of one subject (a
//! purchase order, an expense claim, ...) inside one definition: the
//! current state, the data guards are evaluated against, its lifecycle
//! status, and the ordered history of committed transitions.
//!
//! Every write goes through the instance repository, which compares
//! `lock_version` before storing; see the engine's ports.

use crate::{ActorId, StateId, WorkflowDefinitionId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ── Instance Identifier ──────────────────────────────────────────────

/// Unique identifier for a workflow instance
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkflowInstanceId(pub String);

impl WorkflowInstanceId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn short(&self) -> &str {
        &self.0[..8.min(self.0.len())]
    }
}

impl std::fmt::Display for WorkflowInstanceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Caller-owned polymorphic reference to the entity under workflow
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubjectRef {
    pub subject_type: String,
    pub subject_id: String,
}

impl SubjectRef {
    pub fn new(subject_type: impl Into<String>, subject_id: impl Into<String>) -> Self {
        Self {
            subject_type: subject_type.into(),
            subject_id: subject_id.into(),
        }
    }
}

impl std::fmt::Display for SubjectRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}", self.subject_type, self.subject_id)
    }
}

// ── Workflow Instance ────────────────────────────────────────────────

/// A running instance of a workflow definition
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorkflowInstance {
    /// Unique instance identifier
    pub id: WorkflowInstanceId,
    /// The definition this instance was created from
    pub definition_id: WorkflowDefinitionId,
    /// The entity this instance governs
    pub subject: SubjectRef,
    /// Current state in the definition
    pub current_state: StateId,
    /// Context consulted by guard expressions
    #[serde(default)]
    pub data: Map<String, Value>,
    /// Lifecycle status
    pub status: InstanceStatus,
    /// Optimistic concurrency counter, bumped on every successful save
    pub lock_version: u64,
    /// Who started this instance
    pub initiator: ActorId,
    /// Committed transitions, oldest first
    #[serde(default)]
    pub history: Vec<TransitionRecord>,
    /// When the instance was created
    pub created_at: DateTime<Utc>,
    /// When the instance was last updated
    pub updated_at: DateTime<Utc>,
    /// When the instance left the active status
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub closed_at: Option<DateTime<Utc>>,
}

impl WorkflowInstance {
    /// Create a new active instance in the given initial state
    pub fn new(
        definition_id: WorkflowDefinitionId,
        subject: SubjectRef,
        initial_state: StateId,
        initiator: ActorId,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: WorkflowInstanceId::generate(),
            definition_id,
            subject,
            current_state: initial_state,
            data: Map::new(),
            status: InstanceStatus::Active,
            lock_version: 0,
            initiator,
            history: Vec::new(),
            created_at: now,
            updated_at: now,
            closed_at: None,
        }
    }

    pub fn with_data(mut self, data: Map<String, Value>) -> Self {
        self.data = data;
        self
    }

    pub fn with_value(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    /// Move to a new state and record the transition
    pub fn record_transition(&mut self, record: TransitionRecord) {
        self.current_state = record.to.clone();
        self.updated_at = record.at;
        self.history.push(record);
    }

    /// Merge values into the guard context
    pub fn merge_data(&mut self, values: Map<String, Value>, now: DateTime<Utc>) {
        for (key, value) in values {
            self.data.insert(key, value);
        }
        self.updated_at = now;
    }

    /// Complete the instance (a final state was reached)
    pub fn complete(&mut self, now: DateTime<Utc>) {
        self.close(InstanceStatus::Completed, now);
    }

    /// Fail the instance (rollback could not finish)
    pub fn fail(&mut self, now: DateTime<Utc>) {
        self.close(InstanceStatus::Failed, now);
    }

    /// Cancel the instance
    pub fn cancel(&mut self, now: DateTime<Utc>) {
        self.close(InstanceStatus::Cancelled, now);
    }

    /// Suspend the instance; transitions are refused until resumed
    pub fn suspend(&mut self, now: DateTime<Utc>) {
        self.status = InstanceStatus::Suspended;
        self.updated_at = now;
    }

    /// Resume a suspended instance
    pub fn resume(&mut self, now: DateTime<Utc>) {
        self.status = InstanceStatus::Active;
        self.updated_at = now;
    }

    fn close(&mut self, status: InstanceStatus, now: DateTime<Utc>) {
        self.status = status;
        self.closed_at = Some(now);
        self.updated_at = now;
    }

    // ── Query methods ────────────────────────────────────────────────

    pub fn is_active(&self) -> bool {
        self.status == InstanceStatus::Active
    }

    /// Completed, failed or cancelled
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Look up a guard context value by dotted path (`order.total`)
    pub fn lookup(&self, path: &str) -> Option<&Value> {
        let mut segments = path.split('.');
        let mut current = self.data.get(segments.next()?)?;
        for segment in segments {
            current = current.as_object()?.get(segment)?;
        }
        Some(current)
    }

    pub fn last_transition(&self) -> Option<&TransitionRecord> {
        self.history.last()
    }

    /// Seconds since creation, as of `now`
    pub fn elapsed_secs(&self, now: DateTime<Utc>) -> i64 {
        now.signed_duration_since(self.created_at).num_seconds()
    }
}

// ── Instance Status ──────────────────────────────────────────────────

/// The lifecycle status of a workflow instance
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum InstanceStatus {
    /// Accepting transitions
    #[default]
    Active,
    /// Reached a final state
    Completed,
    /// Cancelled by an authorized actor
    Cancelled,
    /// Parked; transitions are refused until resumed
    Suspended,
    /// A rollback could not complete; needs an operator
    Failed,
}

impl InstanceStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl std::fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Suspended => "suspended",
            Self::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

// ── Transition Record ────────────────────────────────────────────────

/// One committed state change
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TransitionRecord {
    /// Transition name, or a system marker such as `rejected:approve`
    pub transition: String,
    pub from: StateId,
    pub to: StateId,
    /// Who caused the change
    pub actor: ActorId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    pub at: DateTime<Utc>,
}
