//! Approval tasks: the human side of an approval-gated transition
//!
//! A Task is opened when an approval-gated transition is requested.
//! Assignees cast votes, may delegate their seat, and the task is
//! resolved once the consensus strategy reaches a verdict (or an
//! escalation decides it).

use crate::{ActorId, SlaConfiguration, WorkflowDefinitionId, WorkflowInstanceId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Unique identifier for a task
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId(pub String);

impl TaskId {
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

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An approval task bound to one instance and one pending transition
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub instance_id: WorkflowInstanceId,
    pub definition_id: WorkflowDefinitionId,
    /// Name of the transition waiting on this task
    pub transition: String,
    /// Current assignees (after delegation)
    pub assignees: Vec<ActorId>,
    pub status: TaskStatus,
    pub priority: TaskPriority,
    /// Votes in the order they were cast
    #[serde(default)]
    pub votes: Vec<Vote>,
    /// Delegations in the order they happened
    #[serde(default)]
    pub delegation_chain: Vec<Delegation>,
    /// The actor whose request opened the task
    pub requested_by: ActorId,
    /// Deadline derived from the transition's SLA
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_at: Option<DateTime<Utc>>,
    /// Snapshot of the SLA the deadline was derived from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sla: Option<SlaConfiguration>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<TaskResolution>,
    /// Escalation thresholds already acted on
    #[serde(default)]
    pub escalations_fired: Vec<EscalationMarker>,
    /// Optimistic concurrency counter, bumped on every successful save
    pub lock_version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Task {
    pub fn new(
        instance_id: WorkflowInstanceId,
        definition_id: WorkflowDefinitionId,
        transition: impl Into<String>,
        assignees: Vec<ActorId>,
        requested_by: ActorId,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: TaskId::generate(),
            instance_id,
            definition_id,
            transition: transition.into(),
            assignees,
            status: TaskStatus::Pending,
            priority: TaskPriority::default(),
            votes: Vec::new(),
            delegation_chain: Vec::new(),
            requested_by,
            due_at: None,
            sla: None,
            resolution: None,
            escalations_fired: Vec::new(),
            lock_version: 0,
            created_at: now,
            updated_at: now,
            resolved_at: None,
        }
    }

    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_deadline(mut self, sla: SlaConfiguration, due_at: DateTime<Utc>) -> Self {
        self.sla = Some(sla);
        self.due_at = Some(due_at);
        self
    }

    // ── Mutations ────────────────────────────────────────────────────

    /// Record a vote; the caller has checked authorization
    pub fn record_vote(&mut self, vote: Vote) {
        self.updated_at = vote.cast_at;
        self.votes.push(vote);
        self.status = TaskStatus::InProgress;
    }

    /// Hand `from`'s seat to `to`
    pub fn delegate(&mut self, from: &ActorId, to: ActorId, now: DateTime<Utc>) {
        for assignee in self.assignees.iter_mut() {
            if assignee == from {
                *assignee = to.clone();
            }
        }
        self.delegation_chain.push(Delegation {
            from: from.clone(),
            to,
            at: now,
        });
        self.updated_at = now;
    }

    /// Replace every assignee who has not voted yet
    pub fn reassign(&mut self, to: Vec<ActorId>, now: DateTime<Utc>) {
        let voted: Vec<ActorId> = self
            .assignees
            .iter()
            .filter(|a| self.has_voted(a))
            .cloned()
            .collect();
        let mut assignees = voted;
        for actor in to {
            if !assignees.contains(&actor) {
                assignees.push(actor);
            }
        }
        self.assignees = assignees;
        self.updated_at = now;
    }

    /// Add an assignee if not already present
    pub fn add_assignee(&mut self, actor: ActorId, now: DateTime<Utc>) {
        if !self.assignees.contains(&actor) {
            self.assignees.push(actor);
        }
        self.updated_at = now;
    }

    pub fn resolve(&mut self, resolution: TaskResolution, now: DateTime<Utc>) {
        self.status = match resolution {
            TaskResolution::Cancelled => TaskStatus::Cancelled,
            TaskResolution::Approved | TaskResolution::Rejected => TaskStatus::Completed,
        };
        self.resolution = Some(resolution);
        self.resolved_at = Some(now);
        self.updated_at = now;
    }

    /// Undo a resolution whose follow-up write failed
    pub fn reopen(&mut self, now: DateTime<Utc>) {
        self.status = if self.votes.is_empty() {
            TaskStatus::Pending
        } else {
            TaskStatus::InProgress
        };
        self.resolution = None;
        self.resolved_at = None;
        self.updated_at = now;
    }

    pub fn mark_escalated(&mut self, marker: EscalationMarker) {
        self.updated_at = marker.at;
        self.escalations_fired.push(marker);
    }

    // ── Query methods ────────────────────────────────────────────────

    /// Pending or in progress
    pub fn is_open(&self) -> bool {
        matches!(self.status, TaskStatus::Pending | TaskStatus::InProgress)
    }

    pub fn is_assignee(&self, actor: &ActorId) -> bool {
        self.assignees.contains(actor)
    }

    pub fn has_voted(&self, actor: &ActorId) -> bool {
        self.votes.iter().any(|v| &v.actor == actor)
    }

    /// Whether every current assignee has cast a vote
    pub fn all_voted(&self) -> bool {
        !self.assignees.is_empty() && self.assignees.iter().all(|a| self.has_voted(a))
    }

    /// Assignees who have not voted yet
    pub fn outstanding(&self) -> Vec<&ActorId> {
        self.assignees
            .iter()
            .filter(|a| !self.has_voted(a))
            .collect()
    }

    /// The assignee whose seat `actor` holds, following delegations back
    pub fn original_assignee(&self, actor: &ActorId) -> ActorId {
        let mut current = actor.clone();
        for delegation in self.delegation_chain.iter().rev() {
            if delegation.to == current {
                current = delegation.from.clone();
            }
        }
        current
    }

    pub fn has_fired(&self, threshold_secs: u64) -> bool {
        self.escalations_fired
            .iter()
            .any(|m| m.threshold_secs == threshold_secs)
    }

    pub fn approvals(&self) -> usize {
        self.votes
            .iter()
            .filter(|v| v.decision == VoteDecision::Approve)
            .count()
    }

    pub fn rejections(&self) -> usize {
        self.votes
            .iter()
            .filter(|v| v.decision == VoteDecision::Reject)
            .count()
    }
}

/// Lifecycle status of a task
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum TaskStatus {
    /// Opened, no vote yet
    #[default]
    Pending,
    /// At least one vote cast
    InProgress,
    /// Decided
    Completed,
    /// Withdrawn
    Cancelled,
}

/// How a task was decided
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskResolution {
    Approved,
    Rejected,
    Cancelled,
}

/// Task priority
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub enum TaskPriority {
    Low,
    #[default]
    Normal,
    High,
    Urgent,
}

impl TaskPriority {
    /// One step up, saturating at urgent
    pub fn raised(self) -> Self {
        match self {
            Self::Low => Self::Normal,
            Self::Normal => Self::High,
            Self::High | Self::Urgent => Self::Urgent,
        }
    }
}

/// A single vote
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Vote {
    /// Who cast it
    pub actor: ActorId,
    /// The original assignee whose seat the voter holds
    pub on_behalf_of: ActorId,
    pub decision: VoteDecision,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    pub cast_at: DateTime<Utc>,
}

impl Vote {
    pub fn new(actor: ActorId, decision: VoteDecision, cast_at: DateTime<Utc>) -> Self {
        Self {
            on_behalf_of: actor.clone(),
            actor,
            decision,
            comment: None,
            cast_at,
        }
    }

    pub fn on_behalf_of(mut self, original: ActorId) -> Self {
        self.on_behalf_of = original;
        self
    }

    pub fn with_comment(mut self, comment: Option<String>) -> Self {
        self.comment = comment;
        self
    }

    pub fn is_decisive(&self) -> bool {
        self.decision != VoteDecision::Abstain
    }
}

/// What a voter decided
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum VoteDecision {
    Approve,
    Reject,
    Abstain,
}

/// One link of a delegation chain
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Delegation {
    pub from: ActorId,
    pub to: ActorId,
    pub at: DateTime<Utc>,
}

/// Marks an escalation threshold as already acted on
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EscalationMarker {
    /// Threshold bucket, in seconds of SLA time
    pub threshold_secs: u64,
    pub action: crate::EscalationAction,
    pub at: DateTime<Utc>,
}
