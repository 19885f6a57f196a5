//! Transitions: guarded, optionally approval-gated moves between states
//!
//! A transition fires from any of its source states into its target
//! state. It can carry a guard expression over the instance data, an
//! approval requirement (a consensus strategy over a set of assignees),
//! an SLA for that approval, and side-effect activities that run when
//! the state change commits.

use crate::{ActorId, RoleId, SlaConfiguration, StateId, TaskPriority};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

/// Names of the built-in consensus strategies
pub mod strategy_names {
    /// Every assignee must approve
    pub const UNISON: &str = "unison";
    /// More than half of the assignees must approve
    pub const MAJORITY: &str = "majority";
    /// A configured number of approvals
    pub const QUORUM: &str = "quorum";
    /// Approval weight must reach a threshold
    pub const WEIGHTED: &str = "weighted";
    /// The first decisive vote wins
    pub const FIRST: &str = "first";
}

/// A named transition in a workflow definition
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Transition {
    /// Unique name within the definition
    pub name: String,
    /// States this transition may fire from
    pub from_states: BTreeSet<StateId>,
    /// State the instance lands in on success
    pub to_state: StateId,
    /// Boolean guard over the instance data
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guard: Option<String>,
    /// Approval requirement; the state change waits for a verdict
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approval: Option<ApprovalConfig>,
    /// Deadline for the approval task
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sla: Option<SlaConfiguration>,
    /// Where a rejected approval lands (overrides the definition default)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejection_state: Option<StateId>,
    /// Activities executed, in order, when the state change commits
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub activities: Vec<String>,
    /// Human-readable description
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
}

impl Transition {
    /// Create an unguarded transition without approval
    pub fn new<I, S>(name: impl Into<String>, from: I, to: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            from_states: from.into_iter().map(|s| StateId::new(s)).collect(),
            to_state: StateId::new(to),
            guard: None,
            approval: None,
            sla: None,
            rejection_state: None,
            activities: Vec::new(),
            description: String::new(),
        }
    }

    pub fn with_guard(mut self, expression: impl Into<String>) -> Self {
        self.guard = Some(expression.into());
        self
    }

    pub fn with_approval(mut self, approval: ApprovalConfig) -> Self {
        self.approval = Some(approval);
        self
    }

    pub fn with_sla(mut self, sla: SlaConfiguration) -> Self {
        self.sla = Some(sla);
        self
    }

    pub fn with_rejection_state(mut self, state: impl Into<String>) -> Self {
        self.rejection_state = Some(StateId::new(state));
        self
    }

    pub fn with_activity(mut self, activity: impl Into<String>) -> Self {
        self.activities.push(activity.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Whether the state change waits for an approval verdict
    pub fn requires_approval(&self) -> bool {
        self.approval.is_some()
    }

    pub fn fires_from(&self, state: &StateId) -> bool {
        self.from_states.contains(state)
    }
}

/// Configuration of the consensus an approval-gated transition needs
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ApprovalConfig {
    /// Registered strategy name (see [`strategy_names`])
    pub strategy: String,
    /// Explicit assignees
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub assignees: Vec<ActorId>,
    /// Roles whose members become assignees when the task opens
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub assignee_roles: Vec<RoleId>,
    /// Approvals needed by the quorum strategy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quorum: Option<u32>,
    /// Vote weights by original assignee (weighted strategy)
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub weights: HashMap<ActorId, u64>,
    /// Approval weight needed by the weighted strategy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold_weight: Option<u64>,
    /// Whether the actor who requested the transition may approve it
    #[serde(default)]
    pub allow_self_approval: bool,
    /// Priority of the approval task
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<TaskPriority>,
}

impl ApprovalConfig {
    pub fn new(strategy: impl Into<String>) -> Self {
        Self {
            strategy: strategy.into(),
            assignees: Vec::new(),
            assignee_roles: Vec::new(),
            quorum: None,
            weights: HashMap::new(),
            threshold_weight: None,
            allow_self_approval: false,
            priority: None,
        }
    }

    pub fn unison<I, S>(assignees: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(strategy_names::UNISON).with_assignees(assignees)
    }

    pub fn majority<I, S>(assignees: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(strategy_names::MAJORITY).with_assignees(assignees)
    }

    pub fn quorum<I, S>(quorum: u32, assignees: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut config = Self::new(strategy_names::QUORUM).with_assignees(assignees);
        config.quorum = Some(quorum);
        config
    }

    pub fn weighted<I, S>(threshold_weight: u64, weighted_assignees: I) -> Self
    where
        I: IntoIterator<Item = (S, u64)>,
        S: Into<String>,
    {
        let mut config = Self::new(strategy_names::WEIGHTED);
        for (actor, weight) in weighted_assignees {
            let actor = ActorId::new(actor);
            config.weights.insert(actor.clone(), weight);
            config.assignees.push(actor);
        }
        config.threshold_weight = Some(threshold_weight);
        config
    }

    pub fn first<I, S>(assignees: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(strategy_names::FIRST).with_assignees(assignees)
    }

    pub fn with_assignees<I, S>(mut self, assignees: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.assignees
            .extend(assignees.into_iter().map(|a| ActorId::new(a)));
        self
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.assignee_roles.push(RoleId::new(role));
        self
    }

    pub fn allowing_self_approval(mut self) -> Self {
        self.allow_self_approval = true;
        self
    }

    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = Some(priority);
        self
    }

    /// Weight of a vote cast on behalf of `actor` (1 when unconfigured)
    pub fn weight_of(&self, actor: &ActorId) -> u64 {
        self.weights.get(actor).copied().unwrap_or(1)
    }
}
