//! SLA configuration and escalation rules
//!
//! An approval task can carry a deadline. When the deadline is breached,
//! the escalation rules decide what happens next: reassign the task,
//! notify someone, decide it automatically, or pull in a higher role.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Deadline configuration for an approval task
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SlaConfiguration {
    /// Time allowed for the task, in seconds
    pub duration_secs: u64,
    /// Count only working time towards the deadline
    #[serde(default)]
    pub use_business_hours: bool,
    /// Action taken on breach when no escalation rule qualifies
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_breach_action: Option<EscalationAction>,
    /// Ordered escalation ladder
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub escalation_rules: Vec<EscalationRule>,
}

impl SlaConfiguration {
    pub fn new(duration_secs: u64) -> Self {
        Self {
            duration_secs,
            use_business_hours: false,
            on_breach_action: None,
            escalation_rules: Vec::new(),
        }
    }

    pub fn hours(hours: u64) -> Self {
        Self::new(hours * 3600)
    }

    pub fn business_hours(mut self) -> Self {
        self.use_business_hours = true;
        self
    }

    pub fn on_breach(mut self, action: EscalationAction) -> Self {
        self.on_breach_action = Some(action);
        self
    }

    pub fn with_rule(mut self, rule: EscalationRule) -> Self {
        self.escalation_rules.push(rule);
        self
    }
}

/// One rung of the escalation ladder
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EscalationRule {
    /// When the rule becomes eligible
    pub threshold: EscalationThreshold,
    /// What to do
    pub action: EscalationAction,
    /// Actor or role the action is aimed at
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    /// Message passed to notifications
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
}

impl EscalationRule {
    pub fn new(threshold: EscalationThreshold, action: EscalationAction) -> Self {
        Self {
            threshold,
            action,
            target: None,
            message: String::new(),
        }
    }

    /// Rule that becomes eligible once `secs` of (SLA) time have elapsed
    pub fn after_secs(secs: u64, action: EscalationAction) -> Self {
        Self::new(EscalationThreshold::Elapsed { secs }, action)
    }

    /// Rule that becomes eligible at a fixed point in time
    pub fn at(at: DateTime<Utc>, action: EscalationAction) -> Self {
        Self::new(EscalationThreshold::Absolute { at }, action)
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }
}

/// When an escalation rule becomes eligible
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum EscalationThreshold {
    /// Relative to the task's start, measured on the SLA's clock
    Elapsed { secs: u64 },
    /// A fixed point in time
    Absolute { at: DateTime<Utc> },
}

/// What an escalation does
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum EscalationAction {
    /// Replace the outstanding assignees with the target
    Reassign,
    /// Notify the target; the task is otherwise untouched
    Notify,
    /// Decide the task as approved
    AutoApprove,
    /// Decide the task as rejected
    AutoReject,
    /// Add the target to the assignees and raise the priority
    Escalate,
}

impl std::fmt::Display for EscalationAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Reassign => "reassign",
            Self::Notify => "notify",
            Self::AutoApprove => "auto_approve",
            Self::AutoReject => "auto_reject",
            Self::Escalate => "escalate",
        };
        write!(f, "{}", s)
    }
}

/// Deadline status of a task
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SlaStatus {
    OnTrack,
    AtRisk,
    Breached,
}

impl SlaStatus {
    pub fn is_breached(&self) -> bool {
        matches!(self, Self::Breached)
    }
}
