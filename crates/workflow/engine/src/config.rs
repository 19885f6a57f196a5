//! Engine configuration.
//!
//! Tunables for delegation, SLA reporting, notifications and operator
//! overrides. Hosts usually start from a preset and load overrides from
//! a JSON file.

use crate::calendar::WorkingHours;
use serde::{Deserialize, Serialize};
use workflow_types::{TaskPriority, WorkflowError, WorkflowResult};

/// Configuration for a [`WorkflowManager`](crate::WorkflowManager).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Longest delegation chain allowed on one task.
    pub max_delegation_depth: usize,

    /// Fraction of the SLA after which a task reports at risk.
    pub at_risk_ratio: f64,

    /// Notify the initiator when an instance reaches a final state.
    pub notify_on_completion: bool,

    /// Priority of approval tasks whose config names none.
    pub default_priority: TaskPriority,

    /// Permission an operator needs to resolve a task by hand.
    pub override_permission: String,

    /// Working hours used for business-hours SLAs, applied by
    /// [`Ports::for_config`](crate::Ports::for_config).
    pub working_hours: WorkingHours,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_delegation_depth: 3,
            at_risk_ratio: 0.8,
            notify_on_completion: true,
            default_priority: TaskPriority::Normal,
            override_permission: "workflow:override".into(),
            working_hours: WorkingHours::default(),
        }
    }
}

impl EngineConfig {
    /// Tight delegation, early at-risk warnings, high-priority tasks.
    pub fn strict() -> Self {
        Self {
            max_delegation_depth: 1,
            at_risk_ratio: 0.5,
            default_priority: TaskPriority::High,
            ..Self::default()
        }
    }

    /// Long delegation chains and late at-risk warnings.
    pub fn relaxed() -> Self {
        Self {
            max_delegation_depth: 10,
            at_risk_ratio: 0.95,
            notify_on_completion: false,
            default_priority: TaskPriority::Low,
            ..Self::default()
        }
    }

    /// Parse a host-supplied JSON config; absent fields keep their defaults.
    pub fn from_json(json: &str) -> WorkflowResult<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| WorkflowError::ValidationError(format!("Invalid engine config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> WorkflowResult<()> {
        if !(self.at_risk_ratio > 0.0 && self.at_risk_ratio <= 1.0) {
            return Err(WorkflowError::ValidationError(format!(
                "at_risk_ratio must be in (0, 1], got {}",
                self.at_risk_ratio
            )));
        }
        if self.override_permission.is_empty() {
            return Err(WorkflowError::ValidationError(
                "override_permission must not be empty".into(),
            ));
        }
        Ok(())
    }
}
