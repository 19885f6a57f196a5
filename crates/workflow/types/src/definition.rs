//! Workflow definitions: the blueprint for approval processes
//!
//! A WorkflowDefinition is a state machine where:
//! - States are the named stages a host entity can be in
//! - Transitions are guarded, optionally approval-gated moves between states
//!
//! Definitions are immutable once validated. To modify, create a new version.

use crate::{SlaConfiguration, Transition, WorkflowError, WorkflowResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

// ── Identifiers ──────────────────────────────────────────────────────

/// Unique identifier for a workflow definition
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkflowDefinitionId(pub String);

impl WorkflowDefinitionId {
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

impl std::fmt::Display for WorkflowDefinitionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a declared state
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StateId(pub String);

impl StateId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for StateId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ── Workflow Definition ──────────────────────────────────────────────

/// A workflow definition: the blueprint for an approval process
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    /// Unique identifier
    pub id: WorkflowDefinitionId,
    /// Human-readable name
    pub name: String,
    /// Description of what this workflow accomplishes
    #[serde(default)]
    pub description: String,
    /// Version for tracking definition evolution
    pub version: u32,
    /// Declared states
    pub states: Vec<WorkflowState>,
    /// Declared transitions
    pub transitions: Vec<Transition>,
    /// Where a rejected approval lands unless the transition overrides it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejection_state: Option<StateId>,
    /// When this definition was created
    pub created_at: DateTime<Utc>,
    /// Metadata
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,
}

impl WorkflowDefinition {
    /// Create a new workflow definition
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: WorkflowDefinitionId::generate(),
            name: name.into(),
            description: String::new(),
            version: 1,
            states: Vec::new(),
            transitions: Vec::new(),
            rejection_state: None,
            created_at: Utc::now(),
            metadata: HashMap::new(),
        }
    }

    pub fn with_id(mut self, id: WorkflowDefinitionId) -> Self {
        self.id = id;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    pub fn with_rejection_state(mut self, state: impl Into<String>) -> Self {
        self.rejection_state = Some(StateId::new(state));
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Declare a state
    pub fn add_state(&mut self, state: WorkflowState) -> WorkflowResult<()> {
        if self.states.iter().any(|s| s.id == state.id) {
            return Err(WorkflowError::DuplicateState(state.id));
        }
        self.states.push(state);
        Ok(())
    }

    /// Add a transition between declared states
    pub fn add_transition(&mut self, transition: Transition) -> WorkflowResult<()> {
        for from in &transition.from_states {
            if !self.has_state(from) {
                return Err(WorkflowError::StateNotFound(from.clone()));
            }
        }
        if !self.has_state(&transition.to_state) {
            return Err(WorkflowError::StateNotFound(transition.to_state.clone()));
        }
        if self.transitions.iter().any(|t| t.name == transition.name) {
            return Err(WorkflowError::DuplicateTransition(transition.name));
        }
        self.transitions.push(transition);
        Ok(())
    }

    /// Get the initial state
    pub fn initial_state(&self) -> Option<&WorkflowState> {
        self.states.iter().find(|s| s.kind == StateKind::Initial)
    }

    /// Get a state by ID
    pub fn get_state(&self, id: &StateId) -> Option<&WorkflowState> {
        self.states.iter().find(|s| &s.id == id)
    }

    pub fn has_state(&self, id: &StateId) -> bool {
        self.get_state(id).is_some()
    }

    /// Whether reaching this state completes the instance
    pub fn is_final(&self, id: &StateId) -> bool {
        self.get_state(id)
            .map(|s| s.kind == StateKind::Final)
            .unwrap_or(false)
    }

    /// Get a transition by name
    pub fn get_transition(&self, name: &str) -> Option<&Transition> {
        self.transitions.iter().find(|t| t.name == name)
    }

    /// Transitions whose source set contains the given state
    pub fn transitions_from(&self, state: &StateId) -> Vec<&Transition> {
        self.transitions
            .iter()
            .filter(|t| t.from_states.contains(state))
            .collect()
    }

    /// Where a rejected approval on `transition` lands, if anywhere
    pub fn rejection_target<'a>(&'a self, transition: &'a Transition) -> Option<&'a StateId> {
        transition
            .rejection_state
            .as_ref()
            .or(self.rejection_state.as_ref())
    }

    /// Validate the workflow definition for structural correctness
    pub fn validate(&self) -> WorkflowResult<()> {
        if self.states.is_empty() {
            return Err(WorkflowError::ValidationError(
                "Workflow must declare at least one state".into(),
            ));
        }

        // Exactly one initial state
        let initial_count = self
            .states
            .iter()
            .filter(|s| s.kind == StateKind::Initial)
            .count();
        if initial_count == 0 {
            return Err(WorkflowError::NoInitialState);
        }
        if initial_count > 1 {
            return Err(WorkflowError::ValidationError(
                "Workflow must have exactly one initial state".into(),
            ));
        }

        let mut seen_states = HashSet::new();
        for state in &self.states {
            if !seen_states.insert(&state.id) {
                return Err(WorkflowError::DuplicateState(state.id.clone()));
            }
        }

        let mut seen_transitions = HashSet::new();
        for transition in &self.transitions {
            if !seen_transitions.insert(transition.name.as_str()) {
                return Err(WorkflowError::DuplicateTransition(transition.name.clone()));
            }
            if transition.from_states.is_empty() {
                return Err(WorkflowError::ValidationError(format!(
                    "Transition '{}' has no source states",
                    transition.name
                )));
            }
            for from in &transition.from_states {
                if !seen_states.contains(from) {
                    return Err(WorkflowError::StateNotFound(from.clone()));
                }
            }
            if !seen_states.contains(&transition.to_state) {
                return Err(WorkflowError::StateNotFound(transition.to_state.clone()));
            }
            if let Some(rejection) = &transition.rejection_state {
                if !seen_states.contains(rejection) {
                    return Err(WorkflowError::StateNotFound(rejection.clone()));
                }
            }
            if let Some(approval) = &transition.approval {
                if approval.assignees.is_empty() && approval.assignee_roles.is_empty() {
                    return Err(WorkflowError::ValidationError(format!(
                        "Transition '{}' requires approval but names no assignees",
                        transition.name
                    )));
                }
            }
            if let Some(sla) = &transition.sla {
                validate_sla(&transition.name, sla)?;
            }
        }

        if let Some(rejection) = &self.rejection_state {
            if !seen_states.contains(rejection) {
                return Err(WorkflowError::StateNotFound(rejection.clone()));
            }
        }

        Ok(())
    }

    pub fn state_count(&self) -> usize {
        self.states.len()
    }

    pub fn transition_count(&self) -> usize {
        self.transitions.len()
    }
}

fn validate_sla(transition: &str, sla: &SlaConfiguration) -> WorkflowResult<()> {
    if sla.duration_secs == 0 {
        return Err(WorkflowError::ValidationError(format!(
            "Transition '{}' has an SLA with zero duration",
            transition
        )));
    }
    Ok(())
}

// ── Workflow State ───────────────────────────────────────────────────

/// A declared state in the workflow
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorkflowState {
    /// Unique identifier within this workflow
    pub id: StateId,
    /// Human-readable name
    pub name: String,
    /// Whether this is the entry state, a terminal state, or in between
    pub kind: StateKind,
}

impl WorkflowState {
    pub fn new(id: impl Into<String>, kind: StateKind) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id: StateId::new(id),
            kind,
        }
    }

    /// Create the initial state
    pub fn initial(id: impl Into<String>) -> Self {
        Self::new(id, StateKind::Initial)
    }

    /// Create an intermediate state
    pub fn intermediate(id: impl Into<String>) -> Self {
        Self::new(id, StateKind::Intermediate)
    }

    /// Create a final state
    pub fn terminal(id: impl Into<String>) -> Self {
        Self::new(id, StateKind::Final)
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

/// The role a state plays in the lifecycle
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum StateKind {
    /// Instances start here
    Initial,
    /// Ordinary stage
    Intermediate,
    /// Reaching this state completes the instance
    Final,
}
