//! State engine: validates and commits transitions
//!
//! Validation never writes. `apply_transition` produces a
//! [`TransitionIntent`] describing the move; the manager decides whether
//! the move waits for approval, runs its activities, and only then calls
//! [`StateEngine::commit`] to change the instance.
//!
//! Checks run in a fixed order:
//! 1. the current state is one of the transition's source states
//! 2. the guard (if any) holds over the instance data
//! 3. the instance is active

use crate::condition::ConditionEngine;
use chrono::{DateTime, Utc};
use workflow_types::*;

/// Why a transition cannot fire
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RejectReason {
    /// No transition with that name in the definition
    UnknownTransition,
    /// The current state is not one of the source states
    WrongState { current: StateId },
    /// The instance is not active
    NotActive { status: InstanceStatus },
}

/// Result of checking a transition against an instance
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransitionCheck {
    /// Every check passed
    Allowed,
    /// Structurally impossible right now
    Rejected(RejectReason),
    /// The guard evaluated to false
    GuardFailed { guard: String },
}

impl TransitionCheck {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }
}

/// A validated, not yet committed state change
#[derive(Clone, Debug, PartialEq)]
pub struct TransitionIntent {
    pub instance_id: WorkflowInstanceId,
    pub transition: String,
    pub from: StateId,
    pub to: StateId,
    pub requires_approval: bool,
    /// Activities to run before the change commits
    pub activities: Vec<String>,
    /// Instance version the intent was computed against
    pub expected_version: u64,
}

/// Validates and applies state transitions
#[derive(Clone, Debug, Default)]
pub struct StateEngine {
    conditions: ConditionEngine,
}

impl StateEngine {
    pub fn new() -> Self {
        Self {
            conditions: ConditionEngine::new(),
        }
    }

    pub fn conditions(&self) -> &ConditionEngine {
        &self.conditions
    }

    /// Run every check and report the first that fails
    ///
    /// Guard parse errors are returned as `InvalidExpression`.
    pub fn check(
        &self,
        instance: &WorkflowInstance,
        transition: &str,
        definition: &WorkflowDefinition,
    ) -> WorkflowResult<TransitionCheck> {
        let Some(t) = definition.get_transition(transition) else {
            return Ok(TransitionCheck::Rejected(RejectReason::UnknownTransition));
        };

        if !t.fires_from(&instance.current_state) {
            return Ok(TransitionCheck::Rejected(RejectReason::WrongState {
                current: instance.current_state.clone(),
            }));
        }

        if let Some(guard) = &t.guard {
            if !self.conditions.evaluate(guard, &instance.data)? {
                return Ok(TransitionCheck::GuardFailed {
                    guard: guard.clone(),
                });
            }
        }

        if !instance.is_active() {
            return Ok(TransitionCheck::Rejected(RejectReason::NotActive {
                status: instance.status,
            }));
        }

        Ok(TransitionCheck::Allowed)
    }

    /// Validate a transition and describe the move, without writing
    pub fn apply_transition(
        &self,
        instance: &WorkflowInstance,
        transition: &str,
        definition: &WorkflowDefinition,
    ) -> WorkflowResult<TransitionIntent> {
        match self.check(instance, transition, definition)? {
            TransitionCheck::Allowed => {}
            TransitionCheck::Rejected(RejectReason::NotActive { .. }) => {
                return Err(WorkflowError::WorkflowLocked(instance.id.clone()));
            }
            TransitionCheck::Rejected(_) => {
                return Err(WorkflowError::InvalidTransition {
                    transition: transition.to_string(),
                    from: instance.current_state.clone(),
                });
            }
            TransitionCheck::GuardFailed { guard } => {
                return Err(WorkflowError::GuardConditionFailed {
                    transition: transition.to_string(),
                    guard,
                });
            }
        }

        let t = definition
            .get_transition(transition)
            .ok_or_else(|| WorkflowError::InvalidTransition {
                transition: transition.to_string(),
                from: instance.current_state.clone(),
            })?;

        Ok(TransitionIntent {
            instance_id: instance.id.clone(),
            transition: t.name.clone(),
            from: instance.current_state.clone(),
            to: t.to_state.clone(),
            requires_approval: t.requires_approval(),
            activities: t.activities.clone(),
            expected_version: instance.lock_version,
        })
    }

    /// Advisory check; guard errors read as false
    pub fn can_transition(
        &self,
        instance: &WorkflowInstance,
        transition: &str,
        definition: &WorkflowDefinition,
    ) -> bool {
        self.check(instance, transition, definition)
            .map(|c| c.is_allowed())
            .unwrap_or(false)
    }

    /// Transitions that could fire right now
    pub fn available_transitions<'d>(
        &self,
        instance: &WorkflowInstance,
        definition: &'d WorkflowDefinition,
    ) -> Vec<&'d Transition> {
        definition
            .transitions_from(&instance.current_state)
            .into_iter()
            .filter(|t| self.can_transition(instance, &t.name, definition))
            .collect()
    }

    /// Write a validated intent into the instance
    ///
    /// The instance must still be at the state and version the intent
    /// was computed against. Reaching a final state completes it.
    pub fn commit(
        &self,
        instance: &mut WorkflowInstance,
        definition: &WorkflowDefinition,
        intent: &TransitionIntent,
        actor: &ActorId,
        comment: Option<String>,
        at: DateTime<Utc>,
    ) -> WorkflowResult<()> {
        if instance.lock_version != intent.expected_version {
            return Err(WorkflowError::ConcurrentModification {
                entity: format!("instance {}", instance.id),
                expected: intent.expected_version,
                actual: instance.lock_version,
            });
        }
        if instance.current_state != intent.from {
            return Err(WorkflowError::InvalidTransition {
                transition: intent.transition.clone(),
                from: instance.current_state.clone(),
            });
        }
        if !instance.is_active() {
            return Err(WorkflowError::WorkflowLocked(instance.id.clone()));
        }

        self.record(
            instance,
            definition,
            intent.transition.clone(),
            intent.to.clone(),
            actor,
            comment,
            at,
        );

        tracing::info!(
            instance_id = %instance.id,
            transition = %intent.transition,
            from = %intent.from,
            to = %intent.to,
            actor = %actor,
            "Transition committed"
        );
        Ok(())
    }

    /// Move an instance to the rejection target of a refused approval
    ///
    /// Returns the state the instance landed in, or `None` when neither
    /// the transition nor the definition names a rejection state.
    pub fn reject(
        &self,
        instance: &mut WorkflowInstance,
        definition: &WorkflowDefinition,
        transition: &str,
        actor: &ActorId,
        comment: Option<String>,
        at: DateTime<Utc>,
    ) -> WorkflowResult<Option<StateId>> {
        let t = definition
            .get_transition(transition)
            .ok_or_else(|| WorkflowError::InvalidTransition {
                transition: transition.to_string(),
                from: instance.current_state.clone(),
            })?;

        let Some(target) = definition.rejection_target(t).cloned() else {
            return Ok(None);
        };
        if !instance.is_active() {
            return Err(WorkflowError::WorkflowLocked(instance.id.clone()));
        }

        self.record(
            instance,
            definition,
            format!("rejected:{}", transition),
            target.clone(),
            actor,
            comment,
            at,
        );

        tracing::info!(
            instance_id = %instance.id,
            transition = %transition,
            to = %target,
            "Approval rejected"
        );
        Ok(Some(target))
    }

    #[allow(clippy::too_many_arguments)]
    fn record(
        &self,
        instance: &mut WorkflowInstance,
        definition: &WorkflowDefinition,
        transition: String,
        to: StateId,
        actor: &ActorId,
        comment: Option<String>,
        at: DateTime<Utc>,
    ) {
        let from = instance.current_state.clone();
        instance.record_transition(TransitionRecord {
            transition,
            from,
            to: to.clone(),
            actor: actor.clone(),
            comment,
            at,
        });
        if definition.is_final(&to) {
            instance.complete(at);
        }
    }
}
