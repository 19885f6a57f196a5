//! Approval workflow engine
//!
//! The engine moves business subjects (a purchase order, a leave request)
//! through declarative state machines. Transitions can be guarded by
//! conditions over the instance's data, gated behind multi-party approval
//! with pluggable consensus strategies, bounded by SLAs that escalate on
//! breach, and accompanied by activities that are rolled back in reverse
//! when a later step fails.
//!
//! # Architecture
//!
//! The [`WorkflowManager`] composes specialized components behind the
//! host's [`ports`]:
//!
//! - [`ConditionEngine`]: Parses and evaluates guard expressions
//! - [`StateEngine`]: Validates transitions and writes state changes
//! - [`ApprovalEngine`]: Registry of consensus strategies
//! - [`SlaEvaluator`]: Deadlines, SLA status and escalation selection
//! - [`CompensationEngine`]: Runs activities and compensates them
//!
//! # Example
//!
//! ```rust
//! use serde_json::Map;
//! use workflow_engine::{TransitionRequest, WorkflowManager};
//! use workflow_types::*;
//!
//! let manager = WorkflowManager::in_memory();
//!
//! let mut def = WorkflowDefinition::new("Leave Request");
//! def.add_state(WorkflowState::initial("draft")).unwrap();
//! def.add_state(WorkflowState::terminal("submitted")).unwrap();
//! def.add_transition(Transition::new("submit", ["draft"], "submitted")).unwrap();
//! let def_id = manager.register_definition(def).unwrap();
//!
//! let instance = manager
//!     .instantiate(&def_id, "leave", "L-1", "alice", Map::new())
//!     .unwrap();
//! let outcome = manager
//!     .apply(TransitionRequest::new(instance.id.clone(), "submit", "alice"))
//!     .unwrap();
//!
//! assert!(outcome.is_committed());
//! assert!(manager.get_instance(&instance.id).unwrap().is_terminal());
//! ```

#![deny(unsafe_code)]

pub mod approval;
pub mod calendar;
pub mod compensation;
pub mod condition;
pub mod config;
pub mod manager;
pub mod memory;
pub mod ports;
pub mod sla;
pub mod state_engine;

// Re-export main types
pub use approval::{ApprovalEngine, ApprovalStrategy, Ballot, Seat, Verdict};
pub use calendar::{
    BusinessCalendar, Clock, ContinuousCalendar, ManualClock, SystemClock, WorkingHours,
    WorkingHoursCalendar,
};
pub use compensation::{Activity, ActivityContext, ActivityError, CompensationEngine};
pub use condition::{Condition, ConditionEngine};
pub use config::EngineConfig;
pub use manager::{
    EscalationRecord, Ports, SlaTarget, TransitionOutcome, TransitionRequest, VoteOutcome,
    WorkflowManager,
};
pub use ports::{ActorDirectory, DefinitionRepository, InstanceRepository, Notifier, TaskRepository};
pub use sla::{SlaEvaluator, SlaReport};
pub use state_engine::{StateEngine, TransitionCheck};
