//! Workflow Domain Types
//!
//! Workflows here are business processes: a host entity (a purchase
//! order, an expense claim, a contract) moves through the states of a
//! versioned definition, and some of those moves wait for a group of
//! people to agree.
//!
//! # Key Concepts
//!
//! - **WorkflowDefinition**: States plus named transitions between them.
//!   Definitions are plain data and can be loaded from JSON.
//! - **Transition**: A guarded move from a set of source states into a
//!   target state, optionally gated by an approval and bounded by an SLA.
//! - **WorkflowInstance**: One subject moving through one definition,
//!   with its data, history and optimistic lock version.
//! - **Task**: An open approval request. Assignees vote, delegate, and
//!   the consensus strategy decides.
//! - **SlaConfiguration**: The deadline of an approval and the
//!   escalation ladder applied when it slips.
//!
//! # Design Principles
//!
//! 1. No state change without a matching transition whose guard holds.
//! 2. An approval-gated transition changes nothing until its task has
//!    a verdict.
//! 3. Every committed change is recorded in the instance history.
//! 4. Concurrent writers are detected, never silently merged.

#![deny(unsafe_code)]

mod actor;
mod definition;
mod errors;
mod instance;
mod sla;
mod task;
mod transition;

pub use actor::*;
pub use definition::*;
pub use errors::*;
pub use instance::*;
pub use sla::*;
pub use task::*;
pub use transition::*;
