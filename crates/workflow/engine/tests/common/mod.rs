//! Shared fixtures for the engine's integration tests.

#![allow(dead_code)]

use chrono::{DateTime, TimeZone, Utc};
use serde_json::{json, Map, Value};
use std::sync::{Arc, Mutex};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use workflow_engine::compensation::{Activity, ActivityContext, ActivityError};
use workflow_engine::memory::{InMemoryActorDirectory, RecordingNotifier};
use workflow_engine::*;
use workflow_types::*;

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

/// A manager wired to a manual clock, a recording notifier and a directory.
pub struct Harness {
    pub manager: WorkflowManager,
    pub clock: Arc<ManualClock>,
    pub notifier: Arc<RecordingNotifier>,
    pub directory: Arc<InMemoryActorDirectory>,
}

/// Route engine logs to the test writer; `RUST_LOG` overrides the level.
pub fn init_tracing() {
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_test_writer().without_time())
        .try_init();
}

/// Monday 2024-03-04 09:00 UTC.
pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 4, 9, 0, 0).unwrap()
}

pub fn actor(id: &str) -> ActorId {
    ActorId::new(id)
}

pub fn data(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        other => panic!("expected a JSON object, got {other}"),
    }
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        init_tracing();
        let clock = Arc::new(ManualClock::new(t0()));
        let notifier = Arc::new(RecordingNotifier::new());
        let directory = Arc::new(
            InMemoryActorDirectory::new()
                .with_role("dana", "finance")
                .with_role("erin", "finance")
                .with_role("victor", "director")
                .with_permission("ops", "workflow:override"),
        );
        let ports = Ports::in_memory()
            .with_clock(clock.clone())
            .with_notifier(notifier.clone())
            .with_directory(directory.clone())
            .with_calendar(Arc::new(WorkingHoursCalendar::new(
                config.working_hours.clone(),
            )));
        Self {
            manager: WorkflowManager::new(ports, config),
            clock,
            notifier,
            directory,
        }
    }

    /// Register the purchase-order workflow and return its id.
    pub fn purchase_orders(&self, approval: ApprovalConfig) -> WorkflowDefinitionId {
        self.manager
            .register_definition(purchase_order_definition(approval, None))
            .unwrap()
    }

    /// Start a purchase order at `submitted` with the given amount.
    pub fn submitted_order(&self, def: &WorkflowDefinitionId, po: &str, amount: u64) -> WorkflowInstance {
        let instance = self
            .manager
            .instantiate(def, "purchase_order", po, "requester", data(json!({ "amount": amount })))
            .unwrap();
        self.manager
            .apply(TransitionRequest::new(instance.id.clone(), "submit", "requester"))
            .unwrap();
        self.manager.get_instance(&instance.id).unwrap()
    }

    /// Request the approval-gated transition and return the opened task.
    pub fn request_approval(&self, instance: &WorkflowInstance) -> Task {
        let outcome = self
            .manager
            .apply(TransitionRequest::new(instance.id.clone(), "approve", "requester"))
            .unwrap();
        outcome.task().cloned().expect("approval task")
    }
}

// ---------------------------------------------------------------------------
// Definitions
// ---------------------------------------------------------------------------

/// draft → submitted → approved → ordered, with `rejected` as the
/// rejection state of the approval step.
pub fn purchase_order_definition(
    approval: ApprovalConfig,
    sla: Option<SlaConfiguration>,
) -> WorkflowDefinition {
    let mut def = WorkflowDefinition::new("Purchase Order")
        .with_description("Approve and place purchase orders")
        .with_rejection_state("rejected");
    def.add_state(WorkflowState::initial("draft")).unwrap();
    def.add_state(WorkflowState::intermediate("submitted")).unwrap();
    def.add_state(WorkflowState::intermediate("approved")).unwrap();
    def.add_state(WorkflowState::terminal("ordered")).unwrap();
    def.add_state(WorkflowState::terminal("rejected")).unwrap();
    def.add_state(WorkflowState::terminal("withdrawn")).unwrap();

    def.add_transition(Transition::new("submit", ["draft"], "submitted").with_guard("amount > 0"))
        .unwrap();

    let mut approve = Transition::new("approve", ["submitted"], "approved").with_approval(approval);
    if let Some(sla) = sla {
        approve = approve.with_sla(sla);
    }
    def.add_transition(approve).unwrap();

    def.add_transition(
        Transition::new("fast_track", ["submitted"], "approved").with_guard("amount < 1000"),
    )
    .unwrap();
    def.add_transition(
        Transition::new("place_order", ["approved"], "ordered")
            .with_activity("reserve_budget")
            .with_activity("send_po"),
    )
    .unwrap();
    def.add_transition(Transition::new("withdraw", ["draft", "submitted"], "withdrawn"))
        .unwrap();
    def
}

// ---------------------------------------------------------------------------
// Activities
// ---------------------------------------------------------------------------

/// Shared journal of activity calls, in call order.
pub type Journal = Arc<Mutex<Vec<String>>>;

pub fn journal() -> Journal {
    Arc::new(Mutex::new(Vec::new()))
}

pub fn entries(journal: &Journal) -> Vec<String> {
    journal.lock().unwrap().clone()
}

/// An activity that records its calls and fails on demand.
pub struct Recorded {
    pub name: String,
    pub journal: Journal,
    pub fail_execute: bool,
    pub fail_compensate: bool,
}

impl Recorded {
    pub fn ok(name: &str, journal: &Journal) -> Self {
        Self {
            name: name.to_string(),
            journal: journal.clone(),
            fail_execute: false,
            fail_compensate: false,
        }
    }

    pub fn failing(mut self) -> Self {
        self.fail_execute = true;
        self
    }

    pub fn failing_compensation(mut self) -> Self {
        self.fail_compensate = true;
        self
    }
}

impl Activity for Recorded {
    fn name(&self) -> &str {
        &self.name
    }

    fn execute(&self, ctx: &ActivityContext<'_>) -> Result<Value, ActivityError> {
        self.journal.lock().unwrap().push(format!("do:{}", self.name));
        if self.fail_execute {
            return Err(ActivityError::new(format!("{} unavailable", self.name)));
        }
        Ok(json!({ "instance": ctx.instance.id.to_string() }))
    }

    fn compensate(&self, _ctx: &ActivityContext<'_>, _output: &Value) -> Result<(), ActivityError> {
        self.journal.lock().unwrap().push(format!("undo:{}", self.name));
        if self.fail_compensate {
            return Err(ActivityError::new(format!("{} cannot be undone", self.name)));
        }
        Ok(())
    }
}
