//! End-to-end test: transition activities roll back in reverse order.

use crate::common::*;
use workflow_engine::*;
use workflow_types::*;

fn approved_order(h: &Harness) -> WorkflowInstance {
    let def = h.purchase_orders(ApprovalConfig::first(["alice"]));
    let order = h.submitted_order(&def, "PO-40", 500);
    h.manager
        .apply(TransitionRequest::new(order.id.clone(), "fast_track", "requester"))
        .unwrap();
    h.manager.get_instance(&order.id).unwrap()
}

#[test]
fn test_failed_activity_is_compensated() {
    let mut h = Harness::new();
    let log = journal();
    h.manager.register_activity(Recorded::ok("reserve_budget", &log));
    h.manager.register_activity(Recorded::ok("send_po", &log).failing());
    let order = approved_order(&h);

    let err = h
        .manager
        .apply(TransitionRequest::new(order.id.clone(), "place_order", "buyer"))
        .unwrap_err();
    assert!(matches!(err, WorkflowError::ActivityFailed { ref activity, .. } if activity == "send_po"));
    assert_eq!(
        entries(&log),
        vec!["do:reserve_budget", "do:send_po", "undo:reserve_budget"]
    );

    let after = h.manager.get_instance(&order.id).unwrap();
    assert_eq!(after.current_state, StateId::new("approved"));
    assert!(after.is_active());
    assert_eq!(after.lock_version, order.lock_version);
}

#[test]
fn test_incomplete_rollback_fails_the_instance() {
    let mut h = Harness::new();
    let log = journal();
    h.manager
        .register_activity(Recorded::ok("reserve_budget", &log).failing_compensation());
    h.manager.register_activity(Recorded::ok("send_po", &log).failing());
    let order = approved_order(&h);

    let err = h
        .manager
        .apply(TransitionRequest::new(order.id.clone(), "place_order", "buyer"))
        .unwrap_err();
    let WorkflowError::CompensationPartialFailure { ref failures } = err else {
        panic!("expected a partial compensation failure, got {err:?}");
    };
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].activity, "reserve_budget");
    assert!(err.requires_intervention());

    let after = h.manager.get_instance(&order.id).unwrap();
    assert_eq!(after.status, InstanceStatus::Failed);
    assert_eq!(after.current_state, StateId::new("approved"));
}

#[test]
fn test_unknown_activity_runs_nothing() {
    let mut h = Harness::new();
    let log = journal();
    h.manager.register_activity(Recorded::ok("reserve_budget", &log));
    let order = approved_order(&h);

    let err = h
        .manager
        .apply(TransitionRequest::new(order.id.clone(), "place_order", "buyer"))
        .unwrap_err();
    assert!(matches!(err, WorkflowError::UnknownActivity(ref name) if name == "send_po"));
    assert!(entries(&log).is_empty());
}

#[test]
fn test_activities_run_when_approval_commits() {
    let mut h = Harness::new();
    let log = journal();
    h.manager.register_activity(Recorded::ok("reserve_budget", &log));
    h.manager.register_activity(Recorded::ok("send_po", &log).failing());

    let mut def = purchase_order_definition(ApprovalConfig::first(["alice"]), None);
    def.transitions
        .iter_mut()
        .filter(|t| t.name == "approve")
        .for_each(|t| t.activities.push("reserve_budget".into()));
    let def = h.manager.register_definition(def).unwrap();
    let order = h.submitted_order(&def, "PO-41", 5_000);
    let task = h.request_approval(&order);
    assert!(entries(&log).is_empty());

    h.manager
        .cast_vote(&task.id, &actor("alice"), VoteDecision::Approve, None)
        .unwrap();
    assert_eq!(entries(&log), vec!["do:reserve_budget"]);
    assert_eq!(
        h.manager.get_instance(&order.id).unwrap().current_state,
        StateId::new("approved")
    );
}

#[test]
fn test_failed_commit_reopens_the_task() {
    let mut h = Harness::new();
    let log = journal();
    h.manager.register_activity(Recorded::ok("send_po", &log).failing());

    let mut def = purchase_order_definition(ApprovalConfig::first(["alice", "bob"]), None);
    def.transitions
        .iter_mut()
        .filter(|t| t.name == "approve")
        .for_each(|t| t.activities.push("send_po".into()));
    let def = h.manager.register_definition(def).unwrap();
    let order = h.submitted_order(&def, "PO-42", 5_000);
    let task = h.request_approval(&order);

    let err = h
        .manager
        .cast_vote(&task.id, &actor("alice"), VoteDecision::Approve, None)
        .unwrap_err();
    assert!(matches!(err, WorkflowError::ActivityFailed { .. }));

    let task = h.manager.get_task(&task.id).unwrap();
    assert!(task.is_open());
    assert!(task.resolution.is_none());
    assert_eq!(
        h.manager.get_instance(&order.id).unwrap().current_state,
        StateId::new("submitted")
    );
}
