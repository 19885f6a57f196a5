//! End-to-end test: delegated seats vote with the delegator's standing.

use crate::common::*;
use workflow_engine::ports::templates;
use workflow_engine::*;
use workflow_types::*;

#[test]
fn test_delegate_takes_over_the_seat() {
    let h = Harness::new();
    let def = h.purchase_orders(ApprovalConfig::unison(["alice", "bob"]));
    let order = h.submitted_order(&def, "PO-20", 5_000);
    let task = h.request_approval(&order);

    let delegated = h.manager.delegate(&task.id, &actor("alice"), &actor("dave")).unwrap();
    assert_eq!(delegated.assignees, vec![actor("dave"), actor("bob")]);
    assert_eq!(h.notifier.sent_to(&actor("dave")).len(), 1);
    assert_eq!(
        h.notifier.sent_to(&actor("dave"))[0].template_id,
        templates::TASK_ASSIGNED
    );

    let err = h
        .manager
        .cast_vote(&task.id, &actor("alice"), VoteDecision::Approve, None)
        .unwrap_err();
    assert!(matches!(err, WorkflowError::UnauthorizedTaskAction { .. }));

    h.manager
        .cast_vote(&task.id, &actor("dave"), VoteDecision::Approve, None)
        .unwrap();
    let task = h.manager.get_task(&task.id).unwrap();
    assert_eq!(task.votes[0].actor, actor("dave"));
    assert_eq!(task.votes[0].on_behalf_of, actor("alice"));

    let outcome = h
        .manager
        .cast_vote(&task.id, &actor("bob"), VoteDecision::Approve, None)
        .unwrap();
    assert!(matches!(outcome, VoteOutcome::Approved { .. }));
}

#[test]
fn test_delegated_vote_keeps_original_weight() {
    let h = Harness::new();
    let def = h.purchase_orders(ApprovalConfig::weighted(
        5,
        [("alice", 5), ("bob", 1), ("carol", 1)],
    ));
    let order = h.submitted_order(&def, "PO-21", 5_000);
    let task = h.request_approval(&order);

    h.manager.delegate(&task.id, &actor("alice"), &actor("dave")).unwrap();
    let outcome = h
        .manager
        .cast_vote(&task.id, &actor("dave"), VoteDecision::Approve, None)
        .unwrap();
    let instance = outcome.instance().unwrap();
    assert_eq!(instance.current_state, StateId::new("approved"));
}

#[test]
fn test_delegation_rules() {
    let h = Harness::new();
    let def = h.purchase_orders(ApprovalConfig::majority(["alice", "bob", "carol"]));
    let order = h.submitted_order(&def, "PO-22", 5_000);
    let task = h.request_approval(&order);

    let err = h.manager.delegate(&task.id, &actor("zed"), &actor("dave")).unwrap_err();
    assert!(matches!(err, WorkflowError::UnauthorizedTaskAction { .. }));

    let err = h.manager.delegate(&task.id, &actor("alice"), &actor("alice")).unwrap_err();
    assert!(matches!(err, WorkflowError::InvalidDelegation(_)));

    let err = h.manager.delegate(&task.id, &actor("alice"), &actor("bob")).unwrap_err();
    assert!(matches!(err, WorkflowError::InvalidDelegation(_)));

    h.manager
        .cast_vote(&task.id, &actor("carol"), VoteDecision::Approve, None)
        .unwrap();
    let err = h.manager.delegate(&task.id, &actor("carol"), &actor("dave")).unwrap_err();
    assert!(matches!(err, WorkflowError::InvalidDelegation(_)));
}

#[test]
fn test_delegation_depth_is_bounded() {
    let h = Harness::with_config(EngineConfig {
        max_delegation_depth: 2,
        ..EngineConfig::default()
    });
    let def = h.purchase_orders(ApprovalConfig::first(["alice"]));
    let order = h.submitted_order(&def, "PO-23", 5_000);
    let task = h.request_approval(&order);

    h.manager.delegate(&task.id, &actor("alice"), &actor("b1")).unwrap();
    h.manager.delegate(&task.id, &actor("b1"), &actor("b2")).unwrap();
    let err = h.manager.delegate(&task.id, &actor("b2"), &actor("b3")).unwrap_err();
    assert!(matches!(err, WorkflowError::DelegationChainExceeded { max: 2, .. }));

    let task = h.manager.get_task(&task.id).unwrap();
    assert_eq!(task.original_assignee(&actor("b2")), actor("alice"));
}

#[test]
fn test_resolved_task_cannot_be_delegated() {
    let h = Harness::new();
    let def = h.purchase_orders(ApprovalConfig::first(["alice", "bob"]));
    let order = h.submitted_order(&def, "PO-24", 5_000);
    let task = h.request_approval(&order);

    h.manager
        .cast_vote(&task.id, &actor("bob"), VoteDecision::Approve, None)
        .unwrap();
    let err = h.manager.delegate(&task.id, &actor("alice"), &actor("dave")).unwrap_err();
    assert!(matches!(err, WorkflowError::TaskAlreadyResolved(_)));
}
