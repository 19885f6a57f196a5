//! End-to-end test: a purchase order from draft to ordered, through a
//! multi-party approval.

use crate::common::*;
use serde_json::json;
use workflow_engine::ports::templates;
use workflow_engine::*;
use workflow_types::*;

#[test]
fn test_majority_approval_reaches_approved() {
    let mut h = Harness::new();
    let log = journal();
    h.manager.register_activity(Recorded::ok("reserve_budget", &log));
    h.manager.register_activity(Recorded::ok("send_po", &log));

    let def = h.purchase_orders(ApprovalConfig::majority(["alice", "bob", "carol"]));
    let order = h.submitted_order(&def, "PO-1", 5_000);
    assert_eq!(order.current_state, StateId::new("submitted"));

    let task = h.request_approval(&order);
    assert_eq!(task.assignees.len(), 3);
    assert_eq!(h.notifier.with_template(templates::TASK_ASSIGNED).len(), 3);
    // requesting approval leaves the instance where it was
    let unchanged = h.manager.get_instance(&order.id).unwrap();
    assert_eq!(unchanged.current_state, StateId::new("submitted"));
    assert_eq!(unchanged.lock_version, order.lock_version);

    let first = h
        .manager
        .cast_vote(&task.id, &actor("alice"), VoteDecision::Approve, None)
        .unwrap();
    assert!(matches!(first, VoteOutcome::Recorded { .. }));

    let second = h
        .manager
        .cast_vote(&task.id, &actor("bob"), VoteDecision::Approve, Some("within budget".into()))
        .unwrap();
    let VoteOutcome::Approved { task: resolved, instance } = second else {
        panic!("expected the second approval to decide the task");
    };
    assert_eq!(resolved.resolution, Some(TaskResolution::Approved));
    assert_eq!(instance.current_state, StateId::new("approved"));
    let record = instance.last_transition().unwrap();
    assert_eq!(record.transition, "approve");
    assert_eq!(record.actor, actor("bob"));
    assert_eq!(record.comment.as_deref(), Some("within budget"));

    let late = h
        .manager
        .cast_vote(&task.id, &actor("carol"), VoteDecision::Reject, None)
        .unwrap_err();
    assert!(matches!(late, WorkflowError::TaskAlreadyResolved(_)));

    let placed = h
        .manager
        .apply(TransitionRequest::new(order.id.clone(), "place_order", "buyer"))
        .unwrap();
    let instance = placed.instance().unwrap();
    assert_eq!(instance.current_state, StateId::new("ordered"));
    assert_eq!(instance.status, InstanceStatus::Completed);
    assert!(instance.closed_at.is_some());
    assert_eq!(entries(&log), vec!["do:reserve_budget", "do:send_po"]);

    let completed = h.notifier.with_template(templates::WORKFLOW_COMPLETED);
    assert_eq!(completed.len(), 1);
    assert_eq!(completed[0].recipient, actor("requester"));

    let path: Vec<&str> = instance.history.iter().map(|r| r.transition.as_str()).collect();
    assert_eq!(path, vec!["submit", "approve", "place_order"]);
}

#[test]
fn test_rejection_moves_to_rejection_state() {
    let h = Harness::new();
    let def = h.purchase_orders(ApprovalConfig::unison(["alice", "bob"]));
    let order = h.submitted_order(&def, "PO-2", 5_000);
    let task = h.request_approval(&order);

    let outcome = h
        .manager
        .cast_vote(&task.id, &actor("bob"), VoteDecision::Reject, Some("no budget".into()))
        .unwrap();
    let VoteOutcome::Rejected { instance, task } = outcome else {
        panic!("expected rejection");
    };
    assert_eq!(task.resolution, Some(TaskResolution::Rejected));
    assert_eq!(instance.current_state, StateId::new("rejected"));
    assert!(instance.is_terminal());
    assert_eq!(instance.last_transition().unwrap().transition, "rejected:approve");

    let resolved = h.notifier.with_template(templates::TASK_RESOLVED);
    assert_eq!(resolved.len(), 1);
    assert_eq!(resolved[0].recipient, actor("requester"));
}

#[test]
fn test_guards_use_instance_data() {
    let h = Harness::new();
    let def = h.purchase_orders(ApprovalConfig::first(["alice"]));

    let empty = h
        .manager
        .instantiate(&def, "purchase_order", "PO-3", "requester", data(json!({ "amount": 0 })))
        .unwrap();
    let err = h
        .manager
        .apply(TransitionRequest::new(empty.id.clone(), "submit", "requester"))
        .unwrap_err();
    assert!(matches!(err, WorkflowError::GuardConditionFailed { .. }));

    let small = h.submitted_order(&def, "PO-4", 500);
    let large = h.submitted_order(&def, "PO-5", 50_000);
    assert_eq!(
        h.manager.available_transitions(&small.id).unwrap(),
        vec!["approve", "fast_track", "withdraw"]
    );
    assert_eq!(
        h.manager.available_transitions(&large.id).unwrap(),
        vec!["approve", "withdraw"]
    );

    let fast = h
        .manager
        .apply(TransitionRequest::new(small.id.clone(), "fast_track", "requester"))
        .unwrap();
    assert_eq!(fast.instance().unwrap().current_state, StateId::new("approved"));

    let err = h
        .manager
        .apply(TransitionRequest::new(large.id.clone(), "fast_track", "requester"))
        .unwrap_err();
    assert!(matches!(err, WorkflowError::GuardConditionFailed { .. }));

    // data updates feed later guard evaluations
    h.manager
        .update_data(&large.id, data(json!({ "amount": 800 })), None)
        .unwrap();
    assert!(h
        .manager
        .apply(TransitionRequest::new(large.id.clone(), "fast_track", "requester"))
        .unwrap()
        .is_committed());
}

#[test]
fn test_invalid_transitions_are_refused() {
    let h = Harness::new();
    let def = h.purchase_orders(ApprovalConfig::first(["alice"]));
    let order = h.submitted_order(&def, "PO-6", 100);

    let err = h
        .manager
        .apply(TransitionRequest::new(order.id.clone(), "place_order", "buyer"))
        .unwrap_err();
    assert!(matches!(err, WorkflowError::InvalidTransition { .. }));

    let err = h
        .manager
        .apply(TransitionRequest::new(order.id.clone(), "teleport", "buyer"))
        .unwrap_err();
    assert!(matches!(err, WorkflowError::InvalidTransition { .. }));

    let after = h.manager.get_instance(&order.id).unwrap();
    assert_eq!(after.current_state, StateId::new("submitted"));
    assert_eq!(after.lock_version, order.lock_version);
}

#[test]
fn test_one_live_instance_per_subject() {
    let h = Harness::new();
    let def = h.purchase_orders(ApprovalConfig::first(["alice"]));
    let order = h.submitted_order(&def, "PO-7", 100);

    let err = h
        .manager
        .instantiate(&def, "purchase_order", "PO-7", "someone", Default::default())
        .unwrap_err();
    assert!(matches!(err, WorkflowError::DuplicateInstance { .. }));

    // a different subject type with the same id is unrelated
    h.manager
        .instantiate(&def, "invoice", "PO-7", "someone", Default::default())
        .unwrap();

    h.manager
        .apply(TransitionRequest::new(order.id.clone(), "withdraw", "requester"))
        .unwrap();
    h.manager
        .instantiate(&def, "purchase_order", "PO-7", "someone", Default::default())
        .unwrap();
}

#[test]
fn test_open_task_blocks_other_transitions() {
    let h = Harness::new();
    let def = h.purchase_orders(ApprovalConfig::majority(["alice", "bob", "carol"]));
    let order = h.submitted_order(&def, "PO-8", 5_000);
    let task = h.request_approval(&order);

    let err = h
        .manager
        .apply(TransitionRequest::new(order.id.clone(), "withdraw", "requester"))
        .unwrap_err();
    assert!(matches!(err, WorkflowError::ApprovalPending(ref id) if *id == task.id));

    // asking again returns the same task instead of opening another
    let again = h.request_approval(&order);
    assert_eq!(again.id, task.id);
    assert_eq!(h.notifier.with_template(templates::TASK_ASSIGNED).len(), 3);
}

#[test]
fn test_voting_rules() {
    let h = Harness::new();
    let def = h.purchase_orders(ApprovalConfig::majority(["alice", "bob", "requester"]));
    let order = h.submitted_order(&def, "PO-9", 5_000);
    let task = h.request_approval(&order);

    let err = h
        .manager
        .cast_vote(&task.id, &actor("mallory"), VoteDecision::Approve, None)
        .unwrap_err();
    assert!(matches!(err, WorkflowError::UnauthorizedTaskAction { .. }));

    let err = h
        .manager
        .cast_vote(&task.id, &actor("requester"), VoteDecision::Approve, None)
        .unwrap_err();
    assert!(matches!(err, WorkflowError::SelfApproval { .. }));

    // the requester may still abstain on their own request
    h.manager
        .cast_vote(&task.id, &actor("requester"), VoteDecision::Abstain, None)
        .unwrap();

    h.manager
        .cast_vote(&task.id, &actor("alice"), VoteDecision::Approve, None)
        .unwrap();
    let err = h
        .manager
        .cast_vote(&task.id, &actor("alice"), VoteDecision::Approve, None)
        .unwrap_err();
    assert!(matches!(err, WorkflowError::AlreadyVoted { .. }));

    let err = h
        .manager
        .cast_vote(&TaskId::new("missing"), &actor("alice"), VoteDecision::Approve, None)
        .unwrap_err();
    assert!(matches!(err, WorkflowError::TaskNotFound(_)));
}

#[test]
fn test_self_approval_when_allowed() {
    let h = Harness::new();
    let def = h.purchase_orders(ApprovalConfig::first(["requester", "alice"]).allowing_self_approval());
    let order = h.submitted_order(&def, "PO-10", 5_000);
    let task = h.request_approval(&order);

    let outcome = h
        .manager
        .cast_vote(&task.id, &actor("requester"), VoteDecision::Approve, None)
        .unwrap();
    assert!(matches!(outcome, VoteOutcome::Approved { .. }));
}

#[test]
fn test_role_assignees_are_resolved() {
    let h = Harness::new();
    let def = h.purchase_orders(ApprovalConfig::first(Vec::<String>::new()).with_role("finance"));
    let order = h.submitted_order(&def, "PO-11", 5_000);
    let task = h.request_approval(&order);

    assert_eq!(task.assignees, vec![actor("dana"), actor("erin")]);
    let pending = h.manager.pending_tasks_for(&actor("erin")).unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, task.id);
}

#[test]
fn test_deadlock_needs_an_operator() {
    let h = Harness::new();
    let def = h.purchase_orders(ApprovalConfig::majority(["alice", "bob"]));
    let order = h.submitted_order(&def, "PO-12", 5_000);
    let task = h.request_approval(&order);

    h.manager
        .cast_vote(&task.id, &actor("alice"), VoteDecision::Approve, None)
        .unwrap();
    let err = h
        .manager
        .cast_vote(&task.id, &actor("bob"), VoteDecision::Reject, None)
        .unwrap_err();
    assert!(matches!(err, WorkflowError::ApprovalDeadlock(_)));
    assert!(err.requires_intervention());

    // both votes are kept and the task stays open
    let stuck = h.manager.get_task(&task.id).unwrap();
    assert_eq!(stuck.votes.len(), 2);
    assert!(stuck.is_open());

    let err = h
        .manager
        .resolve_task_manually(&task.id, &actor("alice"), TaskResolution::Approved, None)
        .unwrap_err();
    assert!(matches!(err, WorkflowError::UnauthorizedTaskAction { .. }));

    let outcome = h
        .manager
        .resolve_task_manually(
            &task.id,
            &actor("ops"),
            TaskResolution::Approved,
            Some("tie broken by finance".into()),
        )
        .unwrap();
    let instance = outcome.instance().unwrap();
    assert_eq!(instance.current_state, StateId::new("approved"));
    assert_eq!(instance.last_transition().unwrap().actor, actor("ops"));
}

#[test]
fn test_cancel_suspend_and_resume() {
    let h = Harness::new();
    let def = h.purchase_orders(ApprovalConfig::majority(["alice", "bob", "carol"]));

    let order = h.submitted_order(&def, "PO-13", 5_000);
    let task = h.request_approval(&order);
    let cancelled = h
        .manager
        .cancel_instance(&order.id, &actor("requester"), Some("duplicate order".into()))
        .unwrap();
    assert_eq!(cancelled.status, InstanceStatus::Cancelled);
    let task = h.manager.get_task(&task.id).unwrap();
    assert_eq!(task.resolution, Some(TaskResolution::Cancelled));
    assert!(h.manager.pending_tasks_for(&actor("alice")).unwrap().is_empty());
    let err = h
        .manager
        .cancel_instance(&order.id, &actor("requester"), None)
        .unwrap_err();
    assert!(matches!(err, WorkflowError::WorkflowLocked(_)));

    let other = h.submitted_order(&def, "PO-14", 200);
    h.manager.suspend_instance(&other.id, &actor("ops")).unwrap();
    let err = h
        .manager
        .apply(TransitionRequest::new(other.id.clone(), "fast_track", "requester"))
        .unwrap_err();
    assert!(matches!(err, WorkflowError::WorkflowLocked(_)));
    // a suspended instance still owns its subject
    let err = h
        .manager
        .instantiate(&def, "purchase_order", "PO-14", "someone", Default::default())
        .unwrap_err();
    assert!(matches!(err, WorkflowError::DuplicateInstance { .. }));

    h.manager.resume_instance(&other.id, &actor("ops")).unwrap();
    assert!(h
        .manager
        .apply(TransitionRequest::new(other.id.clone(), "fast_track", "requester"))
        .unwrap()
        .is_committed());
}

#[test]
fn test_unknown_definition_and_strategy() {
    let h = Harness::new();
    let err = h
        .manager
        .instantiate(&WorkflowDefinitionId::new("nope"), "po", "1", "a", Default::default())
        .unwrap_err();
    assert!(matches!(err, WorkflowError::DefinitionNotFound(_)));

    let mut bespoke = ApprovalConfig::new("dictator");
    bespoke.assignees.push(actor("alice"));
    let err = h
        .manager
        .register_definition(purchase_order_definition(bespoke, None))
        .unwrap_err();
    assert!(matches!(err, WorkflowError::UnknownStrategy(_)));
}

#[test]
fn test_draft_to_approved_with_three_approvers() {
    let h = Harness::new();
    let mut def = WorkflowDefinition::new("PurchaseOrder").with_rejection_state("rejected");
    def.add_state(WorkflowState::initial("draft")).unwrap();
    def.add_state(WorkflowState::intermediate("pending_approval")).unwrap();
    def.add_state(WorkflowState::terminal("approved")).unwrap();
    def.add_state(WorkflowState::terminal("rejected")).unwrap();
    def.add_transition(Transition::new("submit", ["draft"], "pending_approval"))
        .unwrap();
    def.add_transition(
        Transition::new("approve", ["pending_approval"], "approved")
            .with_approval(ApprovalConfig::majority(["ann", "ben", "cat"])),
    )
    .unwrap();
    let def_id = h.manager.register_definition(def).unwrap();

    let po = h
        .manager
        .instantiate(&def_id, "PurchaseOrder", "PO-1", "clerk", Default::default())
        .unwrap();
    assert_eq!(po.current_state, StateId::new("draft"));

    let submitted = h
        .manager
        .apply(TransitionRequest::new(po.id.clone(), "submit", "clerk"))
        .unwrap();
    assert_eq!(
        submitted.instance().unwrap().current_state,
        StateId::new("pending_approval")
    );
    let task = h
        .manager
        .apply(TransitionRequest::new(po.id.clone(), "approve", "clerk"))
        .unwrap()
        .task()
        .cloned()
        .unwrap();
    assert_eq!(task.assignees.len(), 3);

    h.manager
        .cast_vote(&task.id, &actor("ann"), VoteDecision::Approve, None)
        .unwrap();
    let outcome = h
        .manager
        .cast_vote(&task.id, &actor("ben"), VoteDecision::Approve, None)
        .unwrap();
    assert_eq!(outcome.instance().unwrap().current_state, StateId::new("approved"));
    assert_eq!(outcome.task().status, TaskStatus::Completed);

    let err = h
        .manager
        .cast_vote(&task.id, &actor("cat"), VoteDecision::Approve, None)
        .unwrap_err();
    assert!(matches!(err, WorkflowError::TaskAlreadyResolved(_)));
}

#[test]
fn test_decided_task_is_withdrawn_when_its_guard_no_longer_holds() {
    let h = Harness::new();
    let mut def = purchase_order_definition(ApprovalConfig::first(["alice", "bob"]), None);
    def.transitions
        .iter_mut()
        .filter(|t| t.name == "approve")
        .for_each(|t| t.guard = Some("amount < 10000".into()));
    let def = h.manager.register_definition(def).unwrap();
    let order = h.submitted_order(&def, "PO-77", 5_000);
    let task = h.request_approval(&order);

    h.manager
        .update_data(&order.id, data(json!({ "amount": 50_000 })), None)
        .unwrap();
    let err = h
        .manager
        .cast_vote(&task.id, &actor("alice"), VoteDecision::Approve, None)
        .unwrap_err();
    assert!(matches!(err, WorkflowError::GuardConditionFailed { .. }));

    let task = h.manager.get_task(&task.id).unwrap();
    assert_eq!(task.status, TaskStatus::Cancelled);
    assert_eq!(task.resolution, Some(TaskResolution::Cancelled));

    // the instance is not held by the dead task
    let instance = h.manager.get_instance(&order.id).unwrap();
    assert_eq!(instance.current_state, StateId::new("submitted"));
    assert!(h
        .manager
        .apply(TransitionRequest::new(order.id.clone(), "withdraw", "requester"))
        .unwrap()
        .is_committed());
}
