//! Property tests: consensus strategies agree with their definitions on
//! arbitrary ballots and never report proceed and reject at once.

use proptest::prelude::*;
use workflow_engine::{ApprovalEngine, Ballot, Verdict};
use workflow_types::*;

// ---------------------------------------------------------------------------
// Strategies
// ---------------------------------------------------------------------------

fn arb_decision() -> impl Strategy<Value = VoteDecision> {
    prop_oneof![
        Just(VoteDecision::Approve),
        Just(VoteDecision::Reject),
        Just(VoteDecision::Abstain),
    ]
}

/// Between one and nine seats, and a decision for a prefix of them.
fn arb_ballot() -> impl Strategy<Value = (usize, Vec<VoteDecision>)> {
    (1usize..10).prop_flat_map(|seats| (Just(seats), prop::collection::vec(arb_decision(), 0..=seats)))
}

fn seat_names(seats: usize) -> Vec<String> {
    (0..seats).map(|n| format!("seat-{n}")).collect()
}

fn ballot(seats: usize, decisions: &[VoteDecision]) -> Ballot {
    let names = seat_names(seats);
    decisions
        .iter()
        .zip(&names)
        .fold(Ballot::new(names.clone()), |ballot, (decision, name)| {
            ballot.with_vote(name.as_str(), *decision)
        })
}

fn count(decisions: &[VoteDecision], wanted: VoteDecision) -> usize {
    decisions.iter().filter(|d| **d == wanted).count()
}

// ---------------------------------------------------------------------------
// Properties
// ---------------------------------------------------------------------------

proptest! {
    #[test]
    fn builtins_never_both_proceed_and_reject(
        (seats, decisions) in arb_ballot(),
        quorum in 1u32..10,
        threshold in 1u64..20,
    ) {
        let engine = ApprovalEngine::with_builtin_strategies();
        let names = seat_names(seats);
        let weighted: Vec<(String, u64)> = names
            .iter()
            .enumerate()
            .map(|(n, name)| (name.clone(), n as u64 + 1))
            .collect();
        let configs = [
            ApprovalConfig::unison(names.clone()),
            ApprovalConfig::majority(names.clone()),
            ApprovalConfig::quorum(quorum, names.clone()),
            ApprovalConfig::weighted(threshold, weighted),
            ApprovalConfig::first(names.clone()),
        ];
        let ballot = ballot(seats, &decisions);
        for config in &configs {
            let proceed = engine.can_proceed(&config.strategy, &ballot, config).unwrap();
            let reject = engine.should_reject(&config.strategy, &ballot, config).unwrap();
            prop_assert!(!(proceed && reject), "{} reported both", config.strategy);
        }
    }

    #[test]
    fn unison_proceeds_only_when_everyone_approves((seats, decisions) in arb_ballot()) {
        let engine = ApprovalEngine::with_builtin_strategies();
        let config = ApprovalConfig::unison(seat_names(seats));
        let verdict = engine.verdict(&config.strategy, &ballot(seats, &decisions), &config).unwrap();

        let approvals = count(&decisions, VoteDecision::Approve);
        let rejections = count(&decisions, VoteDecision::Reject);
        let expected = if approvals == seats {
            Verdict::Proceed
        } else if rejections > 0 {
            Verdict::Reject
        } else {
            Verdict::Pending
        };
        prop_assert_eq!(verdict, expected);
    }

    #[test]
    fn majority_needs_more_than_half((seats, decisions) in arb_ballot()) {
        let engine = ApprovalEngine::with_builtin_strategies();
        let config = ApprovalConfig::majority(seat_names(seats));
        let verdict = engine.verdict(&config.strategy, &ballot(seats, &decisions), &config).unwrap();

        let approvals = count(&decisions, VoteDecision::Approve);
        let rejections = count(&decisions, VoteDecision::Reject);
        prop_assert_eq!(verdict == Verdict::Proceed, approvals * 2 > seats);
        if approvals * 2 <= seats {
            prop_assert_eq!(verdict == Verdict::Reject, rejections * 2 > seats);
        }
    }

    #[test]
    fn quorum_rejects_exactly_when_out_of_reach(
        (seats, decisions) in arb_ballot(),
        quorum in 1u32..10,
    ) {
        let engine = ApprovalEngine::with_builtin_strategies();
        let config = ApprovalConfig::quorum(quorum, seat_names(seats));
        let verdict = engine.verdict(&config.strategy, &ballot(seats, &decisions), &config).unwrap();

        let approvals = count(&decisions, VoteDecision::Approve);
        let uncast = seats - decisions.len();
        let required = quorum as usize;
        let expected = if approvals >= required {
            Verdict::Proceed
        } else if approvals + uncast < required {
            Verdict::Reject
        } else {
            Verdict::Pending
        };
        prop_assert_eq!(verdict, expected);
    }

    #[test]
    fn first_follows_the_first_decisive_vote((seats, decisions) in arb_ballot()) {
        let engine = ApprovalEngine::with_builtin_strategies();
        let config = ApprovalConfig::first(seat_names(seats));
        let verdict = engine.verdict(&config.strategy, &ballot(seats, &decisions), &config).unwrap();

        let expected = match decisions.iter().find(|d| **d != VoteDecision::Abstain) {
            Some(VoteDecision::Approve) => Verdict::Proceed,
            Some(_) => Verdict::Reject,
            None => Verdict::Pending,
        };
        prop_assert_eq!(verdict, expected);
    }

    #[test]
    fn a_decided_unison_or_quorum_ballot_stays_decided(
        (seats, decisions) in arb_ballot(),
        extra in arb_decision(),
        quorum in 1u32..10,
    ) {
        // adding a vote for an uncast seat never flips a verdict
        prop_assume!(decisions.len() < seats);
        let engine = ApprovalEngine::with_builtin_strategies();
        let names = seat_names(seats);
        let before = ballot(seats, &decisions);
        let after = before.clone().with_vote(names[decisions.len()].as_str(), extra);

        for config in [
            ApprovalConfig::unison(names.clone()),
            ApprovalConfig::quorum(quorum, names.clone()),
        ] {
            let was = engine.verdict(&config.strategy, &before, &config).unwrap();
            let now = engine.verdict(&config.strategy, &after, &config).unwrap();
            if was != Verdict::Pending {
                prop_assert_eq!(was, now);
            }
        }
    }
}
