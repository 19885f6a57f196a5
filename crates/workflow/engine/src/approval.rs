//! Approval Engine: pluggable consensus strategies
//!
//! A strategy looks at the votes cast on a task and decides whether the
//! gated transition may proceed, must be rejected, or is still pending.
//! Strategies are pure: the same ballot and configuration always give
//! the same verdict, and a verdict is never both proceed and reject.
//!
//! Built-in strategies: unison, majority, quorum, weighted, first.
//! Hosts can register their own under a new name.

use std::collections::HashMap;
use std::sync::Arc;
use workflow_types::*;

// ── Ballot ───────────────────────────────────────────────────────────

/// One assignee seat on a task
#[derive(Clone, Debug, PartialEq)]
pub struct Seat {
    /// Who currently holds the seat
    pub holder: ActorId,
    /// The assignee the seat was originally given to
    pub original: ActorId,
}

/// Everything a strategy needs to decide: the seats and the votes
#[derive(Clone, Debug, Default)]
pub struct Ballot {
    pub seats: Vec<Seat>,
    pub votes: Vec<Vote>,
}

impl Ballot {
    /// A ballot with undelegated seats and no votes
    pub fn new<I, S>(assignees: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            seats: assignees
                .into_iter()
                .map(|a| {
                    let actor = ActorId::new(a);
                    Seat {
                        holder: actor.clone(),
                        original: actor,
                    }
                })
                .collect(),
            votes: Vec::new(),
        }
    }

    /// Snapshot of a task's seats and votes
    pub fn from_task(task: &Task) -> Self {
        Self {
            seats: task
                .assignees
                .iter()
                .map(|a| Seat {
                    holder: a.clone(),
                    original: task.original_assignee(a),
                })
                .collect(),
            votes: task.votes.clone(),
        }
    }

    /// Add a vote cast by the seat's holder
    pub fn with_vote(mut self, actor: impl Into<String>, decision: VoteDecision) -> Self {
        let actor = ActorId::new(actor);
        let original = self
            .seats
            .iter()
            .find(|s| s.holder == actor)
            .map(|s| s.original.clone())
            .unwrap_or_else(|| actor.clone());
        self.votes
            .push(Vote::new(actor, decision, chrono::Utc::now()).on_behalf_of(original));
        self
    }

    pub fn seat_count(&self) -> usize {
        self.seats.len()
    }

    pub fn approvals(&self) -> usize {
        self.count(VoteDecision::Approve)
    }

    pub fn rejections(&self) -> usize {
        self.count(VoteDecision::Reject)
    }

    fn count(&self, decision: VoteDecision) -> usize {
        self.votes.iter().filter(|v| v.decision == decision).count()
    }

    /// Seats whose holder has not voted yet
    pub fn uncast(&self) -> impl Iterator<Item = &Seat> {
        self.seats
            .iter()
            .filter(move |s| !self.votes.iter().any(|v| v.actor == s.holder))
    }

    /// Whether every seat has a vote
    pub fn is_complete(&self) -> bool {
        !self.seats.is_empty() && self.uncast().next().is_none()
    }
}

// ── Verdict ──────────────────────────────────────────────────────────

/// Outcome of a strategy over a ballot
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verdict {
    /// The gated transition may commit
    Proceed,
    /// The gated transition is refused
    Reject,
    /// Not decided yet
    Pending,
}

impl Verdict {
    pub fn is_decided(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// A consensus strategy
pub trait ApprovalStrategy: Send + Sync {
    /// Registry name
    fn name(&self) -> &str;

    /// Whether the ballot carries enough approval to proceed
    fn can_proceed(&self, ballot: &Ballot, config: &ApprovalConfig) -> bool;

    /// Whether the ballot can no longer (or must not) proceed
    fn should_reject(&self, ballot: &Ballot, config: &ApprovalConfig) -> bool;

    /// Proceed wins over reject; a well-formed strategy never reports both
    fn verdict(&self, ballot: &Ballot, config: &ApprovalConfig) -> Verdict {
        if self.can_proceed(ballot, config) {
            Verdict::Proceed
        } else if self.should_reject(ballot, config) {
            Verdict::Reject
        } else {
            Verdict::Pending
        }
    }
}

// ── Built-in strategies ──────────────────────────────────────────────

/// Every assignee must approve; any rejection rejects
#[derive(Clone, Debug, Default)]
pub struct UnisonStrategy;

impl ApprovalStrategy for UnisonStrategy {
    fn name(&self) -> &str {
        strategy_names::UNISON
    }

    fn can_proceed(&self, ballot: &Ballot, _config: &ApprovalConfig) -> bool {
        !ballot.seats.is_empty()
            && ballot.seats.iter().all(|seat| {
                ballot
                    .votes
                    .iter()
                    .any(|v| v.actor == seat.holder && v.decision == VoteDecision::Approve)
            })
    }

    fn should_reject(&self, ballot: &Ballot, _config: &ApprovalConfig) -> bool {
        ballot.rejections() > 0
    }
}

/// Strictly more than half of the seats; ties stay pending
#[derive(Clone, Debug, Default)]
pub struct MajorityStrategy;

impl ApprovalStrategy for MajorityStrategy {
    fn name(&self) -> &str {
        strategy_names::MAJORITY
    }

    fn can_proceed(&self, ballot: &Ballot, _config: &ApprovalConfig) -> bool {
        ballot.approvals() * 2 > ballot.seat_count()
    }

    fn should_reject(&self, ballot: &Ballot, _config: &ApprovalConfig) -> bool {
        ballot.rejections() * 2 > ballot.seat_count()
    }
}

/// A fixed number of approvals; rejects once the quorum is out of reach
#[derive(Clone, Debug, Default)]
pub struct QuorumStrategy;

impl QuorumStrategy {
    /// Configured quorum, every seat when unset, and never below one
    fn required(ballot: &Ballot, config: &ApprovalConfig) -> usize {
        config
            .quorum
            .map(|q| q as usize)
            .unwrap_or_else(|| ballot.seat_count())
            .max(1)
    }
}

impl ApprovalStrategy for QuorumStrategy {
    fn name(&self) -> &str {
        strategy_names::QUORUM
    }

    fn can_proceed(&self, ballot: &Ballot, config: &ApprovalConfig) -> bool {
        ballot.approvals() >= Self::required(ballot, config)
    }

    fn should_reject(&self, ballot: &Ballot, config: &ApprovalConfig) -> bool {
        ballot.approvals() + ballot.uncast().count() < Self::required(ballot, config)
    }
}

/// Approval weight must reach a threshold
///
/// A delegated vote carries the weight of the seat's original assignee.
#[derive(Clone, Debug, Default)]
pub struct WeightedStrategy;

impl WeightedStrategy {
    fn threshold(ballot: &Ballot, config: &ApprovalConfig) -> u64 {
        config.threshold_weight.unwrap_or_else(|| {
            ballot
                .seats
                .iter()
                .map(|s| config.weight_of(&s.original))
                .sum()
        })
    }

    fn approved_weight(ballot: &Ballot, config: &ApprovalConfig) -> u64 {
        ballot
            .votes
            .iter()
            .filter(|v| v.decision == VoteDecision::Approve)
            .map(|v| config.weight_of(&v.on_behalf_of))
            .sum()
    }

    fn uncast_weight(ballot: &Ballot, config: &ApprovalConfig) -> u64 {
        ballot
            .uncast()
            .map(|s| config.weight_of(&s.original))
            .sum()
    }
}

impl ApprovalStrategy for WeightedStrategy {
    fn name(&self) -> &str {
        strategy_names::WEIGHTED
    }

    fn can_proceed(&self, ballot: &Ballot, config: &ApprovalConfig) -> bool {
        Self::approved_weight(ballot, config) >= Self::threshold(ballot, config)
    }

    fn should_reject(&self, ballot: &Ballot, config: &ApprovalConfig) -> bool {
        Self::approved_weight(ballot, config) + Self::uncast_weight(ballot, config)
            < Self::threshold(ballot, config)
    }
}

/// The first decisive vote wins; abstentions are ignored
#[derive(Clone, Debug, Default)]
pub struct FirstStrategy;

impl FirstStrategy {
    fn first_decisive(ballot: &Ballot) -> Option<VoteDecision> {
        ballot
            .votes
            .iter()
            .find(|v| v.is_decisive())
            .map(|v| v.decision)
    }
}

impl ApprovalStrategy for FirstStrategy {
    fn name(&self) -> &str {
        strategy_names::FIRST
    }

    fn can_proceed(&self, ballot: &Ballot, _config: &ApprovalConfig) -> bool {
        Self::first_decisive(ballot) == Some(VoteDecision::Approve)
    }

    fn should_reject(&self, ballot: &Ballot, _config: &ApprovalConfig) -> bool {
        Self::first_decisive(ballot) == Some(VoteDecision::Reject)
    }
}

// ── Engine ───────────────────────────────────────────────────────────

/// Registry of consensus strategies, owned by one engine instance
#[derive(Clone)]
pub struct ApprovalEngine {
    strategies: HashMap<String, Arc<dyn ApprovalStrategy>>,
}

impl ApprovalEngine {
    /// An engine with no strategies
    pub fn new() -> Self {
        Self {
            strategies: HashMap::new(),
        }
    }

    /// An engine with the five built-in strategies registered
    pub fn with_builtin_strategies() -> Self {
        let mut engine = Self::new();
        engine.register_strategy(UnisonStrategy);
        engine.register_strategy(MajorityStrategy);
        engine.register_strategy(QuorumStrategy);
        engine.register_strategy(WeightedStrategy);
        engine.register_strategy(FirstStrategy);
        engine
    }

    /// Register a strategy under its name, replacing any previous one
    pub fn register_strategy(&mut self, strategy: impl ApprovalStrategy + 'static) {
        let name = strategy.name().to_string();
        tracing::debug!(strategy = %name, "Approval strategy registered");
        self.strategies.insert(name, Arc::new(strategy));
    }

    pub fn strategy(&self, name: &str) -> WorkflowResult<&dyn ApprovalStrategy> {
        self.strategies
            .get(name)
            .map(|s| s.as_ref())
            .ok_or_else(|| WorkflowError::UnknownStrategy(name.to_string()))
    }

    pub fn has_strategy(&self, name: &str) -> bool {
        self.strategies.contains_key(name)
    }

    /// Registered strategy names, sorted
    pub fn strategies(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.strategies.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    pub fn can_proceed(
        &self,
        name: &str,
        ballot: &Ballot,
        config: &ApprovalConfig,
    ) -> WorkflowResult<bool> {
        Ok(self.strategy(name)?.can_proceed(ballot, config))
    }

    pub fn should_reject(
        &self,
        name: &str,
        ballot: &Ballot,
        config: &ApprovalConfig,
    ) -> WorkflowResult<bool> {
        Ok(self.strategy(name)?.should_reject(ballot, config))
    }

    pub fn verdict(
        &self,
        name: &str,
        ballot: &Ballot,
        config: &ApprovalConfig,
    ) -> WorkflowResult<Verdict> {
        Ok(self.strategy(name)?.verdict(ballot, config))
    }
}

impl Default for ApprovalEngine {
    fn default() -> Self {
        Self::with_builtin_strategies()
    }
}

impl std::fmt::Debug for ApprovalEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApprovalEngine")
            .field("strategies", &self.strategies())
            .finish()
    }
}
