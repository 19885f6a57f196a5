//! Workflow Manager: the main entry point for the workflow engine
//!
//! The manager composes the engine's components behind the host's ports:
//! 1. Starts instances for subjects
//! 2. Validates and applies transitions (running their activities)
//! 3. Opens approval tasks and collects votes and delegations
//! 4. Evaluates SLAs and fires escalations
//! 5. Offers operator overrides for stuck work
//!
//! Every call is a single read-compute-write cycle against the
//! repositories. Writes are conditional on `lock_version`; a lost race
//! surfaces as `ConcurrentModification` and nothing is overwritten.

use crate::approval::{ApprovalEngine, ApprovalStrategy, Ballot, Verdict};
use crate::calendar::{BusinessCalendar, Clock, SystemClock, WorkingHoursCalendar};
use crate::compensation::{Activity, ActivityContext, CompensationEngine};
use crate::config::EngineConfig;
use crate::memory::{
    InMemoryActorDirectory, InMemoryDefinitionRepository, InMemoryInstanceRepository,
    InMemoryTaskRepository, NoopNotifier,
};
use crate::ports::*;
use crate::sla::{SlaEvaluator, SlaReport};
use crate::state_engine::{StateEngine, TransitionIntent};
use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use workflow_types::*;

// ── Ports bundle ─────────────────────────────────────────────────────

/// The host collaborators a manager runs against
#[derive(Clone)]
pub struct Ports {
    pub definitions: Arc<dyn DefinitionRepository>,
    pub instances: Arc<dyn InstanceRepository>,
    pub tasks: Arc<dyn TaskRepository>,
    pub notifier: Arc<dyn Notifier>,
    pub directory: Arc<dyn ActorDirectory>,
    pub clock: Arc<dyn Clock>,
    pub calendar: Arc<dyn BusinessCalendar>,
}

impl Ports {
    /// In-memory repositories, no notifications, wall-clock time and
    /// default working hours
    pub fn in_memory() -> Self {
        Self {
            definitions: Arc::new(InMemoryDefinitionRepository::new()),
            instances: Arc::new(InMemoryInstanceRepository::new()),
            tasks: Arc::new(InMemoryTaskRepository::new()),
            notifier: Arc::new(NoopNotifier),
            directory: Arc::new(InMemoryActorDirectory::new()),
            clock: Arc::new(SystemClock),
            calendar: Arc::new(WorkingHoursCalendar::default()),
        }
    }

    /// In-memory ports whose calendar follows `config.working_hours`
    pub fn for_config(config: &EngineConfig) -> Self {
        Self::in_memory().with_calendar(Arc::new(WorkingHoursCalendar::new(
            config.working_hours.clone(),
        )))
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_directory(mut self, directory: Arc<dyn ActorDirectory>) -> Self {
        self.directory = directory;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_calendar(mut self, calendar: Arc<dyn BusinessCalendar>) -> Self {
        self.calendar = calendar;
        self
    }
}

// ── Requests and outcomes ────────────────────────────────────────────

/// A request to move an instance along a named transition
#[derive(Clone, Debug)]
pub struct TransitionRequest {
    pub instance_id: WorkflowInstanceId,
    pub transition: String,
    pub actor: ActorId,
    pub comment: Option<String>,
    /// Fail with `ConcurrentModification` unless the instance is at this version
    pub expected_version: Option<u64>,
}

impl TransitionRequest {
    pub fn new(
        instance_id: WorkflowInstanceId,
        transition: impl Into<String>,
        actor: impl Into<String>,
    ) -> Self {
        Self {
            instance_id,
            transition: transition.into(),
            actor: ActorId::new(actor),
            comment: None,
            expected_version: None,
        }
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    pub fn expecting_version(mut self, version: u64) -> Self {
        self.expected_version = Some(version);
        self
    }
}

/// What `apply` did
#[derive(Clone, Debug)]
pub enum TransitionOutcome {
    /// The state change was written
    Committed { instance: WorkflowInstance },
    /// The transition waits for the verdict of this task
    AwaitingApproval { task: Task },
}

impl TransitionOutcome {
    pub fn is_committed(&self) -> bool {
        matches!(self, Self::Committed { .. })
    }

    pub fn task(&self) -> Option<&Task> {
        match self {
            Self::AwaitingApproval { task } => Some(task),
            Self::Committed { .. } => None,
        }
    }

    pub fn instance(&self) -> Option<&WorkflowInstance> {
        match self {
            Self::Committed { instance } => Some(instance),
            Self::AwaitingApproval { .. } => None,
        }
    }
}

/// What a vote (or an automatic decision) did
#[derive(Clone, Debug)]
pub enum VoteOutcome {
    /// Vote stored; no verdict yet
    Recorded { task: Task },
    /// Verdict proceed: the transition committed
    Approved { task: Task, instance: WorkflowInstance },
    /// Verdict reject: the instance moved to its rejection state (or stayed)
    Rejected { task: Task, instance: WorkflowInstance },
    /// The task was withdrawn by an operator
    Cancelled { task: Task },
}

impl VoteOutcome {
    pub fn task(&self) -> &Task {
        match self {
            Self::Recorded { task }
            | Self::Approved { task, .. }
            | Self::Rejected { task, .. }
            | Self::Cancelled { task } => task,
        }
    }

    pub fn instance(&self) -> Option<&WorkflowInstance> {
        match self {
            Self::Approved { instance, .. } | Self::Rejected { instance, .. } => Some(instance),
            Self::Recorded { .. } | Self::Cancelled { .. } => None,
        }
    }
}

/// Scope of an SLA check
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SlaTarget {
    Task(TaskId),
    /// The instance's open task, if it has one
    Instance(WorkflowInstanceId),
}

/// An escalation fired by `check_sla`
#[derive(Clone, Debug)]
pub struct EscalationRecord {
    pub task_id: TaskId,
    pub instance_id: WorkflowInstanceId,
    pub action: EscalationAction,
    pub threshold_secs: u64,
    pub target: Option<String>,
    /// Set when the escalation decided the task
    pub outcome: Option<VoteOutcome>,
}

// ── Manager ──────────────────────────────────────────────────────────

/// The Workflow Manager
pub struct WorkflowManager {
    ports: Ports,
    config: EngineConfig,
    state_engine: StateEngine,
    approvals: ApprovalEngine,
    compensation: CompensationEngine,
    sla: SlaEvaluator,
}

impl WorkflowManager {
    /// Create a manager with the built-in approval strategies
    ///
    /// Business-hours deadlines use `ports.calendar`; build the ports
    /// with [`Ports::for_config`] to follow `config.working_hours`.
    pub fn new(ports: Ports, config: EngineConfig) -> Self {
        let sla = SlaEvaluator::new(config.at_risk_ratio);
        Self {
            ports,
            config,
            state_engine: StateEngine::new(),
            approvals: ApprovalEngine::with_builtin_strategies(),
            compensation: CompensationEngine::new(),
            sla,
        }
    }

    /// In-memory manager with default configuration
    pub fn in_memory() -> Self {
        Self::in_memory_with(EngineConfig::default())
    }

    /// In-memory manager whose calendar follows the configured working hours
    pub fn in_memory_with(config: EngineConfig) -> Self {
        Self::new(Ports::for_config(&config), config)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn ports(&self) -> &Ports {
        &self.ports
    }

    pub fn approvals(&self) -> &ApprovalEngine {
        &self.approvals
    }

    pub fn register_strategy(&mut self, strategy: impl ApprovalStrategy + 'static) {
        self.approvals.register_strategy(strategy);
    }

    pub fn register_activity(&mut self, activity: impl Activity + 'static) {
        self.compensation.register(activity);
    }

    // ── Definitions ──────────────────────────────────────────────────

    /// Validate and store a definition
    ///
    /// Beyond structural validation, every approval strategy must be
    /// registered and every guard must parse.
    pub fn register_definition(
        &self,
        definition: WorkflowDefinition,
    ) -> WorkflowResult<WorkflowDefinitionId> {
        for transition in &definition.transitions {
            if let Some(approval) = &transition.approval {
                self.approvals.strategy(&approval.strategy)?;
            }
            if let Some(guard) = &transition.guard {
                self.state_engine.conditions().validate(guard)?;
            }
        }
        self.ports.definitions.register(definition)
    }

    pub fn get_definition(&self, id: &WorkflowDefinitionId) -> WorkflowResult<WorkflowDefinition> {
        self.ports
            .definitions
            .find(id)?
            .ok_or_else(|| WorkflowError::DefinitionNotFound(id.clone()))
    }

    // ── Instance lifecycle ───────────────────────────────────────────

    /// Start a workflow for a subject in the definition's initial state
    pub fn instantiate(
        &self,
        definition_id: &WorkflowDefinitionId,
        subject_type: impl Into<String>,
        subject_id: impl Into<String>,
        initiator: impl Into<String>,
        data: Map<String, Value>,
    ) -> WorkflowResult<WorkflowInstance> {
        let definition = self.get_definition(definition_id)?;
        let subject = SubjectRef::new(subject_type, subject_id);

        if self
            .ports
            .instances
            .find_active_by_subject(&subject.subject_type, &subject.subject_id)?
            .is_some()
        {
            return Err(WorkflowError::DuplicateInstance {
                subject_type: subject.subject_type,
                subject_id: subject.subject_id,
            });
        }

        let initial = definition
            .initial_state()
            .ok_or(WorkflowError::NoInitialState)?;

        let mut instance = WorkflowInstance::new(
            definition.id.clone(),
            subject,
            initial.id.clone(),
            ActorId::new(initiator),
            self.now(),
        )
        .with_data(data);
        self.ports.instances.save(&mut instance)?;

        tracing::info!(
            instance_id = %instance.id,
            definition = %definition_id,
            subject = %instance.subject,
            "Workflow instance created"
        );
        Ok(instance)
    }

    pub fn get_instance(&self, id: &WorkflowInstanceId) -> WorkflowResult<WorkflowInstance> {
        self.ports
            .instances
            .find(id)?
            .ok_or_else(|| WorkflowError::InstanceNotFound(id.clone()))
    }

    /// Names of the transitions that could fire right now
    pub fn available_transitions(&self, id: &WorkflowInstanceId) -> WorkflowResult<Vec<String>> {
        let instance = self.get_instance(id)?;
        let definition = self.get_definition(&instance.definition_id)?;
        Ok(self
            .state_engine
            .available_transitions(&instance, &definition)
            .into_iter()
            .map(|t| t.name.clone())
            .collect())
    }

    /// Merge values into an instance's data
    pub fn update_data(
        &self,
        id: &WorkflowInstanceId,
        values: Map<String, Value>,
        expected_version: Option<u64>,
    ) -> WorkflowResult<WorkflowInstance> {
        let mut instance = self.get_instance(id)?;
        check_expected(&instance, expected_version)?;
        if instance.is_terminal() {
            return Err(WorkflowError::WorkflowLocked(instance.id.clone()));
        }
        instance.merge_data(values, self.now());
        self.ports.instances.save(&mut instance)?;
        Ok(instance)
    }

    /// Cancel an instance and withdraw its open task
    pub fn cancel_instance(
        &self,
        id: &WorkflowInstanceId,
        actor: &ActorId,
        reason: Option<String>,
    ) -> WorkflowResult<WorkflowInstance> {
        let mut instance = self.get_instance(id)?;
        if instance.is_terminal() {
            return Err(WorkflowError::WorkflowLocked(instance.id.clone()));
        }
        let now = self.now();

        if let Some(mut task) = self.ports.tasks.find_open_for_instance(id)? {
            task.resolve(TaskResolution::Cancelled, now);
            self.ports.tasks.save(&mut task)?;
        }

        instance.cancel(now);
        self.ports.instances.save(&mut instance)?;

        tracing::info!(
            instance_id = %id,
            actor = %actor,
            reason = reason.as_deref().unwrap_or(""),
            "Workflow instance cancelled"
        );
        Ok(instance)
    }

    /// Park an active instance; transitions are refused until resumed
    pub fn suspend_instance(
        &self,
        id: &WorkflowInstanceId,
        actor: &ActorId,
    ) -> WorkflowResult<WorkflowInstance> {
        let mut instance = self.get_instance(id)?;
        if !instance.is_active() {
            return Err(WorkflowError::WorkflowLocked(instance.id.clone()));
        }
        instance.suspend(self.now());
        self.ports.instances.save(&mut instance)?;
        tracing::info!(instance_id = %id, actor = %actor, "Workflow instance suspended");
        Ok(instance)
    }

    pub fn resume_instance(
        &self,
        id: &WorkflowInstanceId,
        actor: &ActorId,
    ) -> WorkflowResult<WorkflowInstance> {
        let mut instance = self.get_instance(id)?;
        if instance.status != InstanceStatus::Suspended {
            return Err(WorkflowError::ValidationError(format!(
                "Instance {} is {}, not suspended",
                id, instance.status
            )));
        }
        instance.resume(self.now());
        self.ports.instances.save(&mut instance)?;
        tracing::info!(instance_id = %id, actor = %actor, "Workflow instance resumed");
        Ok(instance)
    }

    // ── Transitions ──────────────────────────────────────────────────

    /// Request a transition
    ///
    /// Without approval the transition's activities run and the state
    /// change commits. With approval a task is opened and the instance
    /// is left untouched until the task has a verdict.
    pub fn apply(&self, request: TransitionRequest) -> WorkflowResult<TransitionOutcome> {
        let instance = self.get_instance(&request.instance_id)?;
        check_expected(&instance, request.expected_version)?;
        let definition = self.get_definition(&instance.definition_id)?;

        if let Some(task) = self.ports.tasks.find_open_for_instance(&instance.id)? {
            if task.transition == request.transition {
                return Ok(TransitionOutcome::AwaitingApproval { task });
            }
            return Err(WorkflowError::ApprovalPending(task.id));
        }

        let intent = self
            .state_engine
            .apply_transition(&instance, &request.transition, &definition)?;
        let now = self.now();

        if intent.requires_approval {
            let task = self.open_task(&instance, &definition, &intent, &request.actor, now)?;
            return Ok(TransitionOutcome::AwaitingApproval { task });
        }

        let instance = self.commit_intent(
            instance,
            &definition,
            &intent,
            &request.actor,
            request.comment,
            now,
        )?;
        Ok(TransitionOutcome::Committed { instance })
    }

    fn open_task(
        &self,
        instance: &WorkflowInstance,
        definition: &WorkflowDefinition,
        intent: &TransitionIntent,
        requester: &ActorId,
        now: DateTime<Utc>,
    ) -> WorkflowResult<Task> {
        let transition = self.transition_of(definition, &intent.transition, instance)?;
        let approval = approval_of(transition)?;
        self.approvals.strategy(&approval.strategy)?;

        let assignees = self.resolve_assignees(approval)?;
        if assignees.is_empty() {
            return Err(WorkflowError::ValidationError(format!(
                "Transition '{}' resolved to no assignees",
                transition.name
            )));
        }

        let priority = approval.priority.unwrap_or(self.config.default_priority);
        let mut task = Task::new(
            instance.id.clone(),
            definition.id.clone(),
            transition.name.clone(),
            assignees,
            requester.clone(),
            now,
        )
        .with_priority(priority);
        if let Some(sla) = &transition.sla {
            let due = self.sla.deadline(sla, now, self.ports.calendar.as_ref());
            task = task.with_deadline(sla.clone(), due);
        }
        if let Err(e) = self.ports.tasks.save(&mut task) {
            // a racing request opened a task first
            if let WorkflowError::ApprovalPending(winner) = &e {
                let open = self.get_task(winner)?;
                if open.transition == task.transition {
                    return Ok(open);
                }
            }
            return Err(e);
        }

        tracing::info!(
            task_id = %task.id,
            instance_id = %instance.id,
            transition = %task.transition,
            assignees = task.assignees.len(),
            "Approval task opened"
        );

        let data = task_payload(&task, instance);
        for assignee in &task.assignees {
            self.notify(assignee, templates::TASK_ASSIGNED, &data);
        }
        Ok(task)
    }

    /// Explicit assignees first, then role members, without duplicates
    fn resolve_assignees(&self, approval: &ApprovalConfig) -> WorkflowResult<Vec<ActorId>> {
        let mut assignees: Vec<ActorId> = Vec::new();
        for actor in &approval.assignees {
            if !assignees.contains(actor) {
                assignees.push(actor.clone());
            }
        }
        for role in &approval.assignee_roles {
            for actor in self.ports.directory.actors_with_role(role)? {
                if !assignees.contains(&actor) {
                    assignees.push(actor);
                }
            }
        }
        Ok(assignees)
    }

    /// Run activities, write the state change, save conditionally
    ///
    /// A lost save race compensates the activities that ran. An
    /// incomplete rollback fails the instance for an operator.
    fn commit_intent(
        &self,
        mut instance: WorkflowInstance,
        definition: &WorkflowDefinition,
        intent: &TransitionIntent,
        actor: &ActorId,
        comment: Option<String>,
        now: DateTime<Utc>,
    ) -> WorkflowResult<WorkflowInstance> {
        let executed = {
            let ctx = ActivityContext {
                instance: &instance,
                transition: &intent.transition,
                actor,
            };
            self.compensation.run(&ctx, &intent.activities)
        };
        let executed = match executed {
            Ok(executed) => executed,
            Err(e) => {
                if matches!(e, WorkflowError::CompensationPartialFailure { .. }) {
                    self.fail_instance(&mut instance, now);
                }
                return Err(e);
            }
        };

        let snapshot = instance.clone();
        self.state_engine
            .commit(&mut instance, definition, intent, actor, comment, now)?;

        if let Err(save_error) = self.ports.instances.save(&mut instance) {
            let ctx = ActivityContext {
                instance: &snapshot,
                transition: &intent.transition,
                actor,
            };
            if let Err(rollback_error) = self.compensation.compensate(&ctx, &executed) {
                tracing::error!(
                    instance_id = %snapshot.id,
                    error = %save_error,
                    "Save failed and compensation was incomplete"
                );
                return Err(rollback_error);
            }
            return Err(save_error);
        }

        if instance.is_terminal() && self.config.notify_on_completion {
            self.notify(
                &instance.initiator,
                templates::WORKFLOW_COMPLETED,
                &json!({
                    "instance_id": instance.id.to_string(),
                    "subject": instance.subject.to_string(),
                    "state": instance.current_state.to_string(),
                }),
            );
        }
        Ok(instance)
    }

    fn fail_instance(&self, instance: &mut WorkflowInstance, now: DateTime<Utc>) {
        instance.fail(now);
        if let Err(e) = self.ports.instances.save(instance) {
            tracing::error!(
                instance_id = %instance.id,
                error = %e,
                "Could not mark instance failed"
            );
        }
    }

    // ── Tasks ────────────────────────────────────────────────────────

    pub fn get_task(&self, id: &TaskId) -> WorkflowResult<Task> {
        self.ports
            .tasks
            .find(id)?
            .ok_or_else(|| WorkflowError::TaskNotFound(id.clone()))
    }

    /// Open tasks waiting on the actor's vote, most urgent first
    pub fn pending_tasks_for(&self, actor: &ActorId) -> WorkflowResult<Vec<Task>> {
        self.ports.tasks.find_pending_for_actor(actor)
    }

    /// Cast a vote on an open task
    ///
    /// A verdict resolves the task and moves the instance. A complete
    /// ballot without a verdict stores the vote and reports
    /// `ApprovalDeadlock`.
    pub fn cast_vote(
        &self,
        task_id: &TaskId,
        actor: &ActorId,
        decision: VoteDecision,
        comment: Option<String>,
    ) -> WorkflowResult<VoteOutcome> {
        let mut task = self.get_task(task_id)?;
        if !task.is_open() {
            return Err(WorkflowError::TaskAlreadyResolved(task.id));
        }
        if !task.is_assignee(actor) {
            return Err(WorkflowError::UnauthorizedTaskAction {
                task: task.id,
                actor: actor.to_string(),
            });
        }

        let definition = self.get_definition(&task.definition_id)?;
        let transition = definition
            .get_transition(&task.transition)
            .ok_or_else(|| WorkflowError::ValidationError(format!(
                "Transition '{}' no longer exists in definition {}",
                task.transition, definition.id
            )))?;
        let approval = approval_of(transition)?;

        if decision == VoteDecision::Approve
            && !approval.allow_self_approval
            && actor == &task.requested_by
        {
            return Err(WorkflowError::SelfApproval {
                task: task.id,
                actor: actor.to_string(),
            });
        }
        if task.has_voted(actor) {
            return Err(WorkflowError::AlreadyVoted {
                task: task.id,
                actor: actor.to_string(),
            });
        }

        let now = self.now();
        let vote = Vote::new(actor.clone(), decision, now)
            .on_behalf_of(task.original_assignee(actor))
            .with_comment(comment.clone());
        task.record_vote(vote);

        tracing::debug!(
            task_id = %task.id,
            actor = %actor,
            decision = ?decision,
            "Vote recorded"
        );

        let verdict = self
            .approvals
            .verdict(&approval.strategy, &Ballot::from_task(&task), approval)?;
        match verdict {
            Verdict::Proceed => self.finish_approved(task, &definition, actor, comment, now),
            Verdict::Reject => self.finish_rejected(task, &definition, actor, comment, now),
            Verdict::Pending => {
                self.ports.tasks.save(&mut task)?;
                if task.all_voted() {
                    tracing::warn!(
                        task_id = %task.id,
                        strategy = %approval.strategy,
                        "Every assignee voted without a verdict"
                    );
                    return Err(WorkflowError::ApprovalDeadlock(task.id));
                }
                Ok(VoteOutcome::Recorded { task })
            }
        }
    }

    /// Close the task approved and commit its transition
    ///
    /// The task is written first so racing deciders conflict on it. A
    /// failed commit is unwound, see [`Self::unwind`].
    fn finish_approved(
        &self,
        mut task: Task,
        definition: &WorkflowDefinition,
        actor: &ActorId,
        comment: Option<String>,
        now: DateTime<Utc>,
    ) -> WorkflowResult<VoteOutcome> {
        task.resolve(TaskResolution::Approved, now);
        self.ports.tasks.save(&mut task)?;

        let committed = self.get_instance(&task.instance_id).and_then(|instance| {
            let intent = self
                .state_engine
                .apply_transition(&instance, &task.transition, definition)?;
            self.commit_intent(instance, definition, &intent, actor, comment, now)
        });
        let instance = match committed {
            Ok(instance) => instance,
            Err(e) => {
                self.unwind(&mut task, &e, now);
                return Err(e);
            }
        };

        tracing::info!(
            task_id = %task.id,
            instance_id = %instance.id,
            transition = %task.transition,
            "Approval granted"
        );
        self.notify_resolved(&task, &instance);
        Ok(VoteOutcome::Approved { task, instance })
    }

    /// Close the task rejected and move the instance to its rejection
    /// state (transition override, else definition default, else stay)
    fn finish_rejected(
        &self,
        mut task: Task,
        definition: &WorkflowDefinition,
        actor: &ActorId,
        comment: Option<String>,
        now: DateTime<Utc>,
    ) -> WorkflowResult<VoteOutcome> {
        task.resolve(TaskResolution::Rejected, now);
        self.ports.tasks.save(&mut task)?;

        let moved = self.get_instance(&task.instance_id).and_then(|mut instance| {
            let landed = self.state_engine.reject(
                &mut instance,
                definition,
                &task.transition,
                actor,
                comment,
                now,
            )?;
            if landed.is_some() {
                self.ports.instances.save(&mut instance)?;
            }
            Ok(instance)
        });
        let instance = match moved {
            Ok(instance) => instance,
            Err(e) => {
                self.unwind(&mut task, &e, now);
                return Err(e);
            }
        };

        self.notify_resolved(&task, &instance);
        if instance.is_terminal() && self.config.notify_on_completion {
            self.notify(
                &instance.initiator,
                templates::WORKFLOW_COMPLETED,
                &json!({
                    "instance_id": instance.id.to_string(),
                    "subject": instance.subject.to_string(),
                    "state": instance.current_state.to_string(),
                }),
            );
        }
        Ok(VoteOutcome::Rejected { task, instance })
    }

    /// Undo a task resolution after the instance write failed
    ///
    /// Transient failures (a lost write race, storage, a cleanly rolled
    /// back activity) reopen the task with its votes kept. Anything else
    /// means the decided transition can never commit, so the task is
    /// withdrawn and the instance is free for other transitions.
    fn unwind(&self, task: &mut Task, cause: &WorkflowError, now: DateTime<Utc>) {
        let transient = cause.is_retryable()
            || matches!(
                cause,
                WorkflowError::Storage(_) | WorkflowError::ActivityFailed { .. }
            );
        if transient {
            task.reopen(now);
        } else {
            tracing::warn!(
                task_id = %task.id,
                instance_id = %task.instance_id,
                error = %cause,
                "Decided transition cannot commit, withdrawing task"
            );
            task.resolve(TaskResolution::Cancelled, now);
        }
        if let Err(e) = self.ports.tasks.save(task) {
            tracing::error!(task_id = %task.id, error = %e, "Could not unwind task");
        }
    }

    /// Hand an assignee's seat to another actor
    pub fn delegate(&self, task_id: &TaskId, from: &ActorId, to: &ActorId) -> WorkflowResult<Task> {
        let mut task = self.get_task(task_id)?;
        if !task.is_open() {
            return Err(WorkflowError::TaskAlreadyResolved(task.id));
        }
        if !task.is_assignee(from) {
            return Err(WorkflowError::UnauthorizedTaskAction {
                task: task.id,
                actor: from.to_string(),
            });
        }
        if task.has_voted(from) {
            return Err(WorkflowError::InvalidDelegation(format!(
                "'{}' already voted on task {}",
                from, task.id
            )));
        }
        if from == to {
            return Err(WorkflowError::InvalidDelegation(format!(
                "'{}' cannot delegate to themselves",
                from
            )));
        }
        if task.is_assignee(to) {
            return Err(WorkflowError::InvalidDelegation(format!(
                "'{}' is already assigned to task {}",
                to, task.id
            )));
        }
        if task.delegation_chain.len() >= self.config.max_delegation_depth {
            return Err(WorkflowError::DelegationChainExceeded {
                task: task.id,
                max: self.config.max_delegation_depth,
            });
        }

        task.delegate(from, to.clone(), self.now());
        self.ports.tasks.save(&mut task)?;

        tracing::info!(task_id = %task.id, from = %from, to = %to, "Task delegated");
        self.notify(
            to,
            templates::TASK_ASSIGNED,
            &json!({
                "task_id": task.id.to_string(),
                "instance_id": task.instance_id.to_string(),
                "transition": task.transition,
                "delegated_by": from.to_string(),
            }),
        );
        Ok(task)
    }

    /// Operator override: decide or withdraw a task by hand
    ///
    /// Requires the configured override permission.
    pub fn resolve_task_manually(
        &self,
        task_id: &TaskId,
        operator: &ActorId,
        resolution: TaskResolution,
        comment: Option<String>,
    ) -> WorkflowResult<VoteOutcome> {
        if !self
            .ports
            .directory
            .has_permission(operator, &self.config.override_permission)?
        {
            return Err(WorkflowError::UnauthorizedTaskAction {
                task: task_id.clone(),
                actor: operator.to_string(),
            });
        }

        let mut task = self.get_task(task_id)?;
        if !task.is_open() {
            return Err(WorkflowError::TaskAlreadyResolved(task.id));
        }
        let now = self.now();
        tracing::warn!(
            task_id = %task.id,
            operator = %operator,
            resolution = ?resolution,
            "Task resolved by operator"
        );

        match resolution {
            TaskResolution::Cancelled => {
                task.resolve(TaskResolution::Cancelled, now);
                self.ports.tasks.save(&mut task)?;
                Ok(VoteOutcome::Cancelled { task })
            }
            TaskResolution::Approved => {
                let definition = self.get_definition(&task.definition_id)?;
                self.finish_approved(task, &definition, operator, comment, now)
            }
            TaskResolution::Rejected => {
                let definition = self.get_definition(&task.definition_id)?;
                self.finish_rejected(task, &definition, operator, comment, now)
            }
        }
    }

    // ── SLA ──────────────────────────────────────────────────────────

    /// Where a task stands against its SLA; writes nothing
    pub fn sla_status(&self, task_id: &TaskId) -> WorkflowResult<SlaReport> {
        let task = self.get_task(task_id)?;
        Ok(self
            .sla
            .status(&task, self.now(), self.ports.calendar.as_ref()))
    }

    /// Evaluate SLAs and fire at most one due escalation per task
    ///
    /// Idempotent per threshold: a repeated check fires nothing new.
    pub fn check_sla(&self, target: &SlaTarget) -> WorkflowResult<Vec<EscalationRecord>> {
        let tasks = match target {
            SlaTarget::Task(id) => vec![self.get_task(id)?],
            SlaTarget::Instance(id) => {
                let instance = self.get_instance(id)?;
                self.ports
                    .tasks
                    .find_open_for_instance(&instance.id)?
                    .into_iter()
                    .collect()
            }
        };

        let mut fired = Vec::new();
        for task in tasks {
            if let Some(record) = self.escalate(task)? {
                fired.push(record);
            }
        }
        Ok(fired)
    }

    fn escalate(&self, mut task: Task) -> WorkflowResult<Option<EscalationRecord>> {
        if !task.is_open() {
            return Ok(None);
        }
        let now = self.now();
        let report = self.sla.status(&task, now, self.ports.calendar.as_ref());
        let Some(planned) = report.escalation else {
            return Ok(None);
        };

        tracing::warn!(
            task_id = %task.id,
            instance_id = %task.instance_id,
            action = %planned.action,
            threshold_secs = planned.threshold_secs,
            "SLA breached, escalating"
        );

        task.mark_escalated(EscalationMarker {
            threshold_secs: planned.threshold_secs,
            action: planned.action,
            at: now,
        });

        let targets = match &planned.target {
            Some(target) => self.resolve_target(target)?,
            None => Vec::new(),
        };
        let data = json!({
            "task_id": task.id.to_string(),
            "instance_id": task.instance_id.to_string(),
            "transition": task.transition,
            "action": planned.action.to_string(),
            "message": planned.message,
        });

        let outcome = match planned.action {
            EscalationAction::Notify => {
                self.ports.tasks.save(&mut task)?;
                let recipients: Vec<ActorId> = if targets.is_empty() {
                    task.outstanding().into_iter().cloned().collect()
                } else {
                    targets
                };
                for recipient in &recipients {
                    self.notify(recipient, templates::SLA_BREACHED, &data);
                }
                None
            }
            EscalationAction::Reassign => {
                if targets.is_empty() {
                    tracing::warn!(task_id = %task.id, "Reassign escalation has no target");
                } else {
                    task.reassign(targets.clone(), now);
                }
                self.ports.tasks.save(&mut task)?;
                for recipient in &targets {
                    self.notify(recipient, templates::TASK_ASSIGNED, &data);
                }
                None
            }
            EscalationAction::Escalate => {
                for actor in &targets {
                    task.add_assignee(actor.clone(), now);
                }
                task.priority = task.priority.raised();
                self.ports.tasks.save(&mut task)?;
                for recipient in &targets {
                    self.notify(recipient, templates::TASK_ESCALATED, &data);
                }
                None
            }
            EscalationAction::AutoApprove => {
                let definition = self.get_definition(&task.definition_id)?;
                let comment = auto_comment(&planned.message, "approved");
                let system = ActorId::system();
                Some(self.finish_approved(task.clone(), &definition, &system, comment, now)?)
            }
            EscalationAction::AutoReject => {
                let definition = self.get_definition(&task.definition_id)?;
                let comment = auto_comment(&planned.message, "rejected");
                let system = ActorId::system();
                Some(self.finish_rejected(task.clone(), &definition, &system, comment, now)?)
            }
        };

        Ok(Some(EscalationRecord {
            task_id: task.id,
            instance_id: task.instance_id,
            action: planned.action,
            threshold_secs: planned.threshold_secs,
            target: planned.target,
            outcome,
        }))
    }

    /// A role's members, or the target itself as an actor
    fn resolve_target(&self, target: &str) -> WorkflowResult<Vec<ActorId>> {
        let members = self.ports.directory.actors_with_role(&RoleId::new(target))?;
        if members.is_empty() {
            Ok(vec![ActorId::new(target)])
        } else {
            Ok(members)
        }
    }

    // ── Helpers ──────────────────────────────────────────────────────

    fn now(&self) -> DateTime<Utc> {
        self.ports.clock.now()
    }

    fn transition_of<'d>(
        &self,
        definition: &'d WorkflowDefinition,
        name: &str,
        instance: &WorkflowInstance,
    ) -> WorkflowResult<&'d Transition> {
        definition
            .get_transition(name)
            .ok_or_else(|| WorkflowError::InvalidTransition {
                transition: name.to_string(),
                from: instance.current_state.clone(),
            })
    }

    /// Best effort: a failed delivery is logged, never propagated
    fn notify(&self, recipient: &ActorId, template_id: &str, data: &Value) {
        if let Err(e) = self.ports.notifier.notify(recipient, template_id, data) {
            tracing::warn!(
                recipient = %recipient,
                template = template_id,
                error = %e,
                "Notification failed"
            );
        }
    }

    fn notify_resolved(&self, task: &Task, instance: &WorkflowInstance) {
        let data = json!({
            "task_id": task.id.to_string(),
            "instance_id": instance.id.to_string(),
            "transition": task.transition,
            "resolution": task.resolution.map(|r| format!("{:?}", r)),
            "state": instance.current_state.to_string(),
        });
        self.notify(&task.requested_by, templates::TASK_RESOLVED, &data);
    }
}

impl std::fmt::Debug for WorkflowManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowManager")
            .field("config", &self.config)
            .field("approvals", &self.approvals)
            .field("compensation", &self.compensation)
            .finish()
    }
}

fn check_expected(instance: &WorkflowInstance, expected: Option<u64>) -> WorkflowResult<()> {
    match expected {
        Some(expected) if expected != instance.lock_version => {
            Err(WorkflowError::ConcurrentModification {
                entity: format!("instance {}", instance.id),
                expected,
                actual: instance.lock_version,
            })
        }
        _ => Ok(()),
    }
}

fn approval_of(transition: &Transition) -> WorkflowResult<&ApprovalConfig> {
    transition.approval.as_ref().ok_or_else(|| {
        WorkflowError::ValidationError(format!(
            "Transition '{}' does not require approval",
            transition.name
        ))
    })
}

fn task_payload(task: &Task, instance: &WorkflowInstance) -> Value {
    json!({
        "task_id": task.id.to_string(),
        "instance_id": instance.id.to_string(),
        "subject": instance.subject.to_string(),
        "transition": task.transition,
        "requested_by": task.requested_by.to_string(),
        "due_at": task.due_at.map(|d| d.to_rfc3339()),
    })
}

fn auto_comment(message: &str, verdict: &str) -> Option<String> {
    if message.is_empty() {
        Some(format!("Automatically {} after SLA breach", verdict))
    } else {
        Some(message.to_string())
    }
}
