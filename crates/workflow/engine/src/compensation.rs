//! Compensation engine: saga-style side effects for transitions
//!
//! A transition may name activities (reserve budget, notify the vendor,
//! ...). They run forward in order when the transition commits. If one
//! fails, the activities that already ran are compensated in strictly
//! reverse order. A failing compensation does not stop the sweep; every
//! failure is collected and reported together.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use workflow_types::*;

/// Failure reported by an activity's execute or compensate step
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct ActivityError(pub String);

impl ActivityError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// What an activity sees when it runs
#[derive(Clone, Copy, Debug)]
pub struct ActivityContext<'a> {
    pub instance: &'a WorkflowInstance,
    pub transition: &'a str,
    pub actor: &'a ActorId,
}

/// A side effect with a compensating action
pub trait Activity: Send + Sync {
    /// Name transitions refer to this activity by
    fn name(&self) -> &str;

    /// Perform the side effect; the output is handed back to `compensate`
    fn execute(&self, ctx: &ActivityContext<'_>) -> Result<Value, ActivityError>;

    /// Undo the side effect
    fn compensate(&self, ctx: &ActivityContext<'_>, output: &Value) -> Result<(), ActivityError>;
}

/// An activity that ran, with its output
#[derive(Clone, Debug, PartialEq)]
pub struct ExecutedActivity {
    pub name: String,
    pub output: Value,
}

/// Name → activity lookup
#[derive(Clone, Default)]
pub struct ActivityRegistry {
    activities: HashMap<String, Arc<dyn Activity>>,
}

impl ActivityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an activity, replacing any previous one with the same name
    pub fn register(&mut self, activity: impl Activity + 'static) {
        let name = activity.name().to_string();
        tracing::debug!(activity = %name, "Activity registered");
        self.activities.insert(name, Arc::new(activity));
    }

    pub fn get(&self, name: &str) -> WorkflowResult<&dyn Activity> {
        self.activities
            .get(name)
            .map(|a| a.as_ref())
            .ok_or_else(|| WorkflowError::UnknownActivity(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.activities.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.activities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.activities.is_empty()
    }
}

impl std::fmt::Debug for ActivityRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&String> = self.activities.keys().collect();
        names.sort();
        f.debug_struct("ActivityRegistry")
            .field("activities", &names)
            .finish()
    }
}

/// Runs activities forward and compensates them in reverse
#[derive(Clone, Debug, Default)]
pub struct CompensationEngine {
    registry: ActivityRegistry,
}

impl CompensationEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_registry(registry: ActivityRegistry) -> Self {
        Self { registry }
    }

    pub fn register(&mut self, activity: impl Activity + 'static) {
        self.registry.register(activity);
    }

    pub fn registry(&self) -> &ActivityRegistry {
        &self.registry
    }

    /// Execute activities in order; on failure, roll back what ran
    ///
    /// Every name is resolved before anything executes. Returns
    /// `ActivityFailed` when the rollback was clean and
    /// `CompensationPartialFailure` when some undo step failed.
    pub fn run(
        &self,
        ctx: &ActivityContext<'_>,
        activities: &[String],
    ) -> WorkflowResult<Vec<ExecutedActivity>> {
        let resolved = activities
            .iter()
            .map(|name| self.registry.get(name))
            .collect::<WorkflowResult<Vec<_>>>()?;

        let mut executed = Vec::with_capacity(resolved.len());
        for activity in resolved {
            match activity.execute(ctx) {
                Ok(output) => executed.push(ExecutedActivity {
                    name: activity.name().to_string(),
                    output,
                }),
                Err(e) => {
                    tracing::warn!(
                        instance_id = %ctx.instance.id,
                        activity = %activity.name(),
                        error = %e,
                        "Activity failed, compensating"
                    );
                    self.compensate(ctx, &executed)?;
                    return Err(WorkflowError::ActivityFailed {
                        activity: activity.name().to_string(),
                        reason: e.to_string(),
                    });
                }
            }
        }
        Ok(executed)
    }

    /// Compensate executed activities in strictly reverse order
    ///
    /// Failures do not stop the sweep. All of them are reported in one
    /// `CompensationPartialFailure`.
    pub fn compensate(
        &self,
        ctx: &ActivityContext<'_>,
        executed: &[ExecutedActivity],
    ) -> WorkflowResult<()> {
        let mut failures = Vec::new();

        for done in executed.iter().rev() {
            let result = self
                .registry
                .get(&done.name)
                .map_err(|e| e.to_string())
                .and_then(|activity| {
                    activity
                        .compensate(ctx, &done.output)
                        .map_err(|e| e.to_string())
                });

            if let Err(reason) = result {
                tracing::warn!(
                    instance_id = %ctx.instance.id,
                    activity = %done.name,
                    reason = %reason,
                    "Compensation step failed"
                );
                failures.push(CompensationFailure {
                    activity: done.name.clone(),
                    reason,
                });
            }
        }

        if failures.is_empty() {
            tracing::debug!(
                instance_id = %ctx.instance.id,
                compensated = executed.len(),
                "Compensation complete"
            );
            Ok(())
        } else {
            Err(WorkflowError::CompensationPartialFailure { failures })
        }
    }
}
