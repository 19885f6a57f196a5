//! SLA evaluation: deadline status and escalation selection
//!
//! Evaluation is pure. It reads a task, the current time and a calendar,
//! and reports where the task stands and which escalation (if any) is
//! due. Acting on the escalation is the manager's job; recording the
//! fired threshold on the task keeps repeated checks idempotent.

use crate::calendar::{BusinessCalendar, ContinuousCalendar};
use chrono::{DateTime, Utc};
use workflow_types::*;

/// An escalation the evaluator selected for a breached task
#[derive(Clone, Debug, PartialEq)]
pub struct PlannedEscalation {
    /// Threshold bucket, in seconds since the task opened
    pub threshold_secs: u64,
    pub action: EscalationAction,
    pub target: Option<String>,
    pub message: String,
}

/// Where a task stands against its SLA
#[derive(Clone, Debug, PartialEq)]
pub struct SlaReport {
    pub status: SlaStatus,
    /// SLA time consumed so far
    pub elapsed_secs: u64,
    /// SLA time left before the deadline (zero once breached)
    pub remaining_secs: u64,
    pub due_at: Option<DateTime<Utc>>,
    /// Escalation to fire now, if the task is breached and it has not fired
    pub escalation: Option<PlannedEscalation>,
}

impl SlaReport {
    fn untracked() -> Self {
        Self {
            status: SlaStatus::OnTrack,
            elapsed_secs: 0,
            remaining_secs: 0,
            due_at: None,
            escalation: None,
        }
    }
}

/// Computes deadlines and SLA status
#[derive(Clone, Debug)]
pub struct SlaEvaluator {
    at_risk_ratio: f64,
}

impl SlaEvaluator {
    pub fn new(at_risk_ratio: f64) -> Self {
        Self { at_risk_ratio }
    }

    /// When a task opened at `start` is due
    pub fn deadline(
        &self,
        sla: &SlaConfiguration,
        start: DateTime<Utc>,
        calendar: &dyn BusinessCalendar,
    ) -> DateTime<Utc> {
        clock_for(sla, calendar).add_duration(start, sla.duration_secs)
    }

    /// Status of a task at `now`
    pub fn status(
        &self,
        task: &Task,
        now: DateTime<Utc>,
        calendar: &dyn BusinessCalendar,
    ) -> SlaReport {
        let Some(sla) = &task.sla else {
            return SlaReport::untracked();
        };
        let due_at = task
            .due_at
            .unwrap_or_else(|| self.deadline(sla, task.created_at, calendar));
        let elapsed = clock_for(sla, calendar).elapsed_secs(task.created_at, now);

        let status = if now >= due_at {
            SlaStatus::Breached
        } else if elapsed as f64 >= self.at_risk_ratio * sla.duration_secs as f64 {
            SlaStatus::AtRisk
        } else {
            SlaStatus::OnTrack
        };

        let escalation = if status.is_breached() && task.is_open() {
            select_escalation(task, sla, elapsed, now)
        } else {
            None
        };

        SlaReport {
            status,
            elapsed_secs: elapsed,
            remaining_secs: sla.duration_secs.saturating_sub(elapsed),
            due_at: Some(due_at),
            escalation,
        }
    }
}

impl Default for SlaEvaluator {
    fn default() -> Self {
        Self::new(0.8)
    }
}

fn clock_for<'a>(
    sla: &SlaConfiguration,
    calendar: &'a dyn BusinessCalendar,
) -> &'a dyn BusinessCalendar {
    if sla.use_business_hours {
        calendar
    } else {
        &ContinuousCalendar
    }
}

/// Highest qualifying rule; `on_breach_action` stands in at the SLA
/// duration when no rule qualifies. Nothing if that bucket already fired.
fn select_escalation(
    task: &Task,
    sla: &SlaConfiguration,
    elapsed: u64,
    now: DateTime<Utc>,
) -> Option<PlannedEscalation> {
    let best = sla
        .escalation_rules
        .iter()
        .filter_map(|rule| {
            let bucket = match &rule.threshold {
                EscalationThreshold::Elapsed { secs } => (*secs <= elapsed).then_some(*secs)?,
                EscalationThreshold::Absolute { at } => {
                    if *at > now {
                        return None;
                    }
                    at.signed_duration_since(task.created_at)
                        .num_seconds()
                        .max(0) as u64
                }
            };
            Some((bucket, rule))
        })
        .max_by_key(|(bucket, _)| *bucket);

    let planned = match best {
        Some((threshold_secs, rule)) => PlannedEscalation {
            threshold_secs,
            action: rule.action,
            target: rule.target.clone(),
            message: rule.message.clone(),
        },
        None => PlannedEscalation {
            threshold_secs: sla.duration_secs,
            action: sla.on_breach_action?,
            target: None,
            message: String::new(),
        },
    };

    if task.has_fired(planned.threshold_secs) {
        None
    } else {
        Some(planned)
    }
}
