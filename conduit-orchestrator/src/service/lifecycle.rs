//! Pipeline run state machine
//!
//! The only code allowed to write a run's `status`, `started_at` and
//! `finished_at`. Valid edges:
//!
//! ```text
//! Pending  --submit accepted-->        Queued
//! Queued   --started-->                Running
//! Running  --succeeded-->              Succeeded
//! Running  --failed-->                 Failed
//! Running  --transient provider error--> Retrying --requeued--> Queued
//! Retrying --terminal provider error--> Failed
//! Pending | Queued --terminal provider error--> Failed
//! Pending | Queued | Running | Retrying --cancel acknowledged--> Canceled
//! Failed | Canceled --retry--> new run in Pending
//! ```

use chrono::{DateTime, Utc};
use conduit_core::domain::run::{PipelineRun, RunStatus, Stage};
use thiserror::Error;

/// Something that happened to a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunEvent {
    SubmitAccepted,
    Started,
    Succeeded,
    Failed { reason: String },
    CancelAcknowledged,
    TransientError { reason: String },
    /// Resubmitted after a transient failure under a new backend handle
    Requeued { handle: String },
}

impl RunEvent {
    pub fn name(&self) -> &'static str {
        match self {
            RunEvent::SubmitAccepted => "submit-accepted",
            RunEvent::Started => "started",
            RunEvent::Succeeded => "succeeded",
            RunEvent::Failed { .. } => "failed",
            RunEvent::CancelAcknowledged => "cancel",
            RunEvent::TransientError { .. } => "transient-error",
            RunEvent::Requeued { .. } => "requeue",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("cannot apply {event} to a run in status {from}")]
pub struct TransitionError {
    pub from: RunStatus,
    pub event: &'static str,
}

/// A recorded status change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: RunStatus,
    pub to: RunStatus,
}

/// Target status of `event` from `from`, if the edge exists
pub fn next_status(from: RunStatus, event: &RunEvent) -> Option<RunStatus> {
    use RunStatus::*;

    match (from, event) {
        (Pending, RunEvent::SubmitAccepted) => Some(Queued),
        (Queued, RunEvent::Started) => Some(Running),
        (Running, RunEvent::Succeeded) => Some(Succeeded),
        (Pending | Queued | Running | Retrying, RunEvent::Failed { .. }) => Some(Failed),
        (Pending | Queued | Running | Retrying, RunEvent::CancelAcknowledged) => Some(Canceled),
        (Running, RunEvent::TransientError { .. }) => Some(Retrying),
        (Retrying, RunEvent::Requeued { .. }) => Some(Queued),
        _ => None,
    }
}

/// Applies `event` to `run`, leaving it untouched when the edge does not exist
pub fn apply(
    run: &mut PipelineRun,
    event: RunEvent,
    now: DateTime<Utc>,
) -> Result<Transition, TransitionError> {
    let from = run.status;
    let to = next_status(from, &event).ok_or(TransitionError {
        from,
        event: event.name(),
    })?;

    match event {
        RunEvent::Started => {
            if run.started_at.is_none() {
                run.started_at = Some(now);
            }
        }
        RunEvent::Failed { reason } | RunEvent::TransientError { reason } => {
            run.status_message = Some(reason);
        }
        RunEvent::Requeued { handle } => {
            run.external_handle = handle;
            run.requeue_count += 1;
            run.stages = run.config_snapshot.stage_plan();
        }
        _ => {}
    }

    run.status = to;
    if to.is_terminal() {
        run.finished_at = Some(now);
    }

    Ok(Transition { from, to })
}

/// Events that walk a run from its current status to what the backend reports
///
/// Progress that skips states (a queued run observed as finished) is
/// replayed edge by edge. Returns nothing when the observation implies no
/// forward move, including every observation about a `Retrying` run, whose
/// backend handle is stale until it is requeued.
pub fn reconcile(from: RunStatus, observed: RunStatus, message: Option<&str>) -> Vec<RunEvent> {
    use RunStatus::*;

    let reach_running = |events: &mut Vec<RunEvent>| match from {
        Pending => events.extend([RunEvent::SubmitAccepted, RunEvent::Started]),
        Queued => events.push(RunEvent::Started),
        _ => {}
    };

    let mut events = Vec::new();
    match (from, observed) {
        (Retrying, _) | (Succeeded | Failed | Canceled, _) => {}
        (Pending, Queued) => events.push(RunEvent::SubmitAccepted),
        (_, Queued | Pending | Retrying) => {}
        (_, Running) => reach_running(&mut events),
        (_, Succeeded) => {
            reach_running(&mut events);
            events.push(RunEvent::Succeeded);
        }
        (_, Failed) => {
            reach_running(&mut events);
            events.push(RunEvent::Failed {
                reason: message.unwrap_or("provider reported failure").to_string(),
            });
        }
        (_, Canceled) => events.push(RunEvent::CancelAcknowledged),
    }
    events
}

/// Whether a new run may be created from `run`
pub fn ensure_retryable(run: &PipelineRun) -> Result<(), TransitionError> {
    match run.status {
        RunStatus::Failed | RunStatus::Canceled => Ok(()),
        from => Err(TransitionError {
            from,
            event: "retry",
        }),
    }
}

/// New `Pending` run carrying the original's snapshot verbatim
///
/// The original run is not modified.
pub fn retry_from(original: &PipelineRun) -> Result<PipelineRun, TransitionError> {
    ensure_retryable(original)?;

    let mut run = PipelineRun::new(
        original.workspace_id.clone(),
        original.provider.clone(),
        original.config_snapshot.clone(),
        "",
    );
    run.retry_of = Some(original.id);
    Ok(run)
}

/// Merges backend stage/task detail into the run's stage list
///
/// Tasks are matched by stage and task name; stages or tasks the backend
/// reports that the plan does not know about are appended.
pub fn merge_stages(run: &mut PipelineRun, reported: &[Stage]) -> bool {
    let mut changed = false;

    for reported_stage in reported {
        match run.stages.iter_mut().find(|s| s.name == reported_stage.name) {
            Some(stage) => {
                for reported_task in &reported_stage.tasks {
                    match stage.tasks.iter_mut().find(|t| t.name == reported_task.name) {
                        Some(task) if task != reported_task => {
                            *task = reported_task.clone();
                            changed = true;
                        }
                        Some(_) => {}
                        None => {
                            stage.tasks.push(reported_task.clone());
                            changed = true;
                        }
                    }
                }
            }
            None => {
                run.stages.push(reported_stage.clone());
                changed = true;
            }
        }
    }

    changed
}
