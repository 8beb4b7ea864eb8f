//! # Edition Task Runner
//!
//! Runs pre- and post-tasks in ascending signed sequence order. Every execution is
//! written to the task log whatever its outcome; `continue_on_failure` only decides
//! whether a failing pre-task stops the phase.

use std::time::Instant;

use tracing::debug;

use crate::constants::events as event_names;
use crate::error::PublisherResult;
use crate::events::{EditionTaskEvent, EventPublisher};
use crate::extensions::{TaskContext, TaskOutcome};
use crate::logging::log_task_operation;
use crate::models::{EditionTaskDef, NewEditionTaskLog};
use crate::registry::ExtensionCache;
use crate::tracking::StatusTracker;

use super::types::{TaskPhaseResult, TaskRunResult};

/// Whether a failing task ends the phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskPhase {
    /// Stops at the first failure of a task without `continue_on_failure`
    Pre,
    /// Runs every task
    Post,
}

#[derive(Debug, Clone)]
pub struct EditionTaskRunner {
    tracker: StatusTracker,
    event_publisher: EventPublisher,
}

impl EditionTaskRunner {
    pub fn new(tracker: StatusTracker) -> Self {
        let event_publisher = tracker.event_publisher().clone();
        Self {
            tracker,
            event_publisher,
        }
    }

    /// Run `tasks`, which must already be in execution order
    pub async fn run_phase(
        &self,
        phase: TaskPhase,
        tasks: &[EditionTaskDef],
        cache: &ExtensionCache,
        context: &TaskContext,
    ) -> PublisherResult<TaskPhaseResult> {
        let mut outcome = TaskPhaseResult::default();
        for task in tasks {
            let result = self.run_task(task, cache, context).await?;
            let gated = phase == TaskPhase::Pre && result.is_gate_failure();
            outcome.results.push(result.clone());
            if gated {
                debug!(
                    job_id = context.job_id,
                    task_id = task.task_id,
                    "Pre-task failure stops the edition"
                );
                outcome.gate = Some(result);
                break;
            }
        }
        Ok(outcome)
    }

    /// Invoke one task and record its log entry
    ///
    /// An unresolvable extension or an `Err` from the task counts as a failed run.
    pub async fn run_task(
        &self,
        task: &EditionTaskDef,
        cache: &ExtensionCache,
        context: &TaskContext,
    ) -> PublisherResult<TaskRunResult> {
        let started = Instant::now();
        let outcome = match cache.edition_task(&task.extension_name) {
            Ok(extension) => match extension.perform(&task.params, context).await {
                Ok(outcome) => outcome,
                Err(e) => TaskOutcome::failure(e.to_string()),
            },
            Err(e) => TaskOutcome::failure(e.to_string()),
        };
        let elapsed_ms = i64::try_from(started.elapsed().as_millis()).unwrap_or(i64::MAX);

        let log = self
            .tracker
            .log_task(NewEditionTaskLog {
                job_id: context.job_id,
                edition_id: context.edition_id,
                task_id: task.task_id,
                elapsed_ms,
                success: outcome.success,
                message: outcome.message.clone(),
            })
            .await?;

        log_task_operation(
            context.job_id,
            task.task_id,
            &task.extension_name,
            outcome.success,
            elapsed_ms,
            outcome.message.as_deref(),
        );

        if !outcome.success {
            let payload = EditionTaskEvent {
                job_id: context.job_id,
                task_id: task.task_id,
                extension_name: task.extension_name.clone(),
                continue_on_failure: task.continue_on_failure,
                message: outcome.message.clone(),
            };
            if let Err(e) = self
                .event_publisher
                .publish_payload(event_names::EDITION_TASK_FAILED, &payload)
                .await
            {
                debug!(job_id = context.job_id, error = %e, "Failed to publish task failure event");
            }
        }

        Ok(TaskRunResult {
            task_id: task.task_id,
            sequence: task.sequence,
            extension_name: task.extension_name.clone(),
            success: outcome.success,
            continue_on_failure: task.continue_on_failure,
            message: outcome.message,
            elapsed_ms,
            log_reference_id: log.reference_id,
        })
    }
}
