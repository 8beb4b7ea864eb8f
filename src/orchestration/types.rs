//! # Orchestration Types
//!
//! Reports produced by edition runs and their phases.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::ItemCounts;
use crate::state_machine::EndingState;

/// Outcome of one edition task invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRunResult {
    pub task_id: i64,
    pub sequence: i32,
    pub extension_name: String,
    pub success: bool,
    pub continue_on_failure: bool,
    pub message: Option<String>,
    pub elapsed_ms: i64,
    /// Reference id of the task log entry written for this run
    pub log_reference_id: i64,
}

impl TaskRunResult {
    /// A failed task that stops the pre-task phase
    pub fn is_gate_failure(&self) -> bool {
        !self.success && !self.continue_on_failure
    }
}

/// Results of a pre- or post-task phase
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskPhaseResult {
    pub results: Vec<TaskRunResult>,
    /// The failed task that stopped the phase, if any
    pub gate: Option<TaskRunResult>,
}

impl TaskPhaseResult {
    pub fn failures(&self) -> usize {
        self.results.iter().filter(|r| !r.success).count()
    }

    pub fn is_gated(&self) -> bool {
        self.gate.is_some()
    }
}

/// Outcome of one content list inside an edition run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentListReport {
    pub content_list_id: i64,
    pub content_list_name: Option<String>,
    pub sequence: i32,
    pub delivery_context_id: i64,
    pub items_dispatched: usize,
    /// Error code and message when the list failed
    pub error_code: Option<String>,
    pub error: Option<String>,
}

impl ContentListReport {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// Outcome of handing work items to assembly
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchOutcome {
    pub dispatched: usize,
    pub batches: usize,
    /// Dispatch stopped early because the job was cancelled
    pub cancelled: bool,
}

/// Summary of a finished edition run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EditionRunReport {
    pub job_id: i64,
    pub edition_id: i64,
    pub ending_state: EndingState,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub pre_tasks: TaskPhaseResult,
    pub post_tasks: TaskPhaseResult,
    pub post_tasks_skipped: bool,
    pub content_lists: Vec<ContentListReport>,
    /// UNPUBLISH items dispatched from the resolver for automatic editions
    pub unpublish_dispatched: usize,
    pub items_dispatched: usize,
    /// Counts at finalization; later callbacks update the job row, not this report
    pub counts: ItemCounts,
    pub abort_reason: Option<String>,
}

impl EditionRunReport {
    pub fn content_lists_run(&self) -> usize {
        self.content_lists.len()
    }

    pub fn content_list_failures(&self) -> usize {
        self.content_lists.iter().filter(|l| !l.succeeded()).count()
    }
}

/// A recovered orphaned job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveredJob {
    pub job_id: i64,
    pub edition_id: i64,
    pub ending_state: EndingState,
    pub items_cancelled: u64,
}
