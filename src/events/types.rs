//! Payloads carried by lifecycle events.

use serde::{Deserialize, Serialize};

use crate::models::ItemCounts;
use crate::state_machine::EndingState;

/// Payload of `job.*` events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobLifecycleEvent {
    pub job_id: i64,
    pub edition_id: i64,
    pub ending_state: EndingState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub counts: Option<ItemCounts>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl JobLifecycleEvent {
    pub fn new(job_id: i64, edition_id: i64, ending_state: EndingState) -> Self {
        Self {
            job_id,
            edition_id,
            ending_state,
            counts: None,
            reason: None,
        }
    }

    pub fn with_counts(mut self, counts: ItemCounts) -> Self {
        self.counts = Some(counts);
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

/// Payload of `content_list.*` events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentListEvent {
    pub job_id: i64,
    pub content_list_id: i64,
    pub content_list_name: String,
    pub item_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Payload of `edition_task.*` events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EditionTaskEvent {
    pub job_id: i64,
    pub task_id: i64,
    pub extension_name: String,
    pub continue_on_failure: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}
