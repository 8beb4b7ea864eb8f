//! # Publishing Status Model
//!
//! One [`PubStatus`] row exists per job execution. It is created in the `STARTED`
//! state before any task or content list work begins, finalized exactly once with an
//! ending state, and carries item counts that are recomputed (never accumulated) from
//! the job's item log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::state_machine::EndingState;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PubStatus {
    /// The job id
    pub status_id: i64,
    pub edition_id: i64,
    pub pub_server_id: Option<i64>,
    pub start_date: DateTime<Utc>,
    pub end_date: Option<DateTime<Utc>>,
    pub ending_state: EndingState,
    pub delivered_count: i64,
    pub removed_count: i64,
    pub failed_count: i64,
    pub hidden: bool,
    /// Identity of the server process that owns the job
    pub server_identity: String,
}

impl PubStatus {
    /// A freshly started job
    pub fn started(
        status_id: i64,
        edition_id: i64,
        pub_server_id: Option<i64>,
        start_date: DateTime<Utc>,
        server_identity: impl Into<String>,
    ) -> Self {
        Self {
            status_id,
            edition_id,
            pub_server_id,
            start_date,
            end_date: None,
            ending_state: EndingState::Started,
            delivered_count: 0,
            removed_count: 0,
            failed_count: 0,
            hidden: false,
            server_identity: server_identity.into(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.ending_state == EndingState::Started
    }

    pub fn counts(&self) -> ItemCounts {
        ItemCounts {
            delivered: self.delivered_count,
            removed: self.removed_count,
            failed: self.failed_count,
        }
    }

    pub fn apply_counts(&mut self, counts: ItemCounts) {
        self.delivered_count = counts.delivered;
        self.removed_count = counts.removed;
        self.failed_count = counts.failed;
    }
}

/// Item outcome counts derived from a job's item log
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemCounts {
    /// Successful publish operations
    pub delivered: i64,
    /// Successful unpublish operations
    pub removed: i64,
    pub failed: i64,
}

/// Filter for job history queries
///
/// Site filtering joins through the job's edition. `max_count` keeps the most recent
/// jobs (by start date) when more match.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PubStatusFilter {
    pub edition_id: Option<i64>,
    pub site_id: Option<i64>,
    pub pub_server_id: Option<i64>,
    pub ending_state: Option<EndingState>,
    pub server_identity: Option<String>,
    pub started_after: Option<DateTime<Utc>>,
    pub started_before: Option<DateTime<Utc>>,
    pub max_count: Option<usize>,
}

impl PubStatusFilter {
    pub fn for_edition(edition_id: i64) -> Self {
        Self {
            edition_id: Some(edition_id),
            ..Default::default()
        }
    }

    pub fn for_site(site_id: i64) -> Self {
        Self {
            site_id: Some(site_id),
            ..Default::default()
        }
    }

    pub fn between(mut self, from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        self.started_after = Some(from);
        self.started_before = Some(to);
        self
    }

    pub fn limit(mut self, max_count: usize) -> Self {
        self.max_count = Some(max_count);
        self
    }

    /// Whether a job row satisfies every non-site criterion
    pub fn matches(&self, status: &PubStatus) -> bool {
        self.edition_id.map_or(true, |id| status.edition_id == id)
            && self
                .pub_server_id
                .map_or(true, |id| status.pub_server_id == Some(id))
            && self.ending_state.map_or(true, |s| status.ending_state == s)
            && self
                .server_identity
                .as_ref()
                .map_or(true, |identity| &status.server_identity == identity)
            && self.started_after.map_or(true, |from| status.start_date >= from)
            && self.started_before.map_or(true, |to| status.start_date <= to)
    }
}
