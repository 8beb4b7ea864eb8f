//! Fold of terminal item events into the site item ledger.
//!
//! The item log is the event stream and the ledger is its materialized view. The
//! fold is a pure function of the existing ledger row and one event so that the
//! ordering rule can be tested without a store:
//!
//! - only confirmed delivery outcomes (SUCCESS, FAILURE) are considered
//! - an event from a job that started before the job that last wrote the row is a
//!   straggler and is ignored (last writer by job start time, not by wall clock)
//! - FAILURE never changes what is live
//! - SUCCESS of a PUBLISH makes the row live; SUCCESS of an UNPUBLISH turns it into a
//!   tombstone that keeps the job start time, so an older straggler publish cannot
//!   resurrect it

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{ItemOutcome, ItemStatus, Operation, PubItemStatus, SiteItem, SiteItemKey};

/// A terminal item event together with the start time of the job that produced it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEvent {
    pub row: PubItemStatus,
    pub job_started_at: DateTime<Utc>,
    pub unpublish_info: Option<serde_json::Value>,
}

impl LedgerEvent {
    pub fn from_outcome(
        outcome: &ItemOutcome,
        job_started_at: DateTime<Utc>,
        recorded_at: DateTime<Utc>,
    ) -> Self {
        Self {
            row: PubItemStatus::from_outcome(outcome, recorded_at),
            job_started_at,
            unpublish_info: outcome
                .unpublish_info
                .clone()
                .or_else(|| outcome.item.unpublish_info.clone()),
        }
    }

    pub fn key(&self) -> SiteItemKey {
        SiteItemKey {
            site_id: self.row.site_id,
            pub_server_id: self.row.pub_server_id,
            delivery_context_id: self.row.delivery_context_id,
            content_id: self.row.content_id,
            location: self.row.location.clone(),
        }
    }
}

/// Why the ledger was left untouched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnchangedReason {
    /// The event is not a confirmed delivery outcome
    NotTerminal,
    /// The event comes from a job older than the row's writer
    StaleJob,
    /// Failures never change live state
    Failure,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LedgerDecision {
    Unchanged(UnchangedReason),
    Write(SiteItem),
}

impl LedgerDecision {
    pub fn is_write(&self) -> bool {
        matches!(self, Self::Write(_))
    }
}

/// Whether `event` is older than the job that last wrote `existing`
pub fn is_stale(existing: &SiteItem, event: &LedgerEvent) -> bool {
    if event.job_started_at != existing.job_started_at {
        return event.job_started_at < existing.job_started_at;
    }
    // Same start time: only the same job can still be ordered, by reference id
    existing.job_id == Some(event.row.job_id) && event.row.reference_id < existing.reference_id
}

/// Fold one event into the ledger row stored under the event's key
pub fn fold_site_item(existing: Option<&SiteItem>, event: &LedgerEvent) -> LedgerDecision {
    if !event.row.status.is_delivery_terminal() {
        return LedgerDecision::Unchanged(UnchangedReason::NotTerminal);
    }
    if existing.map_or(false, |row| is_stale(row, event)) {
        return LedgerDecision::Unchanged(UnchangedReason::StaleJob);
    }
    if event.row.status == ItemStatus::Failure {
        return LedgerDecision::Unchanged(UnchangedReason::Failure);
    }

    let row = &event.row;
    let written = match row.operation {
        Operation::Publish => SiteItem {
            reference_id: row.reference_id,
            site_id: row.site_id,
            pub_server_id: row.pub_server_id,
            content_id: row.content_id,
            revision_id: row.revision_id,
            folder_id: row.folder_id,
            template_id: row.template_id,
            delivery_context_id: row.delivery_context_id,
            location: row.location.clone(),
            delivery_type: row.delivery_type.clone(),
            operation: Operation::Publish,
            status: ItemStatus::Success,
            job_id: Some(row.job_id),
            job_started_at: event.job_started_at,
            published_at: row.updated_at,
            unpublish_info: event
                .unpublish_info
                .clone()
                .or_else(|| existing.and_then(|e| e.unpublish_info.clone())),
        },
        Operation::Unpublish => {
            let mut tombstone = match existing {
                Some(current) => current.clone(),
                None => SiteItem {
                    reference_id: row.reference_id,
                    site_id: row.site_id,
                    pub_server_id: row.pub_server_id,
                    content_id: row.content_id,
                    revision_id: row.revision_id,
                    folder_id: row.folder_id,
                    template_id: row.template_id,
                    delivery_context_id: row.delivery_context_id,
                    location: row.location.clone(),
                    delivery_type: row.delivery_type.clone(),
                    operation: Operation::Unpublish,
                    status: ItemStatus::Success,
                    job_id: None,
                    job_started_at: event.job_started_at,
                    published_at: row.updated_at,
                    unpublish_info: None,
                },
            };
            tombstone.reference_id = row.reference_id;
            tombstone.operation = Operation::Unpublish;
            tombstone.status = ItemStatus::Success;
            tombstone.job_id = Some(row.job_id);
            tombstone.job_started_at = event.job_started_at;
            tombstone.published_at = row.updated_at;
            tombstone
        }
    };

    LedgerDecision::Write(written)
}
