//! # Item-Level Publishing Records
//!
//! Two record kinds describe individual publish/unpublish events:
//!
//! - [`PubItemStatus`]: the per-job item log. One row per dispatched work item,
//!   created as `UNDEFINED` at dispatch and moved to a terminal status by delivery
//!   callbacks or cancellation. Rows are never deleted except by a job purge.
//! - [`SiteItem`]: the ledger of what is currently live for a site. Rows are only
//!   written for confirmed terminal delivery outcomes (see [`crate::ledger`]).
//!
//! Both share the reference id, a strictly increasing id allocated at dispatch time,
//! and are joined on it for composite reads ([`PublishedItem`]).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Operation {
    Publish,
    Unpublish,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Publish => "PUBLISH",
            Self::Unpublish => "UNPUBLISH",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Operation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PUBLISH" => Ok(Self::Publish),
            "UNPUBLISH" => Ok(Self::Unpublish),
            _ => Err(format!("Invalid operation: {s}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ItemStatus {
    Success,
    Failure,
    Cancelled,
    /// Dispatched, no outcome yet
    Undefined,
}

impl ItemStatus {
    /// Outcomes `update_publishing_info` writes to the item log
    pub fn is_persistable(&self) -> bool {
        !matches!(self, Self::Undefined)
    }

    /// Confirmed delivery outcomes, the only ones folded into the ledger
    pub fn is_delivery_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failure)
    }

    /// Whether a log row in `existing` may be overwritten with `self`
    ///
    /// A confirmed delivery outcome is only replaced by another confirmed outcome.
    pub fn may_replace(&self, existing: ItemStatus) -> bool {
        !existing.is_delivery_terminal() || self.is_delivery_terminal()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "SUCCESS",
            Self::Failure => "FAILURE",
            Self::Cancelled => "CANCELLED",
            Self::Undefined => "UNDEFINED",
        }
    }
}

impl fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ItemStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SUCCESS" => Ok(Self::Success),
            "FAILURE" => Ok(Self::Failure),
            "CANCELLED" => Ok(Self::Cancelled),
            "UNDEFINED" => Ok(Self::Undefined),
            _ => Err(format!("Invalid item status: {s}")),
        }
    }
}

/// A work item handed to the external assembly/delivery path
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishItem {
    pub reference_id: i64,
    pub job_id: i64,
    pub site_id: i64,
    pub pub_server_id: Option<i64>,
    pub content_id: i64,
    pub revision_id: i64,
    pub folder_id: Option<i64>,
    pub template_id: Option<i64>,
    pub delivery_context_id: i64,
    pub assembly_context_id: Option<i64>,
    pub operation: Operation,
    pub location: Option<String>,
    pub delivery_type: Option<String>,
    /// For unpublish items, the reference id of the publish event being reversed
    pub unpublish_ref_id: Option<i64>,
    /// Opaque payload recorded when the item was published, used to remove it
    pub unpublish_info: Option<serde_json::Value>,
}

/// A delivery callback for one dispatched item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemOutcome {
    pub item: PublishItem,
    pub status: ItemStatus,
    pub elapsed_ms: i64,
    pub message: Option<String>,
    /// Location the delivery handler actually wrote to, when it differs
    pub location: Option<String>,
    /// Payload the delivery handler needs to remove this item later
    pub unpublish_info: Option<serde_json::Value>,
}

impl ItemOutcome {
    pub fn new(item: PublishItem, status: ItemStatus) -> Self {
        Self {
            item,
            status,
            elapsed_ms: 0,
            message: None,
            location: None,
            unpublish_info: None,
        }
    }

    pub fn success(item: PublishItem) -> Self {
        Self::new(item, ItemStatus::Success)
    }

    pub fn failure(item: PublishItem, message: impl Into<String>) -> Self {
        let mut outcome = Self::new(item, ItemStatus::Failure);
        outcome.message = Some(message.into());
        outcome
    }

    pub fn effective_location(&self) -> Option<&str> {
        self.location
            .as_deref()
            .or(self.item.location.as_deref())
    }
}

/// Per-job item log row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PubItemStatus {
    pub reference_id: i64,
    pub job_id: i64,
    pub site_id: i64,
    pub pub_server_id: Option<i64>,
    pub content_id: i64,
    pub revision_id: i64,
    pub folder_id: Option<i64>,
    pub template_id: Option<i64>,
    pub delivery_context_id: i64,
    pub operation: Operation,
    pub status: ItemStatus,
    pub location: Option<String>,
    pub delivery_type: Option<String>,
    pub elapsed_ms: i64,
    pub message: Option<String>,
    pub unpublish_ref_id: Option<i64>,
    pub updated_at: DateTime<Utc>,
}

impl PubItemStatus {
    /// Log row written when an item is handed to delivery
    pub fn dispatched(item: &PublishItem, at: DateTime<Utc>) -> Self {
        Self {
            reference_id: item.reference_id,
            job_id: item.job_id,
            site_id: item.site_id,
            pub_server_id: item.pub_server_id,
            content_id: item.content_id,
            revision_id: item.revision_id,
            folder_id: item.folder_id,
            template_id: item.template_id,
            delivery_context_id: item.delivery_context_id,
            operation: item.operation,
            status: ItemStatus::Undefined,
            location: item.location.clone(),
            delivery_type: item.delivery_type.clone(),
            elapsed_ms: 0,
            message: None,
            unpublish_ref_id: item.unpublish_ref_id,
            updated_at: at,
        }
    }

    /// Log row reflecting a delivery callback
    pub fn from_outcome(outcome: &ItemOutcome, at: DateTime<Utc>) -> Self {
        let mut row = Self::dispatched(&outcome.item, at);
        row.status = outcome.status;
        row.location = outcome.effective_location().map(str::to_string);
        row.elapsed_ms = outcome.elapsed_ms;
        row.message = outcome.message.clone();
        row
    }

    pub fn is_unfinished(&self) -> bool {
        !matches!(self.status, ItemStatus::Success | ItemStatus::Failure)
    }
}

/// Ledger row: an item believed to be live at `location`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SiteItem {
    /// Reference id of the publish event that made this row live
    pub reference_id: i64,
    pub site_id: i64,
    pub pub_server_id: Option<i64>,
    pub content_id: i64,
    pub revision_id: i64,
    /// `FOLDER_MOVED_SENTINEL` once the folder association went stale
    pub folder_id: Option<i64>,
    pub template_id: Option<i64>,
    pub delivery_context_id: i64,
    pub location: Option<String>,
    pub delivery_type: Option<String>,
    pub operation: Operation,
    pub status: ItemStatus,
    /// Job that published the row; stripped when that job's log is purged
    pub job_id: Option<i64>,
    /// Start time of the job that last wrote this row
    pub job_started_at: DateTime<Utc>,
    pub published_at: DateTime<Utc>,
    pub unpublish_info: Option<serde_json::Value>,
}

impl SiteItem {
    pub fn key(&self) -> SiteItemKey {
        SiteItemKey {
            site_id: self.site_id,
            pub_server_id: self.pub_server_id,
            delivery_context_id: self.delivery_context_id,
            content_id: self.content_id,
            location: self.location.clone(),
        }
    }

    pub fn is_live(&self) -> bool {
        self.status == ItemStatus::Success && self.operation == Operation::Publish
    }
}

/// Identity of a ledger row: one live rendition per site, server, context, content and location
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SiteItemKey {
    pub site_id: i64,
    pub pub_server_id: Option<i64>,
    pub delivery_context_id: i64,
    pub content_id: i64,
    pub location: Option<String>,
}

impl SiteItemKey {
    /// Name of the lock that serializes writers of this key, including its first insert
    pub fn lock_name(&self) -> String {
        format!(
            "site_item:{}:{}:{}:{}:{}",
            self.site_id,
            self.pub_server_id.map_or_else(|| "-".to_string(), |id| id.to_string()),
            self.delivery_context_id,
            self.content_id,
            self.location.as_deref().unwrap_or("")
        )
    }

    pub fn for_outcome(outcome: &ItemOutcome) -> Self {
        Self {
            site_id: outcome.item.site_id,
            pub_server_id: outcome.item.pub_server_id,
            delivery_context_id: outcome.item.delivery_context_id,
            content_id: outcome.item.content_id,
            location: outcome.effective_location().map(str::to_string),
        }
    }
}

/// Criteria for ledger reads; `None` fields are not filtered on
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SiteItemQuery {
    pub site_id: Option<i64>,
    pub pub_server_id: Option<i64>,
    /// Match `pub_server_id` exactly, so `None` selects only rows without a server
    #[serde(default)]
    pub exact_server: bool,
    pub delivery_context_id: Option<i64>,
    pub content_id: Option<i64>,
    pub template_id: Option<i64>,
    pub location: Option<String>,
    pub folder_ids: Option<Vec<i64>>,
}

impl SiteItemQuery {
    pub fn for_site(site_id: i64, pub_server_id: Option<i64>) -> Self {
        Self {
            site_id: Some(site_id),
            pub_server_id,
            ..Default::default()
        }
    }

    /// Rows of one site that belong to exactly `pub_server_id`
    pub fn for_server(site_id: i64, pub_server_id: Option<i64>) -> Self {
        Self {
            site_id: Some(site_id),
            pub_server_id,
            exact_server: true,
            ..Default::default()
        }
    }

    pub fn matches_server(&self, pub_server_id: Option<i64>) -> bool {
        if self.exact_server {
            return self.pub_server_id == pub_server_id;
        }
        self.pub_server_id.map_or(true, |id| pub_server_id == Some(id))
    }

    pub fn matches(&self, item: &SiteItem) -> bool {
        self.site_id.map_or(true, |id| item.site_id == id)
            && self.matches_server(item.pub_server_id)
            && self
                .delivery_context_id
                .map_or(true, |id| item.delivery_context_id == id)
            && self.content_id.map_or(true, |id| item.content_id == id)
            && self
                .template_id
                .map_or(true, |id| item.template_id == Some(id))
            && self
                .location
                .as_ref()
                .map_or(true, |loc| item.location.as_ref() == Some(loc))
            && self.folder_ids.as_ref().map_or(true, |folders| {
                item.folder_id.map_or(false, |f| folders.contains(&f))
            })
    }
}

/// Isolation regime for ledger reads
///
/// `ReadUncommitted` avoids lock contention with in-flight publishing writers and is
/// only honoured by stores that report the capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadMode {
    Strict,
    ReadUncommitted,
}

impl Default for ReadMode {
    fn default() -> Self {
        Self::Strict
    }
}

/// Composite read of an item log row and its ledger row, joined on reference id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishedItem {
    pub status: PubItemStatus,
    pub site_item: Option<SiteItem>,
}

impl PublishedItem {
    pub fn reference_id(&self) -> i64 {
        self.status.reference_id
    }

    pub fn is_live(&self) -> bool {
        self.site_item.as_ref().map_or(false, SiteItem::is_live)
    }
}

/// Delivery data needed to remove one previously published item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnpublishInfo {
    pub reference_id: i64,
    pub delivery_type: Option<String>,
    pub folder_id: Option<i64>,
    pub unpublish_data: Option<serde_json::Value>,
}

impl From<&SiteItem> for UnpublishInfo {
    fn from(item: &SiteItem) -> Self {
        Self {
            reference_id: item.reference_id,
            delivery_type: item.delivery_type.clone(),
            folder_id: item.folder_id,
            unpublish_data: item.unpublish_info.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) fn item(reference_id: i64) -> PublishItem {
        PublishItem {
            reference_id,
            job_id: 1,
            site_id: 10,
            pub_server_id: None,
            content_id: 100,
            revision_id: 2,
            folder_id: Some(7),
            template_id: Some(500),
            delivery_context_id: 1,
            assembly_context_id: None,
            operation: Operation::Publish,
            location: Some("/news/a.html".to_string()),
            delivery_type: Some("filesystem".to_string()),
            unpublish_ref_id: None,
            unpublish_info: None,
        }
    }

    #[test]
    fn test_persistable_statuses() {
        assert!(ItemStatus::Success.is_persistable());
        assert!(ItemStatus::Failure.is_persistable());
        assert!(ItemStatus::Cancelled.is_persistable());
        assert!(!ItemStatus::Undefined.is_persistable());
        assert!(!ItemStatus::Cancelled.is_delivery_terminal());
    }

    #[test]
    fn test_confirmed_outcomes_are_never_downgraded() {
        assert!(ItemStatus::Cancelled.may_replace(ItemStatus::Undefined));
        assert!(ItemStatus::Success.may_replace(ItemStatus::Cancelled));
        assert!(ItemStatus::Success.may_replace(ItemStatus::Failure));
        assert!(!ItemStatus::Cancelled.may_replace(ItemStatus::Success));
        assert!(!ItemStatus::Cancelled.may_replace(ItemStatus::Failure));
        assert!(!ItemStatus::Undefined.may_replace(ItemStatus::Success));
    }

    #[test]
    fn test_outcome_location_overrides_dispatched_location() {
        let mut outcome = ItemOutcome::success(item(1));
        assert_eq!(outcome.effective_location(), Some("/news/a.html"));

        outcome.location = Some("/news/b.html".to_string());
        let row = PubItemStatus::from_outcome(&outcome, Utc::now());
        assert_eq!(row.location.as_deref(), Some("/news/b.html"));
        assert_eq!(row.status, ItemStatus::Success);
    }

    #[test]
    fn test_site_item_query_folder_filter() {
        let row = PubItemStatus::dispatched(&item(1), Utc::now());
        assert!(row.is_unfinished());

        let query = SiteItemQuery {
            folder_ids: Some(vec![7, 8]),
            ..Default::default()
        };
        let site_item = SiteItem {
            reference_id: 1,
            site_id: 10,
            pub_server_id: None,
            content_id: 100,
            revision_id: 2,
            folder_id: Some(7),
            template_id: Some(500),
            delivery_context_id: 1,
            location: None,
            delivery_type: None,
            operation: Operation::Publish,
            status: ItemStatus::Success,
            job_id: Some(1),
            job_started_at: Utc::now(),
            published_at: Utc::now(),
            unpublish_info: None,
        };
        assert!(query.matches(&site_item));

        let mut moved = site_item.clone();
        moved.folder_id = None;
        assert!(!query.matches(&moved));
    }

    #[test]
    fn test_lock_name_distinguishes_missing_server() {
        let key = SiteItemKey {
            site_id: 10,
            pub_server_id: None,
            delivery_context_id: 1,
            content_id: 100,
            location: Some("/news/a.html".to_string()),
        };
        let mut on_server = key.clone();
        on_server.pub_server_id = Some(0);

        assert_eq!(key.lock_name(), "site_item:10:-:1:100:/news/a.html");
        assert_ne!(key.lock_name(), on_server.lock_name());
        assert_eq!(key.lock_name(), key.clone().lock_name());
    }

    #[test]
    fn test_exact_server_query_excludes_other_servers() {
        let any_server = SiteItemQuery::for_site(10, None);
        assert!(any_server.matches_server(None));
        assert!(any_server.matches_server(Some(9)));

        let serverless = SiteItemQuery::for_server(10, None);
        assert!(serverless.matches_server(None));
        assert!(!serverless.matches_server(Some(9)));

        let server_nine = SiteItemQuery::for_server(10, Some(9));
        assert!(server_nine.matches_server(Some(9)));
        assert!(!server_nine.matches_server(None));
        assert!(!server_nine.matches_server(Some(8)));
    }
}
