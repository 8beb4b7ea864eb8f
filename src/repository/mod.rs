//! # External Collaborators
//!
//! Contracts of the systems the publishing core coordinates but does not implement:
//!
//! - [`ContentRepository`]: item storage, folder tree and workflow state
//! - [`LegacyQueryRunner`]: executes the query resource of legacy content lists
//! - [`AssemblyDispatcher`]: hands work items to assembly and delivery; outcomes come
//!   back asynchronously through
//!   [`StatusTracker::update_publishing_info`](crate::tracking::StatusTracker::update_publishing_info)
//! - [`TargetHealthCheck`]: checks whether a job's publish target is reachable, used by
//!   orphaned-job recovery

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::PublisherResult;
use crate::models::{ParameterMap, PubStatus, PublishItem};

/// Lightweight metadata for one content item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentSummary {
    pub content_id: i64,
    pub content_type_id: i64,
    /// Revision that is current for publishing
    pub revision_id: i64,
    pub title: Option<String>,
    /// Workflow valid flag of the item's current state
    pub valid_flag: Option<String>,
    pub last_modified: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait ContentRepository: Send + Sync {
    /// Summaries of the requested items; missing items are absent from the map
    async fn load_summaries(
        &self,
        content_ids: &[i64],
    ) -> PublisherResult<HashMap<i64, ContentSummary>>;

    /// The subset of `content_ids` that still exists
    async fn existing_content_ids(&self, content_ids: &[i64]) -> PublisherResult<HashSet<i64>>;

    /// Folders currently containing each item
    async fn parent_folders(
        &self,
        content_ids: &[i64],
    ) -> PublisherResult<HashMap<i64, HashSet<i64>>>;

    /// Every folder reachable from the site's root folder
    async fn site_folder_ids(&self, site_id: i64) -> PublisherResult<HashSet<i64>>;

    /// Workflow valid flag of each item's current state
    async fn valid_flags(&self, content_ids: &[i64]) -> PublisherResult<HashMap<i64, String>>;

    /// Mark items modified now so incremental generators pick them up
    async fn touch(&self, content_ids: &[i64]) -> PublisherResult<u64>;

    /// Items that include any of `content_ids` through an active assembly relationship
    async fn active_assembly_parents(&self, content_ids: &[i64]) -> PublisherResult<Vec<i64>>;
}

/// Row returned by a legacy content list query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LegacyRow {
    pub content_id: i64,
    pub revision_id: i64,
    pub folder_id: Option<i64>,
    pub template_id: Option<i64>,
    pub location: Option<String>,
    pub delivery_type: Option<String>,
}

#[async_trait]
pub trait LegacyQueryRunner: Send + Sync {
    async fn execute(&self, url: &str, params: &ParameterMap) -> PublisherResult<Vec<LegacyRow>>;
}

#[async_trait]
pub trait AssemblyDispatcher: Send + Sync {
    /// Accept a batch of work items; must not wait for delivery to finish
    async fn dispatch(&self, items: Vec<PublishItem>) -> PublisherResult<()>;
}

#[async_trait]
pub trait TargetHealthCheck: Send + Sync {
    /// Whether the target the job published to can currently be reached
    async fn is_reachable(&self, status: &PubStatus) -> PublisherResult<bool>;
}
