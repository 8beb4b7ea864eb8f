//! # Publishing Store
//!
//! Persistence contract for every logical table the publishing core owns:
//!
//! ```text
//! ContentList ── EditionContentList ── Edition ── EditionTaskDef
//!                                         │
//!                                     PubStatus ── PubItemStatus (item log)
//!                                         │              │ reference id
//!                                  EditionTaskLog    SiteItem (ledger)
//! ```
//!
//! Two implementations ship with the crate:
//!
//! - [`InMemoryStore`]: lock-protected tables for embedded use and tests
//! - `PgStore` (feature `postgres`): sqlx-backed PostgreSQL tables from `migrations/`
//!
//! Ledger writes go through [`PublishingStore::record_item_events`], which applies the
//! pure [`fold_site_item`](crate::ledger::fold_site_item) under the store's write
//! serialization.

pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::PublisherResult;
use crate::ledger::LedgerEvent;
use crate::models::{
    ContentList, DeliveryType, Edition, EditionContentList, EditionTaskDef, EditionTaskLog,
    ItemCounts, NewContentList, NewDeliveryType, NewEdition, NewEditionTaskDef,
    NewEditionTaskLog, PubItemStatus, PubStatus, PubStatusFilter, PublishedItem, ReadMode,
    SiteItem, SiteItemQuery,
};

pub use memory::InMemoryStore;
#[cfg(feature = "postgres")]
pub use postgres::PgStore;

/// Result of applying a batch of terminal item events
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordSummary {
    pub log_rows_written: usize,
    pub ledger_rows_written: usize,
    pub ledger_rows_unchanged: usize,
}

/// Result of purging one job's log
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurgeSummary {
    pub item_rows_removed: u64,
    pub task_logs_removed: u64,
    /// Ledger rows kept but stripped of their job back-reference
    pub ledger_rows_detached: u64,
}

#[async_trait]
pub trait PublishingStore: Send + Sync {
    // --- Content lists -------------------------------------------------------

    async fn create_content_list(&self, new_list: NewContentList) -> PublisherResult<ContentList>;
    async fn save_content_list(&self, list: &ContentList) -> PublisherResult<()>;
    async fn load_content_list(&self, content_list_id: i64) -> PublisherResult<Option<ContentList>>;
    async fn find_content_list_by_name(&self, name: &str) -> PublisherResult<Option<ContentList>>;
    async fn list_content_lists(&self) -> PublisherResult<Vec<ContentList>>;
    /// Removes the list and its edition associations
    async fn delete_content_list(&self, content_list_id: i64) -> PublisherResult<bool>;

    // --- Editions ------------------------------------------------------------

    async fn create_edition(&self, new_edition: NewEdition) -> PublisherResult<Edition>;
    async fn save_edition(&self, edition: &Edition) -> PublisherResult<()>;
    async fn load_edition(&self, edition_id: i64) -> PublisherResult<Option<Edition>>;
    async fn find_edition_by_name(&self, name: &str) -> PublisherResult<Option<Edition>>;
    async fn list_editions(&self, site_id: Option<i64>) -> PublisherResult<Vec<Edition>>;
    /// Removes the edition, its content list associations and its task definitions
    async fn delete_edition(&self, edition_id: i64) -> PublisherResult<bool>;

    /// Insert or replace the association keyed by (edition, content list)
    async fn save_edition_content_list(&self, association: &EditionContentList)
        -> PublisherResult<()>;
    /// Associations of an edition in ascending sequence order
    async fn load_edition_content_lists(
        &self,
        edition_id: i64,
    ) -> PublisherResult<Vec<EditionContentList>>;
    async fn delete_edition_content_list(
        &self,
        edition_id: i64,
        content_list_id: i64,
    ) -> PublisherResult<bool>;

    async fn create_task_def(&self, new_task: NewEditionTaskDef) -> PublisherResult<EditionTaskDef>;
    async fn save_task_def(&self, task: &EditionTaskDef) -> PublisherResult<()>;
    async fn load_task_defs(&self, edition_id: i64) -> PublisherResult<Vec<EditionTaskDef>>;
    async fn delete_task_def(&self, task_id: i64) -> PublisherResult<bool>;

    // --- Delivery types ------------------------------------------------------

    async fn create_delivery_type(&self, new_type: NewDeliveryType)
        -> PublisherResult<DeliveryType>;
    async fn save_delivery_type(&self, delivery_type: &DeliveryType) -> PublisherResult<()>;
    async fn load_delivery_type(&self, delivery_type_id: i64)
        -> PublisherResult<Option<DeliveryType>>;
    async fn find_delivery_type_by_name(&self, name: &str) -> PublisherResult<Option<DeliveryType>>;
    async fn list_delivery_types(&self) -> PublisherResult<Vec<DeliveryType>>;
    async fn delete_delivery_type(&self, delivery_type_id: i64) -> PublisherResult<bool>;

    // --- Job status ----------------------------------------------------------

    async fn allocate_job_id(&self) -> PublisherResult<i64>;
    /// Fails with `DuplicateJob` when the job id was ever used before
    async fn insert_pub_status(&self, status: &PubStatus) -> PublisherResult<()>;
    async fn update_pub_status(&self, status: &PubStatus) -> PublisherResult<()>;
    async fn load_pub_status(&self, job_id: i64) -> PublisherResult<Option<PubStatus>>;
    /// Matching jobs, most recently started first
    async fn query_pub_status(&self, filter: &PubStatusFilter) -> PublisherResult<Vec<PubStatus>>;

    // --- Item log ------------------------------------------------------------

    /// Strictly increasing ids shared by item events and task logs
    async fn allocate_reference_ids(&self, count: usize) -> PublisherResult<Vec<i64>>;
    async fn insert_item_statuses(&self, rows: &[PubItemStatus]) -> PublisherResult<()>;
    /// Upsert log rows and fold each event into the ledger, atomically per batch
    async fn record_item_events(&self, events: &[LedgerEvent]) -> PublisherResult<RecordSummary>;
    /// Item log rows of a job in reference id order
    async fn load_item_statuses(&self, job_id: i64) -> PublisherResult<Vec<PubItemStatus>>;
    /// Composite item/ledger rows of a job after `after_reference_id`, in reference id order
    async fn load_published_items(
        &self,
        job_id: i64,
        after_reference_id: Option<i64>,
        limit: Option<usize>,
    ) -> PublisherResult<Vec<PublishedItem>>;
    /// Item log rows of one content item, newest first
    async fn load_item_statuses_for_content(
        &self,
        content_id: i64,
        pub_server_id: Option<i64>,
    ) -> PublisherResult<Vec<PubItemStatus>>;
    /// Move every row of the job that is neither SUCCESS nor FAILURE to CANCELLED
    async fn cancel_unfinished_items(&self, job_id: i64) -> PublisherResult<u64>;
    async fn count_items(&self, job_id: i64) -> PublisherResult<ItemCounts>;
    /// Delete the job's status, item log and task logs; detach its ledger rows
    async fn purge_job(&self, job_id: i64) -> PublisherResult<PurgeSummary>;

    // --- Ledger --------------------------------------------------------------

    /// Whether `ReadMode::ReadUncommitted` reads bypass in-flight writers
    fn supports_read_uncommitted(&self) -> bool;
    /// Ledger rows (live rows and tombstones) in reference id order
    async fn find_site_items(
        &self,
        query: &SiteItemQuery,
        mode: ReadMode,
    ) -> PublisherResult<Vec<SiteItem>>;
    /// Overwrite the folder of rows in `folder_ids` with the moved-folder sentinel
    async fn mark_folders_moved(&self, folder_ids: &[i64]) -> PublisherResult<u64>;

    // --- Task log ------------------------------------------------------------

    async fn insert_task_log(&self, log: NewEditionTaskLog) -> PublisherResult<EditionTaskLog>;
    /// Task logs of a job in reference id order
    async fn load_task_logs(&self, job_id: i64) -> PublisherResult<Vec<EditionTaskLog>>;
}
