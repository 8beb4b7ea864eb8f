//! # System Constants
//!
//! Event names, well-known parameter keys and sentinel values shared across the
//! publishing pipeline.

/// Lifecycle events broadcast through the [`EventPublisher`](crate::events::EventPublisher)
pub mod events {
    pub const JOB_STARTED: &str = "job.started";
    pub const JOB_FINISHED: &str = "job.finished";
    pub const JOB_CANCELLED: &str = "job.cancelled";
    pub const JOB_RECOVERED: &str = "job.recovered";
    pub const CONTENT_LIST_COMPLETED: &str = "content_list.completed";
    pub const CONTENT_LIST_FAILED: &str = "content_list.failed";
    pub const EDITION_TASK_FAILED: &str = "edition_task.failed";
    pub const UNPUBLISH_RESOLVED: &str = "unpublish.resolved";
}

/// Parameter keys injected into generator and expander parameter maps
pub mod params {
    /// Site the content list is running for; always overrides stored values
    pub const SITE_ID: &str = "sys_siteid";
    /// Delivery context of the run; always overrides stored values
    pub const DELIVERY_CONTEXT: &str = "sys_context";
    /// Publish server, injected when the edition targets one
    pub const PUB_SERVER_ID: &str = "sys_serverid";
    /// Content list type hint (`normal` / `incremental`) consumed by generators
    pub const LIST_TYPE: &str = "sys_listtype";
}

/// Folder id written to ledger rows whose folder was moved or deleted
pub const FOLDER_MOVED_SENTINEL: i64 = -1;

/// Default number of work items handed to the assembly dispatcher at a time
pub const DEFAULT_DISPATCH_BATCH_SIZE: usize = 100;

/// Default page size for lazily iterated job item reads
pub const DEFAULT_ITEM_PAGE_SIZE: usize = 500;

/// Default capacity of the lifecycle event channel
pub const DEFAULT_EVENT_CAPACITY: usize = 1000;
