//! # Publishing Data Model
//!
//! Logical records of the publishing configuration (content lists, editions, tasks,
//! delivery types) and of job execution (job status, item log, site item ledger, task
//! log). Physical layout is owned by the [`store`](crate::store) implementations.

pub mod content_list;
pub mod delivery_type;
pub mod edition;
pub mod edition_task_log;
pub mod pub_item;
pub mod pub_status;
pub mod work_item;

use std::collections::BTreeMap;

/// String parameters handed to extensions; ordered for deterministic merges and logs
pub type ParameterMap = BTreeMap<String, String>;

pub use content_list::{ContentList, ContentListType, NewContentList};
pub use delivery_type::{DeliveryType, NewDeliveryType};
pub use edition::{
    partition_tasks, Edition, EditionContentList, EditionTaskDef, EditionType, NewEdition,
    NewEditionTaskDef, Priority,
};
pub use edition_task_log::{EditionTaskLog, NewEditionTaskLog};
pub use pub_item::{
    ItemOutcome, ItemStatus, Operation, PubItemStatus, PublishItem, PublishedItem, ReadMode,
    SiteItem, SiteItemKey, SiteItemQuery, UnpublishInfo,
};
pub use pub_status::{ItemCounts, PubStatus, PubStatusFilter};
pub use work_item::{ContentListItem, ContentListResults};
