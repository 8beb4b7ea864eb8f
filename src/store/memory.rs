//! # In-Memory Publishing Store
//!
//! Lock-protected tables implementing [`PublishingStore`] for embedded deployments and
//! tests. Table access goes through a `parking_lot::RwLock` that is never held across an
//! await point.
//!
//! Ledger batch writers additionally take a writer gate for the whole batch. Strict
//! ledger reads queue behind that gate; `ReadMode::ReadUncommitted` reads skip it and
//! observe whatever the tables hold at that instant.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use tracing::debug;

use super::{PublishingStore, PurgeSummary, RecordSummary};
use crate::constants::FOLDER_MOVED_SENTINEL;
use crate::error::{PublisherError, PublisherResult};
use crate::ledger::{fold_site_item, LedgerDecision, LedgerEvent};
use crate::models::{
    ContentList, DeliveryType, Edition, EditionContentList, EditionTaskDef, EditionTaskLog,
    ItemCounts, ItemStatus, NewContentList, NewDeliveryType, NewEdition, NewEditionTaskDef,
    NewEditionTaskLog, Operation, PubItemStatus, PubStatus, PubStatusFilter, PublishedItem,
    ReadMode, SiteItem, SiteItemKey, SiteItemQuery,
};

#[derive(Debug, Default)]
struct Tables {
    content_lists: BTreeMap<i64, ContentList>,
    editions: BTreeMap<i64, Edition>,
    edition_lists: Vec<EditionContentList>,
    task_defs: BTreeMap<i64, EditionTaskDef>,
    delivery_types: BTreeMap<i64, DeliveryType>,
    pub_status: BTreeMap<i64, PubStatus>,
    used_job_ids: HashSet<i64>,
    item_log: BTreeMap<i64, PubItemStatus>,
    ledger: HashMap<SiteItemKey, SiteItem>,
    task_logs: BTreeMap<i64, EditionTaskLog>,
}

impl Tables {
    fn ensure_unique<'a, I>(
        names: I,
        name: &str,
        own_id: Option<i64>,
        entity: &str,
    ) -> PublisherResult<()>
    where
        I: Iterator<Item = (i64, &'a str)>,
    {
        for (id, existing) in names {
            if existing == name && Some(id) != own_id {
                return Err(PublisherError::duplicate_name(entity, name));
            }
        }
        Ok(())
    }
}

#[derive(Debug)]
pub struct InMemoryStore {
    tables: RwLock<Tables>,
    config_ids: AtomicI64,
    job_ids: AtomicI64,
    reference_ids: AtomicI64,
    writer_gate: tokio::sync::RwLock<()>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
            config_ids: AtomicI64::new(1),
            job_ids: AtomicI64::new(1),
            reference_ids: AtomicI64::new(1),
            writer_gate: tokio::sync::RwLock::new(()),
        }
    }

    fn next_config_id(&self) -> i64 {
        self.config_ids.fetch_add(1, Ordering::SeqCst)
    }

    /// Number of ledger rows, live or tombstoned
    pub fn ledger_len(&self) -> usize {
        self.tables.read().ledger.len()
    }

    /// Seed a ledger row directly, bypassing the fold
    pub fn insert_site_item(&self, item: SiteItem) {
        self.tables.write().ledger.insert(item.key(), item);
    }
}

#[async_trait]
impl PublishingStore for InMemoryStore {
    async fn create_content_list(&self, new_list: NewContentList) -> PublisherResult<ContentList> {
        let mut tables = self.tables.write();
        Tables::ensure_unique(
            tables.content_lists.values().map(|l| (l.content_list_id, l.name.as_str())),
            &new_list.name,
            None,
            "content list",
        )?;
        let list = new_list.into_content_list(self.next_config_id());
        tables.content_lists.insert(list.content_list_id, list.clone());
        Ok(list)
    }

    async fn save_content_list(&self, list: &ContentList) -> PublisherResult<()> {
        let mut tables = self.tables.write();
        Tables::ensure_unique(
            tables.content_lists.values().map(|l| (l.content_list_id, l.name.as_str())),
            &list.name,
            Some(list.content_list_id),
            "content list",
        )?;
        tables.content_lists.insert(list.content_list_id, list.clone());
        Ok(())
    }

    async fn load_content_list(
        &self,
        content_list_id: i64,
    ) -> PublisherResult<Option<ContentList>> {
        Ok(self.tables.read().content_lists.get(&content_list_id).cloned())
    }

    async fn find_content_list_by_name(&self, name: &str) -> PublisherResult<Option<ContentList>> {
        Ok(self
            .tables
            .read()
            .content_lists
            .values()
            .find(|l| l.name == name)
            .cloned())
    }

    async fn list_content_lists(&self) -> PublisherResult<Vec<ContentList>> {
        Ok(self.tables.read().content_lists.values().cloned().collect())
    }

    async fn delete_content_list(&self, content_list_id: i64) -> PublisherResult<bool> {
        let mut tables = self.tables.write();
        let removed = tables.content_lists.remove(&content_list_id).is_some();
        tables
            .edition_lists
            .retain(|ecl| ecl.content_list_id != content_list_id);
        Ok(removed)
    }

    async fn create_edition(&self, new_edition: NewEdition) -> PublisherResult<Edition> {
        let mut tables = self.tables.write();
        Tables::ensure_unique(
            tables.editions.values().map(|e| (e.edition_id, e.name.as_str())),
            &new_edition.name,
            None,
            "edition",
        )?;
        let edition = new_edition.into_edition(self.next_config_id());
        tables.editions.insert(edition.edition_id, edition.clone());
        Ok(edition)
    }

    async fn save_edition(&self, edition: &Edition) -> PublisherResult<()> {
        let mut tables = self.tables.write();
        Tables::ensure_unique(
            tables.editions.values().map(|e| (e.edition_id, e.name.as_str())),
            &edition.name,
            Some(edition.edition_id),
            "edition",
        )?;
        tables.editions.insert(edition.edition_id, edition.clone());
        Ok(())
    }

    async fn load_edition(&self, edition_id: i64) -> PublisherResult<Option<Edition>> {
        Ok(self.tables.read().editions.get(&edition_id).cloned())
    }

    async fn find_edition_by_name(&self, name: &str) -> PublisherResult<Option<Edition>> {
        Ok(self
            .tables
            .read()
            .editions
            .values()
            .find(|e| e.name == name)
            .cloned())
    }

    async fn list_editions(&self, site_id: Option<i64>) -> PublisherResult<Vec<Edition>> {
        Ok(self
            .tables
            .read()
            .editions
            .values()
            .filter(|e| site_id.map_or(true, |id| e.site_id == id))
            .cloned()
            .collect())
    }

    async fn delete_edition(&self, edition_id: i64) -> PublisherResult<bool> {
        let mut tables = self.tables.write();
        let removed = tables.editions.remove(&edition_id).is_some();
        tables.edition_lists.retain(|ecl| ecl.edition_id != edition_id);
        tables.task_defs.retain(|_, task| task.edition_id != edition_id);
        Ok(removed)
    }

    async fn save_edition_content_list(
        &self,
        association: &EditionContentList,
    ) -> PublisherResult<()> {
        let mut tables = self.tables.write();
        if !tables.editions.contains_key(&association.edition_id) {
            return Err(PublisherError::EditionMissing(association.edition_id.to_string()));
        }
        if !tables.content_lists.contains_key(&association.content_list_id) {
            return Err(PublisherError::ListMissing(association.content_list_id.to_string()));
        }
        tables.edition_lists.retain(|ecl| {
            !(ecl.edition_id == association.edition_id
                && ecl.content_list_id == association.content_list_id)
        });
        tables.edition_lists.push(association.clone());
        Ok(())
    }

    async fn load_edition_content_lists(
        &self,
        edition_id: i64,
    ) -> PublisherResult<Vec<EditionContentList>> {
        let mut lists: Vec<EditionContentList> = self
            .tables
            .read()
            .edition_lists
            .iter()
            .filter(|ecl| ecl.edition_id == edition_id)
            .cloned()
            .collect();
        lists.sort_by_key(|ecl| (ecl.sequence, ecl.content_list_id));
        Ok(lists)
    }

    async fn delete_edition_content_list(
        &self,
        edition_id: i64,
        content_list_id: i64,
    ) -> PublisherResult<bool> {
        let mut tables = self.tables.write();
        let before = tables.edition_lists.len();
        tables.edition_lists.retain(|ecl| {
            !(ecl.edition_id == edition_id && ecl.content_list_id == content_list_id)
        });
        Ok(tables.edition_lists.len() != before)
    }

    async fn create_task_def(
        &self,
        new_task: NewEditionTaskDef,
    ) -> PublisherResult<EditionTaskDef> {
        let mut tables = self.tables.write();
        if !tables.editions.contains_key(&new_task.edition_id) {
            return Err(PublisherError::EditionMissing(new_task.edition_id.to_string()));
        }
        let task = new_task.into_task_def(self.next_config_id());
        tables.task_defs.insert(task.task_id, task.clone());
        Ok(task)
    }

    async fn save_task_def(&self, task: &EditionTaskDef) -> PublisherResult<()> {
        self.tables.write().task_defs.insert(task.task_id, task.clone());
        Ok(())
    }

    async fn load_task_defs(&self, edition_id: i64) -> PublisherResult<Vec<EditionTaskDef>> {
        let mut tasks: Vec<EditionTaskDef> = self
            .tables
            .read()
            .task_defs
            .values()
            .filter(|t| t.edition_id == edition_id)
            .cloned()
            .collect();
        tasks.sort_by_key(|t| (t.sequence, t.task_id));
        Ok(tasks)
    }

    async fn delete_task_def(&self, task_id: i64) -> PublisherResult<bool> {
        Ok(self.tables.write().task_defs.remove(&task_id).is_some())
    }

    async fn create_delivery_type(
        &self,
        new_type: NewDeliveryType,
    ) -> PublisherResult<DeliveryType> {
        let mut tables = self.tables.write();
        Tables::ensure_unique(
            tables
                .delivery_types
                .values()
                .map(|d| (d.delivery_type_id, d.name.as_str())),
            &new_type.name,
            None,
            "delivery type",
        )?;
        let delivery_type = new_type.into_delivery_type(self.next_config_id());
        tables
            .delivery_types
            .insert(delivery_type.delivery_type_id, delivery_type.clone());
        Ok(delivery_type)
    }

    async fn save_delivery_type(&self, delivery_type: &DeliveryType) -> PublisherResult<()> {
        let mut tables = self.tables.write();
        Tables::ensure_unique(
            tables
                .delivery_types
                .values()
                .map(|d| (d.delivery_type_id, d.name.as_str())),
            &delivery_type.name,
            Some(delivery_type.delivery_type_id),
            "delivery type",
        )?;
        tables
            .delivery_types
            .insert(delivery_type.delivery_type_id, delivery_type.clone());
        Ok(())
    }

    async fn load_delivery_type(
        &self,
        delivery_type_id: i64,
    ) -> PublisherResult<Option<DeliveryType>> {
        Ok(self.tables.read().delivery_types.get(&delivery_type_id).cloned())
    }

    async fn find_delivery_type_by_name(
        &self,
        name: &str,
    ) -> PublisherResult<Option<DeliveryType>> {
        Ok(self
            .tables
            .read()
            .delivery_types
            .values()
            .find(|d| d.name == name)
            .cloned())
    }

    async fn list_delivery_types(&self) -> PublisherResult<Vec<DeliveryType>> {
        Ok(self.tables.read().delivery_types.values().cloned().collect())
    }

    async fn delete_delivery_type(&self, delivery_type_id: i64) -> PublisherResult<bool> {
        Ok(self
            .tables
            .write()
            .delivery_types
            .remove(&delivery_type_id)
            .is_some())
    }

    async fn allocate_job_id(&self) -> PublisherResult<i64> {
        Ok(self.job_ids.fetch_add(1, Ordering::SeqCst))
    }

    async fn insert_pub_status(&self, status: &PubStatus) -> PublisherResult<()> {
        let mut tables = self.tables.write();
        if !tables.used_job_ids.insert(status.status_id) {
            return Err(PublisherError::DuplicateJob(status.status_id));
        }
        tables.pub_status.insert(status.status_id, status.clone());
        Ok(())
    }

    async fn update_pub_status(&self, status: &PubStatus) -> PublisherResult<()> {
        let mut tables = self.tables.write();
        match tables.pub_status.get_mut(&status.status_id) {
            Some(existing) => {
                *existing = status.clone();
                Ok(())
            }
            None => Err(PublisherError::JobMissing(status.status_id)),
        }
    }

    async fn load_pub_status(&self, job_id: i64) -> PublisherResult<Option<PubStatus>> {
        Ok(self.tables.read().pub_status.get(&job_id).cloned())
    }

    async fn query_pub_status(&self, filter: &PubStatusFilter) -> PublisherResult<Vec<PubStatus>> {
        let tables = self.tables.read();
        let mut matches: Vec<PubStatus> = tables
            .pub_status
            .values()
            .filter(|status| filter.matches(status))
            .filter(|status| {
                filter.site_id.map_or(true, |site_id| {
                    tables
                        .editions
                        .get(&status.edition_id)
                        .map_or(false, |edition| edition.site_id == site_id)
                })
            })
            .cloned()
            .collect();
        matches.sort_by(|a, b| {
            b.start_date
                .cmp(&a.start_date)
                .then(b.status_id.cmp(&a.status_id))
        });
        if let Some(max) = filter.max_count {
            matches.truncate(max);
        }
        Ok(matches)
    }

    async fn allocate_reference_ids(&self, count: usize) -> PublisherResult<Vec<i64>> {
        let first = self.reference_ids.fetch_add(count as i64, Ordering::SeqCst);
        Ok((first..first + count as i64).collect())
    }

    async fn insert_item_statuses(&self, rows: &[PubItemStatus]) -> PublisherResult<()> {
        let mut tables = self.tables.write();
        for row in rows {
            tables.item_log.insert(row.reference_id, row.clone());
        }
        Ok(())
    }

    async fn record_item_events(&self, events: &[LedgerEvent]) -> PublisherResult<RecordSummary> {
        let _gate = self.writer_gate.write().await;
        let mut summary = RecordSummary::default();
        let mut tables = self.tables.write();

        for event in events {
            let replaceable = tables
                .item_log
                .get(&event.row.reference_id)
                .map_or(true, |current| event.row.status.may_replace(current.status));
            if replaceable {
                tables.item_log.insert(event.row.reference_id, event.row.clone());
                summary.log_rows_written += 1;
            } else {
                debug!(
                    reference_id = event.row.reference_id,
                    job_id = event.row.job_id,
                    status = %event.row.status,
                    "Item log row already confirmed"
                );
            }

            let key = event.key();
            match fold_site_item(tables.ledger.get(&key), event) {
                LedgerDecision::Write(item) => {
                    tables.ledger.insert(key, item);
                    summary.ledger_rows_written += 1;
                }
                LedgerDecision::Unchanged(reason) => {
                    debug!(
                        reference_id = event.row.reference_id,
                        job_id = event.row.job_id,
                        ?reason,
                        "Ledger row unchanged"
                    );
                    summary.ledger_rows_unchanged += 1;
                }
            }
        }

        Ok(summary)
    }

    async fn load_item_statuses(&self, job_id: i64) -> PublisherResult<Vec<PubItemStatus>> {
        Ok(self
            .tables
            .read()
            .item_log
            .values()
            .filter(|row| row.job_id == job_id)
            .cloned()
            .collect())
    }

    async fn load_published_items(
        &self,
        job_id: i64,
        after_reference_id: Option<i64>,
        limit: Option<usize>,
    ) -> PublisherResult<Vec<PublishedItem>> {
        let tables = self.tables.read();
        let by_reference: HashMap<i64, &SiteItem> = tables
            .ledger
            .values()
            .filter(|item| item.job_id == Some(job_id))
            .map(|item| (item.reference_id, item))
            .collect();

        let lower = after_reference_id.map_or(i64::MIN, |id| id.saturating_add(1));
        let rows = tables
            .item_log
            .range(lower..)
            .map(|(_, row)| row)
            .filter(|row| row.job_id == job_id)
            .take(limit.unwrap_or(usize::MAX))
            .map(|row| PublishedItem {
                status: row.clone(),
                site_item: by_reference.get(&row.reference_id).map(|item| (*item).clone()),
            })
            .collect();
        Ok(rows)
    }

    async fn load_item_statuses_for_content(
        &self,
        content_id: i64,
        pub_server_id: Option<i64>,
    ) -> PublisherResult<Vec<PubItemStatus>> {
        Ok(self
            .tables
            .read()
            .item_log
            .values()
            .rev()
            .filter(|row| row.content_id == content_id)
            .filter(|row| pub_server_id.map_or(true, |id| row.pub_server_id == Some(id)))
            .cloned()
            .collect())
    }

    async fn cancel_unfinished_items(&self, job_id: i64) -> PublisherResult<u64> {
        let now = Utc::now();
        let mut cancelled = 0;
        let mut tables = self.tables.write();
        for row in tables.item_log.values_mut() {
            if row.job_id == job_id && row.is_unfinished() && row.status != ItemStatus::Cancelled {
                row.status = ItemStatus::Cancelled;
                row.updated_at = now;
                cancelled += 1;
            }
        }
        Ok(cancelled)
    }

    async fn count_items(&self, job_id: i64) -> PublisherResult<ItemCounts> {
        let tables = self.tables.read();
        let mut counts = ItemCounts::default();
        for row in tables.item_log.values().filter(|row| row.job_id == job_id) {
            match (row.status, row.operation) {
                (ItemStatus::Success, Operation::Publish) => counts.delivered += 1,
                (ItemStatus::Success, Operation::Unpublish) => counts.removed += 1,
                (ItemStatus::Failure, _) => counts.failed += 1,
                _ => {}
            }
        }
        Ok(counts)
    }

    async fn purge_job(&self, job_id: i64) -> PublisherResult<PurgeSummary> {
        let mut tables = self.tables.write();
        let mut summary = PurgeSummary::default();

        tables.pub_status.remove(&job_id);

        let before = tables.item_log.len();
        tables.item_log.retain(|_, row| row.job_id != job_id);
        summary.item_rows_removed = (before - tables.item_log.len()) as u64;

        let before = tables.task_logs.len();
        tables.task_logs.retain(|_, log| log.job_id != job_id);
        summary.task_logs_removed = (before - tables.task_logs.len()) as u64;

        for item in tables.ledger.values_mut() {
            if item.job_id == Some(job_id) {
                item.job_id = None;
                summary.ledger_rows_detached += 1;
            }
        }

        Ok(summary)
    }

    fn supports_read_uncommitted(&self) -> bool {
        true
    }

    async fn find_site_items(
        &self,
        query: &SiteItemQuery,
        mode: ReadMode,
    ) -> PublisherResult<Vec<SiteItem>> {
        let _gate = match mode {
            ReadMode::Strict => Some(self.writer_gate.read().await),
            ReadMode::ReadUncommitted => None,
        };
        let mut items: Vec<SiteItem> = self
            .tables
            .read()
            .ledger
            .values()
            .filter(|item| query.matches(item))
            .cloned()
            .collect();
        items.sort_by_key(|item| item.reference_id);
        Ok(items)
    }

    async fn mark_folders_moved(&self, folder_ids: &[i64]) -> PublisherResult<u64> {
        let _gate = self.writer_gate.write().await;
        let mut marked = 0;
        let mut tables = self.tables.write();
        for item in tables.ledger.values_mut() {
            if item.folder_id.map_or(false, |f| folder_ids.contains(&f)) {
                item.folder_id = Some(FOLDER_MOVED_SENTINEL);
                marked += 1;
            }
        }
        Ok(marked)
    }

    async fn insert_task_log(&self, log: NewEditionTaskLog) -> PublisherResult<EditionTaskLog> {
        let reference_id = self.reference_ids.fetch_add(1, Ordering::SeqCst);
        let log = log.into_log(reference_id, Utc::now());
        self.tables.write().task_logs.insert(reference_id, log.clone());
        Ok(log)
    }

    async fn load_task_logs(&self, job_id: i64) -> PublisherResult<Vec<EditionTaskLog>> {
        Ok(self
            .tables
            .read()
            .task_logs
            .values()
            .filter(|log| log.job_id == job_id)
            .cloned()
            .collect())
    }
}
