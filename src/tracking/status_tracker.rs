//! Status tracker over a [`PublishingStore`].
//!
//! Counts on a job row are always recomputed from the item log, never accumulated, so
//! `update_counts` may be called any number of times. Ledger rows are only written by
//! folding confirmed delivery outcomes; cancellation and purges touch the log only.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use tracing::{debug, info, warn};

use crate::config::PublisherConfig;
use crate::config::TrackingConfig;
use crate::constants::events as event_names;
use crate::error::{PublisherError, PublisherResult};
use crate::events::{EventPublisher, JobLifecycleEvent};
use crate::ledger::LedgerEvent;
use crate::logging::{log_item_operation, log_job_operation};
use crate::models::{
    EditionTaskLog, ItemCounts, ItemOutcome, ItemStatus, NewEditionTaskLog, Operation,
    PubItemStatus, PubStatus, PubStatusFilter, PublishItem, PublishedItem, ReadMode, SiteItem,
    SiteItemQuery,
};
use crate::state_machine::{EndingState, JobEvent, JobStateMachine};
use crate::store::{PublishingStore, PurgeSummary, RecordSummary};

/// Position of a lazy item read
#[derive(Debug, Clone, Copy)]
enum PageCursor {
    Start,
    After(i64),
    Done,
}

#[derive(Clone)]
pub struct StatusTracker {
    store: Arc<dyn PublishingStore>,
    event_publisher: EventPublisher,
    config: TrackingConfig,
    server_identity: String,
}

impl std::fmt::Debug for StatusTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatusTracker")
            .field("config", &self.config)
            .field("server_identity", &self.server_identity)
            .finish()
    }
}

impl StatusTracker {
    pub fn new(
        store: Arc<dyn PublishingStore>,
        event_publisher: EventPublisher,
        config: &PublisherConfig,
    ) -> Self {
        Self {
            store,
            event_publisher,
            config: config.tracking.clone(),
            server_identity: config.server.identity.clone(),
        }
    }

    pub fn store(&self) -> &Arc<dyn PublishingStore> {
        &self.store
    }

    pub fn event_publisher(&self) -> &EventPublisher {
        &self.event_publisher
    }

    pub fn server_identity(&self) -> &str {
        &self.server_identity
    }

    // --- Job lifecycle -------------------------------------------------------

    /// Allocate a job id that was never used before
    pub async fn allocate_job_id(&self) -> PublisherResult<i64> {
        self.store.allocate_job_id().await
    }

    /// Create the job's status row in the STARTED state
    ///
    /// Must precede any task or content list work. Fails with `DuplicateJob` when the
    /// id was used before, even by a purged job.
    pub async fn init_publishing_status(
        &self,
        job_id: i64,
        start: DateTime<Utc>,
        edition_id: i64,
        pub_server_id: Option<i64>,
    ) -> PublisherResult<PubStatus> {
        let status = PubStatus::started(
            job_id,
            edition_id,
            pub_server_id,
            start,
            self.server_identity.clone(),
        );
        self.store.insert_pub_status(&status).await?;

        log_job_operation(
            "init_publishing_status",
            job_id,
            Some(edition_id),
            EndingState::Started.as_str(),
            None,
        );
        let payload = JobLifecycleEvent::new(job_id, edition_id, EndingState::Started);
        if let Err(e) = self
            .event_publisher
            .publish_payload(event_names::JOB_STARTED, &payload)
            .await
        {
            debug!(job_id, error = %e, "Failed to publish job started event");
        }
        Ok(status)
    }

    /// Finalize a job and recompute its counts
    ///
    /// Finalizing twice with the same state leaves the row as it was; a different
    /// terminal state is rejected as an invalid transition.
    pub async fn finished_publishing_status(
        &self,
        job_id: i64,
        end: DateTime<Utc>,
        ending_state: EndingState,
    ) -> PublisherResult<PubStatus> {
        let event = JobEvent::for_ending_state(ending_state).ok_or_else(|| {
            PublisherError::Validation(format!(
                "job {job_id} cannot be finalized into {ending_state}"
            ))
        })?;
        self.finalize_job(job_id, event, end).await
    }

    /// Finalize a job through its state machine, keeping the event's reason
    pub async fn finalize_job(
        &self,
        job_id: i64,
        event: JobEvent,
        end: DateTime<Utc>,
    ) -> PublisherResult<PubStatus> {
        let machine =
            JobStateMachine::new(job_id, Arc::clone(&self.store), self.event_publisher.clone());
        let outcome = machine.transition(event, end).await?;
        let counts = self.update_counts(job_id).await?;

        let mut status = outcome.into_status();
        status.apply_counts(counts);
        log_job_operation(
            "finished_publishing_status",
            job_id,
            Some(status.edition_id),
            status.ending_state.as_str(),
            None,
        );
        Ok(status)
    }

    /// Recompute the job's delivered/removed/failed counts from its item log
    pub async fn update_counts(&self, job_id: i64) -> PublisherResult<ItemCounts> {
        let mut status = self
            .store
            .load_pub_status(job_id)
            .await?
            .ok_or(PublisherError::JobMissing(job_id))?;
        let counts = self.store.count_items(job_id).await?;
        if status.counts() != counts {
            status.apply_counts(counts);
            self.store.update_pub_status(&status).await?;
        }
        debug!(
            job_id,
            delivered = counts.delivered,
            removed = counts.removed,
            failed = counts.failed,
            "Job counts recomputed"
        );
        Ok(counts)
    }

    pub async fn set_job_hidden(&self, job_id: i64, hidden: bool) -> PublisherResult<PubStatus> {
        let mut status = self
            .store
            .load_pub_status(job_id)
            .await?
            .ok_or(PublisherError::JobMissing(job_id))?;
        if status.hidden != hidden {
            status.hidden = hidden;
            self.store.update_pub_status(&status).await?;
        }
        Ok(status)
    }

    // --- Item writes ---------------------------------------------------------

    pub async fn allocate_reference_ids(&self, count: usize) -> PublisherResult<Vec<i64>> {
        self.store.allocate_reference_ids(count).await
    }

    /// Log dispatched items as UNDEFINED until their outcome arrives
    pub async fn record_dispatched(&self, items: &[PublishItem]) -> PublisherResult<()> {
        if items.is_empty() {
            return Ok(());
        }
        let now = Utc::now();
        let rows: Vec<PubItemStatus> = items
            .iter()
            .map(|item| PubItemStatus::dispatched(item, now))
            .collect();
        self.store.insert_item_statuses(&rows).await
    }

    /// Ingest a batch of delivery callbacks
    ///
    /// Outcomes that are not persistable are logged and skipped, as are outcomes of
    /// unknown jobs. Callbacks may arrive in any order and after the job finished.
    pub async fn update_publishing_info(
        &self,
        outcomes: &[ItemOutcome],
    ) -> PublisherResult<RecordSummary> {
        let mut job_starts: HashMap<i64, Option<DateTime<Utc>>> = HashMap::new();
        let mut events = Vec::with_capacity(outcomes.len());
        let recorded_at = Utc::now();

        for outcome in outcomes {
            let item = &outcome.item;
            if !outcome.status.is_persistable() {
                debug!(
                    job_id = item.job_id,
                    reference_id = item.reference_id,
                    status = %outcome.status,
                    "Skipping non-persistable item outcome"
                );
                continue;
            }

            let started = match job_starts.get(&item.job_id) {
                Some(started) => *started,
                None => {
                    let started = self
                        .store
                        .load_pub_status(item.job_id)
                        .await?
                        .map(|status| status.start_date);
                    job_starts.insert(item.job_id, started);
                    started
                }
            };
            let Some(job_started_at) = started else {
                warn!(
                    job_id = item.job_id,
                    reference_id = item.reference_id,
                    "Skipping item outcome for unknown job"
                );
                continue;
            };

            log_item_operation(
                item.operation.as_str(),
                item.job_id,
                Some(item.reference_id),
                Some(item.content_id),
                outcome.status.as_str(),
                outcome.message.as_deref(),
            );
            events.push(LedgerEvent::from_outcome(outcome, job_started_at, recorded_at));
        }

        if events.is_empty() {
            return Ok(RecordSummary::default());
        }
        let summary = self.store.record_item_events(&events).await?;
        debug!(
            outcomes = outcomes.len(),
            log_rows = summary.log_rows_written,
            ledger_rows = summary.ledger_rows_written,
            ledger_unchanged = summary.ledger_rows_unchanged,
            "Publishing info updated"
        );
        Ok(summary)
    }

    /// Move every item of the job that is neither SUCCESS nor FAILURE to CANCELLED
    ///
    /// Only the job's log changes; the ledger reflects confirmed deliveries.
    pub async fn cancel_unfinished_job_items(&self, job_id: i64) -> PublisherResult<u64> {
        let cancelled = self.store.cancel_unfinished_items(job_id).await?;
        info!(job_id, cancelled, "Cancelled unfinished job items");
        Ok(cancelled)
    }

    // --- Job reads -----------------------------------------------------------

    pub async fn find_pub_status(&self, job_id: i64) -> PublisherResult<Option<PubStatus>> {
        self.store.load_pub_status(job_id).await
    }

    pub async fn find_pub_status_by_edition(
        &self,
        edition_id: i64,
    ) -> PublisherResult<Vec<PubStatus>> {
        self.store
            .query_pub_status(&PubStatusFilter::for_edition(edition_id))
            .await
    }

    /// Jobs of a site, optionally narrowed to a server, a start date range and a count
    pub async fn find_pub_status_by_site(
        &self,
        site_id: i64,
        pub_server_id: Option<i64>,
        range: Option<(DateTime<Utc>, DateTime<Utc>)>,
        max_count: Option<usize>,
    ) -> PublisherResult<Vec<PubStatus>> {
        let mut filter = PubStatusFilter::for_site(site_id);
        filter.pub_server_id = pub_server_id;
        if let Some((from, to)) = range {
            filter = filter.between(from, to);
        }
        filter.max_count = max_count;
        self.store.query_pub_status(&filter).await
    }

    pub async fn query_pub_status(
        &self,
        filter: &PubStatusFilter,
    ) -> PublisherResult<Vec<PubStatus>> {
        self.store.query_pub_status(filter).await
    }

    /// STARTED jobs, optionally for one edition
    pub async fn find_running_jobs(
        &self,
        edition_id: Option<i64>,
    ) -> PublisherResult<Vec<PubStatus>> {
        let filter = PubStatusFilter {
            edition_id,
            ending_state: Some(EndingState::Started),
            ..Default::default()
        };
        self.store.query_pub_status(&filter).await
    }

    // --- Item reads ----------------------------------------------------------

    pub async fn find_pub_item_status(&self, job_id: i64) -> PublisherResult<Vec<PubItemStatus>> {
        self.store.load_item_statuses(job_id).await
    }

    /// Every item of a job joined with its ledger row, materialized
    pub async fn find_published_items(&self, job_id: i64) -> PublisherResult<Vec<PublishedItem>> {
        self.store.load_published_items(job_id, None, None).await
    }

    /// Items of a job read lazily, `tracking.item_page_size` rows at a time
    pub fn iter_published_items(
        &self,
        job_id: i64,
    ) -> BoxStream<'static, PublisherResult<PublishedItem>> {
        let store = Arc::clone(&self.store);
        let page_size = self.config.item_page_size.max(1);

        stream::try_unfold(PageCursor::Start, move |cursor| {
            let store = Arc::clone(&store);
            async move {
                let after = match cursor {
                    PageCursor::Done => return Ok(None),
                    PageCursor::Start => None,
                    PageCursor::After(reference_id) => Some(reference_id),
                };
                let page = store
                    .load_published_items(job_id, after, Some(page_size))
                    .await?;
                let next = match page.last() {
                    Some(last) if page.len() == page_size => PageCursor::After(last.reference_id()),
                    _ => PageCursor::Done,
                };
                if page.is_empty() {
                    return Ok(None);
                }
                Ok::<_, PublisherError>(Some((stream::iter(page.into_iter().map(Ok)), next)))
            }
        })
        .try_flatten()
        .boxed()
    }

    /// The most recent successful PUBLISH of a content item
    pub async fn find_last_published_item_status(
        &self,
        content_id: i64,
        pub_server_id: Option<i64>,
    ) -> PublisherResult<Option<PubItemStatus>> {
        let history = self
            .store
            .load_item_statuses_for_content(content_id, pub_server_id)
            .await?;
        Ok(history.into_iter().find(|row| {
            row.status == ItemStatus::Success && row.operation == Operation::Publish
        }))
    }

    /// Every item log row of a content item, newest first
    pub async fn find_publish_history(
        &self,
        content_id: i64,
        pub_server_id: Option<i64>,
    ) -> PublisherResult<Vec<PubItemStatus>> {
        self.store
            .load_item_statuses_for_content(content_id, pub_server_id)
            .await
    }

    // --- Ledger reads --------------------------------------------------------

    /// The read mode ledger reads use: relaxed only when preferred and supported
    pub fn read_mode(&self) -> ReadMode {
        if self.config.prefer_read_uncommitted && self.store.supports_read_uncommitted() {
            ReadMode::ReadUncommitted
        } else {
            ReadMode::Strict
        }
    }

    pub async fn find_site_items(&self, query: &SiteItemQuery) -> PublisherResult<Vec<SiteItem>> {
        self.store.find_site_items(query, self.read_mode()).await
    }

    /// Ledger read with an explicit mode; relaxed reads fall back to strict when unsupported
    pub async fn find_site_items_with_mode(
        &self,
        query: &SiteItemQuery,
        mode: ReadMode,
    ) -> PublisherResult<Vec<SiteItem>> {
        let mode = match mode {
            ReadMode::ReadUncommitted if !self.store.supports_read_uncommitted() => {
                ReadMode::Strict
            }
            mode => mode,
        };
        self.store.find_site_items(query, mode).await
    }

    /// Live ledger rows of a content item
    pub async fn find_live_site_items(
        &self,
        content_id: i64,
        pub_server_id: Option<i64>,
    ) -> PublisherResult<Vec<SiteItem>> {
        let query = SiteItemQuery {
            content_id: Some(content_id),
            pub_server_id,
            ..Default::default()
        };
        Ok(self
            .find_site_items(&query)
            .await?
            .into_iter()
            .filter(SiteItem::is_live)
            .collect())
    }

    /// Ledger rows of a site whose reference id is in `reference_ids`
    pub async fn find_site_items_by_reference(
        &self,
        site_id: i64,
        reference_ids: &[i64],
    ) -> PublisherResult<Vec<SiteItem>> {
        let items = self
            .find_site_items(&SiteItemQuery::for_site(site_id, None))
            .await?;
        Ok(items
            .into_iter()
            .filter(|item| reference_ids.contains(&item.reference_id))
            .collect())
    }

    // --- Task log ------------------------------------------------------------

    pub async fn log_task(&self, log: NewEditionTaskLog) -> PublisherResult<EditionTaskLog> {
        self.store.insert_task_log(log).await
    }

    pub async fn find_task_logs(&self, job_id: i64) -> PublisherResult<Vec<EditionTaskLog>> {
        self.store.load_task_logs(job_id).await
    }

    // --- Purge and retention -------------------------------------------------

    /// Remove a finished job's log rows; live ledger rows survive without their job link
    pub async fn purge_job_log(&self, job_id: i64) -> PublisherResult<PurgeSummary> {
        let status = self
            .store
            .load_pub_status(job_id)
            .await?
            .ok_or(PublisherError::JobMissing(job_id))?;
        if status.is_running() {
            return Err(PublisherError::Validation(format!(
                "job {job_id} is still running and cannot be purged"
            )));
        }

        let summary = self.store.purge_job(job_id).await?;
        info!(
            job_id,
            item_rows = summary.item_rows_removed,
            task_logs = summary.task_logs_removed,
            ledger_rows_detached = summary.ledger_rows_detached,
            "Purged job log"
        );
        Ok(summary)
    }

    /// Cutoff for `tracking.retention_days` relative to `now`
    pub fn retention_cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - Duration::days(self.config.retention_days)
    }

    /// Finished jobs that ended before `cutoff`
    pub async fn find_expired_jobs(
        &self,
        cutoff: DateTime<Utc>,
    ) -> PublisherResult<Vec<PubStatus>> {
        let jobs = self.store.query_pub_status(&PubStatusFilter::default()).await?;
        Ok(jobs
            .into_iter()
            .filter(|job| Self::ended_before(job, cutoff))
            .collect())
    }

    /// Expired jobs plus every hidden finished job
    pub async fn find_expired_and_hidden_jobs(
        &self,
        cutoff: DateTime<Utc>,
    ) -> PublisherResult<Vec<PubStatus>> {
        let jobs = self.store.query_pub_status(&PubStatusFilter::default()).await?;
        Ok(jobs
            .into_iter()
            .filter(|job| {
                Self::ended_before(job, cutoff) || (job.hidden && job.ending_state.is_terminal())
            })
            .collect())
    }

    /// Purge expired and hidden jobs, returning the purged job ids
    pub async fn purge_expired_jobs(&self, cutoff: DateTime<Utc>) -> PublisherResult<Vec<i64>> {
        let expired = self.find_expired_and_hidden_jobs(cutoff).await?;
        let mut purged = Vec::with_capacity(expired.len());
        for job in expired {
            self.purge_job_log(job.status_id).await?;
            purged.push(job.status_id);
        }
        info!(purged = purged.len(), cutoff = %cutoff, "Purged expired jobs");
        Ok(purged)
    }

    fn ended_before(job: &PubStatus, cutoff: DateTime<Utc>) -> bool {
        job.ending_state.is_terminal() && job.end_date.map_or(false, |end| end < cutoff)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;

    fn tracker_with_page_size(page_size: usize) -> StatusTracker {
        let mut config = PublisherConfig::default();
        config.tracking.item_page_size = page_size;
        StatusTracker::new(Arc::new(InMemoryStore::new()), EventPublisher::default(), &config)
    }

    fn item(job_id: i64, reference_id: i64, content_id: i64) -> PublishItem {
        PublishItem {
            reference_id,
            job_id,
            site_id: 1,
            pub_server_id: None,
            content_id,
            revision_id: 1,
            folder_id: Some(5),
            template_id: Some(300),
            delivery_context_id: 1,
            assembly_context_id: None,
            operation: Operation::Publish,
            location: Some(format!("/{content_id}.html")),
            delivery_type: Some("filesystem".to_string()),
            unpublish_ref_id: None,
            unpublish_info: None,
        }
    }

    #[tokio::test]
    async fn test_finalize_with_started_is_rejected() {
        let tracker = tracker_with_page_size(10);
        tracker.init_publishing_status(1, Utc::now(), 7, None).await.unwrap();
        let err = tracker
            .finished_publishing_status(1, Utc::now(), EndingState::Started)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn test_lazy_iteration_pages_through_all_items() {
        let tracker = tracker_with_page_size(2);
        tracker.init_publishing_status(1, Utc::now(), 7, None).await.unwrap();
        let ids = tracker.allocate_reference_ids(5).await.unwrap();
        let items: Vec<PublishItem> = ids
            .iter()
            .enumerate()
            .map(|(i, id)| item(1, *id, 100 + i as i64))
            .collect();
        tracker.record_dispatched(&items).await.unwrap();

        let streamed: Vec<PublishedItem> = tracker
            .iter_published_items(1)
            .try_collect()
            .await
            .unwrap();
        let streamed_ids: Vec<i64> = streamed.iter().map(PublishedItem::reference_id).collect();
        assert_eq!(streamed_ids, ids);
    }

    #[tokio::test]
    async fn test_outcomes_for_unknown_jobs_are_skipped() {
        let tracker = tracker_with_page_size(10);
        let summary = tracker
            .update_publishing_info(&[ItemOutcome::success(item(99, 1, 100))])
            .await
            .unwrap();
        assert_eq!(summary, RecordSummary::default());
    }

    #[tokio::test]
    async fn test_running_job_cannot_be_purged() {
        let tracker = tracker_with_page_size(10);
        tracker.init_publishing_status(1, Utc::now(), 7, None).await.unwrap();
        let err = tracker.purge_job_log(1).await.unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");
    }

    #[test]
    fn test_read_mode_follows_store_capability() {
        let tracker = tracker_with_page_size(10);
        assert_eq!(tracker.read_mode(), ReadMode::ReadUncommitted);

        let mut config = PublisherConfig::default();
        config.tracking.prefer_read_uncommitted = false;
        let strict = StatusTracker::new(
            Arc::new(InMemoryStore::new()),
            EventPublisher::default(),
            &config,
        );
        assert_eq!(strict.read_mode(), ReadMode::Strict);
    }
}
