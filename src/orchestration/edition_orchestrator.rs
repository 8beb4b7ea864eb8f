//! # Edition Orchestrator
//!
//! Runs one edition as one publishing job.
//!
//! ```text
//!  init_publishing_status (STARTED)
//!        │
//!  pre-tasks (ascending sequence) ──gate failure──┐
//!        │                                        │
//!  [AUTOMATIC] resolve + dispatch unpublish       │
//!        │                                        │
//!  content lists (ascending sequence)             │
//!        │  engine ──► dispatch batches           │
//!        │                                        │
//!  post-tasks ◄───────── only if post_tasks_on_abort
//!        │
//!  finalize: COMPLETED | COMPLETED_W_FAILURE | CANCELED_BY_USER | ABORTED
//! ```
//!
//! Distinct editions may run concurrently. A second run of an edition this process is
//! already running is rejected with `ALREADY_RUNNING`; the orchestrator does not
//! coordinate with other processes beyond exposing STARTED jobs.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::config::{OrchestrationConfig, PublisherConfig, RecoveryConfig};
use crate::constants::events as event_names;
use crate::content_list::{ContentListEngine, ContentListRun};
use crate::error::{PublisherError, PublisherResult};
use crate::events::{ContentListEvent, EventPublisher};
use crate::extensions::TaskContext;
use crate::logging::{log_error, log_job_operation};
use crate::models::{
    partition_tasks, ContentListItem, Edition, EditionContentList, EditionType, ItemCounts,
};
use crate::registry::ExtensionCache;
use crate::repository::{AssemblyDispatcher, TargetHealthCheck};
use crate::state_machine::{EndingState, JobEvent};
use crate::store::PublishingStore;
use crate::tracking::StatusTracker;
use crate::unpublish::{UnpublishRequest, UnpublishResolver};

use super::dispatch::{ItemDispatcher, JobCancellation};
use super::edition_tasks::{EditionTaskRunner, TaskPhase};
use super::recovery::OrphanedJobRecovery;
use super::types::{ContentListReport, EditionRunReport, RecoveredJob, TaskPhaseResult};

#[derive(Debug, Clone)]
struct ActiveJob {
    job_id: i64,
    cancellation: JobCancellation,
}

/// Removes the edition's active entry when the run ends, however it ends
struct ActiveJobGuard {
    active_jobs: Arc<DashMap<i64, ActiveJob>>,
    edition_id: i64,
    job_id: i64,
}

impl Drop for ActiveJobGuard {
    fn drop(&mut self) {
        self.active_jobs
            .remove_if(&self.edition_id, |_, job| job.job_id == self.job_id);
    }
}

/// A job whose status row exists and which is registered as active
struct PreparedJob {
    edition: Edition,
    job_id: i64,
    started_at: DateTime<Utc>,
    pub_server_id: Option<i64>,
    cancellation: JobCancellation,
}

/// Handle of an edition running on the tokio runtime
#[derive(Debug)]
pub struct SpawnedEdition {
    pub job_id: i64,
    pub handle: JoinHandle<PublisherResult<EditionRunReport>>,
}

#[derive(Clone)]
pub struct EditionOrchestrator {
    store: Arc<dyn PublishingStore>,
    tracker: StatusTracker,
    engine: ContentListEngine,
    resolver: UnpublishResolver,
    task_runner: EditionTaskRunner,
    dispatcher: ItemDispatcher,
    event_publisher: EventPublisher,
    active_jobs: Arc<DashMap<i64, ActiveJob>>,
    job_slots: Option<Arc<Semaphore>>,
    config: OrchestrationConfig,
    recovery: RecoveryConfig,
    default_pub_server_id: Option<i64>,
    target_check: Option<Arc<dyn TargetHealthCheck>>,
}

impl EditionOrchestrator {
    pub fn new(
        config: &PublisherConfig,
        tracker: StatusTracker,
        engine: ContentListEngine,
        resolver: UnpublishResolver,
        assembly: Arc<dyn AssemblyDispatcher>,
    ) -> Self {
        let job_slots = (config.orchestration.max_concurrent_jobs > 0)
            .then(|| Arc::new(Semaphore::new(config.orchestration.max_concurrent_jobs)));
        Self {
            store: Arc::clone(tracker.store()),
            event_publisher: tracker.event_publisher().clone(),
            task_runner: EditionTaskRunner::new(tracker.clone()),
            dispatcher: ItemDispatcher::new(
                tracker.clone(),
                assembly,
                config.orchestration.dispatch_batch_size,
            ),
            tracker,
            engine,
            resolver,
            active_jobs: Arc::new(DashMap::new()),
            job_slots,
            config: config.orchestration.clone(),
            recovery: config.recovery.clone(),
            default_pub_server_id: config.server.pub_server_id,
            target_check: None,
        }
    }

    pub fn with_target_check(mut self, check: Arc<dyn TargetHealthCheck>) -> Self {
        self.target_check = Some(check);
        self
    }

    pub fn tracker(&self) -> &StatusTracker {
        &self.tracker
    }

    /// Run an edition to completion on the current task
    pub async fn run_edition(&self, edition_id: i64) -> PublisherResult<EditionRunReport> {
        let prepared = self.start_job(edition_id).await?;
        self.execute(prepared).await
    }

    /// Start an edition's job and run it on the tokio runtime
    ///
    /// The job's status row exists when this returns, so the job id can be used with
    /// [`cancel_job`](Self::cancel_job) right away.
    pub async fn spawn_edition(&self, edition_id: i64) -> PublisherResult<SpawnedEdition> {
        let prepared = self.start_job(edition_id).await?;
        let job_id = prepared.job_id;
        let orchestrator = self.clone();
        let handle = tokio::spawn(async move { orchestrator.execute(prepared).await });
        Ok(SpawnedEdition { job_id, handle })
    }

    /// Request cancellation of a job
    ///
    /// A job running in this process stops dispatching and finalizes itself as
    /// CANCELED_BY_USER. A STARTED job no local run holds is cancelled directly.
    /// Returns `false` when the job had already finished.
    pub async fn cancel_job(&self, job_id: i64) -> PublisherResult<bool> {
        let local = self
            .active_jobs
            .iter()
            .find(|entry| entry.value().job_id == job_id)
            .map(|entry| entry.value().cancellation.clone());
        if let Some(cancellation) = local {
            cancellation.cancel();
            info!(job_id, "Cancellation requested for running job");
            return Ok(true);
        }

        let status = self
            .tracker
            .find_pub_status(job_id)
            .await?
            .ok_or(PublisherError::JobMissing(job_id))?;
        if !status.is_running() {
            debug!(job_id, ending_state = %status.ending_state, "Job already finished");
            return Ok(false);
        }
        self.tracker.cancel_unfinished_job_items(job_id).await?;
        self.tracker
            .finalize_job(job_id, JobEvent::Cancel, Utc::now())
            .await?;
        Ok(true)
    }

    /// Job id of the edition's run in this process, if any
    pub fn active_job(&self, edition_id: i64) -> Option<i64> {
        self.active_jobs.get(&edition_id).map(|job| job.job_id)
    }

    pub fn active_job_ids(&self) -> HashSet<i64> {
        self.active_jobs.iter().map(|entry| entry.value().job_id).collect()
    }

    /// Reconcile STARTED jobs of this server identity that no local run holds
    pub async fn recover_orphaned_jobs(&self) -> PublisherResult<Vec<RecoveredJob>> {
        let mut recovery = OrphanedJobRecovery::new(self.tracker.clone(), &self.recovery);
        if let Some(check) = &self.target_check {
            recovery = recovery.with_target_check(Arc::clone(check));
        }
        recovery.recover(&self.active_job_ids()).await
    }

    /// Startup hook: runs recovery when `recovery.run_on_startup` is set
    pub async fn initialize(&self) -> PublisherResult<Vec<RecoveredJob>> {
        if !self.recovery.run_on_startup {
            return Ok(Vec::new());
        }
        self.recover_orphaned_jobs().await
    }

    async fn start_job(&self, edition_id: i64) -> PublisherResult<PreparedJob> {
        let edition = self
            .store
            .load_edition(edition_id)
            .await?
            .ok_or_else(|| PublisherError::EditionMissing(edition_id.to_string()))?;
        let job_id = self.tracker.allocate_job_id().await?;
        let cancellation = JobCancellation::new();

        match self.active_jobs.entry(edition_id) {
            dashmap::mapref::entry::Entry::Occupied(running) => {
                return Err(PublisherError::AlreadyRunning {
                    edition_id,
                    job_id: running.get().job_id,
                });
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(ActiveJob {
                    job_id,
                    cancellation: cancellation.clone(),
                });
            }
        }

        let started_at = Utc::now();
        let pub_server_id = edition.pub_server_id.or(self.default_pub_server_id);
        if let Err(e) = self
            .tracker
            .init_publishing_status(job_id, started_at, edition_id, pub_server_id)
            .await
        {
            self.active_jobs
                .remove_if(&edition_id, |_, job| job.job_id == job_id);
            return Err(e);
        }

        Ok(PreparedJob {
            edition,
            job_id,
            started_at,
            pub_server_id,
            cancellation,
        })
    }

    #[instrument(
        skip(self, prepared),
        fields(job_id = prepared.job_id, edition_id = prepared.edition.edition_id)
    )]
    async fn execute(&self, prepared: PreparedJob) -> PublisherResult<EditionRunReport> {
        let _guard = ActiveJobGuard {
            active_jobs: Arc::clone(&self.active_jobs),
            edition_id: prepared.edition.edition_id,
            job_id: prepared.job_id,
        };
        let _permit = match &self.job_slots {
            Some(slots) => Some(Arc::clone(slots).acquire_owned().await.map_err(|_| {
                PublisherError::Configuration("job slots are closed".to_string())
            })?),
            None => None,
        };

        match self.run_phases(&prepared).await {
            Ok(report) => Ok(report),
            Err(e) => {
                log_error("edition_orchestrator", Some(prepared.job_id), &e);
                if let Err(cancel_error) =
                    self.tracker.cancel_unfinished_job_items(prepared.job_id).await
                {
                    warn!(
                        job_id = prepared.job_id,
                        error = %cancel_error,
                        "Failed to cancel unfinished items after error"
                    );
                }
                if let Err(finalize_error) = self
                    .tracker
                    .finalize_job(prepared.job_id, JobEvent::abort(e.to_string()), Utc::now())
                    .await
                {
                    warn!(
                        job_id = prepared.job_id,
                        error = %finalize_error,
                        "Failed to abort job after error"
                    );
                }
                Err(e)
            }
        }
    }

    async fn run_phases(&self, prepared: &PreparedJob) -> PublisherResult<EditionRunReport> {
        let edition = &prepared.edition;
        let job_id = prepared.job_id;
        let cache = ExtensionCache::new(Arc::clone(self.engine.registry()));
        let task_context = TaskContext {
            job_id,
            edition_id: edition.edition_id,
            site_id: edition.site_id,
            pub_server_id: prepared.pub_server_id,
        };
        log_job_operation(
            "run_edition",
            job_id,
            Some(edition.edition_id),
            EndingState::Started.as_str(),
            Some(edition.name.as_str()),
        );

        let task_defs = self.store.load_task_defs(edition.edition_id).await?;
        let (pre_tasks, post_tasks) = partition_tasks(&task_defs);

        let pre = self
            .task_runner
            .run_phase(TaskPhase::Pre, &pre_tasks, &cache, &task_context)
            .await?;
        let mut failures = pre.failures();
        let mut abort_reason = pre.gate.as_ref().map(|gate| {
            format!(
                "pre-task {} ({}) failed: {}",
                gate.task_id,
                gate.extension_name,
                gate.message.as_deref().unwrap_or("no message")
            )
        });

        let mut content_lists = Vec::new();
        let mut unpublish_dispatched = 0;
        let mut items_dispatched = 0;

        if !pre.is_gated() {
            if edition.edition_type == EditionType::Automatic
                && !prepared.cancellation.is_cancelled()
            {
                match self.dispatch_unpublish(prepared).await {
                    Ok(count) => {
                        unpublish_dispatched = count;
                        items_dispatched += count;
                    }
                    Err(e) => {
                        log_error("unpublish_resolver", Some(job_id), &e);
                        failures += 1;
                        if !edition.continue_on_failure || e.is_retryable() {
                            abort_reason = Some(format!("unpublish resolution failed: {e}"));
                        }
                    }
                }
            }

            if abort_reason.is_none() {
                let associations = self
                    .store
                    .load_edition_content_lists(edition.edition_id)
                    .await?;
                for association in &associations {
                    if prepared.cancellation.is_cancelled() {
                        break;
                    }
                    let (report, error) = self.run_association(prepared, association, &cache).await;
                    items_dispatched += report.items_dispatched;
                    content_lists.push(report);

                    if let Some(e) = error {
                        failures += 1;
                        if !edition.continue_on_failure || e.is_retryable() {
                            abort_reason = Some(format!(
                                "content list {} failed: {e}",
                                association.content_list_id
                            ));
                            break;
                        }
                    }
                }
            }
        }

        let cancelled = prepared.cancellation.is_cancelled();
        let post_tasks_skipped =
            cancelled || (pre.is_gated() && !self.config.post_tasks_on_abort);
        let post = if post_tasks_skipped {
            debug!(job_id, cancelled, "Skipping post-tasks");
            TaskPhaseResult::default()
        } else {
            self.task_runner
                .run_phase(TaskPhase::Post, &post_tasks, &cache, &task_context)
                .await?
        };
        failures += post.failures();

        let event = if cancelled {
            self.tracker.cancel_unfinished_job_items(job_id).await?;
            JobEvent::Cancel
        } else if let Some(reason) = &abort_reason {
            self.tracker.cancel_unfinished_job_items(job_id).await?;
            JobEvent::abort(reason.clone())
        } else {
            let counts = self.store.count_items(job_id).await?;
            if failures > 0 || counts.failed > 0 {
                JobEvent::CompleteWithFailures
            } else {
                JobEvent::Complete
            }
        };
        let status = self.tracker.finalize_job(job_id, event, Utc::now()).await?;

        info!(
            job_id,
            edition_id = edition.edition_id,
            ending_state = %status.ending_state,
            content_lists = content_lists.len(),
            items_dispatched,
            "Edition run finished"
        );

        Ok(EditionRunReport {
            job_id,
            edition_id: edition.edition_id,
            ending_state: status.ending_state,
            started_at: prepared.started_at,
            ended_at: status.end_date,
            pre_tasks: pre,
            post_tasks: post,
            post_tasks_skipped,
            content_lists,
            unpublish_dispatched,
            items_dispatched,
            counts: ItemCounts {
                delivered: status.delivered_count,
                removed: status.removed_count,
                failed: status.failed_count,
            },
            abort_reason,
        })
    }

    /// Resolve the edition's removal set and dispatch it as UNPUBLISH items
    async fn dispatch_unpublish(&self, prepared: &PreparedJob) -> PublisherResult<usize> {
        let request = UnpublishRequest::for_site(prepared.edition.site_id, prepared.pub_server_id);
        let candidates = self.resolver.resolve_candidates(&request).await?;
        let items: Vec<ContentListItem> = candidates
            .iter()
            .map(|candidate| ContentListEngine::unpublish_item(&candidate.site_item))
            .collect();

        let payload = serde_json::json!({
            "job_id": prepared.job_id,
            "site_id": prepared.edition.site_id,
            "candidates": items.len(),
        });
        if let Err(e) = self
            .event_publisher
            .publish(event_names::UNPUBLISH_RESOLVED, payload)
            .await
        {
            debug!(job_id = prepared.job_id, error = %e, "Failed to publish unpublish event");
        }

        let outcome = self
            .dispatcher
            .dispatch(prepared.job_id, items, None, &prepared.cancellation)
            .await?;
        Ok(outcome.dispatched)
    }

    async fn run_association(
        &self,
        prepared: &PreparedJob,
        association: &EditionContentList,
        cache: &ExtensionCache,
    ) -> (ContentListReport, Option<PublisherError>) {
        let mut report = ContentListReport {
            content_list_id: association.content_list_id,
            content_list_name: None,
            sequence: association.sequence,
            delivery_context_id: association.delivery_context_id,
            items_dispatched: 0,
            error_code: None,
            error: None,
        };

        let result = self
            .run_list(prepared, association, cache, &mut report)
            .await;

        let name = report
            .content_list_name
            .clone()
            .unwrap_or_else(|| association.content_list_id.to_string());
        let (event_name, error) = match result {
            Ok(()) => (event_names::CONTENT_LIST_COMPLETED, None),
            Err(e) => {
                warn!(
                    job_id = prepared.job_id,
                    content_list = %name,
                    error_code = e.code(),
                    error = %e,
                    "Content list failed"
                );
                report.error_code = Some(e.code().to_string());
                report.error = Some(e.to_string());
                (event_names::CONTENT_LIST_FAILED, Some(e))
            }
        };

        let payload = ContentListEvent {
            job_id: prepared.job_id,
            content_list_id: association.content_list_id,
            content_list_name: name,
            item_count: report.items_dispatched,
            error: report.error.clone(),
        };
        if let Err(e) = self.event_publisher.publish_payload(event_name, &payload).await {
            debug!(job_id = prepared.job_id, error = %e, "Failed to publish content list event");
        }

        (report, error)
    }

    async fn run_list(
        &self,
        prepared: &PreparedJob,
        association: &EditionContentList,
        cache: &ExtensionCache,
        report: &mut ContentListReport,
    ) -> PublisherResult<()> {
        let list = self
            .store
            .load_content_list(association.content_list_id)
            .await?
            .ok_or_else(|| PublisherError::ListMissing(association.content_list_id.to_string()))?;
        report.content_list_name = Some(list.name.clone());

        let run = ContentListRun::publish(prepared.edition.site_id, association.delivery_context_id)
            .with_server(prepared.pub_server_id);
        let results = self
            .engine
            .run_content_list_with_cache(&list, &run, cache)
            .await?;

        let outcome = self
            .dispatcher
            .dispatch(
                prepared.job_id,
                results.items,
                association.assembly_context_id,
                &prepared.cancellation,
            )
            .await?;
        report.items_dispatched = outcome.dispatched;
        Ok(())
    }
}
