//! # Orphaned Job Recovery
//!
//! A job stays STARTED when its process dies mid-run. Recovery finds STARTED jobs
//! owned by this server identity that no local run holds, cancels their unfinished
//! items and finalizes them according to the configured [`RecoveryPolicy`]:
//!
//! | Policy | Ending state |
//! |---|---|
//! | `aborted` | `ABORTED` |
//! | `restart_needed` | `RESTARTNEEDED` |
//! | `health_check` | `RESTARTNEEDED` if the target is unreachable or the check fails, else `ABORTED` |

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::config::{RecoveryConfig, RecoveryPolicy};
use crate::constants::events as event_names;
use crate::error::PublisherResult;
use crate::events::JobLifecycleEvent;
use crate::models::{PubStatus, PubStatusFilter};
use crate::repository::TargetHealthCheck;
use crate::state_machine::{EndingState, JobEvent};
use crate::tracking::StatusTracker;

use super::types::RecoveredJob;

#[derive(Clone)]
pub struct OrphanedJobRecovery {
    tracker: StatusTracker,
    policy: RecoveryPolicy,
    check: Option<Arc<dyn TargetHealthCheck>>,
}

impl OrphanedJobRecovery {
    pub fn new(tracker: StatusTracker, config: &RecoveryConfig) -> Self {
        Self {
            tracker,
            policy: config.policy,
            check: None,
        }
    }

    pub fn with_target_check(mut self, check: Arc<dyn TargetHealthCheck>) -> Self {
        self.check = Some(check);
        self
    }

    /// STARTED jobs of this server identity not present in `active_job_ids`
    pub async fn find_orphaned_jobs(
        &self,
        active_job_ids: &HashSet<i64>,
    ) -> PublisherResult<Vec<PubStatus>> {
        let filter = PubStatusFilter {
            ending_state: Some(EndingState::Started),
            server_identity: Some(self.tracker.server_identity().to_string()),
            ..Default::default()
        };
        let running = self.tracker.query_pub_status(&filter).await?;
        Ok(running
            .into_iter()
            .filter(|job| !active_job_ids.contains(&job.status_id))
            .collect())
    }

    /// Finalize every orphaned job, oldest first
    pub async fn recover(
        &self,
        active_job_ids: &HashSet<i64>,
    ) -> PublisherResult<Vec<RecoveredJob>> {
        let mut orphans = self.find_orphaned_jobs(active_job_ids).await?;
        orphans.sort_by_key(|job| job.start_date);

        let mut recovered = Vec::with_capacity(orphans.len());
        for job in orphans {
            let event = self.recovery_event(&job).await;
            let items_cancelled = self.tracker.cancel_unfinished_job_items(job.status_id).await?;
            let status = self
                .tracker
                .finalize_job(job.status_id, event, Utc::now())
                .await?;

            info!(
                job_id = status.status_id,
                edition_id = status.edition_id,
                ending_state = %status.ending_state,
                items_cancelled,
                "Recovered orphaned job"
            );
            let payload =
                JobLifecycleEvent::new(status.status_id, status.edition_id, status.ending_state)
                    .with_counts(status.counts())
                    .with_reason("orphaned job recovered");
            if let Err(e) = self
                .tracker
                .event_publisher()
                .publish_payload(event_names::JOB_RECOVERED, &payload)
                .await
            {
                debug!(job_id = status.status_id, error = %e, "Failed to publish recovery event");
            }

            recovered.push(RecoveredJob {
                job_id: status.status_id,
                edition_id: status.edition_id,
                ending_state: status.ending_state,
                items_cancelled,
            });
        }
        Ok(recovered)
    }

    async fn recovery_event(&self, job: &PubStatus) -> JobEvent {
        match self.policy {
            RecoveryPolicy::Aborted => JobEvent::abort("orphaned job"),
            RecoveryPolicy::RestartNeeded => {
                JobEvent::RequireRestart("orphaned job".to_string())
            }
            RecoveryPolicy::HealthCheck => {
                let Some(check) = &self.check else {
                    warn!(
                        job_id = job.status_id,
                        "Health check recovery policy without a target check, aborting job"
                    );
                    return JobEvent::abort("orphaned job");
                };
                match check.is_reachable(job).await {
                    Ok(true) => JobEvent::abort("orphaned job"),
                    Ok(false) => JobEvent::RequireRestart("publish target unreachable".to_string()),
                    Err(e) => {
                        warn!(job_id = job.status_id, error = %e, "Target health check failed");
                        JobEvent::RequireRestart(format!("target health check failed: {e}"))
                    }
                }
            }
        }
    }
}
