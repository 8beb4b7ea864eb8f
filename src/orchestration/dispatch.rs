//! # Item Dispatch
//!
//! Hands content list work items to the external assembly path in batches. Each
//! batch gets reference ids from the shared sequence, is logged as UNDEFINED, and is
//! then passed to the [`AssemblyDispatcher`]. Delivery outcomes arrive later through
//! [`StatusTracker::update_publishing_info`], possibly out of order.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, info};

use crate::error::PublisherResult;
use crate::models::{ContentListItem, PublishItem};
use crate::repository::AssemblyDispatcher;
use crate::tracking::StatusTracker;

use super::types::DispatchOutcome;

/// Cancellation signal shared between a running job and `cancel_job`
#[derive(Debug, Clone, Default)]
pub struct JobCancellation {
    cancelled: Arc<AtomicBool>,
}

impl JobCancellation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

#[derive(Clone)]
pub struct ItemDispatcher {
    tracker: StatusTracker,
    dispatcher: Arc<dyn AssemblyDispatcher>,
    batch_size: usize,
}

impl std::fmt::Debug for ItemDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ItemDispatcher")
            .field("batch_size", &self.batch_size)
            .finish()
    }
}

impl ItemDispatcher {
    pub fn new(
        tracker: StatusTracker,
        dispatcher: Arc<dyn AssemblyDispatcher>,
        batch_size: usize,
    ) -> Self {
        Self {
            tracker,
            dispatcher,
            batch_size: batch_size.max(1),
        }
    }

    /// Dispatch `items` for `job_id`, stopping before the next batch once cancelled
    pub async fn dispatch(
        &self,
        job_id: i64,
        items: Vec<ContentListItem>,
        assembly_context_id: Option<i64>,
        cancellation: &JobCancellation,
    ) -> PublisherResult<DispatchOutcome> {
        let mut outcome = DispatchOutcome::default();
        let mut remaining = items.into_iter().peekable();

        while remaining.peek().is_some() {
            if cancellation.is_cancelled() {
                info!(
                    job_id,
                    dispatched = outcome.dispatched,
                    "Job cancelled, no further items dispatched"
                );
                outcome.cancelled = true;
                break;
            }

            let batch: Vec<ContentListItem> = remaining.by_ref().take(self.batch_size).collect();
            let reference_ids = self.tracker.allocate_reference_ids(batch.len()).await?;
            let work: Vec<PublishItem> = batch
                .into_iter()
                .zip(reference_ids)
                .map(|(item, reference_id)| {
                    item.into_publish_item(job_id, reference_id, assembly_context_id)
                })
                .collect();

            self.tracker.record_dispatched(&work).await?;
            let count = work.len();
            self.dispatcher.dispatch(work).await?;

            outcome.dispatched += count;
            outcome.batches += 1;
            debug!(job_id, batch = outcome.batches, items = count, "Dispatched item batch");
        }

        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancellation_is_shared_between_clones() {
        let flag = JobCancellation::new();
        let observer = flag.clone();
        assert!(!observer.is_cancelled());
        flag.cancel();
        assert!(observer.is_cancelled());
    }
}
