use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use super::{events::JobEvent, states::EndingState};
use crate::constants::events as event_names;
use crate::error::{PublisherError, PublisherResult};
use crate::events::{EventPublisher, JobLifecycleEvent};
use crate::models::PubStatus;
use crate::store::PublishingStore;

/// Result of a finalization attempt
#[derive(Debug, Clone, PartialEq)]
pub enum TransitionOutcome {
    /// The job moved out of `STARTED`
    Transitioned(PubStatus),
    /// The job already ended in the requested state; nothing was written
    AlreadyFinal(PubStatus),
}

impl TransitionOutcome {
    pub fn status(&self) -> &PubStatus {
        match self {
            Self::Transitioned(status) | Self::AlreadyFinal(status) => status,
        }
    }

    pub fn into_status(self) -> PubStatus {
        match self {
            Self::Transitioned(status) | Self::AlreadyFinal(status) => status,
        }
    }

    pub fn changed(&self) -> bool {
        matches!(self, Self::Transitioned(_))
    }
}

/// Determine the target state based on current state and event
///
/// Returns `Ok(None)` when the job already ended in the event's target state.
pub fn determine_target_state(
    current_state: EndingState,
    event: &JobEvent,
) -> PublisherResult<Option<EndingState>> {
    let target = event.target_state();
    match current_state {
        EndingState::Started => Ok(Some(target)),
        finished if finished == target => Ok(None),
        from_state => Err(PublisherError::InvalidTransition {
            from: from_state.to_string(),
            event: event.event_type().to_string(),
        }),
    }
}

/// Persisted state machine for one job's `PubStatus` row
pub struct JobStateMachine {
    job_id: i64,
    store: Arc<dyn PublishingStore>,
    event_publisher: EventPublisher,
}

impl JobStateMachine {
    pub fn new(
        job_id: i64,
        store: Arc<dyn PublishingStore>,
        event_publisher: EventPublisher,
    ) -> Self {
        Self {
            job_id,
            store,
            event_publisher,
        }
    }

    pub fn job_id(&self) -> i64 {
        self.job_id
    }

    async fn load(&self) -> PublisherResult<PubStatus> {
        self.store
            .load_pub_status(self.job_id)
            .await?
            .ok_or(PublisherError::JobMissing(self.job_id))
    }

    /// Get the current state of the job
    pub async fn current_state(&self) -> PublisherResult<EndingState> {
        Ok(self.load().await?.ending_state)
    }

    pub async fn is_terminal(&self) -> PublisherResult<bool> {
        Ok(self.current_state().await?.is_terminal())
    }

    /// Finalize the job with `event`, stamping `ended_at` as its end date
    pub async fn transition(
        &self,
        event: JobEvent,
        ended_at: DateTime<Utc>,
    ) -> PublisherResult<TransitionOutcome> {
        let mut status = self.load().await?;
        let Some(target_state) = determine_target_state(status.ending_state, &event)? else {
            debug!(
                job_id = self.job_id,
                ending_state = %status.ending_state,
                "Job already finalized in requested state"
            );
            return Ok(TransitionOutcome::AlreadyFinal(status));
        };

        let from_state = status.ending_state;
        status.ending_state = target_state;
        status.end_date = Some(ended_at);
        self.store.update_pub_status(&status).await?;

        info!(
            job_id = self.job_id,
            edition_id = status.edition_id,
            from = %from_state,
            to = %target_state,
            event = event.event_type(),
            "Job state transition"
        );

        self.publish_transition(&status, &event).await;
        Ok(TransitionOutcome::Transitioned(status))
    }

    async fn publish_transition(&self, status: &PubStatus, event: &JobEvent) {
        let name = match event {
            JobEvent::Cancel => event_names::JOB_CANCELLED,
            _ => event_names::JOB_FINISHED,
        };
        let mut payload =
            JobLifecycleEvent::new(status.status_id, status.edition_id, status.ending_state);
        if let Some(reason) = event.reason().filter(|r| !r.is_empty()) {
            payload = payload.with_reason(reason);
        }
        if let Err(e) = self.event_publisher.publish_payload(name, &payload).await {
            debug!(job_id = self.job_id, error = %e, "Failed to publish job transition event");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;

    #[test]
    fn test_started_transitions_to_every_terminal_state() {
        for event in [
            JobEvent::Complete,
            JobEvent::CompleteWithFailures,
            JobEvent::Cancel,
            JobEvent::abort("pre-task failed"),
            JobEvent::RequireRestart("target offline".to_string()),
        ] {
            let target = determine_target_state(EndingState::Started, &event).unwrap();
            assert_eq!(target, Some(event.target_state()));
        }
    }

    #[test]
    fn test_repeating_final_state_is_noop() {
        assert_eq!(
            determine_target_state(EndingState::Aborted, &JobEvent::abort("again")).unwrap(),
            None
        );
    }

    #[test]
    fn test_terminal_state_rejects_different_event() {
        let err = determine_target_state(EndingState::Completed, &JobEvent::Cancel).unwrap_err();
        assert_eq!(err.code(), "INVALID_TRANSITION");
    }

    #[tokio::test]
    async fn test_transition_persists_end_date_and_publishes() {
        let store = Arc::new(InMemoryStore::new());
        let started = Utc::now();
        store
            .insert_pub_status(&PubStatus::started(3, 1, None, started, "node-a"))
            .await
            .unwrap();

        let publisher = EventPublisher::new(8);
        let mut events = publisher.subscribe();
        let machine = JobStateMachine::new(3, store.clone(), publisher);

        let outcome = machine.transition(JobEvent::Cancel, started).await.unwrap();
        assert!(outcome.changed());
        assert_eq!(outcome.status().ending_state, EndingState::CanceledByUser);
        assert_eq!(outcome.status().end_date, Some(started));
        assert_eq!(events.recv().await.unwrap().name, event_names::JOB_CANCELLED);

        let again = machine.transition(JobEvent::Cancel, Utc::now()).await.unwrap();
        assert!(!again.changed());
        assert_eq!(again.status().end_date, Some(started));
    }

    #[tokio::test]
    async fn test_missing_job_is_reported() {
        let machine = JobStateMachine::new(
            99,
            Arc::new(InMemoryStore::new()),
            EventPublisher::default(),
        );
        assert_eq!(
            machine.current_state().await.unwrap_err(),
            PublisherError::JobMissing(99)
        );
    }
}
