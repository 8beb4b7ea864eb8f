use serde::{Deserialize, Serialize};

use super::states::EndingState;

/// Events that finalize a publishing job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum JobEvent {
    /// Every list ran and no failure was recorded
    Complete,
    /// The job ran to the end with recorded failures
    CompleteWithFailures,
    /// A user cancelled the job
    Cancel,
    /// The job could not continue
    Abort(String),
    /// The job's target became unavailable and should be retried
    RequireRestart(String),
}

impl JobEvent {
    /// Get a string representation of the event type for logging
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Complete => "complete",
            Self::CompleteWithFailures => "complete_with_failures",
            Self::Cancel => "cancel",
            Self::Abort(_) => "abort",
            Self::RequireRestart(_) => "require_restart",
        }
    }

    /// Extract the reason carried by abort-like events
    pub fn reason(&self) -> Option<&str> {
        match self {
            Self::Abort(reason) | Self::RequireRestart(reason) => Some(reason),
            _ => None,
        }
    }

    /// The ending state this event finalizes a job into
    pub fn target_state(&self) -> EndingState {
        match self {
            Self::Complete => EndingState::Completed,
            Self::CompleteWithFailures => EndingState::CompletedWithFailure,
            Self::Cancel => EndingState::CanceledByUser,
            Self::Abort(_) => EndingState::Aborted,
            Self::RequireRestart(_) => EndingState::RestartNeeded,
        }
    }

    /// Map a requested ending state back onto the event that produces it
    pub fn for_ending_state(state: EndingState) -> Option<Self> {
        match state {
            EndingState::Started => None,
            EndingState::Completed => Some(Self::Complete),
            EndingState::CompletedWithFailure => Some(Self::CompleteWithFailures),
            EndingState::CanceledByUser => Some(Self::Cancel),
            EndingState::Aborted => Some(Self::Abort(String::new())),
            EndingState::RestartNeeded => Some(Self::RequireRestart(String::new())),
        }
    }

    pub fn abort(reason: impl Into<String>) -> Self {
        Self::Abort(reason.into())
    }
}
