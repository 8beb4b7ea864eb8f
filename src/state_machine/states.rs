use serde::{Deserialize, Serialize};
use std::fmt;

/// Ending state of a publishing job
///
/// `Started` is the only non-terminal state. A job left in `Started` by a process that
/// died stays visible as such until orphaned-job recovery reconciles it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EndingState {
    /// Job is running (or was orphaned while running)
    Started,
    /// All content lists ran and no item failed
    Completed,
    /// Job ran to the end but some lists, tasks or items failed
    #[serde(rename = "COMPLETED_W_FAILURE")]
    CompletedWithFailure,
    /// A user cancelled the job
    CanceledByUser,
    /// A gating pre-task, a content list or the store failed unrecoverably
    Aborted,
    /// The job's datasource or target became unavailable; retry with refreshed config
    #[serde(rename = "RESTARTNEEDED")]
    RestartNeeded,
}

impl EndingState {
    /// Check if this is a terminal state (no further transitions allowed)
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Started)
    }

    /// Check if the job ended without delivering everything it intended to
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            Self::CompletedWithFailure | Self::Aborted | Self::RestartNeeded
        )
    }

    /// Stable persisted representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Started => "STARTED",
            Self::Completed => "COMPLETED",
            Self::CompletedWithFailure => "COMPLETED_W_FAILURE",
            Self::CanceledByUser => "CANCELED_BY_USER",
            Self::Aborted => "ABORTED",
            Self::RestartNeeded => "RESTARTNEEDED",
        }
    }
}

impl fmt::Display for EndingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EndingState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "STARTED" => Ok(Self::Started),
            "COMPLETED" => Ok(Self::Completed),
            "COMPLETED_W_FAILURE" => Ok(Self::CompletedWithFailure),
            "CANCELED_BY_USER" => Ok(Self::CanceledByUser),
            "ABORTED" => Ok(Self::Aborted),
            "RESTARTNEEDED" => Ok(Self::RestartNeeded),
            _ => Err(format!("Invalid ending state: {s}")),
        }
    }
}

impl Default for EndingState {
    fn default() -> Self {
        Self::Started
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ending_state_terminal_check() {
        assert!(!EndingState::Started.is_terminal());
        assert!(EndingState::Completed.is_terminal());
        assert!(EndingState::CompletedWithFailure.is_terminal());
        assert!(EndingState::CanceledByUser.is_terminal());
        assert!(EndingState::Aborted.is_terminal());
        assert!(EndingState::RestartNeeded.is_terminal());
    }

    #[test]
    fn test_state_string_conversion() {
        assert_eq!(EndingState::CompletedWithFailure.to_string(), "COMPLETED_W_FAILURE");
        assert_eq!(
            "RESTARTNEEDED".parse::<EndingState>().unwrap(),
            EndingState::RestartNeeded
        );
        assert!("running".parse::<EndingState>().is_err());
    }

    #[test]
    fn test_state_serde() {
        let json = serde_json::to_string(&EndingState::CanceledByUser).unwrap();
        assert_eq!(json, "\"CANCELED_BY_USER\"");

        let parsed: EndingState = serde_json::from_str("\"COMPLETED_W_FAILURE\"").unwrap();
        assert_eq!(parsed, EndingState::CompletedWithFailure);
    }
}
