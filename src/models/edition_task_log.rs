use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Append-only record of one edition task execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EditionTaskLog {
    /// Strictly increasing within a job
    pub reference_id: i64,
    pub job_id: i64,
    pub edition_id: i64,
    pub task_id: i64,
    pub elapsed_ms: i64,
    pub success: bool,
    pub message: Option<String>,
    pub logged_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewEditionTaskLog {
    pub job_id: i64,
    pub edition_id: i64,
    pub task_id: i64,
    pub elapsed_ms: i64,
    pub success: bool,
    pub message: Option<String>,
}

impl NewEditionTaskLog {
    pub fn into_log(self, reference_id: i64, logged_at: DateTime<Utc>) -> EditionTaskLog {
        EditionTaskLog {
            reference_id,
            job_id: self.job_id,
            edition_id: self.edition_id,
            task_id: self.task_id,
            elapsed_ms: self.elapsed_ms,
            success: self.success,
            message: self.message,
            logged_at,
        }
    }
}
