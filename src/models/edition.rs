//! # Edition Model
//!
//! An edition is a named, schedulable publishing job definition for one site. It
//! bundles ordered content list associations ([`EditionContentList`]) and signed
//! sequence pre/post tasks ([`EditionTaskDef`]).

use serde::{Deserialize, Serialize};
use std::fmt;

use super::ParameterMap;

/// Scheduling priority, ordinal 5 (highest) down to 1 (lowest)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Priority {
    Lowest,
    Low,
    Medium,
    High,
    Highest,
}

impl Priority {
    pub fn ordinal(&self) -> i32 {
        match self {
            Self::Highest => 5,
            Self::High => 4,
            Self::Medium => 3,
            Self::Low => 2,
            Self::Lowest => 1,
        }
    }

    pub fn from_ordinal(ordinal: i32) -> Option<Self> {
        match ordinal {
            5 => Some(Self::Highest),
            4 => Some(Self::High),
            3 => Some(Self::Medium),
            2 => Some(Self::Low),
            1 => Some(Self::Lowest),
            _ => None,
        }
    }
}

impl Default for Priority {
    fn default() -> Self {
        Self::Medium
    }
}

/// Automatic editions resolve and dispatch unpublish candidates before their lists
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EditionType {
    Automatic,
    Manual,
}

impl EditionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Automatic => "AUTOMATIC",
            Self::Manual => "MANUAL",
        }
    }
}

impl fmt::Display for EditionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EditionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "AUTOMATIC" => Ok(Self::Automatic),
            "MANUAL" => Ok(Self::Manual),
            _ => Err(format!("Invalid edition type: {s}")),
        }
    }
}

impl Default for EditionType {
    fn default() -> Self {
        Self::Manual
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edition {
    pub edition_id: i64,
    /// Unique across all editions
    pub name: String,
    pub display_title: String,
    pub edition_type: EditionType,
    pub site_id: i64,
    pub pub_server_id: Option<i64>,
    pub priority: Priority,
    pub comment: Option<String>,
    /// Whether a failed content list lets sibling lists run
    pub continue_on_failure: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewEdition {
    pub name: String,
    pub display_title: String,
    pub edition_type: EditionType,
    pub site_id: i64,
    pub pub_server_id: Option<i64>,
    pub priority: Priority,
    pub comment: Option<String>,
    pub continue_on_failure: bool,
}

impl NewEdition {
    pub fn new(name: impl Into<String>, site_id: i64) -> Self {
        let name = name.into();
        Self {
            display_title: name.clone(),
            name,
            edition_type: EditionType::default(),
            site_id,
            pub_server_id: None,
            priority: Priority::default(),
            comment: None,
            continue_on_failure: true,
        }
    }

    pub fn into_edition(self, edition_id: i64) -> Edition {
        Edition {
            edition_id,
            name: self.name,
            display_title: self.display_title,
            edition_type: self.edition_type,
            site_id: self.site_id,
            pub_server_id: self.pub_server_id,
            priority: self.priority,
            comment: self.comment,
            continue_on_failure: self.continue_on_failure,
        }
    }
}

/// Association of a content list with an edition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EditionContentList {
    pub edition_id: i64,
    pub content_list_id: i64,
    /// Lists run in ascending sequence order
    pub sequence: i32,
    pub delivery_context_id: i64,
    pub assembly_context_id: Option<i64>,
    pub auth_type: Option<i32>,
}

/// Pre or post task of an edition
///
/// A negative `sequence` makes this a pre-task, a positive one a post-task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EditionTaskDef {
    pub task_id: i64,
    pub edition_id: i64,
    pub sequence: i32,
    /// Registered edition task extension to invoke
    pub extension_name: String,
    pub params: ParameterMap,
    pub continue_on_failure: bool,
}

impl EditionTaskDef {
    pub fn is_pre_task(&self) -> bool {
        self.sequence < 0
    }

    pub fn is_post_task(&self) -> bool {
        self.sequence > 0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewEditionTaskDef {
    pub edition_id: i64,
    pub sequence: i32,
    pub extension_name: String,
    pub params: ParameterMap,
    pub continue_on_failure: bool,
}

impl NewEditionTaskDef {
    pub fn into_task_def(self, task_id: i64) -> EditionTaskDef {
        EditionTaskDef {
            task_id,
            edition_id: self.edition_id,
            sequence: self.sequence,
            extension_name: self.extension_name,
            params: self.params,
            continue_on_failure: self.continue_on_failure,
        }
    }
}

/// Split task definitions into (pre, post) in execution order
///
/// Both halves run in ascending sequence order, so the most negative pre-task runs
/// first. Tasks with sequence 0 belong to neither phase and are dropped.
pub fn partition_tasks(tasks: &[EditionTaskDef]) -> (Vec<EditionTaskDef>, Vec<EditionTaskDef>) {
    let mut ordered = tasks.to_vec();
    ordered.sort_by_key(|t| (t.sequence, t.task_id));
    let pre = ordered.iter().filter(|t| t.is_pre_task()).cloned().collect();
    let post = ordered.into_iter().filter(|t| t.is_post_task()).collect();
    (pre, post)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(task_id: i64, sequence: i32) -> EditionTaskDef {
        EditionTaskDef {
            task_id,
            edition_id: 1,
            sequence,
            extension_name: "noop".to_string(),
            params: ParameterMap::new(),
            continue_on_failure: true,
        }
    }

    #[test]
    fn test_priority_ordinals() {
        assert_eq!(Priority::Highest.ordinal(), 5);
        assert_eq!(Priority::Medium.ordinal(), 3);
        assert_eq!(Priority::Lowest.ordinal(), 1);
        assert_eq!(Priority::from_ordinal(4), Some(Priority::High));
        assert_eq!(Priority::from_ordinal(0), None);
        assert!(Priority::Highest > Priority::Low);
    }

    #[test]
    fn test_partition_orders_by_signed_sequence() {
        let tasks = vec![task(1, 2), task(2, -1), task(3, -5), task(4, 1), task(5, 0)];
        let (pre, post) = partition_tasks(&tasks);

        let pre_ids: Vec<i64> = pre.iter().map(|t| t.task_id).collect();
        let post_ids: Vec<i64> = post.iter().map(|t| t.task_id).collect();
        assert_eq!(pre_ids, vec![3, 2]);
        assert_eq!(post_ids, vec![4, 1]);
    }

    #[test]
    fn test_duplicate_sequences_keep_definition_order() {
        let tasks = vec![task(9, 3), task(4, 3)];
        let (_, post) = partition_tasks(&tasks);
        assert_eq!(post.iter().map(|t| t.task_id).collect::<Vec<_>>(), vec![4, 9]);
    }
}
