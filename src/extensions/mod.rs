//! # Extension Points
//!
//! Name-addressed plugins invoked by the content list engine and the edition
//! orchestrator:
//!
//! | Trait | Invoked by | Input | Output |
//! |---|---|---|---|
//! | [`ContentGenerator`] | content list engine | merged parameter map | candidate rows |
//! | [`ItemFilter`] | content list engine | candidate content ids | surviving ids |
//! | [`TemplateExpander`] | content list engine | filtered rows + summaries | (content, template) items |
//! | [`EditionTask`] | edition orchestrator | task parameter map | success + message |
//!
//! Implementations are registered under a string key in the
//! [`ExtensionRegistry`](crate::registry::ExtensionRegistry). Built-in implementations
//! live in [`builtin`].

pub mod builtin;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::PublisherResult;
use crate::models::ParameterMap;
use crate::repository::{ContentRepository, ContentSummary};

pub use builtin::{
    NoopEditionTask, SelectedItemsGenerator, TemplateMapExpander, ValidFlagItemFilter,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtensionKind {
    Generator,
    Filter,
    Expander,
    EditionTask,
}

impl ExtensionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Generator => "generator",
            Self::Filter => "filter",
            Self::Expander => "expander",
            Self::EditionTask => "edition_task",
        }
    }
}

impl fmt::Display for ExtensionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ambient data for one content list run
#[derive(Clone)]
pub struct ExtensionContext {
    pub site_id: i64,
    pub delivery_context_id: i64,
    pub pub_server_id: Option<i64>,
    /// `false` when the run computes unpublish work
    pub publish: bool,
    pub repository: Arc<dyn ContentRepository>,
}

impl fmt::Debug for ExtensionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtensionContext")
            .field("site_id", &self.site_id)
            .field("delivery_context_id", &self.delivery_context_id)
            .field("pub_server_id", &self.pub_server_id)
            .field("publish", &self.publish)
            .finish()
    }
}

/// Candidate produced by a generator
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GeneratedRow {
    pub content_id: i64,
    pub content_type_id: i64,
    pub revision_id: Option<i64>,
    pub folder_id: Option<i64>,
}

impl GeneratedRow {
    pub fn new(content_id: i64, content_type_id: i64) -> Self {
        Self {
            content_id,
            content_type_id,
            revision_id: None,
            folder_id: None,
        }
    }
}

/// One (content, template) pair produced by an expander
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExpandedItem {
    pub content_id: i64,
    pub template_id: i64,
    pub revision_id: Option<i64>,
    pub folder_id: Option<i64>,
    pub location: Option<String>,
    pub delivery_type: Option<String>,
}

#[async_trait]
pub trait ContentGenerator: Send + Sync {
    /// `params` always carries the site and delivery context keys
    async fn generate(
        &self,
        params: &ParameterMap,
        context: &ExtensionContext,
    ) -> PublisherResult<Vec<GeneratedRow>>;
}

#[async_trait]
pub trait ItemFilter: Send + Sync {
    /// Return the subset of `candidates` that may be published
    async fn filter(
        &self,
        candidates: &[i64],
        context: &ExtensionContext,
    ) -> PublisherResult<Vec<i64>>;
}

#[async_trait]
pub trait TemplateExpander: Send + Sync {
    async fn expand(
        &self,
        rows: &[GeneratedRow],
        params: &ParameterMap,
        summaries: &HashMap<i64, ContentSummary>,
        context: &ExtensionContext,
    ) -> PublisherResult<Vec<ExpandedItem>>;
}

/// Ambient data for one edition task invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskContext {
    pub job_id: i64,
    pub edition_id: i64,
    pub site_id: i64,
    pub pub_server_id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskOutcome {
    pub success: bool,
    pub message: Option<String>,
}

impl TaskOutcome {
    pub fn success() -> Self {
        Self {
            success: true,
            message: None,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
        }
    }
}

#[async_trait]
pub trait EditionTask: Send + Sync {
    /// An `Err` is recorded like a failed outcome carrying the error message
    async fn perform(
        &self,
        params: &ParameterMap,
        context: &TaskContext,
    ) -> PublisherResult<TaskOutcome>;
}
