//! Built-in extensions registered by
//! [`ExtensionRegistry::with_builtins`](crate::registry::ExtensionRegistry::with_builtins).

use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use tracing::debug;

use super::{
    ContentGenerator, EditionTask, ExpandedItem, ExtensionContext, GeneratedRow, ItemFilter,
    TaskContext, TaskOutcome, TemplateExpander,
};
use crate::error::{PublisherError, PublisherResult};
use crate::models::ParameterMap;
use crate::repository::ContentSummary;

fn parse_id_list(raw: &str, key: &str) -> PublisherResult<Vec<i64>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<i64>().map_err(|_| {
                PublisherError::Validation(format!("Parameter '{key}' has invalid id '{s}'"))
            })
        })
        .collect()
}

/// Generates the items listed in the `content_ids` parameter
///
/// Ids the repository no longer knows are dropped.
#[derive(Debug, Default, Clone)]
pub struct SelectedItemsGenerator;

impl SelectedItemsGenerator {
    pub const NAME: &'static str = "selected_items";
    pub const CONTENT_IDS: &'static str = "content_ids";
}

#[async_trait]
impl ContentGenerator for SelectedItemsGenerator {
    async fn generate(
        &self,
        params: &ParameterMap,
        context: &ExtensionContext,
    ) -> PublisherResult<Vec<GeneratedRow>> {
        let Some(raw) = params.get(Self::CONTENT_IDS) else {
            return Ok(Vec::new());
        };
        let ids = parse_id_list(raw, Self::CONTENT_IDS)?;
        let summaries = context.repository.load_summaries(&ids).await?;

        Ok(ids
            .into_iter()
            .filter_map(|id| summaries.get(&id))
            .map(|summary| GeneratedRow {
                content_id: summary.content_id,
                content_type_id: summary.content_type_id,
                revision_id: Some(summary.revision_id),
                folder_id: None,
            })
            .collect())
    }
}

/// Keeps items whose current workflow valid flag is in the allowed set
#[derive(Debug, Clone)]
pub struct ValidFlagItemFilter {
    allowed: BTreeSet<String>,
}

impl ValidFlagItemFilter {
    pub const NAME: &'static str = "valid_flag";

    pub fn new<I, S>(allowed: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            allowed: allowed.into_iter().map(|flag| flag.into().to_ascii_lowercase()).collect(),
        }
    }
}

impl Default for ValidFlagItemFilter {
    /// Public (`y`) and ignore (`i`) states
    fn default() -> Self {
        Self::new(["y", "i"])
    }
}

#[async_trait]
impl ItemFilter for ValidFlagItemFilter {
    async fn filter(
        &self,
        candidates: &[i64],
        context: &ExtensionContext,
    ) -> PublisherResult<Vec<i64>> {
        let flags = context.repository.valid_flags(candidates).await?;
        let survivors: Vec<i64> = candidates
            .iter()
            .copied()
            .filter(|id| {
                flags
                    .get(id)
                    .map_or(false, |flag| self.allowed.contains(&flag.to_ascii_lowercase()))
            })
            .collect();
        debug!(
            candidates = candidates.len(),
            survivors = survivors.len(),
            "Valid flag filter applied"
        );
        Ok(survivors)
    }
}

/// Maps each content type to templates listed in `template.<content_type_id>` parameters
///
/// `template.default` applies to types without their own entry. Locations are built
/// from `location_pattern` with `{content_id}`, `{template_id}`, `{revision_id}` and
/// `{folder_id}` placeholders.
#[derive(Debug, Default, Clone)]
pub struct TemplateMapExpander;

impl TemplateMapExpander {
    pub const NAME: &'static str = "template_map";
    pub const DEFAULT_KEY: &'static str = "template.default";
    pub const LOCATION_PATTERN: &'static str = "location_pattern";
    pub const DELIVERY_TYPE: &'static str = "delivery_type";
    const DEFAULT_PATTERN: &'static str = "/{content_id}/{template_id}";

    fn templates_for(params: &ParameterMap, content_type_id: i64) -> PublisherResult<Vec<i64>> {
        let key = format!("template.{content_type_id}");
        match params.get(&key) {
            Some(raw) => parse_id_list(raw, &key),
            None => match params.get(Self::DEFAULT_KEY) {
                Some(raw) => parse_id_list(raw, Self::DEFAULT_KEY),
                None => Ok(Vec::new()),
            },
        }
    }
}

#[async_trait]
impl TemplateExpander for TemplateMapExpander {
    async fn expand(
        &self,
        rows: &[GeneratedRow],
        params: &ParameterMap,
        summaries: &HashMap<i64, ContentSummary>,
        _context: &ExtensionContext,
    ) -> PublisherResult<Vec<ExpandedItem>> {
        let pattern = params
            .get(Self::LOCATION_PATTERN)
            .map_or(Self::DEFAULT_PATTERN, String::as_str);
        let delivery_type = params.get(Self::DELIVERY_TYPE).cloned();

        let mut items = Vec::new();
        for row in rows {
            let revision_id = row
                .revision_id
                .or_else(|| summaries.get(&row.content_id).map(|s| s.revision_id));
            for template_id in Self::templates_for(params, row.content_type_id)? {
                let location = pattern
                    .replace("{content_id}", &row.content_id.to_string())
                    .replace("{template_id}", &template_id.to_string())
                    .replace("{revision_id}", &revision_id.unwrap_or_default().to_string())
                    .replace("{folder_id}", &row.folder_id.unwrap_or_default().to_string());
                items.push(ExpandedItem {
                    content_id: row.content_id,
                    template_id,
                    revision_id,
                    folder_id: row.folder_id,
                    location: Some(location),
                    delivery_type: delivery_type.clone(),
                });
            }
        }
        Ok(items)
    }
}

/// Succeeds without doing anything; `message` is echoed into the task log
#[derive(Debug, Default, Clone)]
pub struct NoopEditionTask;

impl NoopEditionTask {
    pub const NAME: &'static str = "noop";
}

#[async_trait]
impl EditionTask for NoopEditionTask {
    async fn perform(
        &self,
        params: &ParameterMap,
        context: &TaskContext,
    ) -> PublisherResult<TaskOutcome> {
        debug!(job_id = context.job_id, "No-op edition task");
        Ok(TaskOutcome {
            success: true,
            message: params.get("message").cloned(),
        })
    }
}
