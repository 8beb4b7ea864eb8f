use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::constants::params;
use crate::error::{PublisherError, PublisherResult};
use crate::extensions::{ExpandedItem, ExtensionContext, GeneratedRow};
use crate::models::{
    ContentList, ContentListItem, ContentListResults, Operation, ParameterMap, SiteItem,
    SiteItemQuery,
};
use crate::registry::{ExtensionCache, ExtensionRegistry};
use crate::repository::{ContentRepository, LegacyQueryRunner, LegacyRow};
use crate::store::PublishingStore;
use crate::tracking::StatusTracker;
use crate::unpublish::UnpublishResolver;

/// Caller-supplied inputs of one content list run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContentListRun {
    pub site_id: i64,
    pub delivery_context_id: i64,
    pub pub_server_id: Option<i64>,
    pub publish: bool,
    /// Merged over the list's stored parameters; overrides win
    pub overrides: ParameterMap,
}

impl ContentListRun {
    pub fn publish(site_id: i64, delivery_context_id: i64) -> Self {
        Self {
            site_id,
            delivery_context_id,
            publish: true,
            ..Default::default()
        }
    }

    pub fn unpublish(site_id: i64, delivery_context_id: i64) -> Self {
        Self {
            publish: false,
            ..Self::publish(site_id, delivery_context_id)
        }
    }

    pub fn with_server(mut self, pub_server_id: Option<i64>) -> Self {
        self.pub_server_id = pub_server_id;
        self
    }

    pub fn with_override(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.overrides.insert(key.into(), value.into());
        self
    }
}

/// Stored parameters, then overrides, then the run's system keys
///
/// Site and delivery context always come from the run, whatever the list stored.
pub fn merge_parameters(
    stored: &ParameterMap,
    run: &ContentListRun,
    list: &ContentList,
) -> ParameterMap {
    let mut merged = stored.clone();
    merged.extend(run.overrides.iter().map(|(k, v)| (k.clone(), v.clone())));
    merged.insert(params::SITE_ID.to_string(), run.site_id.to_string());
    merged.insert(
        params::DELIVERY_CONTEXT.to_string(),
        run.delivery_context_id.to_string(),
    );
    match run.pub_server_id {
        Some(server) => {
            merged.insert(params::PUB_SERVER_ID.to_string(), server.to_string());
        }
        None => {
            merged.remove(params::PUB_SERVER_ID);
        }
    }
    merged.insert(params::LIST_TYPE.to_string(), list.list_type.as_str().to_string());
    merged
}

#[derive(Clone)]
pub struct ContentListEngine {
    store: Arc<dyn PublishingStore>,
    registry: Arc<ExtensionRegistry>,
    repository: Arc<dyn ContentRepository>,
    legacy_runner: Option<Arc<dyn LegacyQueryRunner>>,
    tracker: StatusTracker,
    resolver: UnpublishResolver,
}

impl ContentListEngine {
    pub fn new(
        registry: Arc<ExtensionRegistry>,
        repository: Arc<dyn ContentRepository>,
        tracker: StatusTracker,
        resolver: UnpublishResolver,
    ) -> Self {
        Self {
            store: Arc::clone(tracker.store()),
            registry,
            repository,
            legacy_runner: None,
            tracker,
            resolver,
        }
    }

    pub fn with_legacy_runner(mut self, runner: Arc<dyn LegacyQueryRunner>) -> Self {
        self.legacy_runner = Some(runner);
        self
    }

    pub fn registry(&self) -> &Arc<ExtensionRegistry> {
        &self.registry
    }

    /// Run a list with extensions resolved for this run only
    pub async fn run_content_list(
        &self,
        list: &ContentList,
        run: &ContentListRun,
    ) -> PublisherResult<ContentListResults> {
        let cache = ExtensionCache::new(Arc::clone(&self.registry));
        self.run_content_list_with_cache(list, run, &cache).await
    }

    /// Fails with `LIST_MISSING` when no list has that name
    pub async fn run_content_list_by_name(
        &self,
        name: &str,
        run: &ContentListRun,
    ) -> PublisherResult<ContentListResults> {
        let list = self
            .store
            .find_content_list_by_name(name)
            .await?
            .ok_or_else(|| PublisherError::ListMissing(name.to_string()))?;
        self.run_content_list(&list, run).await
    }

    pub async fn run_content_list_by_id(
        &self,
        content_list_id: i64,
        run: &ContentListRun,
    ) -> PublisherResult<ContentListResults> {
        let list = self
            .store
            .load_content_list(content_list_id)
            .await?
            .ok_or_else(|| PublisherError::ListMissing(content_list_id.to_string()))?;
        self.run_content_list(&list, run).await
    }

    /// Run a list resolving extensions through a cache shared with the rest of the job
    pub async fn run_content_list_with_cache(
        &self,
        list: &ContentList,
        run: &ContentListRun,
        cache: &ExtensionCache,
    ) -> PublisherResult<ContentListResults> {
        debug!(
            content_list = %list.name,
            site_id = run.site_id,
            delivery_context_id = run.delivery_context_id,
            publish = run.publish,
            legacy = list.is_legacy(),
            "Running content list"
        );

        let results = if list.is_legacy() {
            self.run_legacy(list, run).await?
        } else {
            self.run_pipeline(list, run, cache).await?
        };

        info!(
            content_list = %list.name,
            publish = run.publish,
            generated = results.generated_count,
            filtered = results.filtered_count,
            items = results.len(),
            "Content list run finished"
        );
        Ok(results)
    }

    async fn run_pipeline(
        &self,
        list: &ContentList,
        run: &ContentListRun,
        cache: &ExtensionCache,
    ) -> PublisherResult<ContentListResults> {
        let context = self.context(run);
        let generator_name = list
            .generator
            .as_deref()
            .ok_or_else(|| {
                PublisherError::Validation(format!("content list {} has no generator", list.name))
            })?;

        let generator = cache.generator(generator_name)?;
        let generator_params = merge_parameters(&list.generator_params, run, list);
        let generated = generator
            .generate(&generator_params, &context)
            .await
            .map_err(|e| Self::malfunction(e, |reason| PublisherError::GeneratorMalfunction {
                generator: generator_name.to_string(),
                reason,
            }))?;
        let rows = Self::dedupe_rows(generated);
        let generated_count = rows.len();

        if !run.publish {
            let items = self.unpublish_items_from_ledger(&rows, run).await?;
            return Ok(ContentListResults {
                content_list_id: list.content_list_id,
                content_list_name: list.name.clone(),
                publish: false,
                generated_count,
                filtered_count: generated_count,
                items,
            });
        }

        let rows = match list.filter.as_deref() {
            Some(filter_name) => {
                let filter = cache.filter(filter_name)?;
                let candidates = Self::distinct_content_ids(&rows);
                let survivors: HashSet<i64> = filter
                    .filter(&candidates, &context)
                    .await
                    .map_err(|e| Self::malfunction(e, |reason| PublisherError::FilterMalfunction {
                        filter: filter_name.to_string(),
                        reason,
                    }))?
                    .into_iter()
                    .collect();
                rows.into_iter()
                    .filter(|row| survivors.contains(&row.content_id))
                    .collect()
            }
            None => rows,
        };
        let filtered_count = rows.len();

        let expander_name = list.expander.as_deref().ok_or_else(|| {
            PublisherError::Validation(format!("content list {} has no expander", list.name))
        })?;
        let expander = cache.expander(expander_name)?;
        let content_ids = Self::distinct_content_ids(&rows);
        let summaries = if content_ids.is_empty() {
            HashMap::new()
        } else {
            self.repository.load_summaries(&content_ids).await?
        };
        let expander_params = merge_parameters(&list.expander_params, run, list);
        let expanded = expander
            .expand(&rows, &expander_params, &summaries, &context)
            .await
            .map_err(|e| Self::malfunction(e, |reason| PublisherError::ExpanderMalfunction {
                expander: expander_name.to_string(),
                reason,
            }))?;

        let by_placement: HashMap<(i64, Option<i64>), &GeneratedRow> = rows
            .iter()
            .map(|row| ((row.content_id, row.folder_id), row))
            .collect();
        let mut by_content: HashMap<i64, &GeneratedRow> = HashMap::new();
        for row in &rows {
            by_content.entry(row.content_id).or_insert(row);
        }
        let items = Self::dedupe_expanded(expanded)
            .into_iter()
            .map(|item| {
                let row = by_placement
                    .get(&(item.content_id, item.folder_id))
                    .or_else(|| by_content.get(&item.content_id))
                    .copied();
                let summary_revision = summaries.get(&item.content_id).map(|s| s.revision_id);
                Self::publish_item(item, row, summary_revision, run)
            })
            .collect();

        Ok(ContentListResults {
            content_list_id: list.content_list_id,
            content_list_name: list.name.clone(),
            publish: true,
            generated_count,
            filtered_count,
            items,
        })
    }

    async fn run_legacy(
        &self,
        list: &ContentList,
        run: &ContentListRun,
    ) -> PublisherResult<ContentListResults> {
        let url = list.url.as_deref().ok_or_else(|| {
            PublisherError::Validation(format!("legacy content list {} has no url", list.name))
        })?;
        let runner = self.legacy_runner.as_ref().ok_or_else(|| {
            PublisherError::Configuration("no legacy query runner configured".to_string())
        })?;

        let query_params = merge_parameters(&list.generator_params, run, list);
        let rows = runner
            .execute(url, &query_params)
            .await
            .map_err(|e| Self::malfunction(e, |reason| PublisherError::LegacyQueryFailed {
                url: url.to_string(),
                reason,
            }))?;
        let generated_count = rows.len();

        let items = if run.publish {
            rows.into_iter()
                .map(|row| Self::legacy_publish_item(row, run))
                .collect()
        } else {
            self.legacy_unpublish_items(rows, run).await?
        };

        Ok(ContentListResults {
            content_list_id: list.content_list_id,
            content_list_name: list.name.clone(),
            publish: run.publish,
            generated_count,
            filtered_count: generated_count,
            items,
        })
    }

    /// One UNPUBLISH item per live ledger row of each generated content item
    async fn unpublish_items_from_ledger(
        &self,
        rows: &[GeneratedRow],
        run: &ContentListRun,
    ) -> PublisherResult<Vec<ContentListItem>> {
        let mut items = Vec::new();
        for content_id in Self::distinct_content_ids(rows) {
            let query = SiteItemQuery {
                delivery_context_id: Some(run.delivery_context_id),
                content_id: Some(content_id),
                ..SiteItemQuery::for_server(run.site_id, run.pub_server_id)
            };
            let mut live: Vec<SiteItem> = self
                .tracker
                .find_site_items(&query)
                .await?
                .into_iter()
                .filter(SiteItem::is_live)
                .collect();
            live.sort_by_key(|item| item.reference_id);
            items.extend(live.iter().map(Self::unpublish_item));
        }
        Ok(items)
    }

    async fn legacy_unpublish_items(
        &self,
        rows: Vec<LegacyRow>,
        run: &ContentListRun,
    ) -> PublisherResult<Vec<ContentListItem>> {
        let mut items = Vec::with_capacity(rows.len());
        for row in rows {
            let info = self
                .resolver
                .find_unpublish_info(
                    row.content_id,
                    run.delivery_context_id,
                    row.template_id,
                    run.site_id,
                    run.pub_server_id,
                    row.location.as_deref(),
                )
                .await?;
            let Some(info) = info else {
                warn!(
                    content_id = row.content_id,
                    location = row.location.as_deref(),
                    "No live rendition to unpublish"
                );
                continue;
            };
            items.push(ContentListItem {
                content_id: row.content_id,
                revision_id: row.revision_id,
                folder_id: row.folder_id.or(info.folder_id),
                template_id: row.template_id,
                site_id: run.site_id,
                pub_server_id: run.pub_server_id,
                delivery_context_id: run.delivery_context_id,
                operation: Operation::Unpublish,
                location: row.location,
                delivery_type: info.delivery_type.or(row.delivery_type),
                unpublish_ref_id: Some(info.reference_id),
                unpublish_info: info.unpublish_data,
            });
        }
        Ok(items)
    }

    fn context(&self, run: &ContentListRun) -> ExtensionContext {
        ExtensionContext {
            site_id: run.site_id,
            delivery_context_id: run.delivery_context_id,
            pub_server_id: run.pub_server_id,
            publish: run.publish,
            repository: Arc::clone(&self.repository),
        }
    }

    /// First occurrence of each (content, folder) placement, in generator order
    fn dedupe_rows(rows: Vec<GeneratedRow>) -> Vec<GeneratedRow> {
        let mut seen = HashSet::with_capacity(rows.len());
        rows.into_iter()
            .filter(|row| seen.insert((row.content_id, row.folder_id)))
            .collect()
    }

    /// First occurrence of each (content, template, location) rendition
    fn dedupe_expanded(items: Vec<ExpandedItem>) -> Vec<ExpandedItem> {
        let mut seen = HashSet::with_capacity(items.len());
        items
            .into_iter()
            .filter(|item| seen.insert((item.content_id, item.template_id, item.location.clone())))
            .collect()
    }

    fn distinct_content_ids(rows: &[GeneratedRow]) -> Vec<i64> {
        let mut seen = HashSet::with_capacity(rows.len());
        rows.iter()
            .map(|row| row.content_id)
            .filter(|id| seen.insert(*id))
            .collect()
    }

    /// Wrap a plugin error unless it already names the failing extension
    fn malfunction<F>(error: PublisherError, wrap: F) -> PublisherError
    where
        F: FnOnce(String) -> PublisherError,
    {
        if error.is_extension_failure() {
            error
        } else {
            wrap(error.to_string())
        }
    }

    fn publish_item(
        item: ExpandedItem,
        row: Option<&GeneratedRow>,
        summary_revision: Option<i64>,
        run: &ContentListRun,
    ) -> ContentListItem {
        ContentListItem {
            content_id: item.content_id,
            revision_id: item
                .revision_id
                .or_else(|| row.and_then(|r| r.revision_id))
                .or(summary_revision)
                .unwrap_or_default(),
            folder_id: item.folder_id.or_else(|| row.and_then(|r| r.folder_id)),
            template_id: Some(item.template_id),
            site_id: run.site_id,
            pub_server_id: run.pub_server_id,
            delivery_context_id: run.delivery_context_id,
            operation: Operation::Publish,
            location: item.location,
            delivery_type: item.delivery_type,
            unpublish_ref_id: None,
            unpublish_info: None,
        }
    }

    fn legacy_publish_item(row: LegacyRow, run: &ContentListRun) -> ContentListItem {
        ContentListItem {
            content_id: row.content_id,
            revision_id: row.revision_id,
            folder_id: row.folder_id,
            template_id: row.template_id,
            site_id: run.site_id,
            pub_server_id: run.pub_server_id,
            delivery_context_id: run.delivery_context_id,
            operation: Operation::Publish,
            location: row.location,
            delivery_type: row.delivery_type,
            unpublish_ref_id: None,
            unpublish_info: None,
        }
    }

    /// UNPUBLISH work item reversing a live ledger row
    pub fn unpublish_item(site_item: &SiteItem) -> ContentListItem {
        ContentListItem {
            content_id: site_item.content_id,
            revision_id: site_item.revision_id,
            folder_id: site_item.folder_id,
            template_id: site_item.template_id,
            site_id: site_item.site_id,
            pub_server_id: site_item.pub_server_id,
            delivery_context_id: site_item.delivery_context_id,
            operation: Operation::Unpublish,
            location: site_item.location.clone(),
            delivery_type: site_item.delivery_type.clone(),
            unpublish_ref_id: Some(site_item.reference_id),
            unpublish_info: site_item.unpublish_info.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewContentList;

    #[test]
    fn test_system_keys_override_stored_and_caller_values() {
        let mut list = NewContentList::pipeline("nightly", "selected_items", "template_map")
            .into_content_list(1);
        list.generator_params
            .insert(params::SITE_ID.to_string(), "999".to_string());
        list.generator_params
            .insert("content_ids".to_string(), "1,2".to_string());

        let run = ContentListRun::publish(5, 2)
            .with_override("content_ids", "3")
            .with_override(params::DELIVERY_CONTEXT, "77");
        let merged = merge_parameters(&list.generator_params, &run, &list);

        assert_eq!(merged[params::SITE_ID], "5");
        assert_eq!(merged[params::DELIVERY_CONTEXT], "2");
        assert_eq!(merged["content_ids"], "3");
        assert_eq!(merged[params::LIST_TYPE], "normal");
        assert!(!merged.contains_key(params::PUB_SERVER_ID));
    }

    #[test]
    fn test_duplicate_generator_rows_keep_first() {
        let rows = vec![
            GeneratedRow::new(3, 1),
            GeneratedRow::new(1, 1),
            GeneratedRow::new(3, 2),
        ];
        let deduped = ContentListEngine::dedupe_rows(rows);
        let ids: Vec<(i64, i64)> = deduped
            .iter()
            .map(|r| (r.content_id, r.content_type_id))
            .collect();
        assert_eq!(ids, vec![(3, 1), (1, 1)]);
    }
}
