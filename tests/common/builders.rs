//! Harness wiring an in-memory store and fakes into a publisher service.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use publisher_core::config::PublisherConfig;
use publisher_core::error::PublisherResult;
use publisher_core::extensions::{SelectedItemsGenerator, TemplateMapExpander};
use publisher_core::models::{
    ContentList, Edition, EditionContentList, EditionTaskDef, EditionType, ItemOutcome,
    ItemStatus, NewContentList, NewEdition, NewEditionTaskDef, Operation, ParameterMap,
    PublishItem, SiteItem,
};
use publisher_core::registry::ExtensionRegistry;
use publisher_core::store::{InMemoryStore, RecordSummary};
use publisher_core::{PublisherService, StatusTracker};

use super::fakes::{FakeLegacyRunner, FakeRepository, RecordingAssembly};

pub const SITE: i64 = 1;
pub const CONTEXT: i64 = 301;
pub const SITE_FOLDERS: [i64; 2] = [10, 11];
pub const TEMPLATE: i64 = 500;

pub fn test_config() -> PublisherConfig {
    let mut config = PublisherConfig::default();
    config.server.identity = "test-node".to_string();
    config.orchestration.dispatch_batch_size = 2;
    config
}

pub struct Harness {
    pub store: Arc<InMemoryStore>,
    pub repository: Arc<FakeRepository>,
    pub assembly: Arc<RecordingAssembly>,
    pub legacy: Arc<FakeLegacyRunner>,
    pub registry: Arc<ExtensionRegistry>,
    pub service: PublisherService,
}

pub struct HarnessBuilder {
    config: PublisherConfig,
    assembly: RecordingAssembly,
    registry: ExtensionRegistry,
    store: Option<Arc<InMemoryStore>>,
}

impl HarnessBuilder {
    pub fn config(mut self, update: impl FnOnce(&mut PublisherConfig)) -> Self {
        update(&mut self.config);
        self
    }

    pub fn assembly(mut self, assembly: RecordingAssembly) -> Self {
        self.assembly = assembly;
        self
    }

    pub fn registry(mut self, register: impl FnOnce(&ExtensionRegistry)) -> Self {
        register(&self.registry);
        self
    }

    /// Share a store with an earlier harness, as a restarted process would
    pub fn store(mut self, store: Arc<InMemoryStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn build(self) -> Harness {
        let store = self.store.unwrap_or_else(|| Arc::new(InMemoryStore::new()));
        let repository = Arc::new(FakeRepository::new());
        repository.set_site_folders(SITE, &SITE_FOLDERS);
        let assembly = Arc::new(self.assembly);
        let legacy = Arc::new(FakeLegacyRunner::new());
        let registry = Arc::new(self.registry);

        let service = PublisherService::builder(
            self.config,
            store.clone(),
            repository.clone(),
            assembly.clone(),
        )
        .registry(Arc::clone(&registry))
        .legacy_runner(legacy.clone())
        .build()
        .expect("test configuration is valid");

        Harness {
            store,
            repository,
            assembly,
            legacy,
            registry,
            service,
        }
    }
}

impl Harness {
    pub fn builder() -> HarnessBuilder {
        HarnessBuilder {
            config: test_config(),
            assembly: RecordingAssembly::new(),
            registry: ExtensionRegistry::with_builtins(),
            store: None,
        }
    }

    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn tracker(&self) -> &StatusTracker {
        self.service.tracker()
    }

    /// Items 1..=n of type 1 in site folder 10
    pub fn seed_items(&self, content_ids: &[i64]) {
        for id in content_ids {
            self.repository.add_item(*id, SITE_FOLDERS[0]);
        }
    }

    /// Pipeline list selecting `content_ids`, one template per item
    pub async fn selected_list(&self, name: &str, content_ids: &[i64]) -> ContentList {
        let mut new_list = NewContentList::pipeline(
            name,
            SelectedItemsGenerator::NAME,
            TemplateMapExpander::NAME,
        );
        new_list
            .generator_params
            .insert(SelectedItemsGenerator::CONTENT_IDS.to_string(), ids_param(content_ids));
        new_list
            .expander_params
            .insert(TemplateMapExpander::DEFAULT_KEY.to_string(), TEMPLATE.to_string());
        new_list
            .expander_params
            .insert(TemplateMapExpander::DELIVERY_TYPE.to_string(), "filesystem".to_string());
        self.service
            .create_content_list(new_list)
            .await
            .expect("content list is created")
    }

    pub async fn edition(&self, name: &str) -> Edition {
        self.service
            .create_edition(NewEdition::new(name, SITE))
            .await
            .expect("edition is created")
    }

    pub async fn automatic_edition(&self, name: &str) -> Edition {
        let mut new_edition = NewEdition::new(name, SITE);
        new_edition.edition_type = EditionType::Automatic;
        self.service
            .create_edition(new_edition)
            .await
            .expect("edition is created")
    }

    pub async fn attach(&self, edition: &Edition, list: &ContentList, sequence: i32) {
        self.service
            .save_edition_content_list(&EditionContentList {
                edition_id: edition.edition_id,
                content_list_id: list.content_list_id,
                sequence,
                delivery_context_id: CONTEXT,
                assembly_context_id: None,
                auth_type: None,
            })
            .await
            .expect("association is saved");
    }

    pub async fn task(
        &self,
        edition: &Edition,
        sequence: i32,
        extension_name: &str,
        continue_on_failure: bool,
    ) -> EditionTaskDef {
        self.service
            .create_task_def(NewEditionTaskDef {
                edition_id: edition.edition_id,
                sequence,
                extension_name: extension_name.to_string(),
                params: ParameterMap::new(),
                continue_on_failure,
            })
            .await
            .expect("task definition is created")
    }

    /// Report every dispatched item of a job back with `status`
    pub async fn deliver_job(
        &self,
        job_id: i64,
        status: ItemStatus,
    ) -> PublisherResult<RecordSummary> {
        let outcomes: Vec<ItemOutcome> = self
            .assembly
            .items_for_job(job_id)
            .into_iter()
            .map(|item| ItemOutcome::new(item, status))
            .collect();
        self.tracker().update_publishing_info(&outcomes).await
    }
}

pub fn ids_param(content_ids: &[i64]) -> String {
    content_ids
        .iter()
        .map(i64::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

/// A dispatched PUBLISH item of `job_id`
pub fn publish_item(job_id: i64, reference_id: i64, content_id: i64) -> PublishItem {
    PublishItem {
        reference_id,
        job_id,
        site_id: SITE,
        pub_server_id: None,
        content_id,
        revision_id: 1,
        folder_id: Some(SITE_FOLDERS[0]),
        template_id: Some(TEMPLATE),
        delivery_context_id: CONTEXT,
        assembly_context_id: None,
        operation: Operation::Publish,
        location: Some(format!("/{content_id}/{TEMPLATE}")),
        delivery_type: Some("filesystem".to_string()),
        unpublish_ref_id: None,
        unpublish_info: None,
    }
}

/// A live ledger row as an earlier publish would have left it
pub fn live_site_item(
    reference_id: i64,
    content_id: i64,
    folder_id: Option<i64>,
    at: DateTime<Utc>,
) -> SiteItem {
    SiteItem {
        reference_id,
        site_id: SITE,
        pub_server_id: None,
        content_id,
        revision_id: 1,
        folder_id,
        template_id: Some(TEMPLATE),
        delivery_context_id: CONTEXT,
        location: Some(format!("/{content_id}/{TEMPLATE}")),
        delivery_type: Some("filesystem".to_string()),
        operation: Operation::Publish,
        status: ItemStatus::Success,
        job_id: None,
        job_started_at: at,
        published_at: at,
        unpublish_info: Some(serde_json::json!({ "path": format!("/{content_id}/{TEMPLATE}") })),
    }
}
