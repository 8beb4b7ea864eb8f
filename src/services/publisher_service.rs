//! Facade over configuration CRUD, content list runs, job control and unpublish
//! resolution. Components are wired once by [`PublisherServiceBuilder`] and shared.

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::info;

use crate::config::PublisherConfig;
use crate::content_list::{ContentListEngine, ContentListRun};
use crate::error::{PublisherError, PublisherResult};
use crate::events::EventPublisher;
use crate::models::{
    ContentList, ContentListResults, DeliveryType, Edition, EditionContentList, EditionTaskDef,
    NewContentList, NewDeliveryType, NewEdition, NewEditionTaskDef,
};
use crate::orchestration::{EditionOrchestrator, EditionRunReport, SpawnedEdition};
use crate::registry::ExtensionRegistry;
use crate::repository::{
    AssemblyDispatcher, ContentRepository, LegacyQueryRunner, TargetHealthCheck,
};
use crate::store::PublishingStore;
use crate::tracking::StatusTracker;
use crate::unpublish::{UnpublishRequest, UnpublishResolver};

pub struct PublisherServiceBuilder {
    config: PublisherConfig,
    store: Arc<dyn PublishingStore>,
    repository: Arc<dyn ContentRepository>,
    assembly: Arc<dyn AssemblyDispatcher>,
    registry: Option<Arc<ExtensionRegistry>>,
    legacy_runner: Option<Arc<dyn LegacyQueryRunner>>,
    target_check: Option<Arc<dyn TargetHealthCheck>>,
    event_publisher: Option<EventPublisher>,
}

impl PublisherServiceBuilder {
    /// Extensions to resolve by name; defaults to the built-in set
    pub fn registry(mut self, registry: Arc<ExtensionRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn legacy_runner(mut self, runner: Arc<dyn LegacyQueryRunner>) -> Self {
        self.legacy_runner = Some(runner);
        self
    }

    pub fn target_check(mut self, check: Arc<dyn TargetHealthCheck>) -> Self {
        self.target_check = Some(check);
        self
    }

    pub fn event_publisher(mut self, publisher: EventPublisher) -> Self {
        self.event_publisher = Some(publisher);
        self
    }

    pub fn build(self) -> PublisherResult<PublisherService> {
        self.config.validate()?;
        let event_publisher = self
            .event_publisher
            .unwrap_or_else(|| {
                EventPublisher::new(self.config.orchestration.event_channel_capacity)
            });
        let registry = self
            .registry
            .unwrap_or_else(|| Arc::new(ExtensionRegistry::with_builtins()));

        let tracker = StatusTracker::new(Arc::clone(&self.store), event_publisher, &self.config);
        let resolver = UnpublishResolver::new(
            tracker.clone(),
            Arc::clone(&self.repository),
            self.config.unpublish.clone(),
        );
        let mut engine = ContentListEngine::new(
            registry,
            Arc::clone(&self.repository),
            tracker.clone(),
            resolver.clone(),
        );
        if let Some(runner) = self.legacy_runner {
            engine = engine.with_legacy_runner(runner);
        }
        let mut orchestrator = EditionOrchestrator::new(
            &self.config,
            tracker.clone(),
            engine.clone(),
            resolver.clone(),
            self.assembly,
        );
        if let Some(check) = self.target_check {
            orchestrator = orchestrator.with_target_check(check);
        }

        Ok(PublisherService {
            store: self.store,
            repository: self.repository,
            tracker,
            engine,
            resolver,
            orchestrator,
        })
    }
}

#[derive(Clone)]
pub struct PublisherService {
    store: Arc<dyn PublishingStore>,
    repository: Arc<dyn ContentRepository>,
    tracker: StatusTracker,
    engine: ContentListEngine,
    resolver: UnpublishResolver,
    orchestrator: EditionOrchestrator,
}

impl PublisherService {
    pub fn builder(
        config: PublisherConfig,
        store: Arc<dyn PublishingStore>,
        repository: Arc<dyn ContentRepository>,
        assembly: Arc<dyn AssemblyDispatcher>,
    ) -> PublisherServiceBuilder {
        PublisherServiceBuilder {
            config,
            store,
            repository,
            assembly,
            registry: None,
            legacy_runner: None,
            target_check: None,
            event_publisher: None,
        }
    }

    pub fn tracker(&self) -> &StatusTracker {
        &self.tracker
    }

    pub fn engine(&self) -> &ContentListEngine {
        &self.engine
    }

    pub fn resolver(&self) -> &UnpublishResolver {
        &self.resolver
    }

    pub fn orchestrator(&self) -> &EditionOrchestrator {
        &self.orchestrator
    }

    pub fn event_publisher(&self) -> &EventPublisher {
        self.tracker.event_publisher()
    }

    // --- Content lists -------------------------------------------------------

    pub async fn create_content_list(
        &self,
        new_list: NewContentList,
    ) -> PublisherResult<ContentList> {
        Self::validate_name("content list", &new_list.name)?;
        match (&new_list.generator, &new_list.expander, &new_list.url) {
            (Some(_), None, _) => {
                return Err(PublisherError::Validation(format!(
                    "content list {} has a generator but no expander",
                    new_list.name
                )))
            }
            (None, _, None) => {
                return Err(PublisherError::Validation(format!(
                    "content list {} needs a generator or a url",
                    new_list.name
                )))
            }
            _ => {}
        }
        let list = self.store.create_content_list(new_list).await?;
        info!(content_list_id = list.content_list_id, name = %list.name, "Created content list");
        Ok(list)
    }

    pub async fn save_content_list(&self, list: &ContentList) -> PublisherResult<()> {
        Self::validate_name("content list", &list.name)?;
        self.store.save_content_list(list).await
    }

    pub async fn load_content_list(&self, content_list_id: i64) -> PublisherResult<ContentList> {
        self.store
            .load_content_list(content_list_id)
            .await?
            .ok_or_else(|| PublisherError::ListMissing(content_list_id.to_string()))
    }

    pub async fn find_content_list_by_name(&self, name: &str) -> PublisherResult<ContentList> {
        self.store
            .find_content_list_by_name(name)
            .await?
            .ok_or_else(|| PublisherError::ListMissing(name.to_string()))
    }

    pub async fn list_content_lists(&self) -> PublisherResult<Vec<ContentList>> {
        self.store.list_content_lists().await
    }

    pub async fn delete_content_list(&self, content_list_id: i64) -> PublisherResult<bool> {
        self.store.delete_content_list(content_list_id).await
    }

    /// Run a content list by name outside any job
    pub async fn run_content_list(
        &self,
        name: &str,
        run: &ContentListRun,
    ) -> PublisherResult<ContentListResults> {
        self.engine.run_content_list_by_name(name, run).await
    }

    // --- Editions ------------------------------------------------------------

    pub async fn create_edition(&self, new_edition: NewEdition) -> PublisherResult<Edition> {
        Self::validate_name("edition", &new_edition.name)?;
        let edition = self.store.create_edition(new_edition).await?;
        info!(edition_id = edition.edition_id, name = %edition.name, "Created edition");
        Ok(edition)
    }

    pub async fn save_edition(&self, edition: &Edition) -> PublisherResult<()> {
        Self::validate_name("edition", &edition.name)?;
        self.store.save_edition(edition).await
    }

    pub async fn load_edition(&self, edition_id: i64) -> PublisherResult<Edition> {
        self.store
            .load_edition(edition_id)
            .await?
            .ok_or_else(|| PublisherError::EditionMissing(edition_id.to_string()))
    }

    pub async fn find_edition_by_name(&self, name: &str) -> PublisherResult<Edition> {
        self.store
            .find_edition_by_name(name)
            .await?
            .ok_or_else(|| PublisherError::EditionMissing(name.to_string()))
    }

    pub async fn list_editions(&self, site_id: Option<i64>) -> PublisherResult<Vec<Edition>> {
        self.store.list_editions(site_id).await
    }

    /// Delete an edition with its associations and tasks; refused while it runs here
    pub async fn delete_edition(&self, edition_id: i64) -> PublisherResult<bool> {
        if let Some(job_id) = self.orchestrator.active_job(edition_id) {
            return Err(PublisherError::AlreadyRunning { edition_id, job_id });
        }
        self.store.delete_edition(edition_id).await
    }

    pub async fn save_edition_content_list(
        &self,
        association: &EditionContentList,
    ) -> PublisherResult<()> {
        self.load_edition(association.edition_id).await?;
        self.load_content_list(association.content_list_id).await?;
        self.store.save_edition_content_list(association).await
    }

    pub async fn load_edition_content_lists(
        &self,
        edition_id: i64,
    ) -> PublisherResult<Vec<EditionContentList>> {
        self.store.load_edition_content_lists(edition_id).await
    }

    pub async fn delete_edition_content_list(
        &self,
        edition_id: i64,
        content_list_id: i64,
    ) -> PublisherResult<bool> {
        self.store
            .delete_edition_content_list(edition_id, content_list_id)
            .await
    }

    pub async fn create_task_def(
        &self,
        new_task: NewEditionTaskDef,
    ) -> PublisherResult<EditionTaskDef> {
        self.load_edition(new_task.edition_id).await?;
        Self::validate_task(new_task.sequence, &new_task.extension_name)?;
        self.store.create_task_def(new_task).await
    }

    pub async fn save_task_def(&self, task: &EditionTaskDef) -> PublisherResult<()> {
        self.load_edition(task.edition_id).await?;
        Self::validate_task(task.sequence, &task.extension_name)?;
        self.store.save_task_def(task).await
    }

    pub async fn load_task_defs(&self, edition_id: i64) -> PublisherResult<Vec<EditionTaskDef>> {
        self.store.load_task_defs(edition_id).await
    }

    pub async fn delete_task_def(&self, task_id: i64) -> PublisherResult<bool> {
        self.store.delete_task_def(task_id).await
    }

    // --- Delivery types ------------------------------------------------------

    pub async fn create_delivery_type(
        &self,
        new_type: NewDeliveryType,
    ) -> PublisherResult<DeliveryType> {
        Self::validate_name("delivery type", &new_type.name)?;
        self.store.create_delivery_type(new_type).await
    }

    pub async fn save_delivery_type(&self, delivery_type: &DeliveryType) -> PublisherResult<()> {
        Self::validate_name("delivery type", &delivery_type.name)?;
        self.store.save_delivery_type(delivery_type).await
    }

    pub async fn load_delivery_type(
        &self,
        delivery_type_id: i64,
    ) -> PublisherResult<Option<DeliveryType>> {
        self.store.load_delivery_type(delivery_type_id).await
    }

    pub async fn find_delivery_type_by_name(
        &self,
        name: &str,
    ) -> PublisherResult<Option<DeliveryType>> {
        self.store.find_delivery_type_by_name(name).await
    }

    pub async fn list_delivery_types(&self) -> PublisherResult<Vec<DeliveryType>> {
        self.store.list_delivery_types().await
    }

    pub async fn delete_delivery_type(&self, delivery_type_id: i64) -> PublisherResult<bool> {
        self.store.delete_delivery_type(delivery_type_id).await
    }

    // --- Jobs ----------------------------------------------------------------

    pub async fn run_edition(&self, edition_id: i64) -> PublisherResult<EditionRunReport> {
        self.orchestrator.run_edition(edition_id).await
    }

    pub async fn spawn_edition(&self, edition_id: i64) -> PublisherResult<SpawnedEdition> {
        self.orchestrator.spawn_edition(edition_id).await
    }

    pub async fn cancel_job(&self, job_id: i64) -> PublisherResult<bool> {
        self.orchestrator.cancel_job(job_id).await
    }

    // --- Unpublish and incremental support -----------------------------------

    /// Reference ids of live items of a site that must be unpublished
    pub async fn find_unpublish_candidates(
        &self,
        site_id: i64,
        pub_server_id: Option<i64>,
        unpublish_flags: Option<Vec<String>>,
    ) -> PublisherResult<Vec<i64>> {
        let mut request = UnpublishRequest::for_site(site_id, pub_server_id);
        request.unpublish_flags = unpublish_flags;
        self.resolver.resolve(&request).await
    }

    /// Mark items and their active assembly parents modified, for incremental lists
    pub async fn touch_content_items(&self, content_ids: &[i64]) -> PublisherResult<u64> {
        if content_ids.is_empty() {
            return Ok(0);
        }
        let parents = self.repository.active_assembly_parents(content_ids).await?;
        let touched: Vec<i64> = content_ids
            .iter()
            .copied()
            .chain(parents)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let count = self.repository.touch(&touched).await?;
        info!(requested = content_ids.len(), touched = count, "Touched content items");
        Ok(count)
    }

    fn validate_name(entity: &str, name: &str) -> PublisherResult<()> {
        if name.trim().is_empty() {
            return Err(PublisherError::Validation(format!("{entity} name must not be empty")));
        }
        Ok(())
    }

    fn validate_task(sequence: i32, extension_name: &str) -> PublisherResult<()> {
        if sequence == 0 {
            return Err(PublisherError::Validation(
                "task sequence must be negative (pre-task) or positive (post-task)".to_string(),
            ));
        }
        if extension_name.trim().is_empty() {
            return Err(PublisherError::Validation(
                "task extension name must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}
