//! In-process fakes of the external collaborators.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use publisher_core::error::{PublisherError, PublisherResult};
use publisher_core::extensions::{
    ContentGenerator, EditionTask, ExtensionContext, GeneratedRow, ItemFilter, TaskContext,
    TaskOutcome,
};
use publisher_core::models::{ParameterMap, PubStatus, PublishItem};
use publisher_core::repository::{
    AssemblyDispatcher, ContentRepository, ContentSummary, LegacyQueryRunner, LegacyRow,
    TargetHealthCheck,
};
use tokio::sync::{Notify, Semaphore};

#[derive(Debug, Clone)]
struct FakeItem {
    content_type_id: i64,
    revision_id: i64,
    folders: HashSet<i64>,
    valid_flag: String,
}

#[derive(Debug, Default)]
struct RepositoryState {
    items: HashMap<i64, FakeItem>,
    site_folders: HashMap<i64, HashSet<i64>>,
    assembly_parents: HashMap<i64, Vec<i64>>,
    touched: Vec<i64>,
}

/// Content repository backed by a map of items
#[derive(Debug, Default)]
pub struct FakeRepository {
    state: Mutex<RepositoryState>,
}

impl FakeRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a public (`y`) item of type 1 in `folder_id`
    pub fn add_item(&self, content_id: i64, folder_id: i64) {
        self.add_typed_item(content_id, 1, folder_id, "y");
    }

    pub fn add_typed_item(
        &self,
        content_id: i64,
        content_type_id: i64,
        folder_id: i64,
        flag: &str,
    ) {
        self.state.lock().items.insert(
            content_id,
            FakeItem {
                content_type_id,
                revision_id: 1,
                folders: HashSet::from([folder_id]),
                valid_flag: flag.to_string(),
            },
        );
    }

    pub fn remove_item(&self, content_id: i64) {
        self.state.lock().items.remove(&content_id);
    }

    pub fn move_item(&self, content_id: i64, folder_id: i64) {
        if let Some(item) = self.state.lock().items.get_mut(&content_id) {
            item.folders = HashSet::from([folder_id]);
        }
    }

    pub fn set_flag(&self, content_id: i64, flag: &str) {
        if let Some(item) = self.state.lock().items.get_mut(&content_id) {
            item.valid_flag = flag.to_string();
        }
    }

    pub fn set_site_folders(&self, site_id: i64, folders: &[i64]) {
        self.state
            .lock()
            .site_folders
            .insert(site_id, folders.iter().copied().collect());
    }

    pub fn set_assembly_parents(&self, content_id: i64, parents: &[i64]) {
        self.state
            .lock()
            .assembly_parents
            .insert(content_id, parents.to_vec());
    }

    pub fn touched(&self) -> Vec<i64> {
        self.state.lock().touched.clone()
    }
}

#[async_trait]
impl ContentRepository for FakeRepository {
    async fn load_summaries(
        &self,
        content_ids: &[i64],
    ) -> PublisherResult<HashMap<i64, ContentSummary>> {
        let state = self.state.lock();
        Ok(content_ids
            .iter()
            .filter_map(|id| {
                state.items.get(id).map(|item| {
                    (
                        *id,
                        ContentSummary {
                            content_id: *id,
                            content_type_id: item.content_type_id,
                            revision_id: item.revision_id,
                            title: Some(format!("Item {id}")),
                            valid_flag: Some(item.valid_flag.clone()),
                            last_modified: Some(Utc::now()),
                        },
                    )
                })
            })
            .collect())
    }

    async fn existing_content_ids(&self, content_ids: &[i64]) -> PublisherResult<HashSet<i64>> {
        let state = self.state.lock();
        Ok(content_ids
            .iter()
            .copied()
            .filter(|id| state.items.contains_key(id))
            .collect())
    }

    async fn parent_folders(
        &self,
        content_ids: &[i64],
    ) -> PublisherResult<HashMap<i64, HashSet<i64>>> {
        let state = self.state.lock();
        Ok(content_ids
            .iter()
            .filter_map(|id| state.items.get(id).map(|item| (*id, item.folders.clone())))
            .collect())
    }

    async fn site_folder_ids(&self, site_id: i64) -> PublisherResult<HashSet<i64>> {
        Ok(self
            .state
            .lock()
            .site_folders
            .get(&site_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn valid_flags(&self, content_ids: &[i64]) -> PublisherResult<HashMap<i64, String>> {
        let state = self.state.lock();
        Ok(content_ids
            .iter()
            .filter_map(|id| state.items.get(id).map(|item| (*id, item.valid_flag.clone())))
            .collect())
    }

    async fn touch(&self, content_ids: &[i64]) -> PublisherResult<u64> {
        let mut state = self.state.lock();
        state.touched.extend_from_slice(content_ids);
        Ok(content_ids.len() as u64)
    }

    async fn active_assembly_parents(&self, content_ids: &[i64]) -> PublisherResult<Vec<i64>> {
        let state = self.state.lock();
        let parents: BTreeSet<i64> = content_ids
            .iter()
            .filter_map(|id| state.assembly_parents.get(id))
            .flatten()
            .copied()
            .collect();
        Ok(parents.into_iter().collect())
    }
}

/// Assembly path that records dispatched items, optionally blocking each batch
#[derive(Debug, Default)]
pub struct RecordingAssembly {
    items: Mutex<Vec<PublishItem>>,
    batches: AtomicUsize,
    gate: Option<Semaphore>,
    pub entered: Notify,
}

impl RecordingAssembly {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every batch waits for a permit from [`release`](Self::release)
    pub fn gated() -> Self {
        Self {
            gate: Some(Semaphore::new(0)),
            ..Self::default()
        }
    }

    pub fn release(&self, batches: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(batches);
        }
    }

    pub fn items(&self) -> Vec<PublishItem> {
        self.items.lock().clone()
    }

    pub fn items_for_job(&self, job_id: i64) -> Vec<PublishItem> {
        self.items
            .lock()
            .iter()
            .filter(|item| item.job_id == job_id)
            .cloned()
            .collect()
    }

    pub fn batches(&self) -> usize {
        self.batches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AssemblyDispatcher for RecordingAssembly {
    async fn dispatch(&self, items: Vec<PublishItem>) -> PublisherResult<()> {
        self.entered.notify_one();
        if let Some(gate) = &self.gate {
            gate.acquire()
                .await
                .map_err(|e| PublisherError::Repository(e.to_string()))?
                .forget();
        }
        self.batches.fetch_add(1, Ordering::SeqCst);
        self.items.lock().extend(items);
        Ok(())
    }
}

/// Legacy query runner returning canned rows per url
#[derive(Debug, Default)]
pub struct FakeLegacyRunner {
    rows: Mutex<HashMap<String, Vec<LegacyRow>>>,
    last_params: Mutex<Option<ParameterMap>>,
}

impl FakeLegacyRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_rows(&self, url: &str, rows: Vec<LegacyRow>) {
        self.rows.lock().insert(url.to_string(), rows);
    }

    pub fn last_params(&self) -> Option<ParameterMap> {
        self.last_params.lock().clone()
    }
}

#[async_trait]
impl LegacyQueryRunner for FakeLegacyRunner {
    async fn execute(&self, url: &str, params: &ParameterMap) -> PublisherResult<Vec<LegacyRow>> {
        *self.last_params.lock() = Some(params.clone());
        self.rows
            .lock()
            .get(url)
            .cloned()
            .ok_or_else(|| PublisherError::Repository(format!("unknown query resource {url}")))
    }
}

/// Target health check with a fixed answer
#[derive(Debug)]
pub struct FixedHealthCheck {
    pub reachable: bool,
}

#[async_trait]
impl TargetHealthCheck for FixedHealthCheck {
    async fn is_reachable(&self, _status: &PubStatus) -> PublisherResult<bool> {
        Ok(self.reachable)
    }
}

/// Generator that always fails
#[derive(Debug, Default)]
pub struct FailingGenerator;

#[async_trait]
impl ContentGenerator for FailingGenerator {
    async fn generate(
        &self,
        _params: &ParameterMap,
        _context: &ExtensionContext,
    ) -> PublisherResult<Vec<GeneratedRow>> {
        Err(PublisherError::Repository("generator query timed out".to_string()))
    }
}

/// Generator that records the parameters it was given and returns fixed rows
#[derive(Debug, Default)]
pub struct RecordingGenerator {
    pub rows: Vec<GeneratedRow>,
    pub seen_params: Mutex<Vec<ParameterMap>>,
}

#[async_trait]
impl ContentGenerator for RecordingGenerator {
    async fn generate(
        &self,
        params: &ParameterMap,
        _context: &ExtensionContext,
    ) -> PublisherResult<Vec<GeneratedRow>> {
        self.seen_params.lock().push(params.clone());
        Ok(self.rows.clone())
    }
}

/// Filter that always fails
#[derive(Debug, Default)]
pub struct FailingFilter;

#[async_trait]
impl ItemFilter for FailingFilter {
    async fn filter(
        &self,
        _candidates: &[i64],
        _context: &ExtensionContext,
    ) -> PublisherResult<Vec<i64>> {
        Err(PublisherError::Repository("workflow service unavailable".to_string()))
    }
}

/// Filter that records the candidates it saw and drops odd ids
#[derive(Debug, Default)]
pub struct EvenIdFilter {
    pub seen: Mutex<Vec<i64>>,
}

#[async_trait]
impl ItemFilter for EvenIdFilter {
    async fn filter(
        &self,
        candidates: &[i64],
        _context: &ExtensionContext,
    ) -> PublisherResult<Vec<i64>> {
        self.seen.lock().extend_from_slice(candidates);
        Ok(candidates.iter().copied().filter(|id| id % 2 == 0).collect())
    }
}

/// Edition task that fails with a message
#[derive(Debug, Default)]
pub struct FailingTask;

#[async_trait]
impl EditionTask for FailingTask {
    async fn perform(
        &self,
        _params: &ParameterMap,
        _context: &TaskContext,
    ) -> PublisherResult<TaskOutcome> {
        Ok(TaskOutcome::failure("target directory is not writable"))
    }
}

/// Edition task that counts its invocations
#[derive(Debug, Default)]
pub struct CountingTask {
    pub calls: AtomicUsize,
}

impl CountingTask {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EditionTask for CountingTask {
    async fn perform(
        &self,
        _params: &ParameterMap,
        _context: &TaskContext,
    ) -> PublisherResult<TaskOutcome> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(TaskOutcome::success())
    }
}
