use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, info};

use crate::error::{PublisherError, PublisherResult};
use crate::extensions::{
    ContentGenerator, EditionTask, ExtensionKind, ItemFilter, NoopEditionTask,
    SelectedItemsGenerator, TemplateExpander, TemplateMapExpander, ValidFlagItemFilter,
};

/// Creates a fresh extension instance
pub type ExtensionFactory<T> = Arc<dyn Fn() -> Arc<T> + Send + Sync>;

struct FactoryTable<T: ?Sized> {
    kind: ExtensionKind,
    factories: RwLock<HashMap<String, ExtensionFactory<T>>>,
}

impl<T: ?Sized> FactoryTable<T> {
    fn new(kind: ExtensionKind) -> Self {
        Self {
            kind,
            factories: RwLock::new(HashMap::new()),
        }
    }

    fn register(&self, name: String, factory: ExtensionFactory<T>) {
        let replaced = self.factories.write().insert(name.clone(), factory).is_some();
        info!(kind = %self.kind, name = %name, replaced, "Registered extension");
    }

    fn resolve(&self, name: &str) -> PublisherResult<Arc<T>> {
        let factory = self
            .factories
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| PublisherError::extension_missing(self.kind.as_str(), name))?;
        debug!(kind = %self.kind, name = %name, "Resolved extension");
        Ok(factory())
    }

    fn contains(&self, name: &str) -> bool {
        self.factories.read().contains_key(name)
    }

    fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.read().keys().cloned().collect();
        names.sort();
        names
    }
}

/// Registry statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RegistryStats {
    pub generators: usize,
    pub filters: usize,
    pub expanders: usize,
    pub edition_tasks: usize,
}

/// Thread-safe registry of extension factories keyed by name
pub struct ExtensionRegistry {
    generators: FactoryTable<dyn ContentGenerator>,
    filters: FactoryTable<dyn ItemFilter>,
    expanders: FactoryTable<dyn TemplateExpander>,
    edition_tasks: FactoryTable<dyn EditionTask>,
}

impl Default for ExtensionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ExtensionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtensionRegistry")
            .field("stats", &self.stats())
            .finish()
    }
}

impl ExtensionRegistry {
    /// An empty registry
    pub fn new() -> Self {
        Self {
            generators: FactoryTable::new(ExtensionKind::Generator),
            filters: FactoryTable::new(ExtensionKind::Filter),
            expanders: FactoryTable::new(ExtensionKind::Expander),
            edition_tasks: FactoryTable::new(ExtensionKind::EditionTask),
        }
    }

    /// A registry holding the built-in extensions
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        registry.register_generator(SelectedItemsGenerator::NAME, || {
            Arc::new(SelectedItemsGenerator) as Arc<dyn ContentGenerator>
        });
        registry.register_filter(ValidFlagItemFilter::NAME, || {
            Arc::new(ValidFlagItemFilter::default()) as Arc<dyn ItemFilter>
        });
        registry.register_expander(TemplateMapExpander::NAME, || {
            Arc::new(TemplateMapExpander) as Arc<dyn TemplateExpander>
        });
        registry.register_edition_task(NoopEditionTask::NAME, || {
            Arc::new(NoopEditionTask) as Arc<dyn EditionTask>
        });
        registry
    }

    pub fn register_generator<F>(&self, name: impl Into<String>, factory: F)
    where
        F: Fn() -> Arc<dyn ContentGenerator> + Send + Sync + 'static,
    {
        self.generators.register(name.into(), Arc::new(factory));
    }

    pub fn register_filter<F>(&self, name: impl Into<String>, factory: F)
    where
        F: Fn() -> Arc<dyn ItemFilter> + Send + Sync + 'static,
    {
        self.filters.register(name.into(), Arc::new(factory));
    }

    pub fn register_expander<F>(&self, name: impl Into<String>, factory: F)
    where
        F: Fn() -> Arc<dyn TemplateExpander> + Send + Sync + 'static,
    {
        self.expanders.register(name.into(), Arc::new(factory));
    }

    pub fn register_edition_task<F>(&self, name: impl Into<String>, factory: F)
    where
        F: Fn() -> Arc<dyn EditionTask> + Send + Sync + 'static,
    {
        self.edition_tasks.register(name.into(), Arc::new(factory));
    }

    /// Register a shared instance that every resolution hands out
    pub fn register_generator_instance(
        &self,
        name: impl Into<String>,
        instance: Arc<dyn ContentGenerator>,
    ) {
        self.register_generator(name, move || instance.clone());
    }

    pub fn register_filter_instance(&self, name: impl Into<String>, instance: Arc<dyn ItemFilter>) {
        self.register_filter(name, move || instance.clone());
    }

    pub fn register_expander_instance(
        &self,
        name: impl Into<String>,
        instance: Arc<dyn TemplateExpander>,
    ) {
        self.register_expander(name, move || instance.clone());
    }

    pub fn register_edition_task_instance(
        &self,
        name: impl Into<String>,
        instance: Arc<dyn EditionTask>,
    ) {
        self.register_edition_task(name, move || instance.clone());
    }

    pub fn resolve_generator(&self, name: &str) -> PublisherResult<Arc<dyn ContentGenerator>> {
        self.generators.resolve(name)
    }

    pub fn resolve_filter(&self, name: &str) -> PublisherResult<Arc<dyn ItemFilter>> {
        self.filters.resolve(name)
    }

    pub fn resolve_expander(&self, name: &str) -> PublisherResult<Arc<dyn TemplateExpander>> {
        self.expanders.resolve(name)
    }

    pub fn resolve_edition_task(&self, name: &str) -> PublisherResult<Arc<dyn EditionTask>> {
        self.edition_tasks.resolve(name)
    }

    pub fn contains(&self, kind: ExtensionKind, name: &str) -> bool {
        match kind {
            ExtensionKind::Generator => self.generators.contains(name),
            ExtensionKind::Filter => self.filters.contains(name),
            ExtensionKind::Expander => self.expanders.contains(name),
            ExtensionKind::EditionTask => self.edition_tasks.contains(name),
        }
    }

    /// Registered names of one kind, sorted
    pub fn names(&self, kind: ExtensionKind) -> Vec<String> {
        match kind {
            ExtensionKind::Generator => self.generators.names(),
            ExtensionKind::Filter => self.filters.names(),
            ExtensionKind::Expander => self.expanders.names(),
            ExtensionKind::EditionTask => self.edition_tasks.names(),
        }
    }

    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            generators: self.generators.names().len(),
            filters: self.filters.names().len(),
            expanders: self.expanders.names().len(),
            edition_tasks: self.edition_tasks.names().len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtins_are_registered() {
        let registry = ExtensionRegistry::with_builtins();
        assert!(registry.contains(ExtensionKind::Generator, SelectedItemsGenerator::NAME));
        assert!(registry.contains(ExtensionKind::Filter, ValidFlagItemFilter::NAME));
        assert!(registry.contains(ExtensionKind::Expander, TemplateMapExpander::NAME));
        assert!(registry.contains(ExtensionKind::EditionTask, NoopEditionTask::NAME));
        assert_eq!(
            registry.stats(),
            RegistryStats {
                generators: 1,
                filters: 1,
                expanders: 1,
                edition_tasks: 1,
            }
        );
    }

    #[test]
    fn test_missing_extension_reports_kind_and_name() {
        let registry = ExtensionRegistry::new();
        let err = registry.resolve_expander("nope").err().unwrap();
        assert_eq!(err.code(), "EXTENSION_MISSING");
        assert_eq!(
            err,
            PublisherError::ExtensionMissing {
                kind: "expander".to_string(),
                name: "nope".to_string(),
            }
        );
    }

    #[test]
    fn test_instances_are_shared() {
        let registry = ExtensionRegistry::new();
        let task: Arc<dyn EditionTask> = Arc::new(NoopEditionTask);
        registry.register_edition_task_instance("shared", task.clone());

        let resolved = registry.resolve_edition_task("shared").unwrap();
        assert!(Arc::ptr_eq(&resolved, &task));
    }
}
