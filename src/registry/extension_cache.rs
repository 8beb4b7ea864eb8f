//! Per-run cache of resolved extensions.
//!
//! A content list run or an edition job resolves every extension name at most once
//! and reuses the instance for every item it processes.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;

use super::ExtensionRegistry;
use crate::error::PublisherResult;
use crate::extensions::{ContentGenerator, EditionTask, ItemFilter, TemplateExpander};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub resolutions: u64,
}

struct Resolved<T: ?Sized> {
    entries: Mutex<HashMap<String, Arc<T>>>,
}

impl<T: ?Sized> Resolved<T> {
    fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn get_or_resolve(
        &self,
        name: &str,
        stats: &CacheCounters,
        resolve: impl FnOnce(&str) -> PublisherResult<Arc<T>>,
    ) -> PublisherResult<Arc<T>> {
        let mut entries = self.entries.lock();
        if let Some(found) = entries.get(name) {
            stats.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(found.clone());
        }
        let instance = resolve(name)?;
        stats.resolutions.fetch_add(1, Ordering::Relaxed);
        entries.insert(name.to_string(), instance.clone());
        Ok(instance)
    }
}

#[derive(Default)]
struct CacheCounters {
    hits: AtomicU64,
    resolutions: AtomicU64,
}

pub struct ExtensionCache {
    registry: Arc<ExtensionRegistry>,
    generators: Resolved<dyn ContentGenerator>,
    filters: Resolved<dyn ItemFilter>,
    expanders: Resolved<dyn TemplateExpander>,
    edition_tasks: Resolved<dyn EditionTask>,
    counters: CacheCounters,
}

impl ExtensionCache {
    pub fn new(registry: Arc<ExtensionRegistry>) -> Self {
        Self {
            registry,
            generators: Resolved::new(),
            filters: Resolved::new(),
            expanders: Resolved::new(),
            edition_tasks: Resolved::new(),
            counters: CacheCounters::default(),
        }
    }

    pub fn generator(&self, name: &str) -> PublisherResult<Arc<dyn ContentGenerator>> {
        self.generators
            .get_or_resolve(name, &self.counters, |n| self.registry.resolve_generator(n))
    }

    pub fn filter(&self, name: &str) -> PublisherResult<Arc<dyn ItemFilter>> {
        self.filters
            .get_or_resolve(name, &self.counters, |n| self.registry.resolve_filter(n))
    }

    pub fn expander(&self, name: &str) -> PublisherResult<Arc<dyn TemplateExpander>> {
        self.expanders
            .get_or_resolve(name, &self.counters, |n| self.registry.resolve_expander(n))
    }

    pub fn edition_task(&self, name: &str) -> PublisherResult<Arc<dyn EditionTask>> {
        self.edition_tasks
            .get_or_resolve(name, &self.counters, |n| self.registry.resolve_edition_task(n))
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            resolutions: self.counters.resolutions.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    use crate::extensions::NoopEditionTask;

    #[test]
    fn test_each_name_resolves_once() {
        let created = Arc::new(AtomicUsize::new(0));
        let registry = ExtensionRegistry::new();
        let counter = created.clone();
        registry.register_edition_task("counting", move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Arc::new(NoopEditionTask) as Arc<dyn EditionTask>
        });

        let cache = ExtensionCache::new(Arc::new(registry));
        for _ in 0..5 {
            cache.edition_task("counting").unwrap();
        }

        assert_eq!(created.load(Ordering::SeqCst), 1);
        assert_eq!(
            cache.stats(),
            CacheStats {
                hits: 4,
                resolutions: 1,
            }
        );
    }

    #[test]
    fn test_failed_resolution_is_not_cached() {
        let cache = ExtensionCache::new(Arc::new(ExtensionRegistry::new()));
        assert!(cache.generator("missing").is_err());
        assert!(cache.generator("missing").is_err());
        assert_eq!(cache.stats(), CacheStats::default());
    }
}
