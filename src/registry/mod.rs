//! # Extension Registry
//!
//! Maps stable string keys to factories for the four extension kinds and caches
//! resolved instances for the duration of one run.
//!
//! ## Architecture
//!
//! ```text
//! ExtensionRegistry (process lifetime)
//! ├── generators     name -> factory
//! ├── filters        name -> factory
//! ├── expanders      name -> factory
//! └── edition tasks  name -> factory
//!
//! ExtensionCache (one job or content list run)
//! └── resolves each name once through the registry, then serves the cached Arc
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use publisher_core::registry::{ExtensionCache, ExtensionRegistry};
//! use std::sync::Arc;
//!
//! # fn example() -> Result<(), publisher_core::error::PublisherError> {
//! let registry = Arc::new(ExtensionRegistry::with_builtins());
//! let cache = ExtensionCache::new(registry);
//!
//! let generator = cache.generator("selected_items")?;
//! let again = cache.generator("selected_items")?;
//! assert!(Arc::ptr_eq(&generator, &again));
//! # Ok(())
//! # }
//! ```

pub mod extension_cache;
pub mod extension_registry;

pub use extension_cache::{CacheStats, ExtensionCache};
pub use extension_registry::{ExtensionFactory, ExtensionRegistry, RegistryStats};
