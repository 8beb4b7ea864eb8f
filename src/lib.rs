#![allow(clippy::doc_markdown)] // Allow technical terms like PostgreSQL, SQLx in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Publisher Core
//!
//! Publishing pipeline core: turns a site's content into delivery work on a schedule,
//! tracks what was delivered and reconciles what must be removed.
//!
//! ## Architecture
//!
//! ```text
//!  EditionOrchestrator ──► EditionTaskRunner (pre/post tasks)
//!         │
//!         ├──► UnpublishResolver ──► SiteItem ledger reads
//!         │
//!         └──► ContentListEngine ──► Generator ─► ItemFilter ─► TemplateExpander
//!                     │
//!               ItemDispatcher ──► AssemblyDispatcher (external)
//!                                          │ outcomes
//!                                          ▼
//!                              StatusTracker ──fold──► SiteItem ledger
//! ```
//!
//! ## Module Organization
//!
//! - [`content_list`] - Content List Engine
//! - [`orchestration`] - Edition Orchestrator, task phases, dispatch, recovery
//! - [`tracking`] - Job/Item Status Tracker
//! - [`unpublish`] - Unpublish Resolver
//! - [`ledger`] - pure site item fold
//! - [`state_machine`] - job ending states and transitions
//! - [`extensions`] / [`registry`] - name-addressed plugins and their resolution
//! - [`store`] - persistence (`InMemoryStore`, `PgStore`)
//! - [`repository`] - contracts of external collaborators
//! - [`services`] - `PublisherService` facade
//! - [`config`], [`logging`], [`error`], [`events`], [`constants`]
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use publisher_core::config::PublisherConfig;
//! use publisher_core::repository::{AssemblyDispatcher, ContentRepository};
//! use publisher_core::services::PublisherService;
//! use publisher_core::store::InMemoryStore;
//!
//! # async fn example(
//! #     repository: Arc<dyn ContentRepository>,
//! #     assembly: Arc<dyn AssemblyDispatcher>,
//! # ) -> publisher_core::PublisherResult<()> {
//! let service = PublisherService::builder(
//!     PublisherConfig::default(),
//!     Arc::new(InMemoryStore::new()),
//!     repository,
//!     assembly,
//! )
//! .build()?;
//!
//! let edition = service.find_edition_by_name("nightly").await?;
//! let report = service.run_edition(edition.edition_id).await?;
//! println!("job {} ended {}", report.job_id, report.ending_state);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod constants;
pub mod content_list;
pub mod error;
pub mod events;
pub mod extensions;
pub mod ledger;
pub mod logging;
pub mod models;
pub mod orchestration;
pub mod registry;
pub mod repository;
pub mod services;
pub mod state_machine;
pub mod store;
pub mod tracking;
pub mod unpublish;

pub use config::{ConfigManager, PublisherConfig};
pub use content_list::{ContentListEngine, ContentListRun};
pub use error::{PublisherError, PublisherResult};
pub use events::EventPublisher;
pub use orchestration::{EditionOrchestrator, EditionRunReport};
pub use registry::ExtensionRegistry;
pub use services::PublisherService;
pub use state_machine::EndingState;
pub use store::{InMemoryStore, PublishingStore};
pub use tracking::StatusTracker;
pub use unpublish::UnpublishResolver;
