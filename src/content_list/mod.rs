//! # Content List Engine
//!
//! Turns a [`ContentList`](crate::models::ContentList) into materialized work items.
//!
//! ```text
//!  pipeline list:  Generator ──► Item Filter (ids only) ──► Template Expander ──► items
//!  legacy list:    LegacyQueryRunner(url) ──────────────────────────────────────► items
//! ```
//!
//! Unpublish runs (`publish = false`) take template and location from the site item
//! ledger instead of the expander, since the content may be gone from the repository.

pub mod engine;

pub use engine::{merge_parameters, ContentListEngine, ContentListRun};
