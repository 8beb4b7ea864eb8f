//! # Job/Item Status Tracker
//!
//! Records job-level ([`PubStatus`](crate::models::PubStatus)) and item-level
//! ([`PubItemStatus`](crate::models::PubItemStatus) / [`SiteItem`](crate::models::SiteItem))
//! outcomes and answers history queries over them.
//!
//! ```text
//!  init_publishing_status ──► PubStatus (STARTED)
//!  record_dispatched      ──► PubItemStatus (UNDEFINED)
//!  update_publishing_info ──► PubItemStatus (terminal) ──fold──► SiteItem ledger
//!  finished_publishing_status ──► PubStatus (terminal) + update_counts
//! ```

pub mod status_tracker;

pub use status_tracker::StatusTracker;
