//! # Lifecycle Events
//!
//! In-process broadcast of job, content list and edition task lifecycle events. Event
//! names live in [`crate::constants::events`].

pub mod publisher;
pub mod types;

pub use publisher::{EventPublisher, EventPublisherStats, PublishError, PublishedEvent};
pub use types::{ContentListEvent, EditionTaskEvent, JobLifecycleEvent};
