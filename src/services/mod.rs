//! # Publisher Services
//!
//! Service boundary exposed to callers of the publishing core.

pub mod publisher_service;

pub use publisher_service::{PublisherService, PublisherServiceBuilder};
