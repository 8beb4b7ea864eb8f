//! # Unpublish Resolver
//!
//! Compares the live rows of the site item ledger with the current state of the
//! content repository and yields the reference ids that must be unpublished.

pub mod resolver;

pub use resolver::{UnpublishCandidate, UnpublishReason, UnpublishRequest, UnpublishResolver};
