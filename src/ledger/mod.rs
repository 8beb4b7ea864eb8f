//! # Site Item Ledger
//!
//! Materialized view of what is live per site, folded from terminal item events.
//! Stores apply [`fold_site_item`] under their own write lock or transaction so that
//! concurrent jobs writing the same ledger key serialize on it.

pub mod fold;

pub use fold::{fold_site_item, is_stale, LedgerDecision, LedgerEvent, UnchangedReason};
