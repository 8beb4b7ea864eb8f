//! # Edition Orchestration
//!
//! Job scheduling for editions: task phases, content list execution, dispatch of work
//! items to the external assembly path, cancellation and orphaned-job recovery.
//!
//! ## Components
//!
//! - [`EditionOrchestrator`]: runs or spawns an edition as one job
//! - [`EditionTaskRunner`]: pre/post task phases with task logging
//! - [`ItemDispatcher`]: batched dispatch with reference id allocation
//! - [`OrphanedJobRecovery`]: reconciles STARTED jobs without an owning run

pub mod dispatch;
pub mod edition_orchestrator;
pub mod edition_tasks;
pub mod recovery;
pub mod types;

pub use dispatch::{ItemDispatcher, JobCancellation};
pub use edition_orchestrator::{EditionOrchestrator, SpawnedEdition};
pub use edition_tasks::{EditionTaskRunner, TaskPhase};
pub use recovery::OrphanedJobRecovery;
pub use types::{
    ContentListReport, DispatchOutcome, EditionRunReport, RecoveredJob, TaskPhaseResult,
    TaskRunResult,
};
