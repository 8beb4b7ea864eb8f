//! # Job State Machine
//!
//! Lifecycle of one publishing job:
//!
//! ```text
//!            ┌──> COMPLETED
//!            ├──> COMPLETED_W_FAILURE
//! STARTED ───┼──> CANCELED_BY_USER
//!            ├──> ABORTED
//!            └──> RESTARTNEEDED
//! ```
//!
//! `STARTED` is the only non-terminal state. Finalizing a job into the state it already
//! ended in is a no-op; any other transition out of a terminal state is rejected.

pub mod events;
pub mod job_state_machine;
pub mod states;

pub use events::JobEvent;
pub use job_state_machine::{determine_target_state, JobStateMachine, TransitionOutcome};
pub use states::EndingState;
