//! Tributary State
//!
//! This crate contains the run state model shared by every other tributary
//! crate:
//! - [`State`] and its closed set of [`StateType`]s
//! - the result payload a state carries ([`StateResult`])
//! - run records ([`FlowRun`], [`TaskRun`], [`Deployment`])
//! - error and interrupt records ([`ErrorRecord`], [`Interrupt`], [`RunError`])
//!
//! States are values. Once a state is appended to a run's history it is never
//! mutated; orchestration only ever appends new states.

mod error;
mod run;
mod state;

pub use error::{ErrorRecord, Interrupt, RunError};
pub use run::{Deployment, FlowRun, TaskRun};
pub use state::{ResultError, State, StateDetails, StateResult, StateType};
