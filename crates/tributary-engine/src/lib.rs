//! Tributary Engine
//!
//! This crate drives task runs and flow runs through their state machines.
//! Every transition is proposed to the run store, and the engine adopts
//! whatever state the store accepts.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  Engine::begin_flow_run                     │
//! │  - casts parameters to the flow's declared types            │
//! │  - records Crashed for anything escaping orchestration      │
//! └─────────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   flow run orchestration                    │
//! │  - scheduled wait, Running, retries, timeout                │
//! │  - FlowRunContext: dynamic keys, task submission, subflows  │
//! └─────────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   task run orchestration                    │
//! │  - waits on upstream runs (NotReady if any did not complete)│
//! │  - Running, retries, timeout, result persistence            │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Interrupts travel through an [`InterruptSignal`] tree. An interrupt that
//! reaches a run marks it `Crashed` and is returned to the caller as
//! [`EngineError::Interrupted`]. Timeouts raise only the timed-out run's own
//! scope and are recorded as `Failed`.
//!
//! # Usage
//!
//! ```ignore
//! use tributary_engine::{Engine, Flow, InterruptSignal, Task, parameters};
//!
//! let engine = Engine::new(store, results);
//! let add_one = Task::new("add-one", |call| async move {
//!   let x = call.value("x")?;
//!   Ok(json!(x.as_i64().unwrap_or_default() + 1))
//! });
//! let flow = Flow::new("pipeline", move |ctx, _params| {
//!   let add_one = add_one.clone();
//!   async move {
//!     let state = ctx.call(&add_one, parameters([("x", json!(1))])).await?;
//!     Ok(Param::State(state))
//!   }
//! });
//!
//! let flow_run = store.create_flow_run(FlowRunCreate::new("pipeline")).await?;
//! let state = engine
//!   .begin_flow_run(&flow, flow_run, &Map::new(), &InterruptSignal::new())
//!   .await?;
//! ```

mod config;
mod context;
mod engine;
mod error;
mod events;
mod flow;
mod flow_run;
mod registry;
mod retry;
mod runner;
mod signal;
mod task;
mod task_run;
mod timer;

pub use config::{ConfigError, EngineConfig, TaskRunnerKind};
pub use context::FlowRunContext;
pub use engine::Engine;
pub use error::EngineError;
pub use events::{ChannelNotifier, EventNotifier, NoopNotifier, RunEvent};
pub use flow::Flow;
pub use registry::{FlowLoader, FlowRegistry};
pub use retry::{RetryBackoff, RetryDelay};
pub use runner::{ConcurrentTaskRunner, RunUnit, SequentialTaskRunner, TaskRunner};
pub use signal::InterruptSignal;
pub use task::{Task, TaskCall};
#[cfg(any(test, feature = "test-util"))]
pub use timer::MockTimer;
pub use timer::{SystemTimer, Timer};

// Re-export the types flow and task bodies work with
pub use tributary_resolver::{Param, ParamType, Parameters, RunFuture, parameters};
pub use tributary_state::{ErrorRecord, Interrupt, RunError, State, StateResult, StateType};
