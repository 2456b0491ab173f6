//! Tributary Store
//!
//! This crate provides the run store trait and implementations. The run store
//! is the only shared mutable resource of the orchestration engine: every run
//! record and every state transition goes through it.
//!
//! The [`RunStore`] trait defines operations for:
//! - Creating flow runs, task runs, and deployments
//! - Reading runs and their ordered state history
//! - Proposing states (orchestrated, compare-and-set on the last state)
//! - Setting states (forced, used for crash reporting)

mod memory;
mod rules;
mod sqlite;

pub use memory::MemoryStore;
pub use rules::accept_proposal;
pub use sqlite::SqliteStore;

use async_trait::async_trait;
use tributary_state::{Deployment, FlowRun, State, TaskRun};
use uuid::Uuid;

/// Error type for storage operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
  /// The requested record was not found.
  #[error("{kind} not found: {id}")]
  NotFound { kind: &'static str, id: Uuid },

  /// The store cannot currently serve requests.
  #[error("store unavailable: {0}")]
  Unavailable(String),

  /// A stored record is malformed.
  #[error("invalid record: {0}")]
  InvalidRecord(String),

  /// A stored record could not be encoded or decoded.
  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),

  /// A database error occurred.
  #[error("database error: {0}")]
  Database(#[from] sqlx::Error),

  /// Applying database migrations failed.
  #[error("migration error: {0}")]
  Migration(#[from] sqlx::migrate::MigrateError),
}

/// Fields for a new flow run.
#[derive(Debug, Clone)]
pub struct FlowRunCreate {
  pub flow_name: String,
  pub parameters: serde_json::Map<String, serde_json::Value>,
  pub parent_task_run_id: Option<Uuid>,
  pub deployment_id: Option<Uuid>,
  pub state: State,
}

impl FlowRunCreate {
  pub fn new(flow_name: impl Into<String>) -> Self {
    Self {
      flow_name: flow_name.into(),
      parameters: serde_json::Map::new(),
      parent_task_run_id: None,
      deployment_id: None,
      state: State::pending(),
    }
  }

  pub fn with_parameters(mut self, parameters: serde_json::Map<String, serde_json::Value>) -> Self {
    self.parameters = parameters;
    self
  }

  pub fn with_parent_task_run(mut self, task_run_id: Uuid) -> Self {
    self.parent_task_run_id = Some(task_run_id);
    self
  }

  pub fn with_state(mut self, state: State) -> Self {
    self.state = state;
    self
  }
}

/// Fields for a new task run.
#[derive(Debug, Clone)]
pub struct TaskRunCreate {
  pub flow_run_id: Uuid,
  pub task_key: String,
  pub dynamic_key: String,
  pub state: State,
}

impl TaskRunCreate {
  pub fn new(flow_run_id: Uuid, task_key: impl Into<String>, dynamic_key: impl Into<String>) -> Self {
    Self {
      flow_run_id,
      task_key: task_key.into(),
      dynamic_key: dynamic_key.into(),
      state: State::pending(),
    }
  }

  pub fn with_state(mut self, state: State) -> Self {
    self.state = state;
    self
  }
}

/// Storage trait for runs and their state history.
///
/// `propose_state` is the orchestrated write: the store applies its rules
/// against the run's current state and returns the state it actually
/// accepted, which may differ from the proposal. Callers must adopt the
/// returned state. `set_state` skips the rules.
#[async_trait]
pub trait RunStore: Send + Sync {
  /// Create a new flow run. Its initial state becomes the first history entry.
  async fn create_flow_run(&self, create: FlowRunCreate) -> Result<FlowRun, Error>;

  /// Create a new task run. Its initial state becomes the first history entry.
  async fn create_task_run(&self, create: TaskRunCreate) -> Result<TaskRun, Error>;

  /// Create a deployment for a flow.
  async fn create_deployment(&self, flow_name: &str, name: &str) -> Result<Deployment, Error>;

  /// Get a deployment by ID.
  async fn read_deployment(&self, deployment_id: Uuid) -> Result<Deployment, Error>;

  /// Get a flow run by ID.
  async fn read_flow_run(&self, flow_run_id: Uuid) -> Result<FlowRun, Error>;

  /// List all flow runs, oldest first.
  async fn read_flow_runs(&self) -> Result<Vec<FlowRun>, Error>;

  /// Get a task run by ID.
  async fn read_task_run(&self, task_run_id: Uuid) -> Result<TaskRun, Error>;

  /// List task runs, oldest first, optionally restricted to one flow run.
  async fn read_task_runs(&self, flow_run_id: Option<Uuid>) -> Result<Vec<TaskRun>, Error>;

  /// The ordered state history of a flow run.
  async fn read_flow_run_states(&self, flow_run_id: Uuid) -> Result<Vec<State>, Error>;

  /// The ordered state history of a task run.
  async fn read_task_run_states(&self, task_run_id: Uuid) -> Result<Vec<State>, Error>;

  /// Propose a new state for a flow or task run.
  async fn propose_state(&self, run_id: Uuid, state: State) -> Result<State, Error>;

  /// Append a state for a flow or task run without orchestration rules.
  async fn set_state(&self, run_id: Uuid, state: State) -> Result<State, Error>;

  /// Create a flow run from a deployment.
  async fn create_flow_run_from_deployment(
    &self,
    deployment_id: Uuid,
    parameters: serde_json::Map<String, serde_json::Value>,
  ) -> Result<FlowRun, Error> {
    let deployment = self.read_deployment(deployment_id).await?;
    let mut create = FlowRunCreate::new(deployment.flow_name).with_parameters(parameters);
    create.deployment_id = Some(deployment.id);
    self.create_flow_run(create).await
  }
}
