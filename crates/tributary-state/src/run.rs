//! Run records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::state::State;

/// A flow run as stored by the run store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowRun {
  pub id: Uuid,
  pub flow_name: String,
  /// Raw parameters, before they are cast to the flow's declared types.
  pub parameters: serde_json::Map<String, serde_json::Value>,
  /// The task run in the parent flow that represents this run, for subflows.
  pub parent_task_run_id: Option<Uuid>,
  pub deployment_id: Option<Uuid>,
  /// The current (last accepted) state.
  pub state: State,
  pub created_at: DateTime<Utc>,
}

/// A task run as stored by the run store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRun {
  pub id: Uuid,
  pub flow_run_id: Uuid,
  pub task_key: String,
  /// Distinguishes repeated calls of the same task within one flow run.
  pub dynamic_key: String,
  pub state: State,
  pub created_at: DateTime<Utc>,
}

/// A named, stored entry point for creating flow runs of one flow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deployment {
  pub id: Uuid,
  pub flow_name: String,
  pub name: String,
  pub created_at: DateTime<Utc>,
}
