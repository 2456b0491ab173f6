//! In-process run store.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use tributary_state::{Deployment, FlowRun, State, TaskRun};
use uuid::Uuid;

use crate::rules::{RunOwner, accept_proposal};
use crate::{Error, FlowRunCreate, RunStore, TaskRunCreate};

#[derive(Default)]
struct Inner {
  flow_runs: Vec<FlowRun>,
  task_runs: Vec<TaskRun>,
  deployments: Vec<Deployment>,
  history: HashMap<Uuid, Vec<State>>,
}

impl Inner {
  fn owner(&self, run_id: Uuid) -> Option<RunOwner> {
    if self.flow_runs.iter().any(|run| run.id == run_id) {
      return Some(RunOwner::Flow(run_id));
    }
    self
      .task_runs
      .iter()
      .find(|run| run.id == run_id)
      .map(|run| RunOwner::Task {
        id: run.id,
        flow_run_id: run.flow_run_id,
      })
  }

  fn current_state(&self, owner: RunOwner) -> Option<&State> {
    match owner {
      RunOwner::Flow(id) => self
        .flow_runs
        .iter()
        .find(|run| run.id == id)
        .map(|run| &run.state),
      RunOwner::Task { id, .. } => self
        .task_runs
        .iter()
        .find(|run| run.id == id)
        .map(|run| &run.state),
    }
  }

  fn append(&mut self, owner: RunOwner, state: State) -> State {
    let state = owner.stamp(state);
    match owner {
      RunOwner::Flow(id) => {
        if let Some(run) = self.flow_runs.iter_mut().find(|run| run.id == id) {
          run.state = state.clone();
        }
        self.history.entry(id).or_default().push(state.clone());
      }
      RunOwner::Task { id, .. } => {
        if let Some(run) = self.task_runs.iter_mut().find(|run| run.id == id) {
          run.state = state.clone();
        }
        self.history.entry(id).or_default().push(state.clone());
      }
    }
    state
  }
}

/// A run store kept entirely in memory.
///
/// Used by tests and by embedders that do not need runs to outlive the
/// process.
#[derive(Default)]
pub struct MemoryStore {
  inner: Mutex<Inner>,
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }

  fn lock(&self) -> Result<MutexGuard<'_, Inner>, Error> {
    self
      .inner
      .lock()
      .map_err(|_| Error::Unavailable("memory store lock poisoned".to_string()))
  }
}

#[async_trait]
impl RunStore for MemoryStore {
  async fn create_flow_run(&self, create: FlowRunCreate) -> Result<FlowRun, Error> {
    let mut inner = self.lock()?;
    let id = Uuid::new_v4();
    let state = RunOwner::Flow(id).stamp(create.state);

    let run = FlowRun {
      id,
      flow_name: create.flow_name,
      parameters: create.parameters,
      parent_task_run_id: create.parent_task_run_id,
      deployment_id: create.deployment_id,
      state: state.clone(),
      created_at: Utc::now(),
    };

    inner.flow_runs.push(run.clone());
    inner.history.insert(id, vec![state]);
    Ok(run)
  }

  async fn create_task_run(&self, create: TaskRunCreate) -> Result<TaskRun, Error> {
    let mut inner = self.lock()?;
    if !inner.flow_runs.iter().any(|run| run.id == create.flow_run_id) {
      return Err(Error::NotFound {
        kind: "flow run",
        id: create.flow_run_id,
      });
    }

    let id = Uuid::new_v4();
    let owner = RunOwner::Task {
      id,
      flow_run_id: create.flow_run_id,
    };
    let state = owner.stamp(create.state);

    let run = TaskRun {
      id,
      flow_run_id: create.flow_run_id,
      task_key: create.task_key,
      dynamic_key: create.dynamic_key,
      state: state.clone(),
      created_at: Utc::now(),
    };

    inner.task_runs.push(run.clone());
    inner.history.insert(id, vec![state]);
    Ok(run)
  }

  async fn create_deployment(&self, flow_name: &str, name: &str) -> Result<Deployment, Error> {
    let deployment = Deployment {
      id: Uuid::new_v4(),
      flow_name: flow_name.to_string(),
      name: name.to_string(),
      created_at: Utc::now(),
    };
    self.lock()?.deployments.push(deployment.clone());
    Ok(deployment)
  }

  async fn read_deployment(&self, deployment_id: Uuid) -> Result<Deployment, Error> {
    self
      .lock()?
      .deployments
      .iter()
      .find(|deployment| deployment.id == deployment_id)
      .cloned()
      .ok_or(Error::NotFound {
        kind: "deployment",
        id: deployment_id,
      })
  }

  async fn read_flow_run(&self, flow_run_id: Uuid) -> Result<FlowRun, Error> {
    self
      .lock()?
      .flow_runs
      .iter()
      .find(|run| run.id == flow_run_id)
      .cloned()
      .ok_or(Error::NotFound {
        kind: "flow run",
        id: flow_run_id,
      })
  }

  async fn read_flow_runs(&self) -> Result<Vec<FlowRun>, Error> {
    Ok(self.lock()?.flow_runs.clone())
  }

  async fn read_task_run(&self, task_run_id: Uuid) -> Result<TaskRun, Error> {
    self
      .lock()?
      .task_runs
      .iter()
      .find(|run| run.id == task_run_id)
      .cloned()
      .ok_or(Error::NotFound {
        kind: "task run",
        id: task_run_id,
      })
  }

  async fn read_task_runs(&self, flow_run_id: Option<Uuid>) -> Result<Vec<TaskRun>, Error> {
    Ok(
      self
        .lock()?
        .task_runs
        .iter()
        .filter(|run| flow_run_id.is_none_or(|id| run.flow_run_id == id))
        .cloned()
        .collect(),
    )
  }

  async fn read_flow_run_states(&self, flow_run_id: Uuid) -> Result<Vec<State>, Error> {
    let inner = self.lock()?;
    if !inner.flow_runs.iter().any(|run| run.id == flow_run_id) {
      return Err(Error::NotFound {
        kind: "flow run",
        id: flow_run_id,
      });
    }
    Ok(inner.history.get(&flow_run_id).cloned().unwrap_or_default())
  }

  async fn read_task_run_states(&self, task_run_id: Uuid) -> Result<Vec<State>, Error> {
    let inner = self.lock()?;
    if !inner.task_runs.iter().any(|run| run.id == task_run_id) {
      return Err(Error::NotFound {
        kind: "task run",
        id: task_run_id,
      });
    }
    Ok(inner.history.get(&task_run_id).cloned().unwrap_or_default())
  }

  async fn propose_state(&self, run_id: Uuid, state: State) -> Result<State, Error> {
    let mut inner = self.lock()?;
    let owner = inner.owner(run_id).ok_or(Error::NotFound {
      kind: "run",
      id: run_id,
    })?;

    let current = inner
      .current_state(owner)
      .cloned()
      .ok_or(Error::NotFound {
        kind: "run",
        id: run_id,
      })?;

    match accept_proposal(&current, state) {
      Some(accepted) => Ok(inner.append(owner, accepted)),
      None => {
        tracing::debug!(
          run_id = %run_id,
          current = %current.state_type,
          "rejected state proposal after terminal state"
        );
        Ok(current)
      }
    }
  }

  async fn set_state(&self, run_id: Uuid, state: State) -> Result<State, Error> {
    let mut inner = self.lock()?;
    let owner = inner.owner(run_id).ok_or(Error::NotFound {
      kind: "run",
      id: run_id,
    })?;
    Ok(inner.append(owner, state))
  }
}
