//! Shared fixtures for engine integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use async_trait::async_trait;
use tributary_engine::{Engine, InterruptSignal, MockTimer};
use tributary_results::MemoryResultStore;
use tributary_state::{Deployment, FlowRun, Interrupt, State, TaskRun};
use tributary_store::{Error, FlowRunCreate, MemoryStore, RunStore, TaskRunCreate};
use uuid::Uuid;

pub struct Harness {
  pub store: Arc<MemoryStore>,
  pub results: Arc<MemoryResultStore>,
  pub timer: Arc<MockTimer>,
  pub engine: Engine,
}

pub fn harness() -> Harness {
  let store = Arc::new(MemoryStore::new());
  let results = Arc::new(MemoryResultStore::new());
  let timer = Arc::new(MockTimer::new());
  let engine = Engine::new(store.clone(), results.clone()).with_timer(timer.clone());
  Harness {
    store,
    results,
    timer,
    engine,
  }
}

pub async fn flow_run(store: &dyn RunStore, flow_name: &str) -> FlowRun {
  store
    .create_flow_run(FlowRunCreate::new(flow_name))
    .await
    .unwrap()
}

pub async fn task_run(store: &dyn RunStore, create: TaskRunCreate) -> TaskRun {
  store.create_task_run(create).await.unwrap()
}

pub async fn flow_run_names(store: &dyn RunStore, flow_run_id: Uuid) -> Vec<String> {
  store
    .read_flow_run_states(flow_run_id)
    .await
    .unwrap()
    .into_iter()
    .map(|state| state.name)
    .collect()
}

pub async fn task_run_names(store: &dyn RunStore, task_run_id: Uuid) -> Vec<String> {
  store
    .read_task_run_states(task_run_id)
    .await
    .unwrap()
    .into_iter()
    .map(|state| state.name)
    .collect()
}

/// The last recorded state of a flow run.
pub async fn flow_run_state(store: &dyn RunStore, flow_run_id: Uuid) -> State {
  store.read_flow_run(flow_run_id).await.unwrap().state
}

/// A store that misbehaves for selected proposals and otherwise delegates.
pub struct FaultyStore {
  pub inner: MemoryStore,
  pub fault: Fault,
}

pub enum Fault {
  /// Proposing `Running` raises the signal and never returns.
  InterruptOnRunning(InterruptSignal, Interrupt),
  /// Every proposal for a task run fails.
  FailTaskProposals,
}

impl FaultyStore {
  pub fn new(fault: Fault) -> Self {
    Self {
      inner: MemoryStore::new(),
      fault,
    }
  }
}

#[async_trait]
impl RunStore for FaultyStore {
  async fn create_flow_run(&self, create: FlowRunCreate) -> Result<FlowRun, Error> {
    self.inner.create_flow_run(create).await
  }

  async fn create_task_run(&self, create: TaskRunCreate) -> Result<TaskRun, Error> {
    self.inner.create_task_run(create).await
  }

  async fn create_deployment(&self, flow_name: &str, name: &str) -> Result<Deployment, Error> {
    self.inner.create_deployment(flow_name, name).await
  }

  async fn read_deployment(&self, deployment_id: Uuid) -> Result<Deployment, Error> {
    self.inner.read_deployment(deployment_id).await
  }

  async fn read_flow_run(&self, flow_run_id: Uuid) -> Result<FlowRun, Error> {
    self.inner.read_flow_run(flow_run_id).await
  }

  async fn read_flow_runs(&self) -> Result<Vec<FlowRun>, Error> {
    self.inner.read_flow_runs().await
  }

  async fn read_task_run(&self, task_run_id: Uuid) -> Result<TaskRun, Error> {
    self.inner.read_task_run(task_run_id).await
  }

  async fn read_task_runs(&self, flow_run_id: Option<Uuid>) -> Result<Vec<TaskRun>, Error> {
    self.inner.read_task_runs(flow_run_id).await
  }

  async fn read_flow_run_states(&self, flow_run_id: Uuid) -> Result<Vec<State>, Error> {
    self.inner.read_flow_run_states(flow_run_id).await
  }

  async fn read_task_run_states(&self, task_run_id: Uuid) -> Result<Vec<State>, Error> {
    self.inner.read_task_run_states(task_run_id).await
  }

  async fn propose_state(&self, run_id: Uuid, state: State) -> Result<State, Error> {
    match &self.fault {
      Fault::InterruptOnRunning(signal, interrupt) => {
        if state.is_running() {
          signal.raise(interrupt.clone());
          std::future::pending::<()>().await;
        }
      }
      Fault::FailTaskProposals => {
        let is_task_run = self.inner.read_task_run(run_id).await.is_ok();
        if is_task_run {
          return Err(Error::Unavailable("connection reset".to_string()));
        }
      }
    }
    self.inner.propose_state(run_id, state).await
  }

  async fn set_state(&self, run_id: Uuid, state: State) -> Result<State, Error> {
    self.inner.set_state(run_id, state).await
  }
}
