//! The per-flow-run execution context handed to flow bodies.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use futures::future::join_all;
use serde_json::{Map, Value};
use tracing::debug;
use tributary_resolver::{Parameters, RunFuture};
use tributary_state::{FlowRun, RunError, State, StateDetails};
use tributary_store::{FlowRunCreate, TaskRunCreate};

use crate::engine::Engine;
use crate::error::EngineError;
use crate::events::RunEvent;
use crate::flow::Flow;
use crate::runner::RunUnit;
use crate::signal::InterruptSignal;
use crate::task::Task;

/// Next dynamic key per task key, private to one flow run.
pub(crate) type DynamicKeys = Arc<Mutex<HashMap<String, u64>>>;

/// Handle a flow body uses to run tasks and subflows inside its flow run.
///
/// Every task call made through the context gets a task run parented to this
/// flow run and a dynamic key from this flow run's own counter. Subflows get
/// a fresh counter. The context is only valid for the attempt it was created
/// for.
#[derive(Clone)]
pub struct FlowRunContext {
  inner: Arc<ContextInner>,
}

struct ContextInner {
  engine: Engine,
  flow_run: FlowRun,
  dynamic_keys: DynamicKeys,
  signal: InterruptSignal,
  interruptible: bool,
  submitted: Mutex<Vec<RunFuture>>,
}

impl FlowRunContext {
  pub(crate) fn new(
    engine: Engine,
    flow_run: FlowRun,
    dynamic_keys: DynamicKeys,
    signal: InterruptSignal,
    interruptible: bool,
  ) -> Self {
    Self {
      inner: Arc::new(ContextInner {
        engine,
        flow_run,
        dynamic_keys,
        signal,
        interruptible,
        submitted: Mutex::new(Vec::new()),
      }),
    }
  }

  pub fn flow_run(&self) -> &FlowRun {
    &self.inner.flow_run
  }

  /// The signal scoped to this attempt of the flow body.
  pub fn signal(&self) -> &InterruptSignal {
    &self.inner.signal
  }

  /// Take the next dynamic key for a task key: 0, 1, 2, ...
  pub fn next_dynamic_key(&self, task_key: &str) -> u64 {
    let mut keys = self
      .inner
      .dynamic_keys
      .lock()
      .unwrap_or_else(PoisonError::into_inner);
    let next = keys.entry(task_key.to_string()).or_insert(0);
    let key = *next;
    *next += 1;
    key
  }

  /// Create a task run and hand it to the task runner.
  pub async fn submit(&self, task: &Task, parameters: Parameters) -> Result<RunFuture, EngineError> {
    self.submit_with(task, parameters, Vec::new()).await
  }

  /// Like [`submit`](Self::submit), also waiting on `wait_for` before the task
  /// may start.
  pub async fn submit_with(
    &self,
    task: &Task,
    parameters: Parameters,
    wait_for: Vec<RunFuture>,
  ) -> Result<RunFuture, EngineError> {
    let engine = &self.inner.engine;
    let dynamic_key = self.next_dynamic_key(task.key());

    let task_run = engine
      .client()
      .create_task_run(TaskRunCreate::new(
        self.flow_run().id,
        task.key(),
        dynamic_key.to_string(),
      ))
      .await?;
    debug!(
      task_run_id = %task_run.id,
      task_key = %task.key(),
      dynamic_key,
      "task_run_created"
    );
    engine.notify(RunEvent::TaskRunCreated {
      task_run_id: task_run.id,
      flow_run_id: task_run.flow_run_id,
      task_key: task_run.task_key.clone(),
      dynamic_key: task_run.dynamic_key.clone(),
    });

    let task_run_id = task_run.id;
    let unit: RunUnit = {
      let engine = engine.clone();
      let task = task.clone();
      let signal = self.inner.signal.clone();
      let interruptible = self.inner.interruptible;
      Box::pin(async move {
        match engine
          .orchestrate_task_run(&task, task_run, parameters, wait_for, interruptible, &signal)
          .await
        {
          Ok(state) => Ok(state),
          Err(EngineError::Interrupted(interrupt)) => Err(interrupt),
          Err(other) => Ok(State::crashed(
            format!("Execution was interrupted by an unexpected exception: {other}"),
            Default::default(),
          )),
        }
      })
    };

    let future = engine.task_runner().submit(task_run_id, unit).await;
    self
      .inner
      .submitted
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .push(future.clone());
    Ok(future)
  }

  /// Run a task and wait for its final state.
  ///
  /// A failed task is an `Ok` state. Only an interrupt that unwound the task
  /// run is an error, so `?` propagates it out of the flow body.
  pub async fn call(&self, task: &Task, parameters: Parameters) -> Result<State, RunError> {
    let future = self.submit(task, parameters).await?;
    future.wait().await.map_err(RunError::Interrupted)
  }

  /// Run a task and return its result, raising the recorded error if it did
  /// not complete.
  pub async fn call_value(&self, task: &Task, parameters: Parameters) -> Result<Value, RunError> {
    let state = self.call(task, parameters).await?;
    Ok(state.result()?)
  }

  /// Run a flow as a subflow of this flow run.
  ///
  /// The subflow is represented in this flow run by a task run keyed by the
  /// subflow's name. That task run goes `Running` when the subflow starts and
  /// takes the subflow's final state when it ends.
  pub async fn call_flow(&self, flow: &Flow, parameters: Map<String, Value>) -> Result<State, RunError> {
    let engine = &self.inner.engine;
    let signal = &self.inner.signal;
    let dynamic_key = self.next_dynamic_key(flow.name());

    let parent_task_run = engine
      .client()
      .create_task_run(TaskRunCreate::new(
        self.flow_run().id,
        flow.name(),
        dynamic_key.to_string(),
      ))
      .await
      .map_err(EngineError::from)?;
    engine.notify(RunEvent::TaskRunCreated {
      task_run_id: parent_task_run.id,
      flow_run_id: parent_task_run.flow_run_id,
      task_key: parent_task_run.task_key.clone(),
      dynamic_key: parent_task_run.dynamic_key.clone(),
    });

    let parent_task_run_id = parent_task_run.id;
    let work = async {
      engine
        .propose(signal, parent_task_run_id, State::running())
        .await?;

      let child = engine
        .client()
        .create_flow_run(
          FlowRunCreate::new(flow.name())
            .with_parameters(parameters.clone())
            .with_parent_task_run(parent_task_run_id),
        )
        .await?;
      debug!(
        parent_task_run_id = %parent_task_run_id,
        flow_run_id = %child.id,
        "subflow_run_created"
      );

      let final_state = engine
        .begin_flow_run(flow, child, &parameters, signal)
        .await?;

      let mirrored = final_state.clone().with_details(StateDetails {
        result_key: final_state.details.result_key.clone(),
        ..StateDetails::default()
      });
      engine
        .propose(signal, parent_task_run_id, mirrored)
        .await?;
      Ok::<_, EngineError>(final_state)
    };

    let outcome = engine.guard(parent_task_run_id, work).await;
    let recorded = match &outcome {
      Ok(state) => Some(Ok(state.clone())),
      Err(EngineError::Interrupted(interrupt)) => Some(Err(interrupt.clone())),
      Err(_) => None,
    };
    if let Some(recorded) = recorded {
      self
        .inner
        .submitted
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .push(RunFuture::ready(parent_task_run_id, recorded));
    }
    outcome.map_err(RunError::from)
  }

  /// Wait for every task run submitted in this attempt.
  ///
  /// An interrupt that unwound any of them is raised here, even if the body
  /// never waited on that task itself.
  pub(crate) async fn wait_for_submitted(&self) -> Result<(), RunError> {
    let submitted = self
      .inner
      .submitted
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .clone();

    for outcome in join_all(submitted.iter().map(RunFuture::wait)).await {
      outcome?;
    }
    Ok(())
  }

  /// Final states of every task run and subflow started in this attempt, in
  /// submission order.
  pub(crate) async fn submitted_states(&self) -> Vec<State> {
    let submitted = self
      .inner
      .submitted
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .clone();

    join_all(submitted.iter().map(RunFuture::state)).await
  }
}
