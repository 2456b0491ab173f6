//! Task run orchestration.

use tracing::{info, instrument, warn};
use tributary_resolver::{Parameters, Resolution, RunFuture, resolve_parameters};
use tributary_state::{ErrorRecord, State, StateDetails, StateResult, TaskRun};

use crate::engine::{BodyOutcome, Engine, seconds};
use crate::error::EngineError;
use crate::signal::InterruptSignal;
use crate::task::{Task, TaskCall};

impl Engine {
  /// Drive a created task run to its final state.
  ///
  /// Waits for the upstream runs named in `parameters` and `wait_for`, then
  /// runs attempts of the task body until one completes, the retries are
  /// exhausted, or an interrupt unwinds the run. Errors escaping
  /// orchestration are recorded as `Crashed` the same way as for flow runs.
  #[instrument(
    name = "task_run",
    skip(self, task, task_run, parameters, wait_for, signal),
    fields(
      task_run_id = %task_run.id,
      task = %task.key(),
      dynamic_key = %task_run.dynamic_key,
    )
  )]
  pub async fn orchestrate_task_run(
    &self,
    task: &Task,
    task_run: TaskRun,
    parameters: Parameters,
    wait_for: Vec<RunFuture>,
    interruptible: bool,
    signal: &InterruptSignal,
  ) -> Result<State, EngineError> {
    let task_run_id = task_run.id;
    self
      .guard(
        task_run_id,
        self.run_task(task, task_run, parameters, wait_for, interruptible, signal),
      )
      .await
  }

  async fn run_task(
    &self,
    task: &Task,
    task_run: TaskRun,
    parameters: Parameters,
    wait_for: Vec<RunFuture>,
    interruptible: bool,
    signal: &InterruptSignal,
  ) -> Result<State, EngineError> {
    let task_run_id = task_run.id;
    self
      .wait_for_scheduled_start(&task_run.state, signal)
      .await?;

    let resolution = tokio::select! {
      biased;
      _ = signal.raised() => return Err(EngineError::Interrupted(signal.reason())),
      resolution = resolve_parameters(&parameters, &wait_for) => resolution,
    };
    let parameters = match resolution {
      Resolution::Ready(parameters) => parameters,
      Resolution::NotReady(not_ready) => {
        info!(upstream = %not_ready.run_id, state = %not_ready.state_type, "task_run_not_ready");
        let pending = State::pending()
          .with_name("NotReady")
          .with_message(not_ready.to_string());
        return self.propose(signal, task_run_id, pending).await;
      }
    };

    let mut attempt = 0;
    loop {
      let state = self
        .propose(signal, task_run_id, State::running())
        .await?;
      if !state.is_running() {
        return Ok(state);
      }

      attempt += 1;
      info!(attempt, "task_run_started");

      let scope = signal.child();
      let call = TaskCall {
        task_run: task_run.clone(),
        attempt,
        parameters: parameters.clone(),
        signal: scope.clone(),
      };
      let outcome = self
        .execute_body(task.call(call), &scope, signal, task.timeout(), interruptible)
        .await;

      let proposed = match outcome {
        BodyOutcome::Returned(value) => {
          let result_key = self.persist_result(task_run_id, &value).await?;
          State::completed(value).with_details(StateDetails {
            result_key: Some(result_key),
            ..StateDetails::default()
          })
        }
        BodyOutcome::Raised(record) => {
          warn!(attempt, error = %record, "task_run_raised");
          let failed = State::failed(
            format!("Task run encountered an exception: {record}"),
            StateResult::Error(record),
          );
          self.retry_or_fail(attempt, task.retries(), task.retry_delay(), failed)
        }
        BodyOutcome::TimedOut(timeout) => {
          let message = format!("Task run exceeded timeout of {} seconds", seconds(timeout));
          warn!(attempt, "task_run_timed_out");
          let failed = State::failed(
            message.clone(),
            StateResult::Error(ErrorRecord::new("TimeoutError", message)),
          );
          self.retry_or_fail(attempt, task.retries(), task.retry_delay(), failed)
        }
        BodyOutcome::Interrupted(interrupt) => return Err(EngineError::Interrupted(interrupt)),
        BodyOutcome::Panicked(message) => return Err(EngineError::Panicked(message)),
      };

      let state = self.propose(signal, task_run_id, proposed).await?;
      if !state.is_scheduled() {
        info!(state = %state.state_type, "task_run_finished");
        return Ok(state);
      }
      self.wait_for_scheduled_start(&state, signal).await?;
    }
  }
}
