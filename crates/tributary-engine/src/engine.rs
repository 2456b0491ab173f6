//! The engine and the orchestration steps shared by task and flow runs.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use serde_json::{Map, Value};
use tracing::{debug, error, info, instrument, warn};
use tributary_resolver::cast_parameters;
use tributary_results::ResultStore;
use tributary_state::{ErrorRecord, FlowRun, Interrupt, RunError, State, StateResult};
use tributary_store::RunStore;
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::events::{EventNotifier, NoopNotifier, RunEvent};
use crate::flow::Flow;
use crate::registry::FlowLoader;
use crate::retry::RetryDelay;
use crate::runner::{TaskRunner, task_runner_for};
use crate::signal::InterruptSignal;
use crate::timer::{SystemTimer, Timer};

/// How a task or flow body ended.
pub(crate) enum BodyOutcome<T> {
  Returned(T),
  Raised(ErrorRecord),
  TimedOut(Duration),
  Interrupted(Interrupt),
  Panicked(String),
}

/// Drives task and flow runs through their state machines.
///
/// The engine is cheap to clone; clones share the run store, result store,
/// timer, notifier, and task runner.
#[derive(Clone)]
pub struct Engine {
  client: Arc<dyn RunStore>,
  results: Arc<dyn ResultStore>,
  timer: Arc<dyn Timer>,
  notifier: Arc<dyn EventNotifier>,
  task_runner: Arc<dyn TaskRunner>,
  config: EngineConfig,
}

impl Engine {
  /// Create an engine with the default configuration, the system clock, and
  /// no event notifications.
  pub fn new(client: Arc<dyn RunStore>, results: Arc<dyn ResultStore>) -> Self {
    let config = EngineConfig::default();
    Self {
      client,
      results,
      timer: Arc::new(SystemTimer),
      notifier: Arc::new(NoopNotifier),
      task_runner: task_runner_for(config.task_runner),
      config,
    }
  }

  pub fn with_timer(mut self, timer: Arc<dyn Timer>) -> Self {
    self.timer = timer;
    self
  }

  pub fn with_notifier(mut self, notifier: Arc<dyn EventNotifier>) -> Self {
    self.notifier = notifier;
    self
  }

  /// Apply a configuration. This also selects the task runner it names.
  pub fn with_config(mut self, config: EngineConfig) -> Self {
    self.task_runner = task_runner_for(config.task_runner);
    self.config = config;
    self
  }

  pub fn with_task_runner(mut self, task_runner: Arc<dyn TaskRunner>) -> Self {
    self.task_runner = task_runner;
    self
  }

  pub fn client(&self) -> &Arc<dyn RunStore> {
    &self.client
  }

  pub fn results(&self) -> &Arc<dyn ResultStore> {
    &self.results
  }

  pub fn timer(&self) -> &Arc<dyn Timer> {
    &self.timer
  }

  pub fn config(&self) -> &EngineConfig {
    &self.config
  }

  pub(crate) fn task_runner(&self) -> &Arc<dyn TaskRunner> {
    &self.task_runner
  }

  pub(crate) fn notify(&self, event: RunEvent) {
    self.notifier.notify(event);
  }

  fn notify_state(&self, run_id: Uuid, state: &State) {
    debug!(
      run_id = %run_id,
      state = %state.state_type,
      name = %state.name,
      "state_changed"
    );
    self.notify(RunEvent::StateChanged {
      run_id,
      state_type: state.state_type,
      name: state.name.clone(),
      message: state.message.clone(),
    });
  }

  /// Validate and cast the flow run's parameters, then orchestrate it.
  ///
  /// Invalid parameters fail the run before its body executes. Any error
  /// escaping orchestration marks the flow run `Crashed`: interrupts are then
  /// returned as [`EngineError::Interrupted`], other errors are absorbed into
  /// the returned state.
  #[instrument(
    name = "begin_flow_run",
    skip(self, flow, flow_run, parameters, signal),
    fields(
      flow_run_id = %flow_run.id,
      flow = %flow.name(),
    )
  )]
  pub async fn begin_flow_run(
    &self,
    flow: &Flow,
    flow_run: FlowRun,
    parameters: &Map<String, Value>,
    signal: &InterruptSignal,
  ) -> Result<State, EngineError> {
    let flow_run_id = flow_run.id;
    let work = async {
      match cast_parameters(flow.parameters(), parameters) {
        Ok(cast) => self.run_flow(flow, flow_run, cast, false, signal).await,
        Err(error) => {
          warn!(error = %error, "flow_run_invalid_parameters");
          let failed = State::failed(
            "Flow run received invalid parameters.",
            StateResult::Error(ErrorRecord::new("ParameterTypeError", error.to_string())),
          );
          self.propose(signal, flow_run_id, failed).await
        }
      }
    };
    self.guard(flow_run_id, work).await
  }

  /// Load a stored flow run and its flow definition, then begin it with the
  /// parameters stored on the run.
  pub async fn retrieve_flow_then_begin_flow_run(
    &self,
    flow_run_id: Uuid,
    loader: &dyn FlowLoader,
    signal: &InterruptSignal,
  ) -> Result<State, EngineError> {
    let flow_run = self.client.read_flow_run(flow_run_id).await?;
    let flow = loader.load_flow(&flow_run).await?;
    let parameters = flow_run.parameters.clone();
    info!(
      flow_run_id = %flow_run_id,
      flow = %flow.name(),
      "flow_run_retrieved"
    );
    self
      .begin_flow_run(&flow, flow_run, &parameters, signal)
      .await
  }

  /// Propose a state and adopt whatever the store accepts.
  ///
  /// The signal is checked before the store call completes, so an interrupt
  /// raised while proposing wins over the proposal.
  pub(crate) async fn propose(
    &self,
    signal: &InterruptSignal,
    run_id: Uuid,
    state: State,
  ) -> Result<State, EngineError> {
    let accepted = tokio::select! {
      biased;
      _ = signal.raised() => return Err(EngineError::Interrupted(signal.reason())),
      accepted = self.client.propose_state(run_id, state) => accepted?,
    };
    self.notify_state(run_id, &accepted);
    Ok(accepted)
  }

  /// Run orchestration work for one run, recording a `Crashed` state if it
  /// fails.
  pub(crate) async fn guard<F>(&self, run_id: Uuid, work: F) -> Result<State, EngineError>
  where
    F: Future<Output = Result<State, EngineError>>,
  {
    match work.await {
      Ok(state) => Ok(state),
      Err(EngineError::Interrupted(interrupt)) => {
        warn!(run_id = %run_id, interrupt = %interrupt, "run_crashed");
        self
          .record_crash(run_id, State::crashed_by(&interrupt))
          .await;
        Err(EngineError::Interrupted(interrupt))
      }
      Err(error) => {
        error!(run_id = %run_id, error = %error, "run_crashed");
        let crashed = State::crashed(
          format!("Execution was interrupted by an unexpected exception: {error}"),
          StateResult::Error(ErrorRecord::new("EngineError", error.to_string())),
        );
        Ok(self.record_crash(run_id, crashed).await)
      }
    }
  }

  /// Force a crash state past the store's rules. Falls back to the local
  /// state when the store cannot record it.
  async fn record_crash(&self, run_id: Uuid, crashed: State) -> State {
    match self.client.set_state(run_id, crashed.clone()).await {
      Ok(recorded) => {
        self.notify_state(run_id, &recorded);
        recorded
      }
      Err(e) => {
        error!(run_id = %run_id, error = %e, "failed to record crashed state");
        crashed
      }
    }
  }

  /// Block until a `Scheduled` state's start time.
  pub(crate) async fn wait_for_scheduled_start(
    &self,
    state: &State,
    signal: &InterruptSignal,
  ) -> Result<(), EngineError> {
    if !state.is_scheduled() {
      return Ok(());
    }
    let Some(scheduled_time) = state.details.scheduled_time else {
      return Ok(());
    };

    let now = self.timer.now();
    if scheduled_time <= now {
      return Ok(());
    }
    let delay = (scheduled_time - now).to_std().unwrap_or_default();

    info!(
      scheduled_time = %scheduled_time,
      delay_seconds = %seconds(delay),
      "waiting_for_scheduled_start"
    );
    tokio::select! {
      biased;
      _ = signal.raised() => Err(EngineError::Interrupted(signal.reason())),
      _ = self.timer.sleep(delay) => Ok(()),
    }
  }

  /// Run a body under the interrupt signal and an optional timeout.
  ///
  /// `scope` is the signal handed to the body; it is raised on timeout. When
  /// the run is not interruptible the body keeps being polled for the grace
  /// period after an interrupt or timeout, so nested runs can record their
  /// own final states before it is dropped. A panic in the body is caught
  /// and reported as [`BodyOutcome::Panicked`].
  pub(crate) async fn execute_body<T, F>(
    &self,
    body: F,
    scope: &InterruptSignal,
    signal: &InterruptSignal,
    timeout: Option<Duration>,
    interruptible: bool,
  ) -> BodyOutcome<T>
  where
    F: Future<Output = Result<T, RunError>>,
  {
    enum Stop {
      Interrupt,
      Deadline(Duration),
    }

    let mut body = std::pin::pin!(AssertUnwindSafe(body).catch_unwind());
    let deadline = async {
      match timeout {
        Some(timeout) => {
          tokio::time::sleep(timeout).await;
          timeout
        }
        None => std::future::pending().await,
      }
    };

    let stop = tokio::select! {
      biased;
      result = &mut body => {
        return match result {
          Ok(Ok(value)) => BodyOutcome::Returned(value),
          Ok(Err(RunError::Application(record))) => BodyOutcome::Raised(record),
          Ok(Err(RunError::Interrupted(interrupt))) => BodyOutcome::Interrupted(interrupt),
          Err(payload) => {
            let message = panic_message(payload.as_ref());
            error!(panic = %message, "body_panicked");
            BodyOutcome::Panicked(message)
          }
        };
      }
      _ = signal.raised() => Stop::Interrupt,
      timeout = deadline => Stop::Deadline(timeout),
    };

    let outcome = match stop {
      Stop::Interrupt => BodyOutcome::Interrupted(signal.reason()),
      Stop::Deadline(timeout) => {
        scope.cancel();
        BodyOutcome::TimedOut(timeout)
      }
    };

    if !interruptible {
      let grace = self.config.interrupt_grace();
      if tokio::time::timeout(grace, &mut body).await.is_err() {
        debug!(grace_ms = grace.as_millis() as u64, "body did not unwind within grace period");
      }
    }

    outcome
  }

  /// Turn a failed attempt into a retry when the policy allows one.
  pub(crate) fn retry_or_fail(
    &self,
    attempt: u32,
    retries: u32,
    retry_delay: &RetryDelay,
    failed: State,
  ) -> State {
    if attempt > retries {
      return failed;
    }

    let delay = retry_delay.delay(attempt);
    let scheduled_time = chrono::Duration::from_std(delay)
      .ok()
      .and_then(|delay| self.timer.now().checked_add_signed(delay));
    let Some(scheduled_time) = scheduled_time else {
      warn!(
        attempt,
        delay_seconds = %seconds(delay),
        "retry_delay_out_of_range"
      );
      return failed;
    };
    info!(
      attempt,
      retries,
      delay_seconds = %seconds(delay),
      reason = failed.message.as_deref().unwrap_or_default(),
      "scheduling_retry"
    );
    State::awaiting_retry(scheduled_time).with_message(format!(
      "Retry {attempt}/{retries} will start in {} seconds",
      seconds(delay)
    ))
  }

  /// Persist a run's result, keyed by the run id.
  pub(crate) async fn persist_result(&self, run_id: Uuid, value: &Value) -> Result<String, EngineError> {
    let key = run_id.to_string();
    self.results.persist(&key, value).await?;
    Ok(key)
  }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
  if let Some(message) = payload.downcast_ref::<&str>() {
    message.to_string()
  } else if let Some(message) = payload.downcast_ref::<String>() {
    message.clone()
  } else {
    "unknown panic payload".to_string()
  }
}

/// Seconds as shown in state messages: `5`, `0.25`.
pub(crate) fn seconds(duration: Duration) -> String {
  duration.as_secs_f64().to_string()
}
