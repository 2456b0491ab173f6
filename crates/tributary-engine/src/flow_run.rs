//! Flow run orchestration.

use serde_json::Value;
use tracing::{info, instrument, warn};
use tributary_resolver::{Param, Parameters};
use tributary_state::{ErrorRecord, FlowRun, RunError, State, StateDetails, StateResult};
use uuid::Uuid;

use crate::context::{DynamicKeys, FlowRunContext};
use crate::engine::{BodyOutcome, Engine, seconds};
use crate::error::EngineError;
use crate::events::RunEvent;
use crate::flow::Flow;
use crate::signal::InterruptSignal;

impl Engine {
  /// Drive a created flow run with already cast parameters.
  ///
  /// [`begin_flow_run`](Engine::begin_flow_run) is the usual way in; this
  /// skips parameter casting and lets the caller pick interruptibility.
  #[instrument(
    name = "flow_run",
    skip(self, flow, flow_run, parameters, signal),
    fields(
      flow_run_id = %flow_run.id,
      flow = %flow.name(),
    )
  )]
  pub async fn orchestrate_flow_run(
    &self,
    flow: &Flow,
    flow_run: FlowRun,
    parameters: Parameters,
    interruptible: bool,
    signal: &InterruptSignal,
  ) -> Result<State, EngineError> {
    let flow_run_id = flow_run.id;
    self
      .guard(
        flow_run_id,
        self.run_flow(flow, flow_run, parameters, interruptible, signal),
      )
      .await
  }

  pub(crate) async fn run_flow(
    &self,
    flow: &Flow,
    flow_run: FlowRun,
    parameters: Parameters,
    interruptible: bool,
    signal: &InterruptSignal,
  ) -> Result<State, EngineError> {
    let flow_run_id = flow_run.id;
    self.notify(RunEvent::FlowRunStarted {
      flow_run_id,
      flow_name: flow.name().to_string(),
    });

    // Shared by every attempt so task runs stay unique within the flow run.
    let dynamic_keys = DynamicKeys::default();

    self
      .wait_for_scheduled_start(&flow_run.state, signal)
      .await?;

    let mut attempt = 0;
    loop {
      let state = self
        .propose(signal, flow_run_id, State::running())
        .await?;
      if !state.is_running() {
        return Ok(state);
      }

      attempt += 1;
      info!(attempt, "flow_run_started");

      let scope = signal.child();
      let context = FlowRunContext::new(
        self.clone(),
        flow_run.clone(),
        dynamic_keys.clone(),
        scope.clone(),
        interruptible,
      );
      let returned = flow.call(context.clone(), parameters.clone());
      let attempt_context = context.clone();
      let body = async move {
        match returned.await {
          Err(RunError::Interrupted(interrupt)) => Err(RunError::Interrupted(interrupt)),
          returned => {
            context.wait_for_submitted().await?;
            returned
          }
        }
      };

      let outcome = self
        .execute_body(body, &scope, signal, flow.timeout(), interruptible)
        .await;

      let proposed = match outcome {
        BodyOutcome::Returned(returned) => {
          self
            .finish_flow(flow_run_id, &returned, &attempt_context)
            .await?
        }
        BodyOutcome::Raised(record) => {
          warn!(attempt, error = %record, "flow_run_raised");
          State::failed(
            format!("Flow run encountered an exception: {record}"),
            StateResult::Error(record),
          )
        }
        BodyOutcome::TimedOut(timeout) => {
          warn!(attempt, "flow_run_timed_out");
          let message = format!("Flow run exceeded timeout of {} seconds", seconds(timeout));
          State::failed(
            message.clone(),
            StateResult::Error(ErrorRecord::new("TimeoutError", message)),
          )
        }
        BodyOutcome::Interrupted(interrupt) => return Err(EngineError::Interrupted(interrupt)),
        BodyOutcome::Panicked(message) => return Err(EngineError::Panicked(message)),
      };
      let proposed = if proposed.is_failed() {
        self.retry_or_fail(attempt, flow.retries(), flow.retry_delay(), proposed)
      } else {
        proposed
      };

      let state = self.propose(signal, flow_run_id, proposed).await?;
      if !state.is_scheduled() {
        info!(state = %state.state_type, "flow_run_finished");
        return Ok(state);
      }
      self.wait_for_scheduled_start(&state, signal).await?;
    }
  }

  /// The final state for a flow body that returned normally.
  ///
  /// Failed or crashed run states found in the returned value fail the flow
  /// run. A body that returns `null` is judged by every run it started
  /// instead. Otherwise the value is persisted and the run completes.
  async fn finish_flow(
    &self,
    flow_run_id: Uuid,
    returned: &Param,
    context: &FlowRunContext,
  ) -> Result<State, EngineError> {
    let states = match returned {
      Param::Value(Value::Null) => context.submitted_states().await,
      returned => returned.collect_states(),
    };
    let failed = states
      .iter()
      .filter(|state| state.is_failed() || state.is_crashed())
      .count();

    if failed > 0 {
      return Ok(State::failed(
        format!("{failed}/{} states failed.", states.len()),
        StateResult::States(states),
      ));
    }

    let value = returned.to_json();
    let result_key = self.persist_result(flow_run_id, &value).await?;
    Ok(State::completed(value).with_details(StateDetails {
      result_key: Some(result_key),
      ..StateDetails::default()
    }))
  }
}
