//! Run states.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::error::{ErrorRecord, Interrupt, RunError};

/// The closed set of state types a run can be in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StateType {
  Pending,
  Scheduled,
  Running,
  Completed,
  Failed,
  Crashed,
  Cancelled,
}

impl StateType {
  /// Terminal states end a run. Only the retry cycle may leave one, and it
  /// does so through `Scheduled`, never from `Completed`.
  pub fn is_terminal(self) -> bool {
    match self {
      Self::Completed | Self::Failed | Self::Crashed | Self::Cancelled => true,
      Self::Pending | Self::Scheduled | Self::Running => false,
    }
  }

  pub fn as_str(self) -> &'static str {
    match self {
      Self::Pending => "PENDING",
      Self::Scheduled => "SCHEDULED",
      Self::Running => "RUNNING",
      Self::Completed => "COMPLETED",
      Self::Failed => "FAILED",
      Self::Crashed => "CRASHED",
      Self::Cancelled => "CANCELLED",
    }
  }

  /// Human-readable name used when a state is created without one.
  pub fn default_name(self) -> &'static str {
    match self {
      Self::Pending => "Pending",
      Self::Scheduled => "Scheduled",
      Self::Running => "Running",
      Self::Completed => "Completed",
      Self::Failed => "Failed",
      Self::Crashed => "Crashed",
      Self::Cancelled => "Cancelled",
    }
  }
}

impl fmt::Display for StateType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.pad(self.as_str())
  }
}

/// Extra information attached to a state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StateDetails {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub flow_run_id: Option<Uuid>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub task_run_id: Option<Uuid>,
  /// When a `Scheduled` run may start.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub scheduled_time: Option<DateTime<Utc>>,
  /// Key of the persisted result, when the result was written to result storage.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub result_key: Option<String>,
}

/// The result payload carried by a state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum StateResult {
  #[default]
  None,
  /// The value returned by a body.
  Value(serde_json::Value),
  /// An application error raised by a body or by parameter validation.
  Error(ErrorRecord),
  /// A captured interrupt. `reraise_safe` is false when the original signal
  /// cannot be delivered again with its original effect.
  Interrupt {
    interrupt: Interrupt,
    reraise_safe: bool,
  },
  /// States a flow returned, kept when they are the reason the flow failed.
  States(Vec<State>),
}

/// Error returned by [`State::result`] for states that did not complete.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ResultError {
  /// The run failed with a recorded application error.
  #[error("{0}")]
  Raised(ErrorRecord),

  /// The run was interrupted.
  #[error("{interrupt}")]
  Interrupted {
    interrupt: Interrupt,
    reraise_safe: bool,
  },

  /// The run did not complete and recorded no error payload.
  #[error("run is in state {state_type}: {message}")]
  NotCompleted {
    state_type: StateType,
    message: String,
  },
}

impl From<ResultError> for RunError {
  fn from(error: ResultError) -> Self {
    match error {
      ResultError::Raised(record) => RunError::Application(record),
      ResultError::Interrupted { interrupt, .. } => RunError::Interrupted(interrupt),
      ResultError::NotCompleted { state_type, message } => RunError::Application(ErrorRecord::new(
        "UnfinishedRun",
        format!("run ended in state {state_type}: {message}"),
      )),
    }
  }
}

/// A single entry in a run's state history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct State {
  #[serde(rename = "type")]
  pub state_type: StateType,
  pub name: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub message: Option<String>,
  pub timestamp: DateTime<Utc>,
  #[serde(default)]
  pub data: StateResult,
  #[serde(default)]
  pub details: StateDetails,
}

impl State {
  pub fn new(state_type: StateType) -> Self {
    Self {
      state_type,
      name: state_type.default_name().to_string(),
      message: None,
      timestamp: Utc::now(),
      data: StateResult::None,
      details: StateDetails::default(),
    }
  }

  pub fn pending() -> Self {
    Self::new(StateType::Pending)
  }

  pub fn scheduled(at: DateTime<Utc>) -> Self {
    let mut state = Self::new(StateType::Scheduled);
    state.details.scheduled_time = Some(at);
    state
  }

  /// The state a run waits in between a failed attempt and its retry.
  pub fn awaiting_retry(at: DateTime<Utc>) -> Self {
    Self::scheduled(at).with_name("AwaitingRetry")
  }

  pub fn running() -> Self {
    Self::new(StateType::Running)
  }

  pub fn completed(value: serde_json::Value) -> Self {
    Self::new(StateType::Completed).with_data(StateResult::Value(value))
  }

  pub fn failed(message: impl Into<String>, data: StateResult) -> Self {
    Self::new(StateType::Failed)
      .with_message(message)
      .with_data(data)
  }

  pub fn crashed(message: impl Into<String>, data: StateResult) -> Self {
    Self::new(StateType::Crashed)
      .with_message(message)
      .with_data(data)
  }

  /// A `Crashed` state recording the given interrupt.
  pub fn crashed_by(interrupt: &Interrupt) -> Self {
    Self::crashed(
      interrupt.crash_message(),
      StateResult::Interrupt {
        interrupt: interrupt.clone(),
        reraise_safe: interrupt.is_reraise_safe(),
      },
    )
  }

  pub fn cancelled(message: impl Into<String>) -> Self {
    Self::new(StateType::Cancelled).with_message(message)
  }

  pub fn with_name(mut self, name: impl Into<String>) -> Self {
    self.name = name.into();
    self
  }

  pub fn with_message(mut self, message: impl Into<String>) -> Self {
    self.message = Some(message.into());
    self
  }

  pub fn with_data(mut self, data: StateResult) -> Self {
    self.data = data;
    self
  }

  pub fn with_details(mut self, details: StateDetails) -> Self {
    self.details = details;
    self
  }

  pub fn is_pending(&self) -> bool {
    self.state_type == StateType::Pending
  }

  pub fn is_scheduled(&self) -> bool {
    self.state_type == StateType::Scheduled
  }

  pub fn is_running(&self) -> bool {
    self.state_type == StateType::Running
  }

  pub fn is_completed(&self) -> bool {
    self.state_type == StateType::Completed
  }

  pub fn is_failed(&self) -> bool {
    self.state_type == StateType::Failed
  }

  pub fn is_crashed(&self) -> bool {
    self.state_type == StateType::Crashed
  }

  pub fn is_cancelled(&self) -> bool {
    self.state_type == StateType::Cancelled
  }

  pub fn is_terminal(&self) -> bool {
    self.state_type.is_terminal()
  }

  /// The id of the run this state belongs to, task run first.
  pub fn run_id(&self) -> Option<Uuid> {
    self.details.task_run_id.or(self.details.flow_run_id)
  }

  /// The payload of the state, without raising on failure.
  pub fn payload(&self) -> &StateResult {
    &self.data
  }

  /// The value the run produced.
  ///
  /// Raises the recorded error for `Failed` and `Crashed` states. Interrupts
  /// that are not safe to re-raise are still returned, with a warning.
  pub fn result(&self) -> Result<serde_json::Value, ResultError> {
    match &self.data {
      StateResult::Error(record) => return Err(ResultError::Raised(record.clone())),
      StateResult::Interrupt {
        interrupt,
        reraise_safe,
      } => {
        if !reraise_safe {
          warn!(
            interrupt = %interrupt,
            "the interrupt recorded on this state is not safe to re-raise"
          );
        }
        return Err(ResultError::Interrupted {
          interrupt: interrupt.clone(),
          reraise_safe: *reraise_safe,
        });
      }
      _ => {}
    }

    if matches!(self.state_type, StateType::Failed | StateType::Crashed) {
      return Err(ResultError::NotCompleted {
        state_type: self.state_type,
        message: self.message.clone().unwrap_or_default(),
      });
    }

    Ok(match &self.data {
      StateResult::Value(value) => value.clone(),
      StateResult::States(states) => serde_json::Value::Array(
        states
          .iter()
          .map(|state| state.result().unwrap_or(serde_json::Value::Null))
          .collect(),
      ),
      _ => serde_json::Value::Null,
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_terminal_state_types() {
    let terminal: Vec<_> = [
      StateType::Pending,
      StateType::Scheduled,
      StateType::Running,
      StateType::Completed,
      StateType::Failed,
      StateType::Crashed,
      StateType::Cancelled,
    ]
    .into_iter()
    .filter(|t| t.is_terminal())
    .collect();

    assert_eq!(
      terminal,
      vec![
        StateType::Completed,
        StateType::Failed,
        StateType::Crashed,
        StateType::Cancelled
      ]
    );
  }

  #[test]
  fn test_completed_result() {
    let state = State::completed(json!(1));
    assert!(state.is_completed());
    assert_eq!(state.result().unwrap(), json!(1));
  }

  #[test]
  fn test_failed_result_raises_recorded_error() {
    let state = State::failed(
      "Task run encountered an exception.",
      StateResult::Error(ErrorRecord::new("ValueError", "test!")),
    );

    match state.result() {
      Err(ResultError::Raised(record)) => assert_eq!(record.message, "test!"),
      other => panic!("unexpected result: {:?}", other),
    }
  }

  #[test]
  fn test_crashed_by_abort_is_flagged_unsafe() {
    let state = State::crashed_by(&Interrupt::aborted("KeyboardInterrupt"));

    assert!(state.is_crashed());
    assert!(state.message.as_deref().unwrap().contains("Execution was aborted"));
    match state.result() {
      Err(ResultError::Interrupted { reraise_safe, .. }) => assert!(!reraise_safe),
      other => panic!("unexpected result: {:?}", other),
    }
  }

  #[test]
  fn test_awaiting_retry_is_named_scheduled_state() {
    let at = Utc::now();
    let state = State::awaiting_retry(at);
    assert!(state.is_scheduled());
    assert_eq!(state.name, "AwaitingRetry");
    assert_eq!(state.details.scheduled_time, Some(at));
  }

  #[test]
  fn test_state_serde_uses_screaming_type() {
    let value = serde_json::to_value(State::running()).unwrap();
    assert_eq!(value["type"], "RUNNING");

    let back: State = serde_json::from_value(value).unwrap();
    assert!(back.is_running());
  }

  #[test]
  fn test_failed_without_payload_is_not_completed() {
    let state = State::new(StateType::Failed).with_message("2/3 states failed.");
    assert!(matches!(
      state.result(),
      Err(ResultError::NotCompleted {
        state_type: StateType::Failed,
        ..
      })
    ));
  }
}
