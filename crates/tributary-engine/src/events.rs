//! Run events and notifiers for observability.
//!
//! Events are emitted as runs are created and as the store accepts state
//! transitions, so consumers can stream progress, log, or persist elsewhere.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tributary_state::StateType;
use uuid::Uuid;

/// Events emitted during orchestration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RunEvent {
  /// A flow run has entered orchestration.
  FlowRunStarted { flow_run_id: Uuid, flow_name: String },

  /// A task run was created inside a flow run.
  TaskRunCreated {
    task_run_id: Uuid,
    flow_run_id: Uuid,
    task_key: String,
    dynamic_key: String,
  },

  /// The store recorded a new state for a run.
  StateChanged {
    run_id: Uuid,
    state_type: StateType,
    name: String,
    message: Option<String>,
  },
}

/// Trait for receiving run events.
///
/// The engine calls `notify` for each event. Implementations decide what to
/// do with them.
pub trait EventNotifier: Send + Sync {
  fn notify(&self, event: RunEvent);
}

/// A no-op notifier that discards all events.
#[derive(Debug, Clone, Default)]
pub struct NoopNotifier;

impl EventNotifier for NoopNotifier {
  fn notify(&self, _event: RunEvent) {}
}

/// A notifier that sends events to an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
  sender: mpsc::UnboundedSender<RunEvent>,
}

impl ChannelNotifier {
  pub fn new(sender: mpsc::UnboundedSender<RunEvent>) -> Self {
    Self { sender }
  }
}

impl EventNotifier for ChannelNotifier {
  fn notify(&self, event: RunEvent) {
    // The receiver may have been dropped
    let _ = self.sender.send(event);
  }
}
