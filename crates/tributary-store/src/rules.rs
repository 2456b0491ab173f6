//! Orchestration rules applied by `propose_state`.

use tributary_state::State;
use uuid::Uuid;

/// Decide whether a proposed state may follow the current one.
///
/// Returns `None` when the proposal is rejected, in which case the store
/// answers with the current state. A terminal state may only be followed by
/// another terminal state; the retry cycle never passes through a terminal
/// state (it goes `Running -> Scheduled`).
pub fn accept_proposal(current: &State, proposed: State) -> Option<State> {
  if current.is_terminal() && !proposed.is_terminal() {
    return None;
  }
  Some(proposed)
}

/// The run a state is being written for.
#[derive(Debug, Clone, Copy)]
pub(crate) enum RunOwner {
  Flow(Uuid),
  Task { id: Uuid, flow_run_id: Uuid },
}

impl RunOwner {
  /// Point the state's details at its run.
  pub(crate) fn stamp(self, mut state: State) -> State {
    match self {
      Self::Flow(id) => {
        state.details.flow_run_id = Some(id);
      }
      Self::Task { id, flow_run_id } => {
        state.details.task_run_id = Some(id);
        state.details.flow_run_id = Some(flow_run_id);
      }
    }
    state
  }
}
