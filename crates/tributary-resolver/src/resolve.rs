use futures::future::join_all;
use tributary_state::{State, StateType};
use uuid::Uuid;

use crate::future::RunFuture;
use crate::param::{Param, Parameters, Reference};

/// An upstream run that did not complete.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Upstream task run '{run_id}' did not reach a 'COMPLETED' state; found '{state_type}'.")]
pub struct NotReady {
  pub run_id: Uuid,
  pub state_type: StateType,
}

/// The verdict of [`resolve_parameters`].
#[derive(Debug, Clone)]
pub enum Resolution {
  /// Every reference completed; the parameters with references substituted.
  Ready(Parameters),
  /// The first reference, in traversal order, that did not complete.
  NotReady(NotReady),
}

/// Wait on every unquoted reference in `parameters` and in `wait_for`, then
/// substitute their results.
pub async fn resolve_parameters(parameters: &Parameters, wait_for: &[RunFuture]) -> Resolution {
  let mut futures: Vec<&RunFuture> = Vec::new();
  let mut states: Vec<&State> = Vec::new();
  for param in parameters.values() {
    param.visit_references(&mut |reference| match reference {
      Reference::Future(future) => futures.push(future),
      Reference::State(state) => states.push(state),
    });
  }
  futures.extend(wait_for);

  let finished = join_all(futures.iter().map(|future| future.state())).await;

  for (future, state) in futures.iter().zip(&finished) {
    if !state.is_completed() {
      return Resolution::NotReady(NotReady {
        run_id: future.run_id(),
        state_type: state.state_type,
      });
    }
  }

  for state in states {
    if !state.is_completed() {
      return Resolution::NotReady(NotReady {
        run_id: state.run_id().unwrap_or(Uuid::nil()),
        state_type: state.state_type,
      });
    }
  }

  Resolution::Ready(
    parameters
      .iter()
      .map(|(name, param)| (name.clone(), substitute(param)))
      .collect(),
  )
}

fn substitute(param: &Param) -> Param {
  match param {
    Param::Value(_) => param.clone(),
    Param::List(items) => Param::List(items.iter().map(substitute).collect()),
    Param::Set(items) => Param::Set(items.iter().map(substitute).collect()),
    Param::Map(entries) => Param::Map(
      entries
        .iter()
        .map(|(key, item)| (key.clone(), substitute(item)))
        .collect(),
    ),
    // Readiness was checked before substitution, so the outcome is present.
    Param::Future(_) | Param::State(_) => Param::Value(param.to_json()),
    Param::Quote(inner) => (**inner).clone(),
  }
}
