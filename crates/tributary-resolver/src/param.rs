use std::collections::BTreeMap;

use serde_json::Value;
use tributary_state::State;

use crate::future::RunFuture;

/// Named parameters of a task or flow call.
pub type Parameters = BTreeMap<String, Param>;

/// Build [`Parameters`] from name/value pairs.
pub fn parameters<K, V>(entries: impl IntoIterator<Item = (K, V)>) -> Parameters
where
  K: Into<String>,
  V: Into<Param>,
{
  entries
    .into_iter()
    .map(|(name, value)| (name.into(), value.into()))
    .collect()
}

/// A node in a parameter tree.
#[derive(Debug, Clone)]
pub enum Param {
  /// A plain JSON value. Never inspected for references.
  Value(Value),
  List(Vec<Param>),
  /// An unordered collection. Resolved like a list; order is kept as given.
  Set(Vec<Param>),
  Map(BTreeMap<String, Param>),
  /// A reference to another run's eventual result.
  Future(RunFuture),
  /// A captured state, resolved to its result like a finished future.
  State(State),
  /// A subtree passed through verbatim: not waited on, not substituted.
  Quote(Box<Param>),
}

impl Param {
  /// Wrap a subtree so the resolver passes it through unresolved.
  pub fn quote(inner: impl Into<Param>) -> Self {
    Self::Quote(Box::new(inner.into()))
  }

  pub fn as_value(&self) -> Option<&Value> {
    match self {
      Self::Value(value) => Some(value),
      _ => None,
    }
  }

  /// Visit every future and state that is not inside a quoted subtree.
  pub fn visit_references<'a>(&'a self, visit: &mut impl FnMut(Reference<'a>)) {
    match self {
      Self::Value(_) | Self::Quote(_) => {}
      Self::List(items) | Self::Set(items) => {
        for item in items {
          item.visit_references(visit);
        }
      }
      Self::Map(entries) => {
        for item in entries.values() {
          item.visit_references(visit);
        }
      }
      Self::Future(future) => visit(Reference::Future(future)),
      Self::State(state) => visit(Reference::State(state)),
    }
  }

  /// The final states referenced by this tree, in traversal order.
  ///
  /// Futures that have not reported an outcome yet are skipped. Interrupted
  /// futures count as `Crashed`.
  pub fn collect_states(&self) -> Vec<State> {
    let mut states = Vec::new();
    self.visit_references(&mut |reference| match reference {
      Reference::Future(future) => match future.outcome() {
        Some(Ok(state)) => states.push(state),
        Some(Err(interrupt)) => states.push(State::crashed_by(&interrupt)),
        None => {}
      },
      Reference::State(state) => states.push(state.clone()),
    });
    states
  }

  /// Convert to plain JSON, replacing futures and states by their results.
  ///
  /// Failed, crashed, or unfinished references become `null`.
  pub fn to_json(&self) -> Value {
    match self {
      Self::Value(value) => value.clone(),
      Self::List(items) | Self::Set(items) => Value::Array(items.iter().map(Param::to_json).collect()),
      Self::Map(entries) => Value::Object(
        entries
          .iter()
          .map(|(key, item)| (key.clone(), item.to_json()))
          .collect(),
      ),
      Self::Future(future) => match future.outcome() {
        Some(Ok(state)) => state.result().unwrap_or(Value::Null),
        _ => Value::Null,
      },
      Self::State(state) => state.result().unwrap_or(Value::Null),
      Self::Quote(inner) => inner.to_json(),
    }
  }
}

/// A reference found while walking a parameter tree.
#[derive(Debug, Clone, Copy)]
pub enum Reference<'a> {
  Future(&'a RunFuture),
  State(&'a State),
}

impl From<Value> for Param {
  fn from(value: Value) -> Self {
    Self::Value(value)
  }
}

impl From<RunFuture> for Param {
  fn from(future: RunFuture) -> Self {
    Self::Future(future)
  }
}

impl From<State> for Param {
  fn from(state: State) -> Self {
    Self::State(state)
  }
}

impl From<Vec<Param>> for Param {
  fn from(items: Vec<Param>) -> Self {
    Self::List(items)
  }
}

impl From<BTreeMap<String, Param>> for Param {
  fn from(entries: BTreeMap<String, Param>) -> Self {
    Self::Map(entries)
  }
}
