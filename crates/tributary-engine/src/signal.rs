//! Interrupt signals.
//!
//! An [`InterruptSignal`] is a cancellation token that remembers why it was
//! raised. Orchestrators check it at their suspension points: the scheduled
//! start wait, the body execution boundary, and every state proposal.
//!
//! Signals form a tree. Raising a signal raises all of its children; raising
//! a child (as a timeout does for the scope of one body) leaves the parent
//! untouched.

use std::sync::{Arc, OnceLock};

use tokio_util::sync::CancellationToken;
use tributary_state::Interrupt;

#[derive(Debug, Clone, Default)]
pub struct InterruptSignal {
  token: CancellationToken,
  reason: Arc<OnceLock<Interrupt>>,
  parent: Option<Arc<InterruptSignal>>,
}

impl InterruptSignal {
  pub fn new() -> Self {
    Self::default()
  }

  /// A signal raised whenever this one is, and independently raisable.
  pub fn child(&self) -> Self {
    Self {
      token: self.token.child_token(),
      reason: Arc::new(OnceLock::new()),
      parent: Some(Arc::new(self.clone())),
    }
  }

  /// Raise the signal. The first reason given wins.
  pub fn raise(&self, interrupt: Interrupt) {
    let _ = self.reason.set(interrupt);
    self.token.cancel();
  }

  /// Raise the signal as a cooperative cancellation.
  pub fn cancel(&self) {
    self.raise(Interrupt::Cancelled);
  }

  pub fn is_raised(&self) -> bool {
    self.token.is_cancelled()
  }

  /// Completes once the signal, or any ancestor, is raised.
  pub async fn raised(&self) {
    self.token.cancelled().await;
  }

  /// Why the signal was raised, looking through ancestors.
  ///
  /// Defaults to [`Interrupt::Cancelled`] for a signal that has not been
  /// raised with a reason.
  pub fn reason(&self) -> Interrupt {
    self.raised_reason().unwrap_or(Interrupt::Cancelled)
  }

  fn raised_reason(&self) -> Option<Interrupt> {
    if let Some(reason) = self.reason.get() {
      return Some(reason.clone());
    }
    self
      .parent
      .as_ref()
      .filter(|parent| parent.is_raised())
      .and_then(|parent| parent.raised_reason())
  }
}
