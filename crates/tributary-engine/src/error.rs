use tributary_state::{ErrorRecord, Interrupt, RunError};

/// Errors returned by the engine.
///
/// Application errors raised by task and flow bodies never appear here; they
/// are recorded on the run as `Failed` states. `Interrupted` is the only
/// variant an orchestrator returns after the run it drives has been marked
/// `Crashed`.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
  #[error("run store error: {0}")]
  Store(#[from] tributary_store::Error),

  #[error("result store error: {0}")]
  Results(#[from] tributary_results::Error),

  /// An interrupt that unwound the run. The caller must propagate it.
  #[error(transparent)]
  Interrupted(#[from] Interrupt),

  /// A task or flow body panicked.
  #[error("body panicked: {0}")]
  Panicked(String),

  #[error("flow not found: {0}")]
  FlowNotFound(String),
}

impl EngineError {
  pub fn interrupt(&self) -> Option<&Interrupt> {
    match self {
      Self::Interrupted(interrupt) => Some(interrupt),
      _ => None,
    }
  }
}

impl From<EngineError> for RunError {
  fn from(error: EngineError) -> Self {
    match error {
      EngineError::Interrupted(interrupt) => RunError::Interrupted(interrupt),
      other => RunError::Application(ErrorRecord::new("EngineError", other.to_string())),
    }
  }
}
