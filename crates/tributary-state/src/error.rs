//! Error and interrupt records.

use serde::{Deserialize, Serialize};

/// A captured application error.
///
/// Errors raised by task and flow bodies are recorded by kind and message so
/// they can be stored with a state and reconstructed later.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct ErrorRecord {
  pub kind: String,
  pub message: String,
}

impl ErrorRecord {
  pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
    Self {
      kind: kind.into(),
      message: message.into(),
    }
  }

  /// Capture any error by its display representation.
  pub fn from_error(error: &dyn std::error::Error) -> Self {
    Self::new("Error", error.to_string())
  }
}

/// An abnormal interruption of a run.
///
/// Interrupts are not application errors. A run that observes one is marked
/// `Crashed` and the interrupt is propagated to whoever started the run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Interrupt {
  /// The process was asked to stop (e.g. `SIGINT`, an exit request).
  #[error("execution aborted by {signal}")]
  Aborted { signal: String },

  /// The runtime cancelled the execution cooperatively.
  #[error("execution cancelled by the runtime environment")]
  Cancelled,
}

impl Interrupt {
  pub fn aborted(signal: impl Into<String>) -> Self {
    Self::Aborted {
      signal: signal.into(),
    }
  }

  /// Message recorded on the `Crashed` state caused by this interrupt.
  pub fn crash_message(&self) -> &'static str {
    match self {
      Self::Aborted { .. } => "Execution was aborted by an interrupt signal.",
      Self::Cancelled => "Execution was cancelled by the runtime environment.",
    }
  }

  /// Whether the interrupt can be faithfully raised again after capture.
  ///
  /// A captured process abort cannot be delivered to the process a second
  /// time with its original effect, so it is recorded as unsafe.
  pub fn is_reraise_safe(&self) -> bool {
    matches!(self, Self::Cancelled)
  }
}

/// Error returned by task and flow bodies.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RunError {
  /// An ordinary application error. Recorded as `Failed` and retried per
  /// the run's retry policy.
  #[error("{0}")]
  Application(ErrorRecord),

  /// An abnormal interrupt. Recorded as `Crashed` and propagated.
  #[error(transparent)]
  Interrupted(#[from] Interrupt),
}

impl RunError {
  pub fn application(kind: impl Into<String>, message: impl Into<String>) -> Self {
    Self::Application(ErrorRecord::new(kind, message))
  }
}

impl From<ErrorRecord> for RunError {
  fn from(record: ErrorRecord) -> Self {
    Self::Application(record)
  }
}
