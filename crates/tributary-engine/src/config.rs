//! Engine configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Which task runner flow runs use for their task calls.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskRunnerKind {
  /// Run each task to completion at the call site.
  Sequential,
  /// Spawn each task onto the tokio runtime.
  #[default]
  Concurrent,
}

/// Configuration for the [`Engine`](crate::Engine).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
  /// How long a non-interruptible body may keep running after an interrupt
  /// or timeout, so nested runs can record their own final states.
  pub interrupt_grace_ms: u64,
  pub task_runner: TaskRunnerKind,
}

impl Default for EngineConfig {
  fn default() -> Self {
    Self {
      interrupt_grace_ms: 5000,
      task_runner: TaskRunnerKind::default(),
    }
  }
}

impl EngineConfig {
  pub fn interrupt_grace(&self) -> Duration {
    Duration::from_millis(self.interrupt_grace_ms)
  }

  /// Load a configuration from a JSON file. Missing fields take defaults.
  pub async fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
    let contents = tokio::fs::read_to_string(path).await?;
    Ok(serde_json::from_str(&contents)?)
  }
}

/// Error loading an [`EngineConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
  #[error("failed to read config: {0}")]
  Io(#[from] std::io::Error),

  #[error("invalid config: {0}")]
  Parse(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_missing_fields_take_defaults() {
    let config: EngineConfig = serde_json::from_str(r#"{"task_runner": "sequential"}"#).unwrap();
    assert_eq!(config.task_runner, TaskRunnerKind::Sequential);
    assert_eq!(config.interrupt_grace(), Duration::from_secs(5));
  }

  #[tokio::test]
  async fn test_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("engine.json");
    tokio::fs::write(&path, r#"{"interrupt_grace_ms": 10}"#)
      .await
      .unwrap();

    let config = EngineConfig::from_file(&path).await.unwrap();
    assert_eq!(config.interrupt_grace_ms, 10);
    assert_eq!(config.task_runner, TaskRunnerKind::Concurrent);
  }
}
