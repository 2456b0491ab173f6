//! Tributary Results
//!
//! This crate provides result storage for tributary. Values returned by task
//! and flow bodies are persisted under a result key; the key is recorded on
//! the run's final state so the value can be retrieved after the process
//! that produced it is gone. The engine keys results by run id.
//!
//! The [`ResultStore`] trait is the backend layer. Implementations decide
//! where the JSON payload lives (memory, filesystem).

mod fs;
mod memory;

pub use fs::FsResultStore;
pub use memory::MemoryResultStore;

use async_trait::async_trait;

/// Error type for result storage operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
  /// No result is stored under the key.
  #[error("result not found: {0}")]
  NotFound(String),

  /// I/O error while reading or writing a result.
  #[error("io error: {0}")]
  Io(#[from] std::io::Error),

  /// The result could not be encoded or decoded.
  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}

/// Result storage trait.
#[async_trait]
pub trait ResultStore: Send + Sync {
  /// Store a value under the given key, replacing any previous value.
  async fn persist(&self, key: &str, value: &serde_json::Value) -> Result<(), Error>;

  /// Retrieve a value by key.
  async fn retrieve(&self, key: &str) -> Result<serde_json::Value, Error>;
}
