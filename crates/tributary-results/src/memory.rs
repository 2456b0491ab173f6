use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::{Error, ResultStore};

/// In-memory result store.
#[derive(Default)]
pub struct MemoryResultStore {
  values: Mutex<HashMap<String, serde_json::Value>>,
}

impl MemoryResultStore {
  pub fn new() -> Self {
    Self::default()
  }

  /// Number of stored results.
  pub fn len(&self) -> usize {
    self.values.lock().map(|values| values.len()).unwrap_or(0)
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

fn poisoned() -> Error {
  Error::Io(std::io::Error::other("result store lock poisoned"))
}

#[async_trait]
impl ResultStore for MemoryResultStore {
  async fn persist(&self, key: &str, value: &serde_json::Value) -> Result<(), Error> {
    self
      .values
      .lock()
      .map_err(|_| poisoned())?
      .insert(key.to_string(), value.clone());
    Ok(())
  }

  async fn retrieve(&self, key: &str) -> Result<serde_json::Value, Error> {
    self
      .values
      .lock()
      .map_err(|_| poisoned())?
      .get(key)
      .cloned()
      .ok_or_else(|| Error::NotFound(key.to_string()))
  }
}
