use std::path::PathBuf;

use async_trait::async_trait;
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::{Error, ResultStore};

/// Filesystem-based result store.
///
/// Each result is stored as a JSON file at `{base_path}/{key}.json`. The base
/// directory is created on first write.
pub struct FsResultStore {
  base_path: PathBuf,
}

impl FsResultStore {
  /// Create a new filesystem store with the given base path.
  pub fn new(base_path: impl Into<PathBuf>) -> Self {
    Self {
      base_path: base_path.into(),
    }
  }

  fn key_to_path(&self, key: &str) -> PathBuf {
    self.base_path.join(format!("{key}.json"))
  }
}

fn not_found_or_io(key: &str, e: std::io::Error) -> Error {
  if e.kind() == std::io::ErrorKind::NotFound {
    Error::NotFound(key.to_string())
  } else {
    Error::Io(e)
  }
}

#[async_trait]
impl ResultStore for FsResultStore {
  async fn persist(&self, key: &str, value: &serde_json::Value) -> Result<(), Error> {
    let path = self.key_to_path(key);

    if let Some(parent) = path.parent() {
      fs::create_dir_all(parent).await?;
    }

    let bytes = serde_json::to_vec(value)?;
    let mut file = fs::File::create(path).await?;
    file.write_all(&bytes).await?;
    file.flush().await?;
    Ok(())
  }

  async fn retrieve(&self, key: &str) -> Result<serde_json::Value, Error> {
    let bytes = fs::read(self.key_to_path(key))
      .await
      .map_err(|e| not_found_or_io(key, e))?;
    Ok(serde_json::from_slice(&bytes)?)
  }
}
