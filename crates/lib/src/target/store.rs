//! File persistence for the target set.

use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info};

use crate::platform::paths;

use super::set::TargetSet;
use super::types::TargetError;

#[derive(Debug, Error)]
pub enum TargetStoreError {
  #[error("failed to create target store directory: {0}")]
  CreateDir(#[source] std::io::Error),

  #[error("failed to read target store: {0}")]
  Read(#[source] std::io::Error),

  #[error("failed to write target store: {0}")]
  Write(#[source] std::io::Error),

  #[error(transparent)]
  Target(#[from] TargetError),
}

/// Reads and writes a [`TargetSet`] as a JSON array of target records.
#[derive(Debug, Clone)]
pub struct TargetStore {
  path: PathBuf,
}

impl TargetStore {
  pub fn new(path: impl Into<PathBuf>) -> Self {
    Self { path: path.into() }
  }

  /// Store at the platform's default location.
  pub fn default_store() -> Self {
    Self::new(paths::targets_file())
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  /// Load the persisted targets into `set`.
  ///
  /// A missing or empty file loads an empty set.
  pub fn load(&self, set: &mut TargetSet) -> Result<(), TargetStoreError> {
    let content = match fs::read_to_string(&self.path) {
      Ok(content) => content,
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
        debug!(path = ?self.path, "no persisted targets");
        String::new()
      }
      Err(e) => return Err(TargetStoreError::Read(e)),
    };

    if content.trim().is_empty() {
      set.load_json("[]")?;
    } else {
      set.load_json(&content)?;
    }
    Ok(())
  }

  /// Persist `set` and clear its dirty flag.
  ///
  /// Uses atomic write (write to temp, then rename).
  pub fn save(&self, set: &mut TargetSet) -> Result<(), TargetStoreError> {
    if let Some(parent) = self.path.parent() {
      fs::create_dir_all(parent).map_err(TargetStoreError::CreateDir)?;
    }

    let content = set.to_json()?;
    let mut temp_path = self.path.clone().into_os_string();
    temp_path.push(".tmp");
    let temp_path = PathBuf::from(temp_path);

    fs::write(&temp_path, &content).map_err(TargetStoreError::Write)?;
    fs::rename(&temp_path, &self.path).map_err(TargetStoreError::Write)?;

    set.clear_dirty();
    info!(path = ?self.path, targets = set.len(), "saved targets");
    Ok(())
  }
}
