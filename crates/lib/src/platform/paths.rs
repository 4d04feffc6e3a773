//! Platform directories for target workspaces and the persisted target set.
//!
//! ```text
//! {config_dir}/targets.json               # persisted TargetSet
//! {data_dir}/workspaces/<path_key>/       # per-target terraform working directory
//! ```

use crate::consts::APP_NAME;
use std::path::PathBuf;

/// Directory name for per-target working directories within the data directory.
const WORKSPACES_DIR: &str = "workspaces";

/// File name of the persisted target set within the config directory.
const TARGETS_FILENAME: &str = "targets.json";

/// Returns the user's home directory
#[cfg(windows)]
pub fn home_dir() -> PathBuf {
  std::env::var("USERPROFILE")
    .map(PathBuf::from)
    .unwrap_or_else(|_| std::env::temp_dir())
}

/// Returns the user's home directory
///
/// Falls back to the system temp directory when `HOME` is unset.
#[cfg(not(windows))]
pub fn home_dir() -> PathBuf {
  std::env::var("HOME")
    .map(PathBuf::from)
    .unwrap_or_else(|_| std::env::temp_dir())
}

/// Returns the directory for configuration files for the application
#[cfg(windows)]
pub fn config_dir() -> PathBuf {
  std::env::var("APPDATA")
    .map(PathBuf::from)
    .unwrap_or_else(|_| home_dir())
    .join(APP_NAME)
}

/// Returns the directory for configuration files for the application
#[cfg(not(windows))]
pub fn config_dir() -> PathBuf {
  let config_home = std::env::var("XDG_CONFIG_HOME")
    .map(PathBuf::from)
    .unwrap_or_else(|_| home_dir().join(".config"));
  config_home.join(APP_NAME)
}

/// Returns the directory for data files for the application
#[cfg(windows)]
pub fn data_dir() -> PathBuf {
  std::env::var("LOCALAPPDATA")
    .map(PathBuf::from)
    .unwrap_or_else(|_| home_dir())
    .join(APP_NAME)
}

/// Returns the directory for data files for the application
#[cfg(not(windows))]
pub fn data_dir() -> PathBuf {
  let data_home = std::env::var("XDG_DATA_HOME")
    .map(PathBuf::from)
    .unwrap_or_else(|_| home_dir().join(".local").join("share"));
  data_home.join(APP_NAME)
}

/// Default terraform working directory for a target.
///
/// `path_key` is the target's key field values joined by `/`, so each
/// distinct deployment gets its own state directory. An empty value becomes
/// `_`; values starting with `_` and the `.`/`..` names get a `_` prefix, so
/// distinct keys never share a directory.
pub fn workspace_dir(path_key: &str) -> PathBuf {
  let mut dir = data_dir().join(WORKSPACES_DIR);
  for part in path_key.split('/') {
    dir.push(workspace_component(part));
  }
  dir
}

fn workspace_component(part: &str) -> String {
  if part.is_empty() {
    "_".to_string()
  } else if part.starts_with('_') || part == "." || part == ".." {
    format!("_{part}")
  } else {
    part.to_string()
  }
}

/// Default location of the persisted target set.
pub fn targets_file() -> PathBuf {
  config_dir().join(TARGETS_FILENAME)
}
