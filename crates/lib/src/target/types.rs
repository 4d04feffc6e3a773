use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::builder::BuilderError;
use crate::capability::{CapabilityError, CloudError};
use crate::consts::REFRESH_TIMEOUT_ENV;
use crate::crypto::CryptoError;
use crate::terraform::OutputMap;

/// Default upper bound for one background refresh.
pub const DEFAULT_REFRESH_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Aggregated deployment state of a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TargetState {
  Undeployed,
  Running,
  Shutdown,
  Pending,
  Unknown,
}

impl fmt::Display for TargetState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      TargetState::Undeployed => write!(f, "not deployed"),
      TargetState::Running => write!(f, "running"),
      TargetState::Shutdown => write!(f, "shutdown"),
      TargetState::Pending => write!(f, "pending"),
      TargetState::Unknown => write!(f, "unknown"),
    }
  }
}

/// Reported to resume/suspend callbacks around each instance operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceProgress {
  Before,
  After,
}

/// Background refresh configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshConfig {
  pub timeout: Duration,
}

impl Default for RefreshConfig {
  fn default() -> Self {
    Self {
      timeout: DEFAULT_REFRESH_TIMEOUT,
    }
  }
}

impl RefreshConfig {
  /// Defaults overridden by `CLOUDBUILDER_REFRESH_TIMEOUT_SECS`.
  pub fn from_env() -> Self {
    let mut config = Self::default();
    if let Ok(raw) = std::env::var(REFRESH_TIMEOUT_ENV) {
      match raw.trim().parse::<u64>() {
        Ok(secs) if secs > 0 => config.timeout = Duration::from_secs(secs),
        _ => warn!(var = REFRESH_TIMEOUT_ENV, value = %raw, "ignoring invalid timeout"),
      }
    }
    config
  }
}

/// Persisted form of a target.
///
/// Records whose recipe cannot be resolved are kept verbatim in this form so
/// they survive a load/save cycle.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetRecord {
  pub recipe_name: String,
  pub recipe_iaas: String,

  #[serde(default)]
  pub cookbook_name: String,
  #[serde(default)]
  pub cookbook_version: String,
  #[serde(default, skip_serializing_if = "String::is_empty")]
  pub repo_timestamp: String,

  #[serde(default)]
  pub dependent_targets: Vec<String>,

  #[serde(default)]
  pub recipe: Option<serde_json::Value>,
  #[serde(default)]
  pub provider: Option<serde_json::Value>,
  #[serde(default)]
  pub backend: Option<serde_json::Value>,

  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub output: Option<OutputMap>,

  #[serde(default, skip_serializing_if = "String::is_empty")]
  pub rsa_private_key: String,
  #[serde(default, skip_serializing_if = "String::is_empty")]
  pub rsa_public_key: String,

  #[serde(default, skip_serializing_if = "String::is_empty")]
  pub node_key: String,
  #[serde(default, rename = "nodeID", skip_serializing_if = "String::is_empty")]
  pub node_id: String,
}

/// Cookbook coordinates of a recipe referenced by a disabled record.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DisabledRecipe {
  pub cookbook_name: String,
  pub cookbook_version: String,
  pub recipe_name: String,
}

/// Errors raised by the target context when materializing targets.
#[derive(Debug, Error)]
pub enum ContextError {
  #[error("recipe '{0}' was not found in the active cookbook")]
  RecipeNotFound(String),

  #[error("cloud provider '{0}' is not available")]
  ProviderNotFound(String),

  #[error(transparent)]
  Capability(#[from] CapabilityError),
}

/// Errors raised by targets and the target set.
#[derive(Debug, Error)]
pub enum TargetError {
  #[error(transparent)]
  Builder(#[from] BuilderError),

  #[error(transparent)]
  Capability(#[from] CapabilityError),

  #[error(transparent)]
  Cloud(#[from] CloudError),

  #[error(transparent)]
  Context(#[from] ContextError),

  #[error(transparent)]
  Crypto(#[from] CryptoError),

  /// The managed instance output is not a list of records.
  #[error("managed instance output of target '{0}' is not a list")]
  InvalidInstanceList(String),

  /// A managed instance record is missing a key or has a wrongly typed value.
  #[error("managed instance record {index} is invalid: {message}")]
  InvalidInstanceMetadata { index: usize, message: String },

  #[error("cannot {operation} target '{key}' in state '{state}'")]
  InvalidState {
    operation: &'static str,
    key: String,
    state: TargetState,
  },

  #[error("instance '{0}' has no cloud compute handle")]
  UnmanagedInstance(String),

  #[error("target '{0}' has no cloud provider")]
  NoProvider(String),

  #[error("target '{0}' has no backend")]
  NoBackend(String),

  #[error("the backend configuration for target '{0}' is not valid")]
  InvalidBackend(String),

  #[error("target '{0}' was not found")]
  NotFound(String),

  #[error("dependent target '{dependency}' of target '{target}' was not found")]
  UnresolvedDependency { target: String, dependency: String },

  #[error("no async runtime available to refresh target")]
  NoRuntime,

  #[error("remote refresh timed out after {0:?}")]
  RefreshTimedOut(Duration),

  /// The last background refresh failed.
  #[error("remote refresh failed: {0}")]
  Refresh(Arc<TargetError>),

  #[error("failed to parse target set: {0}")]
  Parse(#[source] serde_json::Error),

  #[error("failed to serialize target set: {0}")]
  Serialize(#[source] serde_json::Error),
}
