//! Shared types for the capability contracts.

use std::fmt;

use thiserror::Error;

/// Errors raised by configurable objects (recipes, providers, backends).
#[derive(Debug, Error)]
pub enum CapabilityError {
  /// A field name is not part of the input form.
  #[error("'{form}' has no input field named '{field}'")]
  UnknownField { form: String, field: String },

  /// A persisted document does not have the expected shape.
  #[error("invalid document for '{name}': {message}")]
  InvalidDocument { name: String, message: String },

  /// Copying a configurable failed.
  #[error("unable to copy '{name}': {message}")]
  Copy { name: String, message: String },

  /// Creating the tool CLI for a recipe failed.
  #[error("unable to create cli for recipe '{recipe}': {message}")]
  Cli { recipe: String, message: String },

  #[error("failed to serialize document: {0}")]
  Serialize(#[source] serde_json::Error),
}

/// Errors raised by cloud provider operations.
#[derive(Debug, Error)]
pub enum CloudError {
  /// Connecting to the provider failed.
  #[error("unable to connect to cloud provider '{provider}': {message}")]
  Connect { provider: String, message: String },

  /// A compute or storage API call failed.
  #[error("cloud api error: {0}")]
  Api(String),

  /// A compute instance could not be found.
  #[error("compute instance '{0}' was not found")]
  InstanceNotFound(String),
}

/// Observed state of a remote compute instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InstanceState {
  Running,
  Stopped,
  Pending,
  Unknown,
}

impl fmt::Display for InstanceState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      InstanceState::Running => write!(f, "running"),
      InstanceState::Stopped => write!(f, "stopped"),
      InstanceState::Pending => write!(f, "pending"),
      InstanceState::Unknown => write!(f, "unknown"),
    }
  }
}

/// A recipe variable as seen by the runner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Variable {
  pub name: String,
  pub value: Option<String>,
  /// The template declares a default for this variable.
  pub optional: bool,
}
