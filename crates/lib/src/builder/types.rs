use thiserror::Error;

use crate::capability::CapabilityError;
use crate::terraform::RunnerError;

/// Errors raised while sequencing build phases.
#[derive(Debug, Error)]
pub enum BuilderError {
  #[error(transparent)]
  Capability(#[from] CapabilityError),

  #[error(transparent)]
  Runner(#[from] RunnerError),

  /// A required recipe input has neither a value nor a default.
  #[error("recipe '{recipe}' input field '{field}' was not set and does not have a default value")]
  MissingInputValue { recipe: String, field: String },

  #[error("failed to remove local build state: {0}")]
  RemoveState(#[source] std::io::Error),
}
