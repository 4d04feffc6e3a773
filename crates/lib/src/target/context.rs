use super::entity::Target;
use super::types::ContextError;

/// Configuration context that materializes fresh targets.
///
/// Implemented by the configuration layer that knows the active cookbook and
/// the configured providers and backends.
pub trait TargetContext: Send + Sync {
  /// Create a target for `recipe_key` (`<cookbook>:<recipe>`) on `recipe_iaas`.
  ///
  /// Fails when the recipe is not part of the active cookbook.
  fn new_target(&self, recipe_key: &str, recipe_iaas: &str) -> Result<Target, ContextError>;
}
