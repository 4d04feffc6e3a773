//! Targets: deployable recipe instances and their registry.
//!
//! A [`Target`] binds a recipe to a cloud provider and a state backend. It
//! knows its deployment outputs and discovers its live compute instances in
//! the background. Targets may depend on other targets, whose outputs are
//! forwarded as inputs when building.
//!
//! A [`TargetSet`] keys targets by their composite key, keeps dependency
//! keys consistent when a target is re-keyed and round-trips through JSON,
//! including records whose recipe is currently unavailable.
//!
//! ```text
//! <recipe>/<iaas>/<key field values...>[/<<dependency key>...]
//! ```

mod context;
mod entity;
mod instance;
mod load;
mod remote;
mod set;
mod store;
mod types;

pub use context::TargetContext;
pub use entity::{InstanceCounts, Target};
pub use instance::{ManagedInstance, UNORDERED};
pub use remote::DeploymentInfo;
pub use set::TargetSet;
pub use store::{TargetStore, TargetStoreError};
pub use types::{
  ContextError, DEFAULT_REFRESH_TIMEOUT, DisabledRecipe, InstanceProgress, RefreshConfig, TargetError, TargetRecord,
  TargetState,
};
