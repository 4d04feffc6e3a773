//! cloudbuilder-lib: target orchestration core for cloudbuilder
//!
//! This crate drives infrastructure-as-code deployments of recipes:
//! - `Target`: a recipe bound to a cloud provider and state backend
//! - `TargetSet`: the dependency aware registry of targets
//! - `Builder`: sequences the external tool's phases for one target
//! - `Runner`: invokes the tool, validates inputs and decodes its outputs

pub mod builder;
pub mod capability;
pub mod consts;
pub mod crypto;
pub mod platform;
pub mod process;
pub mod target;
pub mod terraform;
pub mod util;
