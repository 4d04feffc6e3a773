//! Low-level driver for the infrastructure tool.
//!
//! The [`Runner`] knows nothing about targets or recipes. It validates a
//! variable set against declared template inputs, sequences the tool's
//! subcommands around a plan artifact and decodes the streamed
//! `output -json` document into an [`OutputMap`].

mod decode;
mod runner;
mod types;

pub use runner::Runner;
pub use types::{DEFAULT_EXEC_TIMEOUT, Input, Output, OutputMap, OutputValue, RunnerConfig, RunnerError};
