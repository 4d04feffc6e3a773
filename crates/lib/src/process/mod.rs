//! External tool CLI wrapper.
//!
//! [`ToolCli`] is the seam between the runner and the process that executes
//! the infrastructure tool. [`ProcessCli`] spawns the real executable; tests
//! substitute an in-memory fake.

mod command;
mod filter;

use std::collections::BTreeMap;
use std::path::Path;

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::DuplexStream;

pub use command::{OutputLine, ProcessCli};
pub use filter::OutputFilter;

/// Errors raised while running the external tool.
#[derive(Debug, Error)]
pub enum CliError {
  #[error("failed to spawn '{program}': {source}")]
  Spawn {
    program: String,
    #[source]
    source: std::io::Error,
  },

  /// The tool exited unsuccessfully.
  #[error("'{command}' failed with exit code {code:?}: {stderr}")]
  Failed {
    command: String,
    code: Option<i32>,
    stderr: String,
  },

  #[error("io error: {0}")]
  Io(#[from] std::io::Error),
}

/// A command line tool bound to one working directory.
#[async_trait]
pub trait ToolCli: Send + Sync {
  fn working_directory(&self) -> &Path;

  /// Run the tool with `args` and additional environment variables.
  ///
  /// Returns once the process has exited and all of its output was consumed.
  async fn run_with_env(&self, args: &[String], env: &BTreeMap<String, String>) -> Result<(), CliError>;

  /// Copy the raw stdout of the next invocation into `writer`.
  ///
  /// The writer is dropped when that invocation ends, signalling end of
  /// stream to the reading half.
  fn pipe_output(&self, writer: DuplexStream);

  /// Filter the displayed stdout of the next invocation.
  fn apply_filter(&self, filter: OutputFilter);
}
