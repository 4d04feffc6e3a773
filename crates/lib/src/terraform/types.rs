use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::consts::EXEC_TIMEOUT_ENV;
use crate::process::CliError;

/// Default upper bound for a single tool invocation.
pub const DEFAULT_EXEC_TIMEOUT: Duration = Duration::from_secs(60 * 60);

/// A declared template input.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Input {
  /// The template supplies a default.
  pub optional: bool,
}

/// Decoded outputs keyed by output name.
pub type OutputMap = BTreeMap<String, Output>;

/// One entry of the tool's `output -json` document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Output {
  #[serde(default)]
  pub sensitive: bool,

  /// Type tag as reported by the tool, e.g. `"string"` or `["list", "string"]`.
  #[serde(rename = "type", default)]
  pub value_type: serde_json::Value,

  pub value: OutputValue,
}

impl Output {
  pub fn new(value: OutputValue) -> Self {
    let value_type = match &value {
      OutputValue::Bool(_) => "bool".into(),
      OutputValue::Number(_) => "number".into(),
      OutputValue::Text(_) => "string".into(),
      OutputValue::Structured(_) => serde_json::Value::Null,
    };
    Self {
      sensitive: false,
      value_type,
      value,
    }
  }
}

/// Dynamically typed output value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OutputValue {
  Bool(bool),
  Number(serde_json::Number),
  Text(String),
  Structured(serde_json::Value),
}

impl OutputValue {
  /// Text form used when the value is passed to another template as a variable.
  ///
  /// Structured values use their compact JSON encoding.
  pub fn to_var_string(&self) -> String {
    match self {
      OutputValue::Bool(b) => b.to_string(),
      OutputValue::Number(n) => n.to_string(),
      OutputValue::Text(s) => s.clone(),
      OutputValue::Structured(v) => v.to_string(),
    }
  }

  pub fn as_str(&self) -> Option<&str> {
    match self {
      OutputValue::Text(s) => Some(s),
      _ => None,
    }
  }
}

/// Runner configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunnerConfig {
  /// Upper bound for one tool invocation. `None` waits indefinitely.
  pub exec_timeout: Option<Duration>,
}

impl Default for RunnerConfig {
  fn default() -> Self {
    Self {
      exec_timeout: Some(DEFAULT_EXEC_TIMEOUT),
    }
  }
}

impl RunnerConfig {
  /// Defaults overridden by `CLOUDBUILDER_EXEC_TIMEOUT_SECS`.
  ///
  /// A value of `0` disables the timeout. Unparseable values are ignored.
  pub fn from_env() -> Self {
    let mut config = Self::default();
    if let Ok(raw) = std::env::var(EXEC_TIMEOUT_ENV) {
      match raw.trim().parse::<u64>() {
        Ok(0) => config.exec_timeout = None,
        Ok(secs) => config.exec_timeout = Some(Duration::from_secs(secs)),
        Err(e) => warn!(var = EXEC_TIMEOUT_ENV, value = %raw, error = %e, "ignoring invalid timeout"),
      }
    }
    config
  }
}

/// Errors raised by the runner.
#[derive(Debug, Error)]
pub enum RunnerError {
  #[error("the following argument is not known by the templates: {0}")]
  UnknownArgument(String),

  #[error("the following required arguments were not provided: {}", .0.join(","))]
  MissingArguments(Vec<String>),

  #[error(transparent)]
  Cli(#[from] CliError),

  /// The output stream could not be decoded. `name` is the failing entry, if known.
  #[error("failed to decode tool output{}: {source}", .name.as_ref().map(|n| format!(" '{n}'")).unwrap_or_default())]
  Decode {
    name: Option<String>,
    #[source]
    source: serde_json::Error,
  },

  #[error("output decoder terminated without a result")]
  DecodeTaskFailed,

  #[error("tool invocation timed out after {0:?}")]
  TimedOut(Duration),

  #[error("io error: {0}")]
  Io(#[from] std::io::Error),
}
