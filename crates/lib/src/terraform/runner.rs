//! Drives single invocations of the infrastructure tool.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info};

use crate::consts::{APPLY_COMPLETE_MARKER, TF_PLAN_FILENAME, TF_VAR_PREFIX};
use crate::process::{OutputFilter, ToolCli};

use super::decode::spawn_decoder;
use super::types::{Input, OutputMap, RunnerConfig, RunnerError};

/// Capacity of the in-memory pipe between the tool's stdout and the decoder.
const OUTPUT_PIPE_CAPACITY: usize = 64 * 1024;

/// Runs the tool against one template directory.
///
/// The runner validates variables against the declared template inputs,
/// keeps the plan artifact in the CLI's working directory and decodes the
/// tool's machine readable outputs.
pub struct Runner {
  cli: Arc<dyn ToolCli>,
  template_path: PathBuf,
  plugin_path: Option<PathBuf>,
  inputs: BTreeMap<String, Input>,
  env: BTreeMap<String, String>,
  backend: BTreeMap<String, String>,
  config: RunnerConfig,
}

impl Runner {
  pub fn new(
    cli: Arc<dyn ToolCli>,
    template_path: impl Into<PathBuf>,
    plugin_path: Option<PathBuf>,
    inputs: BTreeMap<String, Input>,
    config: RunnerConfig,
  ) -> Self {
    Self {
      cli,
      template_path: template_path.into(),
      plugin_path,
      inputs,
      env: BTreeMap::new(),
      backend: BTreeMap::new(),
      config,
    }
  }

  pub fn working_directory(&self) -> &Path {
    self.cli.working_directory()
  }

  /// Location of the plan artifact.
  pub fn plan_path(&self) -> PathBuf {
    self.working_directory().join(TF_PLAN_FILENAME)
  }

  /// Replace the environment passed to every invocation.
  pub fn set_env(&mut self, env: BTreeMap<String, String>) {
    self.env = env;
  }

  /// Layer variables on top of the current environment.
  pub fn add_to_env(&mut self, env: BTreeMap<String, String>) {
    self.env.extend(env);
  }

  pub fn env(&self) -> &BTreeMap<String, String> {
    &self.env
  }

  /// Set the `-backend-config` pairs used by [`Runner::init`].
  pub fn set_backend(&mut self, backend: BTreeMap<String, String>) {
    self.backend = backend;
  }

  pub async fn init(&self) -> Result<(), RunnerError> {
    let mut args = vec![self.chdir_arg(), "init".to_string()];
    if let Some(plugin_path) = &self.plugin_path {
      args.push(format!("-plugin-dir={}", plugin_path.display()));
    }
    for (key, value) in &self.backend {
      args.push(format!("-backend-config={key}={value}"));
    }

    info!(template = ?self.template_path, "initializing template");
    self.run(args).await
  }

  /// Write a plan artifact for `vars`.
  pub async fn plan(&self, vars: &BTreeMap<String, String>) -> Result<(), RunnerError> {
    let var_args = self.prepare_arg_list(vars)?;

    let mut args = vec![
      self.chdir_arg(),
      "plan".to_string(),
      "-input=false".to_string(),
      format!("-out={}", self.plan_path().display()),
    ];
    args.extend(var_args);

    info!(template = ?self.template_path, "planning");
    self.run(args).await
  }

  /// Apply the plan artifact, planning first when none exists, and return the outputs.
  ///
  /// The artifact is removed whatever the outcome. Displayed output is cut off
  /// after the completion marker so resource attributes are not echoed.
  pub async fn apply(&self, vars: &BTreeMap<String, String>) -> Result<OutputMap, RunnerError> {
    let plan_path = self.plan_path();

    let result: Result<(), RunnerError> = async {
      if !tokio::fs::try_exists(&plan_path).await? {
        debug!("no plan artifact, planning before apply");
        self.plan(vars).await?;
      }
      self.cli.apply_filter(OutputFilter::exclude_after(APPLY_COMPLETE_MARKER));

      info!(template = ?self.template_path, "applying plan");
      self
        .run(vec![
          self.chdir_arg(),
          "apply".to_string(),
          plan_path.display().to_string(),
        ])
        .await
    }
    .await;

    let removed = self.remove_plan().await;
    result?;
    removed?;

    self.get_output().await
  }

  /// Run `output -json` and decode the streamed document.
  pub async fn get_output(&self) -> Result<OutputMap, RunnerError> {
    let (writer, reader) = tokio::io::duplex(OUTPUT_PIPE_CAPACITY);

    self.cli.apply_filter(OutputFilter::black_hole());
    self.cli.pipe_output(writer);
    let decoded = spawn_decoder(reader);

    self.run(vec!["output".to_string(), "-json".to_string()]).await?;

    let outputs = decoded.await.map_err(|_| RunnerError::DecodeTaskFailed)??;
    debug!(count = outputs.len(), "decoded outputs");
    Ok(outputs)
  }

  /// Mark resources for recreation, stopping at the first failure.
  pub async fn taint(&self, resources: &[String]) -> Result<(), RunnerError> {
    self.remove_plan().await?;

    for resource in resources {
      info!(resource = %resource, "tainting resource");
      self
        .run(vec![self.chdir_arg(), "taint".to_string(), resource.clone()])
        .await?;
    }
    Ok(())
  }

  pub async fn destroy(&self) -> Result<(), RunnerError> {
    self.remove_plan().await?;

    info!(template = ?self.template_path, "destroying deployment");
    self
      .run(vec![self.chdir_arg(), "destroy".to_string(), "-auto-approve".to_string()])
      .await
  }

  /// Validate `vars` against the declared inputs and render `-var` flags.
  ///
  /// Undeclared names fail immediately. Required inputs that are neither
  /// supplied nor exported as `TF_VAR_<name>` are reported together.
  pub fn prepare_arg_list(&self, vars: &BTreeMap<String, String>) -> Result<Vec<String>, RunnerError> {
    if let Some(unknown) = vars.keys().find(|name| !self.inputs.contains_key(*name)) {
      return Err(RunnerError::UnknownArgument(unknown.clone()));
    }

    let missing: Vec<String> = self
      .inputs
      .iter()
      .filter(|(name, input)| {
        !input.optional && !vars.contains_key(*name) && !self.env.contains_key(&format!("{TF_VAR_PREFIX}{name}"))
      })
      .map(|(name, _)| name.clone())
      .collect();
    if !missing.is_empty() {
      return Err(RunnerError::MissingArguments(missing));
    }

    let mut args = Vec::with_capacity(vars.len() * 2);
    for (name, value) in vars {
      args.push("-var".to_string());
      args.push(format!("{name}={value}"));
    }
    Ok(args)
  }

  fn chdir_arg(&self) -> String {
    format!("-chdir={}", self.template_path.display())
  }

  async fn remove_plan(&self) -> Result<(), RunnerError> {
    match tokio::fs::remove_file(self.plan_path()).await {
      Ok(()) => {
        debug!("removed plan artifact");
        Ok(())
      }
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
      Err(e) => Err(RunnerError::Io(e)),
    }
  }

  async fn run(&self, args: Vec<String>) -> Result<(), RunnerError> {
    // Values of -var flags may be sensitive; only the shape is logged.
    let subcommand = args.iter().find(|a| !a.starts_with('-')).cloned().unwrap_or_default();
    debug!(subcommand = %subcommand, arg_count = args.len(), "invoking tool");

    let invocation = self.cli.run_with_env(&args, &self.env);
    match self.config.exec_timeout {
      Some(limit) => tokio::time::timeout(limit, invocation)
        .await
        .map_err(|_| RunnerError::TimedOut(limit))??,
      None => invocation.await?,
    }
    Ok(())
  }
}
