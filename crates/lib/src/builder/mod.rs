//! Per-target build orchestration.
//!
//! A [`Builder`] is bound to one recipe, provider and backend and owns one
//! [`Runner`]. It prepares the variables and environment for each phase and
//! sequences the tool's subcommands:
//!
//! ```text
//! initialize ─► show_launch_plan ─► launch (plan ─► apply ─► output)
//!                set_rebuild_*  (taint)        delete (destroy)
//! ```

mod types;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use serde::Deserialize;
use tracing::{debug, info};

use crate::capability::{CloudBackend, CloudProvider, Recipe};
use crate::consts::{TF_DATA_DIR_ENV, TF_DATA_DIR_NAME, TF_STATE_FILENAME, TF_VAR_PREFIX};
use crate::terraform::{Input, OutputMap, Runner, RunnerConfig};

pub use types::BuilderError;

/// Local state marker written by `init`, reduced to the fields we inspect.
#[derive(Debug, Default, Deserialize)]
struct LocalState {
  #[serde(default)]
  backend: LocalBackend,
}

#[derive(Debug, Default, Deserialize)]
struct LocalBackend {
  #[serde(default)]
  config: LocalBackendConfig,
}

#[derive(Debug, Default, Deserialize)]
struct LocalBackendConfig {
  #[serde(default)]
  path: String,
}

pub struct Builder {
  recipe: Box<dyn Recipe>,
  provider: Arc<dyn CloudProvider>,
  backend: Box<dyn CloudBackend>,
  additional_inputs: BTreeMap<String, String>,
  runner: Runner,
  output: Option<OutputMap>,
}

impl Builder {
  /// Bind a builder to copies of `recipe` and `backend`.
  ///
  /// `path_key` selects the recipe's working directory. `additional_inputs`
  /// are exported to the tool as `TF_VAR_<name>` and take the place of recipe
  /// inputs the user did not set.
  pub fn new(
    path_key: &str,
    recipe: &dyn Recipe,
    provider: Arc<dyn CloudProvider>,
    backend: &dyn CloudBackend,
    additional_inputs: BTreeMap<String, String>,
    config: RunnerConfig,
  ) -> Result<Self, BuilderError> {
    let recipe = recipe.copy()?;
    let backend = backend.copy()?;
    let cli = recipe.create_cli(path_key)?;

    let inputs: BTreeMap<String, Input> = recipe
      .variables()
      .into_iter()
      .map(|v| (v.name, Input { optional: v.optional }))
      .collect();

    let mut runner = Runner::new(cli, recipe.template_path(), recipe.plugin_path(), inputs, config);
    let env = build_env(&*recipe, &*provider, &additional_inputs, &runner);
    runner.set_env(env);

    debug!(recipe = %recipe.name(), path_key = %path_key, "created builder");
    Ok(Self {
      recipe,
      provider,
      backend,
      additional_inputs,
      runner,
      output: None,
    })
  }

  pub fn working_directory(&self) -> PathBuf {
    self.runner.working_directory().to_path_buf()
  }

  fn state_marker_path(&self) -> PathBuf {
    self
      .runner
      .working_directory()
      .join(TF_DATA_DIR_NAME)
      .join(TF_STATE_FILENAME)
  }

  /// Whether the working directory was initialized, and whether its state
  /// marker records a local backend path.
  pub async fn local_build_state(&self) -> (bool, bool) {
    let Ok(data) = tokio::fs::read(self.state_marker_path()).await else {
      return (false, false);
    };
    match serde_json::from_slice::<LocalState>(&data) {
      Ok(state) => (true, !state.backend.config.path.is_empty()),
      Err(e) => {
        debug!(error = %e, "unreadable local state marker");
        (true, false)
      }
    }
  }

  /// Initialize the working directory against the backend.
  pub async fn initialize(&mut self) -> Result<(), BuilderError> {
    let mut backend_config = BTreeMap::new();
    self.backend.export_vars(&mut backend_config);
    self.runner.set_backend(backend_config);

    info!(recipe = %self.recipe.name(), backend = %self.recipe.backend_type(), "initializing");
    self.runner.init().await?;
    Ok(())
  }

  /// Initialize only if the working directory has no local state marker.
  pub async fn auto_initialize(&mut self) -> Result<(), BuilderError> {
    let (initialized, _) = self.local_build_state().await;
    if initialized {
      debug!(recipe = %self.recipe.name(), "already initialized");
      return Ok(());
    }
    self.initialize().await
  }

  pub async fn show_launch_plan(&self) -> Result<(), BuilderError> {
    let vars = self.template_vars(false)?;
    self.runner.plan(&vars).await?;
    Ok(())
  }

  /// Taint the recipe's instance resources so the next launch recreates them.
  pub async fn set_rebuild_instances(&self) -> Result<(), BuilderError> {
    self.runner.taint(self.recipe.resource_instance_list()).await?;
    Ok(())
  }

  /// Taint the recipe's instance data resources so the next launch recreates them.
  pub async fn set_rebuild_instance_data(&self) -> Result<(), BuilderError> {
    self.runner.taint(self.recipe.resource_instance_data_list()).await?;
    Ok(())
  }

  /// Plan and apply, caching the resulting outputs.
  pub async fn launch(&mut self) -> Result<(), BuilderError> {
    let vars = self.template_vars(false)?;
    self.runner.plan(&vars).await?;
    let output = self.runner.apply(&vars).await?;

    info!(recipe = %self.recipe.name(), outputs = output.len(), "launch complete");
    self.output = Some(output);
    Ok(())
  }

  /// Outputs of the last successful launch.
  pub fn output(&self) -> Option<&OutputMap> {
    self.output.as_ref()
  }

  pub fn take_output(&mut self) -> Option<OutputMap> {
    self.output.take()
  }

  /// Destroy the deployment and forget the local initialization.
  ///
  /// Variables are exported as `TF_VAR_<name>` for the destroy call only,
  /// since destroy runs without a plan artifact.
  pub async fn delete(&mut self) -> Result<(), BuilderError> {
    let vars = self.template_vars(true)?;
    let env = self.runner.env().clone();
    self.runner.add_to_env(vars);
    let destroyed = self.runner.destroy().await;
    self.runner.set_env(env);
    destroyed?;

    match tokio::fs::remove_file(self.state_marker_path()).await {
      Ok(()) => {}
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
      Err(e) => return Err(BuilderError::RemoveState(e)),
    }
    info!(recipe = %self.recipe.name(), provider = %self.provider.name(), "deployment deleted");
    Ok(())
  }

  /// Effective template variables.
  ///
  /// With `env_form` every name is prefixed with `TF_VAR_`.
  fn template_vars(&self, env_form: bool) -> Result<BTreeMap<String, String>, BuilderError> {
    let mut vars = BTreeMap::new();

    for field in self.recipe.input_form().fields() {
      let value = match (&field.value, &field.default_value) {
        (Some(value), _) => value,
        (None, _) if self.additional_inputs.contains_key(&field.name) => continue,
        (None, Some(default)) => default,
        (None, None) => {
          return Err(BuilderError::MissingInputValue {
            recipe: self.recipe.name().to_string(),
            field: field.name.clone(),
          });
        }
      };

      let name = if env_form {
        format!("{TF_VAR_PREFIX}{}", field.name)
      } else {
        field.name.clone()
      };
      vars.insert(name, value.clone());
    }
    Ok(vars)
  }
}

/// Provider variables, then recipe variables, then the additional inputs and
/// finally the data directory override. Later entries win.
fn build_env(
  recipe: &dyn Recipe,
  provider: &dyn CloudProvider,
  additional_inputs: &BTreeMap<String, String>,
  runner: &Runner,
) -> BTreeMap<String, String> {
  let mut env = BTreeMap::new();
  provider.export_vars(&mut env);
  recipe.add_env_vars(&mut env);
  for (name, value) in additional_inputs {
    env.insert(format!("{TF_VAR_PREFIX}{name}"), value.clone());
  }
  env.insert(
    TF_DATA_DIR_ENV.to_string(),
    runner
      .working_directory()
      .join(TF_DATA_DIR_NAME)
      .display()
      .to_string(),
  );
  env
}
