//! The target entity.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use tracing::{debug, info};

use crate::builder::Builder;
use crate::capability::{CapabilityError, CloudBackend, CloudProvider, InstanceState, Recipe};
use crate::consts::MANAGED_INSTANCES_OUTPUT;
use crate::crypto::KeyPairGenerator;
use crate::terraform::{OutputMap, RunnerConfig};

use super::instance::ManagedInstance;
use super::remote::{DeploymentInfo, LoadMarker, RemoteState};
use super::types::{InstanceProgress, RefreshConfig, TargetError, TargetRecord, TargetState};

/// Name used when a recipe has no `name` input.
const NO_NAME: &str = "NONAME";

/// Tally of managed instance states.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InstanceCounts {
  pub running: usize,
  pub stopped: usize,
  pub pending: usize,
  pub other: usize,
}

impl InstanceCounts {
  pub fn record(&mut self, state: InstanceState) {
    match state {
      InstanceState::Running => self.running += 1,
      InstanceState::Stopped => self.stopped += 1,
      InstanceState::Pending => self.pending += 1,
      InstanceState::Unknown => self.other += 1,
    }
  }

  pub fn total(&self) -> usize {
    self.running + self.stopped + self.pending + self.other
  }

  /// Aggregate state. Nothing to aggregate is [`TargetState::Unknown`].
  pub fn state(&self) -> TargetState {
    let n = self.total();
    if n == 0 {
      TargetState::Unknown
    } else if self.running == n {
      TargetState::Running
    } else if self.stopped == n {
      TargetState::Shutdown
    } else if self.running + self.stopped + self.pending == n {
      TargetState::Pending
    } else {
      TargetState::Unknown
    }
  }
}

#[derive(Clone, Copy)]
enum PowerOp {
  Start,
  Stop,
}

/// One deployed or deployable instance of a recipe.
pub struct Target {
  pub recipe_name: String,
  pub recipe_iaas: String,
  pub cookbook_name: String,
  pub cookbook_version: String,
  pub repo_timestamp: String,

  /// Keys of the targets this target's inputs are taken from.
  pub dependent_targets: Vec<String>,

  pub rsa_private_key: String,
  pub rsa_public_key: String,
  pub node_key: String,
  pub node_id: String,

  recipe: Box<dyn Recipe>,
  provider: Option<Arc<dyn CloudProvider>>,
  backend: Option<Box<dyn CloudBackend>>,
  output: Option<OutputMap>,

  remote: Arc<RemoteState>,
  refresh_config: RefreshConfig,
}

impl fmt::Debug for Target {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Target")
      .field("key", &self.key())
      .field("cookbook", &self.cookbook_name)
      .field("deployed", &self.output.is_some())
      .finish_non_exhaustive()
  }
}

impl Target {
  pub fn new(recipe: Box<dyn Recipe>, provider: Arc<dyn CloudProvider>, backend: Box<dyn CloudBackend>) -> Self {
    let recipe_name = recipe.name().split('/').next().unwrap_or_default().to_string();
    Self {
      recipe_name,
      recipe_iaas: provider.name().to_string(),
      cookbook_name: String::new(),
      cookbook_version: String::new(),
      repo_timestamp: String::new(),
      dependent_targets: Vec::new(),
      rsa_private_key: String::new(),
      rsa_public_key: String::new(),
      node_key: String::new(),
      node_id: String::new(),
      recipe,
      provider: Some(provider),
      backend: Some(backend),
      output: None,
      remote: Arc::default(),
      refresh_config: RefreshConfig::default(),
    }
  }

  pub fn with_refresh_config(mut self, config: RefreshConfig) -> Self {
    self.refresh_config = config;
    self
  }

  /// Registry key: `<recipe>/<iaas>/<key field values...>` followed by
  /// `/<<dependency key>` for each dependency in declared order.
  pub fn key(&self) -> String {
    let mut key = format!("{}/{}/{}", self.recipe_name, self.recipe_iaas, self.path_key());
    for dependency in &self.dependent_targets {
      key.push_str("/<");
      key.push_str(dependency);
    }
    key
  }

  /// Key field values joined by `/`; selects the working directory.
  pub fn path_key(&self) -> String {
    self.recipe.key_field_values().join("/")
  }

  pub fn recipe(&self) -> &dyn Recipe {
    self.recipe.as_ref()
  }

  pub fn recipe_mut(&mut self) -> &mut dyn Recipe {
    self.recipe.as_mut()
  }

  pub fn provider(&self) -> Option<&Arc<dyn CloudProvider>> {
    self.provider.as_ref()
  }

  /// Modify the provider, copying it first if it is shared.
  ///
  /// The cached compute client is dropped and the remote view invalidated.
  pub fn update_provider<F>(&mut self, update: F) -> Result<(), TargetError>
  where
    F: FnOnce(&mut dyn CloudProvider) -> Result<(), CapabilityError>,
  {
    let key = self.key();
    let provider = self.provider.as_mut().ok_or(TargetError::NoProvider(key))?;
    if let Some(exclusive) = Arc::get_mut(provider) {
      update(exclusive)?;
    } else {
      let mut copy = provider.copy()?;
      update(copy.as_mut())?;
      *provider = Arc::from(copy);
    }

    self.remote.reset_compute();
    self.remote.mark_dirty();
    Ok(())
  }

  pub fn backend(&self) -> Option<&dyn CloudBackend> {
    self.backend.as_deref()
  }

  pub fn backend_mut(&mut self) -> Option<&mut (dyn CloudBackend + 'static)> {
    self.backend.as_deref_mut()
  }

  pub fn output(&self) -> Option<&OutputMap> {
    self.output.as_ref()
  }

  /// Record the outputs of a launch (or `None` after a delete).
  pub fn set_output(&mut self, output: Option<OutputMap>) {
    self.output = output;
    self.remote.mark_dirty();
  }

  /// Dependency keys this target is wired to.
  pub fn dependencies(&self) -> &[String] {
    &self.dependent_targets
  }

  pub fn deployment_name(&self) -> String {
    self.recipe.get_value("name").unwrap_or_else(|| NO_NAME.to_string())
  }

  pub fn description(&self) -> String {
    let (cloud, region) = match &self.provider {
      Some(provider) => (provider.name().to_string(), provider.region().unwrap_or_default()),
      None => (self.recipe_iaas.clone(), String::new()),
    };
    format!(
      "Deployment \"{}\" on Cloud \"{}\" and Region \"{}\"",
      self.deployment_name(),
      cloud,
      region
    )
  }

  /// Deep copy with a fresh remote view.
  ///
  /// Provider and backend are copied only when bound.
  pub fn copy(&self) -> Result<Target, TargetError> {
    let provider = match &self.provider {
      Some(provider) => Some(Arc::<dyn CloudProvider>::from(provider.copy()?)),
      None => None,
    };
    let backend = match &self.backend {
      Some(backend) => Some(backend.copy()?),
      None => None,
    };

    Ok(Target {
      recipe_name: self.recipe_name.clone(),
      recipe_iaas: self.recipe_iaas.clone(),
      cookbook_name: self.cookbook_name.clone(),
      cookbook_version: self.cookbook_version.clone(),
      repo_timestamp: self.repo_timestamp.clone(),
      dependent_targets: self.dependent_targets.clone(),
      rsa_private_key: self.rsa_private_key.clone(),
      rsa_public_key: self.rsa_public_key.clone(),
      node_key: self.node_key.clone(),
      node_id: self.node_id.clone(),
      recipe: self.recipe.copy()?,
      provider,
      backend,
      output: self.output.clone(),
      remote: Arc::default(),
      refresh_config: self.refresh_config.clone(),
    })
  }

  /// Generate the target's key pair unless it already has one.
  ///
  /// Returns whether a new pair was generated.
  pub fn init_key_pair(&mut self, generator: &dyn KeyPairGenerator) -> Result<bool, TargetError> {
    if !self.rsa_private_key.is_empty() {
      return Ok(false);
    }
    let pair = generator.create_key_pair()?;
    self.rsa_private_key = pair.private_pem;
    self.rsa_public_key = pair.public_pem;
    Ok(true)
  }

  /// Start a background refresh of the remote view.
  ///
  /// Returns immediately. A refresh already in flight is not restarted.
  pub fn refresh(&self) {
    self.remote.refresh(
      self.key(),
      self.provider.clone(),
      self.output.clone(),
      self.refresh_config.timeout,
    );
  }

  /// Managed instances ordered by `(order, name)`.
  ///
  /// Refreshes first when the view is stale and waits for any refresh in flight.
  pub async fn managed_instances(&self) -> Vec<ManagedInstance> {
    loop {
      if self.remote.needs_refresh() {
        self.refresh();
      }
      self.remote.join().await;
      // A refresh that finished after an invalidation leaves the view dirty.
      if self.remote.marker() != LoadMarker::Dirty {
        return self.remote.instances();
      }
    }
  }

  pub async fn managed_instance(&self, name: &str) -> Option<ManagedInstance> {
    self.managed_instances().await.into_iter().find(|i| i.name == name)
  }

  pub async fn deployment_info(&self) -> DeploymentInfo {
    self.remote.join().await;
    self.remote.info()
  }

  /// Outcome of the last refresh.
  pub async fn error(&self) -> Option<Arc<TargetError>> {
    self.remote.join().await;
    self.remote.error()
  }

  pub async fn status(&self) -> TargetState {
    if self.output.is_none() {
      return TargetState::Undeployed;
    }

    let instances = self.managed_instances().await;
    if let Some(e) = self.remote.error() {
      debug!(key = %self.key(), error = %e, "status unknown after failed refresh");
      return TargetState::Unknown;
    }

    let mut counts = InstanceCounts::default();
    for instance in &instances {
      match instance.state().await {
        Ok(state) => counts.record(state),
        Err(e) => {
          debug!(key = %self.key(), instance = %instance.name, error = %e, "instance state query failed");
          return TargetState::Unknown;
        }
      }
    }

    let state = counts.state();
    if state == TargetState::Unknown {
      debug!(
        key = %self.key(),
        instances = counts.total(),
        running = counts.running,
        stopped = counts.stopped,
        pending = counts.pending,
        other = counts.other,
        "unable to determine target state"
      );
    }
    state
  }

  /// Start every instance of a shut down deployment, in list order.
  ///
  /// Stops at the first failure, leaving the remaining instances untouched.
  pub async fn resume<F>(&self, progress: F) -> Result<(), TargetError>
  where
    F: FnMut(InstanceProgress, &ManagedInstance),
  {
    self.power("resume", TargetState::Shutdown, PowerOp::Start, progress).await
  }

  /// Stop every instance of a running deployment, in list order.
  pub async fn suspend<F>(&self, progress: F) -> Result<(), TargetError>
  where
    F: FnMut(InstanceProgress, &ManagedInstance),
  {
    self.power("suspend", TargetState::Running, PowerOp::Stop, progress).await
  }

  async fn power<F>(
    &self,
    operation: &'static str,
    required: TargetState,
    op: PowerOp,
    mut progress: F,
  ) -> Result<(), TargetError>
  where
    F: FnMut(InstanceProgress, &ManagedInstance),
  {
    let state = self.status().await;
    if state != required {
      if let Some(e) = self.remote.error() {
        return Err(TargetError::Refresh(e));
      }
      return Err(TargetError::InvalidState {
        operation,
        key: self.key(),
        state,
      });
    }

    for instance in self.managed_instances().await {
      progress(InstanceProgress::Before, &instance);
      match op {
        PowerOp::Start => instance.start().await?,
        PowerOp::Stop => instance.stop().await?,
      }
      progress(InstanceProgress::After, &instance);
    }
    info!(key = %self.key(), operation, "completed");
    Ok(())
  }

  /// Validate the backend and create its storage container.
  pub async fn prepare_backend(&self) -> Result<(), TargetError> {
    let backend = self
      .backend
      .as_deref()
      .ok_or_else(|| TargetError::NoBackend(self.key()))?;
    if !backend.is_valid() {
      return Err(TargetError::InvalidBackend(self.key()));
    }
    let provider = self
      .provider
      .as_ref()
      .ok_or_else(|| TargetError::NoProvider(self.key()))?;

    provider.connect().await?;
    let storage = provider.storage().await?;
    storage.new_instance(&backend.storage_instance_name()).await?;
    Ok(())
  }

  /// Create a builder for this target.
  ///
  /// `build_vars` is extended with this target's key material and the
  /// outputs of `dependencies`, which are forwarded as additional inputs.
  pub fn new_builder(
    &self,
    mut build_vars: BTreeMap<String, String>,
    dependencies: &[&Target],
    config: RunnerConfig,
  ) -> Result<Builder, TargetError> {
    self.inject_key_material(&mut build_vars);

    for dependency in dependencies {
      let Some(output) = &dependency.output else {
        continue;
      };
      for (name, value) in output {
        if name.starts_with(MANAGED_INSTANCES_OUTPUT) {
          continue;
        }
        build_vars.insert(name.clone(), value.value.to_var_string());
      }
    }

    let provider = self
      .provider
      .clone()
      .ok_or_else(|| TargetError::NoProvider(self.key()))?;
    let backend = self
      .backend
      .as_deref()
      .ok_or_else(|| TargetError::NoBackend(self.key()))?;

    Ok(Builder::new(
      &self.path_key(),
      self.recipe.as_ref(),
      provider,
      backend,
      build_vars,
      config,
    )?)
  }

  fn inject_key_material(&self, vars: &mut BTreeMap<String, String>) {
    let prefix = if self.recipe.is_bastion() {
      "cb_bastion_"
    } else {
      "cb_target_"
    };
    let material = [
      ("private_key", &self.rsa_private_key),
      ("public_key", &self.rsa_public_key),
      ("node_key", &self.node_key),
      ("node_id", &self.node_id),
    ];
    for (name, value) in material {
      if !value.is_empty() {
        vars.insert(format!("{prefix}{name}"), value.clone());
      }
    }
  }

  pub(crate) fn to_record(&self) -> Result<TargetRecord, TargetError> {
    Ok(TargetRecord {
      recipe_name: self.recipe_name.clone(),
      recipe_iaas: self.recipe_iaas.clone(),
      cookbook_name: self.cookbook_name.clone(),
      cookbook_version: self.cookbook_version.clone(),
      repo_timestamp: self.repo_timestamp.clone(),
      dependent_targets: self.dependent_targets.clone(),
      recipe: Some(self.recipe.to_document()?),
      provider: self.provider.as_ref().map(|p| p.to_document()).transpose()?,
      backend: self.backend.as_ref().map(|b| b.to_document()).transpose()?,
      output: self.output.clone(),
      rsa_private_key: self.rsa_private_key.clone(),
      rsa_public_key: self.rsa_public_key.clone(),
      node_key: self.node_key.clone(),
      node_id: self.node_id.clone(),
    })
  }

  /// Overlay a persisted record onto a freshly materialized target.
  pub(crate) fn apply_record(&mut self, record: &TargetRecord) -> Result<(), TargetError> {
    if let Some(doc) = &record.recipe {
      self.recipe.load_document(doc)?;
    }
    if let Some(doc) = &record.provider {
      if self.provider.is_some() {
        self.update_provider(|provider| provider.load_document(doc))?;
      }
    }
    if let (Some(doc), Some(backend)) = (&record.backend, self.backend.as_mut()) {
      backend.load_document(doc)?;
    }

    self.dependent_targets = record.dependent_targets.clone();
    self.output = record.output.clone();
    self.cookbook_name = record.cookbook_name.clone();
    self.cookbook_version = record.cookbook_version.clone();
    self.repo_timestamp = record.repo_timestamp.clone();
    self.rsa_private_key = record.rsa_private_key.clone();
    self.rsa_public_key = record.rsa_public_key.clone();
    self.node_key = record.node_key.clone();
    self.node_id = record.node_id.clone();
    self.remote.mark_dirty();
    Ok(())
  }
}
