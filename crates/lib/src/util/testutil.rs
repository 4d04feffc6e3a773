//! Test utilities for cloudbuilder-lib.
//!
//! In-memory fakes for the capability seams (recipes, clouds, the tool CLI)
//! plus helpers for tests that drive real processes.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::io::{AsyncWriteExt, DuplexStream};

use crate::capability::{
  CapabilityError, CloudBackend, CloudError, CloudProvider, Compute, ComputeInstance, Configurable, InputField,
  InputForm, InstanceState, Recipe, Storage,
};
use crate::consts::{MANAGED_INSTANCES_OUTPUT, TF_DATA_DIR_ENV, TF_DATA_DIR_NAME, TF_PLAN_FILENAME, TF_STATE_FILENAME};
use crate::crypto::{CryptoError, KeyPair, KeyPairGenerator};
use crate::process::{CliError, OutputFilter, ToolCli};
use crate::target::{ContextError, Target, TargetContext};
use crate::terraform::{Output, OutputMap, OutputValue};

/// Write an executable shell script into `dir`.
#[cfg(unix)]
pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
  use std::os::unix::fs::PermissionsExt;

  let path = dir.join(name);
  std::fs::write(&path, format!("#!/bin/sh\n{body}")).unwrap();
  std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
  path
}

/// A valid managed instance metadata record.
pub fn instance_record(id: &str, name: &str, order: Option<i64>) -> Value {
  let mut record = json!({
    "id": id,
    "name": name,
    "description": format!("{name} node"),
    "fqdn": format!("{name}.example.com"),
    "public_ip": "203.0.113.10",
    "private_ip": "10.0.0.10",
  });
  if let Some(order) = order {
    record["order"] = json!(order);
  }
  record
}

/// An output map holding only the managed instance list.
pub fn managed_output(records: Vec<Value>) -> OutputMap {
  OutputMap::from([(
    MANAGED_INSTANCES_OUTPUT.to_string(),
    Output::new(OutputValue::Structured(Value::Array(records))),
  )])
}

// ---------------------------------------------------------------------------
// Tool CLI
// ---------------------------------------------------------------------------

/// One recorded invocation of [`FakeCli`].
#[derive(Debug, Clone)]
pub struct FakeCall {
  pub args: Vec<String>,
  pub env: BTreeMap<String, String>,
  /// Whether the plan artifact existed when the call started.
  pub plan_present: bool,
}

/// Records invocations and imitates the side effects the runner relies on.
///
/// `plan` writes the `-out=` artifact, `init` writes the local state marker
/// and `output` streams the configured JSON into the piped writer.
pub struct FakeCli {
  working_dir: PathBuf,
  calls: Mutex<Vec<FakeCall>>,
  output_json: Mutex<String>,
  failing: Mutex<BTreeSet<String>>,
  delay: Mutex<Option<Duration>>,
  pipe: Mutex<Option<DuplexStream>>,
  filter: Mutex<Option<OutputFilter>>,
}

impl FakeCli {
  pub fn new(working_dir: impl Into<PathBuf>) -> Self {
    Self {
      working_dir: working_dir.into(),
      calls: Mutex::new(Vec::new()),
      output_json: Mutex::new("{}".to_string()),
      failing: Mutex::new(BTreeSet::new()),
      delay: Mutex::new(None),
      pipe: Mutex::new(None),
      filter: Mutex::new(None),
    }
  }

  pub fn calls(&self) -> Vec<FakeCall> {
    self.calls.lock().clone()
  }

  /// Subcommand of every call, i.e. its first argument not starting with `-`.
  pub fn subcommands(&self) -> Vec<String> {
    self.calls.lock().iter().map(|c| subcommand(&c.args)).collect()
  }

  pub fn set_output_json(&self, json: &str) {
    *self.output_json.lock() = json.to_string();
  }

  /// Make every later call of `subcommand` exit unsuccessfully.
  pub fn fail_on(&self, subcommand: &str) {
    self.failing.lock().insert(subcommand.to_string());
  }

  pub fn set_delay(&self, delay: Duration) {
    *self.delay.lock() = Some(delay);
  }
}

fn subcommand(args: &[String]) -> String {
  args
    .iter()
    .find(|a| !a.starts_with('-'))
    .cloned()
    .unwrap_or_default()
}

#[async_trait]
impl ToolCli for FakeCli {
  fn working_directory(&self) -> &Path {
    &self.working_dir
  }

  async fn run_with_env(&self, args: &[String], env: &BTreeMap<String, String>) -> Result<(), CliError> {
    let pipe = self.pipe.lock().take();
    let _filter = self.filter.lock().take();
    std::fs::create_dir_all(&self.working_dir)?;

    let command = subcommand(args);
    self.calls.lock().push(FakeCall {
      args: args.to_vec(),
      env: env.clone(),
      plan_present: self.working_dir.join(TF_PLAN_FILENAME).exists(),
    });

    let delay = *self.delay.lock();
    if let Some(delay) = delay {
      tokio::time::sleep(delay).await;
    }

    if self.failing.lock().contains(&command) {
      return Err(CliError::Failed {
        command,
        code: Some(1),
        stderr: "simulated failure".to_string(),
      });
    }

    match command.as_str() {
      "plan" => {
        if let Some(out) = args.iter().find_map(|a| a.strip_prefix("-out=")) {
          std::fs::write(out, "plan")?;
        }
      }
      "init" => {
        let data_dir = env
          .get(TF_DATA_DIR_ENV)
          .map(PathBuf::from)
          .unwrap_or_else(|| self.working_dir.join(TF_DATA_DIR_NAME));
        std::fs::create_dir_all(&data_dir)?;
        std::fs::write(
          data_dir.join(TF_STATE_FILENAME),
          r#"{"version": 3, "backend": {"type": "s3", "config": {"bucket": "cb-state"}}}"#,
        )?;
      }
      "output" => {
        if let Some(mut pipe) = pipe {
          let json = self.output_json.lock().clone();
          pipe.write_all(json.as_bytes()).await?;
        }
      }
      _ => {}
    }
    Ok(())
  }

  fn pipe_output(&self, writer: DuplexStream) {
    *self.pipe.lock() = Some(writer);
  }

  fn apply_filter(&self, filter: OutputFilter) {
    *self.filter.lock() = Some(filter);
  }
}

// ---------------------------------------------------------------------------
// Capabilities
// ---------------------------------------------------------------------------

/// Recipe with a required `name`, and `region`/`size` inputs with defaults.
#[derive(Clone)]
pub struct FakeRecipe {
  name: String,
  form: InputForm,
  key_fields: Vec<String>,
  bastion: bool,
  instances: Vec<String>,
  instance_data: Vec<String>,
  cli: Option<Arc<FakeCli>>,
}

impl FakeRecipe {
  pub fn new(name: &str, key_fields: &[&str]) -> Self {
    let mut form = InputForm::new(name, "fake recipe")
      .with_field(InputField::new("name"))
      .with_field(InputField::new("region").with_default("us-east-1"))
      .with_field(InputField::new("size").with_default("small"));
    for key in key_fields {
      if form.field(key).is_none() {
        form = form.with_field(InputField::new(*key));
      }
    }
    Self {
      name: name.to_string(),
      form,
      key_fields: key_fields.iter().map(|k| k.to_string()).collect(),
      bastion: false,
      instances: vec!["aws_instance.node".to_string()],
      instance_data: vec!["null_resource.node_data".to_string()],
      cli: None,
    }
  }

  pub fn with_cli(mut self, cli: Arc<FakeCli>) -> Self {
    self.cli = Some(cli);
    self
  }

  pub fn with_bastion(mut self) -> Self {
    self.bastion = true;
    self
  }
}

impl Configurable for FakeRecipe {
  fn name(&self) -> &str {
    &self.name
  }

  fn input_form(&self) -> &InputForm {
    &self.form
  }

  fn input_form_mut(&mut self) -> &mut InputForm {
    &mut self.form
  }
}

impl Recipe for FakeRecipe {
  fn copy(&self) -> Result<Box<dyn Recipe>, CapabilityError> {
    Ok(Box::new(self.clone()))
  }

  fn key_fields(&self) -> &[String] {
    &self.key_fields
  }

  fn is_bastion(&self) -> bool {
    self.bastion
  }

  fn resource_instance_list(&self) -> &[String] {
    &self.instances
  }

  fn resource_instance_data_list(&self) -> &[String] {
    &self.instance_data
  }

  fn backend_type(&self) -> &str {
    "s3"
  }

  fn template_path(&self) -> PathBuf {
    PathBuf::from("/templates").join(&self.name)
  }

  fn plugin_path(&self) -> Option<PathBuf> {
    None
  }

  fn create_cli(&self, _path_key: &str) -> Result<Arc<dyn ToolCli>, CapabilityError> {
    match &self.cli {
      Some(cli) => Ok(cli.clone()),
      None => Err(CapabilityError::Cli {
        recipe: self.name.clone(),
        message: "no cli configured".to_string(),
      }),
    }
  }
}

/// Provider with a `region` input. Clones share their counters and storage.
#[derive(Clone)]
pub struct FakeProvider {
  name: String,
  form: InputForm,
  compute: Option<FakeCompute>,
  connects: Arc<AtomicUsize>,
  storage: Arc<FakeStorage>,
}

impl FakeProvider {
  pub fn new(name: &str) -> Self {
    Self {
      name: name.to_string(),
      form: InputForm::new(name, "fake provider").with_field(InputField::new("region").with_default("us-east-1")),
      compute: None,
      connects: Arc::new(AtomicUsize::new(0)),
      storage: Arc::new(FakeStorage::default()),
    }
  }

  pub fn with_compute(mut self, compute: FakeCompute) -> Self {
    self.compute = Some(compute);
    self
  }

  pub fn connects(&self) -> usize {
    self.connects.load(Ordering::SeqCst)
  }

  pub fn storage_instances(&self) -> Vec<String> {
    self.storage.created.lock().clone()
  }
}

impl Configurable for FakeProvider {
  fn name(&self) -> &str {
    &self.name
  }

  fn input_form(&self) -> &InputForm {
    &self.form
  }

  fn input_form_mut(&mut self) -> &mut InputForm {
    &mut self.form
  }
}

#[async_trait]
impl CloudProvider for FakeProvider {
  fn copy(&self) -> Result<Box<dyn CloudProvider>, CapabilityError> {
    Ok(Box::new(self.clone()))
  }

  fn region(&self) -> Option<String> {
    self.get_value("region")
  }

  async fn connect(&self) -> Result<(), CloudError> {
    self.connects.fetch_add(1, Ordering::SeqCst);
    Ok(())
  }

  async fn compute(&self) -> Result<Option<Arc<dyn Compute>>, CloudError> {
    Ok(
      self
        .compute
        .clone()
        .map(|c| Arc::new(c) as Arc<dyn Compute>),
    )
  }

  async fn storage(&self) -> Result<Arc<dyn Storage>, CloudError> {
    Ok(self.storage.clone())
  }

  fn export_vars(&self, vars: &mut BTreeMap<String, String>) {
    if let Some(region) = self.region() {
      vars.insert("AWS_DEFAULT_REGION".to_string(), region);
    }
  }
}

/// Backend with a `bucket` input defaulting to `cb-state`.
#[derive(Clone)]
pub struct FakeBackend {
  name: String,
  form: InputForm,
}

impl FakeBackend {
  pub fn new(name: &str) -> Self {
    Self {
      name: name.to_string(),
      form: InputForm::new(name, "fake backend").with_field(InputField::new("bucket").with_default("cb-state")),
    }
  }
}

impl Configurable for FakeBackend {
  fn name(&self) -> &str {
    &self.name
  }

  fn input_form(&self) -> &InputForm {
    &self.form
  }

  fn input_form_mut(&mut self) -> &mut InputForm {
    &mut self.form
  }
}

impl CloudBackend for FakeBackend {
  fn copy(&self) -> Result<Box<dyn CloudBackend>, CapabilityError> {
    Ok(Box::new(self.clone()))
  }

  fn export_vars(&self, vars: &mut BTreeMap<String, String>) {
    if let Some(bucket) = self.get_value("bucket") {
      vars.insert("bucket".to_string(), bucket);
    }
  }

  fn storage_instance_name(&self) -> String {
    self.get_value("bucket").unwrap_or_default()
  }
}

/// Compute service over a fixed set of instances. Clones share state.
#[derive(Clone, Default)]
pub struct FakeCompute {
  instances: Vec<Arc<FakeInstance>>,
  lookups: Arc<AtomicUsize>,
  delay: Option<Duration>,
}

impl FakeCompute {
  /// Instances named after their ids.
  pub fn with_states(states: &[(&str, InstanceState)]) -> Self {
    Self {
      instances: states
        .iter()
        .map(|(id, state)| Arc::new(FakeInstance::new(id, id, *state)))
        .collect(),
      ..Self::default()
    }
  }

  pub fn with_delay(mut self, delay: Duration) -> Self {
    self.delay = Some(delay);
    self
  }

  pub fn instance(&self, id: &str) -> Option<Arc<FakeInstance>> {
    self.instances.iter().find(|i| i.id == id).cloned()
  }

  /// Number of `get_instances` calls served.
  pub fn lookups(&self) -> usize {
    self.lookups.load(Ordering::SeqCst)
  }
}

#[async_trait]
impl Compute for FakeCompute {
  async fn get_instances(&self, ids: &[String]) -> Result<Vec<Arc<dyn ComputeInstance>>, CloudError> {
    if let Some(delay) = self.delay {
      tokio::time::sleep(delay).await;
    }
    self.lookups.fetch_add(1, Ordering::SeqCst);
    Ok(
      self
        .instances
        .iter()
        .filter(|i| ids.contains(&i.id))
        .map(|i| i.clone() as Arc<dyn ComputeInstance>)
        .collect(),
    )
  }
}

pub struct FakeInstance {
  id: String,
  name: String,
  state: Mutex<InstanceState>,
  fail_queries: AtomicBool,
  fail_power: AtomicBool,
}

impl FakeInstance {
  pub fn new(id: &str, name: &str, state: InstanceState) -> Self {
    Self {
      id: id.to_string(),
      name: name.to_string(),
      state: Mutex::new(state),
      fail_queries: AtomicBool::new(false),
      fail_power: AtomicBool::new(false),
    }
  }

  pub fn set_state(&self, state: InstanceState) {
    *self.state.lock() = state;
  }

  pub fn current_state(&self) -> InstanceState {
    *self.state.lock()
  }

  /// Make state queries fail.
  pub fn fail_queries(&self) {
    self.fail_queries.store(true, Ordering::SeqCst);
  }

  /// Make start and stop fail.
  pub fn fail_power(&self) {
    self.fail_power.store(true, Ordering::SeqCst);
  }

  fn power(&self, state: InstanceState) -> Result<(), CloudError> {
    if self.fail_power.load(Ordering::SeqCst) {
      return Err(CloudError::Api(format!("cannot change state of {}", self.id)));
    }
    self.set_state(state);
    Ok(())
  }
}

#[async_trait]
impl ComputeInstance for FakeInstance {
  fn id(&self) -> &str {
    &self.id
  }

  fn name(&self) -> &str {
    &self.name
  }

  async fn state(&self) -> Result<InstanceState, CloudError> {
    if self.fail_queries.load(Ordering::SeqCst) {
      return Err(CloudError::Api(format!("cannot describe {}", self.id)));
    }
    Ok(self.current_state())
  }

  async fn start(&self) -> Result<(), CloudError> {
    self.power(InstanceState::Running)
  }

  async fn stop(&self) -> Result<(), CloudError> {
    self.power(InstanceState::Stopped)
  }

  fn public_ip(&self) -> Option<String> {
    Some("203.0.113.10".to_string())
  }

  fn public_dns(&self) -> Option<String> {
    Some(format!("{}.compute.example.com", self.name))
  }
}

#[derive(Default)]
pub struct FakeStorage {
  created: Mutex<Vec<String>>,
}

#[async_trait]
impl Storage for FakeStorage {
  async fn new_instance(&self, name: &str) -> Result<(), CloudError> {
    self.created.lock().push(name.to_string());
    Ok(())
  }
}

/// Key generator returning a fixed pair.
pub struct FakeKeys;

impl KeyPairGenerator for FakeKeys {
  fn create_key_pair(&self) -> Result<KeyPair, CryptoError> {
    Ok(KeyPair {
      private_pem: "PRIVATE KEY 1".to_string(),
      public_pem: "PUBLIC KEY 1".to_string(),
    })
  }
}

/// Context resolving `<cookbook>:<recipe>` keys against registered recipes.
pub struct FakeContext {
  recipes: BTreeMap<String, FakeRecipe>,
  provider: FakeProvider,
  backend: FakeBackend,
}

impl FakeContext {
  pub fn new(provider: FakeProvider) -> Self {
    Self {
      recipes: BTreeMap::new(),
      provider,
      backend: FakeBackend::new("s3"),
    }
  }

  pub fn with_recipe(mut self, cookbook: &str, recipe: FakeRecipe) -> Self {
    self
      .recipes
      .insert(format!("{cookbook}:{}", recipe.name()), recipe);
    self
  }

  /// Target for a registered recipe with its `name` input set.
  pub fn target(&self, cookbook: &str, recipe: &str, name: &str) -> Target {
    let mut target = self
      .new_target(&format!("{cookbook}:{recipe}"), self.provider.name())
      .unwrap();
    target
      .recipe_mut()
      .input_form_mut()
      .set_field_value("name", name)
      .unwrap();
    target
  }
}

impl TargetContext for FakeContext {
  fn new_target(&self, recipe_key: &str, recipe_iaas: &str) -> Result<Target, ContextError> {
    if recipe_iaas != self.provider.name() {
      return Err(ContextError::ProviderNotFound(recipe_iaas.to_string()));
    }
    let recipe = self
      .recipes
      .get(recipe_key)
      .ok_or_else(|| ContextError::RecipeNotFound(recipe_key.to_string()))?;

    let mut target = Target::new(
      Box::new(recipe.clone()),
      Arc::new(self.provider.clone()),
      Box::new(self.backend.clone()),
    );
    target.cookbook_name = recipe_key.split(':').next().unwrap_or_default().to_string();
    Ok(target)
  }
}
