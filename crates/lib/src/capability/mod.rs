//! Capability contracts consumed by the target orchestration core.
//!
//! Recipes, cloud providers and backends are all *configurable*: they expose
//! an [`InputForm`] and persist as a small document. Each kind extends the
//! minimal [`Configurable`] contract with its own trait, so callers never need
//! to downcast.
//!
//! Cloud access goes through [`Compute`], [`ComputeInstance`] and [`Storage`],
//! which are handed out by a connected [`CloudProvider`].

pub mod form;
pub mod types;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;

use crate::process::ToolCli;

pub use form::{InputField, InputForm};
pub use types::{CapabilityError, CloudError, InstanceState, Variable};

/// Minimal contract shared by recipes, providers and backends.
pub trait Configurable: Send + Sync {
  fn name(&self) -> &str;

  fn input_form(&self) -> &InputForm;

  fn input_form_mut(&mut self) -> &mut InputForm;

  /// Effective value of an input: the user value, else the default.
  fn get_value(&self, name: &str) -> Option<String> {
    self.input_form().field(name).and_then(|f| f.value()).map(str::to_string)
  }

  /// Every required input has a value.
  fn is_valid(&self) -> bool {
    self.input_form().is_complete()
  }

  fn to_document(&self) -> Result<serde_json::Value, CapabilityError> {
    self.input_form().to_document()
  }

  fn load_document(&mut self, doc: &serde_json::Value) -> Result<(), CapabilityError> {
    self.input_form_mut().load_document(doc)
  }
}

/// A parameterized infrastructure template.
pub trait Recipe: Configurable {
  fn copy(&self) -> Result<Box<dyn Recipe>, CapabilityError>;

  /// Names of the inputs that identify a deployment of this recipe.
  fn key_fields(&self) -> &[String];

  fn key_field_values(&self) -> Vec<String> {
    self
      .key_fields()
      .iter()
      .map(|name| self.get_value(name).unwrap_or_default())
      .collect()
  }

  /// Declared template variables with their current values.
  fn variables(&self) -> Vec<Variable> {
    self
      .input_form()
      .fields()
      .iter()
      .map(|f| Variable {
        name: f.name.clone(),
        value: f.value().map(str::to_string),
        optional: f.optional(),
      })
      .collect()
  }

  /// Bastion recipes receive target key material under their own variable names.
  fn is_bastion(&self) -> bool;

  /// Resource addresses recreated by a full instance rebuild.
  fn resource_instance_list(&self) -> &[String];

  /// Resource addresses recreated when only instance data is rebuilt.
  fn resource_instance_data_list(&self) -> &[String];

  fn backend_type(&self) -> &str;

  /// Export input values under the environment variable names each field declares.
  fn add_env_vars(&self, vars: &mut BTreeMap<String, String>) {
    for field in self.input_form().fields() {
      if let Some(value) = field.value() {
        for env_var in &field.env_vars {
          vars.insert(env_var.clone(), value.to_string());
        }
      }
    }
  }

  /// Directory holding the recipe's templates.
  fn template_path(&self) -> PathBuf;

  /// Pre-fetched provider plugins, if the cookbook ships them.
  fn plugin_path(&self) -> Option<PathBuf>;

  /// Create the tool CLI for the deployment identified by `path_key`.
  fn create_cli(&self, path_key: &str) -> Result<Arc<dyn ToolCli>, CapabilityError>;
}

/// A cloud provider account and region.
#[async_trait]
pub trait CloudProvider: Configurable {
  fn copy(&self) -> Result<Box<dyn CloudProvider>, CapabilityError>;

  fn region(&self) -> Option<String>;

  async fn connect(&self) -> Result<(), CloudError>;

  /// Compute API of a connected provider. `None` when the provider has none.
  async fn compute(&self) -> Result<Option<Arc<dyn Compute>>, CloudError>;

  async fn storage(&self) -> Result<Arc<dyn Storage>, CloudError>;

  /// Export credentials and region for the tool's provider plugins.
  fn export_vars(&self, vars: &mut BTreeMap<String, String>);
}

/// Remote state store configuration for the tool.
pub trait CloudBackend: Configurable {
  fn copy(&self) -> Result<Box<dyn CloudBackend>, CapabilityError>;

  /// Export the `-backend-config` key/value pairs.
  fn export_vars(&self, vars: &mut BTreeMap<String, String>);

  fn storage_instance_name(&self) -> String;
}

#[async_trait]
pub trait Compute: Send + Sync {
  /// Resolve instance ids in one batch call. Unknown ids are omitted.
  async fn get_instances(&self, ids: &[String]) -> Result<Vec<Arc<dyn ComputeInstance>>, CloudError>;
}

#[async_trait]
pub trait ComputeInstance: Send + Sync {
  fn id(&self) -> &str;

  fn name(&self) -> &str;

  async fn state(&self) -> Result<InstanceState, CloudError>;

  async fn start(&self) -> Result<(), CloudError>;

  async fn stop(&self) -> Result<(), CloudError>;

  fn public_ip(&self) -> Option<String>;

  fn public_dns(&self) -> Option<String>;
}

#[async_trait]
pub trait Storage: Send + Sync {
  /// Create the named storage container if it does not exist.
  async fn new_instance(&self, name: &str) -> Result<(), CloudError>;
}
