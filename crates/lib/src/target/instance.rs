//! Compute instances belonging to a target's deployment.

use std::fmt;
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::capability::{ComputeInstance, InstanceState};

use super::types::TargetError;

/// Order of instances whose metadata does not specify one.
pub const UNORDERED: i64 = i64::MAX;

/// One remote compute instance of a deployment.
///
/// Built from a record of the deployment's managed instance output. The live
/// cloud handle is attached once the instance id has been resolved; without
/// one the instance is unmanaged and its state is unknown.
#[derive(Clone)]
pub struct ManagedInstance {
  pub id: String,
  pub name: String,
  pub description: String,
  pub fqdn: String,
  pub public_ip: String,
  pub private_ip: String,
  pub order: i64,

  pub ssh_port: Option<String>,
  pub ssh_user: Option<String>,
  pub ssh_key: Option<String>,
  pub root_user: Option<String>,
  pub root_passwd: Option<String>,
  pub non_root_user: Option<String>,
  pub non_root_passwd: Option<String>,

  /// The full metadata record, including keys not mapped to fields.
  pub metadata: Map<String, Value>,

  compute: Option<Arc<dyn ComputeInstance>>,
}

impl fmt::Debug for ManagedInstance {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ManagedInstance")
      .field("id", &self.id)
      .field("name", &self.name)
      .field("fqdn", &self.fqdn)
      .field("order", &self.order)
      .field("managed", &self.is_managed())
      .finish_non_exhaustive()
  }
}

impl ManagedInstance {
  /// Parse the `index`th record of the managed instance output.
  pub fn from_metadata(index: usize, record: &Value) -> Result<Self, TargetError> {
    let invalid = |message: String| TargetError::InvalidInstanceMetadata { index, message };

    let metadata = record
      .as_object()
      .ok_or_else(|| invalid("record is not a map of key value pairs".to_string()))?;

    let required = |key: &str| -> Result<String, TargetError> {
      match metadata.get(key) {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(_) => Err(invalid(format!("value of key '{key}' is not a string"))),
        None => Err(invalid(format!("key '{key}' is missing"))),
      }
    };
    let optional = |key: &str| -> Result<Option<String>, TargetError> {
      match metadata.get(key) {
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(Value::Null) | None => Ok(None),
        Some(_) => Err(invalid(format!("value of key '{key}' is not a string"))),
      }
    };

    let order = match metadata.get("order") {
      None | Some(Value::Null) => UNORDERED,
      Some(Value::Number(n)) => match n.as_i64() {
        Some(order) => order,
        None => n
          .as_f64()
          .map(|f| f as i64)
          .ok_or_else(|| invalid("value of key 'order' is not an integer".to_string()))?,
      },
      Some(_) => return Err(invalid("value of key 'order' is not a number".to_string())),
    };

    Ok(Self {
      id: required("id")?,
      name: required("name")?,
      description: required("description")?,
      fqdn: required("fqdn")?,
      public_ip: required("public_ip")?,
      private_ip: required("private_ip")?,
      order,
      ssh_port: optional("ssh_port")?,
      ssh_user: optional("ssh_user")?,
      ssh_key: optional("ssh_key")?,
      root_user: optional("root_user")?,
      root_passwd: optional("root_passwd")?,
      non_root_user: optional("non_root_user")?,
      non_root_passwd: optional("non_root_passwd")?,
      metadata: metadata.clone(),
      compute: None,
    })
  }

  pub fn attach(&mut self, compute: Arc<dyn ComputeInstance>) {
    self.compute = Some(compute);
  }

  /// Whether a live cloud handle is attached.
  pub fn is_managed(&self) -> bool {
    self.compute.is_some()
  }

  /// Current cloud state. Unmanaged instances report [`InstanceState::Unknown`].
  pub async fn state(&self) -> Result<InstanceState, TargetError> {
    match &self.compute {
      Some(compute) => Ok(compute.state().await?),
      None => Ok(InstanceState::Unknown),
    }
  }

  pub async fn start(&self) -> Result<(), TargetError> {
    self.handle()?.start().await?;
    Ok(())
  }

  pub async fn stop(&self) -> Result<(), TargetError> {
    self.handle()?.stop().await?;
    Ok(())
  }

  /// Public address reported by the cloud, else the one from the metadata.
  pub fn public_address(&self) -> String {
    self
      .compute
      .as_ref()
      .and_then(|c| c.public_ip())
      .unwrap_or_else(|| self.public_ip.clone())
  }

  fn handle(&self) -> Result<&Arc<dyn ComputeInstance>, TargetError> {
    self
      .compute
      .as_ref()
      .ok_or_else(|| TargetError::UnmanagedInstance(self.name.clone()))
  }
}

/// Insert `instance` keeping `instances` sorted by `(order, name)`.
pub(crate) fn insert_sorted(instances: &mut Vec<ManagedInstance>, instance: ManagedInstance) {
  let pos = instances.partition_point(|i| (i.order, i.name.as_str()) <= (instance.order, instance.name.as_str()));
  instances.insert(pos, instance);
}
