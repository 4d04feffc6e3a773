//! Dependency aware registry of targets.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::ser::{Error as _, SerializeSeq};
use serde::{Serialize, Serializer};
use tracing::{debug, info, warn};

use crate::builder::Builder;
use crate::terraform::RunnerConfig;

use super::context::TargetContext;
use super::entity::Target;
use super::load::{Parsed, commit_pending, parse_records};
use super::types::{DisabledRecipe, TargetError, TargetRecord};

/// All targets of one configuration context, keyed by [`Target::key`].
///
/// Records whose recipe could not be resolved when loading are carried as
/// disabled records and written back unchanged, after the live targets.
pub struct TargetSet {
  ctx: Arc<dyn TargetContext>,
  targets: BTreeMap<String, Target>,
  disabled: Vec<TargetRecord>,
  dirty: bool,
}

impl TargetSet {
  pub fn new(ctx: Arc<dyn TargetContext>) -> Self {
    Self {
      ctx,
      targets: BTreeMap::new(),
      disabled: Vec::new(),
      dirty: false,
    }
  }

  pub fn context(&self) -> &Arc<dyn TargetContext> {
    &self.ctx
  }

  /// Targets whose key starts with `parts` joined by `/`, in ascending key order.
  pub fn lookup(&self, parts: &[&str]) -> Vec<&Target> {
    let prefix = parts.join("/");
    self
      .targets
      .range(prefix.clone()..)
      .take_while(|(key, _)| key.starts_with(&prefix))
      .map(|(_, target)| target)
      .collect()
  }

  /// All live targets in ascending key order.
  pub fn targets(&self) -> impl Iterator<Item = &Target> {
    self.targets.values()
  }

  pub fn len(&self) -> usize {
    self.targets.len()
  }

  pub fn is_empty(&self) -> bool {
    self.targets.is_empty()
  }

  pub fn get_target(&self, key: &str) -> Option<&Target> {
    self.targets.get(key)
  }

  /// Mutable access marks the set dirty.
  ///
  /// Changing key fields through this reference leaves the target under its
  /// old key; use [`TargetSet::save_target`] to re-register it.
  pub fn get_target_mut(&mut self, key: &str) -> Option<&mut Target> {
    let target = self.targets.get_mut(key)?;
    self.dirty = true;
    Some(target)
  }

  /// Register `target` under its current key, replacing `old_key`.
  ///
  /// Every dependency must already be registered. When the key changed, the
  /// targets depending on `old_key` are rewritten to the new key and
  /// re-registered, transitively. Returns the new key.
  pub fn save_target(&mut self, old_key: Option<&str>, target: Target) -> Result<String, TargetError> {
    let key = target.key();
    if let Some(dependency) = target
      .dependent_targets
      .iter()
      .find(|d| !self.targets.contains_key(*d) || Some(d.as_str()) == old_key)
    {
      return Err(TargetError::UnresolvedDependency {
        target: key,
        dependency: dependency.clone(),
      });
    }

    if let Some(old_key) = old_key
      && old_key != key
    {
      self.targets.remove(old_key);
    }
    self.targets.insert(key.clone(), target);

    if let Some(old_key) = old_key
      && old_key != key
    {
      self.rekey_dependents(old_key, &key);
    }

    self.dirty = true;
    info!(key = %key, "saved target");
    Ok(key)
  }

  fn rekey_dependents(&mut self, old_key: &str, new_key: &str) {
    let mut renames = vec![(old_key.to_string(), new_key.to_string())];

    while let Some((from, to)) = renames.pop() {
      for key in self.dependents_of(&from) {
        let Some(mut target) = self.targets.remove(&key) else {
          continue;
        };
        for dependency in &mut target.dependent_targets {
          if *dependency == from {
            *dependency = to.clone();
          }
        }

        let updated = target.key();
        debug!(from = %key, to = %updated, "re-keyed dependent target");
        self.targets.insert(updated.clone(), target);
        if updated != key {
          renames.push((key, updated));
        }
      }
    }
  }

  /// Remove and return the target registered under `key`.
  pub fn delete_target(&mut self, key: &str) -> Option<Target> {
    let target = self.targets.remove(key)?;

    let dependents = self.dependents_of(key);
    if !dependents.is_empty() {
      warn!(key = %key, dependents = ?dependents, "deleted target still has dependents");
    }
    self.dirty = true;
    info!(key = %key, "deleted target");
    Some(target)
  }

  /// Keys of the live targets that depend on `key`.
  pub fn dependents_of(&self, key: &str) -> Vec<String> {
    self
      .targets
      .iter()
      .filter(|(_, target)| target.dependent_targets.iter().any(|d| d == key))
      .map(|(k, _)| k.clone())
      .collect()
  }

  /// Distinct recipes of the disabled records, ascending.
  pub fn disabled_target_recipes(&self) -> Vec<DisabledRecipe> {
    self
      .disabled
      .iter()
      .map(|record| DisabledRecipe {
        cookbook_name: record.cookbook_name.clone(),
        cookbook_version: record.cookbook_version.clone(),
        recipe_name: record.recipe_name.clone(),
      })
      .collect::<BTreeSet<_>>()
      .into_iter()
      .collect()
  }

  pub fn is_dirty(&self) -> bool {
    self.dirty
  }

  pub fn clear_dirty(&mut self) {
    self.dirty = false;
  }

  pub fn to_json(&self) -> Result<String, TargetError> {
    serde_json::to_string_pretty(self).map_err(TargetError::Serialize)
  }

  /// Replace the contents with the targets persisted in `json`.
  pub fn load_json(&mut self, json: &str) -> Result<(), TargetError> {
    let records: Vec<TargetRecord> = serde_json::from_str(json).map_err(TargetError::Parse)?;
    let total = records.len();

    let Parsed {
      mut ready,
      pending,
      disabled,
    } = parse_records(self.ctx.as_ref(), records)?;
    commit_pending(&mut ready, pending);

    self.targets = ready;
    self.disabled = disabled;
    self.dirty = false;

    info!(
      records = total,
      targets = self.targets.len(),
      disabled = self.disabled.len(),
      "loaded target set"
    );
    Ok(())
  }

  /// Create a builder for the target under `key`, forwarding its dependencies' outputs.
  pub fn new_builder(
    &self,
    key: &str,
    build_vars: BTreeMap<String, String>,
    config: RunnerConfig,
  ) -> Result<Builder, TargetError> {
    let target = self
      .targets
      .get(key)
      .ok_or_else(|| TargetError::NotFound(key.to_string()))?;

    let dependencies = target
      .dependent_targets
      .iter()
      .map(|dependency| {
        self
          .targets
          .get(dependency)
          .ok_or_else(|| TargetError::UnresolvedDependency {
            target: key.to_string(),
            dependency: dependency.clone(),
          })
      })
      .collect::<Result<Vec<_>, _>>()?;

    target.new_builder(build_vars, &dependencies, config)
  }
}

impl Serialize for TargetSet {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    let mut seq = serializer.serialize_seq(Some(self.targets.len() + self.disabled.len()))?;
    for target in self.targets.values() {
      let record = target.to_record().map_err(S::Error::custom)?;
      seq.serialize_element(&record)?;
    }
    for record in &self.disabled {
      seq.serialize_element(record)?;
    }
    seq.end()
  }
}
