//! Reconstruction of a target set from persisted records.
//!
//! Records may reference targets that appear later in the file, so loading
//! runs in two named stages:
//!
//! 1. [`parse_records`] materializes every record through the context.
//!    Records whose recipe cannot be resolved are kept aside as disabled.
//! 2. [`commit_pending`] wires targets with dependencies into the registry
//!    in dependency order. A target whose dependencies cannot all be
//!    resolved is dropped with a warning instead of failing the load.

use std::collections::{BTreeMap, HashMap};

use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use tracing::{debug, warn};

use super::context::TargetContext;
use super::entity::Target;
use super::types::{TargetError, TargetRecord};

/// Output of the first stage.
#[derive(Debug, Default)]
pub(crate) struct Parsed {
  /// Targets without dependencies, keyed by target key.
  pub ready: BTreeMap<String, Target>,
  /// Targets waiting for their dependencies to be registered.
  pub pending: Vec<Target>,
  /// Records whose recipe is not available.
  pub disabled: Vec<TargetRecord>,
}

/// Materialize records into targets and start refreshing each one.
pub(crate) fn parse_records(ctx: &dyn TargetContext, records: Vec<TargetRecord>) -> Result<Parsed, TargetError> {
  let mut parsed = Parsed::default();

  for record in records {
    let recipe_key = format!("{}:{}", record.cookbook_name, record.recipe_name);
    let mut target = match ctx.new_target(&recipe_key, &record.recipe_iaas) {
      Ok(target) => target,
      Err(e) => {
        warn!(
          recipe = %recipe_key,
          iaas = %record.recipe_iaas,
          error = %e,
          "recipe unavailable, keeping target record disabled"
        );
        parsed.disabled.push(record);
        continue;
      }
    };

    target.apply_record(&record)?;
    target.refresh();

    if target.dependent_targets.is_empty() {
      parsed.ready.insert(target.key(), target);
    } else {
      parsed.pending.push(target);
    }
  }

  Ok(parsed)
}

/// Register pending targets whose dependencies resolve.
///
/// Pending targets are visited in topological order of a graph with an edge
/// from each dependency to its dependent, so a chain of pending targets
/// commits regardless of file order. Members of a dependency cycle and
/// targets with an unresolved dependency are dropped.
pub(crate) fn commit_pending(registry: &mut BTreeMap<String, Target>, pending: Vec<Target>) {
  let keys: Vec<String> = pending.iter().map(Target::key).collect();

  let mut graph: DiGraph<usize, ()> = DiGraph::with_capacity(pending.len(), 0);
  let nodes: Vec<NodeIndex> = (0..pending.len()).map(|i| graph.add_node(i)).collect();
  let by_key: HashMap<&str, NodeIndex> = keys.iter().map(String::as_str).zip(nodes.iter().copied()).collect();

  for (i, target) in pending.iter().enumerate() {
    for dependency in &target.dependent_targets {
      if let Some(&from) = by_key.get(dependency.as_str()) {
        graph.add_edge(from, nodes[i], ());
      }
    }
  }

  let mut slots: Vec<Option<Target>> = pending.into_iter().map(Some).collect();

  // tarjan_scc yields components in reverse topological order.
  for component in tarjan_scc(&graph).into_iter().rev() {
    let cyclic = component.len() > 1 || graph.contains_edge(component[0], component[0]);
    if cyclic {
      for node in component {
        let i = graph[node];
        warn!(key = %keys[i], "dropping target with cyclic dependencies");
        slots[i] = None;
      }
      continue;
    }

    let i = graph[component[0]];
    let Some(target) = slots[i].take() else {
      continue;
    };

    if let Some(missing) = target.dependent_targets.iter().find(|d| !registry.contains_key(*d)) {
      warn!(key = %keys[i], dependency = %missing, "dropping target with unresolved dependency");
      continue;
    }

    debug!(key = %keys[i], dependencies = target.dependent_targets.len(), "wired target");
    registry.insert(keys[i].clone(), target);
  }
}
