//! Background discovery of a target's live remote state.
//!
//! At most one refresh is in flight per target. The load marker lives in a
//! `watch` channel so readers can wait for an in-flight refresh without
//! holding a lock on the data. A refresh builds the complete instance list
//! before publishing it, so readers never observe a partial list.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tracing::{debug, error, info};

use crate::capability::{CloudProvider, Compute};
use crate::consts::{
  DEPLOYMENT_DESCRIPTION_OUTPUT, DEPLOYMENT_VERSION_OUTPUT, MANAGED_INSTANCES_OUTPUT, ROOT_CA_CERT_OUTPUT,
  VPN_TYPE_OUTPUT,
};
use crate::terraform::{OutputMap, OutputValue};

use super::instance::{ManagedInstance, insert_sorted};
use super::types::TargetError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LoadMarker {
  Dirty,
  Loading,
  Loaded,
}

/// Well-known deployment details read from the target's outputs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeploymentInfo {
  pub description: Option<String>,
  pub version: Option<String>,
  pub root_ca_cert: Option<String>,
  pub vpn_type: Option<String>,
}

impl DeploymentInfo {
  fn from_output(output: &OutputMap) -> Self {
    let text = |name: &str| output.get(name).and_then(|o| o.value.as_str()).map(str::to_string);
    Self {
      description: text(DEPLOYMENT_DESCRIPTION_OUTPUT),
      version: text(DEPLOYMENT_VERSION_OUTPUT),
      root_ca_cert: text(ROOT_CA_CERT_OUTPUT),
      vpn_type: text(VPN_TYPE_OUTPUT),
    }
  }
}

#[derive(Default)]
struct RemoteView {
  instances: Option<Vec<ManagedInstance>>,
  info: DeploymentInfo,
  error: Option<Arc<TargetError>>,
}

/// Result of one successful refresh.
#[derive(Default)]
struct Loaded {
  instances: Vec<ManagedInstance>,
  info: DeploymentInfo,
}

/// Refresh state shared between a target and its background task.
pub(crate) struct RemoteState {
  marker: watch::Sender<LoadMarker>,
  /// Set when the view is invalidated while a refresh is in flight.
  stale: AtomicBool,
  view: Mutex<RemoteView>,
  compute: Mutex<Option<Arc<dyn Compute>>>,
}

impl Default for RemoteState {
  fn default() -> Self {
    Self {
      marker: watch::Sender::new(LoadMarker::Dirty),
      stale: AtomicBool::new(false),
      view: Mutex::new(RemoteView::default()),
      compute: Mutex::new(None),
    }
  }
}

impl RemoteState {
  pub(crate) fn marker(&self) -> LoadMarker {
    *self.marker.borrow()
  }

  /// A reader must refresh before trusting the instance list.
  pub(crate) fn needs_refresh(&self) -> bool {
    match self.marker() {
      LoadMarker::Dirty => true,
      LoadMarker::Loading => false,
      LoadMarker::Loaded => self.view.lock().instances.is_none(),
    }
  }

  /// Invalidate the loaded view.
  ///
  /// An in-flight refresh runs to completion but publishes `Dirty`, so the
  /// next reader refreshes again.
  pub(crate) fn mark_dirty(&self) {
    self.marker.send_if_modified(|m| match *m {
      LoadMarker::Loaded => {
        *m = LoadMarker::Dirty;
        true
      }
      LoadMarker::Loading => {
        self.stale.store(true, Ordering::Release);
        false
      }
      LoadMarker::Dirty => false,
    });
  }

  /// Drop the cached compute client, e.g. after the provider changed.
  pub(crate) fn reset_compute(&self) {
    *self.compute.lock() = None;
  }

  /// Start a background refresh unless one is already in flight.
  pub(crate) fn refresh(
    self: &Arc<Self>,
    key: String,
    provider: Option<Arc<dyn CloudProvider>>,
    output: Option<OutputMap>,
    timeout: Duration,
  ) {
    let started = self.marker.send_if_modified(|m| {
      if *m == LoadMarker::Loading {
        false
      } else {
        *m = LoadMarker::Loading;
        self.stale.store(false, Ordering::Release);
        true
      }
    });
    if !started {
      debug!(key = %key, "refresh already in flight");
      return;
    }

    let handle = match Handle::try_current() {
      Ok(handle) => handle,
      Err(_) => {
        self.finish(&key, Err(TargetError::NoRuntime));
        return;
      }
    };

    let state = Arc::clone(self);
    handle.spawn(async move {
      debug!(key = %key, "refreshing remote state");
      let load = state.load_remote_refs(&key, provider.as_ref(), output.as_ref());
      let result = match tokio::time::timeout(timeout, load).await {
        Ok(result) => result,
        Err(_) => Err(TargetError::RefreshTimedOut(timeout)),
      };
      state.finish(&key, result);
    });
  }

  /// Wait for an in-flight refresh, if any.
  pub(crate) async fn join(&self) {
    let mut rx = self.marker.subscribe();
    // The sender is owned by `self`, so the channel cannot close while we wait.
    let _ = rx.wait_for(|m| *m != LoadMarker::Loading).await;
  }

  pub(crate) fn instances(&self) -> Vec<ManagedInstance> {
    self.view.lock().instances.clone().unwrap_or_default()
  }

  pub(crate) fn info(&self) -> DeploymentInfo {
    self.view.lock().info.clone()
  }

  pub(crate) fn error(&self) -> Option<Arc<TargetError>> {
    self.view.lock().error.clone()
  }

  /// Publish the outcome of a refresh and release waiting readers.
  fn finish(&self, key: &str, result: Result<Loaded, TargetError>) {
    {
      let mut view = self.view.lock();
      match result {
        Ok(loaded) => {
          info!(key = %key, instances = loaded.instances.len(), "remote state loaded");
          view.instances = Some(loaded.instances);
          view.info = loaded.info;
          view.error = None;
        }
        Err(e) => {
          error!(key = %key, error = %e, "remote refresh failed");
          view.error = Some(Arc::new(e));
        }
      }
    }
    self.marker.send_modify(|m| {
      *m = if self.stale.swap(false, Ordering::AcqRel) {
        debug!(key = %key, "view invalidated during refresh");
        LoadMarker::Dirty
      } else {
        LoadMarker::Loaded
      };
    });
  }

  async fn load_remote_refs(
    &self,
    key: &str,
    provider: Option<&Arc<dyn CloudProvider>>,
    output: Option<&OutputMap>,
  ) -> Result<Loaded, TargetError> {
    let Some(output) = output else {
      debug!(key = %key, "target is not deployed");
      return Ok(Loaded::default());
    };

    let cached = self.compute.lock().clone();
    let compute = match cached {
      Some(compute) => Some(compute),
      None => {
        let provider = provider.ok_or_else(|| TargetError::NoProvider(key.to_string()))?;
        provider.connect().await?;
        let compute = provider.compute().await?;
        if let Some(compute) = &compute {
          *self.compute.lock() = Some(compute.clone());
        }
        compute
      }
    };

    let info = DeploymentInfo::from_output(output);

    let mut instances = Vec::new();
    match output.get(MANAGED_INSTANCES_OUTPUT).map(|o| &o.value) {
      Some(OutputValue::Structured(serde_json::Value::Array(records))) => {
        for (index, record) in records.iter().enumerate() {
          insert_sorted(&mut instances, ManagedInstance::from_metadata(index, record)?);
        }
      }
      Some(_) => return Err(TargetError::InvalidInstanceList(key.to_string())),
      None => debug!(key = %key, "target does not have any managed instances"),
    }

    match compute {
      Some(compute) if !instances.is_empty() => {
        let ids: Vec<String> = instances.iter().map(|i| i.id.clone()).collect();
        let handles = compute.get_instances(&ids).await?;
        for instance in &mut instances {
          if let Some(handle) = handles.iter().find(|h| h.id() == instance.id) {
            instance.attach(handle.clone());
          }
        }
      }
      Some(_) => {}
      None => debug!(key = %key, "provider offers no compute, instances are unmanaged"),
    }

    Ok(Loaded { instances, info })
  }
}
