//! Lease status writes.
//!
//! Every write carries the lease's last known `resourceVersion`, so a write
//! based on a stale read is rejected by the API server instead of silently
//! overwriting a newer status. A rejected write surfaces as a short
//! temporary error and the whole reconcile is retried.
//!
//! The write is a merge patch of the complete status. Map keys the lease
//! had at the last successful write but no longer has are sent as `null`,
//! which makes the patch equivalent to replacing the status.

use std::collections::BTreeMap;
use std::time::Duration;

use crds::{Lease, LeaseStatus};
use serde_json::{Map, Value, json};
use tracing::debug;

use crate::error::ControllerError;
use crate::k8s::{KubeClientTrait, namespace_and_name};

/// Retry delay after a resourceVersion conflict
pub const CONFLICT_RETRY_DELAY: Duration = Duration::from_secs(1);

pub struct LeaseStatusWriter<'a> {
    kube: &'a dyn KubeClientTrait,
    /// Status as of the last successful write (or the initial read)
    persisted: LeaseStatus,
}

impl<'a> LeaseStatusWriter<'a> {
    pub fn new(kube: &'a dyn KubeClientTrait, lease: &Lease) -> Self {
        Self {
            kube,
            persisted: lease.status.clone().unwrap_or_default(),
        }
    }

    /// Writes `lease.status` and moves `lease` to the new resourceVersion.
    pub async fn save(&mut self, lease: &mut Lease) -> Result<(), ControllerError> {
        let (namespace, name) = namespace_and_name(lease)?;
        let current = lease.status.clone().unwrap_or_default();
        let patch = status_patch(
            &self.persisted,
            &current,
            lease.metadata.resource_version.as_deref(),
        );

        debug!("Saving status for lease {}/{}: phase {}", namespace, name, current.phase);
        match self.kube.patch_lease_status(&namespace, &name, &patch).await {
            Ok(resource_version) => {
                if resource_version.is_some() {
                    lease.metadata.resource_version = resource_version;
                }
                self.persisted = current;
                Ok(())
            }
            Err(ControllerError::Conflict(_)) => Err(ControllerError::temporary(
                "conflict updating status",
                CONFLICT_RETRY_DELAY,
            )),
            Err(e) => Err(e),
        }
    }
}

/// Merge patch that turns `previous` into `current`
pub fn status_patch(previous: &LeaseStatus, current: &LeaseStatus, resource_version: Option<&str>) -> Value {
    let status = json!({
        "phase": current.phase,
        "errorMessage": current.error_message,
        "sizeMap": map_patch(&previous.size_map, &current.size_map),
        "sizeNameMap": map_patch(&previous.size_name_map, &current.size_name_map),
    });
    match resource_version {
        Some(rv) => json!({"metadata": {"resourceVersion": rv}, "status": status}),
        None => json!({"status": status}),
    }
}

fn map_patch(previous: &BTreeMap<String, String>, current: &BTreeMap<String, String>) -> Value {
    let mut patch = Map::new();
    for key in previous.keys().filter(|k| !current.contains_key(*k)) {
        patch.insert(key.clone(), Value::Null);
    }
    for (key, value) in current {
        patch.insert(key.clone(), Value::String(value.clone()));
    }
    Value::Object(patch)
}
