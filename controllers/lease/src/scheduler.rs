//! Deletion scheduler.
//!
//! Once a lease is within its grace period of ending, the objects that own
//! it are deleted with foreground propagation, so they are gone before the
//! reservation ends.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use crds::Lease;
use tracing::{debug, info};

use crate::error::ControllerError;
use crate::k8s::{KubeClientTrait, ObjectTarget, Propagation, namespace_and_name};

/// Time from which the owners of a lease ending at `ends_at` are deleted
pub fn deletion_threshold(
    ends_at: DateTime<Utc>,
    grace_period: Option<u64>,
    default_grace_period: Duration,
) -> DateTime<Utc> {
    let seconds = grace_period.unwrap_or(default_grace_period.as_secs());
    let grace = i64::try_from(seconds)
        .ok()
        .and_then(TimeDelta::try_seconds)
        .unwrap_or(TimeDelta::MAX);
    ends_at.checked_sub_signed(grace).unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Deletes the owners of `lease` if it is within its grace period.
///
/// Returns whether the threshold was reached. Owners that are already gone
/// are skipped.
pub async fn delete_owners_if_due(
    kube: &dyn KubeClientTrait,
    lease: &Lease,
    now: DateTime<Utc>,
    default_grace_period: Duration,
) -> Result<bool, ControllerError> {
    let Some(ends_at) = lease.spec.ends_at else {
        return Ok(false);
    };
    let (namespace, name) = namespace_and_name(lease)?;
    let threshold = deletion_threshold(ends_at, lease.spec.grace_period, default_grace_period);
    if now < threshold {
        debug!("Lease {}/{} is not within its grace period (until {})", namespace, name, threshold);
        return Ok(false);
    }

    info!("Lease {}/{} ends within its grace period, deleting owners", namespace, name);
    for owner in lease.metadata.owner_references.iter().flatten() {
        let target = ObjectTarget::from(owner);
        match kube.delete_object(&namespace, &target, Propagation::Foreground).await {
            Ok(()) => info!("Deleted owner {} of lease {}/{}", target, namespace, name),
            Err(ControllerError::NotFound(_)) => {
                debug!("Owner {} of lease {}/{} already deleted", target, namespace, name);
            }
            Err(e) => return Err(e),
        }
    }
    Ok(true)
}
