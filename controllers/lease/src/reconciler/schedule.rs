//! Schedule reconciler.
//!
//! A schedule deletes the object it refers to once `notAfter` has passed.
//! Creating, updating or resuming a schedule checks that the reference
//! exists and installs a timer that fires 15 minutes before `notAfter`; the
//! periodic check deletes the reference if the timer did not. Once the
//! delete has been triggered the schedule is left alone.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, TimeDelta, Utc};
use crds::Schedule;
use serde_json::{Map, Value, json};
use tracing::{debug, error, info};

use crate::error::ControllerError;
use crate::k8s::{KubeClientTrait, ObjectTarget, Propagation, namespace_and_name};
use crate::reconciler::Reconciler;

const DELETE_LEAD_MINUTES: i64 = 15;

impl Reconciler {
    /// Handles a schedule that was created, updated or seen for the first time since start
    pub async fn reconcile_schedule(&self, schedule: &Schedule, now: DateTime<Utc>) -> Result<(), ControllerError> {
        let (namespace, name) = namespace_and_name(schedule)?;
        let target = ObjectTarget::from(&schedule.spec.reference);

        if schedule.status.as_ref().is_some_and(|s| s.ref_delete_triggered) {
            debug!("Schedule {}/{} already deleted {}", namespace, name, target);
            self.metrics.record_schedule(schedule);
            return Ok(());
        }

        self.kube.get_object(&namespace, &target).await?;
        info!("Schedule {}/{} found {}", namespace, name, target);

        let mut schedule = schedule.clone();
        let mut status = Map::new();
        status.insert("refExists".to_string(), Value::Bool(true));
        patch_status(self.kube.as_ref(), &namespace, &name, status, now).await?;
        let current = schedule.status.get_or_insert_with(Default::default);
        current.ref_exists = true;
        current.updated_at = Some(now);

        let fire_at = schedule.spec.not_after - TimeDelta::minutes(DELETE_LEAD_MINUTES);
        let delay = (fire_at - now).to_std().unwrap_or(Duration::ZERO);
        info!("Schedule {}/{} will delete {} in {:?}", namespace, name, target, delay);

        let kube = Arc::clone(&self.kube);
        let key = format!("{}/{}", namespace, name);
        self.timers.install(&key, async move {
            tokio::time::sleep(delay).await;
            info!("Schedule {}/{} timer fired", namespace, name);
            if let Err(e) = delete_reference(kube.as_ref(), &namespace, &name, &target, Utc::now()).await {
                error!("Schedule {}/{} failed to delete {}: {}", namespace, name, target, e);
            }
        });

        self.metrics.record_schedule(&schedule);
        Ok(())
    }

    /// Periodic check of a schedule
    pub async fn check_schedule(&self, schedule: &Schedule, now: DateTime<Utc>) -> Result<(), ControllerError> {
        let (namespace, name) = namespace_and_name(schedule)?;
        let target = ObjectTarget::from(&schedule.spec.reference);
        let mut schedule = schedule.clone();
        let mut status = schedule.status.clone().unwrap_or_default();

        if !status.ref_exists {
            self.kube.get_object(&namespace, &target).await?;
            let mut patch = Map::new();
            patch.insert("refExists".to_string(), Value::Bool(true));
            patch_status(self.kube.as_ref(), &namespace, &name, patch, now).await?;
            status.ref_exists = true;
            status.updated_at = Some(now);
        }

        if !status.ref_delete_triggered {
            if now >= schedule.spec.not_after {
                delete_reference(self.kube.as_ref(), &namespace, &name, &target, now).await?;
                status.ref_delete_triggered = true;
                status.updated_at = Some(now);
            } else {
                debug!("Schedule {}/{} has not expired", namespace, name);
            }
        }

        schedule.status = Some(status);
        self.metrics.record_schedule(&schedule);
        Ok(())
    }

    /// Cancels the pending deletion of a schedule that no longer exists
    pub fn remove_schedule(&self, schedule: &Schedule) {
        let Ok((namespace, name)) = namespace_and_name(schedule) else {
            return;
        };
        if self.timers.cancel(&format!("{}/{}", namespace, name)) {
            info!("Cancelled timer for removed schedule {}/{}", namespace, name);
        }
        self.triggers.forget(schedule);
        self.backoff.forget(&format!("{}/{}", namespace, name));
        self.metrics.forget_schedule(schedule);
    }
}

/// Deletes the reference and records that in the schedule status
async fn delete_reference(
    kube: &dyn KubeClientTrait,
    namespace: &str,
    name: &str,
    target: &ObjectTarget,
    now: DateTime<Utc>,
) -> Result<(), ControllerError> {
    info!("Schedule {}/{} deleting {}", namespace, name, target);
    match kube.delete_object(namespace, target, Propagation::Default).await {
        Ok(()) => {}
        Err(ControllerError::NotFound(_)) => debug!("{} in {} already deleted", target, namespace),
        Err(e) => return Err(e),
    }
    let mut status = Map::new();
    status.insert("refDeleteTriggered".to_string(), Value::Bool(true));
    patch_status(kube, namespace, name, status, now).await
}

/// Merges `status` into the schedule status, stamping `updatedAt`
async fn patch_status(
    kube: &dyn KubeClientTrait,
    namespace: &str,
    name: &str,
    mut status: Map<String, Value>,
    now: DateTime<Utc>,
) -> Result<(), ControllerError> {
    status.insert(
        "updatedAt".to_string(),
        Value::String(now.to_rfc3339_opts(SecondsFormat::Secs, true)),
    );
    debug!("Updating status of schedule {}/{}: {:?}", namespace, name, status);
    kube.patch_schedule_status(namespace, name, &json!({ "status": status })).await
}
