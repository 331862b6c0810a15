//! Trigger classification and dispatch.
//!
//! The watchers hand every reconcile to the dispatcher, which decides what
//! kind of trigger it is and calls the matching handler:
//!
//! - a lease being deleted is a `Delete`
//! - an object this process has not reconciled yet is a `Create` when it has
//!   no status, otherwise a `Resume`
//! - a schedule whose generation moved on is an `Update`
//! - anything else is a periodic `Check`
//!
//! Objects are only marked as seen after a successful reconcile, so a failed
//! `Create` is retried as a `Create`.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use crds::{Lease, LeasePhase, Schedule};
use kube::Resource;
use tracing::debug;

use crate::error::ControllerError;
use crate::reconciler::Reconciler;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseEvent {
    Create,
    Resume,
    Check,
    Delete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleEvent {
    Create,
    Update,
    Resume,
    Check,
}

/// Generation of every object reconciled successfully, keyed by UID
#[derive(Debug, Default)]
pub struct TriggerTracker {
    seen: Mutex<HashMap<String, Option<i64>>>,
}

impl TriggerTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn last_seen<K: Resource>(&self, object: &K) -> Option<Option<i64>> {
        let uid = object.meta().uid.as_deref()?;
        self.seen.lock().ok()?.get(uid).copied()
    }

    pub fn classify_lease(&self, lease: &Lease) -> LeaseEvent {
        if lease.meta().deletion_timestamp.is_some() {
            return LeaseEvent::Delete;
        }
        match self.last_seen(lease) {
            Some(_) => LeaseEvent::Check,
            None => match lease.status.as_ref().map(|s| s.phase) {
                None | Some(LeasePhase::Unknown) => LeaseEvent::Create,
                Some(_) => LeaseEvent::Resume,
            },
        }
    }

    pub fn classify_schedule(&self, schedule: &Schedule) -> ScheduleEvent {
        match self.last_seen(schedule) {
            Some(generation) if generation != schedule.meta().generation => ScheduleEvent::Update,
            Some(_) => ScheduleEvent::Check,
            None if schedule.status.is_none() => ScheduleEvent::Create,
            None => ScheduleEvent::Resume,
        }
    }

    /// Records a successful reconcile of `object`
    pub fn observe<K: Resource>(&self, object: &K) {
        let Some(uid) = object.meta().uid.clone() else {
            return;
        };
        if let Ok(mut seen) = self.seen.lock() {
            seen.insert(uid, object.meta().generation);
        }
    }

    pub fn forget<K: Resource>(&self, object: &K) {
        if let (Some(uid), Ok(mut seen)) = (object.meta().uid.as_deref(), self.seen.lock()) {
            seen.remove(uid);
        }
    }
}

impl Reconciler {
    pub async fn handle_lease(&self, event: LeaseEvent, lease: &Lease, now: DateTime<Utc>) -> Result<(), ControllerError> {
        debug!("Dispatching {:?} for lease {:?}/{:?}", event, lease.meta().namespace, lease.meta().name);
        match event {
            LeaseEvent::Create | LeaseEvent::Resume => self.reconcile_lease(lease, now).await,
            LeaseEvent::Check => self.check_lease(lease, now).await,
            LeaseEvent::Delete => self.delete_lease(lease).await,
        }
    }

    pub async fn handle_schedule(
        &self,
        event: ScheduleEvent,
        schedule: &Schedule,
        now: DateTime<Utc>,
    ) -> Result<(), ControllerError> {
        debug!(
            "Dispatching {:?} for schedule {:?}/{:?}",
            event,
            schedule.meta().namespace,
            schedule.meta().name
        );
        match event {
            ScheduleEvent::Create | ScheduleEvent::Update | ScheduleEvent::Resume => {
                self.reconcile_schedule(schedule, now).await
            }
            ScheduleEvent::Check => self.check_schedule(schedule, now).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BlazarMode;
    use crate::test_utils::*;
    use crds::ScheduleStatus;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
    use openstack_client::{CloudCall, MockCloud};

    #[test]
    fn test_classify_new_lease() {
        let tracker = TriggerTracker::new();
        assert_eq!(tracker.classify_lease(&fake_lease(None)), LeaseEvent::Create);
        assert_eq!(tracker.classify_lease(&fake_lease(Some(LeasePhase::Unknown))), LeaseEvent::Create);
        assert_eq!(tracker.classify_lease(&fake_lease(Some(LeasePhase::Active))), LeaseEvent::Resume);
    }

    #[test]
    fn test_classify_seen_lease() {
        let tracker = TriggerTracker::new();
        let lease = fake_lease(Some(LeasePhase::Pending));
        tracker.observe(&lease);
        assert_eq!(tracker.classify_lease(&lease), LeaseEvent::Check);

        tracker.forget(&lease);
        assert_eq!(tracker.classify_lease(&lease), LeaseEvent::Resume);
    }

    #[test]
    fn test_classify_deleted_lease() {
        let tracker = TriggerTracker::new();
        let mut lease = fake_lease(Some(LeasePhase::Active));
        lease.metadata.deletion_timestamp = Some(Time(at("2024-08-21T15:30:00Z")));
        assert_eq!(tracker.classify_lease(&lease), LeaseEvent::Delete);
    }

    #[test]
    fn test_classify_schedule() {
        let tracker = TriggerTracker::new();
        let mut schedule = fake_schedule("2024-08-21T16:00:00Z", None);
        assert_eq!(tracker.classify_schedule(&schedule), ScheduleEvent::Create);

        schedule.status = Some(ScheduleStatus::default());
        assert_eq!(tracker.classify_schedule(&schedule), ScheduleEvent::Resume);

        tracker.observe(&schedule);
        assert_eq!(tracker.classify_schedule(&schedule), ScheduleEvent::Check);

        schedule.metadata.generation = Some(2);
        assert_eq!(tracker.classify_schedule(&schedule), ScheduleEvent::Update);
    }

    #[tokio::test]
    async fn test_check_runs_deletion_scheduler() {
        let kube = MockKubeClient::new().with_object(NAMESPACE, &owner_target());
        let cloud = MockCloud::new();
        let reconciler = reconciler(&kube, &cloud, BlazarMode::Disabled);

        reconciler
            .handle_lease(LeaseEvent::Check, &fake_lease(Some(LeasePhase::Active)), at("2024-08-21T15:55:00Z"))
            .await
            .unwrap();
        assert_eq!(kube.deleted_objects().len(), 1);
    }

    #[tokio::test]
    async fn test_create_does_not_delete_owners() {
        let kube = MockKubeClient::new().with_object(NAMESPACE, &owner_target());
        let cloud = MockCloud::new();
        let reconciler = reconciler(&kube, &cloud, BlazarMode::Disabled);

        reconciler
            .handle_lease(LeaseEvent::Create, &fake_lease(None), at("2024-08-21T15:55:00Z"))
            .await
            .unwrap();
        assert!(kube.deleted_objects().is_empty());
        assert!(!cloud.calls().contains(&CloudCall::ListBlazarLeases));
    }
}
