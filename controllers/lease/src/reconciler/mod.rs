//! Reconciliation logic for leases and schedules.
//!
//! - `lease`: the lease phase state machine and teardown
//! - `schedule`: delayed deletion of the object a schedule refers to

pub mod lease;
pub mod schedule;

#[cfg(test)]
mod schedule_test;

use std::sync::Arc;

use openstack_client::CloudConnector;

use crate::backoff::BackoffTracker;
use crate::config::OperatorConfig;
use crate::dispatcher::TriggerTracker;
use crate::k8s::KubeClientTrait;
use crate::metrics::Metrics;
use crate::timers::ScheduleTimers;

/// Reconciles Lease and Schedule resources.
pub struct Reconciler {
    pub(crate) kube: Arc<dyn KubeClientTrait>,
    pub(crate) cloud: Arc<dyn CloudConnector>,
    pub(crate) config: OperatorConfig,
    pub(crate) metrics: Arc<Metrics>,
    /// Pending schedule deletions
    pub(crate) timers: ScheduleTimers,
    pub(crate) triggers: TriggerTracker,
    /// Requeue delays after unexpected errors (namespace/name -> backoff)
    pub(crate) backoff: BackoffTracker,
}

impl Reconciler {
    pub fn new(
        kube: Arc<dyn KubeClientTrait>,
        cloud: Arc<dyn CloudConnector>,
        config: OperatorConfig,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            kube,
            cloud,
            config,
            metrics,
            timers: ScheduleTimers::new(),
            triggers: TriggerTracker::new(),
            backoff: BackoffTracker::new(),
        }
    }
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler").field("config", &self.config).finish_non_exhaustive()
    }
}
