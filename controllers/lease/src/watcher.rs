//! Kubernetes resource watchers.
//!
//! Leases and schedules are reconciled by `kube_runtime::Controller` through
//! the generic `watch_resource()` helper. Every successful reconcile requeues
//! the object at the configured check interval, which is what drives the
//! periodic checks. Failed reconciles are requeued after the error's own
//! delay, or on the object's Fibonacci backoff.
//!
//! Schedules have no finalizer, so the controller never sees them go away.
//! A plain watch stream picks up their deletion and cancels the timer.

use std::fmt::Debug;
use std::future::Future;
use std::hash::Hash;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use crds::{API_GROUP, Lease, Schedule};
use futures::StreamExt;
use kube::{Api, Resource};
use kube_runtime::finalizer::{Event as FinalizerEvent, finalizer};
use kube_runtime::{
    Controller, WatchStreamExt,
    controller::{Action, Config as ControllerConfig},
    watcher,
};
use serde::de::DeserializeOwned;
use tracing::{debug, error, info, warn};

use crate::dispatcher::LeaseEvent;
use crate::error::ControllerError;
use crate::reconciler::Reconciler;

type ReconcileFuture = Pin<Box<dyn Future<Output = Result<Action, ControllerError>> + Send>>;

/// `namespace/name`, the key used for backoff and timers
fn object_key<K: Resource>(object: &K) -> String {
    format!(
        "{}/{}",
        object.meta().namespace.as_deref().unwrap_or_default(),
        object.meta().name.as_deref().unwrap_or("<unknown>")
    )
}

/// Runs a `kube_runtime::Controller` for `K` until the watch ends
async fn watch_resource<K, F>(
    api: Api<K>,
    reconciler: Arc<Reconciler>,
    reconcile_fn: F,
    resource_name: &'static str,
) -> Result<(), ControllerError>
where
    K: Resource + Clone + Send + Sync + 'static + Debug + DeserializeOwned,
    K::DynamicType: Default + Eq + Hash + Clone + Debug + Unpin,
    F: Fn(Arc<Reconciler>, Arc<K>) -> ReconcileFuture + Send + Sync + Clone + 'static,
{
    info!("Starting {} watcher", resource_name);

    let error_policy = move |obj: Arc<K>, error: &ControllerError, ctx: Arc<Reconciler>| {
        let key = object_key(obj.as_ref());
        match error.retry_delay() {
            Some(delay) => {
                warn!("{} {}: {}", resource_name, key, error);
                Action::requeue(delay)
            }
            None => {
                let delay = ctx.backoff.next_delay(&key);
                error!("Reconciliation error for {} {}, retrying in {:?}: {}", resource_name, key, delay, error);
                Action::requeue(delay)
            }
        }
    };

    let reconcile = move |obj: Arc<K>, ctx: Arc<Reconciler>| {
        let reconcile_fn = reconcile_fn.clone();
        async move {
            let key = object_key(obj.as_ref());
            debug!("Reconciling {} {}", resource_name, key);
            let action = reconcile_fn(Arc::clone(&ctx), obj).await?;
            ctx.backoff.reset(&key);
            Ok::<_, ControllerError>(action)
        }
    };

    // Debounce batches the status writes each reconcile makes
    let controller_config = ControllerConfig::default()
        .debounce(Duration::from_secs(5))
        .concurrency(3);

    Controller::new(api, watcher::Config::default())
        .with_config(controller_config)
        .run(reconcile, error_policy, reconciler)
        .for_each(|res| async move {
            if let Err(e) = res {
                error!("Controller error for {}: {}", resource_name, e);
            }
        })
        .await;

    Ok(())
}

/// Watches Lease and Schedule resources.
#[derive(Debug)]
pub struct Watcher {
    reconciler: Arc<Reconciler>,
    lease_api: Api<Lease>,
    schedule_api: Api<Schedule>,
}

impl Watcher {
    pub fn new(reconciler: Arc<Reconciler>, lease_api: Api<Lease>, schedule_api: Api<Schedule>) -> Self {
        Self {
            reconciler,
            lease_api,
            schedule_api,
        }
    }

    /// Reconciles leases behind the operator's finalizer
    pub async fn watch_leases(&self) -> Result<(), ControllerError> {
        let api = self.lease_api.clone();
        watch_resource(
            self.lease_api.clone(),
            Arc::clone(&self.reconciler),
            move |ctx: Arc<Reconciler>, lease: Arc<Lease>| -> ReconcileFuture {
                let api = api.clone();
                Box::pin(async move {
                    finalizer(&api, API_GROUP, lease, move |event| async move {
                        match event {
                            FinalizerEvent::Apply(lease) => {
                                let trigger = ctx.triggers.classify_lease(&lease);
                                ctx.handle_lease(trigger, &lease, Utc::now()).await?;
                                ctx.triggers.observe(lease.as_ref());
                                Ok::<_, ControllerError>(Action::requeue(ctx.config.lease_check_interval))
                            }
                            FinalizerEvent::Cleanup(lease) => {
                                ctx.handle_lease(LeaseEvent::Delete, &lease, Utc::now()).await?;
                                ctx.triggers.forget(lease.as_ref());
                                ctx.backoff.forget(&object_key(lease.as_ref()));
                                Ok(Action::await_change())
                            }
                        }
                    })
                    .await
                    .map_err(|e| ControllerError::Finalizer(Box::new(e)))
                })
            },
            "Lease",
        )
        .await
    }

    pub async fn watch_schedules(&self) -> Result<(), ControllerError> {
        watch_resource(
            self.schedule_api.clone(),
            Arc::clone(&self.reconciler),
            |ctx: Arc<Reconciler>, schedule: Arc<Schedule>| -> ReconcileFuture {
                Box::pin(async move {
                    let trigger = ctx.triggers.classify_schedule(&schedule);
                    ctx.handle_schedule(trigger, &schedule, Utc::now()).await?;
                    ctx.triggers.observe(schedule.as_ref());
                    Ok(Action::requeue(ctx.config.schedule_check_interval))
                })
            },
            "Schedule",
        )
        .await
    }

    /// Cancels pending deletions of schedules that are removed
    pub async fn watch_schedule_deletions(&self) -> Result<(), ControllerError> {
        info!("Starting Schedule deletion watcher");

        let mut stream = watcher(self.schedule_api.clone(), watcher::Config::default())
            .default_backoff()
            .boxed();

        while let Some(result) = stream.next().await {
            match result {
                Ok(watcher::Event::Delete(schedule)) => {
                    info!("Schedule deleted: {}", object_key(&schedule));
                    self.reconciler.remove_schedule(&schedule);
                }
                Ok(watcher::Event::InitDone) => {
                    debug!("Schedule deletion watcher initialization complete");
                }
                Ok(_) => {}
                Err(e) => warn!("Schedule deletion watcher error: {}", e),
            }
        }

        Err(ControllerError::Watch("Schedule deletion watch ended".to_string()))
    }
}
