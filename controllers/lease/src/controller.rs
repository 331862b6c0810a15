//! Main controller implementation.
//!
//! Installs the CRDs, wires the reconciler to the Kubernetes and OpenStack
//! clients, then runs the watchers and the metrics endpoint until one of
//! them stops.

use std::sync::Arc;
use std::time::Duration;

use crds::{Lease, Schedule};
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::{ListParams, Patch, PatchParams};
use kube::{Api, Client, CustomResourceExt, ResourceExt};
use openstack_client::OpenStackConnector;
use serde::de::DeserializeOwned;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::config::OperatorConfig;
use crate::error::ControllerError;
use crate::k8s::KubeClient;
use crate::metrics::{self, Metrics};
use crate::reconciler::Reconciler;
use crate::watcher::Watcher;

const FIELD_MANAGER: &str = "lease-controller";
const CRD_READY_ATTEMPTS: u32 = 10;
const CRD_READY_DELAY: Duration = Duration::from_secs(1);

/// Main controller for leases and schedules.
#[derive(Debug)]
pub struct Controller {
    lease_watcher: JoinHandle<Result<(), ControllerError>>,
    schedule_watcher: JoinHandle<Result<(), ControllerError>>,
    schedule_delete_watcher: JoinHandle<Result<(), ControllerError>>,
    metrics_server: JoinHandle<Result<(), ControllerError>>,
}

impl Controller {
    /// Installs the CRDs and starts every watcher.
    pub async fn new(config: OperatorConfig) -> Result<Self, ControllerError> {
        info!("Initializing Lease Controller");

        let kube_client = Client::try_default().await?;

        install_crds(&kube_client).await?;
        wait_for_api::<Lease>(&kube_client).await?;
        wait_for_api::<Schedule>(&kube_client).await?;

        let (lease_api, schedule_api): (Api<Lease>, Api<Schedule>) = match config.watch_namespace.as_deref() {
            Some(ns) => (Api::namespaced(kube_client.clone(), ns), Api::namespaced(kube_client.clone(), ns)),
            None => (Api::all(kube_client.clone()), Api::all(kube_client.clone())),
        };

        let metrics = Arc::new(Metrics::new()?);
        let metrics_bind_address = config.metrics_bind_address;
        let reconciler = Arc::new(Reconciler::new(
            Arc::new(KubeClient::new(kube_client)),
            Arc::new(OpenStackConnector),
            config,
            Arc::clone(&metrics),
        ));

        let watcher_instance = Arc::new(Watcher::new(reconciler, lease_api, schedule_api));

        let lease_watcher = {
            let watcher = Arc::clone(&watcher_instance);
            tokio::spawn(async move { watcher.watch_leases().await })
        };

        let schedule_watcher = {
            let watcher = Arc::clone(&watcher_instance);
            tokio::spawn(async move { watcher.watch_schedules().await })
        };

        let schedule_delete_watcher = {
            let watcher = watcher_instance;
            tokio::spawn(async move { watcher.watch_schedule_deletions().await })
        };

        let metrics_server = tokio::spawn(async move {
            info!("Serving metrics on {}", metrics_bind_address);
            metrics::serve(metrics_bind_address, metrics).await
        });

        Ok(Self {
            lease_watcher,
            schedule_watcher,
            schedule_delete_watcher,
            metrics_server,
        })
    }

    /// Runs the controller until a watcher or the metrics server stops.
    pub async fn run(mut self) -> Result<(), ControllerError> {
        info!("Lease Controller running");

        let result = tokio::select! {
            result = &mut self.lease_watcher => flatten("Lease watcher", result),
            result = &mut self.schedule_watcher => flatten("Schedule watcher", result),
            result = &mut self.schedule_delete_watcher => flatten("Schedule deletion watcher", result),
            result = &mut self.metrics_server => flatten("Metrics server", result),
        };

        self.lease_watcher.abort();
        self.schedule_watcher.abort();
        self.schedule_delete_watcher.abort();
        self.metrics_server.abort();

        if let Err(e) = &result {
            error!("Lease Controller stopped: {}", e);
        }
        result
    }
}

fn flatten(
    task: &str,
    result: Result<Result<(), ControllerError>, tokio::task::JoinError>,
) -> Result<(), ControllerError> {
    result
        .map_err(|e| ControllerError::Watch(format!("{} panicked: {}", task, e)))?
        .map_err(|e| ControllerError::Watch(format!("{} error: {}", task, e)))?;
    warn!("{} exited", task);
    Ok(())
}

/// Server-side applies the Lease and Schedule CRDs
async fn install_crds(client: &Client) -> Result<(), ControllerError> {
    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
    let params = PatchParams::apply(FIELD_MANAGER).force();

    for crd in [Lease::crd(), Schedule::crd()] {
        let name = crd.name_any();
        info!("Installing CRD {}", name);
        crds.patch(&name, &params, &Patch::Apply(&crd)).await?;
    }

    info!("CRDs installed/updated");
    Ok(())
}

/// Waits until the API for `K` answers a list request
async fn wait_for_api<K>(client: &Client) -> Result<(), ControllerError>
where
    K: kube::Resource<DynamicType = ()> + Clone + DeserializeOwned + std::fmt::Debug,
{
    let api: Api<K> = Api::all(client.clone());
    let plural = K::plural(&());

    for attempt in 1..=CRD_READY_ATTEMPTS {
        match api.list(&ListParams::default().limit(1)).await {
            Ok(_) => {
                info!("API for {} is available", plural);
                return Ok(());
            }
            Err(e) if attempt < CRD_READY_ATTEMPTS => {
                warn!(
                    "API for {} not yet available (attempt {}/{}): {}",
                    plural, attempt, CRD_READY_ATTEMPTS, e
                );
                tokio::time::sleep(CRD_READY_DELAY).await;
            }
            Err(e) => return Err(e.into()),
        }
    }

    Err(ControllerError::Watch(format!("API for {} never became available", plural)))
}
