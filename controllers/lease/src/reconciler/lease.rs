//! Lease reconciler.
//!
//! Moves a lease through its phases. Leases without an end time, and leases
//! on clouds where Blazar is not used, follow the wall clock: `Pending` until
//! `startsAt`, then `Active`. Everything else follows the Blazar lease named
//! `az-<name>`, which is created while the lease is `Pending`.
//!
//! Deletion tears down the Blazar lease and the application credential, then
//! deletes the credential secret, after which the finalizer is removed.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use crds::{API_GROUP, Lease, LeasePhase};
use kube::ResourceExt;
use openstack_client::CloudSessionTrait;
use tracing::{debug, error, info, warn};

use crate::blazar::{self, blazar_enabled, blazar_lease_name, find_blazar_lease};
use crate::error::ControllerError;
use crate::k8s::namespace_and_name;
use crate::reconciler::Reconciler;
use crate::scheduler::delete_owners_if_due;
use crate::sizes::size_name_map;
use crate::status::LeaseStatusWriter;

/// Retry delay while waiting on other finalizers or Blazar
const TEARDOWN_RETRY_DELAY: Duration = Duration::from_secs(15);

fn phase(lease: &Lease) -> LeasePhase {
    lease.status.as_ref().map(|s| s.phase).unwrap_or_default()
}

fn set_phase(lease: &mut Lease, phase: LeasePhase, error_message: Option<String>) {
    lease
        .status
        .get_or_insert_with(Default::default)
        .set_phase(phase, error_message);
}

impl Reconciler {
    /// Handles a lease that was created, or seen for the first time since start
    pub async fn reconcile_lease(&self, lease: &Lease, now: DateTime<Utc>) -> Result<(), ControllerError> {
        let mut lease = lease.clone();
        let mut writer = LeaseStatusWriter::new(self.kube.as_ref(), &lease);
        self.mark_pending(&mut lease, &mut writer).await?;

        let cloud = self.open_session(&lease).await?;
        let result = self.refresh_lease(&mut lease, &mut writer, cloud.as_ref(), now).await;
        self.metrics.record_lease(&lease);
        result
    }

    /// Periodic check: refreshes the phase, then deletes the owners of
    /// leases that are within their grace period of ending.
    pub async fn check_lease(&self, lease: &Lease, now: DateTime<Utc>) -> Result<(), ControllerError> {
        let mut lease = lease.clone();
        let mut writer = LeaseStatusWriter::new(self.kube.as_ref(), &lease);
        self.mark_pending(&mut lease, &mut writer).await?;

        let cloud = self.open_session(&lease).await?;
        let refreshed = self.refresh_lease(&mut lease, &mut writer, cloud.as_ref(), now).await;
        let scheduled = delete_owners_if_due(self.kube.as_ref(), &lease, now, self.config.default_grace_period).await;
        self.metrics.record_lease(&lease);

        refreshed?;
        scheduled.map(|_| ())
    }

    /// Tears down the cloud resources of a lease that is being deleted
    pub async fn delete_lease(&self, lease: &Lease) -> Result<(), ControllerError> {
        let (namespace, name) = namespace_and_name(lease)?;

        // Teardown must be the last thing to happen to the lease
        if lease.finalizers().iter().any(|f| f != API_GROUP) {
            return Err(ControllerError::temporary(
                "waiting for finalizers to be removed",
                TEARDOWN_RETRY_DELAY,
            ));
        }

        let mut lease = lease.clone();
        if phase(&lease) != LeasePhase::Deleting {
            let mut writer = LeaseStatusWriter::new(self.kube.as_ref(), &lease);
            set_phase(&mut lease, LeasePhase::Deleting, None);
            writer.save(&mut lease).await?;
            self.metrics.record_lease(&lease);
        }

        let secret_name = lease.spec.cloud_credentials_secret_name.as_str();
        match self.kube.get_secret_data(&namespace, secret_name).await {
            Ok(data) => {
                let cloud = self.cloud.connect(&data).await?;
                if cloud.is_authenticated() {
                    self.teardown_cloud(&lease, cloud.as_ref()).await?;
                } else {
                    // The application credential is gone but the secret was left behind
                    warn!(
                        "Cloud credential for lease {}/{} no longer authenticates, skipping cloud teardown",
                        namespace, name
                    );
                }
            }
            Err(ControllerError::NotFound(_)) => {
                warn!("Cloud credential for lease {}/{} is missing, skipping cloud teardown", namespace, name);
            }
            Err(e) => return Err(e),
        }

        match self.kube.delete_secret(&namespace, secret_name).await {
            Ok(()) => info!("Deleted cloud credential secret {}/{}", namespace, secret_name),
            Err(ControllerError::NotFound(_)) => {
                debug!("Cloud credential secret {}/{} already deleted", namespace, secret_name);
            }
            Err(e) => return Err(e),
        }
        self.metrics.forget_lease(&lease);
        Ok(())
    }

    async fn teardown_cloud(&self, lease: &Lease, cloud: &dyn CloudSessionTrait) -> Result<(), ControllerError> {
        let (namespace, name) = namespace_and_name(lease)?;

        if lease.spec.ends_at.is_some() && blazar_enabled(self.config.blazar, cloud)? {
            let blazar_name = blazar_lease_name(&name);
            match find_blazar_lease(cloud, &blazar_name).await? {
                Some(blazar_lease) => {
                    info!("Deleting Blazar lease {} for lease {}/{}", blazar_lease.id, namespace, name);
                    cloud.delete_blazar_lease(&blazar_lease.id).await?;
                    return Err(ControllerError::temporary(
                        "waiting for blazar lease to delete",
                        TEARDOWN_RETRY_DELAY,
                    ));
                }
                None => warn!("Blazar lease {} for lease {}/{} does not exist", blazar_name, namespace, name),
            }
        } else {
            debug!("Blazar is not used for lease {}/{}", namespace, name);
        }

        match cloud.delete_application_credential().await {
            Ok(()) => info!("Deleted application credential for lease {}/{}", namespace, name),
            Err(e) if e.status_code() == Some(403) => {
                warn!("Unable to delete application credential for lease {}/{}: {}", namespace, name, e);
            }
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }

    /// Gives new leases a visible phase before any cloud call is made
    async fn mark_pending(&self, lease: &mut Lease, writer: &mut LeaseStatusWriter<'_>) -> Result<(), ControllerError> {
        if phase(lease) == LeasePhase::Unknown {
            set_phase(lease, LeasePhase::Pending, None);
            writer.save(lease).await?;
        }
        Ok(())
    }

    async fn open_session(&self, lease: &Lease) -> Result<Box<dyn CloudSessionTrait>, ControllerError> {
        let (namespace, _) = namespace_and_name(lease)?;
        let data = self
            .kube
            .get_secret_data(&namespace, &lease.spec.cloud_credentials_secret_name)
            .await?;
        Ok(self.cloud.connect(&data).await?)
    }

    async fn refresh_lease(
        &self,
        lease: &mut Lease,
        writer: &mut LeaseStatusWriter<'_>,
        cloud: &dyn CloudSessionTrait,
        now: DateTime<Utc>,
    ) -> Result<(), ControllerError> {
        let (namespace, name) = namespace_and_name(lease)?;

        if lease.spec.ends_at.is_none() {
            debug!("Lease {}/{} has no end time", namespace, name);
            return self.refresh_from_clock(lease, writer, cloud, now).await;
        }
        if !blazar_enabled(self.config.blazar, cloud)? {
            debug!("Not using Blazar for lease {}/{}", namespace, name);
            return self.refresh_from_clock(lease, writer, cloud, now).await;
        }

        let blazar_name = blazar_lease_name(&name);
        let mut blazar_lease = find_blazar_lease(cloud, &blazar_name).await?;
        if blazar_lease.is_none() {
            // Only a pending lease gets a Blazar lease. Otherwise it failed to
            // create, was deleted behind our back, or Blazar was enabled later.
            if phase(lease) == LeasePhase::Pending {
                info!("Creating Blazar lease {} for lease {}/{}", blazar_name, namespace, name);
                match blazar::create_blazar_lease(cloud, &blazar_name, &lease.spec).await {
                    Ok(created) => blazar_lease = Some(created),
                    Err(ControllerError::BlazarLeaseCreate(message)) => {
                        error!("Lease {}/{}: {}", namespace, name, message);
                        set_phase(lease, LeasePhase::Error, Some(message));
                        return writer.save(lease).await;
                    }
                    Err(e) => return Err(e),
                }
            } else {
                warn!(
                    "Lease {}/{} is {} but Blazar lease {} does not exist",
                    namespace,
                    name,
                    phase(lease),
                    blazar_name
                );
            }
        }

        let Some(blazar_lease) = blazar_lease else {
            return Ok(());
        };
        info!(
            "Blazar lease {} for lease {}/{} has status {}",
            blazar_lease.id, namespace, name, blazar_lease.status
        );
        let new_phase = blazar::lease_phase(&blazar_lease)?;
        set_phase(lease, new_phase, None);
        if new_phase == LeasePhase::Active {
            let sizes = blazar::size_map(&blazar_lease)?;
            let names = size_name_map(cloud, &sizes).await;
            let status = lease.status.get_or_insert_with(Default::default);
            status.size_map = sizes;
            status.size_name_map = names;
        }
        writer.save(lease).await
    }

    /// Phase from `startsAt` alone; active leases keep their requested sizes
    async fn refresh_from_clock(
        &self,
        lease: &mut Lease,
        writer: &mut LeaseStatusWriter<'_>,
        cloud: &dyn CloudSessionTrait,
        now: DateTime<Utc>,
    ) -> Result<(), ControllerError> {
        let started = lease.spec.starts_at.is_none_or(|starts_at| now >= starts_at);
        if started {
            let sizes: BTreeMap<String, String> = lease
                .spec
                .resources
                .machines
                .iter()
                .map(|machine| (machine.size_id.clone(), machine.size_id.clone()))
                .collect();
            let names = size_name_map(cloud, &sizes).await;
            set_phase(lease, LeasePhase::Active, None);
            let status = lease.status.get_or_insert_with(Default::default);
            status.size_map = sizes;
            status.size_name_map = names;
        } else {
            set_phase(lease, LeasePhase::Pending, None);
        }
        writer.save(lease).await
    }
}
