//! Blazar adapter.
//!
//! Turns the machines requested by a lease into a Blazar lease request, and
//! reads the phase and size map back out of the Blazar lease. Blazar leases
//! are named after the Kubernetes lease with an `az-` prefix.

use std::collections::BTreeMap;

use crds::{LeasePhase, LeaseSpec};
use openstack_client::{
    BlazarLease, CloudSessionTrait, CreateBlazarLease, RESERVATION_SERVICE, ReservationRequest,
};
use serde::Deserialize;
use tracing::debug;

use crate::config::BlazarMode;
use crate::error::ControllerError;

const LEASE_NAME_PREFIX: &str = "az-";
const FLAVOR_RESOURCE_TYPE: &str = "flavor:instance";
const DATE_FORMAT: &str = "%Y-%m-%d %H:%M";

/// Name of the Blazar lease backing the lease `name`
pub fn blazar_lease_name(name: &str) -> String {
    format!("{}{}", LEASE_NAME_PREFIX, name)
}

/// Whether leases on this cloud go through Blazar.
///
/// In auto mode a missing `reservation` endpoint means "no".
pub fn blazar_enabled(mode: BlazarMode, cloud: &dyn CloudSessionTrait) -> Result<bool, ControllerError> {
    match mode {
        BlazarMode::Enabled => Ok(true),
        BlazarMode::Disabled => Ok(false),
        BlazarMode::Auto => Ok(cloud.probe_api(RESERVATION_SERVICE)?),
    }
}

/// Blazar cannot fetch a lease by name, so this scans the full listing.
pub async fn find_blazar_lease(
    cloud: &dyn CloudSessionTrait,
    name: &str,
) -> Result<Option<BlazarLease>, ControllerError> {
    let leases = cloud.list_blazar_leases().await?;
    debug!("Scanning {} Blazar leases for {}", leases.len(), name);
    Ok(leases.into_iter().find(|lease| lease.name == name))
}

/// Request for a Blazar lease named `name`, one reservation per size
pub fn create_request(name: &str, spec: &LeaseSpec) -> Result<CreateBlazarLease, ControllerError> {
    let ends_at = spec
        .ends_at
        .ok_or_else(|| ControllerError::InvalidResource(format!("Blazar lease {} needs an end time", name)))?;

    let mut reservations: Vec<ReservationRequest> = Vec::new();
    for machine in &spec.resources.machines {
        match reservations.iter_mut().find(|r| r.flavor_id == machine.size_id) {
            Some(reservation) => {
                reservation.amount = reservation.amount.checked_add(machine.count).ok_or_else(|| {
                    ControllerError::InvalidResource(format!(
                        "Blazar lease {} requests too many machines of size {}",
                        name, machine.size_id
                    ))
                })?;
            }
            None => reservations.push(ReservationRequest {
                amount: machine.count,
                flavor_id: machine.size_id.clone(),
                resource_type: FLAVOR_RESOURCE_TYPE.to_string(),
                affinity: "None".to_string(),
            }),
        }
    }

    Ok(CreateBlazarLease {
        name: name.to_string(),
        start_date: spec
            .starts_at
            .map_or_else(|| "now".to_string(), |starts_at| starts_at.format(DATE_FORMAT).to_string()),
        end_date: ends_at.format(DATE_FORMAT).to_string(),
        reservations,
        events: Vec::new(),
        before_end_date: None,
    })
}

/// Creates the Blazar lease.
///
/// Blazar answers 400 or 500 to requests it will never accept, e.g. not
/// enough capacity. Those become [`ControllerError::BlazarLeaseCreate`];
/// any other failure is returned as is and retried.
pub async fn create_blazar_lease(
    cloud: &dyn CloudSessionTrait,
    name: &str,
    spec: &LeaseSpec,
) -> Result<BlazarLease, ControllerError> {
    let request = create_request(name, spec)?;
    match cloud.create_blazar_lease(&request).await {
        Ok(lease) => Ok(lease),
        Err(e) if matches!(e.status_code(), Some(400 | 500)) => Err(ControllerError::BlazarLeaseCreate(format!(
            "error creating blazar lease - {}",
            error_message(e.response_body().unwrap_or_default())
        ))),
        Err(e) => Err(e.into()),
    }
}

#[derive(Deserialize)]
struct ErrorBody {
    error_message: String,
}

/// `error_message` of a Blazar error body, or the raw body
fn error_message(body: &str) -> String {
    serde_json::from_str::<ErrorBody>(body)
        .map(|parsed| parsed.error_message)
        .unwrap_or_else(|_| body.to_string())
}

/// Lease phase for a Blazar lease status such as `ACTIVE`
pub fn lease_phase(blazar_lease: &BlazarLease) -> Result<LeasePhase, ControllerError> {
    LeasePhase::from_name(&blazar_lease.status)
        .ok_or_else(|| ControllerError::UnknownPhase(blazar_lease.status.clone()))
}

#[derive(Deserialize)]
struct FlavorProperties {
    id: String,
}

/// Requested flavor ID to reservation ID.
///
/// Blazar creates a flavor per reservation with the reservation's ID, so
/// this is where the reserved machines have to be created.
pub fn size_map(blazar_lease: &BlazarLease) -> Result<BTreeMap<String, String>, ControllerError> {
    let mut sizes = BTreeMap::new();
    for reservation in &blazar_lease.reservations {
        if reservation.resource_type.as_deref() != Some(FLAVOR_RESOURCE_TYPE) {
            continue;
        }
        let Some(properties) = reservation.resource_properties.as_deref().filter(|p| !p.is_empty()) else {
            continue;
        };
        let properties: FlavorProperties = serde_json::from_str(properties)?;
        sizes.insert(properties.id, reservation.id.clone());
    }
    Ok(sizes)
}
