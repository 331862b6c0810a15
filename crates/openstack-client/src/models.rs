//! OpenStack API models
//!
//! Only the fields the operator reads are modelled; everything else in the
//! responses is ignored.

use serde::{Deserialize, Serialize};

/// Blazar lease as returned by the reservation API
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BlazarLease {
    pub id: String,
    pub name: String,
    /// Upper-case lease status, e.g. `PENDING` or `ACTIVE`
    pub status: String,
    #[serde(default)]
    pub reservations: Vec<Reservation>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Reservation {
    pub id: String,
    #[serde(default)]
    pub resource_type: Option<String>,
    /// JSON-encoded properties of the reserved resource
    #[serde(default)]
    pub resource_properties: Option<String>,
}

/// Request body for creating a Blazar lease
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CreateBlazarLease {
    pub name: String,
    pub start_date: String,
    pub end_date: String,
    pub reservations: Vec<ReservationRequest>,
    pub events: Vec<serde_json::Value>,
    pub before_end_date: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReservationRequest {
    pub amount: u32,
    pub flavor_id: String,
    pub resource_type: String,
    pub affinity: String,
}

/// Compute flavor
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Flavor {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct TokenResponse {
    pub token: TokenBody,
}

#[derive(Debug, Deserialize)]
pub(crate) struct TokenBody {
    pub user: TokenUser,
}

#[derive(Debug, Deserialize)]
pub(crate) struct TokenUser {
    pub id: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CatalogResponse {
    #[serde(default)]
    pub catalog: Vec<CatalogEntry>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CatalogEntry {
    #[serde(rename = "type")]
    pub service_type: String,
    #[serde(default)]
    pub endpoints: Vec<CatalogEndpoint>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CatalogEndpoint {
    pub interface: String,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub region_id: Option<String>,
    pub url: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Link {
    #[serde(default)]
    pub rel: Option<String>,
    pub href: String,
}
