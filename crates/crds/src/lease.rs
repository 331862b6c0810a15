//! Lease CRD
//!
//! Requests a reservation of cloud machines for a time window.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[kube(
    group = "scheduling.azimuth.stackhpc.com",
    version = "v1alpha1",
    kind = "Lease",
    namespaced,
    status = "LeaseStatus",
    category = "azimuth",
    printcolumn = r#"{"name":"Starts At","type":"string","format":"date-time","jsonPath":".spec.startsAt"}"#,
    printcolumn = r#"{"name":"Ends At","type":"string","format":"date-time","jsonPath":".spec.endsAt"}"#,
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct LeaseSpec {
    /// Name of the secret holding the `clouds.yaml` for the application credential
    #[schemars(length(min = 1))]
    pub cloud_credentials_secret_name: String,

    /// When the lease starts. Absent means "now".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub starts_at: Option<DateTime<Utc>>,

    /// When the lease ends. Absent means the lease never ends.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ends_at: Option<DateTime<Utc>>,

    /// Seconds before `endsAt` at which owners of the lease are deleted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grace_period: Option<u64>,

    /// Resources requested by the lease
    pub resources: ResourcesSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ResourcesSpec {
    /// Machines to reserve
    #[serde(default)]
    pub machines: Vec<Machine>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Machine {
    /// Flavor ID of the machines
    #[schemars(length(min = 1))]
    pub size_id: String,

    /// Number of machines of this size
    #[schemars(range(min = 1))]
    pub count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct LeaseStatus {
    /// Current phase of the lease
    #[serde(default)]
    pub phase: LeasePhase,

    /// Set only when the phase is `Error`
    #[serde(default)]
    pub error_message: String,

    /// Requested size ID to reserved size ID
    #[serde(default)]
    pub size_map: BTreeMap<String, String>,

    /// Requested size name to reserved size name
    #[serde(default)]
    pub size_name_map: BTreeMap<String, String>,
}

impl LeaseStatus {
    /// Moves the lease to `phase`.
    ///
    /// The error message is only kept for `Error`, and the size maps only
    /// survive while the lease is `Active`.
    pub fn set_phase(&mut self, phase: LeasePhase, error_message: Option<String>) {
        self.phase = phase;
        self.error_message = match phase {
            LeasePhase::Error => error_message.unwrap_or_default(),
            _ => String::new(),
        };
        if phase != LeasePhase::Active {
            self.size_map.clear();
            self.size_name_map.clear();
        }
    }
}

/// Lease lifecycle phase
///
/// Transitional phases mirror the states reported by Blazar, plus `Deleting`
/// for local teardown.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "PascalCase")]
pub enum LeasePhase {
    Pending,
    Active,
    Terminated,
    Error,
    Creating,
    Starting,
    Updating,
    Terminating,
    Deleting,
    #[default]
    Unknown,
}

impl LeasePhase {
    pub const ALL: [LeasePhase; 10] = [
        LeasePhase::Pending,
        LeasePhase::Active,
        LeasePhase::Terminated,
        LeasePhase::Error,
        LeasePhase::Creating,
        LeasePhase::Starting,
        LeasePhase::Updating,
        LeasePhase::Terminating,
        LeasePhase::Deleting,
        LeasePhase::Unknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LeasePhase::Pending => "Pending",
            LeasePhase::Active => "Active",
            LeasePhase::Terminated => "Terminated",
            LeasePhase::Error => "Error",
            LeasePhase::Creating => "Creating",
            LeasePhase::Starting => "Starting",
            LeasePhase::Updating => "Updating",
            LeasePhase::Terminating => "Terminating",
            LeasePhase::Deleting => "Deleting",
            LeasePhase::Unknown => "Unknown",
        }
    }

    /// Matches a phase name case-insensitively, e.g. Blazar's `ACTIVE`.
    pub fn from_name(name: &str) -> Option<LeasePhase> {
        Self::ALL
            .into_iter()
            .find(|phase| phase.as_str().eq_ignore_ascii_case(name))
    }
}

impl std::fmt::Display for LeasePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
