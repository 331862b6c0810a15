//! Schedule CRD
//!
//! Deletes a referenced object once its `notAfter` time is reached.

use chrono::{DateTime, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[kube(
    group = "scheduling.azimuth.stackhpc.com",
    version = "v1alpha1",
    kind = "Schedule",
    namespaced,
    status = "ScheduleStatus",
    category = "azimuth",
    printcolumn = r#"{"name":"Ref Kind","type":"string","jsonPath":".spec.ref.kind"}"#,
    printcolumn = r#"{"name":"Ref Name","type":"string","jsonPath":".spec.ref.name"}"#,
    printcolumn = r#"{"name":"Not After","type":"string","format":"date-time","jsonPath":".spec.notAfter"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleSpec {
    /// Object that is deleted when the schedule expires
    #[serde(rename = "ref")]
    pub reference: ScheduleRef,

    /// Time after which the referenced object is deleted
    pub not_after: DateTime<Utc>,
}

/// Reference to an object in the same namespace as the schedule
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleRef {
    pub api_version: String,
    pub kind: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleStatus {
    /// Whether the referenced object has been seen
    #[serde(default)]
    pub ref_exists: bool,

    /// Whether deletion of the referenced object has been requested
    #[serde(default)]
    pub ref_delete_triggered: bool,

    /// Last time the status was written
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_schedule_ref_field_name() {
        let schedule: Schedule = serde_json::from_value(json!({
            "apiVersion": "scheduling.azimuth.stackhpc.com/v1alpha1",
            "kind": "Schedule",
            "metadata": {"name": "fake-schedule", "namespace": "fake-ns"},
            "spec": {
                "ref": {"apiVersion": "v1", "kind": "ConfigMap", "name": "fake-ref"},
                "notAfter": "2024-08-21T16:00:00Z",
            },
        }))
        .unwrap();

        assert_eq!(schedule.spec.reference.kind, "ConfigMap");
        assert_eq!(schedule.spec.reference.api_version, "v1");

        let value = serde_json::to_value(&schedule.spec).unwrap();
        assert_eq!(value["ref"]["apiVersion"], "v1");
        assert_eq!(value["notAfter"], "2024-08-21T16:00:00Z");
    }

    #[test]
    fn test_status_defaults() {
        let status: ScheduleStatus = serde_json::from_value(json!({})).unwrap();
        assert!(!status.ref_exists);
        assert!(!status.ref_delete_triggered);
        assert!(status.updated_at.is_none());

        let value = serde_json::to_value(ScheduleStatus {
            ref_exists: true,
            ..Default::default()
        })
        .unwrap();
        assert_eq!(value, json!({"refExists": true, "refDeleteTriggered": false}));
    }
}
