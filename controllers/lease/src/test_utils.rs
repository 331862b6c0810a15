//! Test utilities for unit testing reconcilers
//!
//! [`MockKubeClient`] stands in for the API server: secrets and referenced
//! objects live in memory, status patches and deletes are recorded. The
//! fixtures mirror a lease for 3 x `id1` and 5 x `id2` between 15:00 and
//! 16:00 on 2024-08-21.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use crds::{
    API_GROUP, Lease, LeasePhase, LeaseSpec, LeaseStatus, Machine, ResourcesSpec, Schedule, ScheduleRef,
    ScheduleSpec, ScheduleStatus,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use openstack_client::{BlazarLease, MockCloud, MockConnector, Reservation};
use serde_json::Value;

use crate::config::{BlazarMode, OperatorConfig};
use crate::error::ControllerError;
use crate::k8s::{KubeClientTrait, ObjectTarget, Propagation};
use crate::metrics::Metrics;
use crate::reconciler::Reconciler;

pub const NAMESPACE: &str = "fake-ns";
pub const LEASE_NAME: &str = "fake-lease";
pub const SECRET_NAME: &str = "fake-credential";
pub const SCHEDULE_NAME: &str = "fake-schedule";

/// A call received by [`MockKubeClient`]
#[derive(Debug, Clone, PartialEq)]
pub enum KubeCall {
    GetSecret(String),
    DeleteSecret(String),
    PatchLeaseStatus(String, Value),
    PatchScheduleStatus(String, Value),
    GetObject(ObjectTarget),
    DeleteObject(ObjectTarget, Propagation),
}

#[derive(Debug, Default)]
struct MockKubeState {
    secrets: HashMap<String, BTreeMap<String, Vec<u8>>>,
    objects: HashSet<String>,
    status_conflict: bool,
    versions: u64,
    calls: Vec<KubeCall>,
}

#[derive(Debug, Clone, Default)]
pub struct MockKubeClient {
    state: Arc<Mutex<MockKubeState>>,
}

fn key(namespace: &str, name: &str) -> String {
    format!("{}/{}", namespace, name)
}

fn object_key(namespace: &str, target: &ObjectTarget) -> String {
    format!("{}/{}", namespace, target)
}

impl MockKubeClient {
    /// Cluster holding the credential secret of the fake lease
    pub fn new() -> Self {
        Self::default().with_secret(NAMESPACE, SECRET_NAME, credential_data())
    }

    pub fn with_secret(self, namespace: &str, name: &str, data: BTreeMap<String, Vec<u8>>) -> Self {
        self.state.lock().unwrap().secrets.insert(key(namespace, name), data);
        self
    }

    pub fn without_secret(self, namespace: &str, name: &str) -> Self {
        self.state.lock().unwrap().secrets.remove(&key(namespace, name));
        self
    }

    pub fn with_object(self, namespace: &str, target: &ObjectTarget) -> Self {
        self.state.lock().unwrap().objects.insert(object_key(namespace, target));
        self
    }

    /// Makes every status patch fail with a resourceVersion conflict
    pub fn with_status_conflict(self) -> Self {
        self.state.lock().unwrap().status_conflict = true;
        self
    }

    pub fn calls(&self) -> Vec<KubeCall> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn lease_status_patches(&self) -> Vec<Value> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                KubeCall::PatchLeaseStatus(_, patch) => Some(patch),
                _ => None,
            })
            .collect()
    }

    pub fn schedule_status_patches(&self) -> Vec<Value> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                KubeCall::PatchScheduleStatus(_, patch) => Some(patch),
                _ => None,
            })
            .collect()
    }

    pub fn deleted_objects(&self) -> Vec<(ObjectTarget, Propagation)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                KubeCall::DeleteObject(target, propagation) => Some((target, propagation)),
                _ => None,
            })
            .collect()
    }

    pub fn has_secret(&self, namespace: &str, name: &str) -> bool {
        self.state.lock().unwrap().secrets.contains_key(&key(namespace, name))
    }

    fn record(&self, call: KubeCall) {
        self.state.lock().unwrap().calls.push(call);
    }
}

#[async_trait::async_trait]
impl KubeClientTrait for MockKubeClient {
    async fn get_secret_data(&self, namespace: &str, name: &str) -> Result<BTreeMap<String, Vec<u8>>, ControllerError> {
        self.record(KubeCall::GetSecret(key(namespace, name)));
        self.state
            .lock()
            .unwrap()
            .secrets
            .get(&key(namespace, name))
            .cloned()
            .ok_or_else(|| ControllerError::NotFound(format!("secret {}", key(namespace, name))))
    }

    async fn delete_secret(&self, namespace: &str, name: &str) -> Result<(), ControllerError> {
        self.record(KubeCall::DeleteSecret(key(namespace, name)));
        match self.state.lock().unwrap().secrets.remove(&key(namespace, name)) {
            Some(_) => Ok(()),
            None => Err(ControllerError::NotFound(format!("secret {}", key(namespace, name)))),
        }
    }

    async fn patch_lease_status(
        &self,
        namespace: &str,
        name: &str,
        patch: &Value,
    ) -> Result<Option<String>, ControllerError> {
        self.record(KubeCall::PatchLeaseStatus(key(namespace, name), patch.clone()));
        let mut state = self.state.lock().unwrap();
        if state.status_conflict {
            return Err(ControllerError::Conflict(format!("lease {}", key(namespace, name))));
        }
        state.versions += 1;
        Ok(Some(format!("newversion{}", state.versions)))
    }

    async fn patch_schedule_status(&self, namespace: &str, name: &str, patch: &Value) -> Result<(), ControllerError> {
        self.record(KubeCall::PatchScheduleStatus(key(namespace, name), patch.clone()));
        Ok(())
    }

    async fn get_object(&self, namespace: &str, target: &ObjectTarget) -> Result<(), ControllerError> {
        self.record(KubeCall::GetObject(target.clone()));
        if self.state.lock().unwrap().objects.contains(&object_key(namespace, target)) {
            Ok(())
        } else {
            Err(ControllerError::NotFound(object_key(namespace, target)))
        }
    }

    async fn delete_object(
        &self,
        namespace: &str,
        target: &ObjectTarget,
        propagation: Propagation,
    ) -> Result<(), ControllerError> {
        self.record(KubeCall::DeleteObject(target.clone(), propagation));
        if self.state.lock().unwrap().objects.remove(&object_key(namespace, target)) {
            Ok(())
        } else {
            Err(ControllerError::NotFound(object_key(namespace, target)))
        }
    }
}

/// Parses an RFC 3339 timestamp
pub fn at(timestamp: &str) -> DateTime<Utc> {
    timestamp.parse().unwrap()
}

pub fn credential_data() -> BTreeMap<String, Vec<u8>> {
    BTreeMap::from([("clouds.yaml".to_string(), b"NOT A REAL CREDENTIAL".to_vec())])
}

pub fn owner_target() -> ObjectTarget {
    ObjectTarget {
        api_version: "v1".to_string(),
        kind: "ConfigMap".to_string(),
        name: "fake-lease-owner".to_string(),
    }
}

/// The fake lease, starting at 15:00 and ending at 16:00
pub fn fake_lease(phase: Option<LeasePhase>) -> Lease {
    let mut lease = Lease::new(
        LEASE_NAME,
        LeaseSpec {
            cloud_credentials_secret_name: SECRET_NAME.to_string(),
            starts_at: Some(at("2024-08-21T15:00:00Z")),
            ends_at: Some(at("2024-08-21T16:00:00Z")),
            grace_period: None,
            resources: ResourcesSpec {
                machines: vec![
                    Machine {
                        size_id: "id1".to_string(),
                        count: 3,
                    },
                    Machine {
                        size_id: "id2".to_string(),
                        count: 5,
                    },
                ],
            },
        },
    );
    lease.metadata = ObjectMeta {
        name: Some(LEASE_NAME.to_string()),
        namespace: Some(NAMESPACE.to_string()),
        uid: Some("fake-lease-uid".to_string()),
        generation: Some(1),
        resource_version: Some("currentversion".to_string()),
        owner_references: Some(vec![OwnerReference {
            api_version: "v1".to_string(),
            kind: "ConfigMap".to_string(),
            name: "fake-lease-owner".to_string(),
            uid: "fake-uid".to_string(),
            block_owner_deletion: Some(true),
            ..Default::default()
        }]),
        finalizers: Some(vec![API_GROUP.to_string()]),
        ..Default::default()
    };
    if let Some(phase) = phase {
        let mut status = LeaseStatus {
            phase,
            ..Default::default()
        };
        if phase == LeasePhase::Active {
            status.size_map = BTreeMap::from([
                ("id1".to_string(), "newid1".to_string()),
                ("id2".to_string(), "newid2".to_string()),
            ]);
            status.size_name_map = BTreeMap::from([
                ("flavor1".to_string(), "newflavor1".to_string()),
                ("flavor2".to_string(), "newflavor2".to_string()),
            ]);
        }
        lease.status = Some(status);
    }
    lease
}

/// Blazar lease for the fake lease; active leases carry reservations
pub fn fake_blazar_lease(status: &str) -> BlazarLease {
    let reservations = if status == "ACTIVE" {
        vec![
            Reservation {
                id: "newid1".to_string(),
                resource_type: Some("flavor:instance".to_string()),
                resource_properties: Some(r#"{"id": "id1", "foo": "bar", "x": 1}"#.to_string()),
            },
            Reservation {
                id: "newid2".to_string(),
                resource_type: Some("flavor:instance".to_string()),
                resource_properties: Some(r#"{"id": "id2", "foo": "baz", "y": 2}"#.to_string()),
            },
            Reservation {
                id: "notused".to_string(),
                resource_type: Some("physical:host".to_string()),
                resource_properties: Some(String::new()),
            },
        ]
    } else {
        Vec::new()
    };
    BlazarLease {
        id: "blazarleaseid".to_string(),
        name: "az-fake-lease".to_string(),
        status: status.to_string(),
        reservations,
    }
}

/// Cloud knowing the flavors of the fake lease and their reserved copies
pub fn cloud_with_flavors() -> MockCloud {
    MockCloud::new()
        .with_flavor("id1", "flavor1")
        .with_flavor("id2", "flavor2")
        .with_flavor("newid1", "newflavor1")
        .with_flavor("newid2", "newflavor2")
}

pub fn fake_schedule(not_after: &str, status: Option<ScheduleStatus>) -> Schedule {
    let mut schedule = Schedule::new(
        SCHEDULE_NAME,
        ScheduleSpec {
            reference: ScheduleRef {
                api_version: "v1".to_string(),
                kind: "ConfigMap".to_string(),
                name: "fake-ref".to_string(),
            },
            not_after: at(not_after),
        },
    );
    schedule.metadata.namespace = Some(NAMESPACE.to_string());
    schedule.metadata.uid = Some("fake-schedule-uid".to_string());
    schedule.metadata.generation = Some(1);
    schedule.status = status;
    schedule
}

pub fn schedule_target() -> ObjectTarget {
    ObjectTarget {
        api_version: "v1".to_string(),
        kind: "ConfigMap".to_string(),
        name: "fake-ref".to_string(),
    }
}

pub fn config(blazar: BlazarMode) -> OperatorConfig {
    OperatorConfig {
        blazar,
        ..Default::default()
    }
}

/// Reconciler wired to the mocks
pub fn reconciler(kube: &MockKubeClient, cloud: &MockCloud, blazar: BlazarMode) -> Reconciler {
    Reconciler::new(
        Arc::new(kube.clone()),
        Arc::new(MockConnector::new(cloud.clone())),
        config(blazar),
        Arc::new(Metrics::new().unwrap()),
    )
}
