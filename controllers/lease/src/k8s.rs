//! Kubernetes operations used by the reconcilers.
//!
//! The reconcilers only touch the cluster through [`KubeClientTrait`], so
//! they can be tested against the in-memory mock in `test_utils`.

use std::collections::BTreeMap;

use crds::{Lease, Schedule, ScheduleRef};
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::api::{DeleteParams, DynamicObject, Patch, PatchParams};
use kube::core::{ApiResource, GroupVersionKind};
use kube::{Api, Client, Resource, ResourceExt};
use serde_json::Value;
use tracing::debug;

use crate::error::ControllerError;

/// A namespaced object identified by apiVersion, kind and name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectTarget {
    pub api_version: String,
    pub kind: String,
    pub name: String,
}

impl ObjectTarget {
    /// Group and version, e.g. `apps/v1` -> (`apps`, `v1`), `v1` -> (``, `v1`)
    fn group_version(&self) -> (&str, &str) {
        match self.api_version.split_once('/') {
            Some((group, version)) => (group, version),
            None => ("", self.api_version.as_str()),
        }
    }
}

impl std::fmt::Display for ObjectTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{} {}", self.api_version, self.kind, self.name)
    }
}

impl From<&OwnerReference> for ObjectTarget {
    fn from(owner: &OwnerReference) -> Self {
        Self {
            api_version: owner.api_version.clone(),
            kind: owner.kind.clone(),
            name: owner.name.clone(),
        }
    }
}

impl From<&ScheduleRef> for ObjectTarget {
    fn from(reference: &ScheduleRef) -> Self {
        Self {
            api_version: reference.api_version.clone(),
            kind: reference.kind.clone(),
            name: reference.name.clone(),
        }
    }
}

/// How dependents of a deleted object are removed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Propagation {
    /// Server default for the kind
    Default,
    /// The object stays until its dependents are gone
    Foreground,
}

#[async_trait::async_trait]
pub trait KubeClientTrait: Send + Sync {
    /// Decoded data of a secret
    async fn get_secret_data(&self, namespace: &str, name: &str) -> Result<BTreeMap<String, Vec<u8>>, ControllerError>;

    async fn delete_secret(&self, namespace: &str, name: &str) -> Result<(), ControllerError>;

    /// Patches the lease status subresource and returns the new resourceVersion
    async fn patch_lease_status(
        &self,
        namespace: &str,
        name: &str,
        patch: &Value,
    ) -> Result<Option<String>, ControllerError>;

    async fn patch_schedule_status(&self, namespace: &str, name: &str, patch: &Value) -> Result<(), ControllerError>;

    /// Fails with `NotFound` if the object does not exist
    async fn get_object(&self, namespace: &str, target: &ObjectTarget) -> Result<(), ControllerError>;

    async fn delete_object(
        &self,
        namespace: &str,
        target: &ObjectTarget,
        propagation: Propagation,
    ) -> Result<(), ControllerError>;
}

/// [`KubeClientTrait`] backed by the API server
#[derive(Clone)]
pub struct KubeClient {
    client: Client,
}

impl KubeClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    async fn dynamic_api(&self, namespace: &str, target: &ObjectTarget) -> Result<Api<DynamicObject>, ControllerError> {
        let (group, version) = target.group_version();
        let gvk = GroupVersionKind::gvk(group, version, &target.kind);
        // Discovery knows the real plural; fall back to the naive one
        let resource = match kube::discovery::pinned_kind(&self.client, &gvk).await {
            Ok((resource, _capabilities)) => resource,
            Err(e) => {
                debug!("Discovery failed for {}: {}, guessing plural", target, e);
                ApiResource::from_gvk(&gvk)
            }
        };
        Ok(Api::namespaced_with(self.client.clone(), namespace, &resource))
    }
}

#[async_trait::async_trait]
impl KubeClientTrait for KubeClient {
    async fn get_secret_data(&self, namespace: &str, name: &str) -> Result<BTreeMap<String, Vec<u8>>, ControllerError> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        let secret = api
            .get(name)
            .await
            .map_err(|e| classify(e, format!("secret {}/{}", namespace, name)))?;
        Ok(secret
            .data
            .unwrap_or_default()
            .into_iter()
            .map(|(key, value)| (key, value.0))
            .collect())
    }

    async fn delete_secret(&self, namespace: &str, name: &str) -> Result<(), ControllerError> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        api.delete(name, &DeleteParams::default())
            .await
            .map_err(|e| classify(e, format!("secret {}/{}", namespace, name)))?;
        Ok(())
    }

    async fn patch_lease_status(
        &self,
        namespace: &str,
        name: &str,
        patch: &Value,
    ) -> Result<Option<String>, ControllerError> {
        let api: Api<Lease> = Api::namespaced(self.client.clone(), namespace);
        let updated = api
            .patch_status(name, &PatchParams::default(), &Patch::Merge(patch))
            .await
            .map_err(|e| classify(e, format!("lease {}/{}", namespace, name)))?;
        Ok(updated.metadata.resource_version)
    }

    async fn patch_schedule_status(&self, namespace: &str, name: &str, patch: &Value) -> Result<(), ControllerError> {
        let api: Api<Schedule> = Api::namespaced(self.client.clone(), namespace);
        api.patch_status(name, &PatchParams::default(), &Patch::Merge(patch))
            .await
            .map_err(|e| classify(e, format!("schedule {}/{}", namespace, name)))?;
        Ok(())
    }

    async fn get_object(&self, namespace: &str, target: &ObjectTarget) -> Result<(), ControllerError> {
        let api = self.dynamic_api(namespace, target).await?;
        api.get(&target.name)
            .await
            .map_err(|e| classify(e, format!("{} in {}", target, namespace)))?;
        Ok(())
    }

    async fn delete_object(
        &self,
        namespace: &str,
        target: &ObjectTarget,
        propagation: Propagation,
    ) -> Result<(), ControllerError> {
        let api = self.dynamic_api(namespace, target).await?;
        let params = match propagation {
            Propagation::Default => DeleteParams::default(),
            Propagation::Foreground => DeleteParams::foreground(),
        };
        api.delete(&target.name, &params)
            .await
            .map_err(|e| classify(e, format!("{} in {}", target, namespace)))?;
        Ok(())
    }
}

/// Namespace and name of a namespaced object
pub fn namespace_and_name<K: Resource>(object: &K) -> Result<(String, String), ControllerError> {
    let name = object
        .meta()
        .name
        .clone()
        .ok_or_else(|| ControllerError::InvalidResource("object has no name".to_string()))?;
    let namespace = object
        .namespace()
        .ok_or_else(|| ControllerError::InvalidResource(format!("{} has no namespace", name)))?;
    Ok((namespace, name))
}

/// Turns 404 and 409 responses into typed errors
fn classify(error: kube::Error, what: String) -> ControllerError {
    match error {
        kube::Error::Api(ae) if ae.code == 404 => ControllerError::NotFound(what),
        kube::Error::Api(ae) if ae.code == 409 => ControllerError::Conflict(what),
        other => ControllerError::Kube(other),
    }
}
