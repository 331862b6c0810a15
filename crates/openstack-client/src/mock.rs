//! Mock cloud for unit testing
//!
//! [`MockCloud`] keeps Blazar leases and flavors in memory, can be told to
//! fail specific calls, and records every call it receives. Clones share
//! state, so a test can keep one handle while the code under test owns
//! another.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex};

use crate::cloud_trait::{
    COMPUTE_SERVICE, CloudConnector, CloudSessionTrait, IDENTITY_SERVICE, RESERVATION_SERVICE,
};
use crate::error::OpenStackError;
use crate::models::{BlazarLease, CreateBlazarLease, Flavor};

/// A call received by [`MockCloud`]
#[derive(Debug, Clone, PartialEq)]
pub enum CloudCall {
    ListBlazarLeases,
    CreateBlazarLease(CreateBlazarLease),
    DeleteBlazarLease(String),
    ListFlavors,
    DeleteApplicationCredential { user_id: String, id: String },
}

#[derive(Debug)]
struct MockCloudState {
    authenticated: bool,
    apis: HashSet<String>,
    application_credential_id: String,
    user_id: Option<String>,
    blazar_leases: Vec<BlazarLease>,
    flavors: Vec<Flavor>,
    create_failure: Option<(u16, String)>,
    created_status: String,
    list_failure: Option<u16>,
    delete_credential_failure: Option<u16>,
    calls: Vec<CloudCall>,
}

#[derive(Debug, Clone)]
pub struct MockCloud {
    state: Arc<Mutex<MockCloudState>>,
}

impl Default for MockCloud {
    fn default() -> Self {
        Self::new()
    }
}

impl MockCloud {
    /// An authenticated cloud with compute, identity and reservation APIs
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockCloudState {
                authenticated: true,
                apis: [COMPUTE_SERVICE, IDENTITY_SERVICE, RESERVATION_SERVICE]
                    .into_iter()
                    .map(String::from)
                    .collect(),
                application_credential_id: "appcredid".to_string(),
                user_id: Some("fakeuser".to_string()),
                blazar_leases: Vec::new(),
                flavors: Vec::new(),
                create_failure: None,
                created_status: "PENDING".to_string(),
                list_failure: None,
                delete_credential_failure: None,
                calls: Vec::new(),
            })),
        }
    }

    /// A cloud whose credential no longer resolves a catalog
    pub fn unauthenticated() -> Self {
        let cloud = Self::new();
        {
            let mut state = cloud.state.lock().unwrap();
            state.authenticated = false;
            state.apis.clear();
            state.user_id = None;
        }
        cloud
    }

    pub fn without_api(self, service: &str) -> Self {
        self.state.lock().unwrap().apis.remove(service);
        self
    }

    pub fn with_blazar_lease(self, lease: BlazarLease) -> Self {
        self.state.lock().unwrap().blazar_leases.push(lease);
        self
    }

    pub fn with_flavor(self, id: &str, name: &str) -> Self {
        self.state.lock().unwrap().flavors.push(Flavor {
            id: id.to_string(),
            name: name.to_string(),
        });
        self
    }

    /// Makes lease creation fail with the given HTTP status and body
    pub fn fail_create(self, status: u16, body: &str) -> Self {
        self.state.lock().unwrap().create_failure = Some((status, body.to_string()));
        self
    }

    /// Status reported by leases created through the mock
    pub fn with_created_status(self, status: &str) -> Self {
        self.state.lock().unwrap().created_status = status.to_string();
        self
    }

    /// Makes every list call fail with the given HTTP status
    pub fn fail_list(self, status: u16) -> Self {
        self.state.lock().unwrap().list_failure = Some(status);
        self
    }

    /// Makes application credential deletion fail with the given HTTP status
    pub fn fail_delete_application_credential(self, status: u16) -> Self {
        self.state.lock().unwrap().delete_credential_failure = Some(status);
        self
    }

    pub fn calls(&self) -> Vec<CloudCall> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn blazar_leases(&self) -> Vec<BlazarLease> {
        self.state.lock().unwrap().blazar_leases.clone()
    }

    fn record(&self, call: CloudCall) {
        self.state.lock().unwrap().calls.push(call);
    }

    fn require_api(&self, service: &str) -> Result<(), OpenStackError> {
        if self.state.lock().unwrap().apis.contains(service) {
            Ok(())
        } else {
            Err(OpenStackError::ApiNotSupported(service.to_string()))
        }
    }

    fn list_error(&self, url: &str) -> Option<OpenStackError> {
        self.state
            .lock()
            .unwrap()
            .list_failure
            .map(|status| status_error("GET", url, status, "mock failure"))
    }
}

fn status_error(method: &str, url: &str, status: u16, body: &str) -> OpenStackError {
    OpenStackError::Status {
        method: method.to_string(),
        url: url.to_string(),
        status,
        body: body.to_string(),
    }
}

#[async_trait::async_trait]
impl CloudSessionTrait for MockCloud {
    fn is_authenticated(&self) -> bool {
        self.state.lock().unwrap().authenticated
    }

    fn application_credential_id(&self) -> &str {
        // Fixed for the lifetime of the mock
        "appcredid"
    }

    fn current_user_id(&self) -> Option<String> {
        self.state.lock().unwrap().user_id.clone()
    }

    fn probe_api(&self, service: &str) -> Result<bool, OpenStackError> {
        Ok(self.state.lock().unwrap().apis.contains(service))
    }

    async fn list_blazar_leases(&self) -> Result<Vec<BlazarLease>, OpenStackError> {
        self.require_api(RESERVATION_SERVICE)?;
        self.record(CloudCall::ListBlazarLeases);
        if let Some(e) = self.list_error("/leases") {
            return Err(e);
        }
        Ok(self.blazar_leases())
    }

    async fn create_blazar_lease(&self, request: &CreateBlazarLease) -> Result<BlazarLease, OpenStackError> {
        self.require_api(RESERVATION_SERVICE)?;
        self.record(CloudCall::CreateBlazarLease(request.clone()));

        let mut state = self.state.lock().unwrap();
        if let Some((status, body)) = &state.create_failure {
            return Err(status_error("POST", "/leases", *status, body));
        }
        let lease = BlazarLease {
            id: "blazarleaseid".to_string(),
            name: request.name.clone(),
            status: state.created_status.clone(),
            reservations: Vec::new(),
        };
        state.blazar_leases.push(lease.clone());
        Ok(lease)
    }

    async fn delete_blazar_lease(&self, id: &str) -> Result<(), OpenStackError> {
        self.require_api(RESERVATION_SERVICE)?;
        self.record(CloudCall::DeleteBlazarLease(id.to_string()));
        let mut state = self.state.lock().unwrap();
        let before = state.blazar_leases.len();
        state.blazar_leases.retain(|l| l.id != id);
        if state.blazar_leases.len() == before {
            return Err(status_error("DELETE", "/leases", 404, "lease not found"));
        }
        Ok(())
    }

    async fn list_flavors(&self) -> Result<Vec<Flavor>, OpenStackError> {
        self.require_api(COMPUTE_SERVICE)?;
        self.record(CloudCall::ListFlavors);
        if let Some(e) = self.list_error("/flavors") {
            return Err(e);
        }
        Ok(self.state.lock().unwrap().flavors.clone())
    }

    async fn delete_application_credential(&self) -> Result<(), OpenStackError> {
        self.require_api(IDENTITY_SERVICE)?;
        let (user_id, id, failure) = {
            let state = self.state.lock().unwrap();
            (
                state.user_id.clone().unwrap_or_default(),
                state.application_credential_id.clone(),
                state.delete_credential_failure,
            )
        };
        self.record(CloudCall::DeleteApplicationCredential { user_id, id });
        match failure {
            Some(status) => Err(status_error("DELETE", "/application_credentials", status, "mock failure")),
            None => Ok(()),
        }
    }
}

/// Connector that always returns the same [`MockCloud`]
#[derive(Debug, Clone, Default)]
pub struct MockConnector {
    cloud: MockCloud,
    connections: Arc<Mutex<Vec<BTreeMap<String, Vec<u8>>>>>,
}

impl MockConnector {
    pub fn new(cloud: MockCloud) -> Self {
        Self {
            cloud,
            connections: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Secret data of every connection made so far
    pub fn connections(&self) -> Vec<BTreeMap<String, Vec<u8>>> {
        self.connections.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl CloudConnector for MockConnector {
    async fn connect(
        &self,
        secret_data: &BTreeMap<String, Vec<u8>>,
    ) -> Result<Box<dyn CloudSessionTrait>, OpenStackError> {
        self.connections.lock().unwrap().push(secret_data.clone());
        Ok(Box::new(self.cloud.clone()))
    }
}
