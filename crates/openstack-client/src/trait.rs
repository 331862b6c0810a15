//! Cloud session traits for mocking
//!
//! The operator only talks to OpenStack through these traits. [`Cloud`] is
//! the HTTP implementation; tests use the mock behind the `test-util` feature.
//!
//! [`Cloud`]: crate::Cloud

use std::collections::BTreeMap;

use crate::error::OpenStackError;
use crate::models::{BlazarLease, CreateBlazarLease, Flavor};

/// Service type of the Blazar reservation API in the catalog
pub const RESERVATION_SERVICE: &str = "reservation";
/// Service type of the Nova compute API in the catalog
pub const COMPUTE_SERVICE: &str = "compute";
/// Service type of the Keystone identity API in the catalog
pub const IDENTITY_SERVICE: &str = "identity";

/// An authenticated connection to one cloud
#[async_trait::async_trait]
pub trait CloudSessionTrait: Send + Sync {
    /// False when the credential no longer resolves a service catalog
    fn is_authenticated(&self) -> bool;

    fn application_credential_id(&self) -> &str;

    /// User that owns the application credential, once a token was issued
    fn current_user_id(&self) -> Option<String>;

    /// Whether the catalog has an endpoint for `service`.
    ///
    /// Only an unknown service yields `Ok(false)`; other failures propagate.
    fn probe_api(&self, service: &str) -> Result<bool, OpenStackError>;

    async fn list_blazar_leases(&self) -> Result<Vec<BlazarLease>, OpenStackError>;

    async fn create_blazar_lease(&self, request: &CreateBlazarLease) -> Result<BlazarLease, OpenStackError>;

    async fn delete_blazar_lease(&self, id: &str) -> Result<(), OpenStackError>;

    async fn list_flavors(&self) -> Result<Vec<Flavor>, OpenStackError>;

    /// Deletes the application credential this session authenticated with
    async fn delete_application_credential(&self) -> Result<(), OpenStackError>;
}

/// Opens cloud sessions from the decoded data of a credential secret
#[async_trait::async_trait]
pub trait CloudConnector: Send + Sync {
    async fn connect(
        &self,
        secret_data: &BTreeMap<String, Vec<u8>>,
    ) -> Result<Box<dyn CloudSessionTrait>, OpenStackError>;
}
