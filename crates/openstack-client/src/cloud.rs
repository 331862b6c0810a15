//! Cloud session
//!
//! A [`Cloud`] resolves the service catalog once when it is opened and hands
//! out cached per-service [`ApiClient`]s.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use reqwest::{Client, Method};
use tracing::{debug, warn};

use crate::auth::Authenticator;
use crate::cloud_trait::{
    COMPUTE_SERVICE, CloudConnector, CloudSessionTrait, IDENTITY_SERVICE, RESERVATION_SERVICE,
};
use crate::config::CloudCredentials;
use crate::error::OpenStackError;
use crate::models::{BlazarLease, CatalogEndpoint, CatalogResponse, CreateBlazarLease, Flavor};
use crate::resource::ApiClient;

/// Timeout for calls to the reservation service
pub const RESERVATION_TIMEOUT: Duration = Duration::from_secs(30);

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug)]
pub struct Cloud {
    http: Client,
    auth: Arc<Authenticator>,
    /// Service type to endpoint URL
    endpoints: HashMap<String, String>,
    clients: Mutex<HashMap<String, Arc<ApiClient>>>,
}

impl Cloud {
    /// Authenticates and resolves the catalog for the given credentials.
    pub async fn connect(credentials: &CloudCredentials) -> Result<Self, OpenStackError> {
        let http = build_http_client(credentials)?;
        let auth = Arc::new(Authenticator::new(
            http.clone(),
            credentials.auth_url.clone(),
            credentials.application_credential_id.clone(),
            credentials.application_credential_secret.clone(),
        ));

        let endpoints = match fetch_catalog(&http, &auth).await {
            Ok(entries) => resolve_endpoints(
                entries,
                &credentials.interface,
                credentials.region_name.as_deref(),
            ),
            Err(e) if e.status_code() == Some(404) => {
                warn!("No service catalog for application credential {}", credentials.application_credential_id);
                HashMap::new()
            }
            Err(e) => return Err(e),
        };
        debug!("Resolved endpoints for services: {:?}", endpoints.keys().collect::<Vec<_>>());

        Ok(Self {
            http,
            auth,
            endpoints,
            clients: Mutex::new(HashMap::new()),
        })
    }

    /// Client for `service`, created on first use.
    pub fn api_client(&self, service: &str) -> Result<Arc<ApiClient>, OpenStackError> {
        let timeout = match service {
            RESERVATION_SERVICE => Some(RESERVATION_TIMEOUT),
            _ => None,
        };
        self.api_client_with_timeout(service, timeout)
    }

    /// Like [`Cloud::api_client`], with a request timeout for a newly created client.
    pub fn api_client_with_timeout(
        &self,
        service: &str,
        timeout: Option<Duration>,
    ) -> Result<Arc<ApiClient>, OpenStackError> {
        let mut clients = match self.clients.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(client) = clients.get(service) {
            return Ok(client.clone());
        }

        let endpoint = self
            .endpoints
            .get(service)
            .ok_or_else(|| OpenStackError::ApiNotSupported(service.to_string()))?;
        let endpoint = match service {
            IDENTITY_SERVICE => identity_v3_endpoint(endpoint),
            _ => endpoint.clone(),
        };
        let client = Arc::new(ApiClient::new(self.http.clone(), self.auth.clone(), &endpoint, timeout)?);
        clients.insert(service.to_string(), client.clone());
        Ok(client)
    }

    /// Forgets the session's token so the next request logs in again.
    pub fn invalidate_token(&self) {
        self.auth.invalidate();
    }
}

#[async_trait::async_trait]
impl CloudSessionTrait for Cloud {
    fn is_authenticated(&self) -> bool {
        !self.endpoints.is_empty()
    }

    fn application_credential_id(&self) -> &str {
        self.auth.application_credential_id()
    }

    fn current_user_id(&self) -> Option<String> {
        self.auth.user_id()
    }

    fn probe_api(&self, service: &str) -> Result<bool, OpenStackError> {
        match self.api_client(service) {
            Ok(_) => Ok(true),
            Err(OpenStackError::ApiNotSupported(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn list_blazar_leases(&self) -> Result<Vec<BlazarLease>, OpenStackError> {
        self.api_client(RESERVATION_SERVICE)?.resource("leases").list().await
    }

    async fn create_blazar_lease(&self, request: &CreateBlazarLease) -> Result<BlazarLease, OpenStackError> {
        self.api_client(RESERVATION_SERVICE)?
            .resource("leases")
            .create(request)
            .await
    }

    async fn delete_blazar_lease(&self, id: &str) -> Result<(), OpenStackError> {
        self.api_client(RESERVATION_SERVICE)?.resource("leases").delete(id).await
    }

    async fn list_flavors(&self) -> Result<Vec<Flavor>, OpenStackError> {
        self.api_client(COMPUTE_SERVICE)?.resource("flavors").list().await
    }

    async fn delete_application_credential(&self) -> Result<(), OpenStackError> {
        let identity = self.api_client(IDENTITY_SERVICE)?;
        // The user ID is only known once a token has been issued
        self.auth.token().await?;
        let user_id = self
            .current_user_id()
            .ok_or_else(|| OpenStackError::Authentication("token has no user".to_string()))?;
        identity
            .resource_with_prefix(
                &format!("users/{}", urlencoding::encode(&user_id)),
                "application_credentials",
            )
            .delete(self.application_credential_id())
            .await
    }
}

/// Opens [`Cloud`] sessions over HTTP
#[derive(Debug, Clone, Default)]
pub struct OpenStackConnector;

#[async_trait::async_trait]
impl CloudConnector for OpenStackConnector {
    async fn connect(
        &self,
        secret_data: &BTreeMap<String, Vec<u8>>,
    ) -> Result<Box<dyn CloudSessionTrait>, OpenStackError> {
        let credentials = CloudCredentials::from_secret_data(secret_data)?;
        Ok(Box::new(Cloud::connect(&credentials).await?))
    }
}

fn build_http_client(credentials: &CloudCredentials) -> Result<Client, OpenStackError> {
    let mut builder = Client::builder()
        .timeout(DEFAULT_TIMEOUT)
        .danger_accept_invalid_certs(!credentials.verify);
    if let Some(pem) = &credentials.cacert {
        builder = builder.add_root_certificate(reqwest::Certificate::from_pem(pem)?);
    }
    Ok(builder.build()?)
}

async fn fetch_catalog(
    http: &Client,
    auth: &Authenticator,
) -> Result<Vec<crate::models::CatalogEntry>, OpenStackError> {
    let url = format!("{}/v3/auth/catalog", auth.auth_url());
    let request = auth.authorize(http.request(Method::GET, &url)).await?;
    let response = request.send().await?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(OpenStackError::Status {
            method: "GET".to_string(),
            url,
            status: status.as_u16(),
            body,
        });
    }
    let catalog: CatalogResponse = serde_json::from_str(&response.text().await?)?;
    Ok(catalog.catalog)
}

/// Picks one endpoint per service for the interface and region.
///
/// Services with no matching endpoint are left out.
fn resolve_endpoints(
    entries: Vec<crate::models::CatalogEntry>,
    interface: &str,
    region: Option<&str>,
) -> HashMap<String, String> {
    let matches = |endpoint: &CatalogEndpoint| {
        endpoint.interface == interface
            && region.is_none_or(|r| {
                endpoint.region.as_deref() == Some(r) || endpoint.region_id.as_deref() == Some(r)
            })
    };
    entries
        .into_iter()
        .filter_map(|entry| {
            let endpoint = entry.endpoints.into_iter().find(|e| matches(e))?;
            Some((entry.service_type, endpoint.url))
        })
        .collect()
}

fn identity_v3_endpoint(endpoint: &str) -> String {
    let endpoint = endpoint.trim_end_matches('/');
    if endpoint.ends_with("/v3") {
        endpoint.to_string()
    } else {
        format!("{}/v3", endpoint)
    }
}
