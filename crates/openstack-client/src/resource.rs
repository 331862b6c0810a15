//! Per-service REST clients
//!
//! An [`ApiClient`] talks to one service endpoint from the catalog. A
//! [`Resource`] is a collection under that endpoint (e.g. `leases`,
//! `flavors`) with list/create/delete operations.

use std::sync::Arc;
use std::time::Duration;

use reqwest::{Client, Method, Response, Url};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use crate::auth::Authenticator;
use crate::error::OpenStackError;
use crate::models::Link;

#[derive(Debug)]
pub struct ApiClient {
    http: Client,
    auth: Arc<Authenticator>,
    /// Scheme and authority of the endpoint
    origin: Url,
    /// Path of the endpoint, without a trailing slash
    prefix: String,
    timeout: Option<Duration>,
}

impl ApiClient {
    pub fn new(
        http: Client,
        auth: Arc<Authenticator>,
        endpoint: &str,
        timeout: Option<Duration>,
    ) -> Result<Self, OpenStackError> {
        let url = Url::parse(endpoint)
            .map_err(|e| OpenStackError::InvalidConfig(format!("invalid endpoint '{}': {}", endpoint, e)))?;
        let mut origin = url.clone();
        origin.set_path("/");
        origin.set_query(None);
        Ok(Self {
            http,
            auth,
            origin,
            prefix: url.path().trim_end_matches('/').to_string(),
            timeout,
        })
    }

    /// Collection directly under the endpoint, e.g. `leases`.
    pub fn resource(&self, name: &str) -> Resource<'_> {
        Resource::new(self, "", name)
    }

    /// Collection below a sub-path of the endpoint, e.g. `users/{id}` + `application_credentials`.
    pub fn resource_with_prefix(&self, prefix: &str, name: &str) -> Resource<'_> {
        Resource::new(self, prefix, name)
    }

    fn url(&self, path_and_query: &str) -> Result<Url, OpenStackError> {
        self.origin
            .join(path_and_query)
            .map_err(|e| OpenStackError::InvalidConfig(format!("invalid path '{}': {}", path_and_query, e)))
    }

    /// Sends an authenticated request.
    ///
    /// A rejected token comes back as a 401 [`OpenStackError::Status`]; the
    /// request is not retried.
    async fn send(&self, method: Method, url: Url, body: Option<&Value>) -> Result<Response, OpenStackError> {
        debug!("{} {}", method, url);
        let response = self.build(method.clone(), url.clone(), body).await?.send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(OpenStackError::Status {
                method: method.to_string(),
                url: url.to_string(),
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    async fn build(
        &self,
        method: Method,
        url: Url,
        body: Option<&Value>,
    ) -> Result<reqwest::RequestBuilder, OpenStackError> {
        let mut request = self.http.request(method, url);
        if let Some(timeout) = self.timeout {
            request = request.timeout(timeout);
        }
        if let Some(body) = body {
            request = request.json(body);
        }
        self.auth.authorize(request).await
    }
}

/// A REST collection such as `/leases`
#[derive(Debug)]
pub struct Resource<'a> {
    client: &'a ApiClient,
    path: String,
    plural_name: String,
    singular_name: String,
}

impl<'a> Resource<'a> {
    fn new(client: &'a ApiClient, prefix: &str, name: &str) -> Self {
        let path = [client.prefix.as_str(), prefix.trim_matches('/'), name.trim_matches('/')]
            .into_iter()
            .filter(|segment| !segment.is_empty())
            .collect::<Vec<_>>()
            .join("/");
        // `flavors/detail` lists under the `flavors` key
        let plural_name = name.split('/').next().unwrap_or(name).to_string();
        let singular_name = plural_name
            .strip_suffix('s')
            .unwrap_or(&plural_name)
            .to_string();
        Self {
            client,
            path: format!("/{}", path.trim_start_matches('/')),
            plural_name,
            singular_name,
        }
    }

    /// Lists every item, following `{plural}_links` next links.
    pub async fn list<T: DeserializeOwned>(&self) -> Result<Vec<T>, OpenStackError> {
        let mut items = Vec::new();
        let mut next = Some(self.path.clone());

        while let Some(path_and_query) = next.take() {
            let url = self.client.url(&path_and_query)?;
            let response = self.client.send(Method::GET, url, None).await?;
            let mut page: Value = response.json().await?;

            let list = page
                .get_mut(&self.plural_name)
                .map(Value::take)
                .ok_or_else(|| {
                    OpenStackError::UnexpectedResponse(format!("response has no '{}' key", self.plural_name))
                })?;
            items.extend(serde_json::from_value::<Vec<T>>(list)?);

            next = next_page(&page, &self.plural_name)?;
        }

        Ok(items)
    }

    /// Creates an item and returns the server's representation of it.
    pub async fn create<B: Serialize, T: DeserializeOwned>(&self, body: &B) -> Result<T, OpenStackError> {
        let url = self.client.url(&self.path)?;
        let body = serde_json::to_value(body)?;
        let response = self.client.send(Method::POST, url, Some(&body)).await?;
        let mut created: Value = response.json().await?;
        let item = match created.get_mut(&self.singular_name) {
            Some(item) => item.take(),
            None => created,
        };
        Ok(serde_json::from_value(item)?)
    }

    pub async fn delete(&self, id: &str) -> Result<(), OpenStackError> {
        let url = self
            .client
            .url(&format!("{}/{}", self.path, urlencoding::encode(id)))?;
        self.client.send(Method::DELETE, url, None).await?;
        Ok(())
    }
}

/// Path and query of the `next` link, if any.
///
/// The scheme and host are dropped because some clouds advertise `http`
/// links for `https` endpoints.
fn next_page(page: &Value, plural_name: &str) -> Result<Option<String>, OpenStackError> {
    let Some(links) = page.get(format!("{}_links", plural_name)) else {
        return Ok(None);
    };
    let links: Vec<Link> = serde_json::from_value(links.clone())?;
    let Some(link) = links.into_iter().find(|l| l.rel.as_deref() == Some("next")) else {
        return Ok(None);
    };

    let url = Url::parse(&link.href)
        .map_err(|e| OpenStackError::UnexpectedResponse(format!("invalid next link '{}': {}", link.href, e)))?;
    Ok(Some(match url.query() {
        Some(query) => format!("{}?{}", url.path(), query),
        None => url.path().to_string(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn client(endpoint: &str) -> ApiClient {
        let http = Client::new();
        let auth = Arc::new(Authenticator::new(http.clone(), "https://keystone", "id", "secret"));
        ApiClient::new(http, auth, endpoint, None).unwrap()
    }

    #[test]
    fn test_resource_paths() {
        let blazar = client("https://blazar.example.com:1234/v1/");
        assert_eq!(blazar.resource("leases").path, "/v1/leases");

        let identity = client("https://keystone.example.com/identity/v3");
        assert_eq!(
            identity
                .resource_with_prefix("users/user1", "application_credentials")
                .path,
            "/identity/v3/users/user1/application_credentials"
        );

        let bare = client("https://nova.example.com");
        assert_eq!(bare.resource("flavors").path, "/flavors");
    }

    #[test]
    fn test_singular_and_plural_names() {
        let nova = client("https://nova.example.com/v2.1");
        let detail = nova.resource("flavors/detail");
        assert_eq!(detail.plural_name, "flavors");
        assert_eq!(detail.singular_name, "flavor");
    }

    #[test]
    fn test_next_page_keeps_only_path_and_query() {
        let page = json!({
            "flavors": [],
            "flavors_links": [
                {"rel": "self", "href": "http://nova.example.com/v2.1/flavors"},
                {"rel": "next", "href": "http://nova.example.com/v2.1/flavors?marker=abc&limit=1"},
            ],
        });
        assert_eq!(
            next_page(&page, "flavors").unwrap().as_deref(),
            Some("/v2.1/flavors?marker=abc&limit=1")
        );
        assert_eq!(next_page(&json!({"flavors": []}), "flavors").unwrap(), None);
    }
}
