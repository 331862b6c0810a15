//! Cloud credentials
//!
//! Parses the `clouds.yaml` document stored in a credential secret. Only
//! application credential authentication is supported.

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::error::OpenStackError;

/// Secret key holding the clouds document
pub const CLOUDS_YAML_KEY: &str = "clouds.yaml";

/// Optional secret key holding a PEM CA bundle
pub const CACERT_KEY: &str = "cacert";

const APPLICATION_CREDENTIAL_AUTH: &str = "v3applicationcredential";

#[derive(Debug, Deserialize)]
struct CloudsFile {
    #[serde(default)]
    clouds: serde_yaml::Mapping,
}

#[derive(Debug, Clone, Deserialize)]
struct RawCloud {
    #[serde(default)]
    auth_type: Option<String>,
    #[serde(default)]
    auth: RawAuth,
    #[serde(default)]
    region_name: Option<String>,
    #[serde(default)]
    interface: Option<String>,
    #[serde(default)]
    verify: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct RawAuth {
    auth_url: Option<String>,
    application_credential_id: Option<String>,
    application_credential_secret: Option<String>,
}

/// Connection settings for one cloud
#[derive(Clone, PartialEq, Eq)]
pub struct CloudCredentials {
    /// Identity endpoint, without a trailing `/v3`
    pub auth_url: String,
    pub application_credential_id: String,
    pub application_credential_secret: String,
    /// Endpoint interface to pick from the catalog
    pub interface: String,
    pub region_name: Option<String>,
    /// Whether TLS certificates are verified
    pub verify: bool,
    /// Extra trusted root, PEM encoded
    pub cacert: Option<Vec<u8>>,
}

impl std::fmt::Debug for CloudCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloudCredentials")
            .field("auth_url", &self.auth_url)
            .field("application_credential_id", &self.application_credential_id)
            .field("application_credential_secret", &"<redacted>")
            .field("interface", &self.interface)
            .field("region_name", &self.region_name)
            .field("verify", &self.verify)
            .field("cacert", &self.cacert.as_ref().map(Vec::len))
            .finish()
    }
}

impl CloudCredentials {
    /// Builds credentials from the decoded data of a credential secret.
    ///
    /// The first cloud in `clouds.yaml` is used.
    pub fn from_secret_data(data: &BTreeMap<String, Vec<u8>>) -> Result<Self, OpenStackError> {
        let clouds_yaml = data.get(CLOUDS_YAML_KEY).ok_or_else(|| {
            OpenStackError::InvalidConfig(format!("secret has no '{}' key", CLOUDS_YAML_KEY))
        })?;
        let mut credentials = Self::from_clouds_yaml(clouds_yaml)?;
        credentials.cacert = data.get(CACERT_KEY).filter(|pem| !pem.is_empty()).cloned();
        Ok(credentials)
    }

    /// Parses a clouds document and returns its first cloud.
    pub fn from_clouds_yaml(document: &[u8]) -> Result<Self, OpenStackError> {
        let file: CloudsFile = serde_yaml::from_slice(document)?;
        let (name, raw) = file
            .clouds
            .into_iter()
            .next()
            .ok_or_else(|| OpenStackError::InvalidConfig("no clouds defined".to_string()))?;
        let raw: RawCloud = serde_yaml::from_value(raw)?;

        let auth_type = raw.auth_type.unwrap_or_default();
        if auth_type != APPLICATION_CREDENTIAL_AUTH {
            return Err(OpenStackError::UnsupportedAuthentication(auth_type));
        }

        let cloud_name = name.as_str().unwrap_or("<unnamed>").to_string();
        let missing = |field: &str| {
            OpenStackError::InvalidConfig(format!("cloud '{}' is missing auth.{}", cloud_name, field))
        };
        let auth_url = raw.auth.auth_url.ok_or_else(|| missing("auth_url"))?;

        Ok(Self {
            auth_url: normalize_auth_url(&auth_url),
            application_credential_id: raw
                .auth
                .application_credential_id
                .ok_or_else(|| missing("application_credential_id"))?,
            application_credential_secret: raw
                .auth
                .application_credential_secret
                .ok_or_else(|| missing("application_credential_secret"))?,
            interface: raw.interface.unwrap_or_else(|| "public".to_string()),
            region_name: raw.region_name,
            verify: raw.verify.unwrap_or(true),
            cacert: None,
        })
    }
}

fn normalize_auth_url(url: &str) -> String {
    let url = url.trim_end_matches('/');
    url.strip_suffix("/v3").unwrap_or(url).to_string()
}
