//! Application credential token authenticator
//!
//! Exchanges an application credential for a Keystone token. The exchange is
//! single-flight: concurrent requests that find no valid token wait for one
//! exchange instead of starting their own.

use reqwest::{Client, RequestBuilder};
use serde_json::json;
use tracing::debug;

use crate::error::OpenStackError;
use crate::models::TokenResponse;
use crate::single_flight::SingleFlight;

const SUBJECT_TOKEN_HEADER: &str = "X-Subject-Token";
const AUTH_TOKEN_HEADER: &str = "X-Auth-Token";
/// Compute microversion sent with every request
pub const NOVA_API_VERSION: &str = "2.61";

/// Keystone token and the user it was issued to
#[derive(Clone, PartialEq, Eq)]
pub struct Token {
    pub value: String,
    pub user_id: String,
}

impl std::fmt::Debug for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Token")
            .field("value", &"<redacted>")
            .field("user_id", &self.user_id)
            .finish()
    }
}

#[derive(Debug)]
pub struct Authenticator {
    http: Client,
    auth_url: String,
    application_credential_id: String,
    application_credential_secret: String,
    token: SingleFlight<Token>,
}

impl Authenticator {
    /// `auth_url` is the identity endpoint without the `/v3` suffix.
    pub fn new(
        http: Client,
        auth_url: impl Into<String>,
        application_credential_id: impl Into<String>,
        application_credential_secret: impl Into<String>,
    ) -> Self {
        Self {
            http,
            auth_url: auth_url.into().trim_end_matches('/').to_string(),
            application_credential_id: application_credential_id.into(),
            application_credential_secret: application_credential_secret.into(),
            token: SingleFlight::new(),
        }
    }

    pub fn auth_url(&self) -> &str {
        &self.auth_url
    }

    pub fn application_credential_id(&self) -> &str {
        &self.application_credential_id
    }

    /// User ID of the current token, if a token has been issued
    pub fn user_id(&self) -> Option<String> {
        self.token.current().map(|t| t.user_id)
    }

    /// Returns the current token, exchanging the credential if there is none.
    pub async fn token(&self) -> Result<Token, OpenStackError> {
        self.token.get_or_try_init(|| self.exchange()).await
    }

    /// Forgets the current token; the next request exchanges the credential again.
    pub fn invalidate(&self) {
        self.token.invalidate();
    }

    /// Adds the authentication and API version headers to a request.
    pub async fn authorize(&self, request: RequestBuilder) -> Result<RequestBuilder, OpenStackError> {
        let token = self.token().await?;
        Ok(request
            .header(AUTH_TOKEN_HEADER, token.value)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .header("X-OpenStack-Nova-API-Version", NOVA_API_VERSION))
    }

    async fn exchange(&self) -> Result<Token, OpenStackError> {
        let url = format!("{}/v3/auth/tokens", self.auth_url);
        debug!("Requesting token from {}", url);

        let body = json!({
            "auth": {
                "identity": {
                    "methods": ["application_credential"],
                    "application_credential": {
                        "id": self.application_credential_id,
                        "secret": self.application_credential_secret,
                    },
                },
            },
        });
        let response = self.http.post(&url).json(&body).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(OpenStackError::Status {
                method: "POST".to_string(),
                url,
                status: status.as_u16(),
                body,
            });
        }

        let value = response
            .headers()
            .get(SUBJECT_TOKEN_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| {
                OpenStackError::Authentication(format!("response has no {} header", SUBJECT_TOKEN_HEADER))
            })?;
        let parsed: TokenResponse = serde_json::from_str(&response.text().await?)?;

        debug!("Obtained token for user {}", parsed.token.user.id);
        Ok(Token {
            value,
            user_id: parsed.token.user.id,
        })
    }
}
