//! OpenStack client errors

use thiserror::Error;

/// Errors that can occur when talking to an OpenStack cloud
#[derive(Debug, Error)]
pub enum OpenStackError {
    /// Transport-level failure (connection, TLS, timeout)
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The cloud answered with a non-success status code
    #[error("{method} {url} returned {status}: {body}")]
    Status {
        method: String,
        url: String,
        status: u16,
        body: String,
    },

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The response did not have the expected shape
    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),

    /// Token exchange succeeded but returned something unusable
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// The cloud has no usable endpoint for the requested service
    #[error("API not supported: {0}")]
    ApiNotSupported(String),

    /// The clouds.yaml uses an auth type other than application credentials
    #[error("Unsupported authentication type: {0}")]
    UnsupportedAuthentication(String),

    /// The credential secret or clouds.yaml is malformed
    #[error("Invalid cloud configuration: {0}")]
    InvalidConfig(String),
}

impl OpenStackError {
    /// HTTP status code of the response, if the cloud answered with one
    pub fn status_code(&self) -> Option<u16> {
        match self {
            OpenStackError::Status { status, .. } => Some(*status),
            OpenStackError::Http(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// Raw response body for status errors
    pub fn response_body(&self) -> Option<&str> {
        match self {
            OpenStackError::Status { body, .. } => Some(body),
            _ => None,
        }
    }
}

impl From<serde_yaml::Error> for OpenStackError {
    fn from(e: serde_yaml::Error) -> Self {
        OpenStackError::InvalidConfig(e.to_string())
    }
}
