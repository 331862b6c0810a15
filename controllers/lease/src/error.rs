//! Controller-specific error types.
//!
//! Errors are split by how the retry policy treats them: `Temporary` errors
//! are retried after their own short delay, everything else goes through the
//! per-object backoff.

use std::time::Duration;

use kube::Error as KubeError;
use kube_runtime::finalizer;
use openstack_client::OpenStackError;
use thiserror::Error;

/// Errors that can occur in the Lease Controller.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] KubeError),

    /// OpenStack API error
    #[error("OpenStack error: {0}")]
    OpenStack(#[from] OpenStackError),

    /// JSON serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Expected condition that resolves on its own; retried after `delay`
    #[error("{message} (retrying in {delay:?})")]
    Temporary { message: String, delay: Duration },

    /// Blazar rejected the lease request; written to the lease status
    #[error("{0}")]
    BlazarLeaseCreate(String),

    /// Blazar reported a status that is not a lease phase
    #[error("Unknown lease phase: {0}")]
    UnknownPhase(String),

    /// Kubernetes object not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Write rejected because the object changed
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Object is missing required metadata
    #[error("Invalid resource: {0}")]
    InvalidResource(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Adding, running or removing the finalizer failed
    #[error("Finalizer error: {0}")]
    Finalizer(Box<finalizer::Error<ControllerError>>),

    /// Metrics registry error
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// Resource watch failed
    #[error("Resource watch failed: {0}")]
    Watch(String),
}

impl ControllerError {
    pub fn temporary(message: impl Into<String>, delay: Duration) -> Self {
        ControllerError::Temporary {
            message: message.into(),
            delay,
        }
    }

    /// Fixed retry delay for temporary errors, looking through finalizer wrapping
    pub fn retry_delay(&self) -> Option<Duration> {
        match self {
            ControllerError::Temporary { delay, .. } => Some(*delay),
            ControllerError::Finalizer(inner) => match inner.as_ref() {
                finalizer::Error::ApplyFailed(e) | finalizer::Error::CleanupFailed(e) => e.retry_delay(),
                _ => None,
            },
            _ => None,
        }
    }
}
