//! OpenStack REST API Client
//!
//! The small slice of OpenStack the lease operator needs: application
//! credential authentication against Keystone, service catalog resolution,
//! Blazar leases, Nova flavors and application credential deletion.
//!
//! # Example
//!
//! ```no_run
//! use openstack_client::{Cloud, CloudCredentials, CloudSessionTrait};
//!
//! # async fn example(clouds_yaml: &[u8]) -> Result<(), openstack_client::OpenStackError> {
//! let credentials = CloudCredentials::from_clouds_yaml(clouds_yaml)?;
//! let cloud = Cloud::connect(&credentials).await?;
//!
//! if cloud.is_authenticated() && cloud.probe_api("reservation")? {
//!     for lease in cloud.list_blazar_leases().await? {
//!         println!("{} {}", lease.name, lease.status);
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod cloud;
pub mod config;
pub mod error;
pub mod models;
pub mod resource;
pub mod single_flight;
#[path = "trait.rs"]
pub mod cloud_trait;
#[cfg(feature = "test-util")]
pub mod mock;

pub use auth::{Authenticator, Token};
pub use cloud::{Cloud, OpenStackConnector, RESERVATION_TIMEOUT};
pub use cloud_trait::{
    COMPUTE_SERVICE, CloudConnector, CloudSessionTrait, IDENTITY_SERVICE, RESERVATION_SERVICE,
};
pub use config::CloudCredentials;
pub use error::OpenStackError;
pub use models::*;
pub use resource::{ApiClient, Resource};
pub use single_flight::SingleFlight;
#[cfg(feature = "test-util")]
pub use mock::{CloudCall, MockCloud, MockConnector};
