//! Lease operator CRD definitions
//!
//! Kubernetes Custom Resource Definitions for the `Lease` and `Schedule`
//! resources in the `scheduling.azimuth.stackhpc.com` group.

pub mod lease;
pub mod schedule;

pub use lease::*;
pub use schedule::*;

/// API group shared by all resources, also used as the finalizer name
pub const API_GROUP: &str = "scheduling.azimuth.stackhpc.com";

#[cfg(test)]
mod tests {
    use super::*;
    use kube::{CustomResourceExt, Resource};

    #[test]
    fn test_crds_share_the_api_group() {
        assert_eq!(Lease::group(&()), API_GROUP);
        assert_eq!(Schedule::group(&()), API_GROUP);
        assert_eq!(Lease::crd_name(), "leases.scheduling.azimuth.stackhpc.com");
        assert_eq!(Schedule::crd_name(), "schedules.scheduling.azimuth.stackhpc.com");
    }

    #[test]
    fn test_lease_crd_has_printer_columns() {
        let crd = Lease::crd();
        let version = &crd.spec.versions[0];
        let columns: Vec<_> = version
            .additional_printer_columns
            .as_ref()
            .unwrap()
            .iter()
            .map(|c| c.name.as_str())
            .collect();
        assert_eq!(columns, vec!["Starts At", "Ends At", "Phase"]);
        assert!(version.subresources.as_ref().unwrap().status.is_some());
        assert_eq!(crd.spec.names.categories, Some(vec!["azimuth".to_string()]));
    }
}
