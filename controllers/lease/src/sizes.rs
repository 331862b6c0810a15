//! Size name resolution.

use std::collections::{BTreeMap, HashMap};

use openstack_client::CloudSessionTrait;
use tracing::warn;

/// Maps the names of the requested sizes to the names of the sizes in use.
///
/// Informational only, so this never fails: pairs where either flavor is
/// unknown are dropped, and a failed flavor listing gives an empty map.
pub async fn size_name_map(
    cloud: &dyn CloudSessionTrait,
    size_map: &BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    if size_map.is_empty() {
        return BTreeMap::new();
    }
    let flavors = match cloud.list_flavors().await {
        Ok(flavors) => flavors,
        Err(e) => {
            warn!("Failed to list flavors, leaving size names empty: {}", e);
            return BTreeMap::new();
        }
    };
    let names: HashMap<&str, &str> = flavors
        .iter()
        .map(|flavor| (flavor.id.as_str(), flavor.name.as_str()))
        .collect();

    size_map
        .iter()
        .filter_map(|(original, effective)| {
            let original = names.get(original.as_str())?;
            let effective = names.get(effective.as_str())?;
            Some((original.to_string(), effective.to_string()))
        })
        .collect()
}
