//! Operator configuration from environment variables.

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ControllerError;

const DEFAULT_CHECK_INTERVAL_SECONDS: u64 = 60;
const DEFAULT_GRACE_PERIOD_SECONDS: u64 = 600;
const DEFAULT_METRICS_PORT: u16 = 8080;

/// Whether leases with an end time are backed by Blazar
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BlazarMode {
    Enabled,
    Disabled,
    /// Use Blazar when the cloud's catalog has a reservation endpoint
    #[default]
    Auto,
}

impl FromStr for BlazarMode {
    type Err = ControllerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "yes" | "true" | "1" => Ok(BlazarMode::Enabled),
            "no" | "false" | "0" => Ok(BlazarMode::Disabled),
            "auto" => Ok(BlazarMode::Auto),
            other => Err(ControllerError::InvalidConfig(format!(
                "AZIMUTH_LEASE_BLAZAR_ENABLED must be yes, no or auto, got '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct OperatorConfig {
    pub schedule_check_interval: Duration,
    pub lease_check_interval: Duration,
    /// Used when a lease has no `gracePeriod`
    pub default_grace_period: Duration,
    pub blazar: BlazarMode,
    /// Restrict watches to one namespace
    pub watch_namespace: Option<String>,
    pub metrics_bind_address: SocketAddr,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            schedule_check_interval: Duration::from_secs(DEFAULT_CHECK_INTERVAL_SECONDS),
            lease_check_interval: Duration::from_secs(DEFAULT_CHECK_INTERVAL_SECONDS),
            default_grace_period: Duration::from_secs(DEFAULT_GRACE_PERIOD_SECONDS),
            blazar: BlazarMode::Auto,
            watch_namespace: None,
            metrics_bind_address: SocketAddr::from(([0, 0, 0, 0], DEFAULT_METRICS_PORT)),
        }
    }
}

impl OperatorConfig {
    pub fn from_env() -> Result<Self, ControllerError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ControllerError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let schedule_check_interval = seconds(&lookup, "AZIMUTH_SCHEDULE_CHECK_INTERVAL_SECONDS")?
            .unwrap_or(defaults.schedule_check_interval);
        let lease_check_interval =
            seconds(&lookup, "AZIMUTH_LEASE_CHECK_INTERVAL_SECONDS")?.unwrap_or(schedule_check_interval);
        let default_grace_period = seconds(&lookup, "AZIMUTH_LEASE_DEFAULT_GRACE_PERIOD_SECONDS")?
            .unwrap_or(defaults.default_grace_period);

        let blazar = match lookup("AZIMUTH_LEASE_BLAZAR_ENABLED") {
            Some(value) => value.parse()?,
            None => defaults.blazar,
        };

        let metrics_bind_address = match lookup("METRICS_BIND_ADDRESS") {
            Some(address) => address.parse::<SocketAddr>().map_err(|e| {
                ControllerError::InvalidConfig(format!(
                    "METRICS_BIND_ADDRESS '{}' is not a socket address: {}",
                    address, e
                ))
            })?,
            None => defaults.metrics_bind_address,
        };

        Ok(Self {
            schedule_check_interval,
            lease_check_interval,
            default_grace_period,
            blazar,
            watch_namespace: lookup("WATCH_NAMESPACE").filter(|ns| !ns.is_empty()),
            metrics_bind_address,
        })
    }
}

fn seconds<F>(lookup: &F, key: &str) -> Result<Option<Duration>, ControllerError>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|value| {
            value.trim().parse::<u64>().map(Duration::from_secs).map_err(|_| {
                ControllerError::InvalidConfig(format!("{} must be a whole number of seconds, got '{}'", key, value))
            })
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<OperatorConfig, ControllerError> {
        let vars: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        OperatorConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = load(&[]).unwrap();
        assert_eq!(config.schedule_check_interval, Duration::from_secs(60));
        assert_eq!(config.lease_check_interval, Duration::from_secs(60));
        assert_eq!(config.default_grace_period, Duration::from_secs(600));
        assert_eq!(config.blazar, BlazarMode::Auto);
        assert!(config.watch_namespace.is_none());
        assert_eq!(config.metrics_bind_address.port(), 8080);
    }

    #[test]
    fn test_lease_interval_follows_schedule_interval() {
        let config = load(&[("AZIMUTH_SCHEDULE_CHECK_INTERVAL_SECONDS", "30")]).unwrap();
        assert_eq!(config.lease_check_interval, Duration::from_secs(30));

        let config = load(&[
            ("AZIMUTH_SCHEDULE_CHECK_INTERVAL_SECONDS", "30"),
            ("AZIMUTH_LEASE_CHECK_INTERVAL_SECONDS", "10"),
        ])
        .unwrap();
        assert_eq!(config.schedule_check_interval, Duration::from_secs(30));
        assert_eq!(config.lease_check_interval, Duration::from_secs(10));
    }

    #[test]
    fn test_blazar_mode() {
        assert_eq!(load(&[("AZIMUTH_LEASE_BLAZAR_ENABLED", "yes")]).unwrap().blazar, BlazarMode::Enabled);
        assert_eq!(load(&[("AZIMUTH_LEASE_BLAZAR_ENABLED", "NO")]).unwrap().blazar, BlazarMode::Disabled);
        assert!(matches!(
            load(&[("AZIMUTH_LEASE_BLAZAR_ENABLED", "maybe")]),
            Err(ControllerError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_invalid_interval() {
        assert!(matches!(
            load(&[("AZIMUTH_LEASE_DEFAULT_GRACE_PERIOD_SECONDS", "ten")]),
            Err(ControllerError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_empty_namespace_means_all() {
        assert!(load(&[("WATCH_NAMESPACE", "")]).unwrap().watch_namespace.is_none());
        assert_eq!(
            load(&[("WATCH_NAMESPACE", "azimuth")]).unwrap().watch_namespace.as_deref(),
            Some("azimuth")
        );
    }
}
