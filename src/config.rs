//! Configuration surface: the target shape an operator CLI's
//! `router eigrp` / `network` / `k-values` parser builds into — plain
//! structs behind a `derive_builder` builder with
//! `build_fn(error = "Error")` so a missing required field surfaces
//! through the crate's own error type.

use std::net::Ipv4Addr;
use std::time::Duration;

use derive_builder::Builder;

use crate::error::{Error, Result};
use crate::metric::KValues;

#[derive(Debug, Clone, Builder)]
#[builder(build_fn(error = "Error", validate = "Self::validate"))]
pub struct InstanceConfig {
    pub as_number: u16,
    #[builder(default)]
    pub router_id: Option<Ipv4Addr>,
    #[builder(default)]
    pub k_values: KValues,
    #[builder(default = "2")]
    pub variance: u8,
    #[builder(default = "4")]
    pub max_paths: u8,
    #[builder(default)]
    pub networks: Vec<Ipv4Addr>,
}

impl InstanceConfigBuilder {
    fn validate(&self) -> std::result::Result<(), String> {
        if let Some(0) = self.variance {
            return Err("variance must be at least 1".to_string());
        }
        if let Some(0) = self.max_paths {
            return Err("max-paths must be at least 1".to_string());
        }
        Ok(())
    }
}

impl InstanceConfig {
    pub fn validated(self) -> Result<Self> {
        if self.variance == 0 {
            return Err(Error::ErrConfig("variance must be at least 1"));
        }
        if self.max_paths == 0 {
            return Err(Error::ErrConfig("max-paths must be at least 1"));
        }
        Ok(self)
    }
}

#[derive(Debug, Clone, Builder)]
#[builder(build_fn(error = "Error"))]
pub struct InterfaceConfig {
    pub name: String,
    #[builder(default = "Duration::from_secs(5)")]
    pub hello_interval: Duration,
    #[builder(default = "Duration::from_secs(15)")]
    pub hold_time: Duration,
    #[builder(default = "10_000")]
    pub bandwidth_kbps: u32,
    #[builder(default = "1000")]
    pub delay_us: u32,
    #[builder(default = "true")]
    pub split_horizon: bool,
    #[builder(default)]
    pub passive: bool,
    #[builder(default)]
    pub authentication_key_chain: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_instance_config_builds() {
        let cfg = InstanceConfigBuilder::default().as_number(100).build().unwrap();
        assert_eq!(cfg.as_number, 100);
        assert_eq!(cfg.variance, 2);
        assert_eq!(cfg.max_paths, 4);
    }

    #[test]
    fn zero_variance_is_rejected_by_builder() {
        let result = InstanceConfigBuilder::default().as_number(100).variance(0).build();
        assert!(result.is_err());
    }

    #[test]
    fn zero_variance_is_rejected_post_construction_too() {
        let cfg = InstanceConfig {
            as_number: 100,
            router_id: None,
            k_values: KValues::default(),
            variance: 0,
            max_paths: 4,
            networks: vec![],
        };
        assert!(cfg.validated().is_err());
    }
}
