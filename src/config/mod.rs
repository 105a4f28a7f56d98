//! Peripheral configuration.
//!
//! # Components
//!
//! - [`provisioning`] - device name, service layout and advertising settings
//!
//! Host builds read an optional JSON file named by [`CONFIG_ENV_VAR`]; the
//! device build always runs with [`ProvisioningConfig::default`].

mod provisioning;

pub use provisioning::{
    ConfigError, ProvisioningConfig, DEFAULT_DEVICE_NAME, DEFAULT_SERVICE_UUID,
    MAX_ADV_INTERVAL, MAX_DEVICE_NAME_LEN, MIN_ADV_INTERVAL, PASSWORD_UUID, WIFI_ID_UUID,
};

/// Environment variable holding the path of a JSON configuration file.
pub const CONFIG_ENV_VAR: &str = "PROVISIONER_CONFIG";
