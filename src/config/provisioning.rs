//! Static peripheral configuration.
//!
//! # Example
//!
//! ```
//! use ble_provisioner::config::ProvisioningConfig;
//!
//! let config = ProvisioningConfig::from_json(r#"{ "device_name": "Kitchen Sensor" }"#).unwrap();
//! assert_eq!(config.device_name, "Kitchen Sensor");
//! assert_eq!(config.service_uuid, 0x00FF);
//! ```

use crate::gap::{AdvParams, AdvPayload, Advertiser, PayloadKind};
use crate::gatt::{AttributeIndex, AttributeSpec, AttributeTable, Permissions, ATTRIBUTE_CAPACITY};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Longest device name that still fits a legacy advertising payload
/// next to the flags field.
pub const MAX_DEVICE_NAME_LEN: usize = 29;

/// Advertising interval bounds, in 0.625 ms units.
pub const MIN_ADV_INTERVAL: u16 = 0x20;
pub const MAX_ADV_INTERVAL: u16 = 0x4000;

pub const DEFAULT_DEVICE_NAME: &str = "GATT Server";
pub const DEFAULT_SERVICE_UUID: u16 = 0x00FF;
pub const WIFI_ID_UUID: u16 = 0xEEEE;
pub const PASSWORD_UUID: u16 = 0xDDDD;

/// Everything the peripheral needs to know before bring-up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvisioningConfig {
    /// Name set on the stack and included in advertising.
    pub device_name: String,
    /// Application profile id registered with the stack.
    pub app_id: u16,
    /// 16-bit UUID of the primary service.
    pub service_uuid: u16,
    /// Attribute specifications in [`AttributeIndex::ALL`] order.
    pub attributes: [AttributeSpec; AttributeIndex::COUNT],
    pub adv_params: AdvParams,
    pub primary: AdvPayload,
    pub scan_response: AdvPayload,
}

impl Default for ProvisioningConfig {
    fn default() -> Self {
        Self {
            device_name: DEFAULT_DEVICE_NAME.to_string(),
            app_id: 0,
            service_uuid: DEFAULT_SERVICE_UUID,
            attributes: [
                AttributeSpec::new(WIFI_ID_UUID, Permissions::READ_WRITE, ATTRIBUTE_CAPACITY),
                AttributeSpec::new(PASSWORD_UUID, Permissions::READ_WRITE, ATTRIBUTE_CAPACITY),
            ],
            adv_params: AdvParams::default(),
            primary: AdvPayload::new(PayloadKind::Primary),
            scan_response: AdvPayload::new(PayloadKind::ScanResponse),
        }
    }
}

impl ProvisioningConfig {
    /// Parse and validate a JSON document. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a JSON configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(format!("{}: {}", path.display(), e)))?;
        Self::from_json(&json)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.device_name.is_empty() {
            return Err(ConfigError::DeviceNameEmpty);
        }
        if self.device_name.len() > MAX_DEVICE_NAME_LEN {
            return Err(ConfigError::DeviceNameTooLong {
                len: self.device_name.len(),
                max: MAX_DEVICE_NAME_LEN,
            });
        }

        let params = &self.adv_params;
        if params.interval_min > params.interval_max
            || params.interval_min < MIN_ADV_INTERVAL
            || params.interval_max > MAX_ADV_INTERVAL
        {
            return Err(ConfigError::IntervalOutOfRange {
                min: params.interval_min,
                max: params.interval_max,
            });
        }

        let mut seen = vec![self.service_uuid];
        for spec in &self.attributes {
            if seen.contains(&spec.uuid) {
                return Err(ConfigError::DuplicateUuid(spec.uuid));
            }
            seen.push(spec.uuid);

            if spec.max_len == 0 || spec.max_len > ATTRIBUTE_CAPACITY {
                return Err(ConfigError::CapacityOutOfRange {
                    uuid: spec.uuid,
                    len: spec.max_len,
                    max: ATTRIBUTE_CAPACITY,
                });
            }
        }

        if self.primary.kind != PayloadKind::Primary {
            return Err(ConfigError::PayloadKindMismatch(self.primary.kind));
        }
        if self.scan_response.kind != PayloadKind::ScanResponse {
            return Err(ConfigError::PayloadKindMismatch(self.scan_response.kind));
        }

        Ok(())
    }

    /// Unbound attribute table for this configuration.
    pub fn table(&self) -> AttributeTable {
        AttributeTable::new(self.attributes)
    }

    pub fn advertiser(&self) -> Advertiser {
        Advertiser::new(
            self.adv_params.clone(),
            self.primary.clone(),
            self.scan_response.clone(),
        )
    }
}

/// Errors that can occur while loading configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// The configuration file could not be read.
    Io(String),
    /// The document is not valid configuration JSON.
    Parse(String),
    DeviceNameEmpty,
    DeviceNameTooLong { len: usize, max: usize },
    /// Advertising interval bounds are inverted or out of range.
    IntervalOutOfRange { min: u16, max: u16 },
    /// Two attributes, or an attribute and the service, share a UUID.
    DuplicateUuid(u16),
    CapacityOutOfRange { uuid: u16, len: usize, max: usize },
    /// A payload is configured in the wrong slot.
    PayloadKindMismatch(PayloadKind),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(msg) => write!(f, "cannot read configuration: {}", msg),
            Self::Parse(msg) => write!(f, "invalid configuration: {}", msg),
            Self::DeviceNameEmpty => write!(f, "device name cannot be empty"),
            Self::DeviceNameTooLong { len, max } => {
                write!(f, "device name too long: {} bytes (max {})", len, max)
            }
            Self::IntervalOutOfRange { min, max } => write!(
                f,
                "advertising interval 0x{:04X}..0x{:04X} outside 0x{:04X}..0x{:04X}",
                min, max, MIN_ADV_INTERVAL, MAX_ADV_INTERVAL
            ),
            Self::DuplicateUuid(uuid) => write!(f, "UUID 0x{:04X} used twice", uuid),
            Self::CapacityOutOfRange { uuid, len, max } => write!(
                f,
                "attribute 0x{:04X} capacity {} outside 1..={}",
                uuid, len, max
            ),
            Self::PayloadKindMismatch(kind) => {
                write!(f, "{} payload configured in the wrong slot", kind)
            }
        }
    }
}

impl std::error::Error for ConfigError {}
