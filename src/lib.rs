//! BLE provisioning peripheral library.
//!
//! A companion device connects over BLE and writes a Wi-Fi SSID and password
//! into two GATT attributes. This library contains the protocol core
//! (attribute table and store, GATT server and GAP state machines, bring-up)
//! behind the [`stack::BleStack`] boundary, so everything except the
//! Bluedroid adapter can be tested on the host machine without ESP32
//! hardware.

pub mod bootstrap;
pub mod config;
pub mod credentials;
#[cfg(feature = "esp32")]
pub mod esp;
pub mod events;
pub mod gap;
pub mod gatt;
pub mod loopback;
pub mod peripheral;
pub mod stack;

// Re-export commonly used items
pub use bootstrap::{BootError, BootStage};
pub use config::{ConfigError, ProvisioningConfig};
pub use credentials::{CredentialError, WifiCredentials};
pub use events::{EventHandler, GapEvent, GattsEvent};
pub use gatt::{AttributeIndex, AttributeStore, GattStatus};
pub use peripheral::{LifecycleState, Peripheral};
pub use stack::{BleStack, StackError};
