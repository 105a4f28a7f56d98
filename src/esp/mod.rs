//! ESP32 platform layer.
//!
//! - [`bluedroid`] - [`crate::stack::BleStack`] on top of the ESP-IDF Bluedroid host

mod bluedroid;

pub use bluedroid::Bluedroid;
