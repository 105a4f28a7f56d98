//! GATT server side of the provisioning service.
//!
//! # Components
//!
//! - [`table`] - attribute table and stack-assigned handle map
//! - [`store`] - bounded backing storage for attribute values
//! - [`status`] - ATT status codes used in responses
//! - [`server`] - GATT server event handling

mod server;
mod status;
mod store;
mod table;

pub use server::{GattServer, ReadRequest, Registration, WriteRequest};
pub use status::GattStatus;
pub use store::{AttributeStore, StoreEntry, StoreError, ATTRIBUTE_CAPACITY};
pub use table::{AttributeIndex, AttributeSpec, AttributeTable, BindError, Permissions};
