//! The provisioning peripheral.
//!
//! [`Peripheral`] owns the GATT server and the GAP handler and is the single
//! [`EventHandler`] the stack adapter delivers events to. Its lifecycle state
//! is derived from the server's registration and connection state and the
//! advertising controller, never stored separately:
//!
//! ```text
//! Unregistered → Registering → AdvertisingConfigured → Advertising → Connected
//!                                        ▲                              │
//!                                        └──────── disconnect ──────────┘
//!
//! Registering ──rejected──▶ RegistrationFailed (terminal)
//! ```
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use ble_provisioner::config::ProvisioningConfig;
//! use ble_provisioner::loopback::LoopbackStack;
//! use ble_provisioner::peripheral::{LifecycleState, Peripheral};
//!
//! let stack = Arc::new(LoopbackStack::new());
//! let peripheral = Peripheral::new(stack.clone(), &ProvisioningConfig::default());
//!
//! peripheral.register().unwrap();
//! stack.pump(&peripheral);
//! assert_eq!(peripheral.state(), LifecycleState::Advertising);
//! ```

use crate::config::ProvisioningConfig;
use crate::credentials::{CredentialError, WifiCredentials};
use crate::events::EventHandler;
use crate::gap::{AdvertisingState, Advertiser, GapHandler, PayloadKind};
use crate::gatt::{
    AttributeStore, AttributeTable, GattServer, ReadRequest, Registration, WriteRequest,
};
use crate::stack::{
    BleAddress, BleStack, ConnectionId, GattInterface, Handle, StackError, StackStatus,
};
use std::fmt;
use std::sync::Arc;

/// Externally visible lifecycle of the peripheral.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Unregistered,
    Registering,
    /// Registered; advertising payloads submitted but not (yet) advertising.
    AdvertisingConfigured,
    Advertising,
    Connected,
    /// The stack refused application registration; the peripheral never runs.
    RegistrationFailed,
}

impl LifecycleState {
    /// True once the peripheral can make no further progress.
    pub fn is_fatal(self) -> bool {
        self == Self::RegistrationFailed
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Unregistered => "unregistered",
            Self::Registering => "registering",
            Self::AdvertisingConfigured => "advertising configured",
            Self::Advertising => "advertising",
            Self::Connected => "connected",
            Self::RegistrationFailed => "registration failed",
        };
        f.write_str(name)
    }
}

pub struct Peripheral<S: BleStack> {
    server: GattServer<S>,
    gap: GapHandler<S>,
    advertiser: Arc<Advertiser>,
}

impl<S: BleStack> Peripheral<S> {
    pub fn new(stack: Arc<S>, config: &ProvisioningConfig) -> Self {
        let advertiser = Arc::new(config.advertiser());
        let server = GattServer::new(
            stack.clone(),
            advertiser.clone(),
            config.table(),
            config.app_id,
            config.device_name.clone(),
            config.service_uuid,
        );
        let gap = GapHandler::new(stack, advertiser.clone());
        Self {
            server,
            gap,
            advertiser,
        }
    }

    /// Request application registration; everything else follows from the
    /// stack's confirmations.
    pub fn register(&self) -> Result<(), StackError> {
        self.server.register()
    }

    pub fn state(&self) -> LifecycleState {
        match self.server.registration() {
            Registration::Unregistered => LifecycleState::Unregistered,
            Registration::Registering => LifecycleState::Registering,
            Registration::Rejected(_) => LifecycleState::RegistrationFailed,
            Registration::Registered(_) if self.server.peer().is_some() => {
                LifecycleState::Connected
            }
            Registration::Registered(_) => match self.advertiser.state() {
                AdvertisingState::Advertising => LifecycleState::Advertising,
                _ => LifecycleState::AdvertisingConfigured,
            },
        }
    }

    pub fn table(&self) -> &AttributeTable {
        self.server.table()
    }

    pub fn store(&self) -> &AttributeStore {
        self.server.store()
    }

    /// Credentials written by the companion so far.
    pub fn credentials(&self) -> Result<WifiCredentials, CredentialError> {
        WifiCredentials::from_store(self.server.store())
    }
}

impl<S: BleStack> EventHandler for Peripheral<S> {
    fn on_registered(&self, gatts_if: GattInterface, status: StackStatus, app_id: u16) {
        self.server.on_registered(gatts_if, status, app_id);
    }

    fn on_table_created(&self, status: StackStatus, service_handle: Handle, handles: &[Handle]) {
        self.server.on_table_created(status, service_handle, handles);
    }

    fn on_connect(&self, conn_id: ConnectionId, addr: BleAddress) {
        self.server.on_connect(conn_id, addr);
    }

    fn on_disconnect(&self, conn_id: ConnectionId, addr: BleAddress, reason: u16) {
        self.server.on_disconnect(conn_id, addr, reason);
    }

    fn on_read(&self, gatts_if: GattInterface, request: &ReadRequest) {
        self.server.on_read(gatts_if, request);
    }

    fn on_write(&self, gatts_if: GattInterface, request: &WriteRequest) {
        self.server.on_write(gatts_if, request);
    }

    fn on_advertising_committed(&self, kind: PayloadKind, status: StackStatus) {
        self.gap.on_advertising_committed(kind, status);
    }

    fn on_advertising_started(&self, status: StackStatus) {
        self.gap.on_advertising_started(status);
    }

    fn on_security_request(&self, addr: BleAddress) {
        self.gap.on_security_request(addr);
    }
}
