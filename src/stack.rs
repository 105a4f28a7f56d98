//! Boundary with the external BLE stack.
//!
//! The provisioning core never talks to a radio directly. Everything it needs
//! from the stack goes through the [`BleStack`] trait: bring-up, callback
//! registration, advertising, attribute table registration and request
//! responses. The ESP32 build implements it on top of Bluedroid
//! (`crate::esp::Bluedroid`); host builds and tests use
//! [`crate::loopback::LoopbackStack`].
//!
//! Requests arriving from the stack travel the other way, as
//! [`crate::events::GattsEvent`] and [`crate::events::GapEvent`] values.

use crate::gap::{AdvParams, AdvPayload};
use crate::gatt::{AttributeSpec, GattStatus};
use std::fmt;

/// Bluetooth device address of a peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BleAddress([u8; 6]);

impl BleAddress {
    /// Create a new BLE address from raw bytes.
    pub const fn new(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }

    /// Get the raw bytes of the address.
    pub const fn as_bytes(&self) -> &[u8; 6] {
        &self.0
    }
}

impl fmt::Display for BleAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            self.0[0], self.0[1], self.0[2], self.0[3], self.0[4], self.0[5]
        )
    }
}

/// Stack-assigned attribute handle.
pub type Handle = u16;

/// GATT server interface assigned to our application profile at registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GattInterface(pub u8);

/// Identifier of a peer session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub u16);

/// Identifier correlating a request with its response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransactionId(pub u32);

/// Completion status carried by asynchronous stack confirmations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackStatus {
    /// The operation completed.
    Success,
    /// The operation failed with a stack-specific code.
    Failed(u32),
}

impl StackStatus {
    /// Map a raw status code (0 = success) to a `StackStatus`.
    pub fn from_code(code: u32) -> Self {
        if code == 0 {
            Self::Success
        } else {
            Self::Failed(code)
        }
    }

    pub fn is_success(self) -> bool {
        self == Self::Success
    }
}

impl fmt::Display for StackStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Failed(code) => write!(f, "failed (0x{:X})", code),
        }
    }
}

/// Value returned alongside a successful read response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseValue<'a> {
    /// Handle of the attribute being answered.
    pub handle: Handle,
    /// Offset the value starts at (non-zero for long reads).
    pub offset: u16,
    /// Value bytes.
    pub value: &'a [u8],
}

/// Outbound stack operation, used to tag [`StackError`]s.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackOp {
    StartController,
    StartHost,
    RegisterGattsCallback,
    RegisterGapCallback,
    RegisterApp,
    SetDeviceName,
    ConfigureAdvertising,
    StartAdvertising,
    CreateAttributeTable,
    StartService,
    SendResponse,
    SecurityResponse,
}

impl StackOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StartController => "start controller",
            Self::StartHost => "start host",
            Self::RegisterGattsCallback => "register GATT server callback",
            Self::RegisterGapCallback => "register GAP callback",
            Self::RegisterApp => "register application",
            Self::SetDeviceName => "set device name",
            Self::ConfigureAdvertising => "configure advertising data",
            Self::StartAdvertising => "start advertising",
            Self::CreateAttributeTable => "create attribute table",
            Self::StartService => "start service",
            Self::SendResponse => "send response",
            Self::SecurityResponse => "security response",
        }
    }
}

/// An outbound stack call failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackError {
    /// Operation that failed.
    pub op: StackOp,
    /// Stack-specific error code.
    pub code: i32,
}

impl StackError {
    pub fn new(op: StackOp, code: i32) -> Self {
        Self { op, code }
    }
}

impl fmt::Display for StackError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failed with code {}", self.op.as_str(), self.code)
    }
}

impl std::error::Error for StackError {}

/// Calls the provisioning core makes into the BLE stack.
///
/// Every method is a request: confirmations arrive later as events. The
/// implementation must be callable from the stack's own callback context,
/// hence the `Send + Sync` bound.
pub trait BleStack: Send + Sync {
    /// Initialize and enable the radio controller.
    fn start_controller(&self) -> Result<(), StackError>;

    /// Initialize and enable the host protocol stack.
    fn start_host(&self) -> Result<(), StackError>;

    /// Route GATT server events to the installed handler.
    fn register_gatts_callback(&self) -> Result<(), StackError>;

    /// Route GAP events to the installed handler.
    fn register_gap_callback(&self) -> Result<(), StackError>;

    /// Register one application profile. Confirmed by
    /// [`crate::events::GattsEvent::Registered`].
    fn register_app(&self, app_id: u16) -> Result<(), StackError>;

    fn set_device_name(&self, name: &str) -> Result<(), StackError>;

    /// Submit an advertising or scan-response payload. Confirmed by
    /// [`crate::events::GapEvent::AdvertisingDataCommitted`].
    fn configure_advertising(&self, payload: &AdvPayload) -> Result<(), StackError>;

    /// Start advertising. Confirmed by
    /// [`crate::events::GapEvent::AdvertisingStarted`].
    fn start_advertising(&self, params: &AdvParams) -> Result<(), StackError>;

    /// Register the attribute table under one primary service. Confirmed by
    /// [`crate::events::GattsEvent::AttributeTableCreated`].
    fn create_attribute_table(
        &self,
        gatts_if: GattInterface,
        service_uuid: u16,
        attributes: &[AttributeSpec],
    ) -> Result<(), StackError>;

    fn start_service(&self, service_handle: Handle) -> Result<(), StackError>;

    /// Answer a read or write request.
    fn send_response(
        &self,
        gatts_if: GattInterface,
        conn_id: ConnectionId,
        trans_id: TransactionId,
        status: GattStatus,
        value: Option<ResponseValue<'_>>,
    ) -> Result<(), StackError>;

    /// Answer a peer's security (pairing) request.
    fn security_response(&self, addr: BleAddress, accept: bool) -> Result<(), StackError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_display() {
        let addr = BleAddress::new([0x11, 0x22, 0x33, 0xAA, 0xBB, 0x0C]);
        assert_eq!(addr.to_string(), "11:22:33:AA:BB:0C");
    }

    #[test]
    fn test_status_from_code() {
        assert_eq!(StackStatus::from_code(0), StackStatus::Success);
        assert_eq!(StackStatus::from_code(0x85), StackStatus::Failed(0x85));
        assert!(!StackStatus::from_code(1).is_success());
    }

    #[test]
    fn test_stack_error_display() {
        let err = StackError::new(StackOp::RegisterApp, 259);
        assert_eq!(err.to_string(), "register application failed with code 259");
    }
}
