//! ATT status codes sent back to the peer.
//!
//! Only the codes the provisioning server actually produces are modelled.
//! Values follow the Bluetooth Core specification, Vol 3, Part F, 3.4.1.1.

use std::fmt;

/// Status of a read or write response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GattStatus {
    /// Request completed.
    Ok,
    /// The attribute cannot be read.
    ReadNotPermitted,
    /// The attribute cannot be written.
    WriteNotPermitted,
    /// The server does not support the request (prepared writes).
    RequestNotSupported,
    /// The offset is past the end of the attribute value.
    InvalidOffset,
    /// No attribute was found for the request.
    AttributeNotFound,
    /// The written value exceeds the attribute's capacity.
    InvalidAttributeValueLength,
}

impl GattStatus {
    /// Wire value of the status.
    pub fn code(self) -> u8 {
        match self {
            Self::Ok => 0x00,
            Self::ReadNotPermitted => 0x02,
            Self::WriteNotPermitted => 0x03,
            Self::RequestNotSupported => 0x06,
            Self::InvalidOffset => 0x07,
            Self::AttributeNotFound => 0x0A,
            Self::InvalidAttributeValueLength => 0x0D,
        }
    }

    pub fn is_ok(self) -> bool {
        self == Self::Ok
    }
}

impl fmt::Display for GattStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Ok => "ok",
            Self::ReadNotPermitted => "read not permitted",
            Self::WriteNotPermitted => "write not permitted",
            Self::RequestNotSupported => "request not supported",
            Self::InvalidOffset => "invalid offset",
            Self::AttributeNotFound => "attribute not found",
            Self::InvalidAttributeValueLength => "invalid attribute value length",
        };
        write!(f, "{} (0x{:02X})", name, self.code())
    }
}
