//! Wi-Fi credentials captured over BLE.
//!
//! The store holds raw bytes exactly as the companion wrote them. This module
//! turns them into validated credentials for the component that later joins
//! the network.
//!
//! # Example
//!
//! ```
//! use ble_provisioner::credentials::{CredentialError, WifiCredentials};
//!
//! let creds = WifiCredentials::new("MyNetwork", "MyPassword").unwrap();
//! assert_eq!(creds.ssid(), "MyNetwork");
//! assert!(!creds.is_open());
//!
//! assert_eq!(WifiCredentials::new("", ""), Err(CredentialError::SsidEmpty));
//! ```

use crate::gatt::{AttributeIndex, AttributeStore};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Maximum SSID length per IEEE 802.11 standard.
pub const MAX_SSID_LEN: usize = 32;

/// Maximum password length for WPA2.
pub const MAX_PASSWORD_LEN: usize = 64;

/// Minimum password length for WPA2.
pub const MIN_PASSWORD_LEN: usize = 8;

/// Validated network credentials. Both strings are wiped on drop.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct WifiCredentials {
    ssid: String,
    password: String,
}

impl WifiCredentials {
    /// Validate and wrap credentials. An empty password denotes an open
    /// network.
    pub fn new(
        ssid: impl Into<String>,
        password: impl Into<String>,
    ) -> Result<Self, CredentialError> {
        let creds = Self {
            ssid: ssid.into(),
            password: password.into(),
        };
        creds.validate()?;
        Ok(creds)
    }

    /// Build credentials from raw attribute values.
    pub fn from_bytes(ssid: &[u8], password: &[u8]) -> Result<Self, CredentialError> {
        let ssid = std::str::from_utf8(ssid)
            .map_err(|_| CredentialError::InvalidUtf8(AttributeIndex::WifiId))?;
        let password = std::str::from_utf8(password)
            .map_err(|_| CredentialError::InvalidUtf8(AttributeIndex::Password))?;
        Self::new(ssid, password)
    }

    /// Read the current credentials out of the attribute store.
    pub fn from_store(store: &AttributeStore) -> Result<Self, CredentialError> {
        store.with_entry(AttributeIndex::WifiId, |ssid| {
            store.with_entry(AttributeIndex::Password, |password| {
                Self::from_bytes(ssid.value(), password.value())
            })
        })
    }

    pub fn ssid(&self) -> &str {
        &self.ssid
    }

    pub fn password(&self) -> &str {
        &self.password
    }

    /// Check if this is an open network (no password).
    pub fn is_open(&self) -> bool {
        self.password.is_empty()
    }

    fn validate(&self) -> Result<(), CredentialError> {
        if self.ssid.is_empty() {
            return Err(CredentialError::SsidEmpty);
        }
        if self.ssid.len() > MAX_SSID_LEN {
            return Err(CredentialError::SsidTooLong {
                len: self.ssid.len(),
                max: MAX_SSID_LEN,
            });
        }

        // Empty is OK for open networks
        if !self.password.is_empty() && self.password.len() < MIN_PASSWORD_LEN {
            return Err(CredentialError::PasswordTooShort {
                len: self.password.len(),
                min: MIN_PASSWORD_LEN,
            });
        }
        if self.password.len() > MAX_PASSWORD_LEN {
            return Err(CredentialError::PasswordTooLong {
                len: self.password.len(),
                max: MAX_PASSWORD_LEN,
            });
        }

        Ok(())
    }
}

impl fmt::Debug for WifiCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WifiCredentials")
            .field("ssid", &self.ssid)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Reasons stored values do not form usable credentials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialError {
    /// No SSID has been written.
    SsidEmpty,
    /// SSID exceeds maximum length.
    SsidTooLong { len: usize, max: usize },
    /// Password is too short for WPA2.
    PasswordTooShort { len: usize, min: usize },
    /// Password exceeds maximum length.
    PasswordTooLong { len: usize, max: usize },
    /// The attribute value is not valid UTF-8.
    InvalidUtf8(AttributeIndex),
}

impl fmt::Display for CredentialError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SsidEmpty => write!(f, "SSID cannot be empty"),
            Self::SsidTooLong { len, max } => {
                write!(f, "SSID too long: {} bytes (max {})", len, max)
            }
            Self::PasswordTooShort { len, min } => {
                write!(f, "password too short: {} bytes (min {})", len, min)
            }
            Self::PasswordTooLong { len, max } => {
                write!(f, "password too long: {} bytes (max {})", len, max)
            }
            Self::InvalidUtf8(index) => write!(f, "{} is not valid UTF-8", index),
        }
    }
}

impl std::error::Error for CredentialError {}
