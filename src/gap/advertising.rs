//! Advertising parameters, payloads and the advertising controller.
//!
//! Two payloads are submitted after registration: the primary advertisement
//! and the scan response. The stack confirms each one separately, and
//! advertising may only start once both are committed:
//!
//! ```text
//! Idle ──configure──▶ Configuring ──both committed──▶ Starting ──started──▶ Advertising
//!                                                        ▲                      │
//!                                                        └──resume── Ready ◀────┘ peer connected
//! ```
//!
//! A commit confirmation arriving after the start request went out is
//! redundant and ignored, so the start request is issued once per cycle.

use crate::stack::{BleStack, StackError, StackStatus};
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Mutex, MutexGuard};

/// Advertising PDU type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AdvType {
    /// Connectable, scannable, undirected.
    ConnectableUndirected,
    /// Scannable, not connectable.
    ScannableUndirected,
    /// Neither connectable nor scannable.
    NonConnectable,
}

/// Address type used as our own advertising address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OwnAddressType {
    Public,
    Random,
}

/// Filter policy for scan and connection requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilterPolicy {
    /// Accept scan and connection requests from anyone.
    AllowAny,
    /// Scan requests from the accept list only, connections from anyone.
    ScanAcceptListOnly,
    /// Scan requests from anyone, connections from the accept list only.
    ConnectAcceptListOnly,
    /// Both restricted to the accept list.
    AcceptListOnly,
}

/// Advertising channels 37, 38 and 39.
pub const CHANNEL_MAP_ALL: u8 = 0x07;

/// Flag: LE general discoverable mode.
pub const FLAG_GENERAL_DISCOVERABLE: u8 = 0x02;

/// Flag: BR/EDR not supported.
pub const FLAG_BREDR_NOT_SUPPORTED: u8 = 0x04;

/// Parameters passed to the stack when advertising starts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdvParams {
    /// Minimum advertising interval, in 0.625 ms units.
    pub interval_min: u16,
    /// Maximum advertising interval, in 0.625 ms units.
    pub interval_max: u16,
    pub adv_type: AdvType,
    pub own_address_type: OwnAddressType,
    /// Bit mask of advertising channels.
    pub channel_map: u8,
    pub filter_policy: FilterPolicy,
}

impl Default for AdvParams {
    fn default() -> Self {
        Self {
            interval_min: 0x20,
            interval_max: 0x40,
            adv_type: AdvType::ConnectableUndirected,
            own_address_type: OwnAddressType::Public,
            channel_map: CHANNEL_MAP_ALL,
            filter_policy: FilterPolicy::AllowAny,
        }
    }
}

/// Which of the two payloads a commit refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PayloadKind {
    Primary,
    ScanResponse,
}

impl fmt::Display for PayloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Primary => write!(f, "advertising data"),
            Self::ScanResponse => write!(f, "scan response"),
        }
    }
}

/// One advertising payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdvPayload {
    pub kind: PayloadKind,
    /// Include the device name set via the stack.
    pub include_name: bool,
    pub include_tx_power: bool,
    /// Preferred connection interval minimum, in 1.25 ms units.
    pub min_interval: u16,
    /// Preferred connection interval maximum, in 1.25 ms units.
    pub max_interval: u16,
    /// AD flags byte.
    pub flag: u8,
    #[serde(default)]
    pub manufacturer_data: Vec<u8>,
    #[serde(default)]
    pub service_data: Vec<u8>,
}

impl AdvPayload {
    /// Payload with the default provisioning contents.
    pub fn new(kind: PayloadKind) -> Self {
        Self {
            kind,
            include_name: true,
            include_tx_power: false,
            min_interval: 0x20,
            max_interval: 0x40,
            flag: FLAG_GENERAL_DISCOVERABLE | FLAG_BREDR_NOT_SUPPORTED,
            manufacturer_data: Vec::new(),
            service_data: Vec::new(),
        }
    }
}

/// Observable state of the advertising controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvertisingState {
    /// No payload has been submitted.
    Idle,
    /// Payloads submitted, waiting for the stack to commit both.
    Configuring { primary: bool, scan_response: bool },
    /// Both payloads committed, not advertising.
    Ready,
    /// Start requested, waiting for confirmation.
    Starting,
    Advertising,
}

impl AdvertisingState {
    /// True once both payloads have been accepted by the stack.
    pub fn is_configured(self) -> bool {
        !matches!(self, Self::Idle | Self::Configuring { .. })
    }
}

/// Drives payload submission and advertising start.
#[derive(Debug)]
pub struct Advertiser {
    params: AdvParams,
    primary: AdvPayload,
    scan_response: AdvPayload,
    state: Mutex<AdvertisingState>,
}

impl Advertiser {
    pub fn new(params: AdvParams, primary: AdvPayload, scan_response: AdvPayload) -> Self {
        Self {
            params,
            primary,
            scan_response,
            state: Mutex::new(AdvertisingState::Idle),
        }
    }

    pub fn state(&self) -> AdvertisingState {
        *self.lock()
    }

    /// Submit both payloads to the stack for commit.
    pub fn configure(&self, stack: &dyn BleStack) -> Result<(), StackError> {
        let mut state = self.lock();
        *state = AdvertisingState::Configuring {
            primary: false,
            scan_response: false,
        };
        stack.configure_advertising(&self.primary)?;
        stack.configure_advertising(&self.scan_response)?;
        debug!("Advertising payloads submitted");
        Ok(())
    }

    /// Handle the stack's confirmation that a payload was committed.
    pub fn on_committed(
        &self,
        stack: &dyn BleStack,
        kind: PayloadKind,
        status: StackStatus,
    ) -> Result<(), StackError> {
        let mut state = self.lock();
        if !status.is_success() {
            warn!("Stack rejected {}: {}", kind, status);
            return Ok(());
        }

        match *state {
            AdvertisingState::Configuring {
                mut primary,
                mut scan_response,
            } => {
                match kind {
                    PayloadKind::Primary => primary = true,
                    PayloadKind::ScanResponse => scan_response = true,
                }
                if primary && scan_response {
                    info!("Advertising payloads committed");
                    Self::request_start(&mut state, stack, &self.params)
                } else {
                    debug!("{} committed, waiting for the other payload", kind);
                    *state = AdvertisingState::Configuring {
                        primary,
                        scan_response,
                    };
                    Ok(())
                }
            }
            AdvertisingState::Idle => {
                warn!("Ignoring {} commit before any payload was submitted", kind);
                Ok(())
            }
            other => {
                debug!("Ignoring redundant {} commit in state {:?}", kind, other);
                Ok(())
            }
        }
    }

    /// Handle the stack's confirmation of an advertising start request.
    pub fn on_started(&self, status: StackStatus) {
        let mut state = self.lock();
        match (*state, status.is_success()) {
            (AdvertisingState::Starting, true) => {
                info!("Advertising started");
                *state = AdvertisingState::Advertising;
            }
            (AdvertisingState::Starting, false) => {
                error!("Advertising start failed: {}", status);
                *state = AdvertisingState::Ready;
            }
            (other, _) => debug!("Ignoring advertising start confirmation in state {:?}", other),
        }
    }

    /// The stack stops advertising when a peer connects.
    pub fn on_connected(&self) {
        let mut state = self.lock();
        if matches!(
            *state,
            AdvertisingState::Advertising | AdvertisingState::Starting
        ) {
            *state = AdvertisingState::Ready;
        }
    }

    /// Restart advertising if it is configured but stopped.
    ///
    /// While payloads are still being committed the start follows the last
    /// commit, so nothing is requested here.
    pub fn resume(&self, stack: &dyn BleStack) -> Result<(), StackError> {
        let mut state = self.lock();
        match *state {
            AdvertisingState::Ready => {
                info!("Resuming advertising");
                Self::request_start(&mut state, stack, &self.params)
            }
            other => {
                debug!("Not resuming advertising in state {:?}", other);
                Ok(())
            }
        }
    }

    fn request_start(
        state: &mut AdvertisingState,
        stack: &dyn BleStack,
        params: &AdvParams,
    ) -> Result<(), StackError> {
        match stack.start_advertising(params) {
            Ok(()) => {
                *state = AdvertisingState::Starting;
                Ok(())
            }
            Err(e) => {
                *state = AdvertisingState::Ready;
                Err(e)
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, AdvertisingState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for Advertiser {
    fn default() -> Self {
        Self::new(
            AdvParams::default(),
            AdvPayload::new(PayloadKind::Primary),
            AdvPayload::new(PayloadKind::ScanResponse),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loopback::{LoopbackStack, StackCall};

    fn start_count(stack: &LoopbackStack) -> usize {
        stack
            .calls()
            .iter()
            .filter(|call| matches!(call, StackCall::StartAdvertising(_)))
            .count()
    }

    // ==================== Defaults Tests ====================

    #[test]
    fn test_default_params() {
        let params = AdvParams::default();
        assert_eq!(params.interval_min, 0x20);
        assert_eq!(params.interval_max, 0x40);
        assert_eq!(params.channel_map, CHANNEL_MAP_ALL);
        assert_eq!(params.adv_type, AdvType::ConnectableUndirected);
    }

    #[test]
    fn test_default_payload_flags() {
        let payload = AdvPayload::new(PayloadKind::Primary);
        assert_eq!(payload.flag, 0x06);
        assert!(payload.include_name);
        assert!(!payload.include_tx_power);
    }

    // ==================== Commit Ordering Tests ====================

    #[test]
    fn test_configure_submits_both_payloads() {
        let stack = LoopbackStack::new();
        let advertiser = Advertiser::default();
        advertiser.configure(&stack).unwrap();

        let calls = stack.calls();
        assert!(matches!(
            &calls[0],
            StackCall::ConfigureAdvertising(p) if p.kind == PayloadKind::Primary
        ));
        assert!(matches!(
            &calls[1],
            StackCall::ConfigureAdvertising(p) if p.kind == PayloadKind::ScanResponse
        ));
        assert_eq!(
            advertiser.state(),
            AdvertisingState::Configuring {
                primary: false,
                scan_response: false
            }
        );
    }

    #[test]
    fn test_start_only_after_both_commits() {
        let stack = LoopbackStack::new();
        let advertiser = Advertiser::default();
        advertiser.configure(&stack).unwrap();

        advertiser
            .on_committed(&stack, PayloadKind::Primary, StackStatus::Success)
            .unwrap();
        assert_eq!(start_count(&stack), 0);
        assert!(!advertiser.state().is_configured());

        advertiser
            .on_committed(&stack, PayloadKind::ScanResponse, StackStatus::Success)
            .unwrap();
        assert_eq!(start_count(&stack), 1);
        assert_eq!(advertiser.state(), AdvertisingState::Starting);
    }

    #[test]
    fn test_commit_order_does_not_matter() {
        let stack = LoopbackStack::new();
        let advertiser = Advertiser::default();
        advertiser.configure(&stack).unwrap();

        advertiser
            .on_committed(&stack, PayloadKind::ScanResponse, StackStatus::Success)
            .unwrap();
        assert_eq!(start_count(&stack), 0);
        advertiser
            .on_committed(&stack, PayloadKind::Primary, StackStatus::Success)
            .unwrap();
        assert_eq!(start_count(&stack), 1);
    }

    #[test]
    fn test_same_payload_twice_is_not_both() {
        let stack = LoopbackStack::new();
        let advertiser = Advertiser::default();
        advertiser.configure(&stack).unwrap();

        for _ in 0..2 {
            advertiser
                .on_committed(&stack, PayloadKind::Primary, StackStatus::Success)
                .unwrap();
        }
        assert_eq!(start_count(&stack), 0);
    }

    #[test]
    fn test_failed_commit_does_not_count() {
        let stack = LoopbackStack::new();
        let advertiser = Advertiser::default();
        advertiser.configure(&stack).unwrap();

        advertiser
            .on_committed(&stack, PayloadKind::Primary, StackStatus::Success)
            .unwrap();
        advertiser
            .on_committed(&stack, PayloadKind::ScanResponse, StackStatus::Failed(0x13))
            .unwrap();
        assert_eq!(start_count(&stack), 0);
        assert_eq!(
            advertiser.state(),
            AdvertisingState::Configuring {
                primary: true,
                scan_response: false
            }
        );
    }

    #[test]
    fn test_redundant_commit_is_ignored() {
        let stack = LoopbackStack::new();
        let advertiser = Advertiser::default();
        advertiser.configure(&stack).unwrap();
        advertiser
            .on_committed(&stack, PayloadKind::Primary, StackStatus::Success)
            .unwrap();
        advertiser
            .on_committed(&stack, PayloadKind::ScanResponse, StackStatus::Success)
            .unwrap();
        advertiser.on_started(StackStatus::Success);

        advertiser
            .on_committed(&stack, PayloadKind::ScanResponse, StackStatus::Success)
            .unwrap();
        assert_eq!(start_count(&stack), 1);
        assert_eq!(advertiser.state(), AdvertisingState::Advertising);
    }

    #[test]
    fn test_commit_before_configure_is_ignored() {
        let stack = LoopbackStack::new();
        let advertiser = Advertiser::default();
        advertiser
            .on_committed(&stack, PayloadKind::Primary, StackStatus::Success)
            .unwrap();
        assert_eq!(advertiser.state(), AdvertisingState::Idle);
        assert!(stack.calls().is_empty());
    }

    // ==================== Start/Resume Tests ====================

    #[test]
    fn test_start_failure_returns_to_ready() {
        let stack = LoopbackStack::new();
        let advertiser = Advertiser::default();
        advertiser.configure(&stack).unwrap();
        advertiser
            .on_committed(&stack, PayloadKind::Primary, StackStatus::Success)
            .unwrap();
        advertiser
            .on_committed(&stack, PayloadKind::ScanResponse, StackStatus::Success)
            .unwrap();

        advertiser.on_started(StackStatus::Failed(1));
        assert_eq!(advertiser.state(), AdvertisingState::Ready);
    }

    #[test]
    fn test_connect_then_resume() {
        let stack = LoopbackStack::new();
        let advertiser = Advertiser::default();
        advertiser.configure(&stack).unwrap();
        advertiser
            .on_committed(&stack, PayloadKind::Primary, StackStatus::Success)
            .unwrap();
        advertiser
            .on_committed(&stack, PayloadKind::ScanResponse, StackStatus::Success)
            .unwrap();
        advertiser.on_started(StackStatus::Success);

        advertiser.on_connected();
        assert_eq!(advertiser.state(), AdvertisingState::Ready);

        advertiser.resume(&stack).unwrap();
        assert_eq!(start_count(&stack), 2);
        assert_eq!(advertiser.state(), AdvertisingState::Starting);
    }

    #[test]
    fn test_resume_while_configuring_does_nothing() {
        let stack = LoopbackStack::new();
        let advertiser = Advertiser::default();
        advertiser.configure(&stack).unwrap();
        advertiser.resume(&stack).unwrap();
        assert_eq!(start_count(&stack), 0);
    }

    #[test]
    fn test_resume_while_advertising_does_nothing() {
        let stack = LoopbackStack::new();
        let advertiser = Advertiser::default();
        advertiser.configure(&stack).unwrap();
        advertiser
            .on_committed(&stack, PayloadKind::Primary, StackStatus::Success)
            .unwrap();
        advertiser
            .on_committed(&stack, PayloadKind::ScanResponse, StackStatus::Success)
            .unwrap();
        advertiser.on_started(StackStatus::Success);

        advertiser.resume(&stack).unwrap();
        assert_eq!(start_count(&stack), 1);
    }
}
