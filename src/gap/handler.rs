//! GAP event handling: advertising hand-off and security requests.
//!
//! # Security Considerations
//!
//! Every security request is accepted without any authentication policy.
//! Pairing therefore offers link encryption at best, and no protection
//! against an active attacker in radio range during provisioning.
//! Deployments that need authenticated pairing must replace
//! [`GapHandler::on_security_request`].

use super::advertising::{Advertiser, PayloadKind};
use crate::stack::{BleAddress, BleStack, StackStatus};
use log::{error, info, warn};
use std::sync::Arc;

/// Reacts to GAP events from the stack.
pub struct GapHandler<S: BleStack> {
    stack: Arc<S>,
    advertiser: Arc<Advertiser>,
}

impl<S: BleStack> GapHandler<S> {
    pub fn new(stack: Arc<S>, advertiser: Arc<Advertiser>) -> Self {
        Self { stack, advertiser }
    }

    /// A payload was committed; start advertising once both are in.
    pub fn on_advertising_committed(&self, kind: PayloadKind, status: StackStatus) {
        if let Err(e) = self
            .advertiser
            .on_committed(self.stack.as_ref(), kind, status)
        {
            error!("Failed to start advertising: {}", e);
        }
    }

    pub fn on_advertising_started(&self, status: StackStatus) {
        self.advertiser.on_started(status);
    }

    /// Accept the peer's security request unconditionally.
    pub fn on_security_request(&self, addr: BleAddress) {
        info!("Accepting security request from {}", addr);
        if let Err(e) = self.stack.security_response(addr, true) {
            warn!("Security response to {} failed: {}", addr, e);
        }
    }
}
