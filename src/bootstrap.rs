//! One-time bring-up of the BLE stack and the peripheral.
//!
//! The stages run strictly in order and none is retried: a failure at any
//! stage is fatal and reported as a [`BootError`] naming the stage. Once
//! [`start`] returns `Ok`, all further work happens in event callbacks.

use crate::peripheral::Peripheral;
use crate::stack::{BleStack, StackError};
use log::{error, info};
use std::fmt;

/// Bring-up stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootStage {
    ControllerInit,
    HostInit,
    GattsCallback,
    GapCallback,
    AppRegistration,
}

impl BootStage {
    pub const ALL: [BootStage; 5] = [
        Self::ControllerInit,
        Self::HostInit,
        Self::GattsCallback,
        Self::GapCallback,
        Self::AppRegistration,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ControllerInit => "controller init",
            Self::HostInit => "host init",
            Self::GattsCallback => "GATTS callback registration",
            Self::GapCallback => "GAP callback registration",
            Self::AppRegistration => "app registration",
        }
    }
}

impl fmt::Display for BootStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A bring-up stage failed; the peripheral cannot run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BootError {
    pub stage: BootStage,
    pub source: StackError,
}

impl fmt::Display for BootError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failed: {}", self.stage, self.source)
    }
}

impl std::error::Error for BootError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

/// Initialize the stack and request application registration.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use ble_provisioner::bootstrap::{self, BootStage};
/// use ble_provisioner::config::ProvisioningConfig;
/// use ble_provisioner::loopback::LoopbackStack;
/// use ble_provisioner::peripheral::Peripheral;
/// use ble_provisioner::stack::StackOp;
///
/// let stack = Arc::new(LoopbackStack::new());
/// stack.fail_next(StackOp::StartHost, 259);
/// let peripheral = Peripheral::new(stack.clone(), &ProvisioningConfig::default());
///
/// let err = bootstrap::start(stack.as_ref(), &peripheral).unwrap_err();
/// assert_eq!(err.stage, BootStage::HostInit);
/// ```
pub fn start<S: BleStack>(stack: &S, peripheral: &Peripheral<S>) -> Result<(), BootError> {
    for stage in BootStage::ALL {
        let result = match stage {
            BootStage::ControllerInit => stack.start_controller(),
            BootStage::HostInit => stack.start_host(),
            BootStage::GattsCallback => stack.register_gatts_callback(),
            BootStage::GapCallback => stack.register_gap_callback(),
            BootStage::AppRegistration => peripheral.register(),
        };

        if let Err(source) = result {
            let err = BootError { stage, source };
            error!("Bring-up aborted: {}", err);
            return Err(err);
        }
        info!("{} done", stage);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProvisioningConfig;
    use crate::loopback::{LoopbackStack, StackCall};
    use crate::peripheral::LifecycleState;
    use crate::stack::StackOp;
    use std::error::Error;
    use std::sync::Arc;

    fn setup() -> (Arc<LoopbackStack>, Peripheral<LoopbackStack>) {
        let stack = Arc::new(LoopbackStack::new());
        let peripheral = Peripheral::new(stack.clone(), &ProvisioningConfig::default());
        (stack, peripheral)
    }

    #[test]
    fn test_stages_run_in_order() {
        let (stack, peripheral) = setup();
        start(stack.as_ref(), &peripheral).unwrap();

        assert_eq!(
            stack.calls(),
            vec![
                StackCall::StartController,
                StackCall::StartHost,
                StackCall::RegisterGattsCallback,
                StackCall::RegisterGapCallback,
                StackCall::RegisterApp(0),
            ]
        );
        assert_eq!(peripheral.state(), LifecycleState::Registering);
    }

    #[test]
    fn test_boot_then_events_reach_advertising() {
        let (stack, peripheral) = setup();
        start(stack.as_ref(), &peripheral).unwrap();
        stack.pump(&peripheral);
        assert_eq!(peripheral.state(), LifecycleState::Advertising);
    }

    #[test]
    fn test_each_stage_failure_is_fatal() {
        let cases = [
            (StackOp::StartController, BootStage::ControllerInit),
            (StackOp::StartHost, BootStage::HostInit),
            (StackOp::RegisterGattsCallback, BootStage::GattsCallback),
            (StackOp::RegisterGapCallback, BootStage::GapCallback),
            (StackOp::RegisterApp, BootStage::AppRegistration),
        ];

        for (op, stage) in cases {
            let (stack, peripheral) = setup();
            stack.fail_next(op, -1);

            let err = start(stack.as_ref(), &peripheral).unwrap_err();
            assert_eq!(err.stage, stage);
            assert_eq!(err.source.op, op);

            // Nothing after the failing stage was attempted.
            assert_eq!(stack.calls().len(), stage as usize);
            assert_eq!(stack.pending(), 0);
            assert_eq!(peripheral.state(), LifecycleState::Unregistered);
        }
    }

    #[test]
    fn test_error_display_and_source() {
        let err = BootError {
            stage: BootStage::HostInit,
            source: StackError::new(StackOp::StartHost, 259),
        };
        assert_eq!(
            err.to_string(),
            "host init failed: start host failed with code 259"
        );
        assert!(err.source().is_some());
    }
}
