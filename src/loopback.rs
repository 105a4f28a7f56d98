//! In-memory BLE stack for host runs and tests.
//!
//! [`LoopbackStack`] records every call made into it and, like a real stack,
//! answers asynchronous requests with confirmation events. Events are queued
//! rather than delivered re-entrantly; [`LoopbackStack::pump`] drains the
//! queue into a handler. A simulated peer can be driven with
//! [`LoopbackStack::connect_peer`], [`LoopbackStack::peer_read`] and
//! [`LoopbackStack::peer_write`].
//!
//! ```
//! use ble_provisioner::loopback::{LoopbackStack, StackCall};
//! use ble_provisioner::stack::BleStack;
//!
//! let stack = LoopbackStack::new();
//! stack.register_app(0).unwrap();
//! assert_eq!(stack.calls(), vec![StackCall::RegisterApp(0)]);
//! assert_eq!(stack.pending(), 1);
//! ```

use crate::events::{dispatch_gap, dispatch_gatts, EventHandler, GapEvent, GattsEvent};
use crate::gap::{AdvParams, AdvPayload, PayloadKind};
use crate::gatt::{AttributeSpec, AttributeTable, GattStatus, ReadRequest, WriteRequest};
use crate::stack::{
    BleAddress, BleStack, ConnectionId, GattInterface, Handle, ResponseValue, StackError,
    StackOp, StackStatus, TransactionId,
};
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

/// Interface assigned to every registered application.
pub const LOOPBACK_INTERFACE: GattInterface = GattInterface(3);

/// First handle of the attribute table.
pub const LOOPBACK_SERVICE_HANDLE: Handle = 40;

/// A call made into the loopback stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StackCall {
    StartController,
    StartHost,
    RegisterGattsCallback,
    RegisterGapCallback,
    RegisterApp(u16),
    SetDeviceName(String),
    ConfigureAdvertising(AdvPayload),
    StartAdvertising(AdvParams),
    CreateAttributeTable {
        gatts_if: GattInterface,
        service_uuid: u16,
        attributes: Vec<AttributeSpec>,
    },
    StartService(Handle),
    SendResponse {
        gatts_if: GattInterface,
        conn_id: ConnectionId,
        trans_id: TransactionId,
        status: GattStatus,
        handle: Option<Handle>,
        value: Option<Vec<u8>>,
    },
    SecurityResponse {
        addr: BleAddress,
        accept: bool,
    },
}

#[derive(Debug)]
enum Pending {
    Gatts(GattInterface, GattsEvent),
    Gap(GapEvent),
}

#[derive(Debug, Default)]
struct Inner {
    calls: Vec<StackCall>,
    failures: Vec<(StackOp, i32)>,
    queue: VecDeque<Pending>,
    next_conn: u16,
    next_trans: u32,
}

/// Stack double that confirms requests through a local event queue.
#[derive(Debug)]
pub struct LoopbackStack {
    inner: Mutex<Inner>,
    confirm: bool,
}

impl LoopbackStack {
    /// Stack that queues a confirmation for every asynchronous request.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            confirm: true,
        }
    }

    /// Stack that only records calls; confirmations must be injected.
    pub fn manual() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            confirm: false,
        }
    }

    /// Calls made so far, in order.
    pub fn calls(&self) -> Vec<StackCall> {
        self.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    /// Make the next call of `op` fail with `code`.
    pub fn fail_next(&self, op: StackOp, code: i32) {
        self.lock().failures.push((op, code));
    }

    /// Number of queued events.
    pub fn pending(&self) -> usize {
        self.lock().queue.len()
    }

    pub fn inject_gatts(&self, gatts_if: GattInterface, event: GattsEvent) {
        self.lock().queue.push_back(Pending::Gatts(gatts_if, event));
    }

    pub fn inject_gap(&self, event: GapEvent) {
        self.lock().queue.push_back(Pending::Gap(event));
    }

    /// Deliver queued events to `handler` until the queue is empty,
    /// including events queued by the handler's own calls.
    ///
    /// Returns the number of events delivered.
    pub fn pump<H: EventHandler + ?Sized>(&self, handler: &H) -> usize {
        let mut delivered = 0;
        loop {
            let Some(next) = self.lock().queue.pop_front() else {
                return delivered;
            };
            match next {
                Pending::Gatts(gatts_if, event) => dispatch_gatts(handler, gatts_if, &event),
                Pending::Gap(event) => dispatch_gap(handler, &event),
            }
            delivered += 1;
        }
    }

    /// Queue a connection from `addr` and return its connection id.
    pub fn connect_peer(&self, addr: BleAddress) -> ConnectionId {
        let mut inner = self.lock();
        let conn_id = ConnectionId(inner.next_conn);
        inner.next_conn = inner.next_conn.wrapping_add(1);
        inner.queue.push_back(Pending::Gatts(
            LOOPBACK_INTERFACE,
            GattsEvent::Connected { conn_id, addr },
        ));
        conn_id
    }

    pub fn disconnect_peer(&self, conn_id: ConnectionId, addr: BleAddress, reason: u16) {
        self.inject_gatts(
            LOOPBACK_INTERFACE,
            GattsEvent::Disconnected {
                conn_id,
                addr,
                reason,
            },
        );
    }

    /// Queue a read request from a connected peer.
    pub fn peer_read(
        &self,
        conn_id: ConnectionId,
        addr: BleAddress,
        handle: Handle,
    ) -> TransactionId {
        let mut inner = self.lock();
        let trans_id = Self::next_trans(&mut inner);
        inner.queue.push_back(Pending::Gatts(
            LOOPBACK_INTERFACE,
            GattsEvent::Read(ReadRequest {
                conn_id,
                trans_id,
                addr,
                handle,
                offset: 0,
                need_rsp: true,
            }),
        ));
        trans_id
    }

    /// Queue a write request from a connected peer.
    pub fn peer_write(
        &self,
        conn_id: ConnectionId,
        addr: BleAddress,
        handle: Handle,
        value: &[u8],
    ) -> TransactionId {
        let mut inner = self.lock();
        let trans_id = Self::next_trans(&mut inner);
        inner.queue.push_back(Pending::Gatts(
            LOOPBACK_INTERFACE,
            GattsEvent::Write(WriteRequest {
                conn_id,
                trans_id,
                addr,
                handle,
                offset: 0,
                need_rsp: true,
                is_prep: false,
                value: value.to_vec(),
            }),
        ));
        trans_id
    }

    /// The response sent for `trans_id`, if any.
    pub fn response_for(&self, trans_id: TransactionId) -> Option<(GattStatus, Option<Vec<u8>>)> {
        self.lock().calls.iter().rev().find_map(|call| match call {
            StackCall::SendResponse {
                trans_id: id,
                status,
                value,
                ..
            } if *id == trans_id => Some((*status, value.clone())),
            _ => None,
        })
    }

    fn next_trans(inner: &mut Inner) -> TransactionId {
        let trans_id = TransactionId(inner.next_trans);
        inner.next_trans = inner.next_trans.wrapping_add(1);
        trans_id
    }

    /// Record `call` unless a failure was armed for `op`.
    fn record(&self, op: StackOp, call: StackCall) -> Result<MutexGuard<'_, Inner>, StackError> {
        let mut inner = self.lock();
        if let Some(pos) = inner.failures.iter().position(|(failing, _)| *failing == op) {
            let (_, code) = inner.failures.remove(pos);
            return Err(StackError::new(op, code));
        }
        inner.calls.push(call);
        Ok(inner)
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for LoopbackStack {
    fn default() -> Self {
        Self::new()
    }
}

impl BleStack for LoopbackStack {
    fn start_controller(&self) -> Result<(), StackError> {
        self.record(StackOp::StartController, StackCall::StartController)
            .map(drop)
    }

    fn start_host(&self) -> Result<(), StackError> {
        self.record(StackOp::StartHost, StackCall::StartHost).map(drop)
    }

    fn register_gatts_callback(&self) -> Result<(), StackError> {
        self.record(StackOp::RegisterGattsCallback, StackCall::RegisterGattsCallback)
            .map(drop)
    }

    fn register_gap_callback(&self) -> Result<(), StackError> {
        self.record(StackOp::RegisterGapCallback, StackCall::RegisterGapCallback)
            .map(drop)
    }

    fn register_app(&self, app_id: u16) -> Result<(), StackError> {
        let mut inner = self.record(StackOp::RegisterApp, StackCall::RegisterApp(app_id))?;
        if self.confirm {
            inner.queue.push_back(Pending::Gatts(
                LOOPBACK_INTERFACE,
                GattsEvent::Registered {
                    status: StackStatus::Success,
                    app_id,
                },
            ));
        }
        Ok(())
    }

    fn set_device_name(&self, name: &str) -> Result<(), StackError> {
        self.record(StackOp::SetDeviceName, StackCall::SetDeviceName(name.to_string()))
            .map(drop)
    }

    fn configure_advertising(&self, payload: &AdvPayload) -> Result<(), StackError> {
        let mut inner = self.record(
            StackOp::ConfigureAdvertising,
            StackCall::ConfigureAdvertising(payload.clone()),
        )?;
        if self.confirm {
            inner
                .queue
                .push_back(Pending::Gap(GapEvent::AdvertisingDataCommitted {
                    kind: payload.kind,
                    status: StackStatus::Success,
                }));
        }
        Ok(())
    }

    fn start_advertising(&self, params: &AdvParams) -> Result<(), StackError> {
        let mut inner = self.record(
            StackOp::StartAdvertising,
            StackCall::StartAdvertising(params.clone()),
        )?;
        if self.confirm {
            inner.queue.push_back(Pending::Gap(GapEvent::AdvertisingStarted {
                status: StackStatus::Success,
            }));
        }
        Ok(())
    }

    fn create_attribute_table(
        &self,
        gatts_if: GattInterface,
        service_uuid: u16,
        attributes: &[AttributeSpec],
    ) -> Result<(), StackError> {
        let mut inner = self.record(
            StackOp::CreateAttributeTable,
            StackCall::CreateAttributeTable {
                gatts_if,
                service_uuid,
                attributes: attributes.to_vec(),
            },
        )?;
        if self.confirm {
            // Service declaration, then a declaration/value pair per attribute.
            let rows: Vec<Handle> = (0..=2 * attributes.len() as u16)
                .map(|row| LOOPBACK_SERVICE_HANDLE + row)
                .collect();
            inner.queue.push_back(Pending::Gatts(
                gatts_if,
                GattsEvent::AttributeTableCreated {
                    status: StackStatus::Success,
                    service_handle: LOOPBACK_SERVICE_HANDLE,
                    handles: AttributeTable::value_handles(&rows),
                },
            ));
        }
        Ok(())
    }

    fn start_service(&self, service_handle: Handle) -> Result<(), StackError> {
        self.record(StackOp::StartService, StackCall::StartService(service_handle))
            .map(drop)
    }

    fn send_response(
        &self,
        gatts_if: GattInterface,
        conn_id: ConnectionId,
        trans_id: TransactionId,
        status: GattStatus,
        value: Option<ResponseValue<'_>>,
    ) -> Result<(), StackError> {
        self.record(
            StackOp::SendResponse,
            StackCall::SendResponse {
                gatts_if,
                conn_id,
                trans_id,
                status,
                handle: value.map(|v| v.handle),
                value: value.map(|v| v.value.to_vec()),
            },
        )
        .map(drop)
    }

    fn security_response(&self, addr: BleAddress, accept: bool) -> Result<(), StackError> {
        self.record(
            StackOp::SecurityResponse,
            StackCall::SecurityResponse { addr, accept },
        )
        .map(drop)
    }
}
