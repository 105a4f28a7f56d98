//! Events delivered by the BLE stack.
//!
//! The stack adapter translates its native callbacks into these values and
//! hands them to [`dispatch_gatts`] / [`dispatch_gap`]. Event kinds the
//! peripheral has no use for have no variant here; the adapter drops them.

use crate::gap::PayloadKind;
use crate::gatt::{ReadRequest, WriteRequest};
use crate::stack::{BleAddress, ConnectionId, GattInterface, Handle, StackStatus};

/// GATT server event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GattsEvent {
    /// Application profile registration completed.
    Registered { status: StackStatus, app_id: u16 },
    /// Attribute table registered. `handles` holds the value handle of each
    /// attribute, in table order.
    AttributeTableCreated {
        status: StackStatus,
        service_handle: Handle,
        handles: Vec<Handle>,
    },
    Connected {
        conn_id: ConnectionId,
        addr: BleAddress,
    },
    Disconnected {
        conn_id: ConnectionId,
        addr: BleAddress,
        reason: u16,
    },
    Read(ReadRequest),
    Write(WriteRequest),
}

/// GAP event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GapEvent {
    AdvertisingDataCommitted {
        kind: PayloadKind,
        status: StackStatus,
    },
    AdvertisingStarted {
        status: StackStatus,
    },
    SecurityRequest {
        addr: BleAddress,
    },
}

/// Receiver of translated stack events.
pub trait EventHandler: Send + Sync {
    fn on_registered(&self, gatts_if: GattInterface, status: StackStatus, app_id: u16);

    fn on_table_created(&self, status: StackStatus, service_handle: Handle, handles: &[Handle]);

    fn on_connect(&self, conn_id: ConnectionId, addr: BleAddress);

    fn on_disconnect(&self, conn_id: ConnectionId, addr: BleAddress, reason: u16);

    fn on_read(&self, gatts_if: GattInterface, request: &ReadRequest);

    fn on_write(&self, gatts_if: GattInterface, request: &WriteRequest);

    fn on_advertising_committed(&self, kind: PayloadKind, status: StackStatus);

    fn on_advertising_started(&self, status: StackStatus);

    fn on_security_request(&self, addr: BleAddress);
}

/// Route one GATT server event to `handler`.
pub fn dispatch_gatts<H: EventHandler + ?Sized>(
    handler: &H,
    gatts_if: GattInterface,
    event: &GattsEvent,
) {
    match event {
        GattsEvent::Registered { status, app_id } => {
            handler.on_registered(gatts_if, *status, *app_id)
        }
        GattsEvent::AttributeTableCreated {
            status,
            service_handle,
            handles,
        } => handler.on_table_created(*status, *service_handle, handles),
        GattsEvent::Connected { conn_id, addr } => handler.on_connect(*conn_id, *addr),
        GattsEvent::Disconnected {
            conn_id,
            addr,
            reason,
        } => handler.on_disconnect(*conn_id, *addr, *reason),
        GattsEvent::Read(request) => handler.on_read(gatts_if, request),
        GattsEvent::Write(request) => handler.on_write(gatts_if, request),
    }
}

/// Route one GAP event to `handler`.
pub fn dispatch_gap<H: EventHandler + ?Sized>(handler: &H, event: &GapEvent) {
    match *event {
        GapEvent::AdvertisingDataCommitted { kind, status } => {
            handler.on_advertising_committed(kind, status)
        }
        GapEvent::AdvertisingStarted { status } => handler.on_advertising_started(status),
        GapEvent::SecurityRequest { addr } => handler.on_security_request(addr),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stack::TransactionId;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<String>>,
    }

    impl Recorder {
        fn push(&self, entry: String) {
            self.seen.lock().unwrap().push(entry);
        }

        fn seen(&self) -> Vec<String> {
            self.seen.lock().unwrap().clone()
        }
    }

    impl EventHandler for Recorder {
        fn on_registered(&self, gatts_if: GattInterface, _: StackStatus, app_id: u16) {
            self.push(format!("registered if={} app={}", gatts_if.0, app_id));
        }
        fn on_table_created(&self, _: StackStatus, service_handle: Handle, handles: &[Handle]) {
            self.push(format!("table {} {:?}", service_handle, handles));
        }
        fn on_connect(&self, conn_id: ConnectionId, _: BleAddress) {
            self.push(format!("connect {}", conn_id.0));
        }
        fn on_disconnect(&self, conn_id: ConnectionId, _: BleAddress, reason: u16) {
            self.push(format!("disconnect {} {}", conn_id.0, reason));
        }
        fn on_read(&self, gatts_if: GattInterface, request: &ReadRequest) {
            self.push(format!("read if={} handle={}", gatts_if.0, request.handle));
        }
        fn on_write(&self, _: GattInterface, request: &WriteRequest) {
            self.push(format!("write handle={}", request.handle));
        }
        fn on_advertising_committed(&self, kind: PayloadKind, _: StackStatus) {
            self.push(format!("committed {:?}", kind));
        }
        fn on_advertising_started(&self, status: StackStatus) {
            self.push(format!("started {}", status));
        }
        fn on_security_request(&self, addr: BleAddress) {
            self.push(format!("security {}", addr));
        }
    }

    #[test]
    fn test_gatts_dispatch() {
        let recorder = Recorder::default();
        let gatts_if = GattInterface(4);
        let addr = BleAddress::new([0; 6]);

        dispatch_gatts(
            &recorder,
            gatts_if,
            &GattsEvent::Registered {
                status: StackStatus::Success,
                app_id: 0,
            },
        );
        dispatch_gatts(
            &recorder,
            gatts_if,
            &GattsEvent::AttributeTableCreated {
                status: StackStatus::Success,
                service_handle: 40,
                handles: vec![42, 44],
            },
        );
        dispatch_gatts(
            &recorder,
            gatts_if,
            &GattsEvent::Connected {
                conn_id: ConnectionId(1),
                addr,
            },
        );
        dispatch_gatts(
            &recorder,
            gatts_if,
            &GattsEvent::Read(ReadRequest {
                conn_id: ConnectionId(1),
                trans_id: TransactionId(9),
                addr,
                handle: 42,
                offset: 0,
                need_rsp: true,
            }),
        );
        dispatch_gatts(
            &recorder,
            gatts_if,
            &GattsEvent::Disconnected {
                conn_id: ConnectionId(1),
                addr,
                reason: 0x13,
            },
        );

        assert_eq!(
            recorder.seen(),
            vec![
                "registered if=4 app=0",
                "table 40 [42, 44]",
                "connect 1",
                "read if=4 handle=42",
                "disconnect 1 19",
            ]
        );
    }

    #[test]
    fn test_gap_dispatch() {
        let recorder = Recorder::default();
        dispatch_gap(
            &recorder,
            &GapEvent::AdvertisingDataCommitted {
                kind: PayloadKind::ScanResponse,
                status: StackStatus::Success,
            },
        );
        dispatch_gap(
            &recorder,
            &GapEvent::AdvertisingStarted {
                status: StackStatus::Success,
            },
        );
        dispatch_gap(
            &recorder,
            &GapEvent::SecurityRequest {
                addr: BleAddress::new([1, 2, 3, 4, 5, 6]),
            },
        );

        assert_eq!(
            recorder.seen(),
            vec![
                "committed ScanResponse",
                "started success",
                "security 01:02:03:04:05:06",
            ]
        );
    }
}
