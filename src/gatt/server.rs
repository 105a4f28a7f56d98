//! GATT server event handling.
//!
//! The server reacts to registration, table creation, connection and
//! read/write events, and answers every request it can route. Requests that
//! cannot be served (unknown handle, value too long, unsupported write form)
//! are answered with an explicit error status so the peer never waits on a
//! response that will not come.

use super::status::GattStatus;
use super::store::{AttributeStore, StoreError};
use super::table::{AttributeIndex, AttributeTable};
use crate::gap::Advertiser;
use crate::stack::{
    BleAddress, BleStack, ConnectionId, GattInterface, Handle, ResponseValue, StackStatus,
    TransactionId,
};
use log::{debug, error, info, warn};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

/// A peer's read request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadRequest {
    pub conn_id: ConnectionId,
    pub trans_id: TransactionId,
    pub addr: BleAddress,
    pub handle: Handle,
    /// Offset into the value (non-zero for long reads).
    pub offset: u16,
    /// The stack expects the application to respond.
    pub need_rsp: bool,
}

/// A peer's write request.
#[derive(Clone, PartialEq, Eq)]
pub struct WriteRequest {
    pub conn_id: ConnectionId,
    pub trans_id: TransactionId,
    pub addr: BleAddress,
    pub handle: Handle,
    pub offset: u16,
    /// False for write commands (write without response).
    pub need_rsp: bool,
    /// Part of a prepared (queued) write.
    pub is_prep: bool,
    pub value: Vec<u8>,
}

// Values may be credentials, so only their length is printed.
impl fmt::Debug for WriteRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WriteRequest")
            .field("conn_id", &self.conn_id)
            .field("trans_id", &self.trans_id)
            .field("addr", &self.addr)
            .field("handle", &self.handle)
            .field("offset", &self.offset)
            .field("need_rsp", &self.need_rsp)
            .field("is_prep", &self.is_prep)
            .field("len", &self.value.len())
            .finish()
    }
}

/// Registration progress of our application profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    Unregistered,
    /// Registration requested, waiting for the stack.
    Registering,
    /// Registered under the given interface.
    Registered(GattInterface),
    /// The stack refused the registration. Terminal.
    Rejected(StackStatus),
}

#[derive(Debug)]
struct Session {
    registration: Registration,
    peer: Option<(ConnectionId, BleAddress)>,
}

/// The provisioning GATT server.
pub struct GattServer<S: BleStack> {
    stack: Arc<S>,
    advertiser: Arc<Advertiser>,
    table: AttributeTable,
    store: AttributeStore,
    app_id: u16,
    device_name: String,
    service_uuid: u16,
    session: Mutex<Session>,
}

impl<S: BleStack> GattServer<S> {
    pub fn new(
        stack: Arc<S>,
        advertiser: Arc<Advertiser>,
        table: AttributeTable,
        app_id: u16,
        device_name: impl Into<String>,
        service_uuid: u16,
    ) -> Self {
        let store = AttributeStore::new(table.capacities());
        Self {
            stack,
            advertiser,
            table,
            store,
            app_id,
            device_name: device_name.into(),
            service_uuid,
            session: Mutex::new(Session {
                registration: Registration::Unregistered,
                peer: None,
            }),
        }
    }

    pub fn table(&self) -> &AttributeTable {
        &self.table
    }

    pub fn store(&self) -> &AttributeStore {
        &self.store
    }

    pub fn registration(&self) -> Registration {
        self.lock().registration
    }

    /// The connected peer, if any.
    pub fn peer(&self) -> Option<(ConnectionId, BleAddress)> {
        self.lock().peer
    }

    /// Ask the stack to register our application profile.
    pub fn register(&self) -> Result<(), crate::stack::StackError> {
        self.lock().registration = Registration::Registering;
        self.stack.register_app(self.app_id).inspect_err(|_| {
            self.lock().registration = Registration::Unregistered;
        })
    }

    /// Registration confirmed: name the device, submit advertising payloads
    /// and the attribute table.
    ///
    /// Only the confirmation of a pending request is acted on; setup runs once.
    pub fn on_registered(&self, gatts_if: GattInterface, status: StackStatus, app_id: u16) {
        if app_id != self.app_id {
            debug!("Ignoring registration of foreign app {}", app_id);
            return;
        }

        {
            let mut session = self.lock();
            if session.registration != Registration::Registering {
                warn!(
                    "Ignoring registration event in state {:?}",
                    session.registration
                );
                return;
            }
            if !status.is_success() {
                error!("Application registration failed: {}", status);
                session.registration = Registration::Rejected(status);
                return;
            }
            session.registration = Registration::Registered(gatts_if);
        }

        info!("GATT application registered (interface {})", gatts_if.0);

        if let Err(e) = self.stack.set_device_name(&self.device_name) {
            error!("Failed to set device name: {}", e);
        }
        if let Err(e) = self.advertiser.configure(self.stack.as_ref()) {
            error!("Failed to configure advertising: {}", e);
        }
        if let Err(e) =
            self.stack
                .create_attribute_table(gatts_if, self.service_uuid, self.table.specs())
        {
            error!("Failed to create attribute table: {}", e);
        }
    }

    /// The stack assigned handles to the table; bind them and start the service.
    pub fn on_table_created(
        &self,
        status: StackStatus,
        service_handle: Handle,
        handles: &[Handle],
    ) {
        if !status.is_success() {
            error!("Attribute table creation failed: {}", status);
            return;
        }
        if let Err(e) = self.table.bind(service_handle, handles) {
            error!("Cannot bind attribute handles: {}", e);
            return;
        }

        info!(
            "Attribute table bound: service {}, handles {:?}",
            service_handle, handles
        );
        if let Err(e) = self.stack.start_service(service_handle) {
            error!("Failed to start service: {}", e);
        }
    }

    pub fn on_connect(&self, conn_id: ConnectionId, addr: BleAddress) {
        info!("Peer {} connected (conn {})", addr, conn_id.0);
        self.lock().peer = Some((conn_id, addr));
        self.advertiser.on_connected();
    }

    /// The peer left; advertising is restarted so a companion can reconnect.
    pub fn on_disconnect(&self, conn_id: ConnectionId, addr: BleAddress, reason: u16) {
        info!(
            "Peer {} disconnected (conn {}, reason 0x{:02X})",
            addr, conn_id.0, reason
        );
        {
            let mut session = self.lock();
            if session.peer.map(|(id, _)| id) == Some(conn_id) {
                session.peer = None;
            }
        }
        if let Err(e) = self.advertiser.resume(self.stack.as_ref()) {
            error!("Failed to resume advertising: {}", e);
        }
    }

    pub fn on_read(&self, gatts_if: GattInterface, request: &ReadRequest) {
        let result = self.serve_read(request);
        if !request.need_rsp {
            return;
        }

        match result {
            Ok(value) => self.respond(
                gatts_if,
                request.conn_id,
                request.trans_id,
                GattStatus::Ok,
                Some(ResponseValue {
                    handle: request.handle,
                    offset: request.offset,
                    value: &value,
                }),
            ),
            Err(status) => {
                self.respond(gatts_if, request.conn_id, request.trans_id, status, None)
            }
        }
    }

    pub fn on_write(&self, gatts_if: GattInterface, request: &WriteRequest) {
        let status = match self.apply_write(request) {
            Ok(index) => {
                info!("Stored {} ({} bytes)", index, request.value.len());
                GattStatus::Ok
            }
            Err(status) => status,
        };

        if request.need_rsp {
            self.respond(gatts_if, request.conn_id, request.trans_id, status, None);
        }
    }

    fn serve_read(&self, request: &ReadRequest) -> Result<Vec<u8>, GattStatus> {
        let index = self.resolve(request.handle)?;
        if !self.table.spec(index).permissions.read {
            warn!("Rejected read of {}: not readable", index);
            return Err(GattStatus::ReadNotPermitted);
        }

        self.store.with_entry(index, |entry| {
            let offset = request.offset as usize;
            if offset > entry.len() {
                warn!(
                    "Rejected read of {}: offset {} past length {}",
                    index,
                    offset,
                    entry.len()
                );
                return Err(GattStatus::InvalidOffset);
            }
            debug!("Read {} ({} bytes from offset {})", index, entry.len(), offset);
            Ok(entry.value()[offset..].to_vec())
        })
    }

    fn apply_write(&self, request: &WriteRequest) -> Result<AttributeIndex, GattStatus> {
        let index = self.resolve(request.handle)?;
        if request.is_prep {
            warn!("Rejected prepared write to {}", index);
            return Err(GattStatus::RequestNotSupported);
        }
        if request.offset != 0 {
            warn!("Rejected write to {} at offset {}", index, request.offset);
            return Err(GattStatus::InvalidOffset);
        }
        if !self.table.spec(index).permissions.write {
            warn!("Rejected write to {}: not writable", index);
            return Err(GattStatus::WriteNotPermitted);
        }

        self.store
            .write(index, &request.value)
            .map_err(|e| match e {
                StoreError::TooLong { .. } => {
                    warn!("Rejected write to {}: {}", index, e);
                    GattStatus::InvalidAttributeValueLength
                }
            })?;
        Ok(index)
    }

    fn resolve(&self, handle: Handle) -> Result<AttributeIndex, GattStatus> {
        self.table.resolve(handle).ok_or_else(|| {
            warn!("Request for unknown handle {}", handle);
            GattStatus::AttributeNotFound
        })
    }

    fn respond(
        &self,
        gatts_if: GattInterface,
        conn_id: ConnectionId,
        trans_id: TransactionId,
        status: GattStatus,
        value: Option<ResponseValue<'_>>,
    ) {
        if let Err(e) = self
            .stack
            .send_response(gatts_if, conn_id, trans_id, status, value)
        {
            error!("Failed to respond to transaction {}: {}", trans_id.0, e);
        }
    }

    fn lock(&self) -> MutexGuard<'_, Session> {
        self.session
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
