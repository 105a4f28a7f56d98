//! [`BleStack`] implementation on the ESP-IDF Bluedroid host.
//!
//! Built on `esp-idf-svc`'s [`EspBleGap`] and [`EspGatts`] over one shared
//! [`BtDriver`]. Their `subscribe` closures translate service events into
//! [`GattsEvent`] / [`GapEvent`] values for the handler given to
//! [`Bluedroid::set_handler`].
//!
//! Three calls have no wrapper and go to `esp-idf-sys` directly: attribute
//! table creation, advertising start with explicit parameters, and the
//! security response.

use crate::events::{dispatch_gap, dispatch_gatts, EventHandler, GapEvent, GattsEvent};
use crate::gap::{AdvParams, AdvPayload, AdvType, FilterPolicy, OwnAddressType, PayloadKind};
use crate::gatt::{AttributeSpec, AttributeTable, GattStatus, ReadRequest, WriteRequest};
use crate::stack::{
    BleAddress, BleStack, ConnectionId, GattInterface, Handle, ResponseValue, StackError,
    StackOp, StackStatus, TransactionId,
};
use esp_idf_hal::modem::Modem;
use esp_idf_svc::bt::ble::gap::{AdvConfiguration, BleGapEvent, EspBleGap};
use esp_idf_svc::bt::ble::gatt::server::{EspGatts, GattsEvent as SvcGattsEvent};
use esp_idf_svc::bt::ble::gatt::{GattResponse, GattStatus as SvcGattStatus};
use esp_idf_svc::bt::{BdAddr, Ble, BtDriver, BtStatus};
use esp_idf_svc::nvs::EspDefaultNvsPartition;
use esp_idf_svc::sys::{self, EspError};
use log::{debug, trace};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, Weak};

type BleDriver = BtDriver<'static, Ble>;
type Gap = EspBleGap<'static, Ble, Arc<BleDriver>>;
type Gatts = EspGatts<'static, Ble, Arc<BleDriver>>;

static PRIMARY_SERVICE_UUID: u16 = sys::ESP_GATT_UUID_PRI_SERVICE as u16;
static CHAR_DECLARATION_UUID: u16 = sys::ESP_GATT_UUID_CHAR_DECLARE as u16;

const SERVICE_INSTANCE: u8 = 0;

/// Buffers the submitted attribute table points into.
///
/// Bluedroid copies the row array but reads UUIDs and initial values after
/// `esp_ble_gatts_create_attr_tab` returns, so these stay alive.
struct TableBuffers {
    service_uuid: Box<u16>,
    uuids: Vec<u16>,
    properties: Vec<u8>,
    values: Vec<Vec<u8>>,
}

/// Bluedroid-backed stack.
pub struct Bluedroid {
    modem: Mutex<Option<Modem>>,
    nvs: Option<EspDefaultNvsPartition>,
    driver: OnceLock<Arc<BleDriver>>,
    gap: OnceLock<Gap>,
    gatts: OnceLock<Gatts>,
    handler: OnceLock<Weak<dyn EventHandler>>,
    table: Mutex<Option<TableBuffers>>,
}

impl Bluedroid {
    pub fn new(modem: Modem, nvs: Option<EspDefaultNvsPartition>) -> Self {
        Self {
            modem: Mutex::new(Some(modem)),
            nvs,
            driver: OnceLock::new(),
            gap: OnceLock::new(),
            gatts: OnceLock::new(),
            handler: OnceLock::new(),
            table: Mutex::new(None),
        }
    }

    /// Set the receiver of stack events. Must happen before the callback
    /// registration stages; only the first call has effect.
    ///
    /// The stack keeps a weak reference, so the peripheral owning this stack
    /// does not form a cycle with it.
    pub fn set_handler(&self, handler: Weak<dyn EventHandler>) {
        if self.handler.set(handler).is_err() {
            debug!("Event handler already set, keeping the first one");
        }
    }

    fn handler(&self, op: StackOp) -> Result<Weak<dyn EventHandler>, StackError> {
        self.handler.get().cloned().ok_or(invalid_state(op))
    }

    fn driver(&self, op: StackOp) -> Result<Arc<BleDriver>, StackError> {
        self.driver.get().cloned().ok_or(invalid_state(op))
    }

    fn gap(&self, op: StackOp) -> Result<&Gap, StackError> {
        self.gap.get().ok_or(invalid_state(op))
    }

    fn gatts(&self, op: StackOp) -> Result<&Gatts, StackError> {
        self.gatts.get().ok_or(invalid_state(op))
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn invalid_state(op: StackOp) -> StackError {
    StackError::new(op, sys::ESP_ERR_INVALID_STATE as sys::esp_err_t)
}

fn esp_error(op: StackOp) -> impl FnOnce(EspError) -> StackError {
    move |e| StackError::new(op, e.code())
}

fn check(op: StackOp, code: sys::esp_err_t) -> Result<(), StackError> {
    if code == sys::ESP_OK as sys::esp_err_t {
        Ok(())
    } else {
        Err(StackError::new(op, code))
    }
}

fn bt_status(status: BtStatus) -> StackStatus {
    match status {
        BtStatus::Success => StackStatus::Success,
        other => StackStatus::Failed(other as u32),
    }
}

fn gatt_status(status: SvcGattStatus) -> StackStatus {
    match status {
        SvcGattStatus::Ok => StackStatus::Success,
        other => StackStatus::Failed(other as u32),
    }
}

fn response_status(status: GattStatus) -> SvcGattStatus {
    match status {
        GattStatus::Ok => SvcGattStatus::Ok,
        GattStatus::ReadNotPermitted => SvcGattStatus::ReadNotPermitted,
        GattStatus::WriteNotPermitted => SvcGattStatus::WriteNotPermitted,
        GattStatus::RequestNotSupported => SvcGattStatus::RequestNotSupported,
        GattStatus::InvalidOffset => SvcGattStatus::InvalidOffset,
        GattStatus::AttributeNotFound => SvcGattStatus::NotFound,
        GattStatus::InvalidAttributeValueLength => SvcGattStatus::InvalidAttrLen,
    }
}

fn address(addr: BdAddr) -> BleAddress {
    BleAddress::new(addr.addr())
}

fn adv_type(adv_type: AdvType) -> sys::esp_ble_adv_type_t {
    match adv_type {
        AdvType::ConnectableUndirected => sys::esp_ble_adv_type_t_ADV_TYPE_IND,
        AdvType::ScannableUndirected => sys::esp_ble_adv_type_t_ADV_TYPE_SCAN_IND,
        AdvType::NonConnectable => sys::esp_ble_adv_type_t_ADV_TYPE_NONCONN_IND,
    }
}

fn own_addr_type(addr_type: OwnAddressType) -> sys::esp_ble_addr_type_t {
    match addr_type {
        OwnAddressType::Public => sys::esp_ble_addr_type_t_BLE_ADDR_TYPE_PUBLIC,
        OwnAddressType::Random => sys::esp_ble_addr_type_t_BLE_ADDR_TYPE_RANDOM,
    }
}

fn filter_policy(policy: FilterPolicy) -> sys::esp_ble_adv_filter_t {
    match policy {
        FilterPolicy::AllowAny => sys::esp_ble_adv_filter_t_ADV_FILTER_ALLOW_SCAN_ANY_CON_ANY,
        FilterPolicy::ScanAcceptListOnly => {
            sys::esp_ble_adv_filter_t_ADV_FILTER_ALLOW_SCAN_WLST_CON_ANY
        }
        FilterPolicy::ConnectAcceptListOnly => {
            sys::esp_ble_adv_filter_t_ADV_FILTER_ALLOW_SCAN_ANY_CON_WLST
        }
        FilterPolicy::AcceptListOnly => {
            sys::esp_ble_adv_filter_t_ADV_FILTER_ALLOW_SCAN_WLST_CON_WLST
        }
    }
}

fn attr_permissions(read: bool, write: bool) -> u16 {
    let mut perm = 0;
    if read {
        perm |= sys::ESP_GATT_PERM_READ;
    }
    if write {
        perm |= sys::ESP_GATT_PERM_WRITE;
    }
    perm as u16
}

fn char_properties(read: bool, write: bool) -> u8 {
    let mut props = 0;
    if read {
        props |= sys::ESP_GATT_CHAR_PROP_BIT_READ;
    }
    if write {
        props |= sys::ESP_GATT_CHAR_PROP_BIT_WRITE;
    }
    props as u8
}

fn attr_row(
    uuid: *const u16,
    perm: u16,
    max_length: u16,
    length: u16,
    value: *mut u8,
) -> sys::esp_gatts_attr_db_t {
    sys::esp_gatts_attr_db_t {
        attr_control: sys::esp_attr_control_t {
            auto_rsp: sys::ESP_GATT_RSP_BY_APP as u8,
        },
        att_desc: sys::esp_attr_desc_t {
            uuid_length: sys::ESP_UUID_LEN_16 as u16,
            uuid_p: uuid as *mut u8,
            perm,
            max_length,
            length,
            value,
        },
    }
}

impl TableBuffers {
    fn new(service_uuid: u16, attributes: &[AttributeSpec]) -> Self {
        Self {
            service_uuid: Box::new(service_uuid),
            uuids: attributes.iter().map(|spec| spec.uuid).collect(),
            properties: attributes
                .iter()
                .map(|spec| char_properties(spec.permissions.read, spec.permissions.write))
                .collect(),
            values: attributes.iter().map(|spec| vec![0; spec.max_len]).collect(),
        }
    }

    /// Service declaration, then a characteristic declaration and value row
    /// per attribute. The rows borrow the heap buffers, which do not move
    /// when `self` does.
    fn rows(&mut self, attributes: &[AttributeSpec]) -> Vec<sys::esp_gatts_attr_db_t> {
        let mut rows = Vec::with_capacity(1 + 2 * attributes.len());
        rows.push(attr_row(
            &PRIMARY_SERVICE_UUID,
            sys::ESP_GATT_PERM_READ as u16,
            2,
            2,
            self.service_uuid.as_mut() as *mut u16 as *mut u8,
        ));
        for (i, spec) in attributes.iter().enumerate() {
            rows.push(attr_row(
                &CHAR_DECLARATION_UUID,
                sys::ESP_GATT_PERM_READ as u16,
                1,
                1,
                &mut self.properties[i],
            ));
            rows.push(attr_row(
                &self.uuids[i],
                attr_permissions(spec.permissions.read, spec.permissions.write),
                spec.max_len as u16,
                0,
                self.values[i].as_mut_ptr(),
            ));
        }
        rows
    }
}

impl BleStack for Bluedroid {
    fn start_controller(&self) -> Result<(), StackError> {
        let op = StackOp::StartController;
        let modem = lock(&self.modem).take().ok_or(invalid_state(op))?;
        let driver = BtDriver::<Ble>::new(modem, self.nvs.clone()).map_err(esp_error(op))?;
        self.driver
            .set(Arc::new(driver))
            .map_err(|_| invalid_state(op))
    }

    fn start_host(&self) -> Result<(), StackError> {
        // The driver enables Bluedroid together with the controller.
        let status = unsafe { sys::esp_bluedroid_get_status() };
        if status == sys::esp_bluedroid_status_t_ESP_BLUEDROID_STATUS_ENABLED {
            Ok(())
        } else {
            Err(invalid_state(StackOp::StartHost))
        }
    }

    fn register_gatts_callback(&self) -> Result<(), StackError> {
        let op = StackOp::RegisterGattsCallback;
        let handler = self.handler(op)?;
        let gatts = Gatts::new(self.driver(op)?).map_err(esp_error(op))?;

        gatts
            .subscribe(move |(gatts_if, event)| {
                let Some(handler) = handler.upgrade() else {
                    return;
                };
                if let Some(event) = translate_gatts(event) {
                    dispatch_gatts(handler.as_ref(), GattInterface(gatts_if), &event);
                }
            })
            .map_err(esp_error(op))?;

        self.gatts.set(gatts).map_err(|_| invalid_state(op))
    }

    fn register_gap_callback(&self) -> Result<(), StackError> {
        let op = StackOp::RegisterGapCallback;
        let handler = self.handler(op)?;
        let gap = Gap::new(self.driver(op)?).map_err(esp_error(op))?;

        gap.subscribe(move |event| {
            let Some(handler) = handler.upgrade() else {
                return;
            };
            if let Some(event) = translate_gap(event) {
                dispatch_gap(handler.as_ref(), &event);
            }
        })
        .map_err(esp_error(op))?;

        self.gap.set(gap).map_err(|_| invalid_state(op))
    }

    fn register_app(&self, app_id: u16) -> Result<(), StackError> {
        let op = StackOp::RegisterApp;
        self.gatts(op)?.register_app(app_id).map_err(esp_error(op))
    }

    fn set_device_name(&self, name: &str) -> Result<(), StackError> {
        let op = StackOp::SetDeviceName;
        self.gap(op)?.set_device_name(name).map_err(esp_error(op))
    }

    fn configure_advertising(&self, payload: &AdvPayload) -> Result<(), StackError> {
        let op = StackOp::ConfigureAdvertising;
        let conf = AdvConfiguration {
            set_scan_rsp: payload.kind == PayloadKind::ScanResponse,
            include_name: payload.include_name,
            include_txpower: payload.include_tx_power,
            min_interval: payload.min_interval as i32,
            max_interval: payload.max_interval as i32,
            manufacturer_data: (!payload.manufacturer_data.is_empty())
                .then_some(payload.manufacturer_data.as_slice()),
            service_data: (!payload.service_data.is_empty())
                .then_some(payload.service_data.as_slice()),
            flag: payload.flag,
            ..Default::default()
        };
        self.gap(op)?.set_adv_conf(&conf).map_err(esp_error(op))
    }

    fn start_advertising(&self, params: &AdvParams) -> Result<(), StackError> {
        let op = StackOp::StartAdvertising;
        self.gap(op)?;
        // `EspBleGap::start_advertising` only knows its built-in parameters.
        let mut adv_params = sys::esp_ble_adv_params_t {
            adv_int_min: params.interval_min,
            adv_int_max: params.interval_max,
            adv_type: adv_type(params.adv_type),
            own_addr_type: own_addr_type(params.own_address_type),
            peer_addr: [0; 6],
            peer_addr_type: sys::esp_ble_addr_type_t_BLE_ADDR_TYPE_PUBLIC,
            channel_map: params.channel_map as sys::esp_ble_adv_channel_t,
            adv_filter_policy: filter_policy(params.filter_policy),
        };
        check(op, unsafe {
            sys::esp_ble_gap_start_advertising(&mut adv_params)
        })
    }

    fn create_attribute_table(
        &self,
        gatts_if: GattInterface,
        service_uuid: u16,
        attributes: &[AttributeSpec],
    ) -> Result<(), StackError> {
        let op = StackOp::CreateAttributeTable;
        self.gatts(op)?;

        let mut table = lock(&self.table);
        if table.is_some() {
            return Err(invalid_state(op));
        }
        let buffers = table.insert(TableBuffers::new(service_uuid, attributes));
        let rows = buffers.rows(attributes);
        let result = check(op, unsafe {
            sys::esp_ble_gatts_create_attr_tab(
                rows.as_ptr(),
                gatts_if.0,
                rows.len() as u8,
                SERVICE_INSTANCE,
            )
        });
        if result.is_err() {
            *table = None;
        }
        result
    }

    fn start_service(&self, service_handle: Handle) -> Result<(), StackError> {
        let op = StackOp::StartService;
        self.gatts(op)?
            .start_service(service_handle)
            .map_err(esp_error(op))
    }

    fn send_response(
        &self,
        gatts_if: GattInterface,
        conn_id: ConnectionId,
        trans_id: TransactionId,
        status: GattStatus,
        value: Option<ResponseValue<'_>>,
    ) -> Result<(), StackError> {
        let op = StackOp::SendResponse;
        let gatts = self.gatts(op)?;

        let response = match value {
            Some(value) => {
                let mut response = GattResponse::new();
                response
                    .attr_handle(value.handle)
                    .auth_req(0)
                    .offset(value.offset)
                    .value(value.value)
                    .map_err(|_| {
                        StackError::new(op, sys::ESP_ERR_INVALID_SIZE as sys::esp_err_t)
                    })?;
                Some(response)
            }
            None => None,
        };

        gatts
            .send_response(
                gatts_if.0,
                conn_id.0,
                trans_id.0,
                response_status(status),
                response.as_ref(),
            )
            .map_err(esp_error(op))
    }

    fn security_response(&self, addr: BleAddress, accept: bool) -> Result<(), StackError> {
        let op = StackOp::SecurityResponse;
        self.gap(op)?;
        let mut bd_addr = *addr.as_bytes();
        check(op, unsafe {
            sys::esp_ble_gap_security_rsp(bd_addr.as_mut_ptr(), accept)
        })
    }
}

// ==================== Event translation ====================

fn translate_gatts(event: SvcGattsEvent<'_>) -> Option<GattsEvent> {
    let event = match event {
        SvcGattsEvent::ServiceRegistered { status, app_id } => GattsEvent::Registered {
            status: gatt_status(status),
            app_id,
        },
        SvcGattsEvent::AttributeTableCreated {
            status, handles, ..
        } => GattsEvent::AttributeTableCreated {
            status: gatt_status(status),
            service_handle: handles.first().copied().unwrap_or_default(),
            handles: AttributeTable::value_handles(handles),
        },
        SvcGattsEvent::PeerConnected { conn_id, addr, .. } => GattsEvent::Connected {
            conn_id: ConnectionId(conn_id),
            addr: address(addr),
        },
        SvcGattsEvent::PeerDisconnected {
            conn_id,
            addr,
            reason,
        } => GattsEvent::Disconnected {
            conn_id: ConnectionId(conn_id),
            addr: address(addr),
            reason: reason as u16,
        },
        SvcGattsEvent::Read {
            conn_id,
            trans_id,
            addr,
            handle,
            offset,
            need_rsp,
            ..
        } => GattsEvent::Read(ReadRequest {
            conn_id: ConnectionId(conn_id),
            trans_id: TransactionId(trans_id),
            addr: address(addr),
            handle,
            offset,
            need_rsp,
        }),
        SvcGattsEvent::Write {
            conn_id,
            trans_id,
            addr,
            handle,
            offset,
            need_rsp,
            is_prep,
            value,
        } => GattsEvent::Write(WriteRequest {
            conn_id: ConnectionId(conn_id),
            trans_id: TransactionId(trans_id),
            addr: address(addr),
            handle,
            offset,
            need_rsp,
            is_prep,
            value: value.to_vec(),
        }),
        other => {
            trace!("Ignoring GATTS event {:?}", other);
            return None;
        }
    };
    Some(event)
}

fn translate_gap(event: BleGapEvent<'_>) -> Option<GapEvent> {
    let event = match event {
        BleGapEvent::AdvertisingConfigured(status) => GapEvent::AdvertisingDataCommitted {
            kind: PayloadKind::Primary,
            status: bt_status(status),
        },
        BleGapEvent::ScanResponseConfigured(status) => GapEvent::AdvertisingDataCommitted {
            kind: PayloadKind::ScanResponse,
            status: bt_status(status),
        },
        BleGapEvent::AdvertisingStarted(status) => GapEvent::AdvertisingStarted {
            status: bt_status(status),
        },
        BleGapEvent::SecurityRequest(addr) => GapEvent::SecurityRequest {
            addr: address(addr),
        },
        other => {
            trace!("Ignoring GAP event {:?}", other);
            return None;
        }
    };
    Some(event)
}
