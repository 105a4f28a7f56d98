//! BLE provisioning peripheral binary.
//!
//! - **ESP32**: `cargo espflash flash --features esp32 --release`
//! - **Host**: `cargo run` runs the peripheral against the loopback stack and
//!   plays one scripted companion session. Set `PROVISIONER_CONFIG` to a JSON
//!   file to override the default configuration.

use ble_provisioner::config::ProvisioningConfig;
use log::{debug, error, info, warn};
use std::time::Duration;

/// How often the idle loop reports the lifecycle state.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(10);

#[cfg(feature = "esp32")]
fn main() {
    use ble_provisioner::esp::Bluedroid;
    use ble_provisioner::{bootstrap, EventHandler, Peripheral};
    use esp_idf_hal::peripherals::Peripherals;
    use esp_idf_svc::nvs::EspDefaultNvsPartition;
    use std::sync::{Arc, Weak};

    // Link ESP-IDF patches (must be first!)
    esp_idf_sys::link_patches();
    esp_idf_svc::log::EspLogger::initialize_default();

    info!("=== BLE provisioner starting ===");

    let peripherals = match Peripherals::take() {
        Ok(p) => p,
        Err(e) => {
            error!("Cannot take peripherals: {}", e);
            return;
        }
    };
    let nvs = match EspDefaultNvsPartition::take() {
        Ok(nvs) => Some(nvs),
        Err(e) => {
            warn!("NVS unavailable, bonding keys will not persist: {}", e);
            None
        }
    };

    let config = ProvisioningConfig::default();
    let stack = Arc::new(Bluedroid::new(peripherals.modem, nvs));
    let peripheral = Arc::new(Peripheral::new(stack.clone(), &config));
    let handler: Weak<dyn EventHandler> = Arc::downgrade(&peripheral);
    stack.set_handler(handler);

    if let Err(e) = bootstrap::start(stack.as_ref(), peripheral.as_ref()) {
        error!("Provisioner halted: {}", e);
        return;
    }

    info!("Entering idle loop...");
    let mut reported = false;
    loop {
        std::thread::sleep(HEARTBEAT_INTERVAL);
        let state = peripheral.state();
        debug!("Heartbeat - {}", state);
        if state.is_fatal() {
            error!("Provisioner halted: {}", state);
            return;
        }

        match peripheral.credentials() {
            Ok(creds) if !reported => {
                info!("Credentials received for a {}-byte SSID", creds.ssid().len());
                reported = true;
            }
            Ok(_) => {}
            Err(_) => reported = false,
        }
    }
}

#[cfg(not(feature = "esp32"))]
fn load_config() -> ProvisioningConfig {
    use ble_provisioner::config::CONFIG_ENV_VAR;

    match std::env::var(CONFIG_ENV_VAR) {
        Ok(path) => match ProvisioningConfig::from_file(&path) {
            Ok(config) => {
                info!("Loaded configuration from {}", path);
                config
            }
            Err(e) => {
                error!("{}; using defaults", e);
                ProvisioningConfig::default()
            }
        },
        Err(_) => ProvisioningConfig::default(),
    }
}

#[cfg(not(feature = "esp32"))]
#[tokio::main(flavor = "current_thread")]
async fn main() {
    use ble_provisioner::loopback::LoopbackStack;
    use ble_provisioner::stack::BleAddress;
    use ble_provisioner::{bootstrap, AttributeIndex, Peripheral};
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    info!("=== BLE provisioner starting (loopback stack) ===");

    let config = load_config();
    let stack = Arc::new(LoopbackStack::new());
    let peripheral = Arc::new(Peripheral::new(stack.clone(), &config));

    if let Err(e) = bootstrap::start(stack.as_ref(), peripheral.as_ref()) {
        error!("Provisioner halted: {}", e);
        return;
    }
    stack.pump(peripheral.as_ref());
    let state = peripheral.state();
    if state.is_fatal() {
        error!("Provisioner halted: {}", state);
        return;
    }
    info!("Peripheral {}", state);

    // One scripted companion session.
    let companion = BleAddress::new([0x02, 0x00, 0x00, 0x00, 0x00, 0x01]);
    let (Some(wifi_id), Some(password)) = (
        peripheral.table().handle_of(AttributeIndex::WifiId),
        peripheral.table().handle_of(AttributeIndex::Password),
    ) else {
        error!("Attribute table was not bound");
        return;
    };

    let conn = stack.connect_peer(companion);
    let writes = [
        stack.peer_write(conn, companion, wifi_id, b"ProvisionerDemo"),
        stack.peer_write(conn, companion, password, b"demo-passphrase"),
    ];
    let read = stack.peer_read(conn, companion, wifi_id);
    stack.pump(peripheral.as_ref());

    for trans_id in writes.into_iter().chain([read]) {
        if let Some((status, value)) = stack.response_for(trans_id) {
            info!(
                "Transaction {}: {} ({} bytes)",
                trans_id.0,
                status,
                value.map_or(0, |v| v.len())
            );
        }
    }

    stack.disconnect_peer(conn, companion, 0x13);
    stack.pump(peripheral.as_ref());

    match peripheral.credentials() {
        Ok(creds) => info!("Credentials ready ({}-byte SSID)", creds.ssid().len()),
        Err(e) => error!("No usable credentials: {}", e),
    }

    let cancel = CancellationToken::new();
    let idle = {
        let cancel = cancel.clone();
        let peripheral = peripheral.clone();
        let stack = stack.clone();
        tokio::spawn(async move {
            let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = heartbeat.tick() => {
                        stack.pump(peripheral.as_ref());
                        debug!("Heartbeat - {}", peripheral.state());
                    }
                }
            }
        })
    };

    info!("Peripheral {} (Ctrl+C to exit)", peripheral.state());
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Cannot listen for Ctrl+C: {}", e);
    }
    cancel.cancel();
    if let Err(e) = idle.await {
        warn!("Heartbeat task failed: {}", e);
    }
    info!("Shutting down");
}
