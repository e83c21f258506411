//! BLE scanning functionality.
//!
//! Pumps adapter events into [`TransportEvent`]s: advertisements while a scan
//! is active, plus disconnections and adapter state changes at all times.

use btleplug::api::{Central, CentralEvent, CentralState, Manager as _, Peripheral as _, ScanFilter};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use futures::stream::StreamExt;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace};

use crate::ble::advertising::{Advertisement, AdvertisementData};
use crate::ble::transport::{AdapterState, TransportEvent};
use crate::error::{Error, Result};

/// Peripherals seen so far, keyed by identifier string.
pub(crate) type PeripheralCache = Arc<RwLock<HashMap<String, Peripheral>>>;

/// BLE scanner for discovering biometric peripherals.
pub struct BleScanner {
    /// The BLE adapter to use for scanning.
    adapter: Adapter,
    /// Whether scanning is currently active.
    is_scanning: Arc<RwLock<bool>>,
    /// Discovered peripherals.
    discovered: PeripheralCache,
    /// Channel for transport events.
    event_tx: mpsc::UnboundedSender<TransportEvent>,
    /// Handle to the adapter event task.
    pump_handle: RwLock<Option<tokio::task::JoinHandle<()>>>,
}

impl BleScanner {
    /// Open the first Bluetooth adapter.
    ///
    /// # Errors
    ///
    /// Returns an error if Bluetooth is not available.
    pub async fn first_adapter() -> Result<Adapter> {
        let manager = Manager::new()
            .await
            .map_err(|_e| Error::BluetoothUnavailable)?;

        let adapters = manager.adapters().await.map_err(Error::Bluetooth)?;

        let adapter = adapters
            .into_iter()
            .next()
            .ok_or(Error::BluetoothUnavailable)?;

        info!(
            "Using Bluetooth adapter: {:?}",
            adapter.adapter_info().await.ok()
        );

        Ok(adapter)
    }

    /// Create a scanner on an adapter. Events are sent on `event_tx`.
    pub fn with_adapter(adapter: Adapter, event_tx: mpsc::UnboundedSender<TransportEvent>) -> Self {
        Self {
            adapter,
            is_scanning: Arc::new(RwLock::new(false)),
            discovered: Arc::new(RwLock::new(HashMap::new())),
            event_tx,
            pump_handle: RwLock::new(None),
        }
    }

    /// Start forwarding adapter events. Must be called from a tokio runtime.
    pub fn start_event_pump(&self) {
        if self.pump_handle.read().is_some() {
            return;
        }

        let adapter = self.adapter.clone();
        let is_scanning = self.is_scanning.clone();
        let discovered = self.discovered.clone();
        let event_tx = self.event_tx.clone();

        let handle = tokio::spawn(async move {
            let mut events = match adapter.events().await {
                Ok(events) => events,
                Err(e) => {
                    error!("Failed to get adapter events: {}", e);
                    return;
                }
            };

            if let Ok(state) = adapter.adapter_state().await {
                let _ = event_tx.send(TransportEvent::AdapterStateChanged(adapter_state(state)));
            }

            while let Some(event) = events.next().await {
                Self::handle_event(event, &adapter, &is_scanning, &discovered, &event_tx).await;
                if event_tx.is_closed() {
                    break;
                }
            }

            debug!("Adapter event loop ended");
        });

        *self.pump_handle.write() = Some(handle);
    }

    /// Start scanning.
    ///
    /// # Errors
    ///
    /// Returns an error if scanning cannot be started.
    pub async fn start_scanning(&self) -> Result<()> {
        if *self.is_scanning.read() {
            debug!("Already scanning, restarting scan");
        }

        info!("Starting BLE scan");

        self.adapter
            .start_scan(ScanFilter::default())
            .await
            .map_err(Error::Bluetooth)?;

        *self.is_scanning.write() = true;

        Ok(())
    }

    /// Stop scanning.
    pub async fn stop_scanning(&self) -> Result<()> {
        if !*self.is_scanning.read() {
            debug!("Not scanning, ignoring stop request");
            return Ok(());
        }

        info!("Stopping BLE scan");

        *self.is_scanning.write() = false;

        self.adapter.stop_scan().await.map_err(Error::Bluetooth)?;

        Ok(())
    }

    /// Check if currently scanning.
    pub fn is_scanning(&self) -> bool {
        *self.is_scanning.read()
    }

    /// Look up a peripheral by identifier, asking the adapter on a cache miss.
    pub async fn peripheral(&self, identifier: &str) -> Option<Peripheral> {
        let cached = self.discovered.read().get(identifier).cloned();
        if cached.is_some() {
            return cached;
        }

        let peripherals = self.adapter.peripherals().await.ok()?;
        let peripheral = peripherals
            .into_iter()
            .find(|p| p.id().to_string() == identifier)?;
        self.discovered
            .write()
            .insert(identifier.to_string(), peripheral.clone());
        Some(peripheral)
    }

    /// Get the underlying adapter.
    pub fn adapter(&self) -> &Adapter {
        &self.adapter
    }

    /// Handle a BLE central event.
    async fn handle_event(
        event: CentralEvent,
        adapter: &Adapter,
        is_scanning: &Arc<RwLock<bool>>,
        discovered: &PeripheralCache,
        event_tx: &mpsc::UnboundedSender<TransportEvent>,
    ) {
        match event {
            CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => {
                trace!("Device seen: {:?}", id);
                if *is_scanning.read() {
                    Self::process_peripheral(adapter, id, discovered, event_tx).await;
                }
            }
            CentralEvent::ManufacturerDataAdvertisement { id, .. } => {
                if *is_scanning.read() {
                    Self::process_peripheral(adapter, id, discovered, event_tx).await;
                }
            }
            CentralEvent::DeviceConnected(id) => {
                debug!("Device connected: {:?}", id);
            }
            CentralEvent::DeviceDisconnected(id) => {
                debug!("Device disconnected: {:?}", id);
                let _ = event_tx.send(TransportEvent::Disconnected {
                    identifier: id.to_string(),
                    reason: None,
                });
            }
            CentralEvent::StateUpdate(state) => {
                let _ = event_tx.send(TransportEvent::AdapterStateChanged(adapter_state(state)));
            }
            CentralEvent::ServiceDataAdvertisement { .. } => {}
            CentralEvent::ServicesAdvertisement { .. } => {}
        }
    }

    /// Process a discovered peripheral.
    async fn process_peripheral(
        adapter: &Adapter,
        id: PeripheralId,
        discovered: &PeripheralCache,
        event_tx: &mpsc::UnboundedSender<TransportEvent>,
    ) {
        let peripheral = match adapter.peripheral(&id).await {
            Ok(p) => p,
            Err(e) => {
                trace!("Failed to get peripheral: {}", e);
                return;
            }
        };

        let properties = match peripheral.properties().await {
            Ok(Some(p)) => p,
            _ => return,
        };

        let identifier = id.to_string();
        discovered.write().insert(identifier.clone(), peripheral);

        let advertisement = Advertisement {
            identifier,
            name: properties.local_name.clone(),
            rssi: properties.rssi,
            data: AdvertisementData {
                local_name: properties.local_name,
                manufacturer_data: properties.manufacturer_data,
                service_data: properties.service_data,
                services: properties.services,
                tx_power_level: properties.tx_power_level,
            },
        };

        let _ = event_tx.send(TransportEvent::Advertisement(advertisement));
    }
}

impl Drop for BleScanner {
    fn drop(&mut self) {
        *self.is_scanning.write() = false;
        if let Some(handle) = self.pump_handle.write().take() {
            handle.abort();
        }
    }
}

/// Map the platform adapter state.
fn adapter_state(state: CentralState) -> AdapterState {
    match state {
        CentralState::PoweredOn => AdapterState::PoweredOn,
        CentralState::PoweredOff => AdapterState::PoweredOff,
        #[allow(unreachable_patterns)]
        _ => AdapterState::Unknown,
    }
}
