//! [`BleTransport`] on top of `btleplug`.
//!
//! Requests for one peripheral run one after another on that peripheral's
//! worker task, in the order they were made. Outcomes are reported as
//! [`TransportEvent`]s on the channel given at construction.

use btleplug::api::{CharPropFlags, Characteristic, Peripheral as _, WriteType};
use btleplug::platform::{Adapter, Peripheral};
use bytes::Bytes;
use futures::future::{BoxFuture, FutureExt};
use futures::stream::StreamExt;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::{debug, error, trace, warn};
use uuid::Uuid;

use crate::ble::scanner::BleScanner;
use crate::ble::transport::{BleTransport, DiscoveredCharacteristic, TransportEvent};
use crate::ble::DeviceType;
use crate::error::{Error, Result};

type Operation = BoxFuture<'static, ()>;

/// Ordering domain of a request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Lane {
    /// Scan start and stop.
    Adapter,
    /// GATT requests of one peripheral.
    Peripheral(String),
}

/// Serial request queues with one worker task per lane.
struct OperationQueues {
    runtime: Handle,
    lanes: Mutex<HashMap<Lane, mpsc::UnboundedSender<Operation>>>,
}

impl OperationQueues {
    fn new(runtime: Handle) -> Self {
        Self {
            runtime,
            lanes: Mutex::new(HashMap::new()),
        }
    }

    /// Run `operation` after everything queued earlier on `lane`.
    fn push(&self, lane: Lane, operation: Operation) {
        let mut lanes = self.lanes.lock();
        let operation = match lanes.get(&lane) {
            Some(tx) => match tx.send(operation) {
                Ok(()) => return,
                Err(mpsc::error::SendError(operation)) => operation,
            },
            None => operation,
        };

        let (tx, mut rx) = mpsc::unbounded_channel::<Operation>();
        let name = format!("{:?}", lane);
        self.runtime.spawn(async move {
            while let Some(operation) = rx.recv().await {
                operation.await;
            }
            trace!("Request queue {} closed", name);
        });
        // The receiver lives in the worker, so the first send cannot fail.
        let _ = tx.send(operation);
        lanes.insert(lane, tx);
    }

    /// Stop accepting requests on `lane`. Queued requests still run.
    fn close(&self, lane: &Lane) {
        self.lanes.lock().remove(lane);
    }
}

/// Transport backed by the platform Bluetooth stack.
pub struct BtleplugTransport {
    scanner: Arc<BleScanner>,
    event_tx: mpsc::UnboundedSender<TransportEvent>,
    runtime: Handle,
    queues: OperationQueues,
    /// Notification forwarding tasks by identifier.
    listeners: Arc<RwLock<HashMap<String, tokio::task::JoinHandle<()>>>>,
}

impl BtleplugTransport {
    /// Create a transport on the first adapter.
    ///
    /// # Errors
    ///
    /// Returns an error if Bluetooth is not available.
    pub async fn new(event_tx: mpsc::UnboundedSender<TransportEvent>) -> Result<Self> {
        let adapter = BleScanner::first_adapter().await?;
        Ok(Self::with_adapter(adapter, event_tx))
    }

    /// Create a transport on a specific adapter. Must be called from a tokio runtime.
    pub fn with_adapter(
        adapter: Adapter,
        event_tx: mpsc::UnboundedSender<TransportEvent>,
    ) -> Self {
        let scanner = Arc::new(BleScanner::with_adapter(adapter, event_tx.clone()));
        scanner.start_event_pump();
        let runtime = Handle::current();

        Self {
            scanner,
            event_tx,
            queues: OperationQueues::new(runtime.clone()),
            runtime,
            listeners: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Build a request against a cached peripheral.
    fn with_peripheral<F, Fut>(
        &self,
        identifier: &str,
        operation: &'static str,
        task: F,
    ) -> Operation
    where
        F: FnOnce(Peripheral, mpsc::UnboundedSender<TransportEvent>) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let scanner = self.scanner.clone();
        let event_tx = self.event_tx.clone();
        let identifier = identifier.to_string();

        async move {
            match scanner.peripheral(&identifier).await {
                Some(peripheral) => task(peripheral, event_tx).await,
                None => warn!("{}: unknown peripheral {}", operation, identifier),
            }
        }
        .boxed()
    }

    /// Queue a request behind earlier requests for the same peripheral.
    fn enqueue<F, Fut>(&self, identifier: &str, operation: &'static str, task: F)
    where
        F: FnOnce(Peripheral, mpsc::UnboundedSender<TransportEvent>) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let request = self.with_peripheral(identifier, operation, task);
        self.queues
            .push(Lane::Peripheral(identifier.to_string()), request);
    }

    fn start_notifications(
        listeners: &Arc<RwLock<HashMap<String, tokio::task::JoinHandle<()>>>>,
        peripheral: Peripheral,
        identifier: String,
        event_tx: mpsc::UnboundedSender<TransportEvent>,
    ) {
        if listeners.read().contains_key(&identifier) {
            return;
        }

        let key = identifier.clone();
        let handle = tokio::spawn(async move {
            let mut notifications = match peripheral.notifications().await {
                Ok(n) => n,
                Err(e) => {
                    error!("Failed to get notifications stream: {}", e);
                    return;
                }
            };

            while let Some(notification) = notifications.next().await {
                trace!(
                    "Notification from {} on {}: {:02X?}",
                    identifier,
                    notification.uuid,
                    notification.value
                );
                let event = TransportEvent::ValueUpdated {
                    identifier: identifier.clone(),
                    characteristic: notification.uuid,
                    value: Bytes::from(notification.value),
                };
                if event_tx.send(event).is_err() {
                    break;
                }
            }

            debug!("Notification listener for {} stopped", identifier);
        });

        listeners.write().insert(key, handle);
    }

    fn stop_notifications(&self, identifier: &str) {
        if let Some(handle) = self.listeners.write().remove(identifier) {
            handle.abort();
        }
    }
}

/// Find a discovered characteristic by UUID.
fn find_characteristic(peripheral: &Peripheral, uuid: Uuid) -> Result<Characteristic> {
    peripheral
        .characteristics()
        .into_iter()
        .find(|c| c.uuid == uuid)
        .ok_or_else(|| Error::CharacteristicNotFound {
            uuid: uuid.to_string(),
        })
}

impl BleTransport for BtleplugTransport {
    fn start_scan(&self, target: DeviceType) {
        debug!("Scan requested for {}", target);
        let scanner = self.scanner.clone();
        let request = async move {
            if let Err(e) = scanner.start_scanning().await {
                error!("Failed to start scan: {}", e);
            }
        };
        self.queues.push(Lane::Adapter, request.boxed());
    }

    fn stop_scan(&self) {
        let scanner = self.scanner.clone();
        let request = async move {
            if let Err(e) = scanner.stop_scanning().await {
                warn!("Failed to stop scan: {}", e);
            }
        };
        self.queues.push(Lane::Adapter, request.boxed());
    }

    fn connect(&self, identifier: &str) {
        let listeners = self.listeners.clone();
        let id = identifier.to_string();
        self.enqueue(identifier, "connect", move |peripheral, event_tx| async move {
            let event = match peripheral.connect().await {
                Ok(()) => {
                    let name = peripheral
                        .properties()
                        .await
                        .ok()
                        .flatten()
                        .and_then(|p| p.local_name);
                    let tx = event_tx.clone();
                    Self::start_notifications(&listeners, peripheral, id.clone(), tx);
                    TransportEvent::Connected {
                        identifier: id,
                        name,
                    }
                }
                Err(e) => TransportEvent::ConnectFailed {
                    identifier: id,
                    reason: e.to_string(),
                },
            };
            let _ = event_tx.send(event);
        });
    }

    fn cancel_connection(&self, identifier: &str) {
        self.stop_notifications(identifier);
        // Not queued, so it can interrupt a connect that is still pending.
        self.queues.close(&Lane::Peripheral(identifier.to_string()));
        let request = self.with_peripheral(identifier, "disconnect", |peripheral, _| async move {
            if let Err(e) = peripheral.disconnect().await {
                warn!("Failed to disconnect: {}", e);
            }
        });
        self.runtime.spawn(request);
    }

    fn discover_services(&self, identifier: &str, services: Option<&[Uuid]>) {
        let id = identifier.to_string();
        let wanted = services.map(|s| s.to_vec());
        self.enqueue(identifier, "discover services", move |peripheral, event_tx| async move {
            let event = match peripheral.discover_services().await {
                Ok(()) => {
                    let services = peripheral
                        .services()
                        .into_iter()
                        .map(|s| s.uuid)
                        .filter(|uuid| wanted.as_ref().map_or(true, |w| w.contains(uuid)))
                        .collect();
                    TransportEvent::ServicesDiscovered {
                        identifier: id,
                        services,
                    }
                }
                Err(e) => TransportEvent::ServiceDiscoveryFailed {
                    identifier: id,
                    reason: e.to_string(),
                },
            };
            let _ = event_tx.send(event);
        });
    }

    fn discover_characteristics(
        &self,
        identifier: &str,
        service: Uuid,
        characteristics: Option<&[Uuid]>,
    ) {
        let id = identifier.to_string();
        let wanted = characteristics.map(|c| c.to_vec());
        self.enqueue(identifier, "characteristics", move |peripheral, event_tx| async move {
            let service_found = peripheral.services().into_iter().find(|s| s.uuid == service);
            let event = match service_found {
                Some(found) => TransportEvent::CharacteristicsDiscovered {
                    identifier: id,
                    service,
                    characteristics: found
                        .characteristics
                        .into_iter()
                        .filter(|c| wanted.as_ref().map_or(true, |w| w.contains(&c.uuid)))
                        .map(|c| {
                            DiscoveredCharacteristic::new(
                                c.uuid,
                                c.properties.contains(CharPropFlags::NOTIFY),
                            )
                        })
                        .collect(),
                },
                None => TransportEvent::CharacteristicDiscoveryFailed {
                    identifier: id,
                    service,
                    reason: "service not discovered".to_string(),
                },
            };
            let _ = event_tx.send(event);
        });
    }

    fn set_notify(&self, identifier: &str, characteristic: Uuid, enabled: bool) {
        self.enqueue(identifier, "set notify", move |peripheral, _| async move {
            let result = match find_characteristic(&peripheral, characteristic) {
                Ok(c) if enabled => peripheral.subscribe(&c).await.map_err(Error::Bluetooth),
                Ok(c) => peripheral.unsubscribe(&c).await.map_err(Error::Bluetooth),
                Err(e) => Err(e),
            };
            match result {
                Ok(()) if enabled => debug!("Notifications enabled on {}", characteristic),
                Ok(()) => debug!("Notifications disabled on {}", characteristic),
                Err(e) => warn!("Failed to set notify on {}: {}", characteristic, e),
            }
        });
    }

    fn write_value(
        &self,
        identifier: &str,
        characteristic: Uuid,
        value: &[u8],
        with_response: bool,
    ) {
        let value = value.to_vec();
        self.enqueue(identifier, "write", move |peripheral, _| async move {
            let write_type = if with_response {
                WriteType::WithResponse
            } else {
                WriteType::WithoutResponse
            };
            let result = match find_characteristic(&peripheral, characteristic) {
                Ok(c) => peripheral
                    .write(&c, &value, write_type)
                    .await
                    .map_err(Error::Bluetooth),
                Err(e) => Err(e),
            };
            match result {
                Ok(()) => trace!("Wrote {} bytes to {}", value.len(), characteristic),
                Err(e) => warn!("Write to {} failed: {}", characteristic, e),
            }
        });
    }

    fn read_value(&self, identifier: &str, characteristic: Uuid) {
        let id = identifier.to_string();
        self.enqueue(identifier, "read", move |peripheral, event_tx| async move {
            let result = match find_characteristic(&peripheral, characteristic) {
                Ok(c) => peripheral.read(&c).await.map_err(Error::Bluetooth),
                Err(e) => Err(e),
            };
            match result {
                Ok(value) => {
                    let _ = event_tx.send(TransportEvent::ValueUpdated {
                        identifier: id,
                        characteristic,
                        value: Bytes::from(value),
                    });
                }
                // Reads are best effort.
                Err(e) => trace!("Read of {} failed: {}", characteristic, e),
            }
        });
    }
}

impl Drop for BtleplugTransport {
    fn drop(&mut self) {
        for (_, handle) in self.listeners.write().drain() {
            handle.abort();
        }
    }
}
