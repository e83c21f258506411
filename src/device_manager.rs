//! Device manager for pairing, connecting and recording iREd peripherals.
//!
//! The manager runs the [`Orchestrator`] on one background task. Commands,
//! radio events and timers are all serialized through that task, so session
//! state is never shared between threads. After every message the task
//! publishes a fresh [`DeviceData`] snapshot and device list, which the
//! manager's read methods return without a round trip.

use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::ble::{AdapterState, BleTransport, BtleplugTransport, DeviceType, TransportEvent};
use crate::config::ManagerConfig;
use crate::data::DeviceData;
use crate::error::{Error, Result};
use crate::fanout::{CallbackHandle, EventFanout, Observers, SessionEvent};
use crate::identity::{IdentityStore, MemoryIdentityStore, PairedIdentity};
use crate::orchestrator::Orchestrator;
use crate::protocol::{DecoderSet, ProtocolDecoder};
use crate::recording::RecordingMode;
use crate::registry::PeripheralEntry;
use crate::scheduler::{TimerEvent, TokioScheduler};

/// Capacity of the command queue.
const COMMAND_QUEUE_CAPACITY: usize = 32;

/// Operation requested of the event loop.
#[derive(Debug)]
enum Request {
    StartPairing(DeviceType),
    StopPairing,
    Connect(String),
    ConnectType(DeviceType),
    Reconnect(DeviceType),
    ConnectByIdentifier {
        identifier: String,
        device_type: DeviceType,
    },
    Disconnect(DeviceType),
    DisconnectIdentifier(String),
    StartJumpRopeRecording(RecordingMode),
    StopJumpRopeRecording,
    StartHeartRateRecording,
    StopHeartRateRecording,
    SetRssiThreshold(i16),
    SetObservers(Observers),
    Shutdown,
}

struct Command {
    request: Request,
    reply: oneshot::Sender<Result<()>>,
}

/// State published by the event loop after each message.
#[derive(Debug, Default)]
struct Published {
    data: RwLock<DeviceData>,
    devices: RwLock<Vec<PeripheralEntry>>,
    adapter_state: RwLock<AdapterState>,
}

impl Published {
    fn update(&self, orchestrator: &Orchestrator) {
        *self.data.write() = orchestrator.data().clone();
        *self.devices.write() = orchestrator.registry().entries().to_vec();
        *self.adapter_state.write() = orchestrator.adapter_state();
    }
}

/// Builder for a [`DeviceManager`] with injected collaborators.
pub struct DeviceManagerBuilder {
    config: ManagerConfig,
    identities: Option<Arc<dyn IdentityStore>>,
    decoders: DecoderSet,
    observers: Observers,
}

impl Default for DeviceManagerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceManagerBuilder {
    /// Start from the default configuration, an in-memory identity store and
    /// the bundled heart-rate decoder.
    pub fn new() -> Self {
        Self {
            config: ManagerConfig::default(),
            identities: None,
            decoders: DecoderSet::with_standard_profiles(),
            observers: Observers::default(),
        }
    }

    /// Use a configuration.
    pub fn config(mut self, config: ManagerConfig) -> Self {
        self.config = config;
        self
    }

    /// Persist paired identities in `store`.
    pub fn identity_store(mut self, store: Arc<dyn IdentityStore>) -> Self {
        self.identities = Some(store);
        self
    }

    /// Replace the whole decoder set.
    pub fn decoders(mut self, decoders: DecoderSet) -> Self {
        self.decoders = decoders;
        self
    }

    /// Register the decoder for one device type.
    pub fn decoder(
        mut self,
        device_type: DeviceType,
        decoder: impl ProtocolDecoder + 'static,
    ) -> Self {
        self.decoders.insert(device_type, Arc::new(decoder));
        self
    }

    /// Register observers.
    pub fn observers(mut self, observers: Observers) -> Self {
        self.observers = observers;
        self
    }

    /// Build on the platform Bluetooth stack's first adapter.
    ///
    /// # Errors
    ///
    /// Returns an error if Bluetooth is not available.
    pub async fn build(self) -> Result<DeviceManager> {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let transport = BtleplugTransport::new(event_tx).await?;
        Ok(self.build_with_transport(Arc::new(transport), event_rx))
    }

    /// Build on any transport. `events` must receive the transport's events.
    ///
    /// Must be called from a tokio runtime.
    pub fn build_with_transport(
        self,
        transport: Arc<dyn BleTransport>,
        events: mpsc::UnboundedReceiver<TransportEvent>,
    ) -> DeviceManager {
        let identities = self
            .identities
            .unwrap_or_else(|| Arc::new(MemoryIdentityStore::new()));
        let (timer_tx, timer_rx) = mpsc::unbounded_channel();
        let fanout =
            EventFanout::with_observers(self.config.event_channel_capacity, self.observers);
        let event_tx = fanout.sender();

        let orchestrator = Orchestrator::new(
            self.config,
            transport,
            Arc::new(TokioScheduler::new(timer_tx)),
            identities.clone(),
            self.decoders,
            fanout,
        );

        let published = Arc::new(Published::default());
        published.update(&orchestrator);

        let (command_tx, command_rx) = mpsc::channel(COMMAND_QUEUE_CAPACITY);
        let handle = tokio::spawn(run_event_loop(
            orchestrator,
            command_rx,
            events,
            timer_rx,
            published.clone(),
        ));

        DeviceManager {
            command_tx,
            published,
            identities,
            event_tx,
            callback_counter: AtomicU64::new(0),
            background_handle: RwLock::new(Some(handle)),
        }
    }
}

/// Central manager for iREd peripherals.
pub struct DeviceManager {
    /// Command queue into the event loop.
    command_tx: mpsc::Sender<Command>,
    /// Snapshots published by the event loop.
    published: Arc<Published>,
    /// Paired identities.
    identities: Arc<dyn IdentityStore>,
    /// Session event channel.
    event_tx: broadcast::Sender<SessionEvent>,
    /// Callback ID counter.
    callback_counter: AtomicU64,
    /// Background task handle.
    background_handle: RwLock<Option<tokio::task::JoinHandle<()>>>,
}

impl DeviceManager {
    /// Create a manager on the first Bluetooth adapter with default settings.
    ///
    /// # Errors
    ///
    /// Returns an error if Bluetooth is not available.
    pub async fn new() -> Result<Self> {
        DeviceManagerBuilder::new().build().await
    }

    /// Start configuring a manager.
    pub fn builder() -> DeviceManagerBuilder {
        DeviceManagerBuilder::new()
    }

    async fn request(&self, request: Request) -> Result<()> {
        let (reply, response) = oneshot::channel();
        self.command_tx
            .send(Command { request, reply })
            .await
            .map_err(|_| Error::ManagerStopped)?;
        response.await.map_err(|_| Error::ManagerStopped)?
    }

    /// Forget the paired identity of `device_type` and scan for a new one.
    pub async fn start_pairing(&self, device_type: DeviceType) -> Result<()> {
        self.request(Request::StartPairing(device_type)).await
    }

    /// Stop scanning and leave pairing.
    pub async fn stop_pairing(&self) -> Result<()> {
        self.request(Request::StopPairing).await
    }

    /// Connect to a discovered peripheral.
    pub async fn connect(&self, identifier: &str) -> Result<()> {
        self.request(Request::Connect(identifier.to_string())).await
    }

    /// Connect to the paired peripheral of `device_type`.
    pub async fn connect_type(&self, device_type: DeviceType) -> Result<()> {
        self.request(Request::ConnectType(device_type)).await
    }

    /// Scan for the paired peripheral of `device_type` and connect when seen.
    pub async fn reconnect(&self, device_type: DeviceType) -> Result<()> {
        self.request(Request::Reconnect(device_type)).await
    }

    /// Connect to a peripheral by a previously persisted identifier.
    pub async fn connect_by_identifier(
        &self,
        identifier: &str,
        device_type: DeviceType,
    ) -> Result<()> {
        self.request(Request::ConnectByIdentifier {
            identifier: identifier.to_string(),
            device_type,
        })
        .await
    }

    /// Disconnect a device type, or every peripheral for `AllDevices`.
    pub async fn disconnect(&self, device_type: DeviceType) -> Result<()> {
        self.request(Request::Disconnect(device_type)).await
    }

    /// Disconnect a peripheral by identifier.
    pub async fn disconnect_identifier(&self, identifier: &str) -> Result<()> {
        self.request(Request::DisconnectIdentifier(identifier.to_string()))
            .await
    }

    /// Start a jump-rope recording.
    pub async fn start_jump_rope_recording(&self, mode: RecordingMode) -> Result<()> {
        self.request(Request::StartJumpRopeRecording(mode)).await
    }

    /// Stop the jump-rope recording, and a heart-rate recording with it.
    pub async fn stop_jump_rope_recording(&self) -> Result<()> {
        self.request(Request::StopJumpRopeRecording).await
    }

    /// Start a heart-rate recording.
    pub async fn start_heart_rate_recording(&self) -> Result<()> {
        self.request(Request::StartHeartRateRecording).await
    }

    /// Stop the heart-rate recording.
    pub async fn stop_heart_rate_recording(&self) -> Result<()> {
        self.request(Request::StopHeartRateRecording).await
    }

    /// Set the minimum signal strength for pairing candidates, in dBm.
    pub async fn set_rssi_threshold(&self, threshold: i16) -> Result<()> {
        self.request(Request::SetRssiThreshold(threshold)).await
    }

    /// Replace the registered observers.
    pub async fn set_observers(&self, observers: Observers) -> Result<()> {
        self.request(Request::SetObservers(observers)).await
    }

    /// Latest snapshot of every device type.
    pub fn device_data(&self) -> DeviceData {
        self.published.data.read().clone()
    }

    /// Peripherals seen since the manager started.
    pub fn devices(&self) -> Vec<PeripheralEntry> {
        self.published.devices.read().clone()
    }

    /// Last reported adapter state.
    pub fn adapter_state(&self) -> AdapterState {
        *self.published.adapter_state.read()
    }

    /// Paired identity of a device type.
    pub fn paired_identity(&self, device_type: DeviceType) -> Result<Option<PairedIdentity>> {
        self.identities.load(device_type)
    }

    /// Subscribe to every session event.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.event_tx.subscribe()
    }

    /// Register a callback for every session event.
    pub fn on_event<F>(&self, callback: F) -> CallbackHandle
    where
        F: Fn(SessionEvent) + Send + Sync + 'static,
    {
        let callback_id = self.callback_counter.fetch_add(1, Ordering::SeqCst);
        let mut rx = self.event_tx.subscribe();

        let handle = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => callback(event),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Event callback {} missed {} events", callback_id, skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        CallbackHandle::new(callback_id, move || {
            handle.abort();
        })
    }

    /// Whether the event loop is still running.
    pub fn is_running(&self) -> bool {
        self.background_handle
            .read()
            .as_ref()
            .map_or(false, |handle| !handle.is_finished())
    }

    /// Stop scanning, disconnect everything and stop the event loop.
    pub async fn shutdown(&self) -> Result<()> {
        info!("Shutting down device manager");

        match self.request(Request::Shutdown).await {
            Ok(()) | Err(Error::ManagerStopped) => {}
            Err(e) => return Err(e),
        }

        let handle = self.background_handle.write().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!("Device manager task ended abnormally: {}", e);
            }
        }
        Ok(())
    }
}

impl Drop for DeviceManager {
    fn drop(&mut self) {
        if let Some(handle) = self.background_handle.write().take() {
            handle.abort();
        }
    }
}

impl std::fmt::Debug for DeviceManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceManager")
            .field("adapter_state", &self.adapter_state())
            .field("devices", &self.published.devices.read().len())
            .finish()
    }
}

async fn run_event_loop(
    mut orchestrator: Orchestrator,
    mut commands: mpsc::Receiver<Command>,
    mut transport_events: mpsc::UnboundedReceiver<TransportEvent>,
    mut timers: mpsc::UnboundedReceiver<TimerEvent>,
    published: Arc<Published>,
) {
    loop {
        tokio::select! {
            // Radio events and timers are drained before commands.
            biased;

            Some(event) = transport_events.recv() => {
                orchestrator.handle_transport_event(event);
            }
            Some(event) = timers.recv() => {
                orchestrator.handle_timer(event);
            }
            command = commands.recv() => {
                let Some(Command { request, reply }) = command else {
                    debug!("Device manager dropped, stopping event loop");
                    break;
                };

                let stop = matches!(request, Request::Shutdown);
                let result = apply(&mut orchestrator, request);
                published.update(&orchestrator);
                let _ = reply.send(result);
                if stop {
                    break;
                }
                continue;
            }
        }

        published.update(&orchestrator);
    }

    debug!("Device manager event loop ended");
}

fn apply(orchestrator: &mut Orchestrator, request: Request) -> Result<()> {
    match request {
        Request::StartPairing(device_type) => orchestrator.start_pairing(device_type),
        Request::StopPairing => {
            orchestrator.stop_pairing();
            Ok(())
        }
        Request::Connect(identifier) => orchestrator.connect(&identifier),
        Request::ConnectType(device_type) => orchestrator.connect_type(device_type),
        Request::Reconnect(device_type) => orchestrator.reconnect(device_type),
        Request::ConnectByIdentifier {
            identifier,
            device_type,
        } => orchestrator.connect_by_identifier(&identifier, device_type),
        Request::Disconnect(device_type) => orchestrator.disconnect(device_type),
        Request::DisconnectIdentifier(identifier) => {
            orchestrator.disconnect_identifier(&identifier)
        }
        Request::StartJumpRopeRecording(mode) => orchestrator.start_jump_rope_recording(mode),
        Request::StopJumpRopeRecording => orchestrator.stop_jump_rope_recording(),
        Request::StartHeartRateRecording => orchestrator.start_heart_rate_recording(),
        Request::StopHeartRateRecording => orchestrator.stop_heart_rate_recording(),
        Request::SetRssiThreshold(threshold) => {
            orchestrator.set_rssi_threshold(threshold);
            Ok(())
        }
        Request::SetObservers(observers) => {
            orchestrator.set_observers(observers);
            Ok(())
        }
        Request::Shutdown => {
            orchestrator.stop_pairing();
            orchestrator.disconnect(DeviceType::AllDevices)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::{Advertisement, AdvertisementData, HEART_RATE_MEASUREMENT_UUID};
    use crate::fanout::DeviceEvent;
    use crate::data::MeasurementState;
    use parking_lot::Mutex;
    use std::time::Duration;
    use uuid::Uuid;

    #[derive(Default)]
    struct RecordingTransport {
        scans: Mutex<Vec<DeviceType>>,
        connects: Mutex<Vec<String>>,
        cancels: Mutex<Vec<String>>,
    }

    impl BleTransport for RecordingTransport {
        fn start_scan(&self, target: DeviceType) {
            self.scans.lock().push(target);
        }
        fn stop_scan(&self) {}
        fn connect(&self, identifier: &str) {
            self.connects.lock().push(identifier.to_string());
        }
        fn cancel_connection(&self, identifier: &str) {
            self.cancels.lock().push(identifier.to_string());
        }
        fn discover_services(&self, _: &str, _: Option<&[Uuid]>) {}
        fn discover_characteristics(&self, _: &str, _: Uuid, _: Option<&[Uuid]>) {}
        fn set_notify(&self, _: &str, _: Uuid, _: bool) {}
        fn write_value(&self, _: &str, _: Uuid, _: &[u8], _: bool) {}
        fn read_value(&self, _: &str, _: Uuid) {}
    }

    fn manager() -> (
        DeviceManager,
        Arc<RecordingTransport>,
        mpsc::UnboundedSender<TransportEvent>,
    ) {
        let transport = Arc::new(RecordingTransport::default());
        let (tx, rx) = mpsc::unbounded_channel();
        let manager = DeviceManager::builder().build_with_transport(transport.clone(), rx);
        (manager, transport, tx)
    }

    fn belt_advertisement(identifier: &str) -> TransportEvent {
        TransportEvent::Advertisement(Advertisement {
            identifier: identifier.to_string(),
            name: Some("CL8".to_string()),
            data: AdvertisementData::with_name("CL8"),
            rssi: Some(-45),
        })
    }

    async fn connect_belt(manager: &DeviceManager, tx: &mpsc::UnboundedSender<TransportEvent>) {
        manager.start_pairing(DeviceType::HeartRateBelt).await.unwrap();
        tx.send(belt_advertisement("belt-1")).unwrap();
        manager.connect("belt-1").await.unwrap();
        tx.send(TransportEvent::Connected {
            identifier: "belt-1".to_string(),
            name: Some("CL8".to_string()),
        })
        .unwrap();
        manager.stop_pairing().await.unwrap();
    }

    #[tokio::test]
    async fn test_pairing_through_event_loop() {
        let (manager, transport, tx) = manager();

        manager.start_pairing(DeviceType::HeartRateBelt).await.unwrap();
        assert_eq!(*transport.scans.lock(), vec![DeviceType::HeartRateBelt]);

        tx.send(belt_advertisement("belt-1")).unwrap();
        manager.stop_pairing().await.unwrap();

        let identity = manager
            .paired_identity(DeviceType::HeartRateBelt)
            .unwrap()
            .unwrap();
        assert_eq!(identity.identifier, "belt-1");
        assert_eq!(manager.devices().len(), 1);
        assert_eq!(
            manager.device_data().heart_rate.status.connection,
            crate::ble::ConnectionState::Paired
        );
    }

    #[tokio::test]
    async fn test_errors_are_returned_to_caller() {
        let (manager, _transport, _tx) = manager();
        assert!(matches!(
            manager.start_jump_rope_recording(RecordingMode::Free).await,
            Err(Error::NotConnected { .. })
        ));
        assert!(matches!(
            manager.reconnect(DeviceType::Scale).await,
            Err(Error::NotPaired { .. })
        ));
        assert!(matches!(
            manager.connect("missing").await,
            Err(Error::DeviceNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_commands_after_shutdown() {
        let (manager, _transport, _tx) = manager();
        assert!(manager.is_running());
        manager.shutdown().await.unwrap();
        assert!(!manager.is_running());
        assert!(matches!(
            manager.stop_pairing().await,
            Err(Error::ManagerStopped)
        ));
    }

    #[tokio::test]
    async fn test_shutdown_disconnects_peripherals() {
        let (manager, transport, tx) = manager();
        connect_belt(&manager, &tx).await;
        manager.shutdown().await.unwrap();
        assert_eq!(*transport.cancels.lock(), vec!["belt-1".to_string()]);
    }

    #[tokio::test]
    async fn test_on_event_until_unregistered() {
        let (manager, _transport, tx) = manager();
        let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();
        let handle = manager.on_event(move |event| {
            if let SessionEvent::Device(DeviceEvent::Discovered { device, .. }) = event {
                let _ = seen_tx.send(device.identifier);
            }
        });

        manager.start_pairing(DeviceType::HeartRateBelt).await.unwrap();
        tx.send(belt_advertisement("belt-1")).unwrap();
        assert_eq!(seen_rx.recv().await.as_deref(), Some("belt-1"));

        handle.unregister();
        assert_eq!(seen_rx.recv().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_heart_rate_recording_ticks() {
        let (manager, _transport, tx) = manager();
        connect_belt(&manager, &tx).await;
        assert_eq!(
            manager.device_data().heart_rate.status.connection,
            crate::ble::ConnectionState::Connected
        );

        manager.start_heart_rate_recording().await.unwrap();
        tx.send(TransportEvent::ValueUpdated {
            identifier: "belt-1".to_string(),
            characteristic: HEART_RATE_MEASUREMENT_UUID,
            value: bytes::Bytes::from_static(&[0x00, 88]),
        })
        .unwrap();

        tokio::time::sleep(Duration::from_millis(3500)).await;
        manager.stop_heart_rate_recording().await.unwrap();

        let data = manager.device_data();
        assert_eq!(data.heart_rate.status.measurement, MeasurementState::Completed);
        assert_eq!(data.heart_rate.data.history.len(), 3);
        assert!(data.heart_rate.data.history.values().all(|rate| *rate == 88));
    }
}
