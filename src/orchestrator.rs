//! Device session orchestrator.
//!
//! [`Orchestrator`] owns every piece of session state: the peripheral
//! registry, the discovery filter, the per-device snapshots with their
//! connection and measurement states, the recording sessions and the
//! jump-rope MAC latch. It is driven from a single owner through `&mut self`:
//!
//! - public commands (pairing, connecting, recording)
//! - [`Orchestrator::handle_transport_event`] for radio events
//! - [`Orchestrator::handle_timer`] for timers it scheduled itself
//!
//! Nothing here blocks. Transport requests are fire-and-forget and timers
//! are delegated to the injected [`Scheduler`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use crate::ble::characteristics::{execute, plan_characteristics, plan_services};
use crate::ble::uuids::{service_filter, JUMP_ROPE_WRITE_UUID};
use crate::ble::{
    AdapterState, Advertisement, BleTransport, ConnectionState, DeviceType, TransportEvent,
};
use crate::config::ManagerConfig;
use crate::data::{DeviceData, MeasurementState};
use crate::discovery::{DiscoveryDecision, DiscoveryFilter};
use crate::error::{Error, Result};
use crate::fanout::{DeviceEvent, EventFanout, Observers};
use crate::identity::{IdentityStore, PairedIdentity};
use crate::protocol::{
    DecodedIdentity, DecoderSet, DeviceCallback, DeviceCommand, JumpRopeState, OximeterCallback,
    ScaleCallback, SphygmometerCallback, ThermometerCallback,
};
use crate::recording::{RecordingMode, RecordingSessions};
use crate::registry::{DeviceRegistry, PeripheralEntry};
use crate::scheduler::{Scheduler, TimerEvent};
use crate::utils::{extract_mac_address, JUMP_ROPE_MAC_OFFSET, SCALE_MAC_OFFSET};

/// A connection request waiting for its outcome.
#[derive(Debug, Clone)]
struct PendingConnect {
    attempt: u64,
    identifier: String,
}

/// Single-owner session state machine.
pub struct Orchestrator {
    config: ManagerConfig,
    transport: Arc<dyn BleTransport>,
    scheduler: Arc<dyn Scheduler>,
    identities: Arc<dyn IdentityStore>,
    decoders: DecoderSet,
    fanout: EventFanout,
    registry: DeviceRegistry,
    filter: DiscoveryFilter,
    data: DeviceData,
    adapter_state: AdapterState,
    /// Set while repeated jump-rope MAC advertisements are ignored.
    mac_latch: bool,
    recordings: RecordingSessions,
    pending_connects: HashMap<DeviceType, PendingConnect>,
    next_attempt: u64,
    /// Latest "completed" pulse per device type.
    pulses: HashMap<DeviceType, u64>,
}

impl Orchestrator {
    /// Create an orchestrator with no devices known.
    pub fn new(
        config: ManagerConfig,
        transport: Arc<dyn BleTransport>,
        scheduler: Arc<dyn Scheduler>,
        identities: Arc<dyn IdentityStore>,
        decoders: DecoderSet,
        fanout: EventFanout,
    ) -> Self {
        let filter = DiscoveryFilter::new(config.rssi_threshold);
        Self {
            config,
            transport,
            scheduler,
            identities,
            decoders,
            fanout,
            registry: DeviceRegistry::new(),
            filter,
            data: DeviceData::default(),
            adapter_state: AdapterState::default(),
            mac_latch: false,
            recordings: RecordingSessions::default(),
            pending_connects: HashMap::new(),
            next_attempt: 0,
            pulses: HashMap::new(),
        }
    }

    /// Active configuration.
    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// Snapshot of every device type.
    pub fn data(&self) -> &DeviceData {
        &self.data
    }

    /// Observed peripherals.
    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    /// Discovery filter state.
    pub fn filter(&self) -> &DiscoveryFilter {
        &self.filter
    }

    /// Last reported adapter state.
    pub fn adapter_state(&self) -> AdapterState {
        self.adapter_state
    }

    /// Event fan-out.
    pub fn fanout(&self) -> &EventFanout {
        &self.fanout
    }

    /// Replace the registered observers.
    pub fn set_observers(&mut self, observers: Observers) {
        self.fanout.set_observers(observers);
    }

    /// Connection state of a device type. Non-concrete types are always idle.
    pub fn connection_state(&self, device_type: DeviceType) -> ConnectionState {
        self.data
            .status(device_type)
            .map(|s| s.connection)
            .unwrap_or_default()
    }

    /// Measurement state of a device type.
    pub fn measurement_state(&self, device_type: DeviceType) -> MeasurementState {
        self.data
            .status(device_type)
            .map(|s| s.measurement.clone())
            .unwrap_or_default()
    }

    /// Persisted identity of a device type.
    pub fn paired_identity(&self, device_type: DeviceType) -> Result<Option<PairedIdentity>> {
        self.identities.load(device_type)
    }

    /// Set the minimum signal strength for pairing candidates.
    pub fn set_rssi_threshold(&mut self, threshold: i16) {
        debug!("RSSI threshold set to {} dBm", threshold);
        self.config.rssi_threshold = threshold;
        self.filter.set_rssi_threshold(threshold);
    }

    // ------------------------------------------------------------------
    // Pairing and connection
    // ------------------------------------------------------------------

    /// Forget the stored identity of `device_type` and scan for a new one.
    ///
    /// # Errors
    ///
    /// [`Error::UnsupportedDeviceType`] for `None`/`AllDevices`, or an
    /// identity store error. Nothing changes on error.
    pub fn start_pairing(&mut self, device_type: DeviceType) -> Result<()> {
        require_concrete(device_type)?;
        self.identities.clear(device_type)?;

        for other in DeviceType::CONCRETE {
            if other != device_type && self.connection_state(other) == ConnectionState::Pairing {
                self.set_connection(other, ConnectionState::Idle);
            }
        }
        self.supersede_reconnect(device_type);

        self.data.reset(device_type);
        self.filter.set_target(device_type);
        self.set_connection(device_type, ConnectionState::Pairing);

        info!("Started pairing {}", device_type);
        self.transport.start_scan(device_type);
        Ok(())
    }

    /// Stop scanning and leave pairing for every type. Idempotent.
    pub fn stop_pairing(&mut self) {
        self.transport.stop_scan();
        self.filter.set_target(DeviceType::None);

        for device_type in DeviceType::CONCRETE {
            if self.connection_state(device_type) == ConnectionState::Pairing {
                self.set_connection(device_type, ConnectionState::Idle);
            }
        }
    }

    /// Scan for the persisted peripheral of `device_type` and connect when it
    /// advertises.
    ///
    /// # Errors
    ///
    /// [`Error::NotPaired`] if no identity is stored.
    pub fn reconnect(&mut self, device_type: DeviceType) -> Result<()> {
        require_concrete(device_type)?;
        let identity = self.stored_identity(device_type)?;
        self.begin_reconnect(device_type, identity.identifier);
        Ok(())
    }

    /// Reconnect `device_type`, connecting immediately if its persisted
    /// peripheral is already in the registry.
    ///
    /// # Errors
    ///
    /// [`Error::NotPaired`] if no identity is stored.
    pub fn connect_type(&mut self, device_type: DeviceType) -> Result<()> {
        require_concrete(device_type)?;
        let identity = self.stored_identity(device_type)?;
        self.connect_by_identifier(&identity.identifier, device_type)
    }

    /// Connect to a peripheral by a previously persisted identifier.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidParameter`] for a blank identifier.
    pub fn connect_by_identifier(
        &mut self,
        identifier: &str,
        device_type: DeviceType,
    ) -> Result<()> {
        require_concrete(device_type)?;
        if identifier.trim().is_empty() {
            return Err(Error::InvalidParameter {
                name: "identifier".to_string(),
                value: identifier.to_string(),
            });
        }

        if !self.begin_reconnect(device_type, identifier.to_string()) {
            return Ok(());
        }

        if self.registry.contains(identifier) {
            debug!("{} already seen, connecting directly", identifier);
            self.filter.clear_reconnect_target();
            self.transport.stop_scan();
            self.transport.connect(identifier);
        }
        Ok(())
    }

    /// Connect to a registered peripheral. No-op if already connected.
    ///
    /// # Errors
    ///
    /// [`Error::DeviceNotFound`] if the identifier was never seen.
    pub fn connect(&mut self, identifier: &str) -> Result<()> {
        let entry = self
            .registry
            .get(identifier)
            .cloned()
            .ok_or_else(|| Error::DeviceNotFound {
                identifier: identifier.to_string(),
            })?;

        if entry.is_connected || self.connection_state(entry.device_type).is_connected() {
            debug!("{} already connected", identifier);
            return Ok(());
        }

        self.set_connection(entry.device_type, ConnectionState::Connecting);
        self.arm_connect_timeout(entry.device_type, identifier);
        self.transport.connect(identifier);
        Ok(())
    }

    /// Disconnect the peripheral of `device_type`, or every registered
    /// peripheral for `AllDevices`.
    ///
    /// # Errors
    ///
    /// [`Error::DeviceNotFound`] if no peripheral of the type is registered.
    pub fn disconnect(&mut self, device_type: DeviceType) -> Result<()> {
        if device_type == DeviceType::AllDevices {
            let identifiers: Vec<String> = self
                .registry
                .entries()
                .iter()
                .map(|e| e.identifier.clone())
                .collect();
            for identifier in identifiers {
                self.disconnect_entry(&identifier);
            }
            return Ok(());
        }

        require_concrete(device_type)?;
        let entries = self.registry.entries();
        let identifier = entries
            .iter()
            .find(|e| e.device_type == device_type && e.is_connected)
            .or_else(|| entries.iter().find(|e| e.device_type == device_type))
            .map(|e| e.identifier.clone())
            .ok_or_else(|| Error::DeviceNotFound {
                identifier: device_type.to_string(),
            })?;

        self.disconnect_entry(&identifier);
        Ok(())
    }

    /// Disconnect a registered peripheral.
    ///
    /// # Errors
    ///
    /// [`Error::DeviceNotFound`] if the identifier was never seen.
    pub fn disconnect_identifier(&mut self, identifier: &str) -> Result<()> {
        if !self.registry.contains(identifier) {
            return Err(Error::DeviceNotFound {
                identifier: identifier.to_string(),
            });
        }
        self.disconnect_entry(identifier);
        Ok(())
    }

    fn disconnect_entry(&mut self, identifier: &str) {
        let Some(entry) = self.registry.get(identifier).cloned() else {
            return;
        };
        let device_type = entry.device_type;

        if self
            .filter
            .reconnect_target()
            .map_or(false, |r| r.identifier == identifier)
        {
            self.filter.clear_reconnect_target();
        }
        self.pending_connects.remove(&device_type);

        debug!("Disconnecting {} {}", device_type, identifier);
        self.transport.cancel_connection(identifier);

        // Without a link the transport will not report a disconnection.
        let linked = self
            .registry
            .entries()
            .iter()
            .any(|e| e.device_type == device_type && e.is_connected);
        if !linked
            && matches!(
                self.connection_state(device_type),
                ConnectionState::Connected | ConnectionState::Connecting
            )
        {
            self.mark_disconnected(entry, None);
        }
    }

    fn stored_identity(&self, device_type: DeviceType) -> Result<PairedIdentity> {
        self.identities
            .load(device_type)?
            .ok_or(Error::NotPaired { device_type })
    }

    /// Returns `false` if the type is already connected.
    fn begin_reconnect(&mut self, device_type: DeviceType, identifier: String) -> bool {
        if self.connection_state(device_type).is_connected() {
            debug!("{} already connected", device_type);
            return false;
        }

        self.supersede_reconnect(device_type);
        info!("Reconnecting {} {}", device_type, identifier);

        self.arm_connect_timeout(device_type, &identifier);
        self.filter.set_reconnect_target(identifier, device_type);
        self.filter.set_target(DeviceType::AllDevices);
        self.set_connection(device_type, ConnectionState::Connecting);
        self.transport.start_scan(DeviceType::AllDevices);
        true
    }

    /// Drop a reconnection in progress for another type.
    fn supersede_reconnect(&mut self, device_type: DeviceType) {
        let Some(previous) = self.filter.clear_reconnect_target() else {
            return;
        };
        if previous.device_type != device_type
            && self.connection_state(previous.device_type) == ConnectionState::Connecting
        {
            debug!("Reconnection of {} superseded", previous.device_type);
            self.pending_connects.remove(&previous.device_type);
            self.set_connection(previous.device_type, ConnectionState::Idle);
        }
    }

    fn arm_connect_timeout(&mut self, device_type: DeviceType, identifier: &str) {
        self.next_attempt += 1;
        let attempt = self.next_attempt;
        self.pending_connects.insert(
            device_type,
            PendingConnect {
                attempt,
                identifier: identifier.to_string(),
            },
        );

        if let Some(timeout) = self.config.connect_timeout {
            self.scheduler
                .schedule(timeout, TimerEvent::ConnectTimeout { device_type, attempt });
        }
    }

    fn set_connection(&mut self, device_type: DeviceType, state: ConnectionState) {
        if let Some(status) = self.data.status_mut(device_type) {
            if status.connection != state {
                debug!(
                    "{} connection state changed: {} -> {}",
                    device_type, status.connection, state
                );
                status.connection = state;
            }
        }
    }

    fn set_measurement(&mut self, device_type: DeviceType, state: MeasurementState) {
        if let Some(status) = self.data.status_mut(device_type) {
            status.measurement = state;
        }
    }

    fn device_type_of(&self, identifier: &str) -> Option<DeviceType> {
        self.registry.get(identifier).map(|e| e.device_type)
    }

    fn connected_identifier(&self, device_type: DeviceType) -> Option<String> {
        self.registry
            .entries()
            .iter()
            .find(|e| e.device_type == device_type && e.is_connected)
            .map(|e| e.identifier.clone())
    }

    // ------------------------------------------------------------------
    // Transport events
    // ------------------------------------------------------------------

    /// Process one transport event.
    pub fn handle_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::AdapterStateChanged(state) => {
                info!("Bluetooth adapter: {}", state);
                self.adapter_state = state;
                self.fanout.adapter_state(state);
            }
            TransportEvent::Advertisement(advertisement) => {
                self.handle_advertisement(advertisement)
            }
            TransportEvent::Connected { identifier, name } => {
                self.handle_connected(&identifier, name)
            }
            TransportEvent::ConnectFailed { identifier, reason } => {
                self.handle_connect_failed(&identifier, reason)
            }
            TransportEvent::Disconnected { identifier, reason } => {
                self.handle_disconnected(&identifier, reason)
            }
            TransportEvent::ServicesDiscovered {
                identifier,
                services,
            } => {
                let Some(device_type) = self.device_type_of(&identifier) else {
                    return;
                };
                let plan = plan_services(device_type, &services);
                execute(self.transport.as_ref(), &identifier, &plan);
            }
            TransportEvent::ServiceDiscoveryFailed { identifier, reason } => {
                warn!("Service discovery failed for {}: {}", identifier, reason);
            }
            TransportEvent::CharacteristicsDiscovered {
                identifier,
                service,
                characteristics,
            } => {
                let Some(device_type) = self.device_type_of(&identifier) else {
                    return;
                };
                let decoder = self.decoders.get(device_type).cloned();
                let plan = plan_characteristics(device_type, &characteristics, decoder.as_deref());
                debug!(
                    "{} service {}: {} dispatch actions",
                    device_type,
                    service,
                    plan.len()
                );
                execute(self.transport.as_ref(), &identifier, &plan);
            }
            TransportEvent::CharacteristicDiscoveryFailed {
                identifier,
                service,
                reason,
            } => {
                warn!(
                    "Characteristic discovery failed for {} service {}: {}",
                    identifier, service, reason
                );
            }
            TransportEvent::ValueUpdated {
                identifier,
                characteristic,
                value,
            } => self.handle_value(&identifier, characteristic, &value),
        }
    }

    fn handle_advertisement(&mut self, advertisement: Advertisement) {
        match self.filter.evaluate(&advertisement) {
            DiscoveryDecision::Ignore(reason) => {
                trace!("Ignoring {}: {:?}", advertisement.identifier, reason);
            }
            DiscoveryDecision::Reconnect(device_type) => {
                self.handle_reconnect_match(device_type, advertisement)
            }
            DiscoveryDecision::Candidate(device_type) => {
                self.handle_candidate(device_type, advertisement)
            }
        }
    }

    /// Add an accepted peripheral to the registry. Returns `true` if it is new.
    fn register(&mut self, device_type: DeviceType, advertisement: &Advertisement) -> bool {
        let entry = PeripheralEntry::new(
            advertisement.identifier.clone(),
            device_type,
            advertisement.name.clone().unwrap_or_default(),
        )
        .with_rssi(advertisement.rssi);

        if self.registry.add_unique(entry) {
            debug!(
                "Registered {} {} ({:?} dBm)",
                device_type, advertisement.identifier, advertisement.rssi
            );
            true
        } else {
            self.registry
                .update(&advertisement.identifier, |e| e.rssi = advertisement.rssi);
            false
        }
    }

    fn handle_reconnect_match(&mut self, device_type: DeviceType, advertisement: Advertisement) {
        self.register(device_type, &advertisement);

        if device_type == DeviceType::Scale {
            self.apply_scale_advertisement(&advertisement);
            return;
        }

        info!("Found {} {}, connecting", device_type, advertisement.identifier);
        self.filter.clear_reconnect_target();
        self.transport.stop_scan();
        self.transport.connect(&advertisement.identifier);
    }

    /// Scales broadcast their weight; a known scale counts as connected
    /// as soon as it advertises.
    fn apply_scale_advertisement(&mut self, advertisement: &Advertisement) {
        if !self.connection_state(DeviceType::Scale).is_connected() {
            info!("Scale {} is broadcasting", advertisement.identifier);
            self.pending_connects.remove(&DeviceType::Scale);
            self.set_connection(DeviceType::Scale, ConnectionState::Connected);
            self.data.scale.data.peripheral_name = advertisement.name.clone();
            if let Some(device) = self.registry.get(&advertisement.identifier).cloned() {
                self.fanout.device_event(DeviceEvent::Connected {
                    device_type: DeviceType::Scale,
                    device,
                });
            }
        }

        let callback = self
            .decoders
            .get(DeviceType::Scale)
            .and_then(|decoder| decoder.parse_advertisement(&advertisement.data));
        if let Some(callback) = callback {
            self.dispatch_callback(callback);
        }
    }

    fn handle_candidate(&mut self, device_type: DeviceType, advertisement: Advertisement) {
        let added = self.register(device_type, &advertisement);

        if device_type == DeviceType::JumpRope {
            self.handle_jump_rope_candidate(advertisement);
            return;
        }

        if added {
            self.emit_discovered(device_type, &advertisement.identifier);
        }

        if self.connection_state(device_type) != ConnectionState::Pairing {
            return;
        }

        let Some(identity) = self.extract_identity(device_type, &advertisement) else {
            debug!(
                "Rejected {} candidate {}: no identity",
                device_type, advertisement.identifier
            );
            return;
        };

        self.complete_pairing(device_type, &identity);

        if device_type == DeviceType::Scale {
            // Later advertisements carry the weight; keep listening.
            self.data.scale.data.peripheral_name = identity.name.clone();
            self.filter
                .set_reconnect_target(identity.identifier, DeviceType::Scale);
        } else {
            self.stop_pairing();
        }
    }

    fn handle_jump_rope_candidate(&mut self, advertisement: Advertisement) {
        let identity = if self.connection_state(DeviceType::JumpRope) == ConnectionState::Pairing {
            self.extract_identity(DeviceType::JumpRope, &advertisement)
        } else {
            None
        };

        if let Some(identity) = &identity {
            self.complete_pairing(DeviceType::JumpRope, identity);
            self.stop_pairing();
        }

        if self.mac_latch {
            trace!("MAC latch held, skipping {}", advertisement.identifier);
            return;
        }

        let mac = identity
            .and_then(|i| i.mac_address)
            .or_else(|| advertised_mac(DeviceType::JumpRope, &advertisement));
        let Some(mac) = mac else {
            trace!("Jump rope {} advertised no MAC", advertisement.identifier);
            return;
        };

        self.mac_latch = true;
        self.scheduler
            .schedule(self.config.mac_latch_window, TimerEvent::ReleaseMacLatch);

        self.registry.update(&advertisement.identifier, |e| {
            e.mac_address = Some(mac.clone());
        });
        let model = &mut self.data.jump_rope.data;
        model.peripheral_name = advertisement.name.clone();
        model.mac_address = Some(mac);

        self.emit_discovered(DeviceType::JumpRope, &advertisement.identifier);
    }

    fn extract_identity(
        &self,
        device_type: DeviceType,
        advertisement: &Advertisement,
    ) -> Option<PairedIdentity> {
        let Some(decoder) = self.decoders.get(device_type) else {
            debug!("No decoder registered for {}", device_type);
            return None;
        };

        let DecodedIdentity {
            identifier: reported,
            name,
            mac_address,
        } = decoder
            .extract_identity(&advertisement.identifier, &advertisement.data)
            .filter(DecodedIdentity::is_valid)?;
        trace!("{} {} reports id {}", device_type, advertisement.identifier, reported);

        // Reconnection matches on the transport identifier.
        Some(PairedIdentity {
            identifier: advertisement.identifier.clone(),
            name: name.or_else(|| advertisement.name.clone()),
            mac_address: mac_address.or_else(|| advertised_mac(device_type, advertisement)),
        })
    }

    fn complete_pairing(&mut self, device_type: DeviceType, identity: &PairedIdentity) {
        if let Err(e) = self.identities.save(device_type, identity) {
            error!("Failed to persist {} identity: {}", device_type, e);
        }
        if let Some(mac) = &identity.mac_address {
            self.registry.update(&identity.identifier, |e| {
                e.mac_address = Some(mac.clone());
            });
        }

        info!("Paired {} {}", device_type, identity.identifier);
        self.set_connection(device_type, ConnectionState::Paired);
    }

    fn emit_discovered(&self, device_type: DeviceType, identifier: &str) {
        if let Some(device) = self.registry.get(identifier).cloned() {
            self.fanout
                .device_event(DeviceEvent::Discovered { device_type, device });
        }
    }

    fn handle_connected(&mut self, identifier: &str, name: Option<String>) {
        let Some(device_type) = self.device_type_of(identifier) else {
            warn!("Connected to unregistered peripheral {}", identifier);
            return;
        };

        if self
            .filter
            .reconnect_target()
            .map_or(false, |r| r.identifier == identifier || r.device_type == device_type)
        {
            self.filter.clear_reconnect_target();
        }
        self.pending_connects.remove(&device_type);

        if device_type.is_recordable() {
            self.recordings.end(device_type);
        }
        self.data.reset_data(device_type);
        self.set_measurement(device_type, MeasurementState::Idle);
        self.set_connection(device_type, ConnectionState::Connected);

        self.registry.update(identifier, |e| {
            e.is_connected = true;
            if let Some(name) = name {
                e.name = name;
            }
        });
        let Some(device) = self.registry.get(identifier).cloned() else {
            return;
        };
        self.restore_peripheral_details(&device);

        if let Some(decoder) = self.decoders.get(device_type) {
            decoder.attach(identifier);
        }

        info!("Connected to {} {}", device_type, identifier);
        self.transport
            .discover_services(identifier, service_filter(device_type));
        self.fanout
            .device_event(DeviceEvent::Connected { device_type, device });
    }

    fn restore_peripheral_details(&mut self, entry: &PeripheralEntry) {
        let name = Some(entry.name.clone()).filter(|n| !n.is_empty());
        match entry.device_type {
            DeviceType::Scale => self.data.scale.data.peripheral_name = name,
            DeviceType::JumpRope => {
                self.data.jump_rope.data.peripheral_name = name;
                self.data.jump_rope.data.mac_address = entry.mac_address.clone();
            }
            DeviceType::HeartRateBelt => self.data.heart_rate.data.peripheral_name = name,
            _ => {}
        }
    }

    fn handle_connect_failed(&mut self, identifier: &str, reason: String) {
        let Some(device) = self.registry.get(identifier).cloned() else {
            warn!("Connect failed for unregistered peripheral {}", identifier);
            return;
        };
        let device_type = device.device_type;

        warn!("Failed to connect to {} {}: {}", device_type, identifier, reason);
        self.pending_connects.remove(&device_type);
        self.set_connection(device_type, ConnectionState::ConnectionFailed);
        self.fanout.device_event(DeviceEvent::ConnectionFailed {
            device_type,
            device,
            reason,
        });
    }

    fn handle_disconnected(&mut self, identifier: &str, reason: Option<String>) {
        let Some(entry) = self.registry.get(identifier).cloned() else {
            warn!("Disconnected from unregistered peripheral {}", identifier);
            return;
        };

        match &reason {
            Some(reason) => warn!("{} {} disconnected: {}", entry.device_type, identifier, reason),
            None => info!("{} {} disconnected", entry.device_type, identifier),
        }
        self.mark_disconnected(entry, reason);
    }

    fn mark_disconnected(&mut self, entry: PeripheralEntry, reason: Option<String>) {
        let device_type = entry.device_type;
        self.registry
            .update(&entry.identifier, |e| e.is_connected = false);
        self.pending_connects.remove(&device_type);
        self.set_connection(device_type, ConnectionState::Disconnected);

        if device_type.is_recordable() && self.measurement_state(device_type).is_measuring() {
            self.end_recording(device_type);
        }

        let device = self
            .registry
            .get(&entry.identifier)
            .cloned()
            .unwrap_or(entry);
        self.fanout.device_event(DeviceEvent::Disconnected {
            device_type,
            device,
            reason,
        });
    }

    fn handle_value(&mut self, identifier: &str, characteristic: Uuid, value: &[u8]) {
        let Some(device_type) = self.device_type_of(identifier) else {
            trace!("Value from unregistered peripheral {}", identifier);
            return;
        };
        let Some(decoder) = self.decoders.get(device_type).cloned() else {
            trace!("No decoder for {}, dropping value", device_type);
            return;
        };
        if !decoder.is_mine(identifier) {
            trace!("{} is not the attached {}", identifier, device_type);
            return;
        }

        match decoder.parse(characteristic, value) {
            Ok(Some(callback)) => self.dispatch_callback(callback),
            Ok(None) => trace!("No reading in {} frame on {}", device_type, characteristic),
            Err(e) => {
                warn!("Failed to decode {} value on {}: {}", device_type, characteristic, e);
                let message = e.to_string();
                self.set_measurement(
                    device_type,
                    MeasurementState::Error {
                        code: -1,
                        message: message.clone(),
                    },
                );
                self.fanout.decode_failed(device_type, message);
            }
        }
    }

    /// Fold a reading into the snapshot, then publish it.
    fn dispatch_callback(&mut self, callback: DeviceCallback) {
        let mut session_ended = false;

        match &callback {
            DeviceCallback::Thermometer(reading) => {
                self.data.thermometer.data.apply(reading);
                match reading {
                    ThermometerCallback::Temperature { .. } => {
                        self.set_measurement(DeviceType::Thermometer, MeasurementState::Completed);
                        self.schedule_pulse(
                            DeviceType::Thermometer,
                            self.config.thermometer_completed_pulse,
                        );
                    }
                    ThermometerCallback::Error { code, description } => {
                        self.set_measurement(
                            DeviceType::Thermometer,
                            MeasurementState::Error {
                                code: *code,
                                message: description.clone(),
                            },
                        );
                    }
                    ThermometerCallback::Battery { .. } => {}
                }
            }
            DeviceCallback::Oximeter(reading) => {
                self.data.oximeter.data.apply(reading);
                if matches!(reading, OximeterCallback::Measurement { .. }) {
                    self.set_measurement(DeviceType::Oximeter, MeasurementState::Measuring);
                }
            }
            DeviceCallback::Sphygmometer(reading) => {
                self.data.sphygmometer.data.apply(reading);
                match reading {
                    SphygmometerCallback::InstantData { .. } => {
                        self.set_measurement(DeviceType::Sphygmometer, MeasurementState::Measuring);
                        self.schedule_pulse(
                            DeviceType::Sphygmometer,
                            self.config.sphygmometer_completed_pulse,
                        );
                    }
                    SphygmometerCallback::FinalData { .. } => {
                        // The result stays until the next reading.
                        self.expire_pulse(DeviceType::Sphygmometer);
                        self.set_measurement(DeviceType::Sphygmometer, MeasurementState::Completed);
                    }
                }
            }
            DeviceCallback::Scale(reading) => {
                self.data.scale.data.apply(reading);
                let ScaleCallback::Weight { is_final, .. } = *reading;
                let state = if is_final {
                    MeasurementState::Completed
                } else {
                    MeasurementState::Measuring
                };
                self.set_measurement(DeviceType::Scale, state);
            }
            DeviceCallback::JumpRope(status) => {
                let measuring = self.data.jump_rope.status.measurement.is_measuring();
                self.data.jump_rope.data.apply(status, measuring);
                session_ended = measuring && status.state() == JumpRopeState::Ended;
            }
            DeviceCallback::HeartRate(reading) => {
                self.data.heart_rate.data.apply(reading);
            }
        }

        self.fanout.callback(callback);

        if session_ended {
            info!("Jump rope session ended on the device");
            self.end_recording(DeviceType::JumpRope);
        }
    }

    // ------------------------------------------------------------------
    // Recording
    // ------------------------------------------------------------------

    /// Start a jump-rope recording in `mode`.
    ///
    /// The mode command is sent now and once more when the settle delay
    /// elapses; sampling starts after the settle delay.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidTime`] / [`Error::InvalidCount`] for negative parameters
    /// - [`Error::NotConnected`] without a connected jump rope
    /// - [`Error::NotSupported`] if the decoder cannot encode the command
    ///
    /// Nothing changes on error.
    pub fn start_jump_rope_recording(&mut self, mode: RecordingMode) -> Result<()> {
        mode.validate()?;
        let identifier = self
            .connected_identifier(DeviceType::JumpRope)
            .ok_or(Error::NotConnected {
                device_type: DeviceType::JumpRope,
            })?;
        let payload = self.encode(DeviceType::JumpRope, &mode.command())?;

        let model = &mut self.data.jump_rope.data;
        model.history.clear();
        model.count = Some(0);
        self.set_measurement(DeviceType::JumpRope, MeasurementState::Idle);

        let session = self.recordings.begin(DeviceType::JumpRope);
        self.transport
            .write_value(&identifier, JUMP_ROPE_WRITE_UUID, &payload, false);
        self.recordings.set_mode_payload(payload);
        self.scheduler.schedule(
            self.config.recording_settle_delay,
            TimerEvent::RecordingSettle {
                device_type: DeviceType::JumpRope,
                session,
            },
        );

        info!("Starting jump rope recording in {} mode", mode);
        Ok(())
    }

    /// Stop the jump-rope recording. Also stops a heart-rate recording in
    /// progress.
    ///
    /// # Errors
    ///
    /// [`Error::NotConnected`] if no jump rope is connected and nothing is
    /// being recorded.
    pub fn stop_jump_rope_recording(&mut self) -> Result<()> {
        if self.connected_identifier(DeviceType::JumpRope).is_none()
            && !self.measurement_state(DeviceType::JumpRope).is_measuring()
        {
            return Err(Error::NotConnected {
                device_type: DeviceType::JumpRope,
            });
        }
        self.end_recording(DeviceType::JumpRope);
        Ok(())
    }

    /// Start recording heart rate once per sample interval.
    ///
    /// # Errors
    ///
    /// [`Error::NotConnected`] without a connected heart-rate belt.
    pub fn start_heart_rate_recording(&mut self) -> Result<()> {
        if self.connected_identifier(DeviceType::HeartRateBelt).is_none() {
            return Err(Error::NotConnected {
                device_type: DeviceType::HeartRateBelt,
            });
        }

        self.data.heart_rate.data.history.clear();
        let session = self.recordings.begin(DeviceType::HeartRateBelt);
        self.set_measurement(DeviceType::HeartRateBelt, MeasurementState::Measuring);
        self.scheduler.schedule(
            self.config.sample_interval,
            TimerEvent::SampleTick {
                device_type: DeviceType::HeartRateBelt,
                session,
            },
        );

        info!("Starting heart rate recording");
        Ok(())
    }

    /// Stop the heart-rate recording.
    ///
    /// # Errors
    ///
    /// [`Error::NotConnected`] if no belt is connected and nothing is being
    /// recorded.
    pub fn stop_heart_rate_recording(&mut self) -> Result<()> {
        if self.connected_identifier(DeviceType::HeartRateBelt).is_none()
            && !self.measurement_state(DeviceType::HeartRateBelt).is_measuring()
        {
            return Err(Error::NotConnected {
                device_type: DeviceType::HeartRateBelt,
            });
        }
        self.end_recording(DeviceType::HeartRateBelt);
        Ok(())
    }

    fn end_recording(&mut self, device_type: DeviceType) {
        match device_type {
            DeviceType::JumpRope => {
                self.recordings.end(DeviceType::JumpRope);
                if let Some(identifier) = self.connected_identifier(DeviceType::JumpRope) {
                    match self.encode(DeviceType::JumpRope, &DeviceCommand::StopMode) {
                        Ok(payload) => {
                            self.transport
                                .write_value(&identifier, JUMP_ROPE_WRITE_UUID, &payload, false)
                        }
                        Err(e) => debug!("Not sending stop command: {}", e),
                    }
                }
                self.set_measurement(DeviceType::JumpRope, MeasurementState::Completed);
                info!(
                    "Stopped jump rope recording after {} samples",
                    self.data.jump_rope.data.history.len()
                );

                if self.measurement_state(DeviceType::HeartRateBelt).is_measuring() {
                    self.end_recording(DeviceType::HeartRateBelt);
                }
            }
            DeviceType::HeartRateBelt => {
                self.recordings.end(DeviceType::HeartRateBelt);
                self.set_measurement(DeviceType::HeartRateBelt, MeasurementState::Completed);
                info!(
                    "Stopped heart rate recording after {} samples",
                    self.data.heart_rate.data.history.len()
                );
            }
            _ => {}
        }
    }

    fn encode(&self, device_type: DeviceType, command: &DeviceCommand) -> Result<Vec<u8>> {
        self.decoders
            .get(device_type)
            .and_then(|decoder| decoder.encode_command(command))
            .ok_or_else(|| Error::NotSupported {
                operation: format!("{:?} on {}", command, device_type),
            })
    }

    // ------------------------------------------------------------------
    // Timers
    // ------------------------------------------------------------------

    fn expire_pulse(&mut self, device_type: DeviceType) -> u64 {
        let pulse = self.pulses.entry(device_type).or_default();
        *pulse += 1;
        *pulse
    }

    fn schedule_pulse(&mut self, device_type: DeviceType, delay: Duration) {
        let pulse = self.expire_pulse(device_type);
        self.scheduler
            .schedule(delay, TimerEvent::ClearCompleted { device_type, pulse });
    }

    /// Process a timer this orchestrator scheduled.
    pub fn handle_timer(&mut self, event: TimerEvent) {
        match event {
            TimerEvent::ClearCompleted { device_type, pulse } => {
                if self.pulses.get(&device_type) != Some(&pulse) {
                    trace!("Dropping stale {} pulse {}", device_type, pulse);
                } else if self.measurement_state(device_type).is_completed() {
                    self.set_measurement(device_type, MeasurementState::Idle);
                }
            }
            TimerEvent::ReleaseMacLatch => {
                trace!("MAC latch released");
                self.mac_latch = false;
            }
            TimerEvent::RecordingSettle {
                device_type,
                session,
            } => self.settle_recording(device_type, session),
            TimerEvent::SampleTick {
                device_type,
                session,
            } => self.take_sample(device_type, session),
            TimerEvent::ConnectTimeout {
                device_type,
                attempt,
            } => self.connect_timed_out(device_type, attempt),
        }
    }

    fn settle_recording(&mut self, device_type: DeviceType, session: u64) {
        if !self.recordings.is_current(device_type, session) {
            trace!("Stale settle timer for {}", device_type);
            return;
        }

        if let (Some(identifier), Some(payload)) = (
            self.connected_identifier(device_type),
            self.recordings.mode_payload().map(<[u8]>::to_vec),
        ) {
            self.transport
                .write_value(&identifier, JUMP_ROPE_WRITE_UUID, &payload, false);
        }

        self.set_measurement(device_type, MeasurementState::Measuring);
        self.scheduler.schedule(
            self.config.sample_interval,
            TimerEvent::SampleTick {
                device_type,
                session,
            },
        );
    }

    fn take_sample(&mut self, device_type: DeviceType, session: u64) {
        if !self.recordings.is_current(device_type, session)
            || !self.measurement_state(device_type).is_measuring()
        {
            return;
        }

        let now = self.scheduler.now();
        match device_type {
            DeviceType::JumpRope => {
                let model = &mut self.data.jump_rope.data;
                if let Some(count) = model.count {
                    model.history.push(now, count);
                }
            }
            DeviceType::HeartRateBelt => {
                let model = &mut self.data.heart_rate.data;
                if let Some(rate) = model.heart_rate {
                    model.history.push(now, rate);
                }
            }
            _ => return,
        }

        self.scheduler.schedule(
            self.config.sample_interval,
            TimerEvent::SampleTick {
                device_type,
                session,
            },
        );
    }

    fn connect_timed_out(&mut self, device_type: DeviceType, attempt: u64) {
        let Some(pending) = self
            .pending_connects
            .get(&device_type)
            .filter(|p| p.attempt == attempt)
            .cloned()
        else {
            return;
        };
        self.pending_connects.remove(&device_type);
        if self.connection_state(device_type) != ConnectionState::Connecting {
            return;
        }

        warn!("Connection to {} {} timed out", device_type, pending.identifier);
        if self
            .filter
            .reconnect_target()
            .map_or(false, |r| r.identifier == pending.identifier)
        {
            self.filter.clear_reconnect_target();
            self.transport.stop_scan();
        }
        if self.registry.contains(&pending.identifier) {
            self.transport.cancel_connection(&pending.identifier);
        }

        self.set_connection(device_type, ConnectionState::ConnectionFailed);
        let device = self
            .registry
            .get(&pending.identifier)
            .cloned()
            .unwrap_or_else(|| PeripheralEntry::new(pending.identifier.clone(), device_type, ""));
        self.fanout.device_event(DeviceEvent::ConnectionFailed {
            device_type,
            device,
            reason: "connection timed out".to_string(),
        });
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("adapter_state", &self.adapter_state)
            .field("filter", &self.filter)
            .field("devices", &self.registry.len())
            .field("decoders", &self.decoders)
            .finish()
    }
}

fn require_concrete(device_type: DeviceType) -> Result<()> {
    if device_type.is_concrete() {
        Ok(())
    } else {
        Err(Error::UnsupportedDeviceType { device_type })
    }
}

/// MAC address carried in the manufacturer data, for types that advertise one.
fn advertised_mac(device_type: DeviceType, advertisement: &Advertisement) -> Option<String> {
    let offset = match device_type {
        DeviceType::Scale => SCALE_MAC_OFFSET,
        DeviceType::JumpRope => JUMP_ROPE_MAC_OFFSET,
        _ => return None,
    };
    advertisement
        .data
        .first_manufacturer_data()
        .and_then(|data| extract_mac_address(data, offset))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::{AdvertisementData, DiscoveredCharacteristic, HEART_RATE_MEASUREMENT_UUID};
    use crate::fanout::SessionEvent;
    use crate::identity::{MemoryIdentityStore, MockIdentityStore};
    use crate::protocol::{HeartRateCallback, JumpRopeMode, JumpRopeStatus, ProtocolDecoder};
    use crate::scheduler::VirtualScheduler;
    use chrono::{TimeZone, Utc};
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;
    use std::time::Duration;
    use tokio::sync::broadcast;

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        StartScan(DeviceType),
        StopScan,
        Connect(String),
        Cancel(String),
        DiscoverServices(String),
        Write(Uuid, Vec<u8>),
    }

    #[derive(Default)]
    struct FakeTransport {
        calls: Mutex<Vec<Call>>,
    }

    impl FakeTransport {
        fn take(&self) -> Vec<Call> {
            std::mem::take(&mut *self.calls.lock())
        }
    }

    impl BleTransport for FakeTransport {
        fn start_scan(&self, target: DeviceType) {
            self.calls.lock().push(Call::StartScan(target));
        }
        fn stop_scan(&self) {
            self.calls.lock().push(Call::StopScan);
        }
        fn connect(&self, identifier: &str) {
            self.calls.lock().push(Call::Connect(identifier.to_string()));
        }
        fn cancel_connection(&self, identifier: &str) {
            self.calls.lock().push(Call::Cancel(identifier.to_string()));
        }
        fn discover_services(&self, identifier: &str, _services: Option<&[Uuid]>) {
            self.calls
                .lock()
                .push(Call::DiscoverServices(identifier.to_string()));
        }
        fn discover_characteristics(&self, _: &str, _: Uuid, _: Option<&[Uuid]>) {}
        fn set_notify(&self, _: &str, _: Uuid, _: bool) {}
        fn write_value(&self, _: &str, characteristic: Uuid, value: &[u8], _: bool) {
            self.calls
                .lock()
                .push(Call::Write(characteristic, value.to_vec()));
        }
        fn read_value(&self, _: &str, _: Uuid) {}
    }

    /// Decoder with a trivial frame format: first byte is the reading.
    struct StubDecoder {
        device_type: DeviceType,
        attached: Mutex<Option<String>>,
    }

    impl StubDecoder {
        fn new(device_type: DeviceType) -> Self {
            Self {
                device_type,
                attached: Mutex::new(None),
            }
        }
    }

    impl ProtocolDecoder for StubDecoder {
        fn extract_identity(
            &self,
            identifier: &str,
            advertisement: &AdvertisementData,
        ) -> Option<DecodedIdentity> {
            let name = advertisement.local_name.clone()?;
            let identifier = if name.ends_with("-x") {
                ""
            } else if name.ends_with("-id") {
                "AA:BB:CC"
            } else {
                identifier
            };
            Some(DecodedIdentity {
                identifier: identifier.to_string(),
                name: Some(name),
                mac_address: None,
            })
        }

        fn parse(&self, _characteristic: Uuid, data: &[u8]) -> Result<Option<DeviceCallback>> {
            let first = *data.first().ok_or_else(|| Error::InvalidData {
                context: "empty frame".to_string(),
            })?;
            Ok(Some(match self.device_type {
                DeviceType::Thermometer => {
                    DeviceCallback::Thermometer(ThermometerCallback::Temperature {
                        temperature: f64::from(first),
                        mode: 1,
                        mode_description: "Body".to_string(),
                    })
                }
                DeviceType::JumpRope => DeviceCallback::JumpRope(JumpRopeStatus {
                    mode: 3,
                    status: data.get(1).copied().unwrap_or(1),
                    count: u32::from(first),
                    ..Default::default()
                }),
                DeviceType::HeartRateBelt => {
                    DeviceCallback::HeartRate(HeartRateCallback::HeartRate(u16::from(first)))
                }
                DeviceType::Sphygmometer if first == 0 => {
                    DeviceCallback::Sphygmometer(SphygmometerCallback::FinalData {
                        systolic: 120,
                        diastolic: 80,
                        pulse: 70,
                        irregular_pulse: 0,
                    })
                }
                DeviceType::Sphygmometer => {
                    DeviceCallback::Sphygmometer(SphygmometerCallback::InstantData {
                        pressure: u16::from(first),
                        pulse_status: 0,
                    })
                }
                _ => return Ok(None),
            }))
        }

        fn is_mine(&self, identifier: &str) -> bool {
            self.attached.lock().as_deref() == Some(identifier)
        }

        fn attach(&self, identifier: &str) {
            *self.attached.lock() = Some(identifier.to_string());
        }

        fn parse_advertisement(&self, advertisement: &AdvertisementData) -> Option<DeviceCallback> {
            let weight = advertisement.first_manufacturer_data()?.first().copied()?;
            Some(DeviceCallback::Scale(ScaleCallback::Weight {
                weight: f64::from(weight),
                is_final: false,
            }))
        }

        fn encode_command(&self, command: &DeviceCommand) -> Option<Vec<u8>> {
            Some(match *command {
                DeviceCommand::QueryBattery => vec![0xB0],
                DeviceCommand::SetJumpRopeMode { mode, setting } => {
                    vec![0xA0, mode.command_code(), setting as u8]
                }
                DeviceCommand::StopMode => vec![0xA1],
            })
        }
    }

    struct Harness {
        orchestrator: Orchestrator,
        transport: Arc<FakeTransport>,
        scheduler: Arc<VirtualScheduler>,
        events: broadcast::Receiver<SessionEvent>,
    }

    impl Harness {
        fn new() -> Self {
            Self::with(ManagerConfig::default(), Arc::new(MemoryIdentityStore::new()))
        }

        fn with(config: ManagerConfig, identities: Arc<dyn IdentityStore>) -> Self {
            let transport = Arc::new(FakeTransport::default());
            let scheduler = Arc::new(VirtualScheduler::new(
                Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            ));
            let mut decoders = DecoderSet::new();
            for device_type in DeviceType::CONCRETE {
                decoders.insert(device_type, Arc::new(StubDecoder::new(device_type)));
            }
            let fanout = EventFanout::new(256);
            let events = fanout.subscribe();
            let orchestrator = Orchestrator::new(
                config,
                transport.clone(),
                scheduler.clone(),
                identities,
                decoders,
                fanout,
            );
            Self {
                orchestrator,
                transport,
                scheduler,
                events,
            }
        }

        fn advertise(&mut self, identifier: &str, name: &str, rssi: i16) {
            self.advertise_with(identifier, AdvertisementData::with_name(name), rssi);
        }

        fn advertise_with(&mut self, identifier: &str, data: AdvertisementData, rssi: i16) {
            let advertisement = Advertisement {
                identifier: identifier.to_string(),
                name: data.local_name.clone(),
                data,
                rssi: Some(rssi),
            };
            self.orchestrator
                .handle_transport_event(TransportEvent::Advertisement(advertisement));
        }

        fn connected(&mut self, identifier: &str) {
            self.orchestrator.handle_transport_event(TransportEvent::Connected {
                identifier: identifier.to_string(),
                name: None,
            });
        }

        fn value(&mut self, identifier: &str, value: &[u8]) {
            self.orchestrator.handle_transport_event(TransportEvent::ValueUpdated {
                identifier: identifier.to_string(),
                characteristic: HEART_RATE_MEASUREMENT_UUID,
                value: bytes::Bytes::copy_from_slice(value),
            });
        }

        fn advance(&mut self, by: Duration) {
            let orchestrator = &mut self.orchestrator;
            self.scheduler
                .advance(by, |event| orchestrator.handle_timer(event));
        }

        fn device_events(&mut self) -> Vec<DeviceEvent> {
            let mut events = Vec::new();
            while let Ok(event) = self.events.try_recv() {
                if let SessionEvent::Device(event) = event {
                    events.push(event);
                }
            }
            events
        }

        /// Pair and connect a device of `device_type` as `identifier`.
        fn pair_and_connect(&mut self, device_type: DeviceType, identifier: &str, name: &str) {
            self.orchestrator.start_pairing(device_type).unwrap();
            let data = if device_type == DeviceType::JumpRope {
                jump_rope_advertisement(0x66)
            } else {
                AdvertisementData::with_name(name)
            };
            self.advertise_with(identifier, data, -40);
            self.orchestrator.connect(identifier).unwrap();
            self.connected(identifier);
            self.transport.take();
            self.device_events();
        }
    }

    fn jump_rope_advertisement(mac_tail: u8) -> AdvertisementData {
        AdvertisementData::with_name("QN-Rope").with_manufacturer_data(
            0x0001,
            vec![0, 0, 0, 0, mac_tail, 0x55, 0x44, 0x33, 0x22, 0x11],
        )
    }

    #[test]
    fn test_pairing_valid_identity() {
        let mut h = Harness::new();
        h.orchestrator.start_pairing(DeviceType::Oximeter).unwrap();
        assert_eq!(h.transport.take(), vec![Call::StartScan(DeviceType::Oximeter)]);

        h.advertise("oxi-1", "AOJ-70B", -50);

        assert_eq!(
            h.orchestrator.connection_state(DeviceType::Oximeter),
            ConnectionState::Paired
        );
        let identity = h.orchestrator.paired_identity(DeviceType::Oximeter).unwrap().unwrap();
        assert_eq!(identity.identifier, "oxi-1");
        assert_eq!(identity.name.as_deref(), Some("AOJ-70B"));
        assert_eq!(h.transport.take(), vec![Call::StopScan]);
        assert!(matches!(
            h.device_events().as_slice(),
            [DeviceEvent::Discovered { device_type: DeviceType::Oximeter, .. }]
        ));
    }

    #[test]
    fn test_pairing_invalid_identity_stays_pairing() {
        let mut h = Harness::new();
        h.orchestrator.start_pairing(DeviceType::Oximeter).unwrap();
        h.advertise("oxi-1", "AOJ-70B-x", -50);

        assert_eq!(
            h.orchestrator.connection_state(DeviceType::Oximeter),
            ConnectionState::Pairing
        );
        assert_eq!(h.orchestrator.paired_identity(DeviceType::Oximeter).unwrap(), None);
    }

    #[test]
    fn test_pairing_ignores_other_types_and_weak_signal() {
        let mut h = Harness::new();
        h.orchestrator.start_pairing(DeviceType::Oximeter).unwrap();
        h.advertise("therm-1", "AOJ-20A", -30);
        h.advertise("oxi-1", "AOJ-70B", -90);

        assert!(h.orchestrator.registry().is_empty());
        assert_eq!(
            h.orchestrator.connection_state(DeviceType::Oximeter),
            ConnectionState::Pairing
        );
    }

    #[test]
    fn test_start_pairing_store_failure_changes_nothing() {
        let mut store = MockIdentityStore::new();
        store.expect_clear().returning(|_| {
            Err(Error::Storage(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "read-only",
            )))
        });
        let mut h = Harness::with(ManagerConfig::default(), Arc::new(store));

        assert!(h.orchestrator.start_pairing(DeviceType::Scale).is_err());
        assert_eq!(
            h.orchestrator.connection_state(DeviceType::Scale),
            ConnectionState::Idle
        );
        assert!(h.transport.take().is_empty());
    }

    #[test]
    fn test_start_pairing_rejects_wildcards() {
        let mut h = Harness::new();
        assert!(matches!(
            h.orchestrator.start_pairing(DeviceType::AllDevices),
            Err(Error::UnsupportedDeviceType { .. })
        ));
    }

    #[test]
    fn test_stop_pairing_is_idempotent() {
        let mut h = Harness::new();
        h.orchestrator.start_pairing(DeviceType::Thermometer).unwrap();
        h.orchestrator.stop_pairing();
        h.orchestrator.stop_pairing();
        assert_eq!(
            h.orchestrator.connection_state(DeviceType::Thermometer),
            ConnectionState::Idle
        );
        assert_eq!(h.orchestrator.filter().target(), DeviceType::None);
    }

    #[test]
    fn test_reconnect_requires_identity() {
        let mut h = Harness::new();
        assert!(matches!(
            h.orchestrator.reconnect(DeviceType::Oximeter),
            Err(Error::NotPaired {
                device_type: DeviceType::Oximeter
            })
        ));
        assert!(h.transport.take().is_empty());
    }

    #[test]
    fn test_reconnect_matches_exact_identifier() {
        let mut h = Harness::new();
        h.orchestrator.start_pairing(DeviceType::Oximeter).unwrap();
        h.advertise("oxi-1", "AOJ-70B", -50);
        h.transport.take();

        h.orchestrator.reconnect(DeviceType::Oximeter).unwrap();
        assert_eq!(
            h.orchestrator.connection_state(DeviceType::Oximeter),
            ConnectionState::Connecting
        );
        assert_eq!(h.transport.take(), vec![Call::StartScan(DeviceType::AllDevices)]);

        h.advertise("oxi-2", "AOJ-70B", -30);
        assert!(!h.transport.take().contains(&Call::Connect("oxi-2".to_string())));

        h.advertise("oxi-1", "AOJ-70B", -95);
        assert_eq!(
            h.transport.take(),
            vec![Call::StopScan, Call::Connect("oxi-1".to_string())]
        );

        h.connected("oxi-1");
        assert_eq!(
            h.orchestrator.connection_state(DeviceType::Oximeter),
            ConnectionState::Connected
        );
        assert!(h.orchestrator.registry().get("oxi-1").unwrap().is_connected);
        assert!(h.orchestrator.filter().reconnect_target().is_none());
        assert_eq!(
            h.transport.take(),
            vec![Call::DiscoverServices("oxi-1".to_string())]
        );
    }

    #[test]
    fn test_connect_unknown_identifier() {
        let mut h = Harness::new();
        assert!(matches!(
            h.orchestrator.connect("nope"),
            Err(Error::DeviceNotFound { .. })
        ));
        assert!(matches!(
            h.orchestrator.disconnect(DeviceType::Scale),
            Err(Error::DeviceNotFound { .. })
        ));
    }

    #[test]
    fn test_connect_failed_and_disconnected_events() {
        let mut h = Harness::new();
        h.orchestrator.start_pairing(DeviceType::Thermometer).unwrap();
        h.advertise("therm-1", "AOJ-20A", -40);
        h.orchestrator.connect("therm-1").unwrap();
        h.device_events();

        h.orchestrator.handle_transport_event(TransportEvent::ConnectFailed {
            identifier: "therm-1".to_string(),
            reason: "timeout".to_string(),
        });
        assert_eq!(
            h.orchestrator.connection_state(DeviceType::Thermometer),
            ConnectionState::ConnectionFailed
        );

        h.orchestrator.connect("therm-1").unwrap();
        h.connected("therm-1");
        h.orchestrator.handle_transport_event(TransportEvent::Disconnected {
            identifier: "therm-1".to_string(),
            reason: Some("link lost".to_string()),
        });
        assert_eq!(
            h.orchestrator.connection_state(DeviceType::Thermometer),
            ConnectionState::Disconnected
        );
        assert!(!h.orchestrator.registry().get("therm-1").unwrap().is_connected);

        let kinds: Vec<_> = h
            .device_events()
            .into_iter()
            .map(|e| match e {
                DeviceEvent::Discovered { .. } => "discovered",
                DeviceEvent::Connected { .. } => "connected",
                DeviceEvent::Disconnected { .. } => "disconnected",
                DeviceEvent::ConnectionFailed { .. } => "failed",
            })
            .collect();
        assert_eq!(kinds, vec!["failed", "connected", "disconnected"]);
    }

    #[test]
    fn test_jump_rope_mac_latch() {
        let mut h = Harness::new();
        h.orchestrator.start_pairing(DeviceType::JumpRope).unwrap();
        h.advertise_with("rope-1", jump_rope_advertisement(0x66), -40);
        assert_eq!(
            h.orchestrator.connection_state(DeviceType::JumpRope),
            ConnectionState::Paired
        );
        let identity = h.orchestrator.paired_identity(DeviceType::JumpRope).unwrap().unwrap();
        assert_eq!(identity.mac_address.as_deref(), Some("11:22:33:44:55:66"));
        assert_eq!(h.device_events().len(), 1);

        // Inside the window another rope still pairs but goes unreported.
        h.orchestrator.start_pairing(DeviceType::JumpRope).unwrap();
        h.advance(Duration::from_millis(1500));
        h.advertise_with("rope-2", jump_rope_advertisement(0x67), -40);
        assert!(h.device_events().is_empty());
        assert_eq!(
            h.orchestrator.connection_state(DeviceType::JumpRope),
            ConnectionState::Paired
        );
        assert_eq!(h.orchestrator.data().jump_rope.data.mac_address, None);
        let identity = h.orchestrator.paired_identity(DeviceType::JumpRope).unwrap().unwrap();
        assert_eq!(identity.identifier, "rope-2");

        h.orchestrator.start_pairing(DeviceType::JumpRope).unwrap();
        h.advance(Duration::from_millis(500));
        h.advertise_with("rope-3", jump_rope_advertisement(0x68), -40);
        assert_eq!(h.device_events().len(), 1);
        assert_eq!(
            h.orchestrator.data().jump_rope.data.mac_address.as_deref(),
            Some("11:22:33:44:55:68")
        );
        assert_eq!(
            h.orchestrator.connection_state(DeviceType::JumpRope),
            ConnectionState::Paired
        );
    }

    #[test]
    fn test_jump_rope_pairs_without_mac() {
        let mut h = Harness::new();
        h.orchestrator.start_pairing(DeviceType::JumpRope).unwrap();
        h.transport.take();

        h.advertise("rope-1", "QN-Rope", -40);

        assert_eq!(
            h.orchestrator.connection_state(DeviceType::JumpRope),
            ConnectionState::Paired
        );
        let identity = h.orchestrator.paired_identity(DeviceType::JumpRope).unwrap().unwrap();
        assert_eq!(identity.identifier, "rope-1");
        assert_eq!(identity.mac_address, None);
        assert_eq!(h.transport.take(), vec![Call::StopScan]);
        assert!(h.device_events().is_empty());
    }

    #[test]
    fn test_paired_identity_keeps_transport_identifier() {
        let mut h = Harness::new();
        h.orchestrator.start_pairing(DeviceType::Oximeter).unwrap();
        h.advertise("oxi-1", "AOJ-70B-id", -50);

        let identity = h.orchestrator.paired_identity(DeviceType::Oximeter).unwrap().unwrap();
        assert_eq!(identity.identifier, "oxi-1");
        h.transport.take();

        h.orchestrator.reconnect(DeviceType::Oximeter).unwrap();
        h.advertise("oxi-1", "AOJ-70B-id", -50);
        assert_eq!(
            h.transport.take(),
            vec![
                Call::StartScan(DeviceType::AllDevices),
                Call::StopScan,
                Call::Connect("oxi-1".to_string())
            ]
        );
    }

    #[test]
    fn test_registry_stays_unique() {
        let mut h = Harness::new();
        h.orchestrator.start_pairing(DeviceType::Scale).unwrap();
        for _ in 0..5 {
            h.advertise("scale-1", "AAA002", -40);
        }
        assert_eq!(h.orchestrator.registry().len(), 1);
    }

    #[test]
    fn test_scale_broadcast_short_circuits_connection() {
        let mut h = Harness::new();
        h.orchestrator.start_pairing(DeviceType::Scale).unwrap();
        h.advertise("scale-1", "AAA002", -40);
        assert_eq!(
            h.orchestrator.connection_state(DeviceType::Scale),
            ConnectionState::Paired
        );
        assert!(!h.transport.take().contains(&Call::StopScan));

        h.advertise_with(
            "scale-1",
            AdvertisementData::with_name("AAA002").with_manufacturer_data(0x0001, vec![72]),
            -80,
        );
        assert_eq!(
            h.orchestrator.connection_state(DeviceType::Scale),
            ConnectionState::Connected
        );
        assert_eq!(h.orchestrator.data().scale.data.weight, Some(72.0));
        assert_eq!(
            h.orchestrator.measurement_state(DeviceType::Scale),
            MeasurementState::Measuring
        );
        assert!(h.transport.take().is_empty());
    }

    #[test]
    fn test_value_from_unattached_peripheral_is_ignored() {
        let mut h = Harness::new();
        h.pair_and_connect(DeviceType::HeartRateBelt, "belt-1", "CL8-1");
        h.orchestrator.start_pairing(DeviceType::HeartRateBelt).unwrap();
        h.advertise("belt-2", "CL8-2", -40);

        h.value("belt-2", &[90]);
        assert_eq!(h.orchestrator.data().heart_rate.data.heart_rate, None);
    }

    #[test]
    fn test_thermometer_completed_pulse() {
        let mut h = Harness::new();
        h.pair_and_connect(DeviceType::Thermometer, "therm-1", "AOJ-20A");

        h.value("therm-1", &[37]);
        assert_eq!(h.orchestrator.data().thermometer.data.temperature, Some(37.0));
        assert!(h.orchestrator.measurement_state(DeviceType::Thermometer).is_completed());

        h.advance(Duration::from_millis(299));
        assert!(h.orchestrator.measurement_state(DeviceType::Thermometer).is_completed());
        h.advance(Duration::from_millis(1));
        assert_eq!(
            h.orchestrator.measurement_state(DeviceType::Thermometer),
            MeasurementState::Idle
        );
    }

    #[test]
    fn test_thermometer_pulse_restarts_on_new_reading() {
        let mut h = Harness::new();
        h.pair_and_connect(DeviceType::Thermometer, "therm-1", "AOJ-20A");

        h.value("therm-1", &[36]);
        h.advance(Duration::from_millis(200));
        h.value("therm-1", &[37]);
        h.advance(Duration::from_millis(200));
        assert!(h.orchestrator.measurement_state(DeviceType::Thermometer).is_completed());

        h.advance(Duration::from_millis(100));
        assert_eq!(
            h.orchestrator.measurement_state(DeviceType::Thermometer),
            MeasurementState::Idle
        );
    }

    #[test]
    fn test_blood_pressure_result_outlives_instant_pulse() {
        let mut h = Harness::new();
        h.pair_and_connect(DeviceType::Sphygmometer, "bpm-1", "AOJ-30B");

        h.value("bpm-1", &[150]);
        assert_eq!(
            h.orchestrator.measurement_state(DeviceType::Sphygmometer),
            MeasurementState::Measuring
        );
        assert_eq!(h.orchestrator.data().sphygmometer.data.pressure, Some(150));

        // Final result inside the instant reading's pulse window.
        h.advance(Duration::from_millis(400));
        h.value("bpm-1", &[0]);
        assert!(h.orchestrator.measurement_state(DeviceType::Sphygmometer).is_completed());

        h.advance(Duration::from_secs(5));
        assert!(h.orchestrator.measurement_state(DeviceType::Sphygmometer).is_completed());
        assert_eq!(h.orchestrator.data().sphygmometer.data.systolic, Some(120));

        // A new cuff cycle starts measuring again and its pulse clears nothing.
        h.value("bpm-1", &[140]);
        h.advance(Duration::from_secs(1));
        assert_eq!(
            h.orchestrator.measurement_state(DeviceType::Sphygmometer),
            MeasurementState::Measuring
        );
    }

    #[test]
    fn test_decode_error_recorded() {
        let mut h = Harness::new();
        h.pair_and_connect(DeviceType::Thermometer, "therm-1", "AOJ-20A");

        h.value("therm-1", &[]);
        assert!(matches!(
            h.orchestrator.measurement_state(DeviceType::Thermometer),
            MeasurementState::Error { code: -1, .. }
        ));
    }

    #[test]
    fn test_recording_validation_has_no_side_effects() {
        let mut h = Harness::new();
        assert!(matches!(
            h.orchestrator
                .start_jump_rope_recording(RecordingMode::Count { target: 50 }),
            Err(Error::NotConnected { .. })
        ));

        h.pair_and_connect(DeviceType::JumpRope, "rope-1", "QN-Rope");
        let pending = h.scheduler.pending();
        assert!(matches!(
            h.orchestrator
                .start_jump_rope_recording(RecordingMode::Count { target: -1 }),
            Err(Error::InvalidCount { count: -1 })
        ));
        assert!(matches!(
            h.orchestrator
                .start_jump_rope_recording(RecordingMode::Time { seconds: -3 }),
            Err(Error::InvalidTime { seconds: -3 })
        ));
        assert!(h.transport.take().is_empty());
        assert_eq!(h.scheduler.pending(), pending);
        assert!(h.orchestrator.data().jump_rope.data.history.is_empty());
    }

    #[test]
    fn test_jump_rope_recording_samples_current_count() {
        let mut h = Harness::new();
        h.pair_and_connect(DeviceType::JumpRope, "rope-1", "QN-Rope");

        h.orchestrator
            .start_jump_rope_recording(RecordingMode::Count { target: 50 })
            .unwrap();
        let mode_command = vec![0xA0, JumpRopeMode::Count.command_code(), 50];
        assert_eq!(
            h.transport.take(),
            vec![Call::Write(JUMP_ROPE_WRITE_UUID, mode_command.clone())]
        );

        h.advance(Duration::from_secs(1));
        assert_eq!(
            h.transport.take(),
            vec![Call::Write(JUMP_ROPE_WRITE_UUID, mode_command)]
        );
        assert!(h.orchestrator.measurement_state(DeviceType::JumpRope).is_measuring());

        let mut expected = Vec::new();
        for count in [3u8, 7, 12] {
            h.value("rope-1", &[count]);
            h.advance(Duration::from_secs(1));
            expected.push(u32::from(count));
        }

        let history = &h.orchestrator.data().jump_rope.data.history;
        assert_eq!(history.len(), 3);
        assert_eq!(history.values().copied().collect::<Vec<_>>(), expected);
    }

    #[test]
    fn test_jump_rope_ended_stops_recording_and_heart_rate() {
        let mut h = Harness::new();
        h.pair_and_connect(DeviceType::JumpRope, "rope-1", "QN-Rope");
        h.pair_and_connect(DeviceType::HeartRateBelt, "belt-1", "CL8");

        h.orchestrator.start_heart_rate_recording().unwrap();
        h.orchestrator
            .start_jump_rope_recording(RecordingMode::Free)
            .unwrap();
        h.advance(Duration::from_secs(1));
        h.transport.take();

        // Status code 3: the device ended the session.
        h.value("rope-1", &[20, 3]);

        assert_eq!(
            h.orchestrator.measurement_state(DeviceType::JumpRope),
            MeasurementState::Completed
        );
        assert_eq!(
            h.orchestrator.measurement_state(DeviceType::HeartRateBelt),
            MeasurementState::Completed
        );
        assert_eq!(
            h.transport.take(),
            vec![Call::Write(JUMP_ROPE_WRITE_UUID, vec![0xA1])]
        );

        let samples = h.orchestrator.data().heart_rate.data.history.len();
        h.advance(Duration::from_secs(5));
        assert_eq!(h.orchestrator.data().heart_rate.data.history.len(), samples);
    }

    #[test]
    fn test_disconnect_stops_recording() {
        let mut h = Harness::new();
        h.pair_and_connect(DeviceType::HeartRateBelt, "belt-1", "CL8");
        h.orchestrator.start_heart_rate_recording().unwrap();

        h.value("belt-1", &[80]);
        h.advance(Duration::from_secs(2));
        assert_eq!(h.orchestrator.data().heart_rate.data.history.len(), 2);

        h.orchestrator.handle_transport_event(TransportEvent::Disconnected {
            identifier: "belt-1".to_string(),
            reason: None,
        });
        assert_eq!(
            h.orchestrator.measurement_state(DeviceType::HeartRateBelt),
            MeasurementState::Completed
        );
        h.advance(Duration::from_secs(3));
        assert_eq!(h.orchestrator.data().heart_rate.data.history.len(), 2);
    }

    #[test]
    fn test_sampler_skips_missing_values() {
        let mut h = Harness::new();
        h.pair_and_connect(DeviceType::HeartRateBelt, "belt-1", "CL8");
        h.orchestrator.start_heart_rate_recording().unwrap();

        h.advance(Duration::from_secs(2));
        assert!(h.orchestrator.data().heart_rate.data.history.is_empty());

        h.value("belt-1", &[75]);
        h.advance(Duration::from_secs(1));
        assert_eq!(h.orchestrator.data().heart_rate.data.history.len(), 1);
    }

    #[test]
    fn test_connect_timeout() {
        let config = ManagerConfig::default().with_connect_timeout(Duration::from_secs(10));
        let mut h = Harness::with(config, Arc::new(MemoryIdentityStore::new()));
        h.orchestrator.start_pairing(DeviceType::Oximeter).unwrap();
        h.advertise("oxi-1", "AOJ-70B", -50);
        h.orchestrator.reconnect(DeviceType::Oximeter).unwrap();
        h.device_events();

        h.advance(Duration::from_secs(10));
        assert_eq!(
            h.orchestrator.connection_state(DeviceType::Oximeter),
            ConnectionState::ConnectionFailed
        );
        assert!(h.orchestrator.filter().reconnect_target().is_none());
        assert!(matches!(
            h.device_events().as_slice(),
            [DeviceEvent::ConnectionFailed { .. }]
        ));
    }

    #[test]
    fn test_connected_clears_stale_timeout() {
        let config = ManagerConfig::default().with_connect_timeout(Duration::from_secs(10));
        let mut h = Harness::with(config, Arc::new(MemoryIdentityStore::new()));
        h.orchestrator.start_pairing(DeviceType::Oximeter).unwrap();
        h.advertise("oxi-1", "AOJ-70B", -50);
        h.orchestrator.connect("oxi-1").unwrap();
        h.connected("oxi-1");

        h.advance(Duration::from_secs(30));
        assert_eq!(
            h.orchestrator.connection_state(DeviceType::Oximeter),
            ConnectionState::Connected
        );
    }

    #[test]
    fn test_services_dispatch() {
        let mut h = Harness::new();
        h.pair_and_connect(DeviceType::JumpRope, "rope-1", "QN-Rope");

        h.orchestrator
            .handle_transport_event(TransportEvent::CharacteristicsDiscovered {
                identifier: "rope-1".to_string(),
                service: crate::ble::JUMP_ROPE_SERVICE_UUID,
                characteristics: vec![DiscoveredCharacteristic::new(JUMP_ROPE_WRITE_UUID, false)],
            });
        assert_eq!(
            h.transport.take(),
            vec![
                Call::Write(JUMP_ROPE_WRITE_UUID, vec![0xB0]),
                Call::Write(JUMP_ROPE_WRITE_UUID, vec![0xA0, 0, 0]),
            ]
        );
    }
}
