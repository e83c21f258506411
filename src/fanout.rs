//! Event fan-out.
//!
//! Every adapter change, device lifecycle event and decoded reading is
//! delivered to up to three optional observers and to a broadcast channel.
//! Observers are capability traits: register only the families you need.

use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::trace;

use crate::ble::{AdapterState, DeviceType};
use crate::protocol::{
    DeviceCallback, HeartRateCallback, JumpRopeStatus, OximeterCallback, ScaleCallback,
    SphygmometerCallback, ThermometerCallback,
};
use crate::registry::PeripheralEntry;

/// Device lifecycle event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceEvent {
    /// A pairing candidate was seen.
    Discovered {
        /// Device type.
        device_type: DeviceType,
        /// Peripheral.
        device: PeripheralEntry,
    },
    /// A connection was established.
    Connected {
        /// Device type.
        device_type: DeviceType,
        /// Peripheral.
        device: PeripheralEntry,
    },
    /// A connection was closed or lost.
    Disconnected {
        /// Device type.
        device_type: DeviceType,
        /// Peripheral.
        device: PeripheralEntry,
        /// Transport error, if the link was lost.
        reason: Option<String>,
    },
    /// A connection attempt failed or timed out.
    ConnectionFailed {
        /// Device type.
        device_type: DeviceType,
        /// Peripheral.
        device: PeripheralEntry,
        /// Failure description.
        reason: String,
    },
}

impl DeviceEvent {
    /// Device type the event is about.
    pub fn device_type(&self) -> DeviceType {
        match self {
            Self::Discovered { device_type, .. }
            | Self::Connected { device_type, .. }
            | Self::Disconnected { device_type, .. }
            | Self::ConnectionFailed { device_type, .. } => *device_type,
        }
    }
}

/// Observer of adapter and device lifecycle events.
pub trait BleObserver: Send + Sync {
    /// The adapter changed state.
    fn adapter_state_changed(&self, state: AdapterState);

    /// A device was discovered, connected, disconnected or failed to connect.
    fn device_event(&self, event: &DeviceEvent);
}

/// Observer of clinical device readings.
pub trait HealthObserver: Send + Sync {
    /// Thermometer result.
    fn thermometer(&self, callback: &ThermometerCallback);

    /// Oximeter result.
    fn oximeter(&self, callback: &OximeterCallback);

    /// Blood-pressure result.
    fn sphygmometer(&self, callback: &SphygmometerCallback);

    /// Scale result.
    fn scale(&self, callback: &ScaleCallback);
}

/// Observer of activity device readings.
pub trait SportObserver: Send + Sync {
    /// Jump-rope status.
    fn jump_rope(&self, status: &JumpRopeStatus);

    /// Heart-rate belt result.
    fn heart_rate(&self, callback: &HeartRateCallback);

    /// Scale result.
    fn scale(&self, callback: &ScaleCallback);
}

/// Anything the fan-out publishes.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Adapter state change.
    Adapter(AdapterState),
    /// Device lifecycle event.
    Device(DeviceEvent),
    /// Decoded reading.
    Callback(DeviceCallback),
    /// A characteristic value could not be decoded.
    DecodeFailed {
        /// Device type whose decoder failed.
        device_type: DeviceType,
        /// Decoder error.
        message: String,
    },
}

/// Registered observers.
#[derive(Clone, Default)]
pub struct Observers {
    /// Lifecycle observer.
    pub ble: Option<Arc<dyn BleObserver>>,
    /// Clinical observer.
    pub health: Option<Arc<dyn HealthObserver>>,
    /// Activity observer.
    pub sport: Option<Arc<dyn SportObserver>>,
}

impl std::fmt::Debug for Observers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Observers")
            .field("ble", &self.ble.is_some())
            .field("health", &self.health.is_some())
            .field("sport", &self.sport.is_some())
            .finish()
    }
}

/// Routes events to observers and subscribers.
#[derive(Debug)]
pub struct EventFanout {
    observers: Observers,
    event_tx: broadcast::Sender<SessionEvent>,
}

impl EventFanout {
    /// Create a fan-out with a broadcast channel of `capacity` events.
    pub fn new(capacity: usize) -> Self {
        let (event_tx, _) = broadcast::channel(capacity.max(1));
        Self {
            observers: Observers::default(),
            event_tx,
        }
    }

    /// Create a fan-out with observers already registered.
    pub fn with_observers(capacity: usize, observers: Observers) -> Self {
        let mut fanout = Self::new(capacity);
        fanout.observers = observers;
        fanout
    }

    /// Registered observers.
    pub fn observers(&self) -> &Observers {
        &self.observers
    }

    /// Replace the registered observers.
    pub fn set_observers(&mut self, observers: Observers) {
        self.observers = observers;
    }

    /// Subscribe to every published event.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.event_tx.subscribe()
    }

    /// Sender side of the broadcast channel.
    pub fn sender(&self) -> broadcast::Sender<SessionEvent> {
        self.event_tx.clone()
    }

    /// Publish an adapter state change.
    pub fn adapter_state(&self, state: AdapterState) {
        if let Some(ble) = &self.observers.ble {
            ble.adapter_state_changed(state);
        }
        self.broadcast(SessionEvent::Adapter(state));
    }

    /// Publish a device lifecycle event.
    pub fn device_event(&self, event: DeviceEvent) {
        if let Some(ble) = &self.observers.ble {
            ble.device_event(&event);
        }
        self.broadcast(SessionEvent::Device(event));
    }

    /// Publish a decoded reading to the observers interested in its type.
    pub fn callback(&self, callback: DeviceCallback) {
        let health = self.observers.health.as_deref();
        let sport = self.observers.sport.as_deref();

        match &callback {
            DeviceCallback::Thermometer(c) => {
                if let Some(h) = health {
                    h.thermometer(c);
                }
            }
            DeviceCallback::Oximeter(c) => {
                if let Some(h) = health {
                    h.oximeter(c);
                }
            }
            DeviceCallback::Sphygmometer(c) => {
                if let Some(h) = health {
                    h.sphygmometer(c);
                }
            }
            DeviceCallback::Scale(c) => {
                if let Some(h) = health {
                    h.scale(c);
                }
                if let Some(s) = sport {
                    s.scale(c);
                }
            }
            DeviceCallback::JumpRope(c) => {
                if let Some(s) = sport {
                    s.jump_rope(c);
                }
            }
            DeviceCallback::HeartRate(c) => {
                if let Some(s) = sport {
                    s.heart_rate(c);
                }
            }
        }

        self.broadcast(SessionEvent::Callback(callback));
    }

    /// Publish a decode failure. Only subscribers see these.
    pub fn decode_failed(&self, device_type: DeviceType, message: impl Into<String>) {
        self.broadcast(SessionEvent::DecodeFailed {
            device_type,
            message: message.into(),
        });
    }

    fn broadcast(&self, event: SessionEvent) {
        if self.event_tx.send(event).is_err() {
            trace!("No session event subscribers");
        }
    }
}

/// Handle for a registered event callback. Dropping it unregisters the callback.
pub struct CallbackHandle {
    id: u64,
    unregister_fn: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl CallbackHandle {
    pub(crate) fn new(id: u64, unregister_fn: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            id,
            unregister_fn: Some(Box::new(unregister_fn)),
        }
    }

    /// Unregister this callback.
    pub fn unregister(mut self) {
        if let Some(f) = self.unregister_fn.take() {
            f();
        }
    }

    /// Get the callback ID.
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Drop for CallbackHandle {
    fn drop(&mut self) {
        if let Some(f) = self.unregister_fn.take() {
            f();
        }
    }
}

impl std::fmt::Debug for CallbackHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackHandle").field("id", &self.id).finish()
    }
}
