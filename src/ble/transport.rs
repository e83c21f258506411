//! BLE transport interface.
//!
//! The orchestrator never talks to a radio directly. It issues
//! fire-and-forget requests through [`BleTransport`] and learns about their
//! outcomes later as [`TransportEvent`]s delivered to its event loop.

use bytes::Bytes;
use uuid::Uuid;

use crate::ble::advertising::Advertisement;
use crate::ble::DeviceType;

/// Power and authorization state of the local adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum AdapterState {
    /// State not yet known.
    #[default]
    Unknown,
    /// The adapter is resetting.
    Resetting,
    /// The platform has no BLE support.
    Unsupported,
    /// The application is not authorized to use Bluetooth.
    Unauthorized,
    /// Bluetooth is switched off.
    PoweredOff,
    /// Bluetooth is on and usable.
    PoweredOn,
}

impl std::fmt::Display for AdapterState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Self::Unknown => "Unknown state",
            Self::Resetting => "Resetting",
            Self::Unsupported => "Unsupported",
            Self::Unauthorized => "Unauthorized",
            Self::PoweredOff => "Powered off",
            Self::PoweredOn => "Powered on",
        };
        write!(f, "{}", text)
    }
}

/// A characteristic reported by characteristic discovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DiscoveredCharacteristic {
    /// Characteristic UUID.
    pub uuid: Uuid,
    /// Whether the characteristic supports notifications.
    pub notify: bool,
}

impl DiscoveredCharacteristic {
    /// Create a characteristic description.
    pub fn new(uuid: Uuid, notify: bool) -> Self {
        Self { uuid, notify }
    }
}

/// Events reported by a transport.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// The adapter changed power/authorization state.
    AdapterStateChanged(AdapterState),
    /// An advertisement was received.
    Advertisement(Advertisement),
    /// A requested connection was established.
    Connected {
        /// Peripheral identifier.
        identifier: String,
        /// Peripheral name, if known.
        name: Option<String>,
    },
    /// A requested connection could not be established.
    ConnectFailed {
        /// Peripheral identifier.
        identifier: String,
        /// Failure description.
        reason: String,
    },
    /// A connection was closed or lost.
    Disconnected {
        /// Peripheral identifier.
        identifier: String,
        /// Failure description when the link was lost rather than closed.
        reason: Option<String>,
    },
    /// Service discovery finished.
    ServicesDiscovered {
        /// Peripheral identifier.
        identifier: String,
        /// Discovered service UUIDs.
        services: Vec<Uuid>,
    },
    /// Service discovery failed.
    ServiceDiscoveryFailed {
        /// Peripheral identifier.
        identifier: String,
        /// Failure description.
        reason: String,
    },
    /// Characteristic discovery for one service finished.
    CharacteristicsDiscovered {
        /// Peripheral identifier.
        identifier: String,
        /// Service the characteristics belong to.
        service: Uuid,
        /// Discovered characteristics.
        characteristics: Vec<DiscoveredCharacteristic>,
    },
    /// Characteristic discovery for one service failed.
    CharacteristicDiscoveryFailed {
        /// Peripheral identifier.
        identifier: String,
        /// Service whose discovery failed.
        service: Uuid,
        /// Failure description.
        reason: String,
    },
    /// A characteristic value arrived (notification or read response).
    ValueUpdated {
        /// Peripheral identifier.
        identifier: String,
        /// Characteristic UUID.
        characteristic: Uuid,
        /// Raw value.
        value: Bytes,
    },
}

/// Central-role radio operations.
///
/// Every method returns immediately. Outcomes, including failures, are
/// reported as [`TransportEvent`]s.
pub trait BleTransport: Send + Sync {
    /// Start an open scan. `target` is informational; filtering happens above.
    fn start_scan(&self, target: DeviceType);

    /// Stop scanning.
    fn stop_scan(&self);

    /// Request a connection.
    fn connect(&self, identifier: &str);

    /// Request disconnection, or cancel a pending connection.
    fn cancel_connection(&self, identifier: &str);

    /// Discover services, optionally restricted to `services`.
    fn discover_services(&self, identifier: &str, services: Option<&[Uuid]>);

    /// Discover characteristics of `service`, optionally restricted.
    fn discover_characteristics(
        &self,
        identifier: &str,
        service: Uuid,
        characteristics: Option<&[Uuid]>,
    );

    /// Enable or disable notifications.
    fn set_notify(&self, identifier: &str, characteristic: Uuid, enabled: bool);

    /// Write a value.
    fn write_value(
        &self,
        identifier: &str,
        characteristic: Uuid,
        value: &[u8],
        with_response: bool,
    );

    /// Request a read; the value arrives as [`TransportEvent::ValueUpdated`].
    fn read_value(&self, identifier: &str, characteristic: Uuid);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_adapter_state_display() {
        assert_eq!(AdapterState::PoweredOn.to_string(), "Powered on");
        assert_eq!(AdapterState::default().to_string(), "Unknown state");
    }

    #[test]
    fn test_transport_event_clone() {
        fn assert_clone<T: Clone + Send>() {}
        assert_clone::<TransportEvent>();
    }
}
