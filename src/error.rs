//! Error types for the ired-ble crate.

use thiserror::Error;

use crate::ble::DeviceType;

/// The main error type for this crate.
#[derive(Error, Debug)]
pub enum Error {
    /// Bluetooth-related error from the underlying BLE library.
    #[error("Bluetooth error: {0}")]
    Bluetooth(#[from] btleplug::Error),

    /// Bluetooth is not available or is disabled on this system.
    #[error("Bluetooth not available or disabled")]
    BluetoothUnavailable,

    /// No registered peripheral matches the identifier.
    #[error("Device not found: {identifier}")]
    DeviceNotFound {
        /// The identifier that was searched for.
        identifier: String,
    },

    /// A characteristic was not found on the peripheral.
    #[error("Characteristic not found: {uuid}")]
    CharacteristicNotFound {
        /// The UUID of the missing characteristic.
        uuid: String,
    },

    /// Operation requires a connected device of this type but none is connected.
    #[error("No connected {device_type} device")]
    NotConnected {
        /// The device type that was required.
        device_type: DeviceType,
    },

    /// No paired identity is stored for this device type.
    #[error("No paired {device_type} device")]
    NotPaired {
        /// The device type without a stored identity.
        device_type: DeviceType,
    },

    /// Time-mode recording was requested with a negative duration.
    #[error("In time mode, time cannot be empty or negative (got {seconds})")]
    InvalidTime {
        /// The rejected duration in seconds.
        seconds: i64,
    },

    /// Count-mode recording was requested with a negative target.
    #[error("In count mode, the quantity cannot be empty or negative (got {count})")]
    InvalidCount {
        /// The rejected target count.
        count: i64,
    },

    /// The operation is not defined for this device type.
    #[error("Operation not supported for device type {device_type}")]
    UnsupportedDeviceType {
        /// The device type the operation was requested for.
        device_type: DeviceType,
    },

    /// Invalid data was received from a peripheral.
    #[error("Invalid data received: {context}")]
    InvalidData {
        /// Description of what was invalid about the data.
        context: String,
    },

    /// The requested operation is not supported.
    #[error("Operation not supported: {operation}")]
    NotSupported {
        /// Description of the unsupported operation.
        operation: String,
    },

    /// An invalid parameter was provided.
    #[error("Invalid parameter: {name} = {value}")]
    InvalidParameter {
        /// The name of the parameter.
        name: String,
        /// The invalid value that was provided.
        value: String,
    },

    /// Reading or writing the identity store failed.
    #[error("Identity store error: {0}")]
    Storage(#[from] std::io::Error),

    /// A stored identity document could not be (de)serialized.
    #[cfg(feature = "serde")]
    #[error("Identity serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The session event loop is no longer running.
    #[error("Device manager stopped")]
    ManagerStopped,

    /// An internal error occurred.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether this error is a synchronous validation failure (no state changed).
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::InvalidTime { .. }
                | Self::InvalidCount { .. }
                | Self::NotConnected { .. }
                | Self::NotPaired { .. }
                | Self::DeviceNotFound { .. }
                | Self::UnsupportedDeviceType { .. }
                | Self::InvalidParameter { .. }
        )
    }
}

/// A specialized Result type for this crate.
pub type Result<T> = std::result::Result<T, Error>;
