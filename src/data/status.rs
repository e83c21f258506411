//! Per-device status.

use crate::ble::ConnectionState;

/// Measurement progress, independent of the connection state.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum MeasurementState {
    /// No measurement in progress.
    #[default]
    Idle,
    /// Readings are arriving.
    Measuring,
    /// A measurement finished.
    Completed,
    /// The measurement was paused.
    Paused,
    /// The device or decoder reported an error.
    Error {
        /// Error code.
        code: i32,
        /// Description.
        message: String,
    },
}

impl MeasurementState {
    /// Check if measuring.
    pub fn is_measuring(&self) -> bool {
        matches!(self, Self::Measuring)
    }

    /// Check if completed.
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed)
    }
}

impl std::fmt::Display for MeasurementState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "None"),
            Self::Measuring => write!(f, "Measuring"),
            Self::Completed => write!(f, "Measurement completed"),
            Self::Paused => write!(f, "Pause measurement"),
            Self::Error { code, message } => {
                write!(f, "Measurement error ({}): {}", code, message)
            }
        }
    }
}

/// Connection and measurement state of one device type.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DeviceStatus {
    /// Connection lifecycle.
    pub connection: ConnectionState,
    /// Measurement progress.
    pub measurement: MeasurementState,
}

/// Latest data for one device type together with its status.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DeviceSnapshot<T> {
    /// Status.
    pub status: DeviceStatus,
    /// Readings.
    pub data: T,
}
