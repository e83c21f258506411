//! Recording sessions for the jump rope and the heart-rate belt.

use std::collections::HashMap;

use crate::ble::DeviceType;
use crate::error::{Error, Result};
use crate::protocol::{DeviceCommand, JumpRopeMode};

/// Jump-rope recording mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum RecordingMode {
    /// Jump freely until stopped.
    #[default]
    Free,
    /// Count down a number of seconds.
    Time {
        /// Duration in seconds.
        seconds: i64,
    },
    /// Count down a number of jumps.
    Count {
        /// Target jump count.
        target: i64,
    },
}

impl RecordingMode {
    /// Check the mode parameter.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidTime`] or [`Error::InvalidCount`] for negative values.
    pub fn validate(&self) -> Result<()> {
        match *self {
            Self::Time { seconds } if seconds < 0 => Err(Error::InvalidTime { seconds }),
            Self::Count { target } if target < 0 => Err(Error::InvalidCount { count: target }),
            _ => Ok(()),
        }
    }

    /// The set-mode command for this mode. Settings beyond `u32` saturate.
    pub fn command(&self) -> DeviceCommand {
        let (mode, setting) = match *self {
            Self::Free => (JumpRopeMode::Free, 0),
            Self::Time { seconds } => (JumpRopeMode::Time, seconds),
            Self::Count { target } => (JumpRopeMode::Count, target),
        };
        DeviceCommand::SetJumpRopeMode {
            mode,
            setting: u32::try_from(setting.max(0)).unwrap_or(u32::MAX),
        }
    }
}

impl std::fmt::Display for RecordingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Free => write!(f, "free"),
            Self::Time { seconds } => write!(f, "time ({}s)", seconds),
            Self::Count { target } => write!(f, "count ({})", target),
        }
    }
}

/// Session counters per recordable device.
///
/// Starting or stopping a recording moves the counter on; timers carry the
/// session they were scheduled for and are ignored once it is stale.
#[derive(Debug, Default)]
pub(crate) struct RecordingSessions {
    counters: HashMap<DeviceType, u64>,
    mode_payload: Option<Vec<u8>>,
}

impl RecordingSessions {
    /// Start a new session, returning its number.
    pub(crate) fn begin(&mut self, device_type: DeviceType) -> u64 {
        let counter = self.counters.entry(device_type).or_insert(0);
        *counter += 1;
        *counter
    }

    /// Invalidate the running session.
    pub(crate) fn end(&mut self, device_type: DeviceType) {
        self.begin(device_type);
        if device_type == DeviceType::JumpRope {
            self.mode_payload = None;
        }
    }

    pub(crate) fn is_current(&self, device_type: DeviceType, session: u64) -> bool {
        self.counters.get(&device_type).copied().unwrap_or(0) == session
    }

    /// Remember the encoded set-mode command for the settle re-send.
    pub(crate) fn set_mode_payload(&mut self, payload: Vec<u8>) {
        self.mode_payload = Some(payload);
    }

    pub(crate) fn mode_payload(&self) -> Option<&[u8]> {
        self.mode_payload.as_deref()
    }
}
