//! Typed results produced by protocol decoders.
//!
//! One callback family per device type. The orchestrator folds these into the
//! device snapshot and republishes them unchanged to observers.

use crate::ble::DeviceType;

/// Thermometer results.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ThermometerCallback {
    /// A temperature reading in degrees Celsius.
    Temperature {
        /// Temperature value.
        temperature: f64,
        /// Measurement mode code reported by the device.
        mode: i32,
        /// Human readable mode (body, surface, ...).
        mode_description: String,
    },
    /// Battery report.
    Battery {
        /// Battery level code.
        level: i32,
        /// Human readable battery description.
        description: String,
    },
    /// The device reported an internal fault.
    Error {
        /// Device error code.
        code: i32,
        /// Human readable description.
        description: String,
    },
}

/// Pulse oximeter results.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum OximeterCallback {
    /// Battery report carrying a slice of the plethysmography waveform.
    Battery {
        /// Battery percentage.
        percentage: u8,
        /// Pulse waveform samples.
        pulse_wave: Vec<u8>,
    },
    /// One measurement frame. Pulse 255 and SpO2 127 mean "no signal".
    Measurement {
        /// Pulse rate in beats per minute.
        pulse: u8,
        /// Oxygen saturation in percent.
        spo2: u8,
        /// Perfusion index in percent.
        pi: f64,
    },
}

/// Blood-pressure cuff results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SphygmometerCallback {
    /// Cuff pressure while inflating or deflating.
    InstantData {
        /// Current pressure in mmHg.
        pressure: u16,
        /// Pulse detected flag.
        pulse_status: u8,
    },
    /// Final result.
    FinalData {
        /// Systolic pressure in mmHg.
        systolic: u16,
        /// Diastolic pressure in mmHg.
        diastolic: u16,
        /// Pulse rate in beats per minute.
        pulse: u16,
        /// Irregular pulse flag.
        irregular_pulse: u8,
    },
}

/// Scale results.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ScaleCallback {
    /// A weight reading in kilograms.
    Weight {
        /// Weight value.
        weight: f64,
        /// Whether the reading has stabilised.
        is_final: bool,
    },
}

/// Jump-rope operating mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum JumpRopeMode {
    /// Free jumping.
    #[default]
    Free,
    /// Count down a fixed number of seconds.
    Time,
    /// Count down a fixed number of jumps.
    Count,
}

impl JumpRopeMode {
    /// Mode code used when writing a set-mode command.
    pub fn command_code(&self) -> u8 {
        match self {
            Self::Free => 0,
            Self::Time => 1,
            Self::Count => 2,
        }
    }

    /// Mode from the code reported in a status frame. Unknown codes are free mode.
    pub fn from_reported(code: u8) -> Self {
        match code {
            2 => Self::Time,
            3 => Self::Count,
            _ => Self::Free,
        }
    }
}

impl std::fmt::Display for JumpRopeMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Free => write!(f, "Free"),
            Self::Time => write!(f, "Time"),
            Self::Count => write!(f, "Count"),
        }
    }
}

/// Activity state reported by the jump rope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum JumpRopeState {
    /// Idle.
    #[default]
    NotJumping,
    /// Rope in use.
    Jumping,
    /// Paused.
    Paused,
    /// The session reached its end (time or count target).
    Ended,
}

impl JumpRopeState {
    /// State from the status code in a status frame. Unknown codes are idle.
    pub fn from_code(code: u8) -> Self {
        match code {
            1 => Self::Jumping,
            2 => Self::Paused,
            3 => Self::Ended,
            _ => Self::NotJumping,
        }
    }
}

/// One jump-rope status frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct JumpRopeStatus {
    /// Reported mode code.
    pub mode: u8,
    /// Reported status code.
    pub status: u8,
    /// Mode setting (seconds or jump target).
    pub setting: u32,
    /// Jumps so far.
    pub count: u32,
    /// Elapsed seconds.
    pub time: u32,
    /// Screen state.
    pub screen: u8,
    /// Battery level on a 0-4 scale.
    pub battery: u8,
}

impl JumpRopeStatus {
    /// Decoded mode.
    pub fn mode(&self) -> JumpRopeMode {
        JumpRopeMode::from_reported(self.mode)
    }

    /// Decoded activity state.
    pub fn state(&self) -> JumpRopeState {
        JumpRopeState::from_code(self.status)
    }
}

/// Heart-rate belt results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum HeartRateCallback {
    /// Heart rate in beats per minute.
    HeartRate(u16),
    /// Battery percentage.
    Battery(u8),
}

/// Any decoded result.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DeviceCallback {
    /// Thermometer result.
    Thermometer(ThermometerCallback),
    /// Oximeter result.
    Oximeter(OximeterCallback),
    /// Blood-pressure result.
    Sphygmometer(SphygmometerCallback),
    /// Scale result.
    Scale(ScaleCallback),
    /// Jump-rope status.
    JumpRope(JumpRopeStatus),
    /// Heart-rate belt result.
    HeartRate(HeartRateCallback),
}

impl DeviceCallback {
    /// Device type that produced this result.
    pub fn device_type(&self) -> DeviceType {
        match self {
            Self::Thermometer(_) => DeviceType::Thermometer,
            Self::Oximeter(_) => DeviceType::Oximeter,
            Self::Sphygmometer(_) => DeviceType::Sphygmometer,
            Self::Scale(_) => DeviceType::Scale,
            Self::JumpRope(_) => DeviceType::JumpRope,
            Self::HeartRate(_) => DeviceType::HeartRateBelt,
        }
    }
}
