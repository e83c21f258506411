//! Jump-rope readings and recording history.

use crate::data::log::SampleLog;
use crate::protocol::{JumpRopeMode, JumpRopeState, JumpRopeStatus};

/// Latest jump-rope status and the recorded jump counts.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct JumpRopeModel {
    /// Peripheral name.
    pub peripheral_name: Option<String>,
    /// MAC address taken from the advertisement.
    pub mac_address: Option<String>,
    /// Reported mode code.
    pub mode: Option<u8>,
    /// Reported status code.
    pub status: Option<u8>,
    /// Mode setting (seconds or jump target).
    pub setting: Option<u32>,
    /// Jumps in the current recording.
    pub count: Option<u32>,
    /// Elapsed seconds in the current recording.
    pub time: Option<u32>,
    /// Screen state.
    pub screen: Option<u8>,
    /// Battery level on a 0-4 scale.
    pub battery_level: Option<u8>,
    /// Jump count sampled once per second while recording.
    pub history: SampleLog<u32>,
}

impl JumpRopeModel {
    /// Current mode. Free until a status frame arrives.
    pub fn mode(&self) -> JumpRopeMode {
        self.mode.map(JumpRopeMode::from_reported).unwrap_or_default()
    }

    /// Current activity state.
    pub fn state(&self) -> JumpRopeState {
        self.status.map(JumpRopeState::from_code).unwrap_or_default()
    }

    /// Mode label.
    pub fn mode_label(&self) -> String {
        self.mode().to_string()
    }

    /// Battery level description.
    pub fn battery_description(&self) -> &'static str {
        match self.battery_level {
            None => "Unknown",
            Some(4) => "Battery full (>80%)",
            Some(3) => "Battery good (>50%)",
            Some(2) => "Battery fair (>25%)",
            Some(1) => "Battery low (>10%)",
            Some(0) => "Battery critical (<=10%)",
            Some(_) => "Unknown battery level",
        }
    }

    /// Seconds recorded in the current session.
    pub fn recorded_seconds(&self) -> usize {
        self.history.len()
    }

    /// Fold a status frame into the model. Count and time only move while
    /// a recording is measuring.
    pub(crate) fn apply(&mut self, status: &JumpRopeStatus, measuring: bool) {
        if measuring {
            self.count = Some(status.count);
            self.time = Some(status.time);
        }
        self.mode = Some(status.mode);
        self.status = Some(status.status);
        self.setting = Some(status.setting);
        self.screen = Some(status.screen);
        self.battery_level = Some(status.battery);
    }
}
