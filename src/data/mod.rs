//! Data structures for device readings.
//!
//! This module contains the per-device snapshots the orchestrator keeps up
//! to date, the recorded sample history, and the statistics derived from it.

pub mod heart_rate;
pub mod jump_rope;
pub mod log;
pub mod oximeter;
pub mod scale;
pub mod sphygmometer;
pub mod status;
pub mod thermometer;

pub use heart_rate::HeartRateModel;
pub use jump_rope::JumpRopeModel;
pub use log::{Sample, SampleLog};
pub use oximeter::{OximeterAssessment, OximeterModel, OximeterSummary};
pub use scale::{BodyInfo, Gender, ScaleModel, WeightCategory};
pub use sphygmometer::SphygmometerModel;
pub use status::{DeviceSnapshot, DeviceStatus, MeasurementState};
pub use thermometer::ThermometerModel;

use crate::ble::DeviceType;

/// Snapshot of every device type.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DeviceData {
    /// Thermometer.
    pub thermometer: DeviceSnapshot<ThermometerModel>,
    /// Pulse oximeter.
    pub oximeter: DeviceSnapshot<OximeterModel>,
    /// Blood-pressure cuff.
    pub sphygmometer: DeviceSnapshot<SphygmometerModel>,
    /// Scale.
    pub scale: DeviceSnapshot<ScaleModel>,
    /// Jump rope.
    pub jump_rope: DeviceSnapshot<JumpRopeModel>,
    /// Heart-rate belt.
    pub heart_rate: DeviceSnapshot<HeartRateModel>,
}

impl DeviceData {
    /// Status of a concrete device type.
    pub fn status(&self, device_type: DeviceType) -> Option<&DeviceStatus> {
        match device_type {
            DeviceType::Thermometer => Some(&self.thermometer.status),
            DeviceType::Oximeter => Some(&self.oximeter.status),
            DeviceType::Sphygmometer => Some(&self.sphygmometer.status),
            DeviceType::Scale => Some(&self.scale.status),
            DeviceType::JumpRope => Some(&self.jump_rope.status),
            DeviceType::HeartRateBelt => Some(&self.heart_rate.status),
            DeviceType::None | DeviceType::AllDevices => None,
        }
    }

    /// Mutable status of a concrete device type.
    pub fn status_mut(&mut self, device_type: DeviceType) -> Option<&mut DeviceStatus> {
        match device_type {
            DeviceType::Thermometer => Some(&mut self.thermometer.status),
            DeviceType::Oximeter => Some(&mut self.oximeter.status),
            DeviceType::Sphygmometer => Some(&mut self.sphygmometer.status),
            DeviceType::Scale => Some(&mut self.scale.status),
            DeviceType::JumpRope => Some(&mut self.jump_rope.status),
            DeviceType::HeartRateBelt => Some(&mut self.heart_rate.status),
            DeviceType::None | DeviceType::AllDevices => None,
        }
    }

    /// Clear the readings of a device type, keeping its status.
    pub fn reset_data(&mut self, device_type: DeviceType) {
        match device_type {
            DeviceType::Thermometer => self.thermometer.data = Default::default(),
            DeviceType::Oximeter => self.oximeter.data = Default::default(),
            DeviceType::Sphygmometer => self.sphygmometer.data = Default::default(),
            DeviceType::Scale => self.scale.data = Default::default(),
            DeviceType::JumpRope => self.jump_rope.data = Default::default(),
            DeviceType::HeartRateBelt => self.heart_rate.data = Default::default(),
            DeviceType::None | DeviceType::AllDevices => {}
        }
    }

    /// Clear readings and status of a device type.
    pub fn reset(&mut self, device_type: DeviceType) {
        self.reset_data(device_type);
        if let Some(status) = self.status_mut(device_type) {
            *status = DeviceStatus::default();
        }
    }
}
