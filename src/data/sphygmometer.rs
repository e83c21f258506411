//! Blood-pressure readings.

use crate::protocol::SphygmometerCallback;

/// Latest blood-pressure readings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SphygmometerModel {
    /// Cuff pressure during measurement, mmHg.
    pub pressure: Option<u16>,
    /// Pulse detected flag during measurement.
    pub pulse_status: Option<u8>,
    /// Final systolic pressure, mmHg.
    pub systolic: Option<u16>,
    /// Final diastolic pressure, mmHg.
    pub diastolic: Option<u16>,
    /// Final pulse rate.
    pub pulse: Option<u16>,
    /// Irregular pulse flag.
    pub irregular_pulse: Option<u8>,
}

impl SphygmometerModel {
    /// Whether the final result flagged an irregular pulse.
    pub fn has_irregular_pulse(&self) -> bool {
        self.irregular_pulse.map_or(false, |flag| flag != 0)
    }

    pub(crate) fn apply(&mut self, callback: &SphygmometerCallback) {
        match *callback {
            SphygmometerCallback::InstantData {
                pressure,
                pulse_status,
            } => {
                self.pressure = Some(pressure);
                self.pulse_status = Some(pulse_status);
            }
            SphygmometerCallback::FinalData {
                systolic,
                diastolic,
                pulse,
                irregular_pulse,
            } => {
                self.systolic = Some(systolic);
                self.diastolic = Some(diastolic);
                self.pulse = Some(pulse);
                self.irregular_pulse = Some(irregular_pulse);
            }
        }
    }
}
