//! Heart-rate belt readings and recording statistics.

use crate::data::log::SampleLog;
use crate::protocol::HeartRateCallback;
use crate::utils::round_to;

/// Latest heart rate and the recorded history.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct HeartRateModel {
    /// Peripheral name.
    pub peripheral_name: Option<String>,
    /// Latest heart rate in beats per minute.
    pub heart_rate: Option<u16>,
    /// Battery percentage.
    pub battery: Option<u8>,
    /// Heart rate sampled once per second while recording.
    pub history: SampleLog<u16>,
}

impl HeartRateModel {
    /// Sum of recorded heart rates.
    pub fn total(&self) -> u64 {
        self.history.values().map(|&v| u64::from(v)).sum()
    }

    /// Highest recorded heart rate.
    pub fn max(&self) -> Option<u16> {
        self.history.values().copied().max()
    }

    /// Lowest recorded heart rate.
    pub fn min(&self) -> Option<u16> {
        self.history.values().copied().min()
    }

    /// Average recorded heart rate, rounded to two decimals.
    pub fn average(&self) -> Option<f64> {
        if self.history.is_empty() {
            return None;
        }
        Some(round_to(self.total() as f64 / self.history.len() as f64, 2))
    }

    /// Seconds recorded in the current session.
    pub fn recorded_seconds(&self) -> usize {
        self.history.len()
    }

    pub(crate) fn apply(&mut self, callback: &HeartRateCallback) {
        match *callback {
            HeartRateCallback::HeartRate(rate) => self.heart_rate = Some(rate),
            HeartRateCallback::Battery(level) => self.battery = Some(level),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn recorded(values: &[u16]) -> HeartRateModel {
        let mut model = HeartRateModel::default();
        let now = Utc::now();
        for (i, v) in values.iter().enumerate() {
            model.history.push(now + chrono::Duration::seconds(i as i64), *v);
        }
        model
    }

    #[test]
    fn test_empty_statistics() {
        let model = HeartRateModel::default();
        assert_eq!(model.min(), None);
        assert_eq!(model.max(), None);
        assert_eq!(model.average(), None);
        assert_eq!(model.total(), 0);
    }

    #[test]
    fn test_statistics() {
        let model = recorded(&[70, 72, 75]);
        assert_eq!(model.min(), Some(70));
        assert_eq!(model.max(), Some(75));
        assert_eq!(model.total(), 217);
        assert_eq!(model.average(), Some(72.33));
        assert_eq!(model.recorded_seconds(), 3);
    }

    #[test]
    fn test_battery_keeps_history() {
        let mut model = recorded(&[80]);
        model.apply(&HeartRateCallback::Battery(55));
        assert_eq!(model.battery, Some(55));
        assert_eq!(model.recorded_seconds(), 1);
    }
}
