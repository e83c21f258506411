//! Thermometer readings.

use crate::protocol::ThermometerCallback;
use crate::utils::celsius_to_fahrenheit;

/// Latest thermometer readings.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ThermometerModel {
    /// Battery description.
    pub battery: Option<String>,
    /// Temperature in degrees Celsius.
    pub temperature: Option<f64>,
    /// Measurement mode code.
    pub mode_code: Option<i32>,
    /// Measurement mode description.
    pub mode_description: Option<String>,
}

impl ThermometerModel {
    /// Temperature in degrees Fahrenheit.
    pub fn temperature_fahrenheit(&self) -> Option<f64> {
        self.temperature.map(celsius_to_fahrenheit)
    }

    /// Fold a callback into the model.
    ///
    /// A battery report starts a fresh model holding only the battery.
    pub(crate) fn apply(&mut self, callback: &ThermometerCallback) {
        match callback {
            ThermometerCallback::Temperature {
                temperature,
                mode,
                mode_description,
            } => {
                self.temperature = Some(*temperature);
                self.mode_code = Some(*mode);
                self.mode_description = Some(mode_description.clone());
            }
            ThermometerCallback::Battery { description, .. } => {
                *self = Self {
                    battery: Some(description.clone()),
                    ..Self::default()
                };
            }
            ThermometerCallback::Error { .. } => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_temperature_then_battery() {
        let mut model = ThermometerModel::default();
        model.apply(&ThermometerCallback::Temperature {
            temperature: 37.0,
            mode: 1,
            mode_description: "Body".to_string(),
        });
        assert_eq!(model.temperature, Some(37.0));
        assert!((model.temperature_fahrenheit().unwrap() - 98.6).abs() < 0.001);

        model.apply(&ThermometerCallback::Battery {
            level: 2,
            description: "Normal".to_string(),
        });
        assert_eq!(model.temperature, None);
        assert_eq!(model.battery.as_deref(), Some("Normal"));
    }
}
