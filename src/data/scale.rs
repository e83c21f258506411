//! Scale readings and body metrics.

use crate::protocol::ScaleCallback;

/// Biological sex used by the body-fat estimate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Gender {
    /// Male.
    Male,
    /// Female.
    Female,
}

impl Gender {
    fn factor(&self) -> f64 {
        match self {
            Self::Male => 1.0,
            Self::Female => 0.0,
        }
    }
}

/// Person the body metrics are computed for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BodyInfo {
    /// Height in centimetres.
    pub height_cm: u32,
    /// Age in years.
    pub age: u32,
    /// Gender.
    pub gender: Gender,
}

/// BMI category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum WeightCategory {
    /// BMI below 18.5.
    Underweight,
    /// BMI below 22.9.
    Normal,
    /// BMI below 24.9.
    Overweight,
    /// Anything higher.
    Obese,
}

impl WeightCategory {
    /// Category for a BMI value.
    pub fn from_bmi(bmi: f64) -> Self {
        if bmi < 18.5 {
            Self::Underweight
        } else if bmi < 22.9 {
            Self::Normal
        } else if bmi < 24.9 {
            Self::Overweight
        } else {
            Self::Obese
        }
    }
}

impl std::fmt::Display for WeightCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Underweight => write!(f, "Underweight"),
            Self::Normal => write!(f, "Normal"),
            Self::Overweight => write!(f, "Overweight"),
            Self::Obese => write!(f, "Obese"),
        }
    }
}

/// Latest scale reading.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ScaleModel {
    /// Name of the scale that produced the reading.
    pub peripheral_name: Option<String>,
    /// Weight in kilograms.
    pub weight: Option<f64>,
    /// Whether the reading has stabilised.
    pub is_final: Option<bool>,
}

impl ScaleModel {
    /// Body mass index for a height in centimetres. 0 for a zero height.
    pub fn bmi(&self, height_cm: u32) -> f64 {
        if height_cm == 0 {
            return 0.0;
        }
        let height_m = f64::from(height_cm) / 100.0;
        self.weight.unwrap_or(0.0) / (height_m * height_m)
    }

    /// Estimated body-fat percentage, never negative.
    pub fn body_fat(&self, body: &BodyInfo) -> f64 {
        if body.height_cm == 0 {
            return 0.0;
        }
        let fat = 1.39 * self.bmi(body.height_cm) + 0.16 * f64::from(body.age)
            - 10.34 * body.gender.factor()
            - 9.0;
        fat.max(0.0)
    }

    /// BMI category for a height in centimetres.
    pub fn weight_category(&self, height_cm: u32) -> WeightCategory {
        WeightCategory::from_bmi(self.bmi(height_cm))
    }

    pub(crate) fn apply(&mut self, callback: &ScaleCallback) {
        let ScaleCallback::Weight { weight, is_final } = *callback;
        self.weight = Some(weight);
        self.is_final = Some(is_final);
    }
}
