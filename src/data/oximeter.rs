//! Pulse oximeter readings and statistics.
//!
//! Oximeters report out-of-band values when no finger is detected: pulse 255
//! and SpO2 127. Displayed values normalize both to 0. The raw series keep
//! them and each statistic treats them in its own way.

use crate::protocol::OximeterCallback;

/// Pulse value meaning "no signal".
pub const PULSE_NO_SIGNAL: u8 = 255;

/// SpO2 value meaning "no finger detected".
pub const SPO2_NO_SIGNAL: u8 = 127;

/// Normal SpO2 range in percent.
pub const SPO2_NORMAL_RANGE: std::ops::RangeInclusive<u32> = 95..=100;

/// Normal resting pulse range in beats per minute.
pub const BPM_NORMAL_RANGE: std::ops::RangeInclusive<u32> = 60..=100;

/// Normal perfusion index range in percent.
pub const PI_NORMAL_RANGE: std::ops::RangeInclusive<f64> = 0.2..=20.0;

/// Latest oximeter readings plus the raw series of the current session.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct OximeterModel {
    /// Battery percentage.
    pub battery: Option<u8>,
    /// Latest pulse-wave frame.
    pub pulse_wave: Option<Vec<u8>>,
    /// Latest pulse, 0 when there is no signal.
    pub pulse: Option<u8>,
    /// Latest SpO2, 0 when there is no signal.
    pub spo2: Option<u8>,
    /// Latest perfusion index.
    pub pi: Option<f64>,
    /// Raw SpO2 readings.
    pub spo2_readings: Vec<u8>,
    /// Raw pulse readings.
    pub bpm_readings: Vec<u8>,
    /// Perfusion index readings.
    pub pi_readings: Vec<f64>,
    /// Accumulated plethysmography waveform.
    pub plethysmography: Vec<u8>,
}

impl OximeterModel {
    /// Average SpO2. "No signal" readings count as 0; empty gives 0.
    pub fn average_spo2(&self) -> u32 {
        if self.spo2_readings.is_empty() {
            return 0;
        }
        let total: u32 = self
            .spo2_readings
            .iter()
            .map(|&v| if v == SPO2_NO_SIGNAL { 0 } else { u32::from(v) })
            .sum();
        total / self.spo2_readings.len() as u32
    }

    /// Average pulse. "No signal" readings are excluded; none left gives 0.
    pub fn average_bpm(&self) -> u32 {
        let valid: Vec<u32> = self
            .bpm_readings
            .iter()
            .filter(|&&v| v != PULSE_NO_SIGNAL)
            .map(|&v| u32::from(v))
            .collect();
        if valid.is_empty() {
            return 0;
        }
        valid.iter().sum::<u32>() / valid.len() as u32
    }

    /// Average perfusion index, `None` without readings.
    pub fn average_pi(&self) -> Option<f64> {
        if self.pi_readings.is_empty() {
            return None;
        }
        Some(self.pi_readings.iter().sum::<f64>() / self.pi_readings.len() as f64)
    }

    /// Summary of the session, `None` until every series has readings.
    pub fn summary(&self) -> Option<OximeterSummary> {
        if self.spo2_readings.is_empty() || self.bpm_readings.is_empty() {
            return None;
        }
        let pi = self.average_pi()?;
        let spo2 = self.average_spo2();
        let bpm = self.average_bpm();

        Some(OximeterSummary {
            spo2,
            bpm,
            pi,
            assessment: OximeterAssessment::evaluate(spo2, bpm, pi),
        })
    }

    pub(crate) fn apply(&mut self, callback: &OximeterCallback) {
        match callback {
            OximeterCallback::Battery {
                percentage,
                pulse_wave,
            } => {
                self.battery = Some(*percentage);
                self.plethysmography.extend_from_slice(pulse_wave);
                self.pulse_wave = Some(pulse_wave.clone());
            }
            OximeterCallback::Measurement { pulse, spo2, pi } => {
                self.pulse = Some(if *pulse == PULSE_NO_SIGNAL { 0 } else { *pulse });
                self.spo2 = Some(if *spo2 == SPO2_NO_SIGNAL { 0 } else { *spo2 });
                self.pi = Some(*pi);
                self.spo2_readings.push(*spo2);
                self.bpm_readings.push(*pulse);
                self.pi_readings.push(*pi);
            }
        }
    }
}

/// Outcome of comparing session averages with the normal ranges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum OximeterAssessment {
    /// Every average is within range.
    Healthy,
    /// SpO2 below range.
    LowSpo2,
    /// Pulse below range.
    LowBpm,
    /// Perfusion index below range.
    LowPi,
    /// SpO2 above range.
    HighSpo2,
    /// Pulse above range.
    HighBpm,
    /// Perfusion index above range.
    HighPi,
}

impl OximeterAssessment {
    /// Assess averages. Low readings are reported before high ones.
    pub fn evaluate(spo2: u32, bpm: u32, pi: f64) -> Self {
        if SPO2_NORMAL_RANGE.contains(&spo2)
            && BPM_NORMAL_RANGE.contains(&bpm)
            && PI_NORMAL_RANGE.contains(&pi)
        {
            Self::Healthy
        } else if spo2 < *SPO2_NORMAL_RANGE.start() {
            Self::LowSpo2
        } else if bpm < *BPM_NORMAL_RANGE.start() {
            Self::LowBpm
        } else if pi < *PI_NORMAL_RANGE.start() {
            Self::LowPi
        } else if spo2 > *SPO2_NORMAL_RANGE.end() {
            Self::HighSpo2
        } else if bpm > *BPM_NORMAL_RANGE.end() {
            Self::HighBpm
        } else {
            Self::HighPi
        }
    }
}

impl std::fmt::Display for OximeterAssessment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let advice = "You have to seek medical attention as soon as possible.";
        match self {
            Self::Healthy => write!(f, "Your Body is healthy"),
            Self::LowSpo2 => write!(f, "Your SpO2 is lower than normal. {}", advice),
            Self::LowBpm => write!(
                f,
                "Your resting heart rate is lower than normal range. {}",
                advice
            ),
            Self::LowPi => write!(f, "Your resting Pi is lower than normal range. {}", advice),
            Self::HighSpo2 => write!(f, "Your SpO2 is higher than normal. {}", advice),
            Self::HighBpm => write!(
                f,
                "Your resting heart rate is higher than normal range. {}",
                advice
            ),
            Self::HighPi => write!(f, "Your resting Pi is higher than normal range. {}", advice),
        }
    }
}

/// Session averages and their assessment.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct OximeterSummary {
    /// Average SpO2 in percent.
    pub spo2: u32,
    /// Average pulse in beats per minute.
    pub bpm: u32,
    /// Average perfusion index in percent.
    pub pi: f64,
    /// Assessment of the averages.
    pub assessment: OximeterAssessment,
}

impl std::fmt::Display for OximeterSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "SpO2: {}% (95-100%)", self.spo2)?;
        writeln!(f, "Heart Rate: {}bpm (60-100bpm)", self.bpm)?;
        writeln!(f, "PI: {:.1}% (0.2-20%)", self.pi)?;
        write!(f, "{}", self.assessment)
    }
}
