//! Session configuration.

use std::time::Duration;

use crate::discovery::DEFAULT_RSSI_THRESHOLD;

/// Tunables for the device manager.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct ManagerConfig {
    /// Minimum signal strength for pairing candidates, in dBm.
    pub rssi_threshold: i16,
    /// Interval between recording samples.
    pub sample_interval: Duration,
    /// Delay between sending a recording mode and starting to sample.
    pub recording_settle_delay: Duration,
    /// How long a thermometer reading shows as completed.
    pub thermometer_completed_pulse: Duration,
    /// Delay after a blood-pressure instant reading before clearing a
    /// completed flag.
    pub sphygmometer_completed_pulse: Duration,
    /// Window during which repeated jump-rope MAC advertisements are ignored.
    pub mac_latch_window: Duration,
    /// Give up on a connection attempt after this long. `None` waits forever.
    pub connect_timeout: Option<Duration>,
    /// Capacity of the session event broadcast channel.
    pub event_channel_capacity: usize,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            rssi_threshold: DEFAULT_RSSI_THRESHOLD,
            sample_interval: Duration::from_secs(1),
            recording_settle_delay: Duration::from_secs(1),
            thermometer_completed_pulse: Duration::from_millis(300),
            sphygmometer_completed_pulse: Duration::from_secs(1),
            mac_latch_window: Duration::from_secs(2),
            connect_timeout: None,
            event_channel_capacity: 64,
        }
    }
}

impl ManagerConfig {
    /// Set the signal threshold.
    pub fn with_rssi_threshold(mut self, threshold: i16) -> Self {
        self.rssi_threshold = threshold;
        self
    }

    /// Set the sample interval.
    pub fn with_sample_interval(mut self, interval: Duration) -> Self {
        self.sample_interval = interval;
        self
    }

    /// Set the recording settle delay.
    pub fn with_recording_settle_delay(mut self, delay: Duration) -> Self {
        self.recording_settle_delay = delay;
        self
    }

    /// Set the jump-rope MAC latch window.
    pub fn with_mac_latch_window(mut self, window: Duration) -> Self {
        self.mac_latch_window = window;
        self
    }

    /// Enable a connection timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Set the event channel capacity.
    pub fn with_event_channel_capacity(mut self, capacity: usize) -> Self {
        self.event_channel_capacity = capacity.max(1);
        self
    }
}
