//! Advertisement filtering.
//!
//! Decides for each advertisement whether it is noise, the peripheral a
//! reconnection is waiting for, or a candidate for the type being paired.

use tracing::trace;

use crate::ble::{Advertisement, DeviceType};

/// Default minimum signal strength for pairing candidates, in dBm.
pub const DEFAULT_RSSI_THRESHOLD: i16 = -60;

/// Why an advertisement was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    /// The peripheral has no name.
    Unnamed,
    /// The name does not match a known device, or the type is not targeted.
    NotTargeted,
    /// Signal weaker than the threshold, or unknown.
    WeakSignal,
}

/// Result of filtering one advertisement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryDecision {
    /// Drop the advertisement.
    Ignore(IgnoreReason),
    /// The peripheral a reconnection is waiting for.
    Reconnect(DeviceType),
    /// A pairing candidate of the given type.
    Candidate(DeviceType),
}

/// Peripheral a reconnection is scanning for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectTarget {
    /// Persisted identifier.
    pub identifier: String,
    /// Device type being reconnected.
    pub device_type: DeviceType,
}

/// Filter state: the targeted type, the signal threshold and the
/// reconnection hint.
#[derive(Debug, Clone)]
pub struct DiscoveryFilter {
    target: DeviceType,
    rssi_threshold: i16,
    reconnect: Option<ReconnectTarget>,
}

impl Default for DiscoveryFilter {
    fn default() -> Self {
        Self::new(DEFAULT_RSSI_THRESHOLD)
    }
}

impl DiscoveryFilter {
    /// Create a filter targeting nothing.
    pub fn new(rssi_threshold: i16) -> Self {
        Self {
            target: DeviceType::None,
            rssi_threshold,
            reconnect: None,
        }
    }

    /// Targeted device type.
    pub fn target(&self) -> DeviceType {
        self.target
    }

    /// Set the targeted device type.
    pub fn set_target(&mut self, target: DeviceType) {
        self.target = target;
    }

    /// Signal threshold in dBm.
    pub fn rssi_threshold(&self) -> i16 {
        self.rssi_threshold
    }

    /// Set the signal threshold in dBm.
    pub fn set_rssi_threshold(&mut self, threshold: i16) {
        self.rssi_threshold = threshold;
    }

    /// Current reconnection hint.
    pub fn reconnect_target(&self) -> Option<&ReconnectTarget> {
        self.reconnect.as_ref()
    }

    /// Wait for a specific peripheral. Replaces any previous hint.
    pub fn set_reconnect_target(&mut self, identifier: impl Into<String>, device_type: DeviceType) {
        self.reconnect = Some(ReconnectTarget {
            identifier: identifier.into(),
            device_type,
        });
    }

    /// Drop the reconnection hint, returning it.
    pub fn clear_reconnect_target(&mut self) -> Option<ReconnectTarget> {
        self.reconnect.take()
    }

    /// Classify an advertisement.
    pub fn evaluate(&self, advertisement: &Advertisement) -> DiscoveryDecision {
        let Some(name) = advertisement.name.as_deref() else {
            return DiscoveryDecision::Ignore(IgnoreReason::Unnamed);
        };

        if let Some(reconnect) = &self.reconnect {
            if reconnect.identifier == advertisement.identifier {
                return DiscoveryDecision::Reconnect(reconnect.device_type);
            }
        }

        let device_type = DeviceType::from_name(name);
        if !self.target.accepts(device_type) {
            return DiscoveryDecision::Ignore(IgnoreReason::NotTargeted);
        }

        match advertisement.rssi {
            Some(rssi) if rssi >= self.rssi_threshold => DiscoveryDecision::Candidate(device_type),
            rssi => {
                trace!(
                    "Ignoring {} ({}): rssi {:?} below {}",
                    name,
                    advertisement.identifier,
                    rssi,
                    self.rssi_threshold
                );
                DiscoveryDecision::Ignore(IgnoreReason::WeakSignal)
            }
        }
    }
}
