//! Protocol decoders.
//!
//! Byte-level decoding of each peripheral's payloads lives behind
//! [`ProtocolDecoder`]. This module contains:
//! - The typed callbacks decoders produce
//! - The decoder trait and the per-type decoder set
//! - A decoder for the standard Heart Rate and Battery profiles

pub mod callbacks;
pub mod heart_rate;

use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::ble::advertising::AdvertisementData;
use crate::ble::DeviceType;
use crate::error::Result;

pub use callbacks::{
    DeviceCallback, HeartRateCallback, JumpRopeMode, JumpRopeState, JumpRopeStatus,
    OximeterCallback, ScaleCallback, SphygmometerCallback, ThermometerCallback,
};
pub use heart_rate::HeartRateProfileDecoder;

/// Identity a decoder extracted from an advertisement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedIdentity {
    /// Device identifier as the protocol reports it. Only checked for
    /// presence; the stored identity always uses the advertising
    /// peripheral's transport identifier.
    pub identifier: String,
    /// Display name.
    pub name: Option<String>,
    /// MAC address, when the advertisement carries one.
    pub mac_address: Option<String>,
}

impl DecodedIdentity {
    /// An identity is usable only with a non-empty identifier.
    pub fn is_valid(&self) -> bool {
        !self.identifier.trim().is_empty()
    }
}

/// Commands the orchestrator asks a decoder to encode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceCommand {
    /// Ask the device for its battery level.
    QueryBattery,
    /// Put the jump rope into a mode. `setting` is seconds or a jump target.
    SetJumpRopeMode {
        /// Mode to enter.
        mode: JumpRopeMode,
        /// Mode parameter.
        setting: u32,
    },
    /// Leave the current jump-rope mode.
    StopMode,
}

/// Decoder for one device type's proprietary protocol.
#[cfg_attr(test, mockall::automock)]
pub trait ProtocolDecoder: Send + Sync {
    /// Extract the identity to persist when pairing with this peripheral.
    ///
    /// `None` (or an identity with an empty identifier) rejects the candidate.
    fn extract_identity(
        &self,
        identifier: &str,
        advertisement: &AdvertisementData,
    ) -> Option<DecodedIdentity>;

    /// Decode a characteristic value. `Ok(None)` means the frame carried
    /// nothing of interest.
    fn parse(&self, characteristic: Uuid, data: &[u8]) -> Result<Option<DeviceCallback>>;

    /// Whether the peripheral is the one this decoder is attached to.
    fn is_mine(&self, identifier: &str) -> bool;

    /// Called when a peripheral of this type connects.
    fn attach(&self, _identifier: &str) {}

    /// Decode a reading carried in advertisement data.
    fn parse_advertisement(&self, _advertisement: &AdvertisementData) -> Option<DeviceCallback> {
        None
    }

    /// Encode a command for the device's write characteristic.
    fn encode_command(&self, _command: &DeviceCommand) -> Option<Vec<u8>> {
        None
    }
}

/// Decoders keyed by device type.
#[derive(Clone, Default)]
pub struct DecoderSet {
    decoders: HashMap<DeviceType, Arc<dyn ProtocolDecoder>>,
}

impl DecoderSet {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a set holding the bundled heart-rate profile decoder.
    pub fn with_standard_profiles() -> Self {
        Self::new().with(DeviceType::HeartRateBelt, HeartRateProfileDecoder::new())
    }

    /// Register a decoder, replacing any previous one for the type.
    pub fn with(
        mut self,
        device_type: DeviceType,
        decoder: impl ProtocolDecoder + 'static,
    ) -> Self {
        self.insert(device_type, Arc::new(decoder));
        self
    }

    /// Register a shared decoder.
    pub fn insert(&mut self, device_type: DeviceType, decoder: Arc<dyn ProtocolDecoder>) {
        self.decoders.insert(device_type, decoder);
    }

    /// Decoder for a type.
    pub fn get(&self, device_type: DeviceType) -> Option<&Arc<dyn ProtocolDecoder>> {
        self.decoders.get(&device_type)
    }

    /// Whether a decoder is registered for the type.
    pub fn contains(&self, device_type: DeviceType) -> bool {
        self.decoders.contains_key(&device_type)
    }
}

impl std::fmt::Debug for DecoderSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut types: Vec<_> = self.decoders.keys().collect();
        types.sort();
        f.debug_struct("DecoderSet").field("types", &types).finish()
    }
}
