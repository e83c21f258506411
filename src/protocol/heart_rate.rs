//! Bluetooth SIG Heart Rate and Battery profile decoder.
//!
//! Heart-rate belts use the standard profiles, so this decoder ships with the
//! crate. Proprietary device protocols are supplied by the application.

use parking_lot::RwLock;
use tracing::trace;
use uuid::Uuid;

use crate::ble::advertising::AdvertisementData;
use crate::ble::uuids::{BATTERY_LEVEL_UUID, HEART_RATE_MEASUREMENT_UUID};
use crate::error::{Error, Result};
use crate::protocol::callbacks::{DeviceCallback, HeartRateCallback};
use crate::protocol::{DecodedIdentity, ProtocolDecoder};

/// Heart Rate Measurement flags bit 0: value is a u16.
const FLAG_VALUE_U16: u8 = 0x01;

/// Decoder for the Heart Rate Measurement (0x2A37) and Battery Level (0x2A19)
/// characteristics.
#[derive(Debug, Default)]
pub struct HeartRateProfileDecoder {
    attached: RwLock<Option<String>>,
}

impl HeartRateProfileDecoder {
    /// Create a decoder with no attached peripheral.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a Heart Rate Measurement value.
    pub fn parse_measurement(data: &[u8]) -> Result<u16> {
        let flags = *data.first().ok_or_else(|| Error::InvalidData {
            context: "Empty heart rate measurement".to_string(),
        })?;

        if flags & FLAG_VALUE_U16 != 0 {
            match data.get(1..3) {
                Some(bytes) => Ok(u16::from_le_bytes([bytes[0], bytes[1]])),
                None => Err(Error::InvalidData {
                    context: format!("Heart rate measurement too short: {} bytes", data.len()),
                }),
            }
        } else {
            data.get(1)
                .map(|value| u16::from(*value))
                .ok_or_else(|| Error::InvalidData {
                    context: format!("Heart rate measurement too short: {} bytes", data.len()),
                })
        }
    }
}

impl ProtocolDecoder for HeartRateProfileDecoder {
    fn extract_identity(
        &self,
        identifier: &str,
        advertisement: &AdvertisementData,
    ) -> Option<DecodedIdentity> {
        Some(DecodedIdentity {
            identifier: identifier.to_string(),
            name: advertisement.local_name.clone(),
            mac_address: None,
        })
    }

    fn parse(&self, characteristic: Uuid, data: &[u8]) -> Result<Option<DeviceCallback>> {
        let callback = if characteristic == HEART_RATE_MEASUREMENT_UUID {
            HeartRateCallback::HeartRate(Self::parse_measurement(data)?)
        } else if characteristic == BATTERY_LEVEL_UUID {
            let level = *data.first().ok_or_else(|| Error::InvalidData {
                context: "Empty battery level".to_string(),
            })?;
            HeartRateCallback::Battery(level)
        } else {
            trace!("Ignoring heart rate belt characteristic {}", characteristic);
            return Ok(None);
        };

        Ok(Some(DeviceCallback::HeartRate(callback)))
    }

    fn is_mine(&self, identifier: &str) -> bool {
        self.attached.read().as_deref() == Some(identifier)
    }

    fn attach(&self, identifier: &str) {
        *self.attached.write() = Some(identifier.to_string());
    }
}
