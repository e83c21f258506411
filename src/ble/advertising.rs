//! Advertisement data.
//!
//! Transport-neutral copy of the fields a peripheral advertises. Decoders
//! read identity and (for scales) weight readings from these fields.

use std::collections::HashMap;
use uuid::Uuid;

/// Fields received in one advertisement.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AdvertisementData {
    /// Advertised local name.
    pub local_name: Option<String>,
    /// Manufacturer-specific data keyed by company identifier.
    pub manufacturer_data: HashMap<u16, Vec<u8>>,
    /// Service data keyed by service UUID.
    pub service_data: HashMap<Uuid, Vec<u8>>,
    /// Advertised service UUIDs.
    pub services: Vec<Uuid>,
    /// Advertised transmit power in dBm.
    pub tx_power_level: Option<i16>,
}

impl AdvertisementData {
    /// Create advertisement data carrying only a local name.
    pub fn with_name(name: impl Into<String>) -> Self {
        Self {
            local_name: Some(name.into()),
            ..Self::default()
        }
    }

    /// Add a manufacturer data record.
    pub fn with_manufacturer_data(mut self, company_id: u16, data: Vec<u8>) -> Self {
        self.manufacturer_data.insert(company_id, data);
        self
    }

    /// First manufacturer data record, regardless of company identifier.
    ///
    /// Vendors in this family advertise a single record and do not use a
    /// registered company identifier, so the key carries no meaning.
    pub fn first_manufacturer_data(&self) -> Option<&[u8]> {
        self.manufacturer_data
            .iter()
            .min_by_key(|(company_id, _)| **company_id)
            .map(|(_, data)| data.as_slice())
    }
}

/// One advertisement as reported by the transport.
#[derive(Debug, Clone, PartialEq)]
pub struct Advertisement {
    /// Transport identifier of the peripheral.
    pub identifier: String,
    /// Peripheral name (GAP name, falling back to the advertised local name).
    pub name: Option<String>,
    /// Advertised fields.
    pub data: AdvertisementData,
    /// Signal strength in dBm.
    pub rssi: Option<i16>,
}
