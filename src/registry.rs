//! Registry of observed peripherals.
//!
//! Entries are unique by identifier, kept in first-seen order, and are
//! updated in place but never removed for the lifetime of the registry.

use crate::ble::DeviceType;

/// Cached metadata for one peripheral.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PeripheralEntry {
    /// Transport identifier.
    pub identifier: String,
    /// Classified device type.
    pub device_type: DeviceType,
    /// Advertised name.
    pub name: String,
    /// Last signal strength.
    pub rssi: Option<i16>,
    /// Whether the transport reported the peripheral connected.
    pub is_connected: bool,
    /// MAC address, when known.
    pub mac_address: Option<String>,
}

impl PeripheralEntry {
    /// Create an unconnected entry.
    pub fn new(
        identifier: impl Into<String>,
        device_type: DeviceType,
        name: impl Into<String>,
    ) -> Self {
        Self {
            identifier: identifier.into(),
            device_type,
            name: name.into(),
            rssi: None,
            is_connected: false,
            mac_address: None,
        }
    }

    /// Set the signal strength.
    pub fn with_rssi(mut self, rssi: Option<i16>) -> Self {
        self.rssi = rssi;
        self
    }
}

/// Deduplicated, ordered list of peripherals.
#[derive(Debug, Clone, Default)]
pub struct DeviceRegistry {
    entries: Vec<PeripheralEntry>,
}

impl DeviceRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entry unless one with the same identifier exists.
    ///
    /// Returns `true` if the entry was added.
    pub fn add_unique(&mut self, entry: PeripheralEntry) -> bool {
        if self.contains(&entry.identifier) {
            return false;
        }
        self.entries.push(entry);
        true
    }

    /// Mutate the entry with the given identifier.
    ///
    /// Returns `false` if no such entry exists.
    pub fn update(&mut self, identifier: &str, update: impl FnOnce(&mut PeripheralEntry)) -> bool {
        match self.entries.iter_mut().find(|e| e.identifier == identifier) {
            Some(entry) => {
                update(entry);
                true
            }
            None => false,
        }
    }

    /// Whether an entry with the identifier exists.
    pub fn contains(&self, identifier: &str) -> bool {
        self.get(identifier).is_some()
    }

    /// Entry by identifier.
    pub fn get(&self, identifier: &str) -> Option<&PeripheralEntry> {
        self.entries.iter().find(|e| e.identifier == identifier)
    }

    /// First entry of a device type.
    pub fn first_of_type(&self, device_type: DeviceType) -> Option<&PeripheralEntry> {
        self.entries.iter().find(|e| e.device_type == device_type)
    }

    /// Entries in first-seen order.
    pub fn entries(&self) -> &[PeripheralEntry] {
        &self.entries
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
