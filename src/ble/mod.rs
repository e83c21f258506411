//! BLE communication module.
//!
//! This module provides the Bluetooth Low Energy layer: device
//! classification, GATT identifiers, the transport interface and its
//! `btleplug` implementation, and the characteristic dispatch sequence.

pub mod advertising;
pub mod btleplug_transport;
pub mod characteristics;
pub mod connection;
pub mod device_type;
pub mod scanner;
pub mod transport;
pub mod uuids;

pub use advertising::{Advertisement, AdvertisementData};
pub use btleplug_transport::BtleplugTransport;
pub use characteristics::DispatchAction;
pub use connection::ConnectionState;
pub use device_type::DeviceType;
pub use scanner::BleScanner;
pub use transport::{AdapterState, BleTransport, DiscoveredCharacteristic, TransportEvent};
pub use uuids::*;
