// Allow holding locks across await points - we use parking_lot which is designed for this
#![allow(clippy::await_holding_lock)]
// Allow derivable impls for clarity
#![allow(clippy::derivable_impls)]
// Allow unusual byte groupings for UUIDs which have standard format
#![allow(clippy::unusual_byte_groupings)]

//! # ired-ble
//!
//! A cross-platform Rust library for pairing, connecting and recording iREd
//! biometric peripherals over Bluetooth Low Energy.
//!
//! Supported device families:
//!
//! - **Clinical**: thermometer, pulse oximeter, blood-pressure cuff, scale
//! - **Activity**: jump rope, heart-rate belt (and the scale)
//!
//! ## Features
//!
//! - **Pairing**: Scan for one device type, filter by signal strength, and
//!   persist the identity of the first valid candidate
//! - **Reconnection**: Connect again to exactly the persisted peripheral
//! - **Characteristic Dispatch**: Per-type subscriptions and initial commands
//! - **Recording**: Once-per-second sampling of jump count and heart rate
//! - **Statistics**: Oximeter averages, heart-rate summary, BMI and body fat
//! - **Observers**: Lifecycle, clinical and activity callbacks plus a
//!   broadcast channel of every session event
//!
//! Byte-level decoding of the proprietary protocols is supplied by the
//! application through [`protocol::ProtocolDecoder`]. The standard Heart
//! Rate and Battery profiles are decoded by the crate.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use ired_ble::{DeviceManager, DeviceType, Result};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let manager = DeviceManager::new().await?;
//!
//!     // Pair the first heart-rate belt in range
//!     manager.start_pairing(DeviceType::HeartRateBelt).await?;
//!     tokio::time::sleep(std::time::Duration::from_secs(10)).await;
//!
//!     if let Some(identity) = manager.paired_identity(DeviceType::HeartRateBelt)? {
//!         manager.connect(&identity.identifier).await?;
//!     }
//!
//!     tokio::time::sleep(std::time::Duration::from_secs(5)).await;
//!     if let Some(rate) = manager.device_data().heart_rate.data.heart_rate {
//!         println!("Heart rate: {} bpm", rate);
//!     }
//!
//!     manager.shutdown().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Platform Notes
//!
//! ### macOS
//! Requires Bluetooth permission. Add `NSBluetoothAlwaysUsageDescription`
//! to your Info.plist for bundled apps.
//!
//! ### Linux
//! Requires BlueZ. User may need to be in the `bluetooth` group.
//!
//! ### Windows
//! Requires Windows 10 or later with Bluetooth LE support.
//!
//! ## Feature Flags
//!
//! - `serde`: Serialization for data types and the JSON file identity store

// Public modules
pub mod ble;
pub mod config;
pub mod data;
pub mod device_manager;
pub mod discovery;
pub mod error;
pub mod fanout;
pub mod identity;
pub mod orchestrator;
pub mod protocol;
pub mod recording;
pub mod registry;
pub mod scheduler;
pub mod utils;

// Re-exports for convenience
pub use config::ManagerConfig;
pub use device_manager::{DeviceManager, DeviceManagerBuilder};
pub use error::{Error, Result};
pub use fanout::{
    BleObserver, CallbackHandle, DeviceEvent, HealthObserver, Observers, SessionEvent,
    SportObserver,
};
pub use identity::{IdentityStore, MemoryIdentityStore, PairedIdentity};
pub use orchestrator::Orchestrator;
pub use recording::RecordingMode;
pub use registry::PeripheralEntry;
pub use utils::celsius_to_fahrenheit;

#[cfg(feature = "serde")]
pub use identity::JsonFileIdentityStore;

// Re-export commonly used types from submodules
pub use ble::{AdapterState, ConnectionState, DeviceType};
pub use data::{
    DeviceData, DeviceSnapshot, DeviceStatus, HeartRateModel, JumpRopeModel, MeasurementState,
    OximeterModel, ScaleModel, SphygmometerModel, ThermometerModel,
};
pub use protocol::{DecoderSet, DeviceCallback, ProtocolDecoder};
