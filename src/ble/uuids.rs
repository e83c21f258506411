//! BLE Service and Characteristic UUIDs.
//!
//! Contains the UUID constants and per-device allow-lists used during
//! service and characteristic discovery.

use uuid::Uuid;

use crate::ble::DeviceType;

/// Expand a 16-bit Bluetooth SIG short UUID onto the base UUID.
pub const fn sig_uuid(short: u16) -> Uuid {
    Uuid::from_u128(((short as u128) << 96) | 0x0000_0000_0000_1000_8000_00805f9b34fb)
}

// Thermometer (AOJ-20A)
/// Thermometer vendor service UUID.
pub const THERMOMETER_SERVICE_UUID: Uuid = sig_uuid(0xFFE0);
/// Thermometer notify characteristic UUID (temperature, battery and error frames).
pub const THERMOMETER_NOTIFY_UUID: Uuid = sig_uuid(0xFFE1);
/// Thermometer write characteristic UUID.
pub const THERMOMETER_WRITE_UUID: Uuid = sig_uuid(0xFFE2);

// Oximeter (AOJ-70B)
/// Oximeter vendor service UUID.
pub const OXIMETER_SERVICE_UUID: Uuid = sig_uuid(0xFFF0);
/// Oximeter notify characteristic UUID.
pub const OXIMETER_NOTIFY_UUID: Uuid = sig_uuid(0xFFF1);

// Blood-pressure monitor (AOJ-30B)
/// Blood-pressure vendor service UUID.
pub const SPHYGMOMETER_SERVICE_UUID: Uuid = sig_uuid(0xFFB0);
/// Blood-pressure notify characteristic UUID.
pub const SPHYGMOMETER_NOTIFY_UUID: Uuid = sig_uuid(0xFFB2);

// Scale (AAA002)
/// Scale vendor service UUID.
pub const SCALE_SERVICE_UUID: Uuid = sig_uuid(0xFFE0);
/// Scale weight notify characteristic UUID.
pub const SCALE_NOTIFY_UUID: Uuid = sig_uuid(0xFFE1);

// Jump rope (QN-Rope)
/// Jump-rope vendor service UUID.
pub const JUMP_ROPE_SERVICE_UUID: Uuid = sig_uuid(0xFFC0);
/// Jump-rope write characteristic UUID (mode and query commands).
pub const JUMP_ROPE_WRITE_UUID: Uuid = sig_uuid(0xFFC1);
/// Jump-rope notify characteristic UUID (status frames).
pub const JUMP_ROPE_NOTIFY_UUID: Uuid = sig_uuid(0xFFC2);

// Heart-rate belt (Bluetooth SIG Heart Rate + Battery profiles)
/// Standard Heart Rate Service UUID.
pub const HEART_RATE_SERVICE_UUID: Uuid = sig_uuid(0x180D);
/// Standard Heart Rate Measurement characteristic UUID.
pub const HEART_RATE_MEASUREMENT_UUID: Uuid = sig_uuid(0x2A37);
/// Standard Battery Service UUID.
pub const BATTERY_SERVICE_UUID: Uuid = sig_uuid(0x180F);
/// Standard Battery Level characteristic UUID.
pub const BATTERY_LEVEL_UUID: Uuid = sig_uuid(0x2A19);

/// Thermometer query command written once the write characteristic is found.
pub const THERMOMETER_QUERY_COMMAND: [u8; 5] = [0xAA, 0x01, 0xD5, 0x00, 0xD4];

const JUMP_ROPE_SERVICES: [Uuid; 1] = [JUMP_ROPE_SERVICE_UUID];
const HEART_RATE_SERVICES: [Uuid; 2] = [HEART_RATE_SERVICE_UUID, BATTERY_SERVICE_UUID];

const THERMOMETER_CHARACTERISTICS: [Uuid; 2] = [THERMOMETER_NOTIFY_UUID, THERMOMETER_WRITE_UUID];
const OXIMETER_CHARACTERISTICS: [Uuid; 1] = [OXIMETER_NOTIFY_UUID];
const SPHYGMOMETER_CHARACTERISTICS: [Uuid; 1] = [SPHYGMOMETER_NOTIFY_UUID];
const JUMP_ROPE_CHARACTERISTICS: [Uuid; 2] = [JUMP_ROPE_WRITE_UUID, JUMP_ROPE_NOTIFY_UUID];
const HEART_RATE_CHARACTERISTICS: [Uuid; 2] = [BATTERY_LEVEL_UUID, HEART_RATE_MEASUREMENT_UUID];

/// Services to discover after connecting. `None` discovers every service.
pub fn service_filter(device_type: DeviceType) -> Option<&'static [Uuid]> {
    match device_type {
        DeviceType::JumpRope => Some(&JUMP_ROPE_SERVICES),
        DeviceType::HeartRateBelt => Some(&HEART_RATE_SERVICES),
        _ => None,
    }
}

/// Characteristics to discover on each service. `None` enumerates all of them.
pub fn characteristic_filter(device_type: DeviceType) -> Option<&'static [Uuid]> {
    match device_type {
        DeviceType::Thermometer => Some(&THERMOMETER_CHARACTERISTICS),
        DeviceType::Oximeter => Some(&OXIMETER_CHARACTERISTICS),
        DeviceType::Sphygmometer => Some(&SPHYGMOMETER_CHARACTERISTICS),
        DeviceType::JumpRope => Some(&JUMP_ROPE_CHARACTERISTICS),
        DeviceType::HeartRateBelt => Some(&HEART_RATE_CHARACTERISTICS),
        DeviceType::Scale | DeviceType::None | DeviceType::AllDevices => None,
    }
}

/// Characteristics on which notifications are enabled.
pub fn notify_characteristics(device_type: DeviceType) -> &'static [Uuid] {
    const THERMOMETER: [Uuid; 1] = [THERMOMETER_NOTIFY_UUID];
    const SCALE: [Uuid; 1] = [SCALE_NOTIFY_UUID];
    const JUMP_ROPE: [Uuid; 1] = [JUMP_ROPE_NOTIFY_UUID];
    match device_type {
        DeviceType::Thermometer => &THERMOMETER,
        DeviceType::Oximeter => &OXIMETER_CHARACTERISTICS,
        DeviceType::Sphygmometer => &SPHYGMOMETER_CHARACTERISTICS,
        DeviceType::Scale => &SCALE,
        DeviceType::JumpRope => &JUMP_ROPE,
        DeviceType::HeartRateBelt => &HEART_RATE_CHARACTERISTICS,
        DeviceType::None | DeviceType::AllDevices => &[],
    }
}
