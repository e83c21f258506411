//! Utility functions for the ired-ble crate.

/// Manufacturer-data offset of the MAC address in scale advertisements.
pub const SCALE_MAC_OFFSET: usize = 2;

/// Manufacturer-data offset of the MAC address in jump-rope advertisements.
pub const JUMP_ROPE_MAC_OFFSET: usize = 4;

/// Extract a MAC address from advertised manufacturer data.
///
/// Six bytes are read starting at `offset`, reversed (the address is
/// advertised little-endian) and formatted as colon-separated hex.
///
/// # Returns
///
/// `None` if `data` is too short.
///
/// # Example
///
/// ```
/// use ired_ble::utils::extract_mac_address;
///
/// let data = [0x00, 0x00, 0x66, 0x55, 0x44, 0x33, 0x22, 0x11];
/// assert_eq!(extract_mac_address(&data, 2).as_deref(), Some("11:22:33:44:55:66"));
/// ```
pub fn extract_mac_address(data: &[u8], offset: usize) -> Option<String> {
    let bytes = data.get(offset..offset.checked_add(6)?)?;
    let parts: Vec<String> = bytes.iter().rev().map(|b| format!("{:02X}", b)).collect();
    Some(parts.join(":"))
}

/// Round to a fixed number of decimal places.
#[inline]
pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

/// Convert Celsius to Fahrenheit.
#[inline]
pub fn celsius_to_fahrenheit(celsius: f64) -> f64 {
    celsius * 9.0 / 5.0 + 32.0
}
