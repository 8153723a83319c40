//! Leverage common functionality across the quantum network simulator.

mod time;
pub use time::{nanos, DurationExt, SystemTimeExt};

/// Converts bytes to a hexadecimal string.
pub fn hex(bytes: &[u8]) -> String {
    let mut hex = String::new();
    for byte in bytes.iter() {
        hex.push_str(&format!("{:02x}", byte));
    }
    hex
}
