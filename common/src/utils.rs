//! Common Utilities
//! 
//! Provides utility functions used across the slot pipeline

use tracing::trace;

/// Convert a byte slice to hex string for debugging
pub fn bytes_to_hex(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Hex dump limited to the first `max` bytes, for trace logging of transport blocks
pub fn bytes_to_hex_prefix(data: &[u8], max: usize) -> String {
    let shown = data.len().min(max);
    let mut hex = bytes_to_hex(&data[..shown]);
    if data.len() > shown {
        hex.push_str(" ..");
    }
    trace!("hex dump of {} of {} bytes", shown, data.len());
    hex
}

/// Time utilities for slot/frame calculations
pub mod time {
    /// Frames per hyperframe (SFN range)
    pub const FRAMES_PER_HYPERFRAME: u32 = 1024;

    /// Subframes per frame
    pub const SUBFRAMES_PER_FRAME: u32 = 10;

    /// OFDM symbols per slot with normal cyclic prefix
    pub const SYMBOLS_PER_SLOT: usize = 14;

    /// Wrap a frame number into the hyperframe
    pub fn wrap_frame(frame: u32) -> u16 {
        (frame % FRAMES_PER_HYPERFRAME) as u16
    }

    /// Slot duration in microseconds for numerology `mu`
    pub fn slot_duration_us(mu: u8) -> f64 {
        1000.0 / (1u32 << mu) as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    
    #[test]
    fn test_bytes_to_hex() {
        let data = vec![0x12, 0x34, 0xAB, 0xCD];
        assert_eq!(bytes_to_hex(&data), "12 34 ab cd");
        assert_eq!(bytes_to_hex_prefix(&data, 2), "12 34 ..");
    }
    
    #[test]
    fn test_wrap_frame() {
        assert_eq!(time::wrap_frame(1023), 1023);
        assert_eq!(time::wrap_frame(1024), 0);
    }

    #[test]
    fn test_slot_duration() {
        assert_eq!(time::slot_duration_us(0), 1000.0);
        assert_eq!(time::slot_duration_us(1), 500.0);
        assert_eq!(time::slot_duration_us(4), 62.5);
    }
}
