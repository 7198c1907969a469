//! # Hex helpers
//!
//! Frame dumps in log output and telegrams written down as hex strings, the
//! way they appear in meter documentation and bus traces.
//!
//! ```rust
//! use mbus_master::util::hex::{decode_hex, encode_hex, format_hex_compact};
//!
//! let header = [0x68, 0x31, 0x31, 0x68];
//! assert_eq!(encode_hex(&header), "68313168");
//! assert_eq!(decode_hex("68 31 31 68").unwrap(), header);
//! assert_eq!(format_hex_compact(&header), "68 31 31 68");
//! ```

use crate::error::MBusError;

/// Bytes as one uppercase hex string without separators.
pub fn encode_hex(data: &[u8]) -> String {
    hex::encode_upper(data)
}

/// Parses a telegram trace. Case is ignored and whitespace (spaces, line
/// breaks of a multi-line dump) is skipped.
pub fn decode_hex(trace: &str) -> Result<Vec<u8>, MBusError> {
    let digits: String = trace.split_whitespace().collect();
    if digits.is_empty() {
        return Err(MBusError::InvalidHexString);
    }
    hex::decode(digits).map_err(|_| MBusError::InvalidHexString)
}

/// Space separated bytes for log lines, e.g. `10 5B 01 5C 16`.
pub fn format_hex_compact(data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len() * 3);
    for (i, byte) in data.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        out.push_str(&format!("{byte:02X}"));
    }
    out
}
