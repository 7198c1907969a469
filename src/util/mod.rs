//! # Utility Modules
//!
//! Common helpers used throughout the mbus-master crate.

pub mod hex;

pub use hex::{decode_hex, encode_hex, format_hex_compact};
