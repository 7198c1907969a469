//! Secondary Addressing Implementation for M-Bus (EN 13757-2 Section 5.3)
//!
//! This module implements secondary addressing for M-Bus devices, allowing
//! communication with devices using their 8-byte unique identifiers instead
//! of primary addresses (1-250).
//!
//! A secondary address doubles as a selection mask: every `F` nibble is a
//! wildcard. The canonical text form is 16 hexadecimal characters,
//! identification number first (`12345678` + manufacturer `FFFF` + version `FF`
//! + medium `FF`), matching the order used by common M-Bus tools.

use std::fmt;
use std::str::FromStr;

use nom::{bytes::complete::take, IResult};
use serde::Serialize;

use crate::error::MBusError;
use crate::payload::data_encoding::mbus_decode_manufacturer;

/// Number of BCD digits in the identification number.
pub const ID_DIGITS: usize = 8;

/// 8-byte secondary address as defined in EN 13757-2
/// Contains device identification, manufacturer, version, and medium
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct SecondaryAddress {
    /// Identification number, one BCD digit per nibble (`0x12345678` is "12345678")
    pub device_id: u32,
    /// Manufacturer code (2 bytes, little-endian on the wire)
    pub manufacturer: u16,
    /// Version number (1 byte)
    pub version: u8,
    /// Medium / device type code (1 byte)
    pub medium: u8,
}

impl SecondaryAddress {
    /// Create a new secondary address
    pub fn new(device_id: u32, manufacturer: u16, version: u8, medium: u8) -> Self {
        Self {
            device_id,
            manufacturer,
            version,
            medium,
        }
    }

    /// The mask matching every device on the bus.
    pub fn wildcard() -> Self {
        Self::new(u32::MAX, u16::MAX, u8::MAX, u8::MAX)
    }

    /// Convert secondary address to 8-byte array (little-endian format)
    pub fn to_bytes(&self) -> [u8; 8] {
        let mut bytes = [0u8; 8];
        bytes[0..4].copy_from_slice(&self.device_id.to_le_bytes());
        bytes[4..6].copy_from_slice(&self.manufacturer.to_le_bytes());
        bytes[6] = self.version;
        bytes[7] = self.medium;
        bytes
    }

    /// Create secondary address from 8-byte array (little-endian format)
    pub fn from_bytes(data: &[u8]) -> Result<Self, MBusError> {
        if data.len() < 8 {
            return Err(MBusError::InvalidSecondaryAddress(format!(
                "requires 8 bytes, got {}",
                data.len()
            )));
        }

        Ok(SecondaryAddress {
            device_id: u32::from_le_bytes([data[0], data[1], data[2], data[3]]),
            manufacturer: u16::from_le_bytes([data[4], data[5]]),
            version: data[6],
            medium: data[7],
        })
    }

    /// All 16 nibbles in text order (identification number first).
    fn nibbles(&self) -> [u8; 16] {
        let mut out = [0u8; 16];
        let packed = ((self.device_id as u64) << 32)
            | ((self.manufacturer as u64) << 16)
            | ((self.version as u64) << 8)
            | self.medium as u64;
        for (i, nibble) in out.iter_mut().enumerate() {
            *nibble = ((packed >> (60 - 4 * i)) & 0x0F) as u8;
        }
        out
    }

    /// True if any nibble is a wildcard.
    pub fn is_wildcard(&self) -> bool {
        self.nibbles().contains(&0x0F)
    }

    /// Checks whether the literal address `address` is selected by this mask.
    pub fn matches(&self, address: &SecondaryAddress) -> bool {
        self.nibbles()
            .iter()
            .zip(address.nibbles().iter())
            .all(|(mask, value)| *mask == 0x0F || mask == value)
    }

    /// Index (0 = leftmost) of the first wildcard digit of the identification number.
    pub fn first_wildcard_digit(&self) -> Option<usize> {
        (0..ID_DIGITS).find(|&i| self.id_digit(i) == 0x0F)
    }

    /// Digit `index` (0 = leftmost) of the identification number.
    pub fn id_digit(&self, index: usize) -> u8 {
        ((self.device_id >> (28 - 4 * index)) & 0x0F) as u8
    }

    /// Copy of this mask with identification digit `index` fixed to `digit`.
    pub fn with_digit(&self, index: usize, digit: u8) -> Self {
        let shift = 28 - 4 * index as u32;
        let device_id = (self.device_id & !(0x0F << shift)) | (((digit & 0x0F) as u32) << shift);
        Self { device_id, ..*self }
    }

    /// Identification number as a decimal value, `None` while it has wildcards
    /// or non-decimal digits.
    pub fn identification_number(&self) -> Option<u32> {
        (0..ID_DIGITS).try_fold(0u32, |acc, i| {
            let digit = self.id_digit(i);
            (digit <= 9).then(|| acc * 10 + digit as u32)
        })
    }

    /// Three-letter manufacturer code.
    pub fn manufacturer_code(&self) -> String {
        mbus_decode_manufacturer(self.manufacturer)
    }
}

impl fmt::Display for SecondaryAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:08X}{:04X}{:02X}{:02X}",
            self.device_id, self.manufacturer, self.version, self.medium
        )
    }
}

impl FromStr for SecondaryAddress {
    type Err = MBusError;

    /// Parses the 16 character mask form, e.g. `12345678FFFFFFFF`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.len() != 16 || !s.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(MBusError::InvalidSecondaryAddress(format!(
                "'{s}' is not 16 hexadecimal characters"
            )));
        }
        if !s[..ID_DIGITS]
            .chars()
            .all(|c| c.is_ascii_digit() || c.eq_ignore_ascii_case(&'f'))
        {
            return Err(MBusError::InvalidSecondaryAddress(format!(
                "identification number of '{s}' must be decimal digits or F"
            )));
        }

        let parse = |range: std::ops::Range<usize>| {
            u32::from_str_radix(&s[range], 16)
                .map_err(|e| MBusError::InvalidSecondaryAddress(e.to_string()))
        };
        Ok(SecondaryAddress {
            device_id: parse(0..8)?,
            manufacturer: parse(8..12)? as u16,
            version: parse(12..14)? as u8,
            medium: parse(14..16)? as u8,
        })
    }
}

/// Parse secondary address from M-Bus frame user data
/// Expected format: 8-byte secondary address at start of user data
pub fn parse_secondary_from_frame_data(data: &[u8]) -> IResult<&[u8], SecondaryAddress> {
    let (remaining, secondary_bytes) = take(8usize)(data)?;

    let secondary_address = SecondaryAddress::from_bytes(secondary_bytes)
        .map_err(|_| nom::Err::Error(nom::error::Error::new(data, nom::error::ErrorKind::Tag)))?;

    Ok((remaining, secondary_address))
}

/// Result of probing one selection mask on the bus
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeResult {
    /// Exactly one device acknowledged and is now selected
    Selected,
    /// Several devices answered at once
    Collision,
    /// Nothing answered
    NoDevice,
}

/// Depth-first state of the collision resolution tree search.
///
/// The search starts from one mask. A collision on a mask replaces it by ten
/// narrower masks fixing its leftmost wildcard identification digit to 0..9;
/// masks are explored lowest digit first. Addresses listed in `exclude` are
/// skipped when they turn out to be the selected device.
#[derive(Debug, Clone)]
pub struct WildcardSearch {
    stack: Vec<SecondaryAddress>,
    exclude: Vec<SecondaryAddress>,
    unresolved_collision: bool,
    probes: usize,
}

impl WildcardSearch {
    pub fn new(mask: SecondaryAddress, exclude: &[SecondaryAddress]) -> Self {
        Self {
            stack: vec![mask],
            exclude: exclude.to_vec(),
            unresolved_collision: false,
            probes: 0,
        }
    }

    /// Next mask to probe, `None` once the search space is exhausted.
    pub fn next_mask(&mut self) -> Option<SecondaryAddress> {
        let mask = self.stack.pop()?;
        self.probes += 1;
        Some(mask)
    }

    /// Splits a colliding mask on its leftmost wildcard identification digit.
    pub fn record_collision(&mut self, mask: &SecondaryAddress) {
        match mask.first_wildcard_digit() {
            Some(index) => {
                for digit in (0..=9u8).rev() {
                    self.stack.push(mask.with_digit(index, digit));
                }
            }
            // identical identification numbers, cannot narrow any further
            None => self.unresolved_collision = true,
        }
    }

    pub fn is_excluded(&self, address: &SecondaryAddress) -> bool {
        self.exclude.contains(address)
    }

    /// Number of masks handed out so far.
    pub fn probes(&self) -> usize {
        self.probes
    }

    /// Terminal error once [`next_mask`](Self::next_mask) returned `None`.
    pub fn exhausted(&self) -> MBusError {
        if self.unresolved_collision {
            MBusError::Collision
        } else {
            MBusError::NoDevice
        }
    }
}
