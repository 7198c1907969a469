//! # M-Bus Data Encoding and Decoding
//!
//! This module provides functions for encoding and decoding the data types
//! used in M-Bus data records: little-endian integers, BCD, IEEE-754 reals,
//! reversed ASCII strings, the compound date/time types F, G and I, and the
//! 3-letter manufacturer code.
//!
//! All multi-byte fields are little-endian on the wire.

use chrono::{NaiveDate, NaiveDateTime};
use nom::{number::complete::le_f32, IResult};

use crate::error::MBusError;

/// Decodes a string from the input data; M-Bus transmits strings last character first.
pub fn mbus_data_str_decode(src: &[u8]) -> String {
    src.iter().rev().map(|b| *b as char).collect()
}

/// Decodes a little-endian two's complement integer of 1 to 8 bytes.
pub fn decode_int(src: &[u8]) -> i64 {
    if src.is_empty() {
        return 0;
    }
    let bytes = &src[..src.len().min(8)];
    let mut value: u64 = 0;
    for (i, b) in bytes.iter().enumerate() {
        value |= (*b as u64) << (8 * i);
    }
    // sign extend from the top bit of the last byte
    let bits = 8 * bytes.len() as u32;
    if bits < 64 && (value >> (bits - 1)) & 1 == 1 {
        value |= u64::MAX << bits;
    }
    value as i64
}

/// Decodes a little-endian unsigned integer of 1 to 8 bytes.
pub fn decode_uint(src: &[u8]) -> u64 {
    src.iter()
        .take(8)
        .enumerate()
        .fold(0u64, |acc, (i, b)| acc | ((*b as u64) << (8 * i)))
}

/// Decodes a little-endian BCD value.
///
/// A 0xF in the most significant nibble marks a negative number. Returns
/// `None` if any other nibble is not a decimal digit.
pub fn decode_bcd(src: &[u8]) -> Option<i64> {
    let mut value: i64 = 0;
    let mut negative = false;
    for (i, byte) in src.iter().rev().enumerate() {
        let high = byte >> 4;
        let low = byte & 0x0F;
        if i == 0 && high == 0x0F {
            negative = true;
        } else if high > 9 {
            return None;
        } else {
            value = value.checked_mul(10)?.checked_add(high as i64)?;
        }
        if low > 9 {
            return None;
        }
        value = value.checked_mul(10)?.checked_add(low as i64)?;
    }
    Some(if negative { -value } else { value })
}

/// Encodes a non-negative value into `len` little-endian BCD bytes.
pub fn encode_bcd(mut value: u64, len: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(len);
    for _ in 0..len {
        let low = (value % 10) as u8;
        value /= 10;
        let high = (value % 10) as u8;
        value /= 10;
        out.push((high << 4) | low);
    }
    out
}

/// Decodes a little-endian IEEE-754 single precision value.
pub fn decode_real(input: &[u8]) -> IResult<&[u8], f32> {
    le_f32(input)
}

/// Year of the compound date types: 3 low bits in `low`, 4 high bits in `high`.
/// Two-digit years above 80 belong to the 1900s.
fn compound_year(low: u8, high: u8) -> i32 {
    let year = (((low & 0xE0) >> 5) | ((high & 0xF0) >> 1)) as i32;
    if year > 80 {
        1900 + year
    } else {
        2000 + year
    }
}

/// Type G: compound CP16 date.
pub fn decode_date_g(src: &[u8]) -> Option<NaiveDate> {
    if src.len() < 2 {
        return None;
    }
    let day = (src[0] & 0x1F) as u32;
    let month = (src[1] & 0x0F) as u32;
    NaiveDate::from_ymd_opt(compound_year(src[0], src[1]), month, day)
}

/// Type F: compound CP32 date and time (minute resolution). The top bit of
/// the first byte flags an invalid value.
pub fn decode_datetime_f(src: &[u8]) -> Option<NaiveDateTime> {
    if src.len() < 4 || src[0] & 0x80 != 0 {
        return None;
    }
    let minute = (src[0] & 0x3F) as u32;
    let hour = (src[1] & 0x1F) as u32;
    decode_date_g(&src[2..4])?.and_hms_opt(hour, minute, 0)
}

/// Type I: compound CP48 date and time (second resolution).
pub fn decode_datetime_i(src: &[u8]) -> Option<NaiveDateTime> {
    if src.len() < 6 || src[1] & 0x80 != 0 {
        return None;
    }
    let second = (src[0] & 0x3F) as u32;
    let minute = (src[1] & 0x3F) as u32;
    let hour = (src[2] & 0x1F) as u32;
    decode_date_g(&src[3..5])?.and_hms_opt(hour, minute, second)
}

/// Encodes the manufacturer ID according to the manufacturer's 3-letter code.
pub fn mbus_data_manufacturer_encode(manufacturer: &str) -> Result<u16, MBusError> {
    let letters: Vec<u8> = manufacturer.bytes().collect();
    if letters.len() != 3 || !letters.iter().all(|c| c.is_ascii_uppercase()) {
        return Err(MBusError::InvalidManufacturer);
    }

    Ok(letters
        .iter()
        .fold(0u16, |id, c| (id << 5) | ((c - 64) as u16 & 0x1F)))
}

/// Decodes the manufacturer ID (as read little-endian from the wire).
pub fn mbus_decode_manufacturer(id: u16) -> String {
    [10u16, 5, 0]
        .iter()
        .map(|shift| {
            let letter = ((id >> shift) & 0x1F) as u8;
            if (1..=26).contains(&letter) {
                (letter + 64) as char
            } else {
                '?'
            }
        })
        .collect()
}
