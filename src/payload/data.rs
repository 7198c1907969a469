//! # Frame Data (application layer)
//!
//! Interprets the user data of an RSP_UD frame according to its control
//! information field:
//!
//! | CI   | Structure                                          |
//! |------|----------------------------------------------------|
//! | 0x72 | variable data, 12 byte long header                 |
//! | 0x7A | variable data, 4 byte short header                 |
//! | 0x78 | variable data, no header                           |
//! | 0x73 | fixed data structure (16 bytes, two counters)      |
//! | 0x70 | application error, reported as `ApplicationError`  |

use bitflags::bitflags;
use serde::Serialize;

use crate::constants::*;
use crate::error::MBusError;
use crate::mbus::frame::MBusFrame;
use crate::mbus::secondary_addressing::SecondaryAddress;
use crate::payload::data_encoding::{decode_bcd, decode_uint, mbus_decode_manufacturer};
use crate::payload::record::{
    bcd_or_raw, DataInformationBlock, MBusRecord, MBusRecordValue, RecordFunction, RecordIter,
};
use crate::payload::vif::ValueInformationBlock;

bitflags! {
    /// Status byte of the data header.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct StatusFlags: u8 {
        const APPLICATION_BUSY = 0x01;
        const APPLICATION_ERROR = 0x02;
        const POWER_LOW = 0x04;
        const PERMANENT_ERROR = 0x08;
        const TEMPORARY_ERROR = 0x10;
        const MANUFACTURER_1 = 0x20;
        const MANUFACTURER_2 = 0x40;
        const MANUFACTURER_3 = 0x80;
    }
}

/// Decoded user data of one logical response.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MBusFrameData {
    pub control_information: u8,
    /// Primary address the response came from
    pub address: u8,
    /// Device identity from a long header (CI 0x72)
    pub secondary_address: Option<SecondaryAddress>,
    /// Decimal identification number (CI 0x72 and 0x73)
    pub identification_number: Option<u32>,
    pub access_number: Option<u8>,
    pub status: Option<u8>,
    pub signature: Option<u16>,
    /// Medium code (CI 0x72 and 0x73)
    pub medium: Option<u8>,
    /// Records in on-wire order, across all telegrams
    pub records: Vec<MBusRecord>,
    /// Set when the last telegram announced more records (0x1F)
    pub more_records_follow: bool,
    /// Bytes following a 0x0F / 0x1F DIF
    pub manufacturer_data: Vec<u8>,
    pub telegram_count: usize,
}

impl MBusFrameData {
    /// Decodes the user data of a long or control frame.
    pub fn parse(frame: &MBusFrame) -> Result<Self, MBusError> {
        let mut data = MBusFrameData {
            control_information: frame.control_information,
            address: frame.address,
            secondary_address: None,
            identification_number: None,
            access_number: None,
            status: None,
            signature: None,
            medium: None,
            records: Vec::new(),
            more_records_follow: false,
            manufacturer_data: Vec::new(),
            telegram_count: 1,
        };

        let body = match frame.control_information {
            MBUS_CONTROL_INFO_RESP_VARIABLE => {
                let header = header_bytes(&frame.data, MBUS_DATA_VARIABLE_HEADER_LENGTH)?;
                let secondary = SecondaryAddress::from_bytes(&header[0..8])?;
                data.identification_number = secondary.identification_number();
                data.medium = Some(secondary.medium);
                data.secondary_address = Some(secondary);
                data.access_number = Some(header[8]);
                data.status = Some(header[9]);
                data.signature = Some(u16::from_le_bytes([header[10], header[11]]));
                &frame.data[MBUS_DATA_VARIABLE_HEADER_LENGTH..]
            }
            MBUS_CONTROL_INFO_RESP_VARIABLE_SHORT_HEADER => {
                let header = header_bytes(&frame.data, MBUS_DATA_SHORT_HEADER_LENGTH)?;
                data.access_number = Some(header[0]);
                data.status = Some(header[1]);
                data.signature = Some(u16::from_le_bytes([header[2], header[3]]));
                &frame.data[MBUS_DATA_SHORT_HEADER_LENGTH..]
            }
            MBUS_CONTROL_INFO_RESP_VARIABLE_NO_HEADER => &frame.data[..],
            MBUS_CONTROL_INFO_RESP_FIXED => {
                parse_fixed(&mut data, &frame.data)?;
                return Ok(data);
            }
            MBUS_CONTROL_INFO_ERROR_GENERAL => {
                return Err(MBusError::ApplicationError(
                    frame.data.first().copied().unwrap_or(0),
                ));
            }
            other => return Err(MBusError::UnsupportedCi(other)),
        };

        let mut iter = RecordIter::new(body);
        data.records = iter.by_ref().collect::<Result<Vec<_>, _>>()?;
        data.more_records_follow = iter.more_records_follow();
        data.manufacturer_data = iter.manufacturer_data().to_vec();
        Ok(data)
    }

    /// Appends the records of a follow-up telegram of the same response.
    pub fn append_telegram(&mut self, next: MBusFrameData) {
        self.records.extend(next.records);
        self.more_records_follow = next.more_records_follow;
        self.manufacturer_data.extend(next.manufacturer_data);
        if next.status.is_some() {
            self.status = next.status;
        }
        self.telegram_count += next.telegram_count;
    }

    /// Three-letter manufacturer code from the long header.
    pub fn manufacturer_code(&self) -> Option<String> {
        self.secondary_address
            .map(|a| mbus_decode_manufacturer(a.manufacturer))
    }

    pub fn medium_name(&self) -> Option<&'static str> {
        let medium = self.medium?;
        Some(if self.control_information == MBUS_CONTROL_INFO_RESP_FIXED {
            fixed_medium_name(medium)
        } else {
            variable_medium_name(medium)
        })
    }

    pub fn status_flags(&self) -> StatusFlags {
        StatusFlags::from_bits_truncate(self.status.unwrap_or(0))
    }
}

fn header_bytes(data: &[u8], len: usize) -> Result<&[u8], MBusError> {
    data.get(..len).ok_or(MBusError::TruncatedRecord {
        offset: 0,
        needed: len,
        available: data.len(),
    })
}

/// CI 0x73: identification, access number, status, two typed counters.
fn parse_fixed(data: &mut MBusFrameData, raw: &[u8]) -> Result<(), MBusError> {
    let raw = header_bytes(raw, MBUS_DATA_FIXED_LENGTH)?;
    let status = raw[5];
    let (type1, type2) = (raw[6], raw[7]);

    data.identification_number = decode_bcd(&raw[0..4]).and_then(|v| u32::try_from(v).ok());
    data.access_number = Some(raw[4]);
    data.status = Some(status);
    // medium is spread over the top two bits of both counter types
    data.medium = Some(((type1 & 0xC0) >> 6) | ((type2 & 0xC0) >> 4));

    let binary = status & MBUS_DATA_FIXED_STATUS_FORMAT_MASK == MBUS_DATA_FIXED_STATUS_FORMAT_INT;
    let stored = status & MBUS_DATA_FIXED_STATUS_DATE_MASK == MBUS_DATA_FIXED_STATUS_DATE_STORED;

    for (unit_code, counter) in [(type1 & 0x3F, &raw[8..12]), (type2 & 0x3F, &raw[12..16])] {
        let value = if binary {
            MBusRecordValue::Integer(decode_uint(counter) as i64)
        } else {
            bcd_or_raw(counter)
        };
        let (unit, exponent, quantity) = fixed_unit(unit_code);
        data.records.push(MBusRecord {
            dib: DataInformationBlock::default(),
            vib: ValueInformationBlock::default(),
            storage_number: u64::from(stored),
            tariff: 0,
            sub_device: 0,
            function: RecordFunction::Instantaneous,
            value,
            unit: unit.to_string(),
            exponent,
            quantity: quantity.to_string(),
            extensions: Vec::new(),
            timestamp: None,
        });
    }
    Ok(())
}

/// Unit, exponent and quantity of the 6-bit counter unit codes of CI 0x73.
pub fn fixed_unit(code: u8) -> (&'static str, i32, &'static str) {
    let code = code & 0x3F;
    match code {
        0x00 => ("h,m,s", 0, "Time"),
        0x01 => ("D,M,Y", 0, "Date"),
        0x02..=0x0A => ("Wh", (code - 0x02) as i32, "Energy"),
        0x0B..=0x13 => ("J", (code - 0x0B) as i32 + 3, "Energy"),
        0x14..=0x1C => ("W", (code - 0x14) as i32, "Power"),
        0x1D..=0x25 => ("J/h", (code - 0x1D) as i32 + 3, "Power"),
        0x26..=0x2E => ("m^3", (code - 0x26) as i32 - 6, "Volume"),
        0x2F..=0x37 => ("m^3/h", (code - 0x2F) as i32 - 6, "Volume flow"),
        0x38 => ("°C", -3, "Temperature"),
        0x39 => ("", 0, "Units for H.C.A."),
        0x3D | 0x3F => ("", 0, "Same but historic"),
        0x3E => ("", 0, "Without units"),
        _ => ("", 0, "Reserved"),
    }
}

/// Medium names of the fixed data structure (4-bit code).
pub fn fixed_medium_name(medium: u8) -> &'static str {
    match medium & 0x0F {
        0x00 => "Other",
        0x01 => "Oil",
        0x02 => "Electricity",
        0x03 => "Gas",
        0x04 => "Heat",
        0x05 => "Steam",
        0x06 => "Hot Water",
        0x07 => "Water",
        0x08 => "H.C.A.",
        0x0A => "Gas Mode 2",
        0x0B => "Heat Mode 2",
        0x0C => "Hot Water Mode 2",
        0x0D => "Water Mode 2",
        0x0E => "H.C.A. Mode 2",
        _ => "Reserved",
    }
}

/// Medium names of the variable data header.
pub fn variable_medium_name(medium: u8) -> &'static str {
    match medium {
        0x00 => "Other",
        0x01 => "Oil",
        0x02 => "Electricity",
        0x03 => "Gas",
        0x04 => "Heat: Outlet",
        0x05 => "Steam",
        0x06 => "Warm water (30-90°C)",
        0x07 => "Water",
        0x08 => "Heat Cost Allocator",
        0x09 => "Compressed Air",
        0x0A => "Cooling load meter: Outlet",
        0x0B => "Cooling load meter: Inlet",
        0x0C => "Heat: Inlet",
        0x0D => "Heat / Cooling load meter",
        0x0E => "Bus/System",
        0x0F => "Unknown Medium",
        0x10 => "Irrigation Water",
        0x11 => "Water data logger",
        0x12 => "Gas data logger",
        0x13 => "Gas converter",
        0x14 => "Calorific value",
        0x15 => "Hot water (>=90°C)",
        0x16 => "Cold water",
        0x17 => "Dual water",
        0x18 => "Pressure",
        0x19 => "A/D Converter",
        0x1A => "Smoke detector",
        0x1B => "Room sensor",
        0x1C => "Gas detector",
        0x20 => "Breaker (electricity)",
        0x21 => "Valve (gas or water)",
        0x25 => "Customer unit (display device)",
        0x28 => "Waste water",
        0x29 => "Garbage",
        0x2A => "Carbon dioxide",
        0x31 => "Communication controller",
        0x32 => "Unidirectional repeater",
        0x33 => "Bidirectional repeater",
        0x36 => "Radio converter (system side)",
        0x37 => "Radio converter (meter side)",
        _ => "Reserved",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(ci: u8, data: Vec<u8>) -> MBusFrame {
        MBusFrame::long(0x08, 0x05, ci, data).unwrap()
    }

    #[test]
    fn test_long_header() {
        let mut data = vec![
            0x45, 0x58, 0x57, 0x03, 0xB4, 0x05, 0x34, 0x04, 0x9E, 0x00, 0x27, 0xB6,
        ];
        data.extend_from_slice(&[0x03, 0x06, 0xF9, 0x34, 0x15]);
        let parsed = MBusFrameData::parse(&frame(0x72, data)).unwrap();

        assert_eq!(parsed.identification_number, Some(3_575_845));
        assert_eq!(parsed.manufacturer_code().as_deref(), Some("AMT"));
        assert_eq!(parsed.access_number, Some(0x9E));
        assert_eq!(parsed.signature, Some(0xB627));
        assert_eq!(parsed.medium_name(), Some("Heat: Outlet"));
        assert_eq!(parsed.records.len(), 1);
        assert_eq!(parsed.telegram_count, 1);
    }

    #[test]
    fn test_short_header_and_status() {
        let parsed =
            MBusFrameData::parse(&frame(0x7A, vec![0x01, 0x05, 0x00, 0x00, 0x01, 0x13, 0x07]))
                .unwrap();
        assert_eq!(parsed.access_number, Some(1));
        assert!(parsed
            .status_flags()
            .contains(StatusFlags::APPLICATION_BUSY | StatusFlags::POWER_LOW));
        assert!(parsed.secondary_address.is_none());
        assert_eq!(parsed.records[0].value, MBusRecordValue::Integer(7));
    }

    #[test]
    fn test_fixed_structure() {
        // id 12345678, access 1, status BCD/current, volume in l (0x29) / m^3 (0x2C), medium water
        let data = vec![
            0x78, 0x56, 0x34, 0x12, 0x01, 0x00, 0xE9, 0x6C, 0x45, 0x23, 0x01, 0x00, 0x89, 0x67,
            0x45, 0x00,
        ];
        let parsed = MBusFrameData::parse(&frame(0x73, data)).unwrap();
        assert_eq!(parsed.identification_number, Some(12_345_678));
        assert_eq!(parsed.medium, Some(0x07));
        assert_eq!(parsed.medium_name(), Some("Water"));
        assert_eq!(parsed.records.len(), 2);
        assert_eq!(parsed.records[0].value, MBusRecordValue::Integer(12_345));
        assert_eq!(parsed.records[0].unit, "m^3");
        assert_eq!(parsed.records[0].exponent, -3);
        assert_eq!(parsed.records[1].value, MBusRecordValue::Integer(456_789));
        assert_eq!(parsed.records[1].exponent, 0);
    }

    #[test]
    fn test_application_error_and_unsupported_ci() {
        let err = MBusFrameData::parse(&frame(0x70, vec![0x08])).unwrap_err();
        assert_eq!(err, MBusError::ApplicationError(0x08));

        let err = MBusFrameData::parse(&frame(0x55, vec![0x00])).unwrap_err();
        assert_eq!(err, MBusError::UnsupportedCi(0x55));
    }

    #[test]
    fn test_truncated_header() {
        let err = MBusFrameData::parse(&frame(0x72, vec![0x00; 5])).unwrap_err();
        assert!(matches!(err, MBusError::TruncatedRecord { needed: 12, .. }));
    }

    #[test]
    fn test_append_telegram() {
        let first = frame(0x78, vec![0x01, 0x13, 0x01, 0x1F]);
        let second = frame(0x78, vec![0x01, 0x13, 0x02]);
        let mut data = MBusFrameData::parse(&first).unwrap();
        assert!(data.more_records_follow);
        data.append_telegram(MBusFrameData::parse(&second).unwrap());
        assert!(!data.more_records_follow);
        assert_eq!(data.telegram_count, 2);
        assert_eq!(data.records.len(), 2);
    }
}
