//! # Variable Data Record Decoding
//!
//! Decodes the self-describing data records of a variable data structure
//! (EN 13757-3). Each record is a data information block (DIF + DIFE chain),
//! a value information block (VIF + VIFE chain) and a value whose width and
//! coding follow from the low nibble of the DIF.
//!
//! Decoding is lazy: [`RecordIter`] yields one record at a time because a
//! record's length is only known once its own header has been read. Special
//! DIFs are handled inline: `0x2F` is a filler and skipped, `0x0F` and `0x1F`
//! end the record area (the rest is manufacturer data; `0x1F` additionally
//! announces another telegram).

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::Serialize;

use crate::constants::*;
use crate::error::MBusError;
use crate::payload::data_encoding::{
    decode_bcd, decode_date_g, decode_datetime_f, decode_datetime_i, decode_int, decode_real,
    mbus_data_str_decode,
};
use crate::payload::vif::{normalize_vib, parse_vib, ValueInformationBlock};
use crate::payload::vif_maps::TimePoint;

/// Bounds-checked cursor over a data block.
///
/// Running out of bytes is reported as [`MBusError::TruncatedRecord`] against
/// the offset of the record being decoded.
#[derive(Debug, Clone)]
pub struct RecordReader<'a> {
    data: &'a [u8],
    pos: usize,
    record_start: usize,
}

impl<'a> RecordReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            pos: 0,
            record_start: 0,
        }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.pos >= self.data.len()
    }

    pub fn peek(&self) -> Option<u8> {
        self.data.get(self.pos).copied()
    }

    /// Marks the current position as the start of a new record.
    pub fn begin_record(&mut self) {
        self.record_start = self.pos;
    }

    pub fn byte(&mut self) -> Result<u8, MBusError> {
        Ok(self.take(1)?[0])
    }

    pub fn take(&mut self, len: usize) -> Result<&'a [u8], MBusError> {
        let available = self.data.len() - self.pos;
        if len > available {
            return Err(MBusError::TruncatedRecord {
                offset: self.record_start,
                needed: len,
                available,
            });
        }
        let slice = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    /// Everything not consumed yet.
    pub fn rest(&mut self) -> &'a [u8] {
        let slice = &self.data[self.pos..];
        self.pos = self.data.len();
        slice
    }
}

/// Function field of the DIF.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum RecordFunction {
    #[default]
    Instantaneous,
    Maximum,
    Minimum,
    DuringError,
}

impl RecordFunction {
    pub fn from_dif(dif: u8) -> Self {
        match (dif & MBUS_DATA_RECORD_DIF_MASK_FUNCTION) >> 4 {
            0 => RecordFunction::Instantaneous,
            1 => RecordFunction::Maximum,
            2 => RecordFunction::Minimum,
            _ => RecordFunction::DuringError,
        }
    }
}

/// Raw data information block of one data record.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct DataInformationBlock {
    pub dif: u8,
    pub dife: Vec<u8>,
}

impl DataInformationBlock {
    /// Storage number: DIF bit 6 is the least significant bit, each DIFE adds four more.
    pub fn storage_number(&self) -> u64 {
        let base = ((self.dif & MBUS_DATA_RECORD_DIF_MASK_STORAGE_NO) >> 6) as u64;
        self.dife.iter().enumerate().fold(base, |acc, (i, dife)| {
            acc | (((dife & MBUS_DATA_RECORD_DIFE_MASK_STORAGE_NO) as u64) << (1 + 4 * i))
        })
    }

    /// Tariff: two bits per DIFE.
    pub fn tariff(&self) -> u32 {
        self.dife.iter().enumerate().fold(0, |acc, (i, dife)| {
            acc | ((((dife & MBUS_DATA_RECORD_DIFE_MASK_TARIFF) >> 4) as u32) << (2 * i))
        })
    }

    /// Sub-unit (device): one bit per DIFE.
    pub fn sub_device(&self) -> u32 {
        self.dife.iter().enumerate().fold(0, |acc, (i, dife)| {
            acc | ((((dife & MBUS_DATA_RECORD_DIFE_MASK_DEVICE) >> 6) as u32) << i)
        })
    }

    pub fn function(&self) -> RecordFunction {
        RecordFunction::from_dif(self.dif)
    }

    /// Data field (length and coding) nibble.
    pub fn data_field(&self) -> u8 {
        self.dif & MBUS_DATA_RECORD_DIF_MASK_DATA
    }
}

/// Represents the value of an M-Bus data record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum MBusRecordValue {
    Integer(i64),
    Real(f64),
    String(String),
    /// Raw bytes: binary LVAR data or values that failed BCD/calendar validation
    Binary(Vec<u8>),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
    /// No data (DIF coding 0x0 or selection for readout)
    None,
}

impl MBusRecordValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            MBusRecordValue::Integer(v) => Some(*v as f64),
            MBusRecordValue::Real(v) => Some(*v),
            _ => None,
        }
    }
}

/// Represents one decoded M-Bus data record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MBusRecord {
    /// Empty for records of a fixed data structure
    pub dib: DataInformationBlock,
    pub vib: ValueInformationBlock,
    pub storage_number: u64,
    pub tariff: u32,
    pub sub_device: u32,
    pub function: RecordFunction,
    pub value: MBusRecordValue,
    pub unit: String,
    pub exponent: i32,
    pub quantity: String,
    pub extensions: Vec<String>,
    /// Reception time, set when the record was read from a live bus
    pub timestamp: Option<DateTime<Utc>>,
}

impl MBusRecord {
    /// Numeric value multiplied by 10^exponent.
    pub fn scaled_value(&self) -> Option<f64> {
        self.value
            .as_f64()
            .map(|v| v * 10f64.powi(self.exponent))
    }
}

/// Width in bytes of the fixed-size data fields.
pub fn mbus_dif_datalength_lookup(data_field: u8) -> Option<usize> {
    match data_field & MBUS_DATA_RECORD_DIF_MASK_DATA {
        0x00 => Some(0),
        0x01 => Some(1),
        0x02 => Some(2),
        0x03 => Some(3),
        0x04 => Some(4),
        0x05 => Some(4),
        0x06 => Some(6),
        0x07 => Some(8),
        0x08 => Some(0),
        0x09 => Some(1),
        0x0A => Some(2),
        0x0B => Some(3),
        0x0C => Some(4),
        0x0E => Some(6),
        // 0x0D variable length, 0x0F special function
        _ => None,
    }
}

fn parse_dib(reader: &mut RecordReader<'_>, dif: u8) -> Result<DataInformationBlock, MBusError> {
    let mut dife = Vec::new();
    let mut extension = dif & MBUS_DIB_DIF_EXTENSION_BIT != 0;
    while extension {
        if dife.len() == MBUS_DIB_DIFE_MAX {
            return Err(MBusError::DifTooLong);
        }
        let byte = reader.byte()?;
        dife.push(byte);
        extension = byte & MBUS_DIB_DIF_EXTENSION_BIT != 0;
    }
    Ok(DataInformationBlock { dif, dife })
}

pub(crate) fn bcd_or_raw(raw: &[u8]) -> MBusRecordValue {
    decode_bcd(raw)
        .map(MBusRecordValue::Integer)
        .unwrap_or_else(|| MBusRecordValue::Binary(raw.to_vec()))
}

fn time_point_value(kind: TimePoint, raw: &[u8]) -> Option<MBusRecordValue> {
    match (kind, raw.len()) {
        (TimePoint::Date, 2) => decode_date_g(raw).map(MBusRecordValue::Date),
        (TimePoint::DateTime, 4) => decode_datetime_f(raw).map(MBusRecordValue::DateTime),
        (TimePoint::DateTime, 6) => decode_datetime_i(raw).map(MBusRecordValue::DateTime),
        _ => None,
    }
}

/// Reads the variable length (LVAR) value of a DIF with data field 0xD.
fn decode_lvar(reader: &mut RecordReader<'_>) -> Result<MBusRecordValue, MBusError> {
    let lvar = reader.byte()?;
    let value = match lvar {
        0x00..=0xBF => MBusRecordValue::String(mbus_data_str_decode(reader.take(lvar as usize)?)),
        0xC0..=0xCF => bcd_or_raw(reader.take((lvar - 0xC0) as usize)?),
        0xD0..=0xDF => match bcd_or_raw(reader.take((lvar - 0xD0) as usize)?) {
            MBusRecordValue::Integer(v) => MBusRecordValue::Integer(-v),
            other => other,
        },
        0xE0..=0xEF => MBusRecordValue::Binary(reader.take((lvar - 0xE0) as usize)?.to_vec()),
        // 16..64 byte binary numbers do not fit an integer
        0xF0..=0xF4 => {
            MBusRecordValue::Binary(reader.take(4 * (lvar - 0xEC) as usize)?.to_vec())
        }
        0xF5 => MBusRecordValue::Binary(reader.take(48)?.to_vec()),
        0xF6 => MBusRecordValue::Binary(reader.take(64)?.to_vec()),
        other => return Err(MBusError::UnknownLvar(other)),
    };
    Ok(value)
}

/// Decodes one data record whose DIF has already been read.
fn decode_record(reader: &mut RecordReader<'_>, dif: u8) -> Result<MBusRecord, MBusError> {
    let dib = parse_dib(reader, dif)?;
    let vib = parse_vib(reader)?;
    let info = normalize_vib(&vib);

    let value = match dib.data_field() {
        0x0D => decode_lvar(reader)?,
        field => {
            let len = mbus_dif_datalength_lookup(field).ok_or(MBusError::UnknownDif(dif))?;
            let raw = reader.take(len)?;
            match field {
                0x00 | 0x08 => MBusRecordValue::None,
                0x05 => match decode_real(raw) {
                    Ok((_, v)) => MBusRecordValue::Real(v as f64),
                    Err(_) => MBusRecordValue::Binary(raw.to_vec()),
                },
                0x09..=0x0C | 0x0E => bcd_or_raw(raw),
                _ => match info.time_point {
                    Some(kind) => time_point_value(kind, raw)
                        .unwrap_or_else(|| MBusRecordValue::Binary(raw.to_vec())),
                    None => MBusRecordValue::Integer(decode_int(raw)),
                },
            }
        }
    };

    Ok(MBusRecord {
        storage_number: dib.storage_number(),
        tariff: dib.tariff(),
        sub_device: dib.sub_device(),
        function: dib.function(),
        dib,
        vib,
        value,
        unit: info.unit,
        exponent: info.exponent,
        quantity: info.quantity,
        extensions: info.extensions,
        timestamp: None,
    })
}

/// Lazily decodes the records of a variable data block.
///
/// The iterator stops after the first error.
#[derive(Debug, Clone)]
pub struct RecordIter<'a> {
    reader: RecordReader<'a>,
    more_records_follow: bool,
    manufacturer_data: &'a [u8],
    done: bool,
}

impl<'a> RecordIter<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            reader: RecordReader::new(data),
            more_records_follow: false,
            manufacturer_data: &[],
            done: false,
        }
    }

    /// True once a 0x1F DIF has been consumed.
    pub fn more_records_follow(&self) -> bool {
        self.more_records_follow
    }

    /// Bytes following a 0x0F / 0x1F DIF.
    pub fn manufacturer_data(&self) -> &'a [u8] {
        self.manufacturer_data
    }
}

impl<'a> Iterator for RecordIter<'a> {
    type Item = Result<MBusRecord, MBusError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        loop {
            let dif = match self.reader.peek() {
                Some(dif) => dif,
                None => {
                    self.done = true;
                    return None;
                }
            };
            self.reader.begin_record();
            // peeked above, cannot fail
            let _ = self.reader.byte();

            match dif {
                MBUS_DIB_DIF_IDLE_FILLER | MBUS_DIB_DIF_GLOBAL_READOUT => continue,
                MBUS_DIB_DIF_MANUFACTURER_SPECIFIC | MBUS_DIB_DIF_MORE_RECORDS_FOLLOW => {
                    self.more_records_follow = dif == MBUS_DIB_DIF_MORE_RECORDS_FOLLOW;
                    self.manufacturer_data = self.reader.rest();
                    self.done = true;
                    return None;
                }
                _ if dif & MBUS_DATA_RECORD_DIF_MASK_DATA == 0x0F => {
                    self.done = true;
                    return Some(Err(MBusError::UnknownDif(dif)));
                }
                _ => {
                    let result = decode_record(&mut self.reader, dif);
                    if result.is_err() {
                        self.done = true;
                    }
                    return Some(result);
                }
            }
        }
    }
}

/// Fully decoded variable data block.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DataBlock {
    pub records: Vec<MBusRecord>,
    pub more_records_follow: bool,
    pub manufacturer_data: Vec<u8>,
}

/// Decodes a whole variable data block; a truncated record fails the block.
pub fn decode_data_block(data: &[u8]) -> Result<DataBlock, MBusError> {
    let mut iter = RecordIter::new(data);
    let records = iter.by_ref().collect::<Result<Vec<_>, _>>()?;
    Ok(DataBlock {
        records,
        more_records_follow: iter.more_records_follow(),
        manufacturer_data: iter.manufacturer_data().to_vec(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integer_record() {
        let block = decode_data_block(&[0x03, 0x06, 0xF9, 0x34, 0x15]).unwrap();
        assert_eq!(block.records.len(), 1);
        let record = &block.records[0];
        assert_eq!(record.value, MBusRecordValue::Integer(1_389_817));
        assert_eq!(record.unit, "Wh");
        assert_eq!(record.exponent, 3);
        assert_eq!(record.quantity, "Energy");
        assert_eq!(record.function, RecordFunction::Instantaneous);
        assert_eq!(record.scaled_value(), Some(1_389_817_000.0));
    }

    #[test]
    fn test_dife_subfields() {
        // DIF: storage bit, 4 byte int; DIFE: storage 0x3, tariff 1, sub-unit 1
        let block = decode_data_block(&[0xC4, 0x5F, 0x13, 0x01, 0x00, 0x00, 0x00])
            .unwrap();
        let record = &block.records[0];
        assert_eq!(record.storage_number, 1 | (0xF << 1));
        assert_eq!(record.tariff, 1);
        assert_eq!(record.sub_device, 1);
    }

    #[test]
    fn test_dif_too_long() {
        let mut data = vec![0x84];
        data.extend_from_slice(&[0x80; 11]);
        assert_eq!(decode_data_block(&data), Err(MBusError::DifTooLong));
    }

    #[test]
    fn test_bcd_and_negative_bcd() {
        let block = decode_data_block(&[0x0C, 0x13, 0x78, 0x56, 0x34, 0x12, 0x0A, 0x13, 0x12, 0xF0])
            .unwrap();
        assert_eq!(block.records[0].value, MBusRecordValue::Integer(12_345_678));
        assert_eq!(block.records[1].value, MBusRecordValue::Integer(-12));
    }

    #[test]
    fn test_invalid_bcd_keeps_raw_bytes() {
        let block = decode_data_block(&[0x0A, 0x13, 0xAB, 0x01]).unwrap();
        assert_eq!(block.records[0].value, MBusRecordValue::Binary(vec![0xAB, 0x01]));
    }

    #[test]
    fn test_date_records() {
        let block = decode_data_block(&[0x02, 0x6C, 0x1F, 0x1C, 0x04, 0x6D, 0x3B, 0x17, 0x1F, 0x1C])
            .unwrap();
        assert_eq!(
            block.records[0].value,
            MBusRecordValue::Date(NaiveDate::from_ymd_opt(2008, 12, 31).unwrap())
        );
        match &block.records[1].value {
            MBusRecordValue::DateTime(dt) => assert_eq!(dt.to_string(), "2008-12-31 23:59:00"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_lvar_values() {
        let block = decode_data_block(&[
            0x0D, 0xFD, 0x0C, 0x03, b'C', b'B', b'A', // string, reversed
            0x0D, 0xFD, 0x0C, 0xE2, 0x01, 0x02, // binary
            0x0D, 0xFD, 0x0C, 0xD1, 0x25, // negative BCD
        ])
        .unwrap();
        assert_eq!(block.records[0].value, MBusRecordValue::String("ABC".into()));
        assert_eq!(block.records[0].quantity, "Model / Version");
        assert_eq!(block.records[1].value, MBusRecordValue::Binary(vec![0x01, 0x02]));
        assert_eq!(block.records[2].value, MBusRecordValue::Integer(-25));

        assert_eq!(
            decode_data_block(&[0x0D, 0x13, 0xFA]),
            Err(MBusError::UnknownLvar(0xFA))
        );
    }

    #[test]
    fn test_special_difs() {
        let block = decode_data_block(&[0x2F, 0x2F, 0x01, 0x13, 0x05, 0x1F, 0xAA, 0xBB]).unwrap();
        assert_eq!(block.records.len(), 1);
        assert!(block.more_records_follow);
        assert_eq!(block.manufacturer_data, vec![0xAA, 0xBB]);

        let block = decode_data_block(&[0x0F, 0x01]).unwrap();
        assert!(block.records.is_empty());
        assert!(!block.more_records_follow);

        assert_eq!(decode_data_block(&[0x3F]), Err(MBusError::UnknownDif(0x3F)));
    }

    #[test]
    fn test_truncated_record() {
        // second record declares 4 bytes, only 2 present
        let result = decode_data_block(&[0x01, 0x13, 0x05, 0x04, 0x13, 0x01, 0x02]);
        assert_eq!(
            result,
            Err(MBusError::TruncatedRecord {
                offset: 3,
                needed: 4,
                available: 2
            })
        );

        let mut iter = RecordIter::new(&[0x01, 0x13, 0x05, 0x04, 0x13, 0x01, 0x02]);
        assert!(iter.next().unwrap().is_ok());
        assert!(iter.next().unwrap().is_err());
        assert!(iter.next().is_none());
    }
}
