//! Tests for the data record decoder and the application layer (frame data).

use chrono::{NaiveDate, NaiveDateTime};
use mbus_master::mbus::frame::MBusFrame;
use mbus_master::payload::record::{decode_data_block, RecordFunction, RecordIter};
use mbus_master::payload::{MBusFrameData, StatusFlags};
use mbus_master::{MBusError, MBusRecordValue, SecondaryAddress};

fn datetime(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(y, mo, d)
        .unwrap()
        .and_hms_opt(h, mi, s)
        .unwrap()
}

#[test]
fn test_records_in_wire_order() {
    let block = decode_data_block(&[
        0x03, 0x06, 0xF9, 0x34, 0x15, // energy, 3 byte int, kWh
        0x03, 0x15, 0xC6, 0x00, 0x4D, // volume, 3 byte int, 0.1 m^3
        0x05, 0x5B, 0x22, 0xF3, 0x26, 0x42, // flow temperature, real
        0x0C, 0x78, 0x78, 0x56, 0x34, 0x12, // fabrication number, 8 digit BCD
    ])
    .unwrap();

    let quantities: Vec<&str> = block.records.iter().map(|r| r.quantity.as_str()).collect();
    assert_eq!(
        quantities,
        ["Energy", "Volume", "Flow temperature", "Fabrication number"]
    );

    assert_eq!(block.records[0].value, MBusRecordValue::Integer(1_389_817));
    assert_eq!(block.records[1].value, MBusRecordValue::Integer(0x4D00C6));
    assert_eq!(block.records[1].unit, "m^3");
    assert_eq!(block.records[1].exponent, -1);
    match block.records[2].value {
        MBusRecordValue::Real(v) => assert!((v - 41.737).abs() < 0.001, "{v}"),
        ref other => panic!("unexpected {other:?}"),
    }
    assert_eq!(block.records[2].unit, "°C");
    assert_eq!(block.records[3].value, MBusRecordValue::Integer(12_345_678));
    assert!(!block.more_records_follow);
}

#[test]
fn test_negative_bcd_and_functions() {
    // maximum value (function 1), 4 digit BCD with sign nibble
    let block = decode_data_block(&[0x1A, 0x5B, 0x12, 0xF0]).unwrap();
    let record = &block.records[0];
    assert_eq!(record.function, RecordFunction::Maximum);
    assert_eq!(record.value, MBusRecordValue::Integer(-12));

    // invalid BCD digit keeps the raw bytes
    let block = decode_data_block(&[0x0A, 0x5B, 0x1A, 0x00]).unwrap();
    assert_eq!(block.records[0].value, MBusRecordValue::Binary(vec![0x1A, 0x00]));
}

#[test]
fn test_time_points() {
    let block = decode_data_block(&[
        0x04, 0x6D, 0x17, 0x2E, 0xCC, 0x13, // type F
        0x42, 0x6C, 0xBF, 0x1C, // type G, storage number 1
        0x06, 0x6D, 0x05, 0x17, 0x2E, 0xCC, 0x13, 0x00, // type I
    ])
    .unwrap();

    assert_eq!(
        block.records[0].value,
        MBusRecordValue::DateTime(datetime(2014, 3, 12, 14, 23, 0))
    );
    assert_eq!(
        block.records[1].value,
        MBusRecordValue::Date(NaiveDate::from_ymd_opt(2013, 12, 31).unwrap())
    );
    assert_eq!(block.records[1].storage_number, 1);
    assert_eq!(
        block.records[2].value,
        MBusRecordValue::DateTime(datetime(2014, 3, 12, 14, 23, 5))
    );

    // invalid flag set: raw bytes
    let block = decode_data_block(&[0x04, 0x6D, 0x97, 0x2E, 0xCC, 0x13]).unwrap();
    assert_eq!(
        block.records[0].value,
        MBusRecordValue::Binary(vec![0x97, 0x2E, 0xCC, 0x13])
    );
}

#[test]
fn test_lvar_values() {
    let block = decode_data_block(&[
        0x0D, 0xFD, 0x0C, 0x03, b'C', b'B', b'A', // model, reversed string
        0x0D, 0x78, 0xC2, 0x34, 0x12, // BCD LVAR
        0x0D, 0x78, 0xE2, 0xAB, 0xCD, // binary LVAR
    ])
    .unwrap();
    assert_eq!(block.records[0].value, MBusRecordValue::String("ABC".into()));
    assert_eq!(block.records[0].quantity, "Model / Version");
    assert_eq!(block.records[1].value, MBusRecordValue::Integer(1234));
    assert_eq!(block.records[2].value, MBusRecordValue::Binary(vec![0xAB, 0xCD]));

    assert_eq!(
        decode_data_block(&[0x0D, 0x78, 0xF8]).unwrap_err(),
        MBusError::UnknownLvar(0xF8)
    );
}

#[test]
fn test_long_binary_lvar_keeps_record_boundaries() {
    // 0xF5: 48 byte binary number, followed by an 8-bit volume record
    let mut data = vec![0x0D, 0x13, 0xF5];
    data.extend_from_slice(&[0u8; 48]);
    data.extend_from_slice(&[0x01, 0x13, 0x07]);

    let block = decode_data_block(&data).unwrap();
    assert_eq!(block.records.len(), 2);
    assert_eq!(block.records[0].value, MBusRecordValue::Binary(vec![0; 48]));
    assert_eq!(block.records[1].value, MBusRecordValue::Integer(7));

    // 0xF6: 64 byte binary number
    let mut data = vec![0x0D, 0x13, 0xF6];
    data.extend((0..64).map(|i| i as u8));
    let block = decode_data_block(&data).unwrap();
    assert_eq!(block.records.len(), 1);
    assert_eq!(
        block.records[0].value,
        MBusRecordValue::Binary((0..64).map(|i| i as u8).collect())
    );

    // six bytes are not enough for 0xF5
    let mut data = vec![0x0D, 0x13, 0xF5];
    data.extend_from_slice(&[0u8; 6]);
    assert!(matches!(
        decode_data_block(&data),
        Err(MBusError::TruncatedRecord { needed: 48, available: 6, .. })
    ));
}

#[test]
fn test_plain_text_vif() {
    // VIF 0xFC: unit text "lm" (reversed on the wire), then a VIFE
    let block = decode_data_block(&[0x01, 0xFC, 0x02, b'm', b'l', 0x74, 0x2A]).unwrap();
    let record = &block.records[0];
    assert_eq!(record.unit, "lm");
    assert_eq!(record.vib.custom_vif.as_deref(), Some("lm"));
    assert_eq!(record.vib.vife, vec![0x74]);
    assert_eq!(record.exponent, -2);
    assert_eq!(record.value, MBusRecordValue::Integer(0x2A));
}

#[test]
fn test_combinable_vife_adjusts_exponent() {
    // energy Wh (exp -3) with VIFE 0x7D (x1000)
    let block = decode_data_block(&[0x02, 0x80, 0x7D, 0x10, 0x00]).unwrap();
    assert_eq!(block.records[0].unit, "Wh");
    assert_eq!(block.records[0].exponent, 0);
    assert_eq!(block.records[0].scaled_value(), Some(16.0));
}

#[test]
fn test_extension_limits() {
    let mut too_many_dife = vec![0x84];
    too_many_dife.extend([0x80; 10]);
    too_many_dife.extend([0x00, 0x03, 0x00, 0x00, 0x00, 0x00]);
    assert_eq!(decode_data_block(&too_many_dife).unwrap_err(), MBusError::DifTooLong);

    let mut too_many_vife = vec![0x01, 0x83];
    too_many_vife.extend([0xFF; 10]);
    too_many_vife.extend([0x00, 0x00]);
    assert_eq!(decode_data_block(&too_many_vife).unwrap_err(), MBusError::VifTooLong);
}

#[test]
fn test_truncated_record_is_an_error() {
    // second record declares 4 bytes, only 2 present
    let err = decode_data_block(&[0x01, 0x03, 0x07, 0x04, 0x03, 0x01, 0x02]).unwrap_err();
    assert_eq!(
        err,
        MBusError::TruncatedRecord {
            offset: 3,
            needed: 4,
            available: 2
        }
    );

    // the iterator yields the complete record first and stops after the error
    let results: Vec<_> = RecordIter::new(&[0x01, 0x03, 0x07, 0x04, 0x03, 0x01]).collect();
    assert_eq!(results.len(), 2);
    assert!(results[0].is_ok());
    assert!(matches!(results[1], Err(MBusError::TruncatedRecord { .. })));
}

#[test]
fn test_special_difs() {
    let block = decode_data_block(&[
        0x2F, 0x2F, // fillers
        0x01, 0x03, 0x05, //
        0x1F, 0xAA, 0xBB, // more records follow + manufacturer data
    ])
    .unwrap();
    assert_eq!(block.records.len(), 1);
    assert!(block.more_records_follow);
    assert_eq!(block.manufacturer_data, vec![0xAA, 0xBB]);

    assert_eq!(
        decode_data_block(&[0x3F, 0x00]).unwrap_err(),
        MBusError::UnknownDif(0x3F)
    );
}

#[test]
fn test_variable_frame_data() {
    let secondary = SecondaryAddress::new(0x03575845, 0x05B4, 0x34, 0x04);
    let mut data = secondary.to_bytes().to_vec();
    data.extend_from_slice(&[0x9E, 0x14, 0x00, 0x00]);
    data.extend_from_slice(&[0x03, 0x06, 0xF9, 0x34, 0x15]);
    let frame = MBusFrame::long(0x08, 0x01, 0x72, data).unwrap();

    let parsed = MBusFrameData::parse(&frame).unwrap();
    assert_eq!(parsed.secondary_address, Some(secondary));
    assert_eq!(parsed.identification_number, Some(3_575_845));
    assert_eq!(parsed.manufacturer_code().as_deref(), Some("AMT"));
    assert_eq!(parsed.medium_name(), Some("Heat: Outlet"));
    assert_eq!(parsed.access_number, Some(0x9E));
    assert_eq!(
        parsed.status_flags(),
        StatusFlags::POWER_LOW | StatusFlags::TEMPORARY_ERROR
    );
    assert_eq!(parsed.records.len(), 1);
    assert!(parsed.records[0].timestamp.is_none());
}

#[test]
fn test_short_header_and_no_header() {
    let frame = MBusFrame::long(0x08, 0x01, 0x7A, vec![0x05, 0x00, 0x00, 0x00, 0x01, 0x03, 0x09]).unwrap();
    let parsed = MBusFrameData::parse(&frame).unwrap();
    assert_eq!(parsed.access_number, Some(5));
    assert!(parsed.secondary_address.is_none());
    assert_eq!(parsed.records[0].value, MBusRecordValue::Integer(9));

    let frame = MBusFrame::long(0x08, 0x01, 0x78, vec![0x01, 0x03, 0x09]).unwrap();
    let parsed = MBusFrameData::parse(&frame).unwrap();
    assert!(parsed.access_number.is_none());
    assert_eq!(parsed.records.len(), 1);

    // header cut short
    let frame = MBusFrame::long(0x08, 0x01, 0x72, vec![0x01, 0x02]).unwrap();
    assert!(matches!(
        MBusFrameData::parse(&frame),
        Err(MBusError::TruncatedRecord { .. })
    ));
}

#[test]
fn test_fixed_data_structure() {
    let data = vec![
        0x78, 0x56, 0x34, 0x12, // identification, BCD
        0x01, // access number
        0x00, // status: BCD counters, actual values
        0xC5, 0x69, // counter types: kWh and 0.001 m^3, medium bits = water
        0x34, 0x12, 0x00, 0x00, //
        0x56, 0x00, 0x00, 0x00, //
    ];
    let frame = MBusFrame::long(0x08, 0x01, 0x73, data).unwrap();
    let parsed = MBusFrameData::parse(&frame).unwrap();

    assert_eq!(parsed.identification_number, Some(12_345_678));
    assert_eq!(parsed.medium, Some(7));
    assert_eq!(parsed.medium_name(), Some("Water"));
    assert_eq!(parsed.records.len(), 2);
    assert_eq!(parsed.records[0].value, MBusRecordValue::Integer(1234));
    assert_eq!(parsed.records[0].unit, "Wh");
    assert_eq!(parsed.records[0].exponent, 3);
    assert_eq!(parsed.records[1].value, MBusRecordValue::Integer(56));
    assert_eq!(parsed.records[1].unit, "m^3");
    assert_eq!(parsed.records[1].exponent, -3);
    assert_eq!(parsed.records[1].storage_number, 0);
}

#[test]
fn test_ci_dispatch_errors() {
    let frame = MBusFrame::long(0x08, 0x01, 0x70, vec![0x08]).unwrap();
    assert_eq!(MBusFrameData::parse(&frame), Err(MBusError::ApplicationError(0x08)));

    let frame = MBusFrame::long(0x08, 0x01, 0x55, vec![0x00]).unwrap();
    assert_eq!(MBusFrameData::parse(&frame), Err(MBusError::UnsupportedCi(0x55)));
}

#[test]
fn test_append_telegram() {
    let first = MBusFrame::long(0x08, 0x01, 0x78, vec![0x01, 0x03, 0x01, 0x1F]).unwrap();
    let second = MBusFrame::long(0x08, 0x01, 0x78, vec![0x01, 0x03, 0x02]).unwrap();

    let mut data = MBusFrameData::parse(&first).unwrap();
    assert!(data.more_records_follow);
    data.append_telegram(MBusFrameData::parse(&second).unwrap());

    assert!(!data.more_records_follow);
    assert_eq!(data.telegram_count, 2);
    let values: Vec<_> = data.records.iter().map(|r| r.value.clone()).collect();
    assert_eq!(
        values,
        [MBusRecordValue::Integer(1), MBusRecordValue::Integer(2)]
    );
}
