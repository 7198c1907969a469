//! Tests for the frame codec: parsing, packing, verification and incremental decoding.

use mbus_master::mbus::frame::{
    decode_frame, pack_frame, parse_frame, verify_frame, FrameDecode, FrameDecoder, MBusFrame,
    MBusFrameType,
};
use mbus_master::{MBusError, SecondaryAddress};
use proptest::prelude::*;

fn complete(bytes: &[u8]) -> MBusFrame {
    match decode_frame(bytes).unwrap() {
        FrameDecode::Complete { frame, consumed } => {
            assert_eq!(consumed, bytes.len());
            frame
        }
        other => panic!("expected a complete frame, got {other:?}"),
    }
}

/// Tests that an ACK frame is correctly parsed.
#[test]
fn test_parse_ack_frame() {
    let (rest, frame) = parse_frame(&[0xE5]).unwrap();
    assert!(rest.is_empty());
    assert_eq!(frame.frame_type, MBusFrameType::Ack);
    assert_eq!(pack_frame(&frame), vec![0xE5]);
}

/// Tests that a Short frame is correctly parsed.
#[test]
fn test_parse_short_frame() {
    let frame = complete(&[0x10, 0x5B, 0x01, 0x5C, 0x16]);
    assert_eq!(frame.frame_type, MBusFrameType::Short);
    assert_eq!(frame.control, 0x5B);
    assert_eq!(frame.address, 0x01);
    assert_eq!(frame.checksum, 0x5C);
}

/// Tests that a Control frame is correctly parsed.
#[test]
fn test_parse_control_frame() {
    let bytes = [0x68, 0x03, 0x03, 0x68, 0x53, 0x01, 0x00, 0x54, 0x16];
    let frame = complete(&bytes);
    assert_eq!(frame.frame_type, MBusFrameType::Control);
    assert!(frame.data.is_empty());
    assert_eq!(pack_frame(&frame), bytes);
}

#[test]
fn test_parse_long_frame() {
    let bytes = [0x68, 0x04, 0x04, 0x68, 0x53, 0xFD, 0x52, 0xCF, 0x71, 0x16];
    let frame = complete(&bytes);
    assert_eq!(frame.frame_type, MBusFrameType::Long);
    assert_eq!(frame.control, 0x53);
    assert_eq!(frame.address, 0xFD);
    assert_eq!(frame.control_information, 0x52);
    assert_eq!(frame.data, vec![0xCF]);
    assert_eq!(frame.checksum, 0x71);
    assert_eq!(pack_frame(&frame), bytes);
}

#[test]
fn test_request_constructors() {
    assert_eq!(MBusFrame::snd_nke(1).to_bytes(), vec![0x10, 0x40, 0x01, 0x41, 0x16]);
    assert_eq!(MBusFrame::req_ud2(1, true).to_bytes(), vec![0x10, 0x7B, 0x01, 0x7C, 0x16]);
    assert_eq!(MBusFrame::req_ud2(1, false).to_bytes(), vec![0x10, 0x5B, 0x01, 0x5C, 0x16]);

    let select = MBusFrame::select_secondary(&SecondaryAddress::new(0x12345678, 0x05B4, 0x01, 0x07));
    let bytes = select.to_bytes();
    assert_eq!(&bytes[..7], &[0x68, 0x0B, 0x0B, 0x68, 0x53, 0xFD, 0x52]);
    assert_eq!(&bytes[7..15], &[0x78, 0x56, 0x34, 0x12, 0xB4, 0x05, 0x01, 0x07]);
    assert!(verify_frame(&select).is_ok());

    let set = MBusFrame::set_primary_address(5, 7);
    assert_eq!(set.data, vec![0x01, 0x7A, 0x07]);
    assert!(verify_frame(&set).is_ok());
}

#[test]
fn test_long_frame_size_limit() {
    assert!(MBusFrame::long(0x53, 1, 0x51, vec![0; 252]).is_ok());
    assert!(matches!(
        MBusFrame::long(0x53, 1, 0x51, vec![0; 253]),
        Err(MBusError::FrameParseError(_))
    ));
}

#[test]
fn test_structural_errors() {
    // bad start byte
    assert!(matches!(decode_frame(&[0x42]), Err(MBusError::FrameParseError(_))));
    // length fields differ
    assert!(matches!(
        decode_frame(&[0x68, 0x04, 0x05, 0x68]),
        Err(MBusError::FrameParseError(_))
    ));
    // L below 3
    assert!(matches!(
        decode_frame(&[0x68, 0x02, 0x02, 0x68]),
        Err(MBusError::FrameParseError(_))
    ));
    // bad stop byte
    assert!(matches!(
        decode_frame(&[0x10, 0x5B, 0x01, 0x5C, 0x17]),
        Err(MBusError::FrameParseError(_))
    ));
}

#[test]
fn test_checksum_error() {
    assert_eq!(
        decode_frame(&[0x10, 0x5B, 0x01, 0x5D, 0x16]),
        Err(MBusError::InvalidChecksum {
            expected: 0x5D,
            calculated: 0x5C
        })
    );
}

#[test]
fn test_incremental_decoding() {
    let bytes = [0x68, 0x04, 0x04, 0x68, 0x53, 0xFD, 0x52, 0xCF, 0x71, 0x16];
    // the example without its checksum byte is one byte short
    assert_eq!(
        decode_frame(&[0x68, 0x04, 0x04, 0x68, 0x53, 0xFD, 0x52, 0xCF, 0x16]).unwrap(),
        FrameDecode::NeedMoreBytes(1)
    );

    let mut decoder = FrameDecoder::new();
    for (i, byte) in bytes.iter().enumerate() {
        decoder.push(*byte);
        match decoder.decode().unwrap() {
            FrameDecode::NeedMoreBytes(n) => assert!(i + 1 < bytes.len() && n >= 1),
            FrameDecode::Complete { frame, .. } => {
                assert_eq!(i + 1, bytes.len());
                assert_eq!(frame.data, vec![0xCF]);
            }
        }
    }
    assert!(decoder.buffered().is_empty());
}

fn arb_frame() -> impl Strategy<Value = MBusFrame> {
    prop_oneof![
        Just(MBusFrame::ack()),
        (any::<u8>(), any::<u8>()).prop_map(|(c, a)| MBusFrame::short(c, a)),
        (any::<u8>(), any::<u8>(), any::<u8>(), prop::collection::vec(any::<u8>(), 0..=252))
            .prop_map(|(c, a, ci, data)| MBusFrame::long(c, a, ci, data).unwrap()),
    ]
}

proptest! {
    #[test]
    fn prop_round_trip(frame in arb_frame()) {
        let bytes = pack_frame(&frame);
        match decode_frame(&bytes).unwrap() {
            FrameDecode::Complete { frame: decoded, consumed } => {
                prop_assert_eq!(consumed, bytes.len());
                prop_assert_eq!(pack_frame(&decoded), bytes);
                prop_assert_eq!(decoded, frame);
            }
            other => prop_assert!(false, "incomplete: {:?}", other),
        }
    }

    #[test]
    fn prop_corrupted_byte_is_checksum_error(
        c in any::<u8>(),
        a in any::<u8>(),
        ci in any::<u8>(),
        data in prop::collection::vec(any::<u8>(), 1..64),
        index in any::<prop::sample::Index>(),
        flip in 1u8..=255,
    ) {
        let frame = MBusFrame::long(c, a, ci, data).unwrap();
        let mut bytes = pack_frame(&frame);
        // C, A, CI and data sit between the header and the checksum
        let payload = 4..bytes.len() - 2;
        let pos = payload.start + index.index(payload.len());
        bytes[pos] ^= flip;
        let is_checksum_error = matches!(decode_frame(&bytes), Err(MBusError::InvalidChecksum { .. }));
        prop_assert!(is_checksum_error);
    }

    #[test]
    fn prop_prefix_needs_more_bytes(frame in arb_frame(), cut in any::<prop::sample::Index>()) {
        let bytes = pack_frame(&frame);
        let len = cut.index(bytes.len());
        let is_incomplete = matches!(decode_frame(&bytes[..len]), Ok(FrameDecode::NeedMoreBytes(n)) if n >= 1);
        prop_assert!(is_incomplete);
    }
}
