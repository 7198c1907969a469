#![no_main]

use libfuzzer_sys::fuzz_target;
use mbus_master::mbus::frame::{decode_frame, pack_frame, FrameDecode, FrameDecoder};

fuzz_target!(|data: &[u8]| {
    let whole = decode_frame(data);

    // feeding the same bytes one at a time must agree with the one-shot decode
    let mut decoder = FrameDecoder::new();
    let mut bytewise = None;
    for byte in data {
        decoder.push(*byte);
        match decoder.decode() {
            Ok(FrameDecode::NeedMoreBytes(n)) => assert!(n >= 1),
            other => {
                bytewise = Some(other);
                break;
            }
        }
    }

    match whole {
        Ok(FrameDecode::Complete { frame, consumed }) => {
            assert_eq!(pack_frame(&frame), &data[..consumed]);
            assert!(matches!(bytewise, Some(Ok(FrameDecode::Complete { .. }))));
        }
        Ok(FrameDecode::NeedMoreBytes(n)) => {
            assert!(n >= 1);
            assert!(bytewise.is_none());
        }
        Err(_) => assert!(matches!(bytewise, Some(Err(_)))),
    }
});
