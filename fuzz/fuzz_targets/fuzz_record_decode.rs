#![no_main]

use libfuzzer_sys::fuzz_target;
use mbus_master::payload::{decode_data_block, RecordIter};
use mbus_master::{MBusFrame, MBusFrameData};

fuzz_target!(|data: &[u8]| {
    // the decoder must never read past the block, whatever the DIF/VIF say
    let _ = decode_data_block(data);
    for record in RecordIter::new(data) {
        if record.is_err() {
            break;
        }
    }

    if let Some((&ci, rest)) = data.split_first() {
        if let Ok(frame) = MBusFrame::long(0x08, 0x01, ci, rest.to_vec()) {
            let _ = MBusFrameData::parse(&frame);
        }
    }
});
