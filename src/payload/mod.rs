//! The payload module contains the components responsible for decoding the
//! application layer data carried by M-Bus long frames.

pub mod data;
pub mod data_encoding;
pub mod record;
pub mod vif;
pub mod vif_maps;

pub use data::{MBusFrameData, StatusFlags};
pub use record::{
    decode_data_block, DataBlock, DataInformationBlock, RecordFunction, RecordIter,
};
pub use vif::{normalize_vib, ValueInformationBlock, VifInfo};

/// Represents a data record in the M-Bus protocol.
pub use record::MBusRecord;

/// Represents the value of an M-Bus data record.
pub use record::MBusRecordValue;
