//! The mbus module contains the components responsible for the core M-Bus protocol
//! implementation: frame parsing and packing, secondary addressing, the
//! transaction engine and the byte transports it runs over.

pub mod frame;
pub mod mbus_protocol;
pub mod mock;
pub mod secondary_addressing;
pub mod serial;
pub mod tcp;
pub mod transport;

pub use frame::{
    decode_frame, pack_frame, parse_frame, verify_frame, ControlFlags, FrameDecode, FrameDecoder,
};
pub use mbus_protocol::{check_address, MBusHandle, MBusProtocolState, SessionStats, StateMachine};
pub use secondary_addressing::{ProbeResult, SecondaryAddress, WildcardSearch};
pub use transport::{StreamTransport, Transport};

/// Represents an M-Bus frame.
pub use frame::MBusFrame;

/// Represents the different types of M-Bus frames.
pub use frame::MBusFrameType;
