//! # mbus-master - A Rust Crate for M-Bus (Meter-Bus) Master Communication
//!
//! The mbus-master crate implements the host side of the M-Bus (Meter-Bus)
//! protocol (EN 13757-2/3), the European standard for reading utility meters
//! such as water, heat, gas and electricity meters over a two-wire bus.
//!
//! ## Features
//!
//! - Connect to an M-Bus segment through a serial port (8E1) or a TCP gateway
//! - Encode and incrementally decode ACK, short, control and long frames
//! - Request/response transactions with purge, timeout, retry and
//!   multi-telegram ("more records follow") reassembly
//! - Primary address scanning and secondary address selection with
//!   collision resolution over wildcard masks
//! - Decode variable and fixed data structures into typed records, resolving
//!   the DIF/DIFE and VIF/VIFE chains to storage number, tariff, unit and exponent
//! - Logging through the `log` facade and a scriptable mock transport for tests
//!
//! ## Usage
//!
//! ```rust
//! use mbus_master::{
//!     connect, disconnect, send_request, scan_devices,
//!     MBusRecord, MBusRecordValue, MBusError, init_logger, log_info,
//!     MBusFrame, MBusFrameType, ConnectionTarget,
//! };
//! ```
//!
//! Decoding a received telegram does not need a connection:
//!
//! ```rust
//! use mbus_master::{decode_frame, FrameDecode, MBusFrame, MBusFrameData, SecondaryAddress};
//!
//! // RSP_UD from address 5: long header, one 4 byte energy record (42 Wh)
//! let mut data = SecondaryAddress::new(0x12345678, 0x05B4, 0x01, 0x07).to_bytes().to_vec();
//! data.extend_from_slice(&[0x2A, 0x00, 0x00, 0x00]);
//! data.extend_from_slice(&[0x04, 0x03, 0x2A, 0x00, 0x00, 0x00]);
//! let bytes = MBusFrame::long(0x08, 0x05, 0x72, data).unwrap().to_bytes();
//!
//! if let FrameDecode::Complete { frame, .. } = decode_frame(&bytes).unwrap() {
//!     let data = MBusFrameData::parse(&frame).unwrap();
//!     assert_eq!(data.identification_number, Some(12345678));
//!     assert_eq!(data.manufacturer_code().as_deref(), Some("AMT"));
//!     assert_eq!(data.records.len(), 1);
//! }
//! ```

pub mod config;
pub mod constants;
pub mod error;
pub mod logging;
pub mod mbus;
pub mod payload;
pub mod util;

pub use crate::config::{BusConfig, ConnectionTarget};
pub use crate::error::MBusError;
pub use crate::logging::{init_logger, log_info};

// Core M-Bus types
pub use mbus::{
    decode_frame, FrameDecode, MBusFrame, MBusFrameType, MBusHandle, ProbeResult,
    SecondaryAddress, Transport,
};
pub use payload::{normalize_vib, MBusFrameData, MBusRecord, MBusRecordValue};

/// Connect to an M-Bus segment.
///
/// # Arguments
/// * `target` - Serial device or TCP gateway
///
/// # Returns
/// * `Ok(MBusHandle)` - Handle owning the opened transport
/// * `Err(MBusError)` - Invalid target or the link could not be opened
pub async fn connect(target: &ConnectionTarget) -> Result<MBusHandle, MBusError> {
    MBusHandle::connect(target).await
}

/// Disconnect from the M-Bus segment and release the transport.
pub async fn disconnect(handle: MBusHandle) -> Result<(), MBusError> {
    handle.close().await
}

/// Receive a frame from the bus.
///
/// # Returns
/// * `Ok(MBusFrame)` - Received and checksum-verified frame
/// * `Err(MBusError)` - Timeout, malformed frame or transport failure
pub async fn recv_frame(handle: &mut MBusHandle) -> Result<MBusFrame, MBusError> {
    handle.receive_frame().await
}

/// Send a frame to the bus without waiting for a response.
pub async fn send_frame(handle: &mut MBusHandle, frame: &MBusFrame) -> Result<(), MBusError> {
    handle.send_frame(frame).await
}

/// Scan for devices on all primary addresses.
///
/// # Returns
/// * `Ok(Vec<u8>)` - Primary addresses that acknowledged SND_NKE
/// * `Err(MBusError)` - The transport failed
pub async fn scan_devices(handle: &mut MBusHandle) -> Result<Vec<u8>, MBusError> {
    handle.scan_primary().await
}

/// Send a data request to a specific M-Bus device and retrieve its records.
///
/// # Arguments
/// * `handle` - Handle to communicate through
/// * `address` - Primary address (0-250) or 0xFD for a selected device
///
/// # Returns
/// * `Ok(MBusFrameData)` - Header and records of all telegrams of the response
/// * `Err(MBusError)` - Request failed
pub async fn send_request(handle: &mut MBusHandle, address: u8) -> Result<MBusFrameData, MBusError> {
    handle.request_data(address).await
}

/// Enumerate all devices matching a secondary address mask.
pub async fn scan_secondary(
    handle: &mut MBusHandle,
    mask: &SecondaryAddress,
) -> Result<Vec<SecondaryAddress>, MBusError> {
    handle.scan_secondary(mask).await
}
