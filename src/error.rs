//! # M-Bus Error Handling
//!
//! This module defines the MBusError enum, which represents the different error
//! types that can occur in the mbus-master crate.
//!
//! Errors fall into three groups:
//! - transient protocol errors (`Timeout`, `InvalidChecksum`) which the
//!   transaction engine retries until the retry budget is spent,
//! - fatal errors (`FrameParseError`, `TransportIo`, `UnexpectedFrame`, ...)
//!   which abort the current transaction immediately,
//! - decode and selection outcomes (`TruncatedRecord`, `Collision`, `NoDevice`)
//!   which are reported to the caller as-is.

use thiserror::Error;

/// Represents the different error types that can occur in the M-Bus crate.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MBusError {
    /// Malformed frame delimiters, length fields or start/stop bytes.
    #[error("Error parsing M-Bus frame: {0}")]
    FrameParseError(String),

    /// Indicates a checksum mismatch.
    #[error("Invalid checksum: expected 0x{expected:02X}, calculated 0x{calculated:02X}")]
    InvalidChecksum { expected: u8, calculated: u8 },

    /// No (complete) response arrived within the configured timeout.
    #[error("Timed out waiting for a response")]
    Timeout,

    /// A data record declared more bytes than the data block holds.
    #[error("Truncated data record at offset {offset}: needed {needed} bytes, {available} available")]
    TruncatedRecord {
        offset: usize,
        needed: usize,
        available: usize,
    },

    /// Several devices answered the same secondary address selection.
    #[error("Collision during secondary address selection")]
    Collision,

    /// No device answered.
    #[error("No device responded")]
    NoDevice,

    /// The physical link failed.
    #[error("Transport I/O error ({kind:?}): {message}")]
    TransportIo {
        kind: std::io::ErrorKind,
        message: String,
    },

    /// Indicates an error related to opening the serial port.
    #[error("Serial port error: {0}")]
    SerialPortError(String),

    /// A well-formed frame of the wrong kind arrived for the request.
    #[error("Unexpected frame in response: {0}")]
    UnexpectedFrame(String),

    /// The slave answered with an application error (CI 0x70).
    #[error("Slave reported application error 0x{0:02X}")]
    ApplicationError(u8),

    /// The control information field is not supported by the decoder.
    #[error("Unsupported control information: 0x{0:02X}")]
    UnsupportedCi(u8),

    /// Indicates an unknown or reserved DIF.
    #[error("Unknown DIF: 0x{0:02X}")]
    UnknownDif(u8),

    /// Indicates an unsupported variable-length (LVAR) marker.
    #[error("Unsupported LVAR: 0x{0:02X}")]
    UnknownLvar(u8),

    /// More than ten DIFE bytes in one record.
    #[error("DIF too long")]
    DifTooLong,

    /// More than ten VIFE bytes in one record.
    #[error("VIF too long")]
    VifTooLong,

    /// Indicates a primary address that cannot be used for the request.
    #[error("Invalid primary address: {0}")]
    InvalidAddress(u8),

    /// Indicates a malformed secondary address or selection mask.
    #[error("Invalid secondary address: {0}")]
    InvalidSecondaryAddress(String),

    /// Indicates an invalid hexadecimal string was provided.
    #[error("Invalid hexadecimal string")]
    InvalidHexString,

    /// Indicates an invalid manufacturer code.
    #[error("Invalid manufacturer")]
    InvalidManufacturer,

    /// Invalid connection target or bus configuration.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl MBusError {
    /// Returns true for protocol errors that are worth re-sending the request for.
    pub fn is_transient(&self) -> bool {
        matches!(self, MBusError::Timeout | MBusError::InvalidChecksum { .. })
    }

    /// Returns true if the physical link itself failed.
    pub fn is_transport_failure(&self) -> bool {
        matches!(self, MBusError::TransportIo { .. })
    }
}

impl From<std::io::Error> for MBusError {
    fn from(err: std::io::Error) -> Self {
        MBusError::TransportIo {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for MBusError {
    fn from(err: serde_json::Error) -> Self {
        MBusError::Config(err.to_string())
    }
}

/// Describes the application error codes a slave may report with CI 0x70.
pub fn application_error_description(code: u8) -> &'static str {
    match code {
        0x00 => "unspecified error",
        0x01 => "unimplemented CI-field",
        0x02 => "buffer too long, truncated",
        0x03 => "too many records",
        0x04 => "premature end of record",
        0x05 => "more than 10 DIFE",
        0x06 => "more than 10 VIFE",
        0x08 => "application too busy for handling readout request",
        0x09 => "too many readouts",
        _ => "reserved",
    }
}
