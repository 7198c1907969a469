//! # M-Bus Serial Communication
//!
//! Opens a serial port with the line settings mandated by EN 13757-2:
//! 8 data bits, even parity, 1 stop bit. Only the baud rate is configurable.

use std::time::Duration;

use tokio_serial::{SerialPortBuilderExt, SerialStream};

use crate::constants::MBUS_SUPPORTED_BAUDRATES;
use crate::error::MBusError;
use crate::mbus::transport::StreamTransport;

/// Serial transport type.
pub type SerialTransport = StreamTransport<SerialStream>;

/// Opens `path` at `baudrate` (8E1).
pub fn open_serial(path: &str, baudrate: u32) -> Result<SerialTransport, MBusError> {
    if !MBUS_SUPPORTED_BAUDRATES.contains(&baudrate) {
        return Err(MBusError::Config(format!("unsupported baud rate {baudrate}")));
    }

    let port = tokio_serial::new(path, baudrate)
        .data_bits(tokio_serial::DataBits::Eight)
        .stop_bits(tokio_serial::StopBits::One)
        .parity(tokio_serial::Parity::Even)
        .flow_control(tokio_serial::FlowControl::None)
        .open_native_async()
        .map_err(|e| MBusError::SerialPortError(format!("{path}: {e}")))?;

    log::info!("Opened serial port {path} at {baudrate} baud (8E1)");
    Ok(StreamTransport::new(port, format!("serial {path}")))
}

/// Default per-byte response timeout for a baud rate.
pub fn response_timeout_for_baudrate(baudrate: u32) -> Duration {
    let millis = match baudrate {
        300 => 1300,
        600 => 800,
        1200 => 500,
        2400 | 4800 => 300,
        9600 | 19200 | 38400 => 200,
        _ => 500,
    };
    Duration::from_millis(millis)
}
