//! M-Bus Protocol Constants
//!
//! This module defines constants used in the M-Bus protocol implementation,
//! based on the EN 13757-2/3 standards.

// ----------------------------------------------------------------------------
// Frame delimiters
// ----------------------------------------------------------------------------

/// Single character acknowledgement
pub const MBUS_FRAME_ACK_START: u8 = 0xE5;

/// Start byte of a short frame
pub const MBUS_FRAME_SHORT_START: u8 = 0x10;

/// Start byte (both of them) of a control or long frame
pub const MBUS_FRAME_LONG_START: u8 = 0x68;

/// Stop byte of every frame except the single character
pub const MBUS_FRAME_STOP: u8 = 0x16;

/// Short frame: start, C, A, checksum, stop
pub const MBUS_FRAME_SHORT_LENGTH: usize = 5;

/// Bytes of a long frame outside the L-counted part (68 L L 68 .. CS 16)
pub const MBUS_FRAME_LONG_OVERHEAD: usize = 6;

/// Smallest valid L field (C + A + CI)
pub const MBUS_FRAME_MIN_L_FIELD: u8 = 3;

// ----------------------------------------------------------------------------
// Addresses
// ----------------------------------------------------------------------------

/// Highest primary address a slave may own
pub const MBUS_ADDRESS_MAX_PRIMARY: u8 = 250;

/// Network layer (secondary addressing) address
pub const MBUS_ADDRESS_NETWORK_LAYER: u8 = 0xFD;

/// Test/broadcast address, slaves reply
pub const MBUS_ADDRESS_BROADCAST_REPLY: u8 = 0xFE;

/// Broadcast address, slaves do not reply
pub const MBUS_ADDRESS_BROADCAST_NOREPLY: u8 = 0xFF;

// ----------------------------------------------------------------------------
// Control field
// ----------------------------------------------------------------------------

// Control bytes for common master-to-slave commands
pub const MBUS_CONTROL_MASK_SND_NKE: u8 = 0x40;
pub const MBUS_CONTROL_MASK_SND_UD: u8 = 0x53; // includes DIR M2S and FCV
pub const MBUS_CONTROL_MASK_REQ_UD2: u8 = 0x5B; // includes DIR M2S and FCV
pub const MBUS_CONTROL_MASK_REQ_UD1: u8 = 0x5A; // includes DIR M2S and FCV
pub const MBUS_CONTROL_MASK_RSP_UD: u8 = 0x08; // S2M response

/// Function code bits of the control field
pub const MBUS_CONTROL_FUNCTION_MASK: u8 = 0x0F;

// Control flag bits
pub const MBUS_CONTROL_MASK_FCB: u8 = 0x20;
pub const MBUS_CONTROL_MASK_FCV: u8 = 0x10;
pub const MBUS_CONTROL_MASK_DIR_M2S: u8 = 0x40;

// ----------------------------------------------------------------------------
// Control information (CI) codes
// ----------------------------------------------------------------------------

pub const MBUS_CONTROL_INFO_DATA_SEND: u8 = 0x51;
pub const MBUS_CONTROL_INFO_SELECT_SLAVE: u8 = 0x52;
pub const MBUS_CONTROL_INFO_ERROR_GENERAL: u8 = 0x70;
pub const MBUS_CONTROL_INFO_RESP_VARIABLE: u8 = 0x72;
pub const MBUS_CONTROL_INFO_RESP_FIXED: u8 = 0x73;
pub const MBUS_CONTROL_INFO_RESP_VARIABLE_NO_HEADER: u8 = 0x78;
pub const MBUS_CONTROL_INFO_RESP_VARIABLE_SHORT_HEADER: u8 = 0x7A;

// ----------------------------------------------------------------------------
// Data information block
// ----------------------------------------------------------------------------

/// DIF (Data Information Field) mask for data length and coding
pub const MBUS_DATA_RECORD_DIF_MASK_DATA: u8 = 0x0F;

/// DIF mask for function
pub const MBUS_DATA_RECORD_DIF_MASK_FUNCTION: u8 = 0x30;

/// DIF mask for storage number
pub const MBUS_DATA_RECORD_DIF_MASK_STORAGE_NO: u8 = 0x40;

/// DIFE (Data Information Field Extension) mask for storage number
pub const MBUS_DATA_RECORD_DIFE_MASK_STORAGE_NO: u8 = 0x0F;

/// DIFE mask for tariff
pub const MBUS_DATA_RECORD_DIFE_MASK_TARIFF: u8 = 0x30;

/// DIFE mask for device
pub const MBUS_DATA_RECORD_DIFE_MASK_DEVICE: u8 = 0x40;

/// DIF idle filler
pub const MBUS_DIB_DIF_IDLE_FILLER: u8 = 0x2F;

/// DIF manufacturer specific
pub const MBUS_DIB_DIF_MANUFACTURER_SPECIFIC: u8 = 0x0F;

/// DIF more records follow
pub const MBUS_DIB_DIF_MORE_RECORDS_FOLLOW: u8 = 0x1F;

/// DIF global readout request
pub const MBUS_DIB_DIF_GLOBAL_READOUT: u8 = 0x7F;

/// DIF extension bit
pub const MBUS_DIB_DIF_EXTENSION_BIT: u8 = 0x80;

/// Maximum number of DIFE bytes in one record
pub const MBUS_DIB_DIFE_MAX: usize = 10;

// ----------------------------------------------------------------------------
// Value information block
// ----------------------------------------------------------------------------

/// VIF without extension
pub const MBUS_DIB_VIF_WITHOUT_EXTENSION: u8 = 0x7F;

/// VIF extension bit
pub const MBUS_DIB_VIF_EXTENSION_BIT: u8 = 0x80;

/// Maximum number of VIFE bytes in one record
pub const MBUS_DIB_VIFE_MAX: usize = 10;

/// Plain text VIF (unit follows as a string)
pub const MBUS_VIF_PLAIN_TEXT: u8 = 0x7C;

/// Main VIF code extension table (0xFD)
pub const MBUS_VIF_EXTENSION_FD: u8 = 0xFD;

/// Alternate VIF code extension table (0xFB)
pub const MBUS_VIF_EXTENSION_FB: u8 = 0xFB;

/// Any VIF
pub const MBUS_VIF_ANY: u8 = 0x7E;

/// Manufacturer specific VIF
pub const MBUS_VIF_MANUFACTURER_SPECIFIC: u8 = 0x7F;

/// Custom VIF size
pub const MBUS_VALUE_INFO_BLOCK_CUSTOM_VIF_SIZE: u8 = 16;

// ----------------------------------------------------------------------------
// Data headers
// ----------------------------------------------------------------------------

/// Long header of a variable data structure (CI 0x72)
pub const MBUS_DATA_VARIABLE_HEADER_LENGTH: usize = 12;

/// Short header of a variable data structure (CI 0x7A)
pub const MBUS_DATA_SHORT_HEADER_LENGTH: usize = 4;

// Fixed data constants
pub const MBUS_DATA_FIXED_LENGTH: usize = 16;
pub const MBUS_DATA_FIXED_STATUS_FORMAT_MASK: u8 = 0x80;
pub const MBUS_DATA_FIXED_STATUS_FORMAT_BCD: u8 = 0x00;
pub const MBUS_DATA_FIXED_STATUS_FORMAT_INT: u8 = 0x80;
pub const MBUS_DATA_FIXED_STATUS_DATE_MASK: u8 = 0x40;
pub const MBUS_DATA_FIXED_STATUS_DATE_STORED: u8 = 0x40;
pub const MBUS_DATA_FIXED_STATUS_DATE_CURRENT: u8 = 0x00;

// ----------------------------------------------------------------------------
// Serial line
// ----------------------------------------------------------------------------

/// Baud rates a master may configure
pub const MBUS_SUPPORTED_BAUDRATES: &[u32] = &[300, 600, 1200, 2400, 4800, 9600, 19200, 38400];

/// Default baud rate for a serial link
pub const MBUS_DEFAULT_BAUDRATE: u32 = 2400;

/// Default TCP port of M-Bus gateways
pub const MBUS_DEFAULT_TCP_PORT: u16 = 8888;
