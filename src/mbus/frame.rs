//! # M-Bus Frame Codec
//!
//! This module encodes and decodes the Meter-Bus link layer frames defined in
//! EN 13757-2. It leverages the streaming parsers of the `nom` crate so that a
//! partial buffer is reported as "need N more bytes" instead of an error, which
//! lets the transaction engine read a frame byte by byte from a blocking
//! transport.
//!
//! ## Frame layouts
//! - Acknowledgement: `E5`
//! - Short frame: `10 C A CS 16`
//! - Control frame: `68 03 03 68 C A CI CS 16`
//! - Long frame: `68 L L 68 C A CI data... CS 16`, where L counts C, A, CI and
//!   the data bytes and CS is the sum of those bytes modulo 256.
//!
//! ## Usage
//!
//! ```rust
//! use mbus_master::mbus::frame::{decode_frame, pack_frame, FrameDecode, MBusFrameType};
//!
//! let bytes = [0x68, 0x04, 0x04, 0x68, 0x53, 0xFD, 0x52, 0xCF, 0x71, 0x16];
//! match decode_frame(&bytes).unwrap() {
//!     FrameDecode::Complete { frame, consumed } => {
//!         assert_eq!(frame.frame_type, MBusFrameType::Long);
//!         assert_eq!(consumed, bytes.len());
//!         assert_eq!(pack_frame(&frame), bytes);
//!     }
//!     FrameDecode::NeedMoreBytes(_) => unreachable!(),
//! }
//!
//! // A truncated buffer is not an error
//! assert_eq!(decode_frame(&bytes[..4]).unwrap(), FrameDecode::NeedMoreBytes(6));
//! ```
//!
//! ## Error Handling
//! Malformed delimiters and length fields are reported as
//! `MBusError::FrameParseError`, a checksum mismatch as
//! `MBusError::InvalidChecksum`. The transaction engine retries the latter and
//! aborts on the former.

use std::fmt;

use bitflags::bitflags;
use bytes::{BufMut, BytesMut};
use nom::bytes::streaming::take;
use nom::error::{ErrorKind, ParseError};
use nom::number::streaming::be_u8;
use nom::{Err as NomErr, IResult, Needed};

use crate::constants::*;
use crate::mbus::secondary_addressing::SecondaryAddress;
use crate::MBusError;

/// Represents an M-Bus frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MBusFrame {
    pub frame_type: MBusFrameType,
    pub control: u8,
    pub address: u8,
    pub control_information: u8,
    pub data: Vec<u8>,
    pub checksum: u8,
}

/// Represents the different types of M-Bus frames.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum MBusFrameType {
    Ack,
    Short,
    Control,
    Long,
}

impl fmt::Display for MBusFrameType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MBusFrameType::Ack => "ACK",
            MBusFrameType::Short => "short",
            MBusFrameType::Control => "control",
            MBusFrameType::Long => "long",
        };
        f.write_str(name)
    }
}

bitflags! {
    /// Flag bits of the control field.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ControlFlags: u8 {
        /// Frame count bit valid
        const FCV = MBUS_CONTROL_MASK_FCV;
        /// Frame count bit, toggled for every new request of a sequence
        const FCB = MBUS_CONTROL_MASK_FCB;
        /// Master to slave direction
        const DIR_M2S = MBUS_CONTROL_MASK_DIR_M2S;
    }
}

impl MBusFrame {
    /// The single character acknowledgement.
    pub fn ack() -> Self {
        MBusFrame {
            frame_type: MBusFrameType::Ack,
            control: 0,
            address: 0,
            control_information: 0,
            data: Vec::new(),
            checksum: 0,
        }
    }

    /// Short frame with the checksum filled in.
    pub fn short(control: u8, address: u8) -> Self {
        MBusFrame {
            frame_type: MBusFrameType::Short,
            control,
            address,
            control_information: 0,
            data: Vec::new(),
            checksum: control.wrapping_add(address),
        }
    }

    /// Control or long frame (depending on whether `data` is empty) with the
    /// checksum filled in. At most 252 data bytes fit into the L field.
    pub fn long(
        control: u8,
        address: u8,
        control_information: u8,
        data: Vec<u8>,
    ) -> Result<Self, MBusError> {
        if data.len() > u8::MAX as usize - MBUS_FRAME_MIN_L_FIELD as usize {
            return Err(MBusError::FrameParseError(format!(
                "{} data bytes do not fit into a long frame",
                data.len()
            )));
        }
        let frame_type = if data.is_empty() {
            MBusFrameType::Control
        } else {
            MBusFrameType::Long
        };
        let mut frame = MBusFrame {
            frame_type,
            control,
            address,
            control_information,
            data,
            checksum: 0,
        };
        frame.checksum = calculate_checksum(&frame);
        Ok(frame)
    }

    /// SND_NKE: link reset / deselect.
    pub fn snd_nke(address: u8) -> Self {
        Self::short(MBUS_CONTROL_MASK_SND_NKE, address)
    }

    /// REQ_UD2: request class 2 user data. `fcb` selects the frame count bit.
    pub fn req_ud2(address: u8, fcb: bool) -> Self {
        let mut control = MBUS_CONTROL_MASK_REQ_UD2;
        if fcb {
            control |= MBUS_CONTROL_MASK_FCB;
        }
        Self::short(control, address)
    }

    /// SND_UD to the network layer address selecting the devices matching `mask`.
    pub fn select_secondary(mask: &SecondaryAddress) -> Self {
        let mut frame = MBusFrame {
            frame_type: MBusFrameType::Long,
            control: MBUS_CONTROL_MASK_SND_UD,
            address: MBUS_ADDRESS_NETWORK_LAYER,
            control_information: MBUS_CONTROL_INFO_SELECT_SLAVE,
            data: mask.to_bytes().to_vec(),
            checksum: 0,
        };
        frame.checksum = calculate_checksum(&frame);
        frame
    }

    /// SND_UD writing a new primary address (DIF 0x01, VIF 0x7A).
    pub fn set_primary_address(address: u8, new_address: u8) -> Self {
        let mut frame = MBusFrame {
            frame_type: MBusFrameType::Long,
            control: MBUS_CONTROL_MASK_SND_UD,
            address,
            control_information: MBUS_CONTROL_INFO_DATA_SEND,
            data: vec![0x01, 0x7A, new_address],
            checksum: 0,
        };
        frame.checksum = calculate_checksum(&frame);
        frame
    }

    /// Flag bits of the control field.
    pub fn control_flags(&self) -> ControlFlags {
        ControlFlags::from_bits_truncate(self.control)
    }

    /// Function code (low nibble) of the control field.
    pub fn function_code(&self) -> u8 {
        self.control & MBUS_CONTROL_FUNCTION_MASK
    }

    /// True for a slave response carrying user data (RSP_UD).
    pub fn is_rsp_ud(&self) -> bool {
        matches!(self.frame_type, MBusFrameType::Long | MBusFrameType::Control)
            && self.function_code() == MBUS_CONTROL_MASK_RSP_UD
    }

    /// Encoded wire representation.
    pub fn to_bytes(&self) -> Vec<u8> {
        pack_frame(self)
    }
}

/// Error type of the streaming frame parser; carries a readable reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameSyntaxError(pub String);

impl<I> ParseError<I> for FrameSyntaxError {
    fn from_error_kind(_input: I, kind: ErrorKind) -> Self {
        FrameSyntaxError(format!("parser error {kind:?}"))
    }

    fn append(_input: I, _kind: ErrorKind, other: Self) -> Self {
        other
    }
}

fn malformed<T>(reason: String) -> IResult<&'static [u8], T, FrameSyntaxError> {
    Err(NomErr::Error(FrameSyntaxError(reason)))
}

/// Uses the streaming parsers of `nom` to parse an M-Bus frame from a byte slice.
///
/// Delimiters and length fields are validated here; the checksum is not (see
/// [`verify_frame`] and [`decode_frame`]).
pub fn parse_frame(input: &[u8]) -> IResult<&[u8], MBusFrame, FrameSyntaxError> {
    let (input, start) = be_u8(input)?;

    match start {
        MBUS_FRAME_ACK_START => Ok((input, MBusFrame::ack())),
        MBUS_FRAME_SHORT_START => {
            // C, A, CS, stop
            let (input, body) = take(4usize)(input)?;
            if body[3] != MBUS_FRAME_STOP {
                return malformed(format!("invalid stop byte 0x{:02X}", body[3]));
            }
            Ok((
                input,
                MBusFrame {
                    frame_type: MBusFrameType::Short,
                    control: body[0],
                    address: body[1],
                    control_information: 0,
                    data: Vec::new(),
                    checksum: body[2],
                },
            ))
        }
        MBUS_FRAME_LONG_START => {
            let (input, header) = take(3usize)(input)?;
            let (length1, length2, start2) = (header[0], header[1], header[2]);
            if length1 != length2 {
                return malformed(format!(
                    "length fields differ (0x{length1:02X} != 0x{length2:02X})"
                ));
            }
            if start2 != MBUS_FRAME_LONG_START {
                return malformed(format!("invalid second start byte 0x{start2:02X}"));
            }
            if length1 < MBUS_FRAME_MIN_L_FIELD {
                return malformed(format!("length field 0x{length1:02X} below minimum"));
            }

            let length = length1 as usize;
            // C, A, CI, data, CS, stop
            let (input, body) = take(length + 2)(input)?;
            if body[length + 1] != MBUS_FRAME_STOP {
                return malformed(format!("invalid stop byte 0x{:02X}", body[length + 1]));
            }
            let frame_type = if length1 == MBUS_FRAME_MIN_L_FIELD {
                MBusFrameType::Control
            } else {
                MBusFrameType::Long
            };
            Ok((
                input,
                MBusFrame {
                    frame_type,
                    control: body[0],
                    address: body[1],
                    control_information: body[2],
                    data: body[3..length].to_vec(),
                    checksum: body[length],
                },
            ))
        }
        other => malformed(format!("invalid start byte 0x{other:02X}")),
    }
}

/// Outcome of feeding a (possibly partial) buffer to the decoder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameDecode {
    /// A complete, checksum-verified frame occupying the first `consumed` bytes.
    Complete { frame: MBusFrame, consumed: usize },
    /// The buffer holds the start of a frame; at least this many bytes are missing.
    NeedMoreBytes(usize),
}

/// Decodes one frame from the start of `input`.
pub fn decode_frame(input: &[u8]) -> Result<FrameDecode, MBusError> {
    match parse_frame(input) {
        Ok((remaining, frame)) => {
            verify_frame(&frame)?;
            Ok(FrameDecode::Complete {
                frame,
                consumed: input.len() - remaining.len(),
            })
        }
        Err(NomErr::Incomplete(Needed::Size(n))) => Ok(FrameDecode::NeedMoreBytes(n.get())),
        Err(NomErr::Incomplete(Needed::Unknown)) => Ok(FrameDecode::NeedMoreBytes(1)),
        Err(NomErr::Error(e)) | Err(NomErr::Failure(e)) => Err(MBusError::FrameParseError(e.0)),
    }
}

/// Accumulates bytes read from a transport until they form a frame.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: BytesMut,
}

impl FrameDecoder {
    pub fn new() -> Self {
        FrameDecoder {
            buffer: BytesMut::with_capacity(MBUS_FRAME_LONG_OVERHEAD + u8::MAX as usize),
        }
    }

    /// Appends received bytes.
    pub fn extend(&mut self, bytes: &[u8]) {
        self.buffer.put_slice(bytes);
    }

    /// Appends one received byte.
    pub fn push(&mut self, byte: u8) {
        self.buffer.put_u8(byte);
    }

    /// Tries to decode the buffered bytes. A complete frame is removed from
    /// the buffer; on error the buffer is left untouched for inspection.
    pub fn decode(&mut self) -> Result<FrameDecode, MBusError> {
        let result = decode_frame(&self.buffer)?;
        if let FrameDecode::Complete { consumed, .. } = &result {
            let _ = self.buffer.split_to(*consumed);
        }
        Ok(result)
    }

    /// Bytes received so far.
    pub fn buffered(&self) -> &[u8] {
        &self.buffer
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

/// Packs an M-Bus frame into a byte vector.
pub fn pack_frame(frame: &MBusFrame) -> Vec<u8> {
    let mut data = Vec::with_capacity(frame.data.len() + MBUS_FRAME_LONG_OVERHEAD + 3);

    match frame.frame_type {
        MBusFrameType::Ack => {
            // ACK frame: 0xE5
            data.push(MBUS_FRAME_ACK_START);
        }
        MBusFrameType::Short => {
            // Short frame: 0x10 | control | address | checksum | 0x16
            data.push(MBUS_FRAME_SHORT_START);
            data.push(frame.control);
            data.push(frame.address);
            data.push(frame.checksum);
            data.push(MBUS_FRAME_STOP);
        }
        MBusFrameType::Control | MBusFrameType::Long => {
            // 0x68 | L | L | 0x68 | control | address | control_information | data | checksum | 0x16
            pack_control_or_long_frame(&mut data, frame);
        }
    }

    data
}

/// Packs a control or long M-Bus frame into a byte vector.
fn pack_control_or_long_frame(data: &mut Vec<u8>, frame: &MBusFrame) {
    let length = (frame.data.len() + MBUS_FRAME_MIN_L_FIELD as usize) as u8;
    data.push(MBUS_FRAME_LONG_START);
    data.push(length);
    data.push(length);
    data.push(MBUS_FRAME_LONG_START);
    data.push(frame.control);
    data.push(frame.address);
    data.push(frame.control_information);
    data.extend_from_slice(&frame.data);
    data.push(frame.checksum);
    data.push(MBUS_FRAME_STOP);
}

/// Verifies the integrity of an M-Bus frame.
pub fn verify_frame(frame: &MBusFrame) -> Result<(), MBusError> {
    let calculated = calculate_checksum(frame);
    if frame.checksum != calculated {
        return Err(MBusError::InvalidChecksum {
            expected: frame.checksum,
            calculated,
        });
    }
    Ok(())
}

/// Calculates the checksum of an M-Bus frame.
pub fn calculate_checksum(frame: &MBusFrame) -> u8 {
    match frame.frame_type {
        MBusFrameType::Ack => 0,
        MBusFrameType::Short => frame.control.wrapping_add(frame.address),
        MBusFrameType::Control | MBusFrameType::Long => frame
            .data
            .iter()
            .fold(
                frame
                    .control
                    .wrapping_add(frame.address)
                    .wrapping_add(frame.control_information),
                |sum, b| sum.wrapping_add(*b),
            ),
    }
}
