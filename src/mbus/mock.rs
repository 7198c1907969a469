//! Mock transport implementation for testing
//!
//! [`MockTransport`] records every written request and answers from either a
//! script of replies or a responder closure that sees each request. Reads
//! return [`MBusError::Timeout`] immediately once no bytes are pending, so
//! retry and timeout paths run without real delays.
//!
//! [`simulated_bus`] builds a responder that emulates a population of meters
//! for SND_NKE, secondary selection, REQ_UD2 and set-address requests.

use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use crate::constants::*;
use crate::error::MBusError;
use crate::mbus::frame::{decode_frame, FrameDecode, MBusFrame, MBusFrameType};
use crate::mbus::secondary_addressing::SecondaryAddress;
use crate::mbus::transport::Transport;

/// What the mock does in response to one written request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockReply {
    /// Bytes become readable
    Bytes(Vec<u8>),
    /// Nothing is sent back
    Silence,
    /// The next read fails with an I/O error of this kind
    IoError(io::ErrorKind),
}

impl MockReply {
    pub fn frame(frame: &MBusFrame) -> Self {
        MockReply::Bytes(frame.to_bytes())
    }
}

type Responder = Box<dyn FnMut(&[u8]) -> MockReply + Send>;

#[derive(Default)]
struct MockState {
    rx: VecDeque<u8>,
    written: Vec<Vec<u8>>,
    script: VecDeque<MockReply>,
    responder: Option<Responder>,
    pending_error: Option<io::ErrorKind>,
    closed: bool,
}

/// Scriptable in-memory transport. Clones share state, so a test can keep
/// one clone for inspection while the engine owns another.
#[derive(Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replies are consumed one per written request; silence once exhausted.
    pub fn scripted(replies: impl IntoIterator<Item = MockReply>) -> Self {
        let mock = Self::new();
        mock.lock().script.extend(replies);
        mock
    }

    /// Every written request is passed to `responder`.
    pub fn with_responder<F>(responder: F) -> Self
    where
        F: FnMut(&[u8]) -> MockReply + Send + 'static,
    {
        let mock = Self::new();
        mock.lock().responder = Some(Box::new(responder));
        mock
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Makes bytes readable without a request, e.g. a late reply.
    pub fn queue_rx(&self, bytes: &[u8]) {
        self.lock().rx.extend(bytes);
    }

    /// All requests written so far.
    pub fn written_frames(&self) -> Vec<Vec<u8>> {
        self.lock().written.clone()
    }

    /// Bytes still waiting to be read.
    pub fn pending_rx(&self) -> usize {
        self.lock().rx.len()
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn write_all(&mut self, bytes: &[u8]) -> Result<(), MBusError> {
        let mut state = self.lock();
        if state.closed {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "mock transport closed").into());
        }
        state.written.push(bytes.to_vec());

        let reply = match state.script.pop_front() {
            Some(reply) => reply,
            None => match state.responder.as_mut() {
                Some(responder) => responder(bytes),
                None => MockReply::Silence,
            },
        };
        match reply {
            MockReply::Bytes(data) => state.rx.extend(data),
            MockReply::Silence => {}
            MockReply::IoError(kind) => state.pending_error = Some(kind),
        }
        Ok(())
    }

    async fn read_byte(&mut self, _timeout: Duration) -> Result<u8, MBusError> {
        let mut state = self.lock();
        if let Some(kind) = state.pending_error.take() {
            return Err(io::Error::new(kind, "mock transport failure").into());
        }
        state.rx.pop_front().ok_or(MBusError::Timeout)
    }

    async fn close(&mut self) -> Result<(), MBusError> {
        self.lock().closed = true;
        Ok(())
    }

    fn describe(&self) -> String {
        "mock".to_string()
    }
}

/// A meter on the simulated bus.
#[derive(Debug, Clone)]
pub struct SimulatedMeter {
    pub primary_address: u8,
    pub secondary: SecondaryAddress,
    /// Record bytes of each telegram; all but the last get a trailing 0x1F DIF
    pub telegrams: Vec<Vec<u8>>,
}

impl SimulatedMeter {
    pub fn new(primary_address: u8, secondary: SecondaryAddress) -> Self {
        Self {
            primary_address,
            secondary,
            // 4 byte energy counter, kWh
            telegrams: vec![vec![0x04, 0x03, 0x2A, 0x00, 0x00, 0x00]],
        }
    }

    pub fn with_telegrams(mut self, telegrams: Vec<Vec<u8>>) -> Self {
        self.telegrams = telegrams;
        self
    }
}

struct MeterState {
    meter: SimulatedMeter,
    selected: bool,
    current: usize,
    last_fcb: Option<bool>,
    access_number: u8,
}

impl MeterState {
    fn reset_link(&mut self) {
        self.current = 0;
        self.last_fcb = None;
    }

    /// RSP_UD for a REQ_UD2 carrying `fcb`; a repeated FCB repeats the last telegram.
    fn respond(&mut self, fcb: bool) -> Vec<u8> {
        let count = self.meter.telegrams.len().max(1);
        match self.last_fcb {
            Some(previous) if previous == fcb => {}
            Some(_) => self.current = if self.current + 1 < count { self.current + 1 } else { 0 },
            None => self.current = 0,
        }
        self.last_fcb = Some(fcb);
        self.access_number = self.access_number.wrapping_add(1);

        let mut data = self.meter.secondary.to_bytes().to_vec();
        data.extend_from_slice(&[self.access_number, 0x00, 0x00, 0x00]);
        if let Some(records) = self.meter.telegrams.get(self.current) {
            data.extend_from_slice(records);
        }
        if self.current + 1 < count {
            data.push(MBUS_DIB_DIF_MORE_RECORDS_FOLLOW);
        }
        MBusFrame::long(
            MBUS_CONTROL_MASK_RSP_UD,
            self.meter.primary_address,
            MBUS_CONTROL_INFO_RESP_VARIABLE,
            data,
        )
        .map(|frame| frame.to_bytes())
        .unwrap_or_default()
    }
}

/// Several slaves talking at once: the first reply with a broken checksum.
fn garble(mut replies: Vec<Vec<u8>>) -> MockReply {
    if replies.len() == 1 {
        return MockReply::Bytes(replies.remove(0));
    }
    let mut bytes = replies.remove(0);
    let checksum = bytes.len().saturating_sub(2);
    if let Some(b) = bytes.get_mut(checksum) {
        *b ^= 0xFF;
    }
    MockReply::Bytes(bytes)
}

/// How ACKs of several meters answering at once reach the master.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AckOverlap {
    /// One E5 per meter, back to back
    #[default]
    Sequential,
    /// Identical single characters overlap on the line and arrive as one E5
    Merged,
}

impl AckOverlap {
    fn acks(self, count: usize) -> MockReply {
        match (count, self) {
            (0, _) => MockReply::Silence,
            (_, AckOverlap::Merged) => MockReply::Bytes(vec![MBUS_FRAME_ACK_START]),
            (n, AckOverlap::Sequential) => MockReply::Bytes(vec![MBUS_FRAME_ACK_START; n]),
        }
    }
}

/// Responder emulating `meters` sharing one bus segment.
pub fn simulated_bus(meters: Vec<SimulatedMeter>) -> impl FnMut(&[u8]) -> MockReply + Send {
    simulated_bus_with(meters, AckOverlap::default())
}

/// [`simulated_bus`] with a chosen way simultaneous ACKs combine.
pub fn simulated_bus_with(
    meters: Vec<SimulatedMeter>,
    overlap: AckOverlap,
) -> impl FnMut(&[u8]) -> MockReply + Send {
    let mut meters: Vec<MeterState> = meters
        .into_iter()
        .map(|meter| MeterState {
            meter,
            selected: false,
            current: 0,
            last_fcb: None,
            access_number: 0,
        })
        .collect();

    move |request: &[u8]| {
        let frame = match decode_frame(request) {
            Ok(FrameDecode::Complete { frame, .. }) => frame,
            _ => return MockReply::Silence,
        };

        let address = frame.address;
        let addressed = |m: &MeterState| match address {
            MBUS_ADDRESS_NETWORK_LAYER => m.selected,
            MBUS_ADDRESS_BROADCAST_REPLY | MBUS_ADDRESS_BROADCAST_NOREPLY => true,
            a => m.meter.primary_address == a,
        };

        match frame.frame_type {
            MBusFrameType::Short if frame.control == MBUS_CONTROL_MASK_SND_NKE => {
                if address == MBUS_ADDRESS_NETWORK_LAYER {
                    meters.iter_mut().for_each(|m| {
                        m.selected = false;
                        m.reset_link();
                    });
                    return MockReply::Silence;
                }
                let mut acks = 0;
                for m in meters.iter_mut().filter(|m| addressed(m)) {
                    m.reset_link();
                    acks += 1;
                }
                if address == MBUS_ADDRESS_BROADCAST_NOREPLY {
                    MockReply::Silence
                } else {
                    overlap.acks(acks)
                }
            }
            MBusFrameType::Short
                if frame.control & !MBUS_CONTROL_MASK_FCB == MBUS_CONTROL_MASK_REQ_UD2 =>
            {
                let fcb = frame.control & MBUS_CONTROL_MASK_FCB != 0;
                let replies: Vec<Vec<u8>> = meters
                    .iter_mut()
                    .filter(|m| addressed(m))
                    .map(|m| m.respond(fcb))
                    .collect();
                if replies.is_empty() {
                    MockReply::Silence
                } else {
                    garble(replies)
                }
            }
            MBusFrameType::Long
                if frame.control_information == MBUS_CONTROL_INFO_SELECT_SLAVE
                    && address == MBUS_ADDRESS_NETWORK_LAYER =>
            {
                let mask = match SecondaryAddress::from_bytes(&frame.data) {
                    Ok(mask) => mask,
                    Err(_) => return MockReply::Silence,
                };
                let mut matched = 0;
                for m in meters.iter_mut() {
                    m.selected = mask.matches(&m.meter.secondary);
                    if m.selected {
                        m.reset_link();
                        matched += 1;
                    }
                }
                overlap.acks(matched)
            }
            MBusFrameType::Long
                if frame.control_information == MBUS_CONTROL_INFO_DATA_SEND
                    && frame.data.len() == 3
                    && frame.data[..2] == [0x01, 0x7A] =>
            {
                let new_address = frame.data[2];
                let mut acks = 0;
                for m in meters.iter_mut().filter(|m| addressed(m)) {
                    m.meter.primary_address = new_address;
                    acks += 1;
                }
                overlap.acks(acks)
            }
            _ => MockReply::Silence,
        }
    }
}
