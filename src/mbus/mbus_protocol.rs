//! # M-Bus Protocol Implementation
//!
//! This module provides the transaction engine of the M-Bus master: the
//! per-request state machine, retry and timeout handling, multi-telegram
//! reassembly, primary address scanning and secondary address selection.
//!
//! [`MBusHandle`] owns exactly one [`Transport`]. Every operation takes
//! `&mut self`, so only one request can be outstanding on a bus segment at a
//! time. Before each request the line is purged of late bytes, so an abandoned
//! wait can never misalign the frame boundaries of the next transaction.
//!
//! ```no_run
//! use mbus_master::config::ConnectionTarget;
//! use mbus_master::mbus::MBusHandle;
//!
//! # async fn run() -> Result<(), mbus_master::MBusError> {
//! let mut handle = MBusHandle::connect(&ConnectionTarget::serial("/dev/ttyUSB0", 2400)).await?;
//! let data = handle.request_data(5).await?;
//! for record in &data.records {
//!     println!("{} {:?} {}", record.quantity, record.scaled_value(), record.unit);
//! }
//! handle.close().await?;
//! # Ok(())
//! # }
//! ```

use chrono::Utc;
use log::{debug, info, warn};

use crate::config::{BusConfig, ConnectionTarget};
use crate::constants::*;
use crate::error::MBusError;
use crate::logging::log_frame;
use crate::mbus::frame::{FrameDecode, FrameDecoder, MBusFrame, MBusFrameType};
use crate::mbus::secondary_addressing::{
    parse_secondary_from_frame_data, ProbeResult, SecondaryAddress, WildcardSearch,
};
use crate::mbus::serial::open_serial;
use crate::mbus::tcp::open_tcp;
use crate::mbus::transport::Transport;
use crate::payload::data::MBusFrameData;

/// Represents the different states of the M-Bus protocol state machine.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum MBusProtocolState {
    Idle,
    /// Request written, timeout clock started
    Sent,
    /// Feeding received bytes to the frame decoder
    AwaitingResponse,
    Decoded,
    TimedOut,
    ChecksumRetry,
    Failed,
}

/// Represents the M-Bus protocol state machine of one logical request.
#[derive(Debug)]
pub struct StateMachine {
    state: MBusProtocolState,
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl StateMachine {
    pub fn new() -> Self {
        StateMachine {
            state: MBusProtocolState::Idle,
        }
    }

    pub fn state(&self) -> MBusProtocolState {
        self.state
    }

    pub fn transition(&mut self, next: MBusProtocolState) {
        if self.state != next {
            debug!("state {:?} -> {:?}", self.state, next);
            self.state = next;
        }
    }

    /// Moves to the state matching a failed attempt.
    pub fn handle_error(&mut self, error: &MBusError, will_retry: bool) {
        let next = match error {
            MBusError::Timeout if will_retry => MBusProtocolState::TimedOut,
            MBusError::InvalidChecksum { .. } if will_retry => MBusProtocolState::ChecksumRetry,
            _ => MBusProtocolState::Failed,
        };
        self.transition(next);
    }

    pub fn reset(&mut self) {
        self.state = MBusProtocolState::Idle;
    }
}

/// Counters of one bus session.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SessionStats {
    /// Logical requests, retries not included
    pub requests: u64,
    pub retries: u64,
    pub timeouts: u64,
    pub checksum_errors: u64,
    /// RSP_UD telegrams decoded
    pub telegrams: u64,
}

/// Checks that `address` can be used as the target of a request.
pub fn check_address(address: u8) -> Result<(), MBusError> {
    match address {
        0..=MBUS_ADDRESS_MAX_PRIMARY | MBUS_ADDRESS_NETWORK_LAYER | MBUS_ADDRESS_BROADCAST_REPLY => {
            Ok(())
        }
        other => Err(MBusError::InvalidAddress(other)),
    }
}

/// Connection to one M-Bus segment.
pub struct MBusHandle<T: Transport = Box<dyn Transport>> {
    transport: T,
    config: BusConfig,
    state_machine: StateMachine,
    decoder: FrameDecoder,
    stats: SessionStats,
    last_error: Option<MBusError>,
}

impl MBusHandle<Box<dyn Transport>> {
    /// Opens the target with the default configuration for it.
    pub async fn connect(target: &ConnectionTarget) -> Result<Self, MBusError> {
        Self::connect_with_config(target, BusConfig::for_target(target)).await
    }

    pub async fn connect_with_config(
        target: &ConnectionTarget,
        config: BusConfig,
    ) -> Result<Self, MBusError> {
        target.validate()?;
        config.validate()?;

        let transport: Box<dyn Transport> = match target {
            ConnectionTarget::Serial { path, baudrate } => Box::new(open_serial(path, *baudrate)?),
            ConnectionTarget::Tcp { host, port } => Box::new(open_tcp(host, *port).await?),
        };
        Ok(Self::new(transport, config))
    }
}

impl<T: Transport> MBusHandle<T> {
    pub fn new(transport: T, config: BusConfig) -> Self {
        MBusHandle {
            transport,
            config,
            state_machine: StateMachine::new(),
            decoder: FrameDecoder::new(),
            stats: SessionStats::default(),
            last_error: None,
        }
    }

    pub fn config(&self) -> &BusConfig {
        &self.config
    }

    pub fn state(&self) -> MBusProtocolState {
        self.state_machine.state()
    }

    pub fn stats(&self) -> SessionStats {
        self.stats
    }

    /// Most recent error of any operation on this handle.
    pub fn last_error(&self) -> Option<&MBusError> {
        self.last_error.as_ref()
    }

    /// Closes the transport. Dropping the handle releases it as well.
    pub async fn close(mut self) -> Result<(), MBusError> {
        info!("Closing {}", self.transport.describe());
        self.transport.close().await
    }

    fn record<V>(&mut self, result: Result<V, MBusError>) -> Result<V, MBusError> {
        if let Err(e) = &result {
            self.last_error = Some(e.clone());
        }
        result
    }

    /// Drains late bytes of an earlier exchange.
    async fn purge(&mut self) -> Result<(), MBusError> {
        let purged = self.transport.purge(self.config.purge_timeout).await?;
        if purged > 0 {
            warn!("Purged {purged} late bytes from {}", self.transport.describe());
        }
        Ok(())
    }

    /// Writes one frame.
    pub async fn send_frame(&mut self, frame: &MBusFrame) -> Result<(), MBusError> {
        let bytes = frame.to_bytes();
        log_frame("SEND", &bytes);
        self.transport.write_all(&bytes).await
    }

    /// Reads bytes one at a time until they form a complete frame.
    pub async fn receive_frame(&mut self) -> Result<MBusFrame, MBusError> {
        self.decoder.clear();
        loop {
            let byte = self.transport.read_byte(self.config.response_timeout).await?;
            self.decoder.push(byte);
            match self.decoder.decode() {
                Ok(FrameDecode::Complete { frame, .. }) => {
                    log_frame("RECV", &frame.to_bytes());
                    return Ok(frame);
                }
                Ok(FrameDecode::NeedMoreBytes(_)) => continue,
                Err(e) => {
                    log_frame("RECV (invalid)", self.decoder.buffered());
                    return Err(e);
                }
            }
        }
    }

    /// One purge / send / receive cycle without retries.
    async fn exchange(&mut self, request: &MBusFrame) -> Result<MBusFrame, MBusError> {
        self.purge().await?;
        self.send_frame(request).await?;
        self.state_machine.transition(MBusProtocolState::Sent);
        self.state_machine.transition(MBusProtocolState::AwaitingResponse);
        let response = self.receive_frame().await?;
        self.state_machine.transition(MBusProtocolState::Decoded);
        Ok(response)
    }

    /// Sends `request` and returns the response frame, re-sending the identical
    /// frame after a timeout or checksum error until the retry budget is spent.
    pub async fn transact(&mut self, request: &MBusFrame) -> Result<MBusFrame, MBusError> {
        self.state_machine.reset();
        self.stats.requests += 1;

        let mut attempt = 0;
        loop {
            let error = match self.exchange(request).await {
                Ok(response) => return Ok(response),
                Err(e) => e,
            };

            match error {
                MBusError::Timeout => self.stats.timeouts += 1,
                MBusError::InvalidChecksum { .. } => self.stats.checksum_errors += 1,
                _ => {}
            }

            let will_retry = error.is_transient() && attempt < self.config.max_retries;
            self.state_machine.handle_error(&error, will_retry);
            if !will_retry {
                return self.record(Err(error));
            }

            attempt += 1;
            self.stats.retries += 1;
            warn!(
                "{error} for request to 0x{:02X}, retry {attempt}/{}",
                request.address, self.config.max_retries
            );
        }
    }

    /// True if more bytes follow a response, i.e. several slaves answered.
    async fn line_busy(&mut self) -> Result<bool, MBusError> {
        match self.transport.read_byte(self.config.purge_timeout).await {
            Ok(_) => {
                self.transport.purge(self.config.purge_timeout).await?;
                Ok(true)
            }
            Err(MBusError::Timeout) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Sends SND_NKE; `Ok(false)` if nothing answered.
    pub async fn ping(&mut self, address: u8) -> Result<bool, MBusError> {
        self.record(check_address(address))?;

        // silence is an answer here, not a failure of the handle
        let previous_error = self.last_error.clone();
        match self.transact(&MBusFrame::snd_nke(address)).await {
            Ok(frame) if frame.frame_type == MBusFrameType::Ack => {
                let busy = self.line_busy().await;
                if self.record(busy)? {
                    return self.record(Err(MBusError::Collision));
                }
                Ok(true)
            }
            Ok(frame) => self.record(Err(MBusError::UnexpectedFrame(format!(
                "{} frame in reply to SND_NKE",
                frame.frame_type
            )))),
            Err(MBusError::Timeout) => {
                self.last_error = previous_error;
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Pings every primary address and returns the ones that answered.
    pub async fn scan_primary(&mut self) -> Result<Vec<u8>, MBusError> {
        let mut found = Vec::new();
        for address in 0..=MBUS_ADDRESS_MAX_PRIMARY {
            match self.ping(address).await {
                Ok(true) => {
                    info!("Found device at primary address {address}");
                    found.push(address);
                }
                Ok(false) => {}
                Err(e) if e.is_transport_failure() => return Err(e),
                Err(e) => warn!("Skipping primary address {address}: {e}"),
            }
        }
        Ok(found)
    }

    /// Changes the primary address of the device at `address`.
    pub async fn set_primary_address(&mut self, address: u8, new_address: u8) -> Result<(), MBusError> {
        self.record(check_address(address))?;
        if new_address > MBUS_ADDRESS_MAX_PRIMARY {
            return self.record(Err(MBusError::InvalidAddress(new_address)));
        }

        let response = self
            .transact(&MBusFrame::set_primary_address(address, new_address))
            .await?;
        if response.frame_type != MBusFrameType::Ack {
            return self.record(Err(MBusError::UnexpectedFrame(format!(
                "{} frame in reply to set address",
                response.frame_type
            ))));
        }
        info!("Primary address 0x{address:02X} changed to 0x{new_address:02X}");
        Ok(())
    }

    /// REQ_UD2 for one telegram, decoded.
    async fn request_telegram(&mut self, address: u8, fcb: bool) -> Result<MBusFrameData, MBusError> {
        let response = self.transact(&MBusFrame::req_ud2(address, fcb)).await?;
        if !matches!(response.frame_type, MBusFrameType::Long | MBusFrameType::Control) {
            self.state_machine.transition(MBusProtocolState::Failed);
            return self.record(Err(MBusError::UnexpectedFrame(format!(
                "{} frame in reply to REQ_UD2",
                response.frame_type
            ))));
        }
        self.stats.telegrams += 1;

        let mut data = match MBusFrameData::parse(&response) {
            Ok(data) => data,
            Err(e) => {
                self.state_machine.transition(MBusProtocolState::Failed);
                return self.record(Err(e));
            }
        };
        let now = Utc::now();
        for record in &mut data.records {
            record.timestamp = Some(now);
        }
        Ok(data)
    }

    /// Reads all data of the device at `address`, following "more records
    /// follow" telegrams up to the configured bound.
    pub async fn request_data(&mut self, address: u8) -> Result<MBusFrameData, MBusError> {
        self.record(check_address(address))?;

        let mut fcb = true;
        let mut data = self.request_telegram(address, fcb).await?;
        while data.more_records_follow {
            if data.telegram_count >= self.config.max_telegrams {
                warn!(
                    "Device 0x{address:02X} still has more records after {} telegrams, giving up",
                    data.telegram_count
                );
                break;
            }
            fcb = !fcb;
            let next = self.request_telegram(address, fcb).await?;
            data.append_telegram(next);
        }

        debug!(
            "Read {} records in {} telegrams from 0x{address:02X}",
            data.records.len(),
            data.telegram_count
        );
        Ok(data)
    }

    /// Deselects all devices, then selects the ones matching `mask`.
    ///
    /// Overlapping ACKs of several devices can arrive as one clean ACK, so
    /// `Selected` only means the line looked clean; [`search_secondary`]
    /// confirms it by reading the identity.
    ///
    /// [`search_secondary`]: Self::search_secondary
    pub async fn select_secondary(&mut self, mask: &SecondaryAddress) -> Result<ProbeResult, MBusError> {
        let result = self.try_select(mask).await;
        self.record(result)
    }

    async fn try_select(&mut self, mask: &SecondaryAddress) -> Result<ProbeResult, MBusError> {
        self.state_machine.reset();
        self.purge().await?;
        self.send_frame(&MBusFrame::snd_nke(MBUS_ADDRESS_NETWORK_LAYER)).await?;

        let result = match self.exchange(&MBusFrame::select_secondary(mask)).await {
            Ok(frame) if frame.frame_type == MBusFrameType::Ack => {
                if self.line_busy().await? {
                    ProbeResult::Collision
                } else {
                    ProbeResult::Selected
                }
            }
            Ok(_) => ProbeResult::Collision,
            Err(MBusError::Timeout) => ProbeResult::NoDevice,
            Err(e) if e.is_transport_failure() => {
                self.state_machine.transition(MBusProtocolState::Failed);
                return Err(e);
            }
            Err(_) => {
                self.transport.purge(self.config.purge_timeout).await?;
                ProbeResult::Collision
            }
        };
        debug!("Selection of {mask}: {result:?}");
        Ok(result)
    }

    /// Identity of the currently selected device from its response header.
    ///
    /// A single exchange without retries: several selected devices answer at
    /// once, and a garbled or missing reply means `None`, a collision.
    async fn read_selected_address(&mut self) -> Result<Option<SecondaryAddress>, MBusError> {
        self.state_machine.reset();
        self.stats.requests += 1;
        let request = MBusFrame::req_ud2(MBUS_ADDRESS_NETWORK_LAYER, true);
        let response = match self.exchange(&request).await {
            Ok(response) => response,
            Err(e) if e.is_transport_failure() => {
                self.state_machine.transition(MBusProtocolState::Failed);
                return self.record(Err(e));
            }
            Err(e) => {
                debug!("No clean reply from the selected device: {e}");
                let purged = self.transport.purge(self.config.purge_timeout).await;
                self.record(purged)?;
                return Ok(None);
            }
        };
        self.stats.telegrams += 1;

        if response.control_information != MBUS_CONTROL_INFO_RESP_VARIABLE {
            return self.record(Err(MBusError::UnexpectedFrame(format!(
                "CI 0x{:02X} carries no secondary address",
                response.control_information
            ))));
        }
        match parse_secondary_from_frame_data(&response.data) {
            Ok((_, address)) => Ok(Some(address)),
            Err(_) => self.record(Err(MBusError::TruncatedRecord {
                offset: 0,
                needed: 8,
                available: response.data.len(),
            })),
        }
    }

    /// Resolves one device matching `mask` that is not in `exclude`.
    ///
    /// Fails with `NoDevice` once the search space is exhausted, or with
    /// `Collision` if two devices share an identification number.
    pub async fn search_secondary(
        &mut self,
        mask: &SecondaryAddress,
        exclude: &[SecondaryAddress],
    ) -> Result<SecondaryAddress, MBusError> {
        let mut search = WildcardSearch::new(*mask, exclude);

        while let Some(candidate) = search.next_mask() {
            match self.select_secondary(&candidate).await? {
                ProbeResult::NoDevice => {}
                ProbeResult::Collision => {
                    debug!("Collision on {candidate}, narrowing");
                    search.record_collision(&candidate);
                }
                ProbeResult::Selected => match self.read_selected_address().await? {
                    Some(address) if search.is_excluded(&address) => {}
                    Some(address) => {
                        info!("Found {address} after {} probes", search.probes());
                        return Ok(address);
                    }
                    None => {
                        debug!("Garbled reply on {candidate}, narrowing");
                        search.record_collision(&candidate);
                    }
                },
            }
        }

        let error = search.exhausted();
        if error == MBusError::Collision {
            warn!("Devices with identical identification numbers below {mask}");
        }
        self.record(Err(error))
    }

    /// Enumerates every device matching `mask`.
    pub async fn scan_secondary(&mut self, mask: &SecondaryAddress) -> Result<Vec<SecondaryAddress>, MBusError> {
        let mut found = Vec::new();
        loop {
            match self.search_secondary(mask, &found).await {
                Ok(address) => found.push(address),
                Err(MBusError::NoDevice) => break,
                Err(MBusError::Collision) => break,
                Err(e) => return Err(e),
            }
        }
        Ok(found)
    }

    /// Selects the device with the literal address `address` and reads its data.
    pub async fn request_data_secondary(
        &mut self,
        address: &SecondaryAddress,
    ) -> Result<MBusFrameData, MBusError> {
        if address.is_wildcard() {
            return self.record(Err(MBusError::InvalidSecondaryAddress(format!(
                "{address} contains wildcards"
            ))));
        }
        match self.select_secondary(address).await? {
            ProbeResult::Selected => self.request_data(MBUS_ADDRESS_NETWORK_LAYER).await,
            ProbeResult::Collision => self.record(Err(MBusError::Collision)),
            ProbeResult::NoDevice => self.record(Err(MBusError::NoDevice)),
        }
    }
}
