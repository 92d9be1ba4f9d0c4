//! Host side of a programmer session
//!
//! [`Programmer`] speaks the framed protocol (or the legacy line protocol)
//! to the device session and turns its reply streams into plain results:
//! read pages are checked against their PAGE_CRC and the final digest,
//! write data is paced by the device's progress replies.

use std::collections::VecDeque;

use nandprog_core::chip::{ChipProfile, ChipRegistry};
use nandprog_core::error::FailureCause;
use nandprog_core::integrity::{HashKind, IntegrityTracker};
use nandprog_core::protocol::codes::{CMD_CLEAR_RESUME, CMD_SET_RESUME};
use nandprog_core::protocol::legacy::{self, LegacyItem, LineDecoder};
use nandprog_core::protocol::{
    FrameDecoder, OperationKind, OperationOptions, OperationRequest, Progress, Reply, Request,
    ResumeOffer,
};
use nandprog_core::stream::{CodecOptions, StreamCodec};

use crate::config::{HostConfig, WireProtocol};
use crate::error::{Result, SerialError};
use crate::transport::Transport;

/// Encoded pages sent ahead of the device's progress
const WRITE_WINDOW: usize = 2;

/// What STATUS found
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceStatus {
    /// Selected chip, `None` if nothing is connected or selected
    pub model: Option<String>,
    /// Stored checkpoint the device offers to resume from
    pub resume: Option<ResumeOffer>,
    /// Supply voltage
    pub millivolts: u32,
}

/// One line of the manual-selection listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChipEntry {
    /// 1-based index accepted by SELECT
    pub index: u16,
    /// "Vendor Name"
    pub name: String,
}

/// Outcome of REDETECT
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Detection {
    /// Chip identified
    Detected(String),
    /// Unknown ID; pick one of these with [`Programmer::select`]
    Unknown(Vec<ChipEntry>),
}

/// Block range of an operation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OpArgs {
    /// First block
    pub start_block: u32,
    /// Number of blocks, 0 for "to the end of the chip"
    pub block_count: u32,
    /// Accept the device's stored checkpoint
    pub resume: bool,
}

impl OpArgs {
    /// Whole chip
    pub fn all() -> Self {
        Self::default()
    }

    /// `count` blocks from `start`
    pub fn blocks(start_block: u32, block_count: u32) -> Self {
        Self {
            start_block,
            block_count,
            resume: false,
        }
    }

    /// Same range, continuing from the device's checkpoint
    pub fn resuming(self) -> Self {
        Self { resume: true, ..self }
    }

    fn end(&self, profile: &ChipProfile) -> Result<u32> {
        let end = match self.block_count {
            0 => profile.block_count,
            n => self.start_block.saturating_add(n),
        };
        if self.start_block >= end || end > profile.block_count {
            return Err(SerialError::InvalidParameter(format!(
                "blocks {}..{} outside the chip ({} blocks)",
                self.start_block, end, profile.block_count
            )));
        }
        Ok(end)
    }
}

/// Something the device reported while an operation runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpEvent {
    /// Units done so far
    Progress(Progress),
    /// Device is holding at a boundary
    Paused,
    /// Supply voltage is low
    PowerWarning(u32),
}

/// What to tell the device after an [`OpEvent`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    /// Nothing
    Continue,
    /// Cancel at the next boundary
    Cancel,
    /// Pause at the next boundary
    Pause,
    /// Leave the paused state
    Resume,
}

/// Pages returned by a read
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReadOutcome {
    /// Absolute index of the first page received
    pub first_page: Option<u32>,
    /// Raw page bytes (main area then OOB), in page order
    pub data: Vec<u8>,
    /// Pages received
    pub pages: u32,
    /// Digest reported by the device
    pub digest: u32,
}

/// Connection to a programmer
pub struct Programmer<T: Transport> {
    transport: T,
    protocol: WireProtocol,
    frames: FrameDecoder,
    lines: LineDecoder,
    inbox: VecDeque<Reply>,
    timeout_ms: u64,
    options: OperationOptions,
    hash: HashKind,
    registry: ChipRegistry,
    profile: Option<ChipProfile>,
    power_warning: Option<u32>,
}

impl<T: Transport> Programmer<T> {
    /// Wrap a transport; nothing is sent until the first request
    pub fn new(transport: T, config: &HostConfig) -> Self {
        Self {
            transport,
            protocol: config.protocol,
            frames: FrameDecoder::new(),
            lines: LineDecoder::new(),
            inbox: VecDeque::new(),
            timeout_ms: config.timeout_ms,
            options: config.options(),
            hash: HashKind::Crc32,
            registry: ChipRegistry::builtin(),
            profile: None,
            power_warning: None,
        }
    }

    /// Resolve model names against `registry` instead of the built-in table
    pub fn with_registry(mut self, registry: ChipRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Chunk hash the device is configured with
    pub fn with_hash(mut self, hash: HashKind) -> Self {
        self.hash = hash;
        self
    }

    /// Geometry of the selected chip, once known
    pub fn profile(&self) -> Option<&ChipProfile> {
        self.profile.as_ref()
    }

    /// Switches sent with every operation
    pub fn options(&self) -> OperationOptions {
        self.options
    }

    /// Change the switches sent with every operation
    pub fn set_options(&mut self, options: OperationOptions) {
        self.options = options;
    }

    /// Most recent low-voltage warning seen outside an operation
    pub fn power_warning(&self) -> Option<u32> {
        self.power_warning
    }

    /// Release the transport
    pub fn into_inner(self) -> T {
        self.transport
    }

    fn send(&mut self, request: &Request) -> Result<()> {
        let mut out = Vec::new();
        match self.protocol {
            WireProtocol::Framed => out = request.to_frame().encode(),
            WireProtocol::Legacy => legacy::format_request(request, &mut out),
        }
        self.transport.write(&out)?;
        self.transport.flush()
    }

    /// Next reply in arrival order
    fn next_reply(&mut self) -> Result<Reply> {
        let mut buf = [0u8; 4096];
        loop {
            if let Some(reply) = self.inbox.pop_front() {
                log::trace!("programmer: <- {:02X}", reply.code());
                return Ok(reply);
            }
            let n = self.transport.read_timeout(&mut buf, self.timeout_ms)?;
            if n == 0 {
                return Err(SerialError::Timeout);
            }
            self.ingest(&buf[..n]);
        }
    }

    fn ingest(&mut self, bytes: &[u8]) {
        match self.protocol {
            WireProtocol::Framed => {
                self.frames.push(bytes);
                loop {
                    match self.frames.decode() {
                        Ok(Some(frame)) => match Reply::from_frame(frame) {
                            Ok(reply) => self.inbox.push_back(reply),
                            Err(e) => log::warn!("programmer: undecodable reply: {:?}", e),
                        },
                        Ok(None) => break,
                        Err(e) => log::warn!("programmer: dropped frame: {:?}", e),
                    }
                }
            }
            WireProtocol::Legacy => {
                self.lines.push(bytes);
                loop {
                    match self.lines.next_item() {
                        Ok(Some(LegacyItem::Line(line))) => match legacy::parse_reply(&line) {
                            Ok(reply) => self.inbox.push_back(reply),
                            Err(e) => log::warn!("programmer: unparsable line {:?}: {:?}", line, e),
                        },
                        Ok(Some(LegacyItem::Data(unit))) => self.inbox.push_back(Reply::Data(unit)),
                        Ok(None) => break,
                        Err(e) => log::warn!("programmer: bad legacy input: {:?}", e),
                    }
                }
            }
        }
    }

    /// Next reply of an idle exchange; stray power warnings are noted and skipped
    fn reply(&mut self) -> Result<Reply> {
        loop {
            match self.next_reply()? {
                Reply::PowerWarning(mv) => {
                    log::warn!("Device supply voltage low: {} mV", mv);
                    self.power_warning = Some(mv);
                }
                reply => return Ok(reply),
            }
        }
    }

    fn adopt(&mut self, model: Option<String>) {
        self.profile = model.as_deref().and_then(|name| match self.registry.select(name) {
            Ok(profile) => Some(profile.clone()),
            Err(_) => {
                log::warn!("Device reports unknown model {:?}", name);
                None
            }
        });
    }

    /// STATUS, followed by a power check
    pub fn status(&mut self) -> Result<DeviceStatus> {
        self.send(&Request::Status)?;
        self.send(&Request::PowerCheck)?;
        let mut model = None;
        let mut resume = None;
        loop {
            match self.reply()? {
                Reply::Model(name) => model = name,
                Reply::Failed(FailureCause::NoChip) => model = None,
                Reply::ResumeOffer(offer) => resume = Some(offer),
                Reply::Power(millivolts) => {
                    self.adopt(model.clone());
                    return Ok(DeviceStatus {
                        model,
                        resume,
                        millivolts,
                    });
                }
                other => return Err(unexpected(other)),
            }
        }
    }

    fn listing(&mut self) -> Result<Vec<ChipEntry>> {
        let mut entries = Vec::new();
        loop {
            match self.reply()? {
                Reply::SelectEntry { index, name } => entries.push(ChipEntry { index, name }),
                Reply::SelectEnd => return Ok(entries),
                other => return Err(unexpected(other)),
            }
        }
    }

    /// Manual-selection listing
    pub fn list_chips(&mut self) -> Result<Vec<ChipEntry>> {
        self.send(&Request::List)?;
        match self.reply()? {
            Reply::SelectStart => self.listing(),
            other => Err(unexpected(other)),
        }
    }

    /// Select a chip by its 1-based listing index
    pub fn select(&mut self, index: u16) -> Result<String> {
        self.send(&Request::Select(index))?;
        match self.reply()? {
            Reply::Model(Some(name)) => {
                self.adopt(Some(name.clone()));
                Ok(name)
            }
            Reply::SelectStart => {
                self.listing()?;
                Err(SerialError::InvalidParameter(format!("no chip at index {}", index)))
            }
            other => Err(unexpected(other)),
        }
    }

    /// Select a chip by name, with or without the vendor prefix
    pub fn select_name(&mut self, name: &str) -> Result<String> {
        let entries = self.list_chips()?;
        let entry = entries
            .iter()
            .find(|e| {
                e.name.eq_ignore_ascii_case(name)
                    || e.name
                        .split_once(' ')
                        .is_some_and(|(_, part)| part.eq_ignore_ascii_case(name))
            })
            .ok_or_else(|| SerialError::InvalidParameter(format!("unknown chip {:?}", name)))?;
        let index = entry.index;
        self.select(index)
    }

    /// Run chip detection again
    pub fn redetect(&mut self) -> Result<Detection> {
        self.send(&Request::Redetect)?;
        match self.reply()? {
            Reply::Model(Some(name)) => {
                self.adopt(Some(name.clone()));
                Ok(Detection::Detected(name))
            }
            Reply::SelectStart => {
                self.profile = None;
                Ok(Detection::Unknown(self.listing()?))
            }
            other => Err(unexpected(other)),
        }
    }

    /// Current supply voltage in millivolts
    pub fn power_check(&mut self) -> Result<u32> {
        self.send(&Request::PowerCheck)?;
        match self.reply()? {
            Reply::Power(mv) => Ok(mv),
            other => Err(unexpected(other)),
        }
    }

    fn ack(&mut self, request: Request, code: u8) -> Result<()> {
        self.send(&request)?;
        match self.reply()? {
            Reply::Ack(c) if c == code => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    /// Make the next operation resume at `block`
    pub fn set_resume(&mut self, block: u32) -> Result<()> {
        self.ack(Request::SetResume(block), CMD_SET_RESUME)
    }

    /// Drop the device's stored checkpoint
    pub fn clear_resume(&mut self) -> Result<()> {
        self.ack(Request::ClearResume, CMD_CLEAR_RESUME)
    }

    /// Cancel the running operation at its next boundary
    pub fn cancel(&mut self) -> Result<()> {
        self.send(&Request::Cancel)
    }

    /// Pause the running operation at its next boundary
    pub fn pause(&mut self) -> Result<()> {
        self.send(&Request::Pause)
    }

    /// Let a paused operation continue
    pub fn resume_op(&mut self) -> Result<()> {
        self.send(&Request::ResumeOp)
    }

    /// End the device session
    pub fn exit(&mut self) -> Result<()> {
        self.send(&Request::Exit)
    }

    fn require_profile(&self) -> Result<ChipProfile> {
        self.profile.clone().ok_or(SerialError::NoChip)
    }

    fn start(&mut self, kind: OperationKind, args: OpArgs) -> Result<()> {
        log::debug!(
            "programmer: {:?} blocks {}+{} resume={}",
            kind,
            args.start_block,
            args.block_count,
            args.resume
        );
        self.send(&Request::Operation(OperationRequest {
            kind,
            start_block: args.start_block,
            block_count: args.block_count,
            options: self.options,
            resume: args.resume,
        }))
    }

    fn steer(&mut self, event: OpEvent, on_event: &mut impl FnMut(OpEvent) -> Control) -> Result<()> {
        match on_event(event) {
            Control::Continue => Ok(()),
            Control::Cancel => self.cancel(),
            Control::Pause => self.pause(),
            Control::Resume => self.resume_op(),
        }
    }

    /// Replies every operation may see; anything else is returned
    fn common(&mut self, reply: Reply, on_event: &mut impl FnMut(OpEvent) -> Control) -> Result<Option<Reply>> {
        match reply {
            Reply::Paused => self.steer(OpEvent::Paused, on_event)?,
            Reply::PowerWarning(mv) => self.steer(OpEvent::PowerWarning(mv), on_event)?,
            Reply::Rejected { command, cause } => {
                log::warn!("Device rejected 0x{:02X} during the operation: {:?}", command, cause);
            }
            Reply::Cancelled => return Err(SerialError::Cancelled),
            Reply::Failed(cause) => return Err(failure(cause)),
            other => return Ok(Some(other)),
        }
        Ok(None)
    }

    /// Read blocks, checking every page and the final digest
    pub fn read(&mut self, args: OpArgs, mut on_event: impl FnMut(OpEvent) -> Control) -> Result<ReadOutcome> {
        let profile = self.require_profile()?;
        args.end(&profile)?;
        let page_len = profile.page_total_size() as usize;
        self.start(OperationKind::Read, args)?;

        let codec = StreamCodec::default();
        let mut tracker = IntegrityTracker::new(self.hash);
        let mut outcome = ReadOutcome::default();
        let mut pending: Option<Vec<u8>> = None;
        loop {
            let reply = self.next_reply()?;
            match self.common(reply, &mut on_event)? {
                None => {}
                Some(Reply::Data(unit)) => pending = Some(codec.decode_page(&unit, page_len)?),
                Some(Reply::PageCrc { page, crc }) => {
                    let data = pending
                        .take()
                        .ok_or_else(|| SerialError::Unexpected(format!("PAGE_CRC {} without data", page)))?;
                    if tracker.update(&data) != crc {
                        log::error!("Page {} hash mismatch", page);
                        return Err(SerialError::Integrity(page));
                    }
                    outcome.first_page.get_or_insert(page);
                    outcome.data.extend_from_slice(&data);
                    outcome.pages += 1;
                }
                Some(Reply::Progress(p)) => self.steer(OpEvent::Progress(p), &mut on_event)?,
                Some(Reply::Complete { digest }) => {
                    check_digest(digest, &tracker)?;
                    outcome.digest = digest;
                    return Ok(outcome);
                }
                Some(other) => return Err(unexpected(other)),
            }
        }
    }

    /// Write `image` (raw pages, main area then OOB) over the block range
    ///
    /// `image` always covers the whole range; when the device resumes a
    /// write, the already committed prefix is skipped. Returns the digest.
    pub fn write(
        &mut self,
        args: OpArgs,
        image: &[u8],
        mut on_event: impl FnMut(OpEvent) -> Control,
    ) -> Result<u32> {
        let profile = self.require_profile()?;
        let end = args.end(&profile)?;
        let page_len = profile.page_total_size() as usize;
        let expected = (end - args.start_block) as usize * profile.pages_per_block as usize * page_len;
        if image.len() != expected {
            return Err(SerialError::InvalidParameter(format!(
                "image is {} bytes, the range needs {}",
                image.len(),
                expected
            )));
        }
        self.start(OperationKind::Write, args)?;

        let first_block = loop {
            let reply = self.next_reply()?;
            match self.common(reply, &mut on_event)? {
                None => {}
                Some(Reply::ReadyForData { first_block }) => break first_block,
                Some(other) => return Err(unexpected(other)),
            }
        };
        if first_block < args.start_block || first_block >= end {
            return Err(SerialError::Unexpected(format!("device wants data from block {}", first_block)));
        }
        if first_block != args.start_block {
            log::info!("Device resumes the write at block {}", first_block);
        }

        let codec = StreamCodec::new(CodecOptions {
            compress: self.options.compress,
            skip_blank: self.options.skip_blank,
        });
        let skip = (first_block - args.start_block) as usize * profile.pages_per_block as usize;
        let mut pages = image.chunks(page_len).skip(skip);
        let mut tracker = IntegrityTracker::new(self.hash);
        let mut send_next = |this: &mut Self, tracker: &mut IntegrityTracker| -> Result<()> {
            if let Some(page) = pages.next() {
                tracker.update(page);
                this.send(&Request::Data(codec.encode(page)))?;
            }
            Ok(())
        };
        for _ in 0..WRITE_WINDOW {
            send_next(self, &mut tracker)?;
        }

        loop {
            let reply = self.next_reply()?;
            match self.common(reply, &mut on_event)? {
                None => {}
                Some(Reply::Progress(p)) => {
                    self.steer(OpEvent::Progress(p), &mut on_event)?;
                    send_next(self, &mut tracker)?;
                }
                Some(Reply::Complete { digest }) => {
                    check_digest(digest, &tracker)?;
                    return Ok(digest);
                }
                Some(other) => return Err(unexpected(other)),
            }
        }
    }

    /// Erase blocks
    pub fn erase(&mut self, args: OpArgs, mut on_event: impl FnMut(OpEvent) -> Control) -> Result<()> {
        if let Some(profile) = self.profile.as_ref() {
            args.end(profile)?;
        }
        self.start(OperationKind::Erase, args)?;
        loop {
            let reply = self.next_reply()?;
            match self.common(reply, &mut on_event)? {
                None => {}
                Some(Reply::Progress(p)) => self.steer(OpEvent::Progress(p), &mut on_event)?,
                Some(Reply::Complete { .. }) => return Ok(()),
                Some(other) => return Err(unexpected(other)),
            }
        }
    }
}

fn failure(cause: FailureCause) -> SerialError {
    match cause {
        FailureCause::NoChip => SerialError::NoChip,
        cause => SerialError::Failed(cause),
    }
}

fn unexpected(reply: Reply) -> SerialError {
    match reply {
        Reply::Failed(cause) => failure(cause),
        Reply::Rejected { command, cause } => SerialError::Rejected { command, cause },
        Reply::Cancelled => SerialError::Cancelled,
        other => SerialError::Unexpected(format!("{:?}", other)),
    }
}

fn check_digest(device: u32, tracker: &IntegrityTracker) -> Result<()> {
    let host = tracker.digest();
    if device != host {
        log::error!("Digest mismatch: device {:#010x}, host {:#010x}", device, host);
        return Err(SerialError::DigestMismatch { device, host });
    }
    Ok(())
}
