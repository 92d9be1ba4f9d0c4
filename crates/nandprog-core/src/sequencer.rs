//! Operation state machine
//!
//! One [`OperationSequencer`] runs one read, write or erase to completion,
//! cancellation or failure. It walks the requested blocks page by page
//! (block by block for erase) and only looks at host input between pages,
//! so a cancel or pause never splits a bus transaction.
//!
//! ```text
//! Idle -> Running -> Completed | Cancelled | Failed
//!            ^  |
//!            |  v
//!           Paused
//! ```
//!
//! A checkpoint is saved after every completed block and again on entering
//! Paused. Completion clears it; cancellation and failure leave it in place
//! so the host can resume later.

use alloc::collections::VecDeque;
use alloc::vec::Vec;
use core::ops::Range;

use crate::bus::{BusDriver, NandBus};
use crate::checkpoint::{Checkpoint, CheckpointStore};
use crate::chip::{ChipProfile, ERASED};
use crate::error::{Error, FailureCause, Result};
use crate::integrity::IntegrityTracker;
use crate::power::{PowerStatus, VoltageSensor};
use crate::protocol::{OperationKind, OperationRequest, Progress, Reply, Request};
use crate::session::Engine;
use crate::stream::{CodecOptions, StreamCodec};

/// The sequencer's view of the host link
pub trait HostChannel {
    /// Send one reply
    fn emit(&mut self, reply: Reply) -> Result<()>;

    /// Next request from the host, or `Ok(None)` when nothing is pending
    fn try_recv(&mut self) -> Result<Option<Request>>;

    /// Block for the next request until the clock reaches `deadline_ms`
    ///
    /// Returns `Ok(None)` at the deadline. Fails with [`Error::Link`] once
    /// the link has been silent for the inactivity timeout, counted from
    /// the later of the last inbound byte and `since_ms`.
    fn recv_until(&mut self, since_ms: u64, deadline_ms: u64) -> Result<Option<Request>>;

    /// Monotonic milliseconds, used to space power samples
    fn now_ms(&self) -> u64;
}

/// Lifecycle of one operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpStatus {
    /// Walking pages/blocks
    Running,
    /// Halted at a boundary, waiting for RESUME_OP or CANCEL
    Paused,
    /// Stopped by the host at a boundary
    Cancelled,
    /// Every unit done
    Completed,
    /// Stopped by an unrecoverable error
    Failed(FailureCause),
}

impl OpStatus {
    /// Check if the operation has ended
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Cancelled | Self::Completed | Self::Failed(_))
    }
}

/// Snapshot of the running (or last) operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperationState {
    /// What is running
    pub kind: OperationKind,
    /// Current block
    pub block: u32,
    /// Current page within the block
    pub page: u32,
    /// Raw bytes moved so far (including spare areas)
    pub bytes: u64,
    /// Hash of the last processed chunk
    pub last_hash: Option<u32>,
    /// Lifecycle state
    pub status: OpStatus,
    /// Units done, counting any resumed prefix
    pub completed: u32,
    /// Units in the whole request
    pub total: u32,
}

impl OperationState {
    fn new(kind: OperationKind, block: u32) -> Self {
        Self {
            kind,
            block,
            page: 0,
            bytes: 0,
            last_hash: None,
            status: OpStatus::Running,
            completed: 0,
            total: 0,
        }
    }

    /// Progress as reported to the host
    pub fn progress(&self) -> Progress {
        Progress::new(self.completed, self.total)
    }
}

enum Flow {
    Continue,
    Stop,
}

/// Runs one operation against an [`Engine`]
pub struct OperationSequencer<'e, B: NandBus, S, V> {
    engine: &'e mut Engine<B, S, V>,
    request: OperationRequest,
    codec: StreamCodec,
    tracker: IntegrityTracker,
    state: OperationState,
    checkpoint: Option<Checkpoint>,
    stash: VecDeque<Vec<u8>>,
    cancel: bool,
    pause: bool,
    exit: bool,
}

impl<'e, B: NandBus, S: CheckpointStore, V: VoltageSensor> OperationSequencer<'e, B, S, V> {
    /// Prepare `request`; nothing touches the bus until [`run`](Self::run)
    pub fn new(engine: &'e mut Engine<B, S, V>, request: OperationRequest) -> Self {
        let codec = StreamCodec::new(CodecOptions {
            compress: request.options.compress,
            skip_blank: request.options.skip_blank,
        });
        let tracker = IntegrityTracker::new(engine.config.hash);
        Self {
            engine,
            request,
            codec,
            tracker,
            state: OperationState::new(request.kind, request.start_block),
            checkpoint: None,
            stash: VecDeque::new(),
            cancel: false,
            pause: false,
            exit: false,
        }
    }

    /// Current state
    pub fn state(&self) -> &OperationState {
        &self.state
    }

    /// The host sent EXIT while the operation was running
    pub fn exit_requested(&self) -> bool {
        self.exit
    }

    /// Run to a terminal state and report it to the host
    pub fn run<H: HostChannel>(&mut self, host: &mut H) -> OperationState {
        let outcome = match self.engine.profile.clone() {
            Some(profile) => self.execute(&profile, host),
            None => Err(Error::ChipNotDetected),
        };
        let reply = match outcome {
            Ok(Flow::Continue) => match self.engine.store.clear() {
                Ok(()) => {
                    self.state.status = OpStatus::Completed;
                    log::info!(
                        "sequencer: {:?} complete, {} units, {} bytes",
                        self.state.kind,
                        self.state.total,
                        self.state.bytes
                    );
                    Reply::Complete {
                        digest: self.tracker.digest(),
                    }
                }
                Err(e) => self.fail(e),
            },
            Ok(Flow::Stop) => {
                self.state.status = OpStatus::Cancelled;
                log::info!("sequencer: {:?} cancelled at block {}", self.state.kind, self.state.block);
                Reply::Cancelled
            }
            Err(e) => self.fail(e),
        };
        if let Err(e) = host.emit(reply) {
            log::warn!("sequencer: cannot report outcome: {}", e);
        }
        self.state
    }

    fn fail(&mut self, e: Error) -> Reply {
        let cause = e.cause();
        log::error!(
            "sequencer: {:?} failed at block {} page {}: {}",
            self.state.kind,
            self.state.block,
            self.state.page,
            e
        );
        self.state.status = OpStatus::Failed(cause);
        Reply::Failed(cause)
    }

    fn execute<H: HostChannel>(&mut self, profile: &ChipProfile, host: &mut H) -> Result<Flow> {
        let blocks = self.request.blocks(profile)?;
        self.engine.power.reset();
        let start = self.resume_point(profile, &blocks)?;

        let kind = self.request.kind;
        let per_block = match kind {
            OperationKind::Erase => 1,
            _ => profile.pages_per_block,
        };
        self.state.total = (blocks.end - blocks.start) * per_block;
        self.state.completed = (start - blocks.start) * per_block;
        self.state.block = start;
        log::info!(
            "sequencer: {:?} blocks {}..{} starting at {}",
            kind,
            blocks.start,
            blocks.end,
            start
        );

        if kind == OperationKind::Write {
            host.emit(Reply::ReadyForData { first_block: start })?;
        }

        for block in start..blocks.end {
            self.state.block = block;
            self.state.page = 0;
            let flow = match kind {
                OperationKind::Erase => self.erase_block(profile, block, host)?,
                _ => self.transfer_block(profile, block, host)?,
            };
            if let Flow::Stop = flow {
                return Ok(Flow::Stop);
            }
            self.commit_block(profile, block)?;
            if kind == OperationKind::Erase {
                self.state.completed += 1;
                host.emit(Reply::Progress(self.state.progress()))?;
            }
        }
        Ok(Flow::Continue)
    }

    /// First block to process, after applying the resume rules
    fn resume_point(&mut self, profile: &ChipProfile, blocks: &Range<u32>) -> Result<u32> {
        let stored = self.engine.store.load()?;
        let requested = self.engine.resume_override.take();

        if !self.request.resume {
            if stored.is_some() {
                log::info!("sequencer: fresh start, dropping stored checkpoint");
                self.engine.store.clear()?;
            }
            return Ok(blocks.start);
        }

        let kind = self.request.kind;
        let cp = match stored {
            Some(cp) if cp.kind == kind && blocks.contains(&cp.block) => cp,
            Some(cp) => {
                log::info!(
                    "sequencer: stale {:?} checkpoint at block {}, clearing",
                    cp.kind,
                    cp.block
                );
                self.engine.store.clear()?;
                return Ok(self.unbacked_start(requested, blocks));
            }
            None => return Ok(self.unbacked_start(requested, blocks)),
        };

        let next = requested.unwrap_or(cp.next_block());
        if next < blocks.start || next > blocks.end {
            log::warn!("sequencer: resume block {} outside {}..{}", next, blocks.start, blocks.end);
            return Ok(blocks.start);
        }

        if kind == OperationKind::Write {
            if next > cp.next_block() {
                log::warn!(
                    "sequencer: resume block {} is past the last committed block {}, restarting",
                    next,
                    cp.block
                );
                return Ok(blocks.start);
            }
            // the page written last before the interruption must read back as recorded
            if let Err(e) = self.verify_checkpoint(profile, &cp) {
                log::warn!(
                    "sequencer: checkpoint at block {} does not match the device ({}), restarting",
                    cp.block,
                    e
                );
                self.engine.store.clear()?;
                return Ok(blocks.start);
            }
        }

        log::info!(
            "sequencer: resuming {:?} at block {} (token {:#010x})",
            kind,
            next,
            cp.token
        );
        self.checkpoint = Some(cp);
        Ok(next)
    }

    /// SET_RESUME without a matching checkpoint is only trusted where no data can be lost
    fn unbacked_start(&self, requested: Option<u32>, blocks: &Range<u32>) -> u32 {
        match requested {
            Some(block) if self.request.kind != OperationKind::Write && blocks.contains(&block) => block,
            Some(block) => {
                log::warn!(
                    "sequencer: no checkpoint backs resume block {}, starting at {}",
                    block,
                    blocks.start
                );
                blocks.start
            }
            None => blocks.start,
        }
    }

    fn verify_checkpoint(&mut self, profile: &ChipProfile, cp: &Checkpoint) -> Result<()> {
        let page = cp.page;
        let data = self.bus_retry(profile, |bus, p| bus.read_page(p, page))?;
        if self.tracker.peek(&data) != cp.chunk_hash {
            return Err(Error::Integrity);
        }
        Ok(())
    }

    fn commit_block(&mut self, profile: &ChipProfile, block: u32) -> Result<()> {
        let cp = Checkpoint {
            kind: self.request.kind,
            block,
            page: profile.block_first_page(block) + profile.pages_per_block - 1,
            chunk_hash: self.tracker.last_hash().unwrap_or(0),
            token: self.engine.config.token,
        };
        self.engine.store.save(&cp)?;
        self.checkpoint = Some(cp);
        log::debug!("sequencer: checkpoint block {} hash {:#010x}", block, cp.chunk_hash);
        Ok(())
    }

    fn transfer_block<H: HostChannel>(
        &mut self,
        profile: &ChipProfile,
        block: u32,
        host: &mut H,
    ) -> Result<Flow> {
        let first = profile.block_first_page(block);
        for offset in 0..profile.pages_per_block {
            let unit = loop {
                if let Flow::Stop = self.boundary(host)? {
                    return Ok(Flow::Stop);
                }
                if self.request.kind != OperationKind::Write {
                    break None;
                }
                if let Some(unit) = self.await_data(host)? {
                    break Some(unit);
                }
            };

            let page = first + offset;
            self.state.page = offset;
            let hash = match unit {
                Some(unit) => self.program_page(profile, page, &unit)?,
                None => self.read_page(profile, page, host)?,
            };
            self.state.last_hash = Some(hash);
            self.state.bytes += profile.page_total_size() as u64;
            self.state.completed += 1;
            host.emit(Reply::Progress(self.state.progress()))?;
        }
        Ok(Flow::Continue)
    }

    fn read_page<H: HostChannel>(&mut self, profile: &ChipProfile, page: u32, host: &mut H) -> Result<u32> {
        let data = self.bus_retry(profile, |bus, p| bus.read_page(p, page))?;
        let hash = self.tracker.update(&data);
        host.emit(Reply::Data(self.codec.encode(&data)))?;
        host.emit(Reply::PageCrc { page, crc: hash })?;
        Ok(hash)
    }

    fn program_page(&mut self, profile: &ChipProfile, page: u32, unit: &[u8]) -> Result<u32> {
        let data = self.codec.decode_page(unit, profile.page_total_size() as usize)?;
        let mut attempt = 0;
        loop {
            self.bus_retry(profile, |bus, p| bus.write_page(p, page, &data))?;
            if !self.request.options.verify {
                break;
            }
            let back = self.bus_retry(profile, |bus, p| bus.read_page(p, page))?;
            if back == data {
                break;
            }
            if attempt >= self.engine.config.verify_retries {
                return Err(Error::Verify { page });
            }
            attempt += 1;
            log::warn!("sequencer: page {} read-back mismatch, retry {}", page, attempt);
        }
        Ok(self.tracker.update(&data))
    }

    fn erase_block<H: HostChannel>(&mut self, profile: &ChipProfile, block: u32, host: &mut H) -> Result<Flow> {
        if let Flow::Stop = self.boundary(host)? {
            return Ok(Flow::Stop);
        }
        let mut attempt = 0;
        loop {
            self.bus_retry(profile, |bus, p| bus.erase_block(p, block))?;
            let dirty = match self.request.options.verify {
                true => self.first_dirty_page(profile, block)?,
                false => None,
            };
            let Some(page) = dirty else { break };
            if attempt >= self.engine.config.verify_retries {
                return Err(Error::Verify { page });
            }
            attempt += 1;
            log::warn!("sequencer: block {} not blank at page {}, retry {}", block, page, attempt);
        }
        self.state.page = profile.pages_per_block - 1;
        self.state.bytes += profile.page_total_size() as u64 * profile.pages_per_block as u64;
        self.state.last_hash = Some(self.tracker.update(&block.to_le_bytes()));
        Ok(Flow::Continue)
    }

    fn first_dirty_page(&mut self, profile: &ChipProfile, block: u32) -> Result<Option<u32>> {
        let first = profile.block_first_page(block);
        for page in first..first + profile.pages_per_block {
            let data = self.bus_retry(profile, |bus, p| bus.read_page(p, page))?;
            if data.iter().any(|&b| b != ERASED) {
                return Ok(Some(page));
            }
        }
        Ok(None)
    }

    fn bus_retry<T>(
        &mut self,
        profile: &ChipProfile,
        mut op: impl FnMut(&mut BusDriver<B>, &ChipProfile) -> Result<T>,
    ) -> Result<T> {
        let retries = self.engine.config.bus_retries;
        let mut attempt = 0;
        loop {
            match op(&mut self.engine.bus, profile) {
                Err(Error::BusTimeout) if attempt < retries => {
                    attempt += 1;
                    log::warn!("sequencer: bus timeout, retry {}/{}", attempt, retries);
                }
                other => return other,
            }
        }
    }

    /// Handle everything the host sent since the last boundary
    fn boundary<H: HostChannel>(&mut self, host: &mut H) -> Result<Flow> {
        while let Some(request) = host.try_recv()? {
            self.handle(request, host)?;
        }
        self.poll_power(host)?;
        if self.pause && !self.cancel {
            self.hold(host)?;
        }
        Ok(if self.cancel { Flow::Stop } else { Flow::Continue })
    }

    fn hold<H: HostChannel>(&mut self, host: &mut H) -> Result<()> {
        if let Some(cp) = self.checkpoint {
            self.engine.store.save(&cp)?;
        }
        self.state.status = OpStatus::Paused;
        host.emit(Reply::Paused)?;
        log::info!("sequencer: paused at block {} page {}", self.state.block, self.state.page);
        while self.pause && !self.cancel {
            let request = self.wait_request(host)?;
            self.handle(request, host)?;
        }
        self.state.status = OpStatus::Running;
        if !self.cancel {
            log::info!("sequencer: resumed");
        }
        Ok(())
    }

    /// Wait for the next page of write data; `None` if a control request came first
    fn await_data<H: HostChannel>(&mut self, host: &mut H) -> Result<Option<Vec<u8>>> {
        loop {
            if let Some(unit) = self.stash.pop_front() {
                return Ok(Some(unit));
            }
            let request = self.wait_request(host)?;
            self.handle(request, host)?;
            if self.cancel || self.pause {
                return Ok(None);
            }
        }
    }

    /// Block for the next request, sampling the supply while the host is quiet
    fn wait_request<H: HostChannel>(&mut self, host: &mut H) -> Result<Request> {
        let since = host.now_ms();
        loop {
            let deadline = host.now_ms().saturating_add(self.engine.power.period_ms().max(1));
            if let Some(request) = host.recv_until(since, deadline)? {
                return Ok(request);
            }
            self.poll_power(host)?;
        }
    }

    fn poll_power<H: HostChannel>(&mut self, host: &mut H) -> Result<()> {
        match self.engine.power.poll(host.now_ms()) {
            Some(status) => self.observe_power(status, host),
            None => Ok(()),
        }
    }

    fn handle<H: HostChannel>(&mut self, request: Request, host: &mut H) -> Result<()> {
        match request {
            Request::Cancel => self.cancel = true,
            Request::Exit => {
                self.cancel = true;
                self.exit = true;
            }
            Request::Pause => self.pause = true,
            Request::ResumeOp => self.pause = false,
            Request::Data(unit) => self.stash.push_back(unit),
            Request::Status => {
                let name = self.engine.profile.as_ref().map(|p| p.full_name());
                host.emit(Reply::Model(name))?;
                host.emit(Reply::Progress(self.state.progress()))?;
            }
            Request::PowerCheck => {
                let status = self.engine.power.sample(host.now_ms());
                host.emit(Reply::Power(status.millivolts()))?;
                self.observe_power(status, host)?;
            }
            other => {
                log::warn!("sequencer: rejecting {:#04x} while {:?} runs", other.code(), self.state.kind);
                host.emit(Reply::Rejected {
                    command: other.code(),
                    cause: FailureCause::InvalidRequest,
                })?;
            }
        }
        Ok(())
    }

    fn observe_power<H: HostChannel>(&mut self, status: PowerStatus, host: &mut H) -> Result<()> {
        match status {
            PowerStatus::Ok(_) => Ok(()),
            PowerStatus::Warning(mv) => host.emit(Reply::PowerWarning(mv)),
            PowerStatus::Critical(mv) => {
                host.emit(Reply::PowerWarning(mv))?;
                Err(Error::Power(mv))
            }
        }
    }
}
