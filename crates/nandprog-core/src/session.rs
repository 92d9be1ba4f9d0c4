//! Device session: the context object that owns the bus, the selected chip
//! and the host link for one connection
//!
//! [`Engine`] holds everything an operation needs (bus driver, chip
//! registry, selected profile, checkpoint store, power monitor and
//! configuration). [`Wire`] owns the byte link and turns it into requests
//! and replies in whichever protocol the host negotiated. [`Session`] ties
//! the two together and dispatches idle-state commands; bulk operations
//! are handed to an [`OperationSequencer`].

use alloc::collections::VecDeque;
use alloc::vec::Vec;

use embedded_io::{Read, ReadReady, Write};

use crate::bus::{AutotuneConfig, BusDriver, NandBus, ReadyTimeouts};
use crate::checkpoint::CheckpointStore;
use crate::chip::{ChipProfile, ChipRegistry};
use crate::clock::Clock;
use crate::error::{Error, FailureCause, ProtocolError, Result};
use crate::integrity::HashKind;
use crate::power::{self, PowerMonitor, PowerStatus, VoltageSensor};
use crate::protocol::legacy::{self, LegacyItem, LineDecoder};
use crate::protocol::codes::{CMD_CLEAR_RESUME, CMD_SET_RESUME};
use crate::protocol::{FrameDecoder, OperationRequest, ProtocolMode, Reply, Request};
use crate::sequencer::{HostChannel, OperationSequencer, OperationState};

/// Delay between link polls while waiting for host input
pub const IDLE_POLL_US: u32 = 1000;

/// Session tunables
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    /// Host silence tolerated while an operation waits for input
    pub inactivity_ms: u64,
    /// Retries after a ready/busy timeout, per transaction
    pub bus_retries: u8,
    /// Re-program (or re-erase) attempts after a read-back mismatch
    pub verify_retries: u8,
    /// R/B# wait bounds
    pub ready_timeouts: ReadyTimeouts,
    /// Low-voltage threshold
    pub power_threshold_mv: u32,
    /// Consecutive low samples that abort an operation
    pub power_low_limit: u8,
    /// Minimum spacing of periodic power samples
    pub power_period_ms: u64,
    /// Wire protocol, or `Negotiate` to follow the host
    pub mode: ProtocolMode,
    /// Tune bus timing after each successful detection
    pub autotune: Option<AutotuneConfig>,
    /// Chunk hash used for PAGE_CRC, checkpoints and the digest
    pub hash: HashKind,
    /// Written into checkpoints to tell sessions apart
    pub token: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            inactivity_ms: 5000,
            bus_retries: 3,
            verify_retries: 2,
            ready_timeouts: ReadyTimeouts::default(),
            power_threshold_mv: power::DEFAULT_THRESHOLD_MV,
            power_low_limit: power::DEFAULT_LOW_LIMIT,
            power_period_ms: power::DEFAULT_PERIOD_MS,
            mode: ProtocolMode::Negotiate,
            autotune: None,
            hash: HashKind::Crc32,
            token: 0,
        }
    }
}

/// Everything an operation runs against
pub struct Engine<B: NandBus, S, V> {
    pub(crate) bus: BusDriver<B>,
    pub(crate) registry: ChipRegistry,
    pub(crate) profile: Option<ChipProfile>,
    pub(crate) store: S,
    pub(crate) power: PowerMonitor<V>,
    pub(crate) config: SessionConfig,
    pub(crate) resume_override: Option<u32>,
    pub(crate) last: Option<OperationState>,
}

impl<B: NandBus, S: CheckpointStore, V: VoltageSensor> Engine<B, S, V> {
    /// Assemble an engine; no chip is selected yet
    pub fn new(bus: B, registry: ChipRegistry, store: S, sensor: V, config: SessionConfig) -> Self {
        Self {
            bus: BusDriver::with_timeouts(bus, config.ready_timeouts),
            registry,
            profile: None,
            store,
            power: PowerMonitor::with_limits(
                sensor,
                config.power_threshold_mv,
                config.power_low_limit,
                config.power_period_ms,
            ),
            config,
            resume_override: None,
            last: None,
        }
    }

    /// Configuration in effect
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Selected chip
    pub fn profile(&self) -> Option<&ChipProfile> {
        self.profile.as_ref()
    }

    /// Select a chip explicitly
    pub fn set_profile(&mut self, profile: ChipProfile) {
        log::info!("session: selected {}", profile.full_name());
        self.profile = Some(profile);
    }

    /// Known chips
    pub fn registry(&self) -> &ChipRegistry {
        &self.registry
    }

    /// Bus driver
    pub fn bus(&self) -> &BusDriver<B> {
        &self.bus
    }

    /// Bus driver
    pub fn bus_mut(&mut self) -> &mut BusDriver<B> {
        &mut self.bus
    }

    /// Checkpoint storage
    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    /// Power monitor
    pub fn power_mut(&mut self) -> &mut PowerMonitor<V> {
        &mut self.power
    }

    /// Final state of the last operation
    pub fn last_operation(&self) -> Option<&OperationState> {
        self.last.as_ref()
    }

    /// Reset the die, read its ID and look it up
    ///
    /// Replaces the current selection. On success the bus timing is tuned
    /// when autotune is configured.
    pub fn detect(&mut self) -> Result<&ChipProfile> {
        self.profile = None;
        self.bus.reset()?;
        let id = self.bus.read_id()?;
        let profile = match self.registry.detect(&id) {
            Ok(profile) => profile.clone(),
            Err(e) => {
                log::warn!("session: unknown ID {:02X?}", id);
                return Err(e);
            }
        };
        log::info!("session: detected {} ({:02X?})", profile.full_name(), id);
        if let Some(tune) = self.config.autotune {
            self.bus.autotune(&profile, &tune);
        }
        Ok(self.profile.insert(profile))
    }

    /// Run one operation to its end; returns whether the host asked to exit
    pub fn run_operation<H: HostChannel>(&mut self, request: OperationRequest, host: &mut H) -> bool {
        let mut sequencer = OperationSequencer::new(self, request);
        let state = sequencer.run(host);
        let exit = sequencer.exit_requested();
        self.last = Some(state);
        exit
    }

    /// Release the bus at the end of a session
    pub fn teardown(&mut self) {
        self.bus.bus_mut().select(false);
        log::debug!("session: bus released");
    }
}

fn link_error<E: embedded_io::Error>(e: E) -> Error {
    log::warn!("session: link error: {:?}", e.kind());
    Error::Link
}

fn rejected_command(e: ProtocolError) -> u8 {
    match e {
        ProtocolError::UnknownCommand(c) | ProtocolError::OutOfSequence(c) | ProtocolError::BadPayload(c) => c,
    }
}

/// Request/reply transport over a byte link
pub struct Wire<L, C> {
    link: L,
    clock: C,
    mode: ProtocolMode,
    preamble: Vec<u8>,
    frames: FrameDecoder,
    lines: LineDecoder,
    pending: VecDeque<Request>,
    inactivity_ms: u64,
    last_rx_ms: u64,
    closed: bool,
}

impl<L: Read + Write + ReadReady, C: Clock> Wire<L, C> {
    /// Wrap a link; `mode` may be `Negotiate`
    pub fn new(link: L, clock: C, mode: ProtocolMode, inactivity_ms: u64) -> Self {
        let last_rx_ms = clock.now_ms();
        Self {
            link,
            clock,
            mode,
            preamble: Vec::new(),
            frames: FrameDecoder::new(),
            lines: LineDecoder::new(),
            pending: VecDeque::new(),
            inactivity_ms,
            last_rx_ms,
            closed: false,
        }
    }

    /// Protocol in use (still `Negotiate` until two bytes arrived)
    pub fn mode(&self) -> ProtocolMode {
        self.mode
    }

    /// The link reached end of file or failed
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Link access
    pub fn link_mut(&mut self) -> &mut L {
        &mut self.link
    }

    /// Clock access
    pub fn clock_mut(&mut self) -> &mut C {
        &mut self.clock
    }

    /// Give back the link and the clock
    pub fn into_inner(self) -> (L, C) {
        (self.link, self.clock)
    }

    /// Sleep for one poll interval
    pub fn idle(&mut self) {
        self.clock.delay_us(IDLE_POLL_US);
    }

    fn send(&mut self, reply: &Reply) -> Result<()> {
        let mut out = Vec::new();
        match self.mode {
            ProtocolMode::Legacy => legacy::format_reply(reply, &mut out),
            _ => out = reply.to_frame().encode(),
        }
        let written = self.link.write_all(&out).and_then(|_| self.link.flush());
        written.map_err(|e| {
            self.closed = true;
            link_error(e)
        })
    }

    /// Move everything the link has buffered into the decoders
    fn pump(&mut self) -> Result<()> {
        if self.closed {
            return Err(Error::Link);
        }
        let mut buf = [0u8; 256];
        let mut received = false;
        loop {
            let ready = self.link.read_ready().map_err(|e| {
                self.closed = true;
                link_error(e)
            })?;
            if !ready {
                break;
            }
            let n = self.link.read(&mut buf).map_err(|e| {
                self.closed = true;
                link_error(e)
            })?;
            if n == 0 {
                log::info!("session: link closed by host");
                self.closed = true;
                return Err(Error::Link);
            }
            received = true;
            self.ingest(&buf[..n])?;
        }
        if received {
            self.last_rx_ms = self.clock.now_ms();
        }
        Ok(())
    }

    fn ingest(&mut self, bytes: &[u8]) -> Result<()> {
        match self.mode {
            ProtocolMode::Negotiate => {
                self.preamble.extend_from_slice(bytes);
                if self.preamble.len() < 2 {
                    return Ok(());
                }
                self.mode = ProtocolMode::detect([self.preamble[0], self.preamble[1]]);
                log::info!("session: host speaks {:?} protocol", self.mode);
                let held = core::mem::take(&mut self.preamble);
                self.ingest(&held)
            }
            ProtocolMode::Framed => {
                self.frames.push(bytes);
                self.drain_frames()
            }
            ProtocolMode::Legacy => {
                self.lines.push(bytes);
                self.drain_lines()
            }
        }
    }

    fn drain_frames(&mut self) -> Result<()> {
        loop {
            match self.frames.decode() {
                Ok(Some(frame)) => match Request::from_frame(frame) {
                    Ok(request) => self.pending.push_back(request),
                    Err(e) => self.reject(e)?,
                },
                Ok(None) => return Ok(()),
                Err(e) => log::warn!("session: dropped frame: {:?}", e),
            }
        }
    }

    fn drain_lines(&mut self) -> Result<()> {
        loop {
            match self.lines.next_item() {
                Ok(Some(LegacyItem::Line(line))) if line.trim().is_empty() => {}
                Ok(Some(LegacyItem::Line(line))) => match legacy::parse_request(&line) {
                    Ok(request) => self.pending.push_back(request),
                    Err(e) => self.reject(e)?,
                },
                Ok(Some(LegacyItem::Data(unit))) => self.pending.push_back(Request::Data(unit)),
                Ok(None) => return Ok(()),
                Err(e) => self.reject(e)?,
            }
        }
    }

    fn reject(&mut self, e: ProtocolError) -> Result<()> {
        log::warn!("session: bad request: {:?}", e);
        self.send(&Reply::Rejected {
            command: rejected_command(e),
            cause: FailureCause::InvalidRequest,
        })
    }
}

impl<L: Read + Write + ReadReady, C: Clock> HostChannel for Wire<L, C> {
    fn emit(&mut self, reply: Reply) -> Result<()> {
        self.send(&reply)
    }

    fn try_recv(&mut self) -> Result<Option<Request>> {
        if self.pending.is_empty() {
            self.pump()?;
        }
        Ok(self.pending.pop_front())
    }

    fn recv_until(&mut self, since_ms: u64, deadline_ms: u64) -> Result<Option<Request>> {
        loop {
            if let Some(request) = self.try_recv()? {
                return Ok(Some(request));
            }
            let now = self.clock.now_ms();
            let quiet_since = self.last_rx_ms.max(since_ms);
            if now.saturating_sub(quiet_since) >= self.inactivity_ms {
                log::warn!("session: no host input for {} ms", self.inactivity_ms);
                return Err(Error::Link);
            }
            if now >= deadline_ms {
                return Ok(None);
            }
            self.clock.delay_us(IDLE_POLL_US);
        }
    }

    fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }
}

/// What one [`Session::poll`] did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Poll {
    /// Nothing pending
    Idle,
    /// A request was handled
    Handled,
    /// The host ended the session
    Exit,
}

/// One host connection
pub struct Session<L, C, B: NandBus, S, V> {
    wire: Wire<L, C>,
    engine: Engine<B, S, V>,
}

impl<L, C, B, S, V> Session<L, C, B, S, V>
where
    L: Read + Write + ReadReady,
    C: Clock,
    B: NandBus,
    S: CheckpointStore,
    V: VoltageSensor,
{
    /// Start a session on `link`
    pub fn new(link: L, clock: C, engine: Engine<B, S, V>) -> Self {
        let wire = Wire::new(link, clock, engine.config.mode, engine.config.inactivity_ms);
        Self { wire, engine }
    }

    /// Engine access
    pub fn engine(&self) -> &Engine<B, S, V> {
        &self.engine
    }

    /// Engine access
    pub fn engine_mut(&mut self) -> &mut Engine<B, S, V> {
        &mut self.engine
    }

    /// Link side
    pub fn wire_mut(&mut self) -> &mut Wire<L, C> {
        &mut self.wire
    }

    /// Split into link side and engine
    pub fn into_parts(self) -> (Wire<L, C>, Engine<B, S, V>) {
        (self.wire, self.engine)
    }

    /// Handle at most one pending request without blocking
    pub fn poll(&mut self) -> Result<Poll> {
        if self.wire.mode() != ProtocolMode::Negotiate {
            let now = self.wire.now_ms();
            if let Some(PowerStatus::Warning(mv) | PowerStatus::Critical(mv)) = self.engine.power.poll(now) {
                self.wire.emit(Reply::PowerWarning(mv))?;
            }
        }
        match self.wire.try_recv()? {
            Some(request) => self.dispatch(request),
            None => Ok(Poll::Idle),
        }
    }

    /// Serve requests until EXIT or until the host goes away
    pub fn run(&mut self) -> Result<()> {
        let outcome = loop {
            match self.poll() {
                Ok(Poll::Exit) => break Ok(()),
                Ok(Poll::Handled) => {}
                Ok(Poll::Idle) => self.wire.idle(),
                Err(Error::Link) if self.wire.is_closed() => {
                    log::info!("session: host disconnected");
                    break Ok(());
                }
                Err(e) => break Err(e),
            }
        };
        self.engine.teardown();
        outcome
    }

    /// Handle one request received while idle
    pub fn dispatch(&mut self, request: Request) -> Result<Poll> {
        log::debug!("session: request {:#04x}", request.code());
        match request {
            Request::Status => {
                match self.engine.profile.as_ref() {
                    Some(profile) => self.wire.emit(Reply::Model(Some(profile.full_name())))?,
                    None => self.wire.emit(Reply::Failed(FailureCause::NoChip))?,
                }
                match self.engine.store.load() {
                    Ok(Some(cp)) => self.wire.emit(Reply::ResumeOffer(cp.offer()))?,
                    Ok(None) => {}
                    Err(e) => log::warn!("session: cannot read checkpoint: {}", e),
                }
            }
            Request::Operation(op) => {
                if self.engine.run_operation(op, &mut self.wire) {
                    self.engine.teardown();
                    return Ok(Poll::Exit);
                }
            }
            Request::SetResume(block) => {
                self.engine.resume_override = Some(block);
                log::info!("session: next operation resumes at block {}", block);
                self.wire.emit(Reply::Ack(CMD_SET_RESUME))?;
            }
            Request::ClearResume => {
                self.engine.resume_override = None;
                match self.engine.store.clear() {
                    Ok(()) => self.wire.emit(Reply::Ack(CMD_CLEAR_RESUME))?,
                    Err(e) => self.wire.emit(Reply::Failed(e.cause()))?,
                }
            }
            Request::PowerCheck => {
                let status = self.engine.power.sample(self.wire.now_ms());
                self.wire.emit(Reply::Power(status.millivolts()))?;
                if status.is_low() {
                    self.wire.emit(Reply::PowerWarning(status.millivolts()))?;
                }
            }
            Request::Select(index) => match self.engine.registry.select_index(index).cloned() {
                Ok(profile) => {
                    let name = profile.full_name();
                    self.engine.set_profile(profile);
                    self.wire.emit(Reply::Model(Some(name)))?;
                }
                Err(_) => {
                    log::warn!("session: no chip at listing index {}", index);
                    self.send_listing()?;
                }
            },
            Request::Redetect => match self.engine.detect() {
                Ok(profile) => {
                    let name = profile.full_name();
                    self.wire.emit(Reply::Model(Some(name)))?;
                }
                Err(Error::ChipNotDetected) => self.send_listing()?,
                Err(e) => self.wire.emit(Reply::Failed(e.cause()))?,
            },
            Request::List => self.send_listing()?,
            Request::Exit => {
                log::info!("session: exit requested");
                self.engine.teardown();
                return Ok(Poll::Exit);
            }
            Request::Data(unit) => {
                log::debug!("session: dropping {} stray data bytes", unit.len());
            }
            Request::Cancel | Request::Pause | Request::ResumeOp => {
                let command = request.code();
                log::warn!("session: {:#04x} with no operation running", command);
                self.wire.emit(Reply::Rejected {
                    command,
                    cause: FailureCause::InvalidRequest,
                })?;
            }
        }
        Ok(Poll::Handled)
    }

    fn send_listing(&mut self) -> Result<()> {
        self.wire.emit(Reply::SelectStart)?;
        for (i, profile) in self.engine.registry.iter().enumerate() {
            self.wire.emit(Reply::SelectEntry {
                index: (i + 1) as u16,
                name: profile.full_name(),
            })?;
        }
        self.wire.emit(Reply::SelectEnd)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::{Checkpoint, MemoryCheckpointStore};
    use crate::protocol::codes::*;
    use crate::protocol::{OperationKind, OperationOptions};
    use crate::stream::StreamCodec;
    use crate::testing::{small_profile, MemBus, ScriptSensor};
    use alloc::string::String;
    use alloc::vec;
    use core::convert::Infallible;

    #[derive(Default)]
    struct PipeLink {
        rx: VecDeque<u8>,
        tx: Vec<u8>,
        closed: bool,
    }

    impl embedded_io::ErrorType for PipeLink {
        type Error = Infallible;
    }

    impl Read for PipeLink {
        fn read(&mut self, buf: &mut [u8]) -> core::result::Result<usize, Infallible> {
            let n = buf.len().min(self.rx.len());
            for b in &mut buf[..n] {
                *b = self.rx.pop_front().unwrap_or(0);
            }
            Ok(n)
        }
    }

    impl ReadReady for PipeLink {
        fn read_ready(&mut self) -> core::result::Result<bool, Infallible> {
            Ok(!self.rx.is_empty() || self.closed)
        }
    }

    impl Write for PipeLink {
        fn write(&mut self, buf: &[u8]) -> core::result::Result<usize, Infallible> {
            self.tx.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> core::result::Result<(), Infallible> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct TestClock {
        us: u64,
    }

    impl Clock for TestClock {
        fn now_ms(&self) -> u64 {
            self.us / 1000
        }

        fn delay_us(&mut self, us: u32) {
            self.us += us as u64;
        }
    }

    type TestSession = Session<PipeLink, TestClock, MemBus, MemoryCheckpointStore, ScriptSensor>;

    fn session(mode: ProtocolMode) -> TestSession {
        let config = SessionConfig {
            mode,
            inactivity_ms: 50,
            ..SessionConfig::default()
        };
        let mut registry = ChipRegistry::from_profiles(vec![small_profile()]);
        registry.extend(ChipRegistry::builtin().iter().take(2).cloned());
        let engine = Engine::new(
            MemBus::new(small_profile()),
            registry,
            MemoryCheckpointStore::new(),
            ScriptSensor::steady(5000),
            config,
        );
        Session::new(PipeLink::default(), TestClock::default(), engine)
    }

    fn send(s: &mut TestSession, request: Request) {
        let bytes = request.to_frame().encode();
        s.wire_mut().link_mut().rx.extend(bytes);
    }

    fn replies(s: &mut TestSession) -> Vec<Reply> {
        let tx = core::mem::take(&mut s.wire_mut().link_mut().tx);
        let mut decoder = FrameDecoder::new();
        decoder.push(&tx);
        let mut out = Vec::new();
        while let Ok(Some(frame)) = decoder.decode() {
            out.push(Reply::from_frame(frame).unwrap());
        }
        out
    }

    fn pump_all(s: &mut TestSession) {
        while s.poll().unwrap() != Poll::Idle {}
    }

    fn op(kind: OperationKind, start: u32, count: u32) -> OperationRequest {
        OperationRequest {
            kind,
            start_block: start,
            block_count: count,
            options: OperationOptions::default(),
            resume: false,
        }
    }

    #[test]
    fn test_status_without_chip() {
        let mut s = session(ProtocolMode::Negotiate);
        send(&mut s, Request::Status);
        pump_all(&mut s);
        assert_eq!(s.wire_mut().mode(), ProtocolMode::Framed);
        assert_eq!(replies(&mut s), vec![Reply::Failed(FailureCause::NoChip)]);
    }

    #[test]
    fn test_redetect_and_status() {
        let mut s = session(ProtocolMode::Framed);
        send(&mut s, Request::Redetect);
        send(&mut s, Request::Status);
        pump_all(&mut s);
        let name = Some(String::from("Test T8"));
        assert_eq!(replies(&mut s), vec![Reply::Model(name.clone()), Reply::Model(name)]);
    }

    #[test]
    fn test_unknown_id_sends_listing() {
        let mut s = session(ProtocolMode::Framed);
        s.engine_mut().bus_mut().bus_mut().id = vec![0x01, 0x02, 0x03, 0x04, 0x05];
        send(&mut s, Request::Redetect);
        pump_all(&mut s);
        let got = replies(&mut s);
        assert_eq!(got.first(), Some(&Reply::SelectStart));
        assert_eq!(got.last(), Some(&Reply::SelectEnd));
        assert_eq!(
            got[1],
            Reply::SelectEntry {
                index: 1,
                name: String::from("Test T8")
            }
        );
        assert_eq!(got.len(), 5);

        send(&mut s, Request::Select(1));
        pump_all(&mut s);
        assert_eq!(replies(&mut s), vec![Reply::Model(Some(String::from("Test T8")))]);
        assert!(s.engine().profile().is_some());
    }

    #[test]
    fn test_corrupt_frame_is_skipped() {
        let mut s = session(ProtocolMode::Framed);
        let mut bad = Request::PowerCheck.to_frame().encode();
        let last = bad.len() - 1;
        bad[last] ^= 0xFF;
        s.wire_mut().link_mut().rx.extend(bad);
        send(&mut s, Request::PowerCheck);
        pump_all(&mut s);
        assert_eq!(replies(&mut s), vec![Reply::Power(5000)]);
    }

    #[test]
    fn test_unknown_command_rejected() {
        let mut s = session(ProtocolMode::Framed);
        let frame = crate::protocol::encode_frame(0x7E, &[]);
        s.wire_mut().link_mut().rx.extend(frame);
        pump_all(&mut s);
        assert_eq!(
            replies(&mut s),
            vec![Reply::Rejected {
                command: 0x7E,
                cause: FailureCause::InvalidRequest
            }]
        );
    }

    #[test]
    fn test_control_while_idle_rejected() {
        let mut s = session(ProtocolMode::Framed);
        send(&mut s, Request::Cancel);
        pump_all(&mut s);
        assert_eq!(
            replies(&mut s),
            vec![Reply::Rejected {
                command: CMD_CANCEL,
                cause: FailureCause::InvalidRequest
            }]
        );
    }

    #[test]
    fn test_legacy_session() {
        let mut s = session(ProtocolMode::Negotiate);
        s.engine_mut().set_profile(small_profile());
        s.wire_mut().link_mut().rx.extend(b"STATUS\nPOWER_CHECK\nERASE:0:1:4\n".iter());
        pump_all(&mut s);
        assert_eq!(s.wire_mut().mode(), ProtocolMode::Legacy);
        let tx = core::mem::take(&mut s.wire_mut().link_mut().tx);
        let text = String::from_utf8(tx).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "MODEL:Test T8");
        assert_eq!(lines[1], "POWER:5000mV");
        assert_eq!(lines[2], "PROGRESS:100:1:1");
        assert!(lines[3].starts_with("OPERATION_COMPLETE:"));
    }

    #[test]
    fn test_read_operation_over_frames() {
        let mut s = session(ProtocolMode::Framed);
        s.engine_mut().set_profile(small_profile());
        send(&mut s, Request::Operation(op(OperationKind::Read, 0, 1)));
        pump_all(&mut s);
        let got = replies(&mut s);
        assert_eq!(got.iter().filter(|r| matches!(r, Reply::Data(_))).count(), 4);
        assert!(matches!(got.last(), Some(Reply::Complete { .. })));
        assert_eq!(
            s.engine().last_operation().map(|st| st.status),
            Some(crate::sequencer::OpStatus::Completed)
        );
    }

    #[test]
    fn test_write_over_frames() {
        let mut s = session(ProtocolMode::Framed);
        s.engine_mut().set_profile(small_profile());
        let codec = StreamCodec::default();
        send(&mut s, Request::Operation(op(OperationKind::Write, 3, 1)));
        for page in 0..4u8 {
            send(&mut s, Request::Data(codec.encode(&[page; 80])));
        }
        pump_all(&mut s);
        let got = replies(&mut s);
        assert_eq!(got[0], Reply::ReadyForData { first_block: 3 });
        assert!(matches!(got.last(), Some(Reply::Complete { .. })));
        assert_eq!(s.engine().bus().bus().pages[13], vec![1u8; 80]);
    }

    #[test]
    fn test_silent_host_fails_write() {
        let mut s = session(ProtocolMode::Framed);
        s.engine_mut().set_profile(small_profile());
        send(&mut s, Request::Operation(op(OperationKind::Write, 0, 1)));
        pump_all(&mut s);
        let got = replies(&mut s);
        assert_eq!(got.last(), Some(&Reply::Failed(FailureCause::Link)));
    }

    #[test]
    fn test_status_offers_resume() {
        let mut s = session(ProtocolMode::Framed);
        s.engine_mut().set_profile(small_profile());
        let cp = Checkpoint {
            kind: OperationKind::Erase,
            block: 2,
            page: 11,
            chunk_hash: 0x1234,
            token: 7,
        };
        s.engine_mut().store_mut().save(&cp).unwrap();
        send(&mut s, Request::Status);
        pump_all(&mut s);
        let got = replies(&mut s);
        assert_eq!(got[1], Reply::ResumeOffer(cp.offer()));

        send(&mut s, Request::ClearResume);
        send(&mut s, Request::Status);
        pump_all(&mut s);
        assert_eq!(replies(&mut s).len(), 2);
    }

    #[test]
    fn test_set_resume_acknowledged() {
        let mut s = session(ProtocolMode::Framed);
        send(&mut s, Request::SetResume(5));
        pump_all(&mut s);
        assert_eq!(replies(&mut s), vec![Reply::Ack(CMD_SET_RESUME)]);
        assert_eq!(s.engine().resume_override, Some(5));
    }

    #[test]
    fn test_exit_and_disconnect_end_run() {
        let mut s = session(ProtocolMode::Framed);
        send(&mut s, Request::Exit);
        assert_eq!(s.run(), Ok(()));

        let mut s = session(ProtocolMode::Framed);
        s.wire_mut().link_mut().closed = true;
        assert_eq!(s.run(), Ok(()));
        assert!(s.wire_mut().is_closed());
    }
}
