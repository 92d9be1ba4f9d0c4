//! End-to-end runs of the device engine against the emulated die

use std::collections::VecDeque;

use embedded_io::Write as _;
use nandprog_core::bus::{AutotuneConfig, NandBus, TimingParams};
use nandprog_core::checkpoint::{CheckpointStore, MemoryCheckpointStore};
use nandprog_core::error::{Error, FailureCause, Result};
use nandprog_core::integrity::{HashKind, IntegrityTracker};
use nandprog_core::protocol::{
    FrameDecoder, OperationKind, OperationOptions, OperationRequest, Reply, Request,
};
use nandprog_core::sequencer::{HostChannel, OpStatus};
use nandprog_core::session::{Engine, Poll, SessionConfig};
use nandprog_core::stream::{CodecOptions, StreamCodec};
use nandprog_dummy::{DummyBench, DummyBus, DummyConfig, MemoryLink, ScriptedSensor};

type Device = Engine<DummyBus, MemoryCheckpointStore, ScriptedSensor>;

/// Host that hands out requests once enough progress has been reported
struct ScriptedHost {
    inbox: VecDeque<(usize, Request)>,
    sent: Vec<Reply>,
}

impl ScriptedHost {
    fn new() -> Self {
        Self {
            inbox: VecDeque::new(),
            sent: Vec::new(),
        }
    }

    fn push(&mut self, after_progress: usize, request: Request) {
        self.inbox.push_back((after_progress, request));
    }

    fn feed(&mut self, units: impl IntoIterator<Item = Vec<u8>>) {
        for unit in units {
            self.push(0, Request::Data(unit));
        }
    }

    fn progress_count(&self) -> usize {
        self.sent.iter().filter(|r| matches!(r, Reply::Progress(_))).count()
    }

    fn data(&self) -> Vec<Vec<u8>> {
        self.sent
            .iter()
            .filter_map(|r| match r {
                Reply::Data(unit) => Some(unit.clone()),
                _ => None,
            })
            .collect()
    }

    fn page_crcs(&self) -> Vec<u32> {
        self.sent
            .iter()
            .filter_map(|r| match r {
                Reply::PageCrc { crc, .. } => Some(*crc),
                _ => None,
            })
            .collect()
    }

    fn last(&self) -> Option<&Reply> {
        self.sent.last()
    }
}

impl HostChannel for ScriptedHost {
    fn emit(&mut self, reply: Reply) -> Result<()> {
        self.sent.push(reply);
        Ok(())
    }

    fn try_recv(&mut self) -> Result<Option<Request>> {
        let released = matches!(self.inbox.front(), Some((after, _)) if *after <= self.progress_count());
        Ok(if released { self.inbox.pop_front().map(|(_, r)| r) } else { None })
    }

    fn recv_until(&mut self, _since_ms: u64, _deadline_ms: u64) -> Result<Option<Request>> {
        match self.inbox.pop_front() {
            Some((_, request)) => Ok(Some(request)),
            None => Err(Error::Link),
        }
    }

    fn now_ms(&self) -> u64 {
        self.sent.len() as u64
    }
}

fn config() -> SessionConfig {
    SessionConfig {
        power_period_ms: 0,
        ..SessionConfig::default()
    }
}

fn device(bench: &DummyBench, sensor: ScriptedSensor, config: SessionConfig) -> Device {
    let mut device = bench.device(MemoryCheckpointStore::new(), sensor, config);
    device.detect().unwrap();
    device
}

fn request(kind: OperationKind, start_block: u32, block_count: u32) -> OperationRequest {
    OperationRequest {
        kind,
        start_block,
        block_count,
        options: OperationOptions::default(),
        resume: false,
    }
}

fn pattern(page: u32, len: usize) -> Vec<u8> {
    (0..len).map(|i| ((page as usize * 31 + i) % 251) as u8).collect()
}

fn codec() -> StreamCodec {
    StreamCodec::new(CodecOptions::default())
}

/// Encoded units for every page of `blocks`
fn units_for(bench: &DummyBench, blocks: std::ops::Range<u32>) -> Vec<Vec<u8>> {
    let profile = bench.die().profile().clone();
    let len = profile.page_total_size() as usize;
    let first = profile.block_first_page(blocks.start);
    let last = profile.block_first_page(blocks.end);
    (first..last).map(|page| codec().encode(&pattern(page, len))).collect()
}

fn write_blocks(bench: &DummyBench, device: &mut Device, blocks: std::ops::Range<u32>) -> ScriptedHost {
    let mut host = ScriptedHost::new();
    host.feed(units_for(bench, blocks.clone()));
    device.run_operation(request(OperationKind::Write, blocks.start, blocks.end - blocks.start), &mut host);
    host
}

#[test]
fn test_erase_then_read_back_blank() {
    let bench = DummyBench::new(DummyConfig::small());
    let len = bench.die().profile().page_total_size() as usize;
    for page in 0..32 {
        bench.die_mut().load_page(page, &pattern(page, len));
    }

    let mut device = device(&bench, ScriptedSensor::steady(5000), config());
    let mut host = ScriptedHost::new();
    device.run_operation(request(OperationKind::Erase, 2, 4), &mut host);
    assert!(matches!(host.last(), Some(Reply::Complete { .. })));
    assert_eq!(bench.die().erases(), 4);
    let progress: Vec<_> = host
        .sent
        .iter()
        .filter_map(|r| match r {
            Reply::Progress(p) => Some(p.completed),
            _ => None,
        })
        .collect();
    assert_eq!(progress, vec![1, 2, 3, 4]);

    let mut host = ScriptedHost::new();
    device.run_operation(request(OperationKind::Read, 2, 4), &mut host);
    assert!(matches!(host.last(), Some(Reply::Complete { .. })));
    let units = host.data();
    assert_eq!(units.len(), 16);
    let blank = codec().encode(&vec![0xFF; len]);
    assert!(units.iter().all(|u| *u == blank));
    assert_eq!(blank.len(), 5);

    // blocks outside the erased range keep their data
    assert_eq!(bench.die().page(0), pattern(0, len));
}

#[test]
fn test_write_pattern_then_read_back() {
    let run = || {
        let bench = DummyBench::new(DummyConfig::small());
        let len = bench.die().profile().page_total_size() as usize;
        let mut pages = vec![vec![0xAA; len], vec![0x55; len]];
        pages.resize(4, vec![0xFF; len]);

        let mut device = device(&bench, ScriptedSensor::steady(5000), config());
        let mut host = ScriptedHost::new();
        host.feed(pages.iter().map(|p| codec().encode(p)));
        device.run_operation(request(OperationKind::Write, 0, 1), &mut host);
        assert!(matches!(host.sent[0], Reply::ReadyForData { first_block: 0 }));
        let write_digest = match host.last() {
            Some(Reply::Complete { digest }) => *digest,
            other => panic!("unexpected {:?}", other),
        };

        let mut host = ScriptedHost::new();
        device.run_operation(request(OperationKind::Read, 0, 1), &mut host);
        let read: Vec<_> = host.data().iter().map(|u| codec().decode(u).unwrap()).collect();
        assert_eq!(read, pages);
        let read_digest = match host.last() {
            Some(Reply::Complete { digest }) => *digest,
            other => panic!("unexpected {:?}", other),
        };
        assert_eq!(write_digest, read_digest);
        host.page_crcs()
    };

    let first = run();
    let second = run();
    assert_eq!(first, second);

    let tracker = IntegrityTracker::new(HashKind::Crc32);
    assert_eq!(first[0], tracker.peek(&vec![0xAA; 80]));
    assert_eq!(first[1], tracker.peek(&vec![0x55; 80]));
}

#[test]
fn test_sustained_low_voltage_fails_write() {
    let bench = DummyBench::new(DummyConfig::small());
    let sensor = ScriptedSensor::with_samples(5000, [Some(3000), Some(3100), Some(2900)]);
    let mut device = device(&bench, sensor, config());

    let host = write_blocks(&bench, &mut device, 0..2);
    assert_eq!(host.last(), Some(&Reply::Failed(FailureCause::PowerLow)));
    assert_eq!(
        device.last_operation().map(|s| s.status),
        Some(OpStatus::Failed(FailureCause::PowerLow))
    );
    let warnings = host.sent.iter().filter(|r| matches!(r, Reply::PowerWarning(_))).count();
    assert_eq!(warnings, 3);
    assert!(bench.die().programs() < 8);
}

#[test]
fn test_transient_low_voltage_is_tolerated() {
    let bench = DummyBench::new(DummyConfig::small());
    let sensor = ScriptedSensor::with_samples(5000, [Some(5000), Some(3000), Some(5000)]);
    let mut device = device(&bench, sensor, config());

    let host = write_blocks(&bench, &mut device, 0..2);
    assert!(matches!(host.last(), Some(Reply::Complete { .. })));
    assert!(host.sent.contains(&Reply::PowerWarning(3000)));
    assert_eq!(bench.die().programs(), 8);
}

#[test]
fn test_resumed_write_matches_uninterrupted_write() {
    let reference = {
        let bench = DummyBench::new(DummyConfig::small());
        let mut device = device(&bench, ScriptedSensor::steady(5000), config());
        write_blocks(&bench, &mut device, 0..4);
        let image = bench.die().image();
        image
    };
    assert_eq!(reference.len(), 16);

    for k in 0..4u32 {
        let bench = DummyBench::new(DummyConfig::small());
        let mut device = device(&bench, ScriptedSensor::steady(5000), config());

        let mut host = ScriptedHost::new();
        host.feed(units_for(&bench, 0..4));
        host.push(k as usize * 4, Request::Cancel);
        let mut op = request(OperationKind::Write, 0, 4);
        device.run_operation(op, &mut host);
        assert_eq!(host.last(), Some(&Reply::Cancelled), "k = {}", k);

        op.resume = true;
        let mut host = ScriptedHost::new();
        host.feed(units_for(&bench, k..4));
        device.run_operation(op, &mut host);
        assert_eq!(host.sent[0], Reply::ReadyForData { first_block: k }, "k = {}", k);
        assert!(matches!(host.last(), Some(Reply::Complete { .. })), "k = {}", k);
        assert_eq!(bench.die().image(), reference, "k = {}", k);
        assert_eq!(device.store_mut().load().unwrap(), None);
    }
}

#[test]
fn test_torn_last_chunk_forces_restart() {
    let bench = DummyBench::new(DummyConfig::small());
    let mut device = device(&bench, ScriptedSensor::steady(5000), config());

    let mut host = ScriptedHost::new();
    host.feed(units_for(&bench, 0..4));
    host.push(8, Request::Cancel);
    let mut op = request(OperationKind::Write, 0, 4);
    device.run_operation(op, &mut host);
    let cp = device.store_mut().load().unwrap().unwrap();
    assert_eq!(cp.block, 1);
    assert_eq!(cp.page, 7);

    bench.die_mut().tear_page(cp.page);

    op.resume = true;
    let mut host = ScriptedHost::new();
    host.push(0, Request::Cancel);
    device.run_operation(op, &mut host);
    assert_eq!(host.sent[0], Reply::ReadyForData { first_block: 0 });
    assert_eq!(host.last(), Some(&Reply::Cancelled));
    assert_eq!(device.store_mut().load().unwrap(), None);
}

#[test]
fn test_cancel_stops_at_page_boundary() {
    let bench = DummyBench::new(DummyConfig::small());
    let mut device = device(&bench, ScriptedSensor::steady(5000), config());

    let mut host = ScriptedHost::new();
    host.push(6, Request::Cancel);
    device.run_operation(request(OperationKind::Read, 0, 4), &mut host);
    assert_eq!(host.last(), Some(&Reply::Cancelled));
    assert_eq!(host.data().len(), 6);
    assert_eq!(host.progress_count(), 6);

    let state = device.last_operation().unwrap();
    assert_eq!(state.status, OpStatus::Cancelled);
    assert_eq!(state.block, 1);
    assert_eq!(state.page, 1);

    // the fully read block is the resume point
    let cp = device.store_mut().load().unwrap().unwrap();
    assert_eq!(cp.block, 0);
    assert_eq!(cp.next_block(), 1);
}

#[test]
fn test_strategies_produce_identical_images() {
    let run = |accelerated: bool| {
        let bench = DummyBench::new(DummyConfig::small());
        let bus = if accelerated { bench.bus() } else { bench.direct_bus() };
        assert_eq!(bus.is_accelerated(), accelerated);
        let mut device = Engine::new(
            bus,
            bench.registry(),
            MemoryCheckpointStore::new(),
            ScriptedSensor::steady(5000),
            config(),
        );
        device.detect().unwrap();

        let host = write_blocks(&bench, &mut device, 0..2);
        let write_digest = host.last().cloned();
        let mut host = ScriptedHost::new();
        device.run_operation(request(OperationKind::Read, 0, 2), &mut host);
        let result = (bench.die().image(), write_digest, host.last().cloned(), host.page_crcs());
        result
    };

    let fast = run(true);
    let slow = run(false);
    assert_eq!(fast.0.len(), 8);
    assert_eq!(fast, slow);
    assert_eq!(fast.1, fast.2);
}

#[test]
fn test_autotune_keeps_last_passing_trial() {
    for accelerated in [true, false] {
        let bench = DummyBench::new(DummyConfig::small());
        bench.die_mut().faults.min_trea_ns = 12;
        let bus = if accelerated { bench.bus() } else { bench.direct_bus() };
        let config = SessionConfig {
            autotune: Some(AutotuneConfig::default()),
            ..config()
        };
        let mut device = Engine::new(
            bus,
            bench.registry(),
            MemoryCheckpointStore::new(),
            ScriptedSensor::steady(5000),
            config,
        );
        device.detect().unwrap();

        let expected = TimingParams::SAFE.faster(5).unwrap();
        assert_eq!(device.bus().bus().timing(), expected);
        assert_eq!(expected.read_strobe_ns(), 15);

        // the tuned bus still moves data intact
        let host = write_blocks(&bench, &mut device, 0..1);
        assert!(matches!(host.last(), Some(Reply::Complete { .. })));
    }
}

#[test]
fn test_falls_back_to_direct_strategy() {
    let mut config = DummyConfig::small();
    config.faults.engine_unavailable = true;
    let bench = DummyBench::new(config);
    let bus = bench.bus();
    assert!(!bus.is_accelerated());

    let mut device = Engine::new(
        bus,
        bench.registry(),
        MemoryCheckpointStore::new(),
        ScriptedSensor::steady(5000),
        self::config(),
    );
    assert_eq!(device.detect().unwrap().name, "NAND64");
    let host = write_blocks(&bench, &mut device, 3..4);
    assert!(matches!(host.last(), Some(Reply::Complete { .. })));
    assert_eq!(bench.die().programs(), 4);
}

#[test]
fn test_program_failure_reports_cause() {
    let bench = DummyBench::new(DummyConfig::small());
    bench.die_mut().faults.program_fail.insert(5);
    let mut device = device(&bench, ScriptedSensor::steady(5000), config());

    let host = write_blocks(&bench, &mut device, 0..2);
    assert_eq!(host.last(), Some(&Reply::Failed(FailureCause::ProgramFailed)));
    assert_eq!(host.progress_count(), 5);
    let cp = device.store_mut().load().unwrap().unwrap();
    assert_eq!(cp.block, 0);
}

fn replies(bytes: &[u8]) -> Vec<Reply> {
    let mut decoder = FrameDecoder::new();
    decoder.push(bytes);
    let mut out = Vec::new();
    while let Ok(Some(frame)) = decoder.decode() {
        out.push(Reply::from_frame(frame).unwrap());
    }
    out
}

fn send(link: &mut MemoryLink, request: Request) {
    link.write_all(&request.to_frame().encode()).unwrap();
}

#[test]
fn test_framed_session_end_to_end() {
    let bench = DummyBench::new(DummyConfig::small());
    let (mut host, device_end) = MemoryLink::pair();
    let mut session = bench.session(device_end, MemoryCheckpointStore::new(), ScriptedSensor::steady(5000), config());

    send(&mut host, Request::Redetect);
    assert_eq!(session.poll().unwrap(), Poll::Handled);
    send(&mut host, Request::Operation(request(OperationKind::Erase, 0, 1)));
    assert_eq!(session.poll().unwrap(), Poll::Handled);
    send(&mut host, Request::Operation(request(OperationKind::Write, 0, 1)));
    for unit in units_for(&bench, 0..1) {
        send(&mut host, Request::Data(unit));
    }
    assert_eq!(session.poll().unwrap(), Poll::Handled);
    send(&mut host, Request::Operation(request(OperationKind::Read, 0, 1)));
    assert_eq!(session.poll().unwrap(), Poll::Handled);
    assert_eq!(session.poll().unwrap(), Poll::Idle);
    send(&mut host, Request::Exit);
    assert_eq!(session.poll().unwrap(), Poll::Exit);

    let got = replies(&host.drain());
    assert_eq!(got[0], Reply::Model(Some("Dummy NAND64".into())));
    let completes = got.iter().filter(|r| matches!(r, Reply::Complete { .. })).count();
    assert_eq!(completes, 3);
    assert!(!got.iter().any(|r| matches!(r, Reply::Failed(_) | Reply::Rejected { .. })));

    let units: Vec<_> = got
        .iter()
        .filter_map(|r| match r {
            Reply::Data(unit) => Some(codec().decode(unit).unwrap()),
            _ => None,
        })
        .collect();
    let len = bench.die().profile().page_total_size() as usize;
    let expected: Vec<_> = (0..4).map(|p| pattern(p, len)).collect();
    assert_eq!(units, expected);
}
