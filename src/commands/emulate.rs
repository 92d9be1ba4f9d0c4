//! Emulated programmer served over TCP
//!
//! The die outlives connections, so a host can write in one run and read
//! back in the next. Checkpoints go to a file when one is given.

use std::io::{self, Read as _, Write as _};
use std::net::{TcpListener, TcpStream};
use std::path::Path;

use nandprog_core::checkpoint::{CheckpointStore, FileCheckpointStore, MemoryCheckpointStore};
use nandprog_core::chip::ChipRegistry;
use nandprog_core::session::{Session, SessionConfig};
use nandprog_dummy::{DummyBench, DummyConfig, ScriptedSensor, StdClock};

use super::CmdResult;

/// Serve emulated sessions on `listen`
pub fn run_emulate(
    registry: &ChipRegistry,
    listen: &str,
    chip: Option<&str>,
    checkpoint: Option<&Path>,
    millivolts: u32,
    once: bool,
) -> CmdResult {
    let mut config = DummyConfig::small();
    if let Some(name) = chip {
        config.profile = registry.select(name)?.clone();
    }
    let bench = DummyBench::new(config);

    let listener = TcpListener::bind(listen)?;
    println!(
        "Emulating {} on {}",
        bench.die().profile().full_name(),
        listener.local_addr()?
    );
    match checkpoint {
        Some(path) => serve(&bench, &listener, FileCheckpointStore::new(path), millivolts, once.then_some(1)),
        None => serve(&bench, &listener, MemoryCheckpointStore::new(), millivolts, once.then_some(1)),
    }
}

/// Accept hosts one at a time, handing the same engine to each session
fn serve<S: CheckpointStore>(
    bench: &DummyBench,
    listener: &TcpListener,
    store: S,
    millivolts: u32,
    max_hosts: Option<usize>,
) -> CmdResult {
    let mut engine = bench.device(store, ScriptedSensor::steady(millivolts), SessionConfig::default());
    for stream in listener.incoming().take(max_hosts.unwrap_or(usize::MAX)) {
        let stream = stream?;
        let peer = stream.peer_addr()?;
        stream.set_nodelay(true)?;
        log::info!("Host connected from {}", peer);

        let mut session = Session::new(TcpLink::new(stream), StdClock::new(), engine);
        if let Err(e) = session.run() {
            log::warn!("Session with {} ended: {}", peer, e);
        }
        let (_, back) = session.into_parts();
        engine = back;
        log::info!("Host {} gone", peer);
    }
    Ok(())
}

/// Byte link over a TCP connection
pub struct TcpLink {
    stream: TcpStream,
}

impl TcpLink {
    pub fn new(stream: TcpStream) -> Self {
        Self { stream }
    }
}

/// I/O failure on a [`TcpLink`]
#[derive(Debug)]
pub struct TcpLinkError(io::Error);

impl embedded_io::Error for TcpLinkError {
    fn kind(&self) -> embedded_io::ErrorKind {
        match self.0.kind() {
            io::ErrorKind::BrokenPipe => embedded_io::ErrorKind::BrokenPipe,
            io::ErrorKind::ConnectionReset => embedded_io::ErrorKind::ConnectionReset,
            io::ErrorKind::ConnectionAborted => embedded_io::ErrorKind::ConnectionAborted,
            io::ErrorKind::TimedOut => embedded_io::ErrorKind::TimedOut,
            _ => embedded_io::ErrorKind::Other,
        }
    }
}

impl embedded_io::ErrorType for TcpLink {
    type Error = TcpLinkError;
}

impl embedded_io::ReadReady for TcpLink {
    fn read_ready(&mut self) -> Result<bool, TcpLinkError> {
        let mut probe = [0u8; 1];
        self.stream.set_nonblocking(true).map_err(TcpLinkError)?;
        let peeked = self.stream.peek(&mut probe);
        self.stream.set_nonblocking(false).map_err(TcpLinkError)?;
        match peeked {
            // 0 is end of file, which the next read reports
            Ok(_) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(false),
            Err(e) => Err(TcpLinkError(e)),
        }
    }
}

impl embedded_io::Read for TcpLink {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TcpLinkError> {
        self.stream.read(buf).map_err(TcpLinkError)
    }
}

impl embedded_io::Write for TcpLink {
    fn write(&mut self, buf: &[u8]) -> Result<usize, TcpLinkError> {
        self.stream.write(buf).map_err(TcpLinkError)
    }

    fn flush(&mut self) -> Result<(), TcpLinkError> {
        self.stream.flush().map_err(TcpLinkError)
    }
}
