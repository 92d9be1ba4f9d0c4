//! Test doubles shared by the sequencer and session tests

use alloc::collections::VecDeque;
use alloc::vec;
use alloc::vec::Vec;

use crate::bus::{Latch, NandBus, TimingParams};
use crate::chip::{ChipProfile, ERASED};
use crate::error::{Error, Result};
use crate::nand::{self, Status};
use crate::power::VoltageSensor;
use crate::protocol::{Reply, Request};
use crate::sequencer::HostChannel;

/// 8 blocks of 4 pages, 64 + 16 bytes each
pub(crate) fn small_profile() -> ChipProfile {
    ChipProfile::new("Test", "T8", &[0xEC, 0x70], 64, 4, 8)
}

/// Array model behind the [`NandBus`] cycle interface
pub(crate) struct MemBus {
    pub profile: ChipProfile,
    pub pages: Vec<Vec<u8>>,
    pub id: Vec<u8>,
    pub fail_program: bool,
    pub busy_polls: u32,
    pub flip_reads: u32,
    pub programs: u32,
    cmd: u8,
    addr: Vec<u8>,
    buf: Vec<u8>,
    out: VecDeque<u8>,
    status: Status,
    timing: TimingParams,
}

impl MemBus {
    pub fn new(profile: ChipProfile) -> Self {
        let pages = vec![vec![ERASED; profile.page_total_size() as usize]; profile.total_pages() as usize];
        let mut id = profile.id.clone();
        id.resize(5, 0);
        Self {
            profile,
            pages,
            id,
            fail_program: false,
            busy_polls: 0,
            flip_reads: 0,
            programs: 0,
            cmd: 0,
            addr: Vec::new(),
            buf: Vec::new(),
            out: VecDeque::new(),
            status: Status::READY | Status::ARRAY_READY | Status::WRITE_ENABLED,
            timing: TimingParams::SAFE,
        }
    }

    fn row(bytes: &[u8]) -> usize {
        bytes.iter().rev().fold(0usize, |acc, &b| (acc << 8) | b as usize)
    }

    fn command(&mut self, op: u8) {
        match op {
            nand::READ_1ST | nand::PROGRAM_1ST | nand::ERASE_1ST => {
                self.cmd = op;
                self.addr.clear();
                self.buf.clear();
            }
            nand::READ_2ND => {
                let page = Self::row(&self.addr[2..]);
                let mut data = self.pages[page].clone();
                if self.flip_reads > 0 {
                    self.flip_reads -= 1;
                    data[0] ^= 0x01;
                }
                self.out = data.into();
            }
            nand::PROGRAM_2ND => {
                self.programs += 1;
                if self.fail_program {
                    self.status |= Status::FAIL;
                    return;
                }
                self.status.remove(Status::FAIL);
                let page = Self::row(&self.addr[2..]);
                for (cell, &b) in self.pages[page].iter_mut().zip(&self.buf) {
                    *cell &= b;
                }
            }
            nand::ERASE_2ND => {
                self.status.remove(Status::FAIL);
                let first = Self::row(&self.addr);
                let ppb = self.profile.pages_per_block as usize;
                for page in &mut self.pages[first..first + ppb] {
                    page.fill(ERASED);
                }
            }
            nand::READ_STATUS => self.out = [self.status.bits()].into_iter().collect(),
            nand::READ_ID => self.out = self.id.iter().copied().collect(),
            _ => self.out.clear(),
        }
    }
}

impl NandBus for MemBus {
    fn name(&self) -> &'static str {
        "mem"
    }

    fn select(&mut self, _active: bool) {}

    fn write(&mut self, latch: Latch, bytes: &[u8]) -> Result<()> {
        match latch {
            Latch::Command => bytes.iter().for_each(|&op| self.command(op)),
            Latch::Address => self.addr.extend_from_slice(bytes),
            Latch::Data => self.buf.extend_from_slice(bytes),
        }
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<()> {
        for b in buf {
            *b = self.out.pop_front().unwrap_or(ERASED);
        }
        Ok(())
    }

    fn is_ready(&mut self) -> bool {
        if self.busy_polls > 0 {
            self.busy_polls -= 1;
            return false;
        }
        true
    }

    fn delay_us(&mut self, _us: u32) {}

    fn timing(&self) -> TimingParams {
        self.timing
    }

    fn set_timing(&mut self, timing: TimingParams) -> Result<()> {
        self.timing = timing;
        Ok(())
    }
}

/// Host side of a sequencer run
///
/// Each queued request is released once `after` progress replies have
/// been emitted, or immediately when the sequencer blocks for input.
/// The first `stalls` blocking waits run to their deadline instead.
#[derive(Default)]
pub(crate) struct ScriptHost {
    pub inbox: VecDeque<(usize, Request)>,
    pub sent: Vec<Reply>,
    pub now: u64,
    pub tick_ms: u64,
    pub stalls: u32,
}

impl ScriptHost {
    pub fn push(&mut self, after: usize, request: Request) {
        self.inbox.push_back((after, request));
    }

    pub fn progress_count(&self) -> usize {
        self.sent.iter().filter(|r| matches!(r, Reply::Progress(_))).count()
    }

    pub fn data(&self) -> Vec<Vec<u8>> {
        self.sent
            .iter()
            .filter_map(|r| match r {
                Reply::Data(unit) => Some(unit.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn last(&self) -> Option<&Reply> {
        self.sent.last()
    }
}

impl HostChannel for ScriptHost {
    fn emit(&mut self, reply: Reply) -> Result<()> {
        self.sent.push(reply);
        Ok(())
    }

    fn try_recv(&mut self) -> Result<Option<Request>> {
        self.now += self.tick_ms;
        let due = matches!(self.inbox.front(), Some(&(after, _)) if after <= self.progress_count());
        Ok(if due { self.inbox.pop_front().map(|(_, r)| r) } else { None })
    }

    fn recv_until(&mut self, _since_ms: u64, deadline_ms: u64) -> Result<Option<Request>> {
        self.now += self.tick_ms;
        if self.stalls > 0 {
            self.stalls -= 1;
            self.now = self.now.max(deadline_ms);
            return Ok(None);
        }
        match self.inbox.pop_front() {
            Some((_, request)) => Ok(Some(request)),
            None => Err(Error::Link),
        }
    }

    fn now_ms(&self) -> u64 {
        self.now
    }
}

/// Voltage samples from a script, then a steady value
pub(crate) struct ScriptSensor {
    pub samples: VecDeque<Option<u32>>,
    pub steady: u32,
}

impl ScriptSensor {
    pub fn steady(mv: u32) -> Self {
        Self {
            samples: VecDeque::new(),
            steady: mv,
        }
    }
}

impl VoltageSensor for ScriptSensor {
    fn read_millivolts(&mut self) -> Option<u32> {
        self.samples.pop_front().unwrap_or(Some(self.steady))
    }
}
