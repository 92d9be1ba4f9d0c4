//! Cycle-level model of one 8-bit asynchronous NAND die

use alloc::collections::{BTreeMap, BTreeSet};
use alloc::vec;
use alloc::vec::Vec;

use nandprog_core::chip::{ChipProfile, ERASED};
use nandprog_core::nand::{self, Status};

/// Array busy times, in nanoseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DieTimings {
    /// Page read (tR)
    pub read_ns: u64,
    /// Page program (tPROG)
    pub program_ns: u64,
    /// Block erase (tBERS)
    pub erase_ns: u64,
    /// RESET (tRST)
    pub reset_ns: u64,
}

impl Default for DieTimings {
    fn default() -> Self {
        Self {
            read_ns: 25_000,
            program_ns: 200_000,
            erase_ns: 2_000_000,
            reset_ns: 5_000,
        }
    }
}

/// Injected misbehaviour
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DieFaults {
    /// R/B# never returns to ready
    pub stuck_busy: bool,
    /// Pages whose program reports FAIL
    pub program_fail: BTreeSet<u32>,
    /// Blocks whose erase reports FAIL
    pub erase_fail: BTreeSet<u32>,
    /// The next N page loads come back with bit 0 of byte 0 flipped
    pub read_flips: u32,
    /// Bytes strobed in faster than this read back inverted
    pub min_trea_ns: u16,
    /// The transfer engine refuses to configure
    pub engine_unavailable: bool,
}

/// Emulated NAND die
///
/// Storage is sparse: pages that were never programmed since their last
/// erase are not stored and read as 0xFF.
#[derive(Debug)]
pub struct NandDie {
    profile: ChipProfile,
    id: [u8; nand::ID_LEN],
    timings: DieTimings,
    /// Fault injection, may be changed at any time
    pub faults: DieFaults,
    pages: BTreeMap<u32, Vec<u8>>,
    now_ns: u64,
    busy_until: u64,
    cmd: u8,
    addr: Vec<u8>,
    register: Vec<u8>,
    column: usize,
    out: Vec<u8>,
    out_pos: usize,
    status: Status,
    programs: u32,
    erases: u32,
    reads: u32,
}

impl NandDie {
    /// Blank die answering READ ID with the profile's identifier
    pub fn new(profile: ChipProfile, timings: DieTimings) -> Self {
        let mut id = [0u8; nand::ID_LEN];
        for (slot, &b) in id.iter_mut().zip(&profile.id) {
            *slot = b;
        }
        let page_len = profile.page_total_size() as usize;
        Self {
            profile,
            id,
            timings,
            faults: DieFaults::default(),
            pages: BTreeMap::new(),
            now_ns: 0,
            busy_until: 0,
            cmd: nand::RESET,
            addr: Vec::new(),
            register: vec![ERASED; page_len],
            column: 0,
            out: Vec::new(),
            out_pos: 0,
            status: Status::READY | Status::ARRAY_READY | Status::WRITE_ENABLED,
            programs: 0,
            erases: 0,
            reads: 0,
        }
    }

    /// Geometry
    pub fn profile(&self) -> &ChipProfile {
        &self.profile
    }

    /// Override the READ ID answer
    pub fn set_id(&mut self, id: [u8; nand::ID_LEN]) {
        self.id = id;
    }

    /// Virtual time
    pub fn now_ns(&self) -> u64 {
        self.now_ns
    }

    /// Let virtual time pass
    pub fn advance_ns(&mut self, ns: u64) {
        self.now_ns = self.now_ns.saturating_add(ns);
    }

    /// R/B# level
    pub fn ready(&self) -> bool {
        !self.faults.stuck_busy && self.now_ns >= self.busy_until
    }

    /// Contents of a page including OOB
    pub fn page(&self, page: u32) -> Vec<u8> {
        self.pages
            .get(&page)
            .cloned()
            .unwrap_or_else(|| vec![ERASED; self.profile.page_total_size() as usize])
    }

    /// Overwrite a page directly, bypassing the bus
    pub fn load_page(&mut self, page: u32, data: &[u8]) {
        let mut stored = vec![ERASED; self.profile.page_total_size() as usize];
        let n = data.len().min(stored.len());
        stored[..n].copy_from_slice(&data[..n]);
        self.pages.insert(page, stored);
    }

    /// Corrupt the second half of a page, as a program cut short by a power loss would
    pub fn tear_page(&mut self, page: u32) {
        let mut data = self.page(page);
        let half = data.len() / 2;
        data[half..].iter_mut().for_each(|b| *b ^= 0x3C);
        self.pages.insert(page, data);
    }

    /// Snapshot of every page that is not blank
    pub fn image(&self) -> BTreeMap<u32, Vec<u8>> {
        self.pages
            .iter()
            .filter(|(_, data)| data.iter().any(|&b| b != ERASED))
            .map(|(&page, data)| (page, data.clone()))
            .collect()
    }

    /// PROGRAM confirms seen
    pub fn programs(&self) -> u32 {
        self.programs
    }

    /// ERASE confirms seen
    pub fn erases(&self) -> u32 {
        self.erases
    }

    /// Page loads seen
    pub fn reads(&self) -> u32 {
        self.reads
    }

    fn busy_for(&mut self, ns: u64) {
        self.busy_until = self.now_ns + ns;
    }

    fn row(bytes: &[u8]) -> u32 {
        bytes.iter().rev().fold(0u32, |acc, &b| (acc << 8) | b as u32)
    }

    fn column(&self) -> usize {
        match self.addr.as_slice() {
            [lo, hi, ..] => u16::from_le_bytes([*lo, *hi]) as usize,
            _ => 0,
        }
    }

    fn page_addr(&self) -> Option<u32> {
        let page = Self::row(self.addr.get(2..)?);
        (page < self.profile.total_pages()).then_some(page)
    }

    /// CLE cycle
    pub fn latch_command(&mut self, op: u8) {
        match op {
            nand::RESET => {
                self.cmd = op;
                self.out.clear();
                self.status.remove(Status::FAIL);
                self.busy_for(self.timings.reset_ns);
            }
            nand::READ_1ST | nand::PROGRAM_1ST | nand::ERASE_1ST | nand::READ_ID => {
                self.cmd = op;
                self.addr.clear();
                self.column = 0;
                if op == nand::PROGRAM_1ST {
                    self.register.fill(ERASED);
                }
                if op == nand::READ_ID {
                    self.out = self.id.to_vec();
                    self.out_pos = 0;
                }
            }
            nand::READ_2ND if self.cmd == nand::READ_1ST => self.load(),
            nand::PROGRAM_2ND if self.cmd == nand::PROGRAM_1ST => self.program(),
            nand::ERASE_2ND if self.cmd == nand::ERASE_1ST => self.erase(),
            nand::READ_STATUS => {
                let mut status = self.status;
                status.set(Status::READY | Status::ARRAY_READY, self.ready());
                self.out = vec![status.bits()];
                self.out_pos = 0;
            }
            other => log::trace!("die: ignoring opcode {:#04x} after {:#04x}", other, self.cmd),
        }
    }

    /// ALE cycle
    pub fn latch_address(&mut self, byte: u8) {
        self.addr.push(byte);
        if self.cmd == nand::PROGRAM_1ST && self.addr.len() == 2 {
            self.column = self.column();
        }
    }

    /// Data-in cycle
    pub fn latch_data(&mut self, byte: u8) {
        if self.cmd != nand::PROGRAM_1ST {
            return;
        }
        if let Some(cell) = self.register.get_mut(self.column) {
            *cell = byte;
        }
        self.column += 1;
    }

    /// Data-out cycle
    pub fn read_byte(&mut self) -> u8 {
        let value = self.out.get(self.out_pos).copied().unwrap_or(ERASED);
        self.out_pos += 1;
        value
    }

    fn load(&mut self) {
        self.reads += 1;
        let Some(page) = self.page_addr() else {
            self.out.clear();
            return;
        };
        let mut data = self.page(page);
        if self.faults.read_flips > 0 {
            self.faults.read_flips -= 1;
            data[0] ^= 0x01;
        }
        self.out = data;
        self.out_pos = self.column();
        self.busy_for(self.timings.read_ns);
    }

    fn program(&mut self) {
        self.programs += 1;
        self.busy_for(self.timings.program_ns);
        let page = match self.page_addr() {
            Some(page) if !self.faults.program_fail.contains(&page) => page,
            _ => {
                self.status.insert(Status::FAIL);
                return;
            }
        };
        self.status.remove(Status::FAIL);
        let mut data = self.page(page);
        for (cell, &b) in data.iter_mut().zip(&self.register) {
            *cell &= b;
        }
        self.pages.insert(page, data);
    }

    fn erase(&mut self) {
        self.erases += 1;
        self.busy_for(self.timings.erase_ns);
        let row = Self::row(&self.addr);
        let block = self.profile.page_block(row);
        if block >= self.profile.block_count || self.faults.erase_fail.contains(&block) {
            self.status.insert(Status::FAIL);
            return;
        }
        self.status.remove(Status::FAIL);
        let first = self.profile.block_first_page(block);
        let pages: Vec<u32> = self.pages.range(first..first + self.profile.pages_per_block).map(|(&p, _)| p).collect();
        for page in pages {
            self.pages.remove(&page);
        }
    }
}
