//! Pin-level view of the emulated die, for the direct-toggling strategy

use alloc::rc::Rc;
use core::cell::RefCell;

use nandprog_core::bus::BitbangNandPins;

use crate::die::NandDie;

/// GPIO lines wired to a [`NandDie`]
///
/// Command, address and data bytes latch on the WE# rising edge; output
/// bytes are fetched on the RE# falling edge. Sampling I/O sooner than the
/// die's minimum access time returns unsettled (inverted) data.
pub struct DummyPins {
    die: Rc<RefCell<NandDie>>,
    ce: bool,
    cle: bool,
    ale: bool,
    we: bool,
    re: bool,
    io_output: bool,
    io: u8,
    fetched: u8,
    fetched_at_ns: u64,
    bus_conflicts: u32,
}

impl DummyPins {
    /// Attach to a die
    pub fn new(die: Rc<RefCell<NandDie>>) -> Self {
        Self {
            die,
            ce: false,
            cle: false,
            ale: false,
            we: false,
            re: false,
            io_output: false,
            io: 0,
            fetched: 0,
            fetched_at_ns: 0,
            bus_conflicts: 0,
        }
    }

    /// Cycles where the host drove I/O while RE# was asserted
    pub fn bus_conflicts(&self) -> u32 {
        self.bus_conflicts
    }
}

impl BitbangNandPins for DummyPins {
    fn set_ce(&mut self, active: bool) {
        self.ce = active;
    }

    fn set_cle(&mut self, high: bool) {
        self.cle = high;
    }

    fn set_ale(&mut self, high: bool) {
        self.ale = high;
    }

    fn set_we(&mut self, active: bool) {
        let rising = self.we && !active;
        self.we = active;
        if !rising || !self.ce {
            return;
        }
        let mut die = self.die.borrow_mut();
        match (self.cle, self.ale) {
            (true, false) => die.latch_command(self.io),
            (false, true) => die.latch_address(self.io),
            (false, false) => die.latch_data(self.io),
            (true, true) => log::warn!("pins: CLE and ALE both high, cycle ignored"),
        }
    }

    fn set_re(&mut self, active: bool) {
        let falling = active && !self.re;
        self.re = active;
        if !falling || !self.ce {
            return;
        }
        if self.io_output {
            self.bus_conflicts += 1;
        }
        let mut die = self.die.borrow_mut();
        self.fetched = die.read_byte();
        self.fetched_at_ns = die.now_ns();
    }

    fn set_io_output(&mut self, output: bool) {
        self.io_output = output;
    }

    fn write_io(&mut self, value: u8) {
        self.io = value;
    }

    fn read_io(&mut self) -> u8 {
        let die = self.die.borrow();
        let elapsed = die.now_ns() - self.fetched_at_ns;
        if elapsed < die.faults.min_trea_ns as u64 {
            !self.fetched
        } else {
            self.fetched
        }
    }

    fn ready(&mut self) -> bool {
        self.die.borrow().ready()
    }

    fn delay_ns(&mut self, ns: u32) {
        self.die.borrow_mut().advance_ns(ns as u64);
    }
}
