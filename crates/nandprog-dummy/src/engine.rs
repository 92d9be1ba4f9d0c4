//! Transfer-engine view of the emulated die, for the accelerated strategy

use alloc::rc::Rc;
use core::cell::RefCell;

use nandprog_core::bus::{Latch, TimingParams, TransferEngine, MAX_IN_FLIGHT, SLOT_SIZE};
use nandprog_core::error::{Error, Result};

use crate::die::NandDie;

/// Emulated strobe/DMA engine
///
/// Transfers run to completion when submitted, advancing the die clock by
/// one cycle time per byte. In-flight bookkeeping still follows the
/// submit/complete protocol so double buffering can be checked.
pub struct DummyEngine {
    die: Rc<RefCell<NandDie>>,
    timing: Option<TimingParams>,
    ce: bool,
    latch: Latch,
    slots: [[u8; SLOT_SIZE]; MAX_IN_FLIGHT],
    in_flight: [bool; MAX_IN_FLIGHT],
    peak_in_flight: usize,
    transfers: u32,
}

impl DummyEngine {
    /// Attach to a die
    pub fn new(die: Rc<RefCell<NandDie>>) -> Self {
        Self {
            die,
            timing: None,
            ce: false,
            latch: Latch::Data,
            slots: [[0; SLOT_SIZE]; MAX_IN_FLIGHT],
            in_flight: [false; MAX_IN_FLIGHT],
            peak_in_flight: 0,
            transfers: 0,
        }
    }

    /// Most transfers ever in flight at once
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight
    }

    /// Transfers submitted so far
    pub fn transfers(&self) -> u32 {
        self.transfers
    }

    fn start(&mut self, slot: usize) -> Result<TimingParams> {
        let timing = self.timing.ok_or(Error::BusUnavailable)?;
        if self.in_flight[slot] {
            log::error!("engine: slot {} submitted while in flight", slot);
            return Err(Error::Busy);
        }
        self.in_flight[slot] = true;
        self.transfers += 1;
        let count = self.in_flight.iter().filter(|&&f| f).count();
        self.peak_in_flight = self.peak_in_flight.max(count);
        Ok(timing)
    }
}

impl TransferEngine for DummyEngine {
    fn configure(&mut self, timing: &TimingParams) -> Result<()> {
        if self.die.borrow().faults.engine_unavailable {
            return Err(Error::BusUnavailable);
        }
        self.timing = Some(*timing);
        Ok(())
    }

    fn set_ce(&mut self, active: bool) {
        self.ce = active;
    }

    fn set_latch(&mut self, latch: Latch) {
        self.latch = latch;
    }

    fn slot_mut(&mut self, slot: usize) -> &mut [u8; SLOT_SIZE] {
        &mut self.slots[slot]
    }

    fn submit_write(&mut self, slot: usize, len: usize) -> Result<()> {
        let timing = self.start(slot)?;
        if !self.ce {
            return Ok(());
        }
        let mut die = self.die.borrow_mut();
        for &b in &self.slots[slot][..len] {
            match self.latch {
                Latch::Command => die.latch_command(b),
                Latch::Address => die.latch_address(b),
                Latch::Data => die.latch_data(b),
            }
        }
        die.advance_ns(len as u64 * timing.t_wc_ns as u64);
        Ok(())
    }

    fn submit_read(&mut self, slot: usize, len: usize) -> Result<()> {
        let timing = self.start(slot)?;
        if !self.ce {
            return Ok(());
        }
        let mut die = self.die.borrow_mut();
        let unsettled = timing.read_strobe_ns() < die.faults.min_trea_ns;
        for cell in &mut self.slots[slot][..len] {
            let value = die.read_byte();
            *cell = if unsettled { !value } else { value };
        }
        die.advance_ns(len as u64 * timing.t_rc_ns as u64);
        Ok(())
    }

    fn complete(&mut self, slot: usize) -> Result<()> {
        self.in_flight[slot] = false;
        Ok(())
    }

    fn ready(&mut self) -> bool {
        self.die.borrow().ready()
    }

    fn delay_us(&mut self, us: u32) {
        self.die.borrow_mut().advance_ns(us as u64 * 1000);
    }
}
