//! Peripheral-accelerated NAND bus
//!
//! The transfer engine owns two slot buffers. While one slot is being
//! clocked over the bus the CPU fills (or drains) the other, so page data
//! streams with no idle gap between slot transfers.

use super::timing::TimingParams;
use super::traits::{Latch, NandBus};
use crate::error::Result;

/// Bytes per transfer slot
pub const SLOT_SIZE: usize = 512;

/// Number of slots, and so the maximum number of transfers in flight
pub const MAX_IN_FLIGHT: usize = 2;

/// Hardware state machine that generates strobes and moves data
///
/// Slots are owned by the engine because a running transfer may still be
/// reading from (or writing to) them. The CPU may only touch a slot that is
/// not in flight.
pub trait TransferEngine {
    /// Program cycle timing; fails if the engine cannot be brought up
    fn configure(&mut self, timing: &TimingParams) -> Result<()>;

    /// Assert or release CE#
    fn set_ce(&mut self, active: bool);

    /// Select the latch for subsequent write transfers
    fn set_latch(&mut self, latch: Latch);

    /// CPU access to a slot that is not in flight
    fn slot_mut(&mut self, slot: usize) -> &mut [u8; SLOT_SIZE];

    /// Start clocking the first `len` bytes of `slot` out
    fn submit_write(&mut self, slot: usize, len: usize) -> Result<()>;

    /// Start clocking `len` bytes in to `slot`
    fn submit_read(&mut self, slot: usize, len: usize) -> Result<()>;

    /// Block until the transfer on `slot` has finished
    fn complete(&mut self, slot: usize) -> Result<()>;

    /// Sample R/B#
    fn ready(&mut self) -> bool;

    /// Block for at least `us` microseconds
    fn delay_us(&mut self, us: u32);

    /// Wait for R/B# to report ready, up to `timeout_us`
    ///
    /// Engines that raise an interrupt on the R/B# rising edge override
    /// this; the default polls.
    fn wait_ready(&mut self, timeout_us: u32) -> bool {
        let mut waited = 0u32;
        while !self.ready() {
            if waited >= timeout_us {
                return false;
            }
            self.delay_us(super::POLL_INTERVAL_US);
            waited = waited.saturating_add(super::POLL_INTERVAL_US);
        }
        true
    }
}

/// NAND bus backed by a [`TransferEngine`]
pub struct AcceleratedBus<E: TransferEngine> {
    engine: E,
    timing: TimingParams,
    in_flight: [bool; MAX_IN_FLIGHT],
}

impl<E: TransferEngine> AcceleratedBus<E> {
    /// Bring the engine up with the given timing
    pub fn new(mut engine: E, timing: TimingParams) -> Result<Self> {
        engine.configure(&timing)?;
        engine.set_ce(false);
        Ok(Self {
            engine,
            timing,
            in_flight: [false; MAX_IN_FLIGHT],
        })
    }

    /// Access the engine
    pub fn engine_mut(&mut self) -> &mut E {
        &mut self.engine
    }

    /// Release the engine
    pub fn into_inner(self) -> E {
        self.engine
    }

    fn settle(&mut self, slot: usize) -> Result<()> {
        if self.in_flight[slot] {
            self.in_flight[slot] = false;
            self.engine.complete(slot)?;
        }
        Ok(())
    }

    fn settle_all(&mut self) -> Result<()> {
        for slot in 0..MAX_IN_FLIGHT {
            self.settle(slot)?;
        }
        Ok(())
    }
}

impl<E: TransferEngine> NandBus for AcceleratedBus<E> {
    fn name(&self) -> &'static str {
        "accelerated"
    }

    fn select(&mut self, active: bool) {
        if !active {
            // CE# must not rise under a running transfer
            if let Err(e) = self.settle_all() {
                log::warn!("bus: transfer did not complete before deselect: {}", e);
            }
        }
        self.engine.set_ce(active);
    }

    fn write(&mut self, latch: Latch, bytes: &[u8]) -> Result<()> {
        self.settle_all()?;
        self.engine.set_latch(latch);
        for (i, chunk) in bytes.chunks(SLOT_SIZE).enumerate() {
            let slot = i % MAX_IN_FLIGHT;
            self.settle(slot)?;
            self.engine.slot_mut(slot)[..chunk.len()].copy_from_slice(chunk);
            self.engine.submit_write(slot, chunk.len())?;
            self.in_flight[slot] = true;
        }
        self.settle_all()
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<()> {
        self.settle_all()?;
        let total = buf.len();
        let count = total.div_ceil(SLOT_SIZE);
        let chunk_len = |i: usize| SLOT_SIZE.min(total - i * SLOT_SIZE);

        for i in 0..count.min(MAX_IN_FLIGHT) {
            self.engine.submit_read(i, chunk_len(i))?;
            self.in_flight[i] = true;
        }
        for i in 0..count {
            let slot = i % MAX_IN_FLIGHT;
            let len = chunk_len(i);
            self.settle(slot)?;
            let start = i * SLOT_SIZE;
            buf[start..start + len].copy_from_slice(&self.engine.slot_mut(slot)[..len]);
            let next = i + MAX_IN_FLIGHT;
            if next < count {
                self.engine.submit_read(slot, chunk_len(next))?;
                self.in_flight[slot] = true;
            }
        }
        Ok(())
    }

    fn is_ready(&mut self) -> bool {
        self.engine.ready()
    }

    fn delay_us(&mut self, us: u32) {
        self.engine.delay_us(us);
    }

    fn timing(&self) -> TimingParams {
        self.timing
    }

    fn set_timing(&mut self, timing: TimingParams) -> Result<()> {
        self.settle_all()?;
        self.engine.configure(&timing)?;
        self.timing = timing;
        Ok(())
    }

    fn wait_ready(&mut self, timeout_us: u32) -> Result<()> {
        self.settle_all()?;
        if self.engine.wait_ready(timeout_us) {
            Ok(())
        } else {
            Err(crate::error::Error::BusTimeout)
        }
    }
}
