//! Direct pin-toggling NAND bus
//!
//! This is the fallback strategy: every WE#/RE# strobe is driven from
//! software through [`BitbangNandPins`], with the delays taken from
//! [`TimingParams`]. It needs nothing beyond GPIO and a nanosecond delay,
//! so it works on any board, at the cost of throughput.

use super::timing::TimingParams;
use super::traits::{Latch, NandBus};
use crate::error::Result;

/// Low-level pin access for bit-toggling the NAND bus
///
/// Control lines are expressed in terms of their *asserted* state, so
/// `set_we(true)` drives WE# low.
pub trait BitbangNandPins {
    /// Assert or release CE#
    fn set_ce(&mut self, active: bool);

    /// Drive CLE
    fn set_cle(&mut self, high: bool);

    /// Drive ALE
    fn set_ale(&mut self, high: bool);

    /// Assert or release WE# (rising edge latches the I/O byte)
    fn set_we(&mut self, active: bool);

    /// Assert or release RE# (falling edge starts the output cycle)
    fn set_re(&mut self, active: bool);

    /// Switch I/O0-7 between output (`true`) and input
    fn set_io_output(&mut self, output: bool);

    /// Drive I/O0-7
    fn write_io(&mut self, value: u8);

    /// Sample I/O0-7
    fn read_io(&mut self) -> u8;

    /// Sample R/B# (`true` = ready)
    fn ready(&mut self) -> bool;

    /// Busy-wait for at least `ns` nanoseconds
    fn delay_ns(&mut self, ns: u32);

    /// Wait for R/B# to report ready, up to `timeout_us`
    ///
    /// Default implementation polls. Boards with an edge interrupt on R/B#
    /// override this to sleep until the rising edge.
    fn wait_ready(&mut self, timeout_us: u32) -> bool {
        let mut waited = 0u32;
        while !self.ready() {
            if waited >= timeout_us {
                return false;
            }
            self.delay_ns(super::POLL_INTERVAL_US * 1000);
            waited = waited.saturating_add(super::POLL_INTERVAL_US);
        }
        true
    }
}

/// Single-cycle helpers usable by any [`BitbangNandPins`] implementation
pub mod cycle {
    use super::{BitbangNandPins, TimingParams};

    /// One WE# write cycle
    pub fn write_byte<P: BitbangNandPins + ?Sized>(pins: &mut P, timing: &TimingParams, byte: u8) {
        pins.write_io(byte);
        pins.set_we(true);
        pins.delay_ns(timing.t_wp_ns as u32);
        pins.set_we(false);
        pins.delay_ns(timing.t_wc_ns.saturating_sub(timing.t_wp_ns) as u32);
    }

    /// One RE# read cycle
    pub fn read_byte<P: BitbangNandPins + ?Sized>(pins: &mut P, timing: &TimingParams) -> u8 {
        let strobe = timing.read_strobe_ns();
        pins.set_re(true);
        pins.delay_ns(strobe as u32);
        let value = pins.read_io();
        pins.set_re(false);
        pins.delay_ns(timing.t_rc_ns.saturating_sub(strobe) as u32);
        value
    }
}

/// NAND bus driven by toggling pins in software
pub struct BitbangBus<P: BitbangNandPins> {
    pins: P,
    timing: TimingParams,
}

impl<P: BitbangNandPins> BitbangBus<P> {
    /// Take ownership of the pins and park the bus in its idle state
    pub fn new(mut pins: P, timing: TimingParams) -> Self {
        pins.set_ce(false);
        pins.set_cle(false);
        pins.set_ale(false);
        pins.set_we(false);
        pins.set_re(false);
        pins.set_io_output(false);
        Self { pins, timing }
    }

    /// Access the pins
    pub fn pins_mut(&mut self) -> &mut P {
        &mut self.pins
    }

    /// Release the pins
    pub fn into_inner(self) -> P {
        self.pins
    }
}

impl<P: BitbangNandPins> NandBus for BitbangBus<P> {
    fn name(&self) -> &'static str {
        "bitbang"
    }

    fn select(&mut self, active: bool) {
        self.pins.set_ce(active);
    }

    fn write(&mut self, latch: Latch, bytes: &[u8]) -> Result<()> {
        self.pins.set_cle(latch == Latch::Command);
        self.pins.set_ale(latch == Latch::Address);
        self.pins.set_io_output(true);
        for &b in bytes {
            cycle::write_byte(&mut self.pins, &self.timing, b);
        }
        self.pins.set_io_output(false);
        self.pins.set_cle(false);
        self.pins.set_ale(false);
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<()> {
        self.pins.set_io_output(false);
        for b in buf.iter_mut() {
            *b = cycle::read_byte(&mut self.pins, &self.timing);
        }
        Ok(())
    }

    fn is_ready(&mut self) -> bool {
        self.pins.ready()
    }

    fn delay_us(&mut self, us: u32) {
        self.pins.delay_ns(us.saturating_mul(1000));
    }

    fn timing(&self) -> TimingParams {
        self.timing
    }

    fn set_timing(&mut self, timing: TimingParams) -> Result<()> {
        self.timing = timing;
        Ok(())
    }

    fn wait_ready(&mut self, timeout_us: u32) -> Result<()> {
        if self.pins.wait_ready(timeout_us) {
            Ok(())
        } else {
            Err(crate::error::Error::BusTimeout)
        }
    }
}
